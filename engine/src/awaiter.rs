//! Event objects that connect native promises and managed futures.
//!
//! [`RustPromiseAwaiter`] watches a native promise on behalf of a managed
//! task. [`FuturePollEvent`] polls a managed future on behalf of native
//! code. When the first is polled from inside the second, the awaiter links
//! to the poll event and arms it directly once its promise is ready,
//! without going through a generic [`Waker`].

use crate::{
    errors::RemoteError,
    event_loop::{arm_breadth_first, arm_depth_first, current_inbox, Event, Inbox},
    fulfiller::CrossThreadState,
    promise::OwnPromiseNode,
    trace::TraceBuilder,
    waker::{try_into_native_waker_ptr, NativeWaker, NativeWakerVTable, OptionWaker},
};
use std::{
    any::Any,
    cell::RefCell,
    ptr,
    rc::{Rc, Weak},
    sync::{Arc, OnceLock},
    task::{Context, Waker},
    thread::{self, ThreadId},
};
use tracing::{error, trace};

/// Relays the readiness of a native promise node to whoever polls it.
pub struct RustPromiseAwaiter {
    this: Weak<RustPromiseAwaiter>,
    node: RefCell<Option<OwnPromiseNode>>,
    // `None` once the node is ready.
    option_waker: RefCell<Option<OptionWaker>>,
    linked: RefCell<Weak<FuturePollEvent>>,
}

impl RustPromiseAwaiter {
    pub fn new(mut node: OwnPromiseNode) -> Rc<Self> {
        Rc::new_cyclic(|this: &Weak<RustPromiseAwaiter>| {
            let done = node.is_ready();
            if !done {
                let this_event: Weak<RustPromiseAwaiter> = this.clone();
                let event: Weak<dyn Event> = this_event;
                node.on_ready(event);
            }
            RustPromiseAwaiter {
                this: this.clone(),
                node: RefCell::new(Some(node)),
                option_waker: RefCell::new(if done {
                    None
                } else {
                    Some(OptionWaker::empty())
                }),
                linked: RefCell::new(Weak::new()),
            }
        })
    }

    /// Returns `true` once the node is ready; every later call returns
    /// `true` as well.
    ///
    /// Otherwise arranges a wake-up: when `poll_event` is the event
    /// currently polling the caller, it is armed directly; if not, a clone
    /// of `waker` is stored and woken.
    pub fn poll(&self, waker: &Waker, poll_event: Option<Rc<FuturePollEvent>>) -> bool {
        if self.option_waker.borrow().is_none() {
            return true;
        }

        let node_ready = self
            .node
            .borrow()
            .as_ref()
            .is_some_and(|node| node.is_ready());
        if node_ready {
            *self.option_waker.borrow_mut() = None;
            self.link(None);
            return true;
        }

        match poll_event {
            Some(event) => {
                if let Some(option_waker) = self.option_waker.borrow_mut().as_mut() {
                    option_waker.set_none();
                }
                self.link(Some(&event));
                trace!("promise awaiter linked to future poll event");
            }
            None => {
                if let Some(option_waker) = self.option_waker.borrow_mut().as_mut() {
                    option_waker.set(waker);
                }
                self.link(None);
            }
        }
        false
    }

    /// # Panics
    ///
    /// Panics unless [`Self::poll`] has returned `true`, and on a second
    /// call.
    pub fn take_own_promise_node(&self) -> OwnPromiseNode {
        assert!(
            self.option_waker.borrow().is_none(),
            "take_own_promise_node() should only be called after poll() returns true"
        );
        match self.node.borrow_mut().take() {
            Some(node) => node,
            None => panic!("take_own_promise_node() should only be called once"),
        }
    }

    pub fn is_linked(&self) -> bool {
        self.linked.borrow().strong_count() > 0
    }

    fn link(&self, event: Option<&Rc<FuturePollEvent>>) {
        let next = event.map_or_else(Weak::new, Rc::downgrade);
        let previous = self.linked.replace(next).upgrade();
        if let Some(previous) = previous {
            if event.map_or(true, |event| !Rc::ptr_eq(event, &previous)) {
                previous.unlink_awaiter(&self.this);
            }
        }
        if let Some(event) = event {
            event.link_awaiter(&self.this);
        }
    }

    fn trace_promise(&self, builder: &mut TraceBuilder) {
        if let Some(node) = self.node.borrow().as_ref() {
            node.trace_promise(builder);
        }
    }
}

impl Event for RustPromiseAwaiter {
    fn fire(self: Rc<Self>) {
        let linked = self.linked.replace(Weak::new()).upgrade();
        let option_waker = self.option_waker.borrow_mut().take();

        if let Some(event) = linked {
            event.unlink_awaiter(&self.this);
            arm_depth_first(event.as_event());
        } else if let Some(mut option_waker) = option_waker {
            if option_waker.is_set() {
                option_waker.wake_mut();
            }
        }
        // Otherwise nobody polled yet; the first poll sees readiness.
    }

    fn trace_event(&self, builder: &mut TraceBuilder) {
        self.trace_promise(builder);
        if let Some(event) = self.linked.borrow().upgrade() {
            event.trace_event(builder);
        }
    }
}

impl Drop for RustPromiseAwaiter {
    fn drop(&mut self) {
        if let Some(event) = self.linked.get_mut().upgrade() {
            event.unlink_awaiter(&self.this);
        }
    }
}

/// Managed-side handle that polls a native promise node through a
/// [`RustPromiseAwaiter`].
pub struct PromiseAwaiter<Data: Unpin> {
    awaiter: Rc<RustPromiseAwaiter>,
    data: Data,
}

impl<Data: Unpin> PromiseAwaiter<Data> {
    pub fn new(node: OwnPromiseNode, data: Data) -> Self {
        PromiseAwaiter {
            awaiter: RustPromiseAwaiter::new(node),
            data,
        }
    }

    pub fn data(&self) -> &Data {
        &self.data
    }

    pub fn poll(&mut self, cx: &mut Context<'_>) -> bool {
        let poll_event = try_into_native_waker_ptr(cx.waker())
            .and_then(|native| unsafe { PollScope::try_get_future_poll_event(native) });
        self.awaiter.poll(cx.waker(), poll_event)
    }

    pub fn take_own_promise_node(&mut self) -> OwnPromiseNode {
        self.awaiter.take_own_promise_node()
    }

    pub fn is_linked(&self) -> bool {
        self.awaiter.is_linked()
    }
}

/// One step of a type-erased managed future.
pub(crate) trait PollTask {
    /// `None` while pending.
    fn poll(&mut self, waker: &NativeWaker) -> Option<Result<Box<dyn Any>, RemoteError>>;
}

/// Polls a managed future each time it fires, until the future completes.
pub struct FuturePollEvent {
    this: Weak<FuturePollEvent>,
    description: String,
    task: RefCell<Option<Box<dyn PollTask>>>,
    result: RefCell<Option<Result<Box<dyn Any>, RemoteError>>>,
    waiter: RefCell<Option<Weak<dyn Event>>>,
    awaiters: RefCell<Vec<Weak<RustPromiseAwaiter>>>,
    arc_waker_promise: RefCell<Option<OwnPromiseNode>>,
}

impl FuturePollEvent {
    pub(crate) fn new(task: Box<dyn PollTask>, description: String) -> Rc<Self> {
        Rc::new_cyclic(|this: &Weak<FuturePollEvent>| FuturePollEvent {
            this: this.clone(),
            description,
            task: RefCell::new(Some(task)),
            result: RefCell::new(None),
            waiter: RefCell::new(None),
            awaiters: RefCell::new(Vec::new()),
            arc_waker_promise: RefCell::new(None),
        })
    }

    pub(crate) fn as_event(&self) -> Weak<dyn Event> {
        self.this.clone()
    }

    /// Arms `waiter` once the future completes, now if it already has.
    pub(crate) fn set_waiter(&self, waiter: Weak<dyn Event>) {
        if self.result.borrow().is_some() {
            arm_breadth_first(waiter);
        } else {
            *self.waiter.borrow_mut() = Some(waiter);
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.result.borrow().is_some()
    }

    pub(crate) fn take_result(&self) -> Option<Result<Box<dyn Any>, RemoteError>> {
        self.result.borrow_mut().take()
    }

    /// Drops the future without completing it.
    pub(crate) fn cancel(&self) {
        let task = self.task.borrow_mut().take();
        drop(task);
        let arc_waker_promise = self.arc_waker_promise.borrow_mut().take();
        drop(arc_waker_promise);
        *self.waiter.borrow_mut() = None;
    }

    pub(crate) fn trace_promise(&self, builder: &mut TraceBuilder) {
        builder.add(self.description.as_str());

        // Several branches may be pending; follow the first awaited node.
        let first_awaiter = self
            .awaiters
            .borrow()
            .iter()
            .find_map(|awaiter| awaiter.upgrade());
        if let Some(awaiter) = first_awaiter {
            awaiter.trace_promise(builder);
        } else if let Some(node) = self.arc_waker_promise.borrow().as_ref() {
            node.trace_promise(builder);
        }
    }

    fn link_awaiter(&self, awaiter: &Weak<RustPromiseAwaiter>) {
        let mut awaiters = self.awaiters.borrow_mut();
        if !awaiters.iter().any(|linked| Weak::ptr_eq(linked, awaiter)) {
            awaiters.push(awaiter.clone());
        }
    }

    fn unlink_awaiter(&self, awaiter: &Weak<RustPromiseAwaiter>) {
        self.awaiters
            .borrow_mut()
            .retain(|linked| !Weak::ptr_eq(linked, awaiter));
    }

    /// Retires the wake-up promise of the previous poll.
    ///
    /// That promise is only ever fulfilled; a rejection means the
    /// cross-thread wake-up machinery is broken and there is no way to
    /// report it to whoever awaits this future, so the process aborts.
    fn enter_poll_scope(&self) {
        let Some(mut node) = self.arc_waker_promise.borrow_mut().take() else {
            return;
        };
        if node.is_ready() {
            if let Err(err) = node.get() {
                error!(%err, future = %self.description, "lazy waker promise rejected");
                std::process::abort();
            }
        }
    }

    fn exit_poll_scope(&self, arc_waker_promise: Option<OwnPromiseNode>) {
        if let Some(mut node) = arc_waker_promise {
            node.on_ready(self.as_event());
            *self.arc_waker_promise.borrow_mut() = Some(node);
        }
    }
}

impl Event for FuturePollEvent {
    fn fire(self: Rc<Self>) {
        if self.is_ready() {
            return;
        }
        self.enter_poll_scope();

        let Some(mut task) = self.task.borrow_mut().take() else {
            return;
        };
        let inbox = match current_inbox() {
            Ok(inbox) => inbox,
            Err(_) => unreachable!("events only fire inside an event loop"),
        };

        trace!(future = %self.description, "polling future");
        let scope = PollScope::new(self.clone(), inbox);
        let outcome = task.poll(&scope.header);
        let arc_waker_promise = scope.finish();

        match outcome {
            None => {
                self.exit_poll_scope(arc_waker_promise);
                *self.task.borrow_mut() = Some(task);
            }
            Some(result) => {
                trace!(future = %self.description, ok = result.is_ok(), "future completed");
                drop(arc_waker_promise);
                drop(task);
                *self.result.borrow_mut() = Some(result);
                let waiter = self.waiter.borrow_mut().take();
                if let Some(waiter) = waiter {
                    arm_breadth_first(waiter);
                }
            }
        }
    }

    fn trace_event(&self, builder: &mut TraceBuilder) {
        builder.add(self.description.as_str());
    }
}

/// Native waker handed to a managed future for the duration of one poll.
///
/// Waking it on the loop thread re-arms the polling event directly. Cloning
/// it, or waking it from another thread, goes through a lazily created
/// [`ArcWaker`] whose cross-thread promise re-arms the event instead.
///
/// Other threads only ever touch `loop_thread`, `inbox` and `arc_waker`.
#[repr(C)]
struct PollScope {
    header: NativeWaker,
    event: Rc<FuturePollEvent>,
    loop_thread: ThreadId,
    inbox: Arc<Inbox>,
    arc_waker: OnceLock<Arc<ArcWaker>>,
}

static POLL_SCOPE_VTABLE: NativeWakerVTable = NativeWakerVTable {
    clone: poll_scope_clone,
    wake: poll_scope_wake_by_ref,
    wake_by_ref: poll_scope_wake_by_ref,
    drop: poll_scope_drop,
};

impl PollScope {
    fn new(event: Rc<FuturePollEvent>, inbox: Arc<Inbox>) -> Self {
        PollScope {
            header: NativeWaker::new(&POLL_SCOPE_VTABLE),
            event,
            loop_thread: thread::current().id(),
            inbox,
            arc_waker: OnceLock::new(),
        }
    }

    fn arc_waker(&self) -> &Arc<ArcWaker> {
        self.arc_waker.get_or_init(|| {
            trace!("creating ArcWaker for poll scope");
            Arc::new(ArcWaker {
                header: NativeWaker::new(&ARC_WAKER_VTABLE),
                state: CrossThreadState::with_inbox(self.inbox.clone()),
            })
        })
    }

    /// Returns the promise that settles when an [`ArcWaker`] created during
    /// this poll is woken or dropped.
    fn finish(self) -> Option<OwnPromiseNode> {
        self.arc_waker.get().map(|arc_waker| arc_waker.state.node())
    }

    /// # Safety
    ///
    /// `waker` must point to a live native waker.
    unsafe fn try_get_future_poll_event(waker: *const NativeWaker) -> Option<Rc<FuturePollEvent>> {
        if !ptr::eq((*waker).vtable(), &POLL_SCOPE_VTABLE) {
            return None;
        }
        let scope = &*waker.cast::<PollScope>();
        if scope.loop_thread != thread::current().id() {
            return None;
        }
        Some(scope.event.clone())
    }
}

unsafe extern "C" fn poll_scope_clone(this: *const NativeWaker) -> *const NativeWaker {
    let scope = &*this.cast::<PollScope>();
    Arc::into_raw(scope.arc_waker().clone()).cast()
}

unsafe extern "C" fn poll_scope_wake_by_ref(this: *const NativeWaker) {
    let scope = &*this.cast::<PollScope>();
    if scope.loop_thread == thread::current().id() {
        arm_depth_first(scope.event.as_event());
    } else {
        scope.arc_waker().wake_by_ref();
    }
}

unsafe extern "C" fn poll_scope_drop(_this: *const NativeWaker) {}

/// Thread-safe native waker that re-arms a [`FuturePollEvent`] through a
/// cross-thread promise.
///
/// Dropping the last reference without waking counts as a wake. A future
/// that clones its waker and drops every clone while still pending is
/// therefore polled again on the next turn of the loop. It spins there
/// rather than leaving [`EventLoop::wait`](crate::EventLoop::wait) to
/// report [`Error::Hung`](crate::Error::Hung), the same as a future that
/// wakes itself on every poll.
#[repr(C)]
struct ArcWaker {
    header: NativeWaker,
    state: Arc<CrossThreadState<()>>,
}

static ARC_WAKER_VTABLE: NativeWakerVTable = NativeWakerVTable {
    clone: arc_waker_clone,
    wake: arc_waker_wake,
    wake_by_ref: arc_waker_wake_by_ref,
    drop: arc_waker_drop,
};

impl ArcWaker {
    fn wake_by_ref(&self) {
        if self.state.complete(Ok(())) {
            trace!("ArcWaker woken");
        }
    }
}

impl Drop for ArcWaker {
    fn drop(&mut self) {
        self.state.complete(Ok(()));
    }
}

unsafe extern "C" fn arc_waker_clone(this: *const NativeWaker) -> *const NativeWaker {
    Arc::increment_strong_count(this.cast::<ArcWaker>());
    this
}

unsafe extern "C" fn arc_waker_wake(this: *const NativeWaker) {
    let this = Arc::from_raw(this.cast::<ArcWaker>());
    this.wake_by_ref();
}

unsafe extern "C" fn arc_waker_wake_by_ref(this: *const NativeWaker) {
    (*this.cast::<ArcWaker>()).wake_by_ref();
}

unsafe extern "C" fn arc_waker_drop(this: *const NativeWaker) {
    drop(Arc::from_raw(this.cast::<ArcWaker>()));
}
