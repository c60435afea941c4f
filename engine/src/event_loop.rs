//! Single-threaded event loop that stands in for the native side's
//! scheduler.
//!
//! Events are armed onto a queue and fired one at a time on the loop's
//! thread. Other threads never touch the queue; they post tokens into the
//! loop's [`Inbox`], and the loop arms whichever event registered the token.

use crate::{errors::Error, promise::Promise, trace::TraceBuilder};
use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, VecDeque},
    mem,
    rc::{Rc, Weak},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Condvar, Mutex, PoisonError,
    },
};
use tracing::{debug, trace};

/// Something that runs on the event loop once armed.
///
/// The loop only holds armed events weakly: an event dropped while armed
/// never fires. An event may be fired more often than it was interested in
/// and must tolerate that.
pub trait Event {
    fn fire(self: Rc<Self>);

    /// Describes this event for hung-promise diagnostics.
    fn trace_event(&self, builder: &mut TraceBuilder);
}

/// Cross-thread mailbox of a loop.
pub(crate) struct Inbox {
    tokens: Mutex<Vec<u64>>,
    posted: Condvar,
    next_token: AtomicU64,
}

impl Inbox {
    fn new() -> Self {
        Inbox {
            tokens: Mutex::new(Vec::new()),
            posted: Condvar::new(),
            next_token: AtomicU64::new(0),
        }
    }

    pub(crate) fn new_token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    /// Callable from any thread.
    pub(crate) fn post(&self, token: u64) {
        debug!(token, "posting cross-thread event");
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(token);
        self.posted.notify_all();
    }

    fn take(&self) -> Vec<u64> {
        mem::take(&mut *self.tokens.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn wait(&self) -> Vec<u64> {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        while tokens.is_empty() {
            tokens = self
                .posted
                .wait(tokens)
                .unwrap_or_else(PoisonError::into_inner);
        }
        mem::take(&mut *tokens)
    }
}

struct LoopShared {
    queue: RefCell<VecDeque<Weak<dyn Event>>>,
    // Where the next depth-first event goes; reset before every fire.
    depth_first_insert: Cell<usize>,
    inbox: Arc<Inbox>,
    registrations: RefCell<HashMap<u64, Weak<dyn Event>>>,
    waiting: Cell<bool>,
}

impl LoopShared {
    fn arm(&self, event: Weak<dyn Event>, depth_first: bool) {
        let mut queue = self.queue.borrow_mut();
        if queue.iter().any(|armed| Weak::ptr_eq(armed, &event)) {
            return;
        }
        if depth_first {
            let at = self.depth_first_insert.get().min(queue.len());
            queue.insert(at, event);
            self.depth_first_insert.set(at + 1);
            trace!(position = at, "armed event depth-first");
        } else {
            queue.push_back(event);
            trace!(position = queue.len() - 1, "armed event breadth-first");
        }
    }

    fn deliver(&self, tokens: Vec<u64>) {
        for token in tokens {
            let event = self.registrations.borrow_mut().remove(&token);
            match event {
                Some(event) => self.arm(event, false),
                None => trace!(token, "dropping token without registration"),
            }
        }
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Rc<LoopShared>>> = const { RefCell::new(None) };
}

fn current() -> Option<Rc<LoopShared>> {
    CURRENT.with(|current| current.borrow().clone())
}

fn expect_current() -> Rc<LoopShared> {
    match current() {
        Some(shared) => shared,
        None => panic!("events can only be armed on a thread running an EventLoop"),
    }
}

/// Queues `event` behind everything already armed.
///
/// # Panics
///
/// Panics if no [`EventLoop`] runs on the current thread.
pub fn arm_breadth_first(event: Weak<dyn Event>) {
    expect_current().arm(event, false)
}

/// Queues `event` ahead of everything armed before the event currently
/// firing, so it runs next.
///
/// # Panics
///
/// Panics if no [`EventLoop`] runs on the current thread.
pub fn arm_depth_first(event: Weak<dyn Event>) {
    expect_current().arm(event, true)
}

pub(crate) fn current_inbox() -> Result<Arc<Inbox>, Error> {
    current()
        .map(|shared| shared.inbox.clone())
        .ok_or(Error::NoEventLoop)
}

/// Arms `event` breadth-first once `token` is posted to this thread's inbox.
pub(crate) fn register_cross_thread(token: u64, event: Weak<dyn Event>) {
    expect_current()
        .registrations
        .borrow_mut()
        .insert(token, event);
}

pub(crate) fn unregister_cross_thread(token: u64) {
    if let Some(shared) = current() {
        shared.registrations.borrow_mut().remove(&token);
    }
}

struct RootEvent;

impl Event for RootEvent {
    fn fire(self: Rc<Self>) {}

    fn trace_event(&self, builder: &mut TraceBuilder) {
        builder.add("EventLoop::wait()");
    }
}

struct WaitGuard<'a>(&'a Cell<bool>);

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// The event loop of the current thread. At most one exists per thread at
/// a time.
pub struct EventLoop {
    shared: Rc<LoopShared>,
}

impl EventLoop {
    pub fn new() -> Result<Self, Error> {
        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            if current.is_some() {
                return Err(Error::EventLoopAlreadyRunning);
            }
            let shared = Rc::new(LoopShared {
                queue: RefCell::new(VecDeque::new()),
                depth_first_insert: Cell::new(0),
                inbox: Arc::new(Inbox::new()),
                registrations: RefCell::new(HashMap::new()),
                waiting: Cell::new(false),
            });
            *current = Some(shared.clone());
            debug!("event loop started");
            Ok(EventLoop { shared })
        })
    }

    /// Delivers posted cross-thread events and fires at most one armed
    /// event. Returns `false` if there was nothing to fire.
    pub fn turn(&self) -> bool {
        self.shared.deliver(self.shared.inbox.take());
        let next = self.shared.queue.borrow_mut().pop_front();
        self.shared.depth_first_insert.set(0);
        match next {
            Some(event) => {
                if let Some(event) = event.upgrade() {
                    event.fire();
                }
                true
            }
            None => false,
        }
    }

    /// Fires armed events until the queue is empty.
    pub fn run(&self) {
        while self.turn() {}
    }

    /// Drives the loop until `promise` settles.
    ///
    /// Blocks on the inbox while only other threads can make progress.
    /// Fails with [`Error::Hung`] when nothing at all can make progress.
    pub fn wait<T: 'static>(&self, promise: Promise<T>) -> Result<T, Error> {
        if self.shared.waiting.replace(true) {
            return Err(Error::EventLoopAlreadyRunning);
        }
        let _guard = WaitGuard(&self.shared.waiting);

        let root: Rc<dyn Event> = Rc::new(RootEvent);
        let mut node = promise.into_node();
        node.on_ready(Rc::downgrade(&root));

        while !node.is_ready() {
            if self.turn() {
                continue;
            }
            let pending = self.shared.registrations.borrow().len();
            if pending == 0 {
                let mut builder = TraceBuilder::new();
                root.trace_event(&mut builder);
                node.trace_promise(&mut builder);
                return Err(Error::Hung {
                    trace: builder.to_string(),
                });
            }
            debug!(pending, "event queue empty, waiting for cross-thread events");
            let tokens = self.shared.inbox.wait();
            self.shared.deliver(tokens);
        }

        Ok(Promise::<T>::unwrap_value(node.get()?)?)
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        let _ = CURRENT.try_with(|current| current.borrow_mut().take());
        debug!("event loop stopped");
    }
}
