//! Promises resolved by hand, from the same thread or from another one.

use crate::{
    errors::{Error, RemoteError},
    event_loop::{
        arm_breadth_first, current_inbox, register_cross_thread, unregister_cross_thread, Event,
        Inbox,
    },
    promise::{OwnPromiseNode, Promise, PromiseNode},
    trace::TraceBuilder,
};
use std::{
    any::Any,
    cell::RefCell,
    rc::{Rc, Weak},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};
use tracing::trace;

const DESTROYED_WITHOUT_FULFILLING: &str =
    "PromiseFulfiller was destroyed without fulfilling the promise";

struct FulfillerShared<T> {
    result: Option<Result<T, RemoteError>>,
    event: Option<Weak<dyn Event>>,
    promise_alive: bool,
}

/// Resolves the promise returned alongside it by
/// [`new_promise_and_fulfiller`]. Dropping it unresolved rejects the
/// promise.
pub struct PromiseFulfiller<T> {
    shared: Rc<RefCell<FulfillerShared<T>>>,
    done: bool,
}

pub fn new_promise_and_fulfiller<T: 'static>() -> (Promise<T>, PromiseFulfiller<T>) {
    let shared = Rc::new(RefCell::new(FulfillerShared {
        result: None,
        event: None,
        promise_alive: true,
    }));
    let node = OwnPromiseNode::new(FulfillerNode {
        shared: shared.clone(),
    });
    (
        Promise::from_node(node),
        PromiseFulfiller {
            shared,
            done: false,
        },
    )
}

impl<T> PromiseFulfiller<T> {
    pub fn fulfill(mut self, value: T) {
        self.complete(Ok(value))
    }

    pub fn reject<M: Into<Box<str>>>(mut self, message: M) {
        self.complete(Err(RemoteError::new(message)))
    }

    /// Whether the promise side still exists and is unresolved.
    pub fn is_waiting(&self) -> bool {
        !self.done && self.shared.borrow().promise_alive
    }

    fn complete(&mut self, result: Result<T, RemoteError>) {
        self.done = true;
        let event = {
            let mut shared = self.shared.borrow_mut();
            if !shared.promise_alive {
                return;
            }
            shared.result = Some(result);
            shared.event.take()
        };
        if let Some(event) = event {
            arm_breadth_first(event);
        }
    }
}

impl<T> Drop for PromiseFulfiller<T> {
    fn drop(&mut self) {
        if !self.done {
            self.complete(Err(RemoteError::new(DESTROYED_WITHOUT_FULFILLING)));
        }
    }
}

struct FulfillerNode<T> {
    shared: Rc<RefCell<FulfillerShared<T>>>,
}

impl<T: 'static> PromiseNode for FulfillerNode<T> {
    fn on_ready(&mut self, event: Weak<dyn Event>) {
        let mut shared = self.shared.borrow_mut();
        if shared.result.is_some() {
            drop(shared);
            arm_breadth_first(event);
        } else {
            shared.event = Some(event);
        }
    }

    fn is_ready(&self) -> bool {
        self.shared.borrow().result.is_some()
    }

    fn get(&mut self) -> Result<Box<dyn Any>, RemoteError> {
        match self.shared.borrow_mut().result.take() {
            Some(result) => result.map(|value| Box::new(value) as Box<dyn Any>),
            None => panic!("PromiseNode::get() called before the promise was fulfilled"),
        }
    }

    fn trace_promise(&self, builder: &mut TraceBuilder) {
        builder.add("promise fulfiller");
    }
}

impl<T> Drop for FulfillerNode<T> {
    fn drop(&mut self) {
        let mut shared = self.shared.borrow_mut();
        shared.promise_alive = false;
        shared.event = None;
    }
}

/// State shared between a cross-thread promise node and whatever resolves
/// it. Completion is first-wins and may happen on any thread.
pub(crate) struct CrossThreadState<T> {
    inbox: Arc<Inbox>,
    token: u64,
    completed: AtomicBool,
    result: Mutex<Option<Result<T, RemoteError>>>,
}

impl<T: Send + 'static> CrossThreadState<T> {
    pub(crate) fn new() -> Result<Arc<Self>, Error> {
        Ok(Self::with_inbox(current_inbox()?))
    }

    /// Binds the state to the loop owning `inbox`, which need not be the
    /// current thread's.
    pub(crate) fn with_inbox(inbox: Arc<Inbox>) -> Arc<Self> {
        let token = inbox.new_token();
        Arc::new(CrossThreadState {
            inbox,
            token,
            completed: AtomicBool::new(false),
            result: Mutex::new(None),
        })
    }

    /// Returns `false` if the state was already completed.
    pub(crate) fn complete(&self, result: Result<T, RemoteError>) -> bool {
        if self.completed.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.result.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
        self.inbox.post(self.token);
        true
    }

    pub(crate) fn node(self: &Arc<Self>) -> OwnPromiseNode {
        OwnPromiseNode::new(CrossThreadNode {
            state: self.clone(),
            registered: false,
        })
    }

    fn is_ready(&self) -> bool {
        self.result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

struct CrossThreadNode<T> {
    state: Arc<CrossThreadState<T>>,
    registered: bool,
}

impl<T: Send + 'static> PromiseNode for CrossThreadNode<T> {
    fn on_ready(&mut self, event: Weak<dyn Event>) {
        if self.state.is_ready() {
            arm_breadth_first(event);
        } else {
            trace!(token = self.state.token, "registering cross-thread promise");
            register_cross_thread(self.state.token, event);
            self.registered = true;
        }
    }

    fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    fn get(&mut self) -> Result<Box<dyn Any>, RemoteError> {
        let result = self
            .state
            .result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match result {
            Some(result) => result.map(|value| Box::new(value) as Box<dyn Any>),
            None => panic!("PromiseNode::get() called before the promise was fulfilled"),
        }
    }

    fn trace_promise(&self, builder: &mut TraceBuilder) {
        builder.add("cross-thread promise fulfiller");
    }
}

impl<T> Drop for CrossThreadNode<T> {
    fn drop(&mut self) {
        if self.registered {
            unregister_cross_thread(self.state.token);
        }
    }
}

/// `Send` counterpart of [`PromiseFulfiller`]. The promise is settled on
/// the loop thread once the loop picks up the posted completion.
pub struct CrossThreadPromiseFulfiller<T: Send + 'static> {
    state: Arc<CrossThreadState<T>>,
}

/// Creates a promise on the current thread's event loop that another
/// thread can resolve.
pub fn new_cross_thread_promise_and_fulfiller<T: Send + 'static>(
) -> Result<(Promise<T>, CrossThreadPromiseFulfiller<T>), Error> {
    let state = CrossThreadState::new()?;
    Ok((
        Promise::from_node(state.node()),
        CrossThreadPromiseFulfiller { state },
    ))
}

impl<T: Send + 'static> CrossThreadPromiseFulfiller<T> {
    pub fn fulfill(self, value: T) {
        self.state.complete(Ok(value));
    }

    pub fn reject<M: Into<Box<str>>>(self, message: M) {
        self.state.complete(Err(RemoteError::new(message)));
    }

    pub fn is_waiting(&self) -> bool {
        !self.state.completed.load(Ordering::Acquire)
    }
}

impl<T: Send + 'static> Drop for CrossThreadPromiseFulfiller<T> {
    fn drop(&mut self) {
        self.state
            .complete(Err(RemoteError::new(DESTROYED_WITHOUT_FULFILLING)));
    }
}
