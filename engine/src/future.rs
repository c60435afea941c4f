//! Managed futures awaited by native code.
//!
//! A [`RustFuture`] is the C-shaped handle of a boxed managed future: a fat
//! pointer plus `extern "C"` poll and drop entry points. Native code polls
//! it with a [`NativeWaker`] and a pointer to scratch storage that receives
//! either the value or an error message, as told by the returned
//! [`FuturePollStatus`].

use crate::{
    awaiter::{FuturePollEvent, PollTask},
    errors::RemoteError,
    event_loop::{arm_breadth_first, Event},
    panic::catch_panic,
    promise::{OwnPromiseNode, Promise, PromiseNode},
    trace::TraceBuilder,
    transfer_types::BridgeString,
    waker::{waker_ref, NativeWaker},
};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use static_assertions::assert_eq_size;
use std::{
    any::{type_name, Any},
    ffi::c_void,
    fmt::{self, Display},
    future::Future,
    mem::{ManuallyDrop, MaybeUninit},
    panic::AssertUnwindSafe,
    pin::Pin,
    ptr::{self, addr_of_mut},
    rc::{Rc, Weak},
    task::{Context, Poll},
};
use tracing::{error, trace};

/// What a poll callback wrote into its output slot.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum FuturePollStatus {
    /// Nothing was written.
    Pending = 0,
    /// A `T` was written.
    Complete = 1,
    /// A [`BridgeString`] describing the failure was written.
    Error = 2,
}

/// Polls the future behind `fut`, which points to the fat pointer field
/// of a [`RustFuture`].
pub type PollCallback = unsafe extern "C" fn(
    fut: *mut c_void,
    waker: *const NativeWaker,
    ret: *mut c_void,
) -> FuturePollStatus;

/// Drops the future behind `fut`, which points to the fat pointer field
/// of a [`RustFuture`].
pub type DropCallback = unsafe extern "C" fn(fut: *mut c_void);

pub type FuturePtr<'a, T> = *mut (dyn Future<Output = Result<T, String>> + 'a);

/// Type-erased managed future.
///
/// Dropping it drops the future, which cancels the managed computation if
/// it has not completed.
#[repr(C)]
pub struct RustFuture<'a, T> {
    fut: FuturePtr<'a, T>,
    poll: PollCallback,
    drop: DropCallback,
}

assert_eq_size!(RustFuture<'static, u64>, [usize; 4]);

impl<'a, T> RustFuture<'a, T> {
    pub fn new<F>(fut: F) -> Self
    where
        F: Future<Output = Result<T, String>> + 'a,
    {
        let fut: Box<dyn Future<Output = Result<T, String>> + 'a> = Box::new(fut);
        RustFuture {
            fut: Box::into_raw(fut),
            poll: poll_callback::<T>,
            drop: drop_callback::<T>,
        }
    }

    /// Advances the future by one step.
    ///
    /// # Safety
    ///
    /// `ret` must be valid for writing a `T` and a [`BridgeString`], and
    /// must be read back according to the returned status.
    pub unsafe fn poll_raw(&mut self, waker: &NativeWaker, ret: *mut c_void) -> FuturePollStatus {
        (self.poll)(addr_of_mut!(self.fut).cast(), waker, ret)
    }
}

impl<T> Drop for RustFuture<'_, T> {
    fn drop(&mut self) {
        unsafe { (self.drop)(addr_of_mut!(self.fut).cast()) }
    }
}

impl<T> fmt::Debug for RustFuture<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RustFuture")
            .field("output", &type_name::<T>())
            .finish()
    }
}

unsafe extern "C" fn poll_callback<T>(
    fut: *mut c_void,
    waker: *const NativeWaker,
    ret: *mut c_void,
) -> FuturePollStatus {
    let fut = Pin::new_unchecked(&mut **fut.cast::<FuturePtr<'_, T>>());
    let waker = waker_ref(&*waker);
    let mut cx = Context::from_waker(&waker);

    match catch_panic(AssertUnwindSafe(|| fut.poll(&mut cx))) {
        Ok(Poll::Pending) => FuturePollStatus::Pending,
        Ok(Poll::Ready(Ok(value))) => {
            ptr::write(ret.cast::<T>(), value);
            FuturePollStatus::Complete
        }
        Ok(Poll::Ready(Err(message))) => {
            ptr::write(ret.cast::<BridgeString>(), BridgeString::from(message));
            FuturePollStatus::Error
        }
        Err(panic) => {
            ptr::write(ret.cast::<BridgeString>(), BridgeString::from(panic));
            FuturePollStatus::Error
        }
    }
}

unsafe extern "C" fn drop_callback<T>(fut: *mut c_void) {
    let fut = *fut.cast::<FuturePtr<'_, T>>();
    if let Err(panic) = catch_panic(AssertUnwindSafe(|| drop(Box::from_raw(fut)))) {
        error!(%panic, "managed future panicked while being dropped");
    }
}

/// Erases a fallible future. Errors cross as their `Display` text.
pub fn future<'a, T: 'a, E: Display + 'a>(
    fut: Pin<Box<dyn Future<Output = Result<T, E>> + 'a>>,
) -> RustFuture<'a, T> {
    RustFuture::new(async move { fut.await.map_err(|err| err.to_string()) })
}

pub fn infallible_future<'a, T: 'a>(fut: Pin<Box<dyn Future<Output = T> + 'a>>) -> RustFuture<'a, T> {
    RustFuture::new(async move { Ok(fut.await) })
}

/// Result of one [`FuturePoller::poll`].
#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Pending,
    Complete(T),
    Error(RemoteError),
}

#[repr(C)]
union PollScratch<T> {
    value: ManuallyDrop<T>,
    error: ManuallyDrop<BridgeString>,
}

/// Native-side poller of a [`RustFuture`]. Owns the scratch slot that the
/// poll callback writes into and moves its content out right away.
pub struct FuturePoller<T> {
    scratch: MaybeUninit<PollScratch<T>>,
}

impl<T> FuturePoller<T> {
    pub fn new() -> Self {
        FuturePoller {
            scratch: MaybeUninit::uninit(),
        }
    }

    pub fn poll(&mut self, fut: &mut RustFuture<'_, T>, waker: &NativeWaker) -> PollOutcome<T> {
        let ret = self.scratch.as_mut_ptr().cast::<c_void>();
        match unsafe { fut.poll_raw(waker, ret) } {
            FuturePollStatus::Pending => PollOutcome::Pending,
            FuturePollStatus::Complete => PollOutcome::Complete(unsafe { ptr::read(ret.cast::<T>()) }),
            FuturePollStatus::Error => {
                let message = unsafe { ptr::read(ret.cast::<BridgeString>()) };
                PollOutcome::Error(RemoteError::new(message.into_string()))
            }
        }
    }
}

impl<T> Default for FuturePoller<T> {
    fn default() -> Self {
        FuturePoller::new()
    }
}

struct FutureTask<T> {
    fut: RustFuture<'static, T>,
    poller: FuturePoller<T>,
}

impl<T: 'static> PollTask for FutureTask<T> {
    fn poll(&mut self, waker: &NativeWaker) -> Option<Result<Box<dyn Any>, RemoteError>> {
        match self.poller.poll(&mut self.fut, waker) {
            PollOutcome::Pending => None,
            PollOutcome::Complete(value) => Some(Ok(Box::new(value))),
            PollOutcome::Error(err) => Some(Err(err)),
        }
    }
}

/// Promise node backed by a managed future. Polling starts when somebody
/// first waits on the node; dropping the node drops the future.
struct FutureAwaiterNode {
    event: Rc<FuturePollEvent>,
    started: bool,
}

impl PromiseNode for FutureAwaiterNode {
    fn on_ready(&mut self, event: Weak<dyn Event>) {
        self.event.set_waiter(event);
        if !self.started {
            self.started = true;
            trace!("scheduling first poll of managed future");
            arm_breadth_first(self.event.as_event());
        }
    }

    fn is_ready(&self) -> bool {
        self.event.is_ready()
    }

    fn get(&mut self) -> Result<Box<dyn Any>, RemoteError> {
        match self.event.take_result() {
            Some(result) => result,
            None => panic!("PromiseNode::get() called before the future completed"),
        }
    }

    fn trace_promise(&self, builder: &mut TraceBuilder) {
        self.event.trace_promise(builder)
    }
}

impl Drop for FutureAwaiterNode {
    fn drop(&mut self) {
        self.event.cancel();
    }
}

impl<T: 'static> Promise<T> {
    /// Adapts a managed future into a native promise driven by the current
    /// thread's event loop.
    pub fn from_future(fut: RustFuture<'static, T>) -> Self {
        let description = format!("managed future -> {}", type_name::<T>());
        let event = FuturePollEvent::new(
            Box::new(FutureTask {
                fut,
                poller: FuturePoller::new(),
            }),
            description,
        );
        Promise::from_node(OwnPromiseNode::new(FutureAwaiterNode {
            event,
            started: false,
        }))
    }
}
