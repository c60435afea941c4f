//! Native deferred computations and the adapter that lets a managed task
//! `.await` them.

use crate::{
    awaiter::PromiseAwaiter,
    errors::RemoteError,
    event_loop::{arm_breadth_first, Event},
    panic::catch_panic,
    trace::TraceBuilder,
    transfer_types::BridgeResult,
};
use std::{
    any::{type_name, Any},
    ffi::c_void,
    fmt,
    future::{Future, IntoFuture},
    marker::PhantomData,
    mem::MaybeUninit,
    panic::AssertUnwindSafe,
    pin::Pin,
    ptr,
    rc::Weak,
    task::{Context, Poll},
};

/// A native deferred computation, observed through an `on_ready` event.
pub trait PromiseNode {
    /// Arms `event` once the result is available, immediately if it
    /// already is. Called at most once.
    fn on_ready(&mut self, event: Weak<dyn Event>);

    fn is_ready(&self) -> bool;

    /// Takes the result. Must be called exactly once, after readiness.
    fn get(&mut self) -> Result<Box<dyn Any>, RemoteError>;

    fn trace_promise(&self, builder: &mut TraceBuilder);
}

/// Owning handle of a promise node. Dropping it cancels the computation.
pub struct OwnPromiseNode(Box<dyn PromiseNode>);

impl OwnPromiseNode {
    pub fn new<N: PromiseNode + 'static>(node: N) -> Self {
        OwnPromiseNode(Box::new(node))
    }

    pub fn on_ready(&mut self, event: Weak<dyn Event>) {
        self.0.on_ready(event)
    }

    pub fn is_ready(&self) -> bool {
        self.0.is_ready()
    }

    pub fn get(&mut self) -> Result<Box<dyn Any>, RemoteError> {
        self.0.get()
    }

    pub fn trace_promise(&self, builder: &mut TraceBuilder) {
        self.0.trace_promise(builder)
    }
}

impl fmt::Debug for OwnPromiseNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnPromiseNode")
            .field("ready", &self.is_ready())
            .finish()
    }
}

struct ImmediateNode {
    result: Option<Result<Box<dyn Any>, RemoteError>>,
}

impl PromiseNode for ImmediateNode {
    fn on_ready(&mut self, event: Weak<dyn Event>) {
        arm_breadth_first(event)
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn get(&mut self) -> Result<Box<dyn Any>, RemoteError> {
        match self.result.take() {
            Some(result) => result,
            None => panic!("PromiseNode::get() called more than once"),
        }
    }

    fn trace_promise(&self, builder: &mut TraceBuilder) {
        builder.add("immediate promise");
    }
}

struct NeverNode;

impl PromiseNode for NeverNode {
    fn on_ready(&mut self, _event: Weak<dyn Event>) {}

    fn is_ready(&self) -> bool {
        false
    }

    fn get(&mut self) -> Result<Box<dyn Any>, RemoteError> {
        panic!("PromiseNode::get() called on a promise that never resolves")
    }

    fn trace_promise(&self, builder: &mut TraceBuilder) {
        builder.add("never-resolving promise");
    }
}

/// Typed native promise.
pub struct Promise<T> {
    node: OwnPromiseNode,
    marker: PhantomData<fn() -> T>,
}

impl<T: 'static> Promise<T> {
    pub fn ready(value: T) -> Self {
        Promise::from_node(OwnPromiseNode::new(ImmediateNode {
            result: Some(Ok(Box::new(value))),
        }))
    }

    pub fn rejected<M: Into<Box<str>>>(message: M) -> Self {
        Promise::from_node(OwnPromiseNode::new(ImmediateNode {
            result: Some(Err(RemoteError::new(message))),
        }))
    }

    pub fn never() -> Self {
        Promise::from_node(OwnPromiseNode::new(NeverNode))
    }

    /// Wraps a node whose result is a `T`. A node producing anything else
    /// surfaces as an error when the promise is consumed.
    pub fn from_node(node: OwnPromiseNode) -> Self {
        Promise {
            node,
            marker: PhantomData,
        }
    }

    pub fn into_node(self) -> OwnPromiseNode {
        self.node
    }

    pub(crate) fn unwrap_value(value: Box<dyn Any>) -> Result<T, RemoteError> {
        match value.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(_) => Err(RemoteError::new(format!(
                "promise did not produce a value of type {}",
                type_name::<T>()
            ))),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Promise").field(&self.node).finish()
    }
}

/// A native promise type that a managed task can await through
/// [`PromiseFuture`].
pub trait NativePromise: Sized {
    type Output;

    /// Whatever the promise needs, besides its node, to extract a value.
    type Data: Unpin;

    fn into_own_promise_node(self) -> (OwnPromiseNode, Self::Data);

    /// Extracts the result from a ready node.
    ///
    /// # Safety
    ///
    /// `node` and `data` must come from the same call to
    /// [`NativePromise::into_own_promise_node`] on this type, and `node`
    /// must be ready.
    unsafe fn unwrap(node: OwnPromiseNode, data: &Self::Data) -> Result<Self::Output, RemoteError>;
}

impl<T: 'static> NativePromise for Promise<T> {
    type Output = T;
    type Data = ();

    fn into_own_promise_node(self) -> (OwnPromiseNode, ()) {
        (self.node, ())
    }

    unsafe fn unwrap(mut node: OwnPromiseNode, _data: &()) -> Result<T, RemoteError> {
        Promise::<T>::unwrap_value(node.get()?)
    }
}

/// Managed view of a native promise.
///
/// Must be polled on the thread that runs the promise's event loop.
#[must_use = "futures do nothing unless polled"]
pub struct PromiseFuture<P: NativePromise> {
    awaiter: PromiseAwaiter<P::Data>,
    marker: PhantomData<fn() -> P>,
}

impl<P: NativePromise> PromiseFuture<P> {
    pub fn new(promise: P) -> Self {
        let (node, data) = promise.into_own_promise_node();
        PromiseFuture {
            awaiter: PromiseAwaiter::new(node, data),
            marker: PhantomData,
        }
    }
}

impl<P: NativePromise> Future for PromiseFuture<P> {
    type Output = Result<P::Output, RemoteError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.awaiter.poll(cx) {
            let node = this.awaiter.take_own_promise_node();
            Poll::Ready(unsafe { P::unwrap(node, this.awaiter.data()) })
        } else {
            Poll::Pending
        }
    }
}

impl<T: 'static> IntoFuture for Promise<T> {
    type Output = Result<T, RemoteError>;
    type IntoFuture = PromiseFuture<Promise<T>>;

    fn into_future(self) -> Self::IntoFuture {
        PromiseFuture::new(self)
    }
}

/// Moves the result out of a type-erased node into `ret`, consuming the
/// node. Never unwinds.
pub type UnwrapCallback = unsafe extern "C" fn(node: *mut c_void, ret: *mut c_void) -> BridgeResult;

/// C-shaped handle of a promise whose value type the receiver does not
/// know: a boxed [`OwnPromiseNode`] plus the callback that knows how to
/// extract its value.
#[repr(C)]
pub struct PromiseNodeImpl {
    pub node: *mut c_void,
    pub unwrap: UnwrapCallback,
}

impl PromiseNodeImpl {
    pub fn new<T: 'static>(promise: Promise<T>) -> Self {
        PromiseNodeImpl {
            node: Box::into_raw(Box::new(promise.into_node())).cast(),
            unwrap: unwrap_callback::<T>,
        }
    }

    /// # Safety
    ///
    /// `self.node` must be a pointer produced by [`PromiseNodeImpl::new`]
    /// that nobody else owns.
    pub unsafe fn into_own_promise_node(mut self) -> OwnPromiseNode {
        let node = ptr::replace(&mut self.node, ptr::null_mut());
        *Box::from_raw(node.cast::<OwnPromiseNode>())
    }
}

impl Drop for PromiseNodeImpl {
    fn drop(&mut self) {
        if !self.node.is_null() {
            drop(unsafe { Box::from_raw(self.node.cast::<OwnPromiseNode>()) });
        }
    }
}

unsafe extern "C" fn unwrap_callback<T: 'static>(node: *mut c_void, ret: *mut c_void) -> BridgeResult {
    let mut node = *Box::from_raw(node.cast::<OwnPromiseNode>());
    let value = catch_panic(AssertUnwindSafe(|| {
        node.get()
            .and_then(Promise::<T>::unwrap_value)
    }));
    match value {
        Ok(Ok(value)) => {
            ptr::write(ret.cast::<T>(), value);
            BridgeResult::ok()
        }
        Ok(Err(err)) => BridgeResult::error(err.message()),
        Err(panic) => BridgeResult::error(&panic),
    }
}

/// A [`PromiseNodeImpl`] with its value type restored.
pub struct CallbacksPromise<T> {
    inner: PromiseNodeImpl,
    marker: PhantomData<fn() -> T>,
}

impl<T> NativePromise for CallbacksPromise<T> {
    type Output = T;
    type Data = UnwrapCallback;

    fn into_own_promise_node(self) -> (OwnPromiseNode, UnwrapCallback) {
        let unwrap = self.inner.unwrap;
        (unsafe { self.inner.into_own_promise_node() }, unwrap)
    }

    unsafe fn unwrap(node: OwnPromiseNode, data: &UnwrapCallback) -> Result<T, RemoteError> {
        let node = Box::into_raw(Box::new(node)).cast::<c_void>();
        let mut ret = MaybeUninit::<T>::uninit();
        (*data)(node, ret.as_mut_ptr().cast()).into_result()?;
        Ok(ret.assume_init())
    }
}

/// Adapts a type-erased promise handle into a future of `T`.
///
/// # Safety
///
/// `node.unwrap` must write a `T` on success, and `node.node` must be a
/// live node produced by [`PromiseNodeImpl::new`].
pub unsafe fn new_callbacks_promise_future<T>(
    node: PromiseNodeImpl,
) -> PromiseFuture<CallbacksPromise<T>> {
    PromiseFuture::new(CallbacksPromise {
        inner: node,
        marker: PhantomData,
    })
}

#[cfg(test)]
mod promise_test {
    use super::*;
    use crate::{waker::waker_test::CountingWake, EventLoop};
    use std::{sync::Arc, task::Waker};

    fn poll_once<F: Future + Unpin>(fut: &mut F, waker: &Waker) -> Poll<F::Output> {
        Pin::new(fut).poll(&mut Context::from_waker(waker))
    }

    #[test]
    fn test_ready_promise_single_poll() {
        let _event_loop = EventLoop::new().unwrap();
        let waker = Waker::from(Arc::new(CountingWake::default()));

        let mut fut = Promise::ready(123u32).into_future();
        assert_eq!(poll_once(&mut fut, &waker), Poll::Ready(Ok(123)));
    }

    #[test]
    fn test_rejected_promise_surfaces_error() {
        let _event_loop = EventLoop::new().unwrap();
        let waker = Waker::from(Arc::new(CountingWake::default()));

        let mut fut = Promise::<u32>::rejected("native exception").into_future();
        assert_eq!(
            poll_once(&mut fut, &waker),
            Poll::Ready(Err(RemoteError::new("native exception")))
        );
    }

    #[test]
    fn test_callbacks_promise_future() {
        let _event_loop = EventLoop::new().unwrap();
        let waker = Waker::from(Arc::new(CountingWake::default()));

        let handle = PromiseNodeImpl::new(Promise::ready(String::from("from native")));
        let mut fut = unsafe { new_callbacks_promise_future::<String>(handle) };
        assert_eq!(
            poll_once(&mut fut, &waker),
            Poll::Ready(Ok(String::from("from native")))
        );
    }

    #[test]
    fn test_callbacks_promise_type_mismatch_is_an_error() {
        let _event_loop = EventLoop::new().unwrap();
        let waker = Waker::from(Arc::new(CountingWake::default()));

        let handle = PromiseNodeImpl::new(Promise::ready(1u8));
        let node = unsafe { handle.into_own_promise_node() };
        let mut fut = Promise::<String>::from_node(node).into_future();
        match poll_once(&mut fut, &waker) {
            Poll::Ready(Err(err)) => assert!(err.message().contains("String")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unconsumed_handle_is_freed() {
        drop(PromiseNodeImpl::new(Promise::ready(vec![1, 2, 3])));
    }

    #[test]
    fn test_never_promise_stays_pending() {
        let _event_loop = EventLoop::new().unwrap();
        let counter = Arc::new(CountingWake::default());
        let waker = Waker::from(counter.clone());

        let mut fut = Promise::<()>::never().into_future();
        for _ in 0..3 {
            assert_eq!(poll_once(&mut fut, &waker), Poll::Pending);
        }
        drop(fut);
        assert_eq!(counter.count(), 0);
    }
}
