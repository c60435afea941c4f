//! This is the core of the interlink bridge.
//!
//! It lets a managed runtime and a native runtime hand values to each other
//! and await each other's asynchronous computations:
//!
//! 1) [`transfer_types`] holds the value types with a fixed binary layout
//!    ([`OwnedBox`], [`SharedHandle`], [`BridgeString`], [`BridgeVec`],
//!    [`Slice`], [`Maybe`]) plus the [`BridgeResult`] error channel.
//!
//! 2) The native side is modelled by a single-threaded [`EventLoop`] that
//!    fires [`Event`]s and drives [`Promise`]s.
//!
//! 3) A [`Promise`] can be `.await`ed from managed code through
//!    [`PromiseFuture`], and a managed future can be handed to native code
//!    as a [`RustFuture`] and turned into a [`Promise`] with
//!    [`Promise::from_future`].
//!
//! 4) [`NativeWaker`] carries wake-ups in both directions.
//!
//! Example:
//!
//! ```
//! use interlink::{infallible_future, EventLoop, Promise};
//!
//! let event_loop = EventLoop::new().unwrap();
//!
//! let doubled = Promise::from_future(infallible_future::<u32>(Box::pin(async {
//!     let value = Promise::ready(21u32).await.unwrap();
//!     value * 2
//! })));
//!
//! assert_eq!(event_loop.wait(doubled), Ok(42));
//! ```
mod awaiter;
mod errors;
mod event_loop;
mod fulfiller;
mod future;
pub mod glue;
mod panic;
mod promise;
mod trace;
pub mod transfer_types;
mod waker;

pub use self::{
    awaiter::{FuturePollEvent, PromiseAwaiter, RustPromiseAwaiter},
    errors::{Error, InvalidEncoding, RemoteError},
    event_loop::{arm_breadth_first, arm_depth_first, Event, EventLoop},
    fulfiller::{
        new_cross_thread_promise_and_fulfiller, new_promise_and_fulfiller,
        CrossThreadPromiseFulfiller, PromiseFulfiller,
    },
    future::{
        future, infallible_future, DropCallback, FuturePoller, FuturePollStatus, FuturePtr,
        PollCallback, PollOutcome, RustFuture,
    },
    panic::{
        catch_panic, panic_catcher_disable, panic_catcher_enable, panic_catcher_get_backtrace,
        panic_catcher_set_fallback_mode, panic_catcher_set_hook, PanicCatcherFallbackMode,
    },
    promise::{
        new_callbacks_promise_future, CallbacksPromise, NativePromise, OwnPromiseNode, Promise,
        PromiseFuture, PromiseNode, PromiseNodeImpl, UnwrapCallback,
    },
    trace::TraceBuilder,
    transfer_types::{
        BridgeResult, BridgeString, BridgeVec, Maybe, MaybeRef, MessageBuf, OwnedBox,
        SharedHandle, Slice, SliceMut, StringView, WeakHandle,
    },
    waker::{
        try_into_native_waker_ptr, waker_ref, NativeWaker, NativeWakerVTable, OptionWaker,
        OwnedNativeWaker, WakerRef,
    },
};
