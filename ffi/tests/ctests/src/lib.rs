use interlink::{future, infallible_future, RustFuture};
use interlink_ffi as _;
use std::{
    ffi::CStr,
    future::{ready, Future},
    os::raw::c_char,
    pin::Pin,
    task::{Context, Poll},
};

#[unsafe(no_mangle)]
unsafe extern "C-unwind" fn rust_assert(check: bool, msg: *const c_char) {
    unsafe {
        assert!(check, "{}", CStr::from_ptr(msg).to_str().unwrap());
    }
}

/// Wakes its waker by reference on the first poll, then completes.
struct YieldOnce {
    value: u32,
    yielded: bool,
}

impl Future for YieldOnce {
    type Output = u32;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<u32> {
        let this = self.get_mut();
        if this.yielded {
            return Poll::Ready(this.value);
        }
        this.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

#[unsafe(no_mangle)]
unsafe extern "C" fn interlink_ctest_ready_future(value: u32, out: *mut RustFuture<'static, u32>) {
    unsafe { out.write(infallible_future::<u32>(Box::pin(ready(value)))) }
}

#[unsafe(no_mangle)]
unsafe extern "C" fn interlink_ctest_yield_once_future(value: u32, out: *mut RustFuture<'static, u32>) {
    let fut = YieldOnce {
        value,
        yielded: false,
    };
    unsafe { out.write(infallible_future::<u32>(Box::pin(fut))) }
}

#[unsafe(no_mangle)]
unsafe extern "C" fn interlink_ctest_failing_future(out: *mut RustFuture<'static, u32>) {
    unsafe { out.write(future::<u32, &str>(Box::pin(ready(Err("boom"))))) }
}

fn explode() -> u32 {
    panic!("managed panic")
}

#[unsafe(no_mangle)]
unsafe extern "C" fn interlink_ctest_panicking_future(out: *mut RustFuture<'static, u32>) {
    unsafe { out.write(infallible_future::<u32>(Box::pin(async { explode() }))) }
}

#[unsafe(no_mangle)]
unsafe extern "C" fn interlink_ctest_void_future(out: *mut RustFuture<'static, ()>) {
    unsafe { out.write(infallible_future::<()>(Box::pin(ready(())))) }
}

macro_rules! ffi_ctest {
    (@inner $($name:ident => $link_name:expr,)*) => {
        $(
            #[test]
            #[cfg_attr(miri, ignore)]
            pub fn $name() {
                unsafe extern "C-unwind" {
                    #[link_name = $link_name]
                    fn ctest();
                }

                unsafe { ctest() }
            }
        )*
    };

    ($($name:ident,)*) => {
        ffi_ctest! { @inner
            $($name => concat!("interlink_ffi_ctest_", stringify!($name)),)*
        }
    };
}

mod ffi_ctest {
    ffi_ctest!(
        string_from_utf8,
        string_from_utf8_invalid,
        string_from_utf8_lossy,
        string_from_utf16,
        string_c_str,
        string_cmp,
        vec_u8,
        vec_u8_reserve_overflow,
        box_string,
        error_message_alloc,
        result_ok,
        panic_catcher_fallback_mode,
        waker_entry_points,
        poll_ready_future,
        poll_yield_once_future,
        poll_failing_future,
        poll_panicking_future,
        drop_void_future,
    );
}
