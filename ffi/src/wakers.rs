use interlink::{NativeWaker, OwnedNativeWaker};

/// Returns a new owned reference to `waker`.
///
/// # Safety
///
/// `waker` must point to a live native waker.
#[no_mangle]
pub unsafe extern "C" fn interlink_waker_clone(waker: *const NativeWaker) -> *const NativeWaker {
    (*waker).clone_native().into_raw()
}

/// Wakes and releases one owned reference.
///
/// # Safety
///
/// `waker` must carry an owned reference, which this consumes.
#[no_mangle]
pub unsafe extern "C" fn interlink_waker_wake(waker: *const NativeWaker) {
    OwnedNativeWaker::from_raw(waker).wake()
}

/// # Safety
///
/// `waker` must point to a live native waker.
#[no_mangle]
pub unsafe extern "C" fn interlink_waker_wake_by_ref(waker: *const NativeWaker) {
    (*waker).wake_by_ref()
}

/// Releases one owned reference. Null is ignored.
///
/// # Safety
///
/// A non-null `waker` must carry an owned reference, which this consumes.
#[no_mangle]
pub unsafe extern "C" fn interlink_waker_drop(waker: *const NativeWaker) {
    if !waker.is_null() {
        drop(OwnedNativeWaker::from_raw(waker))
    }
}

#[cfg(test)]
mod wakers_test {
    use super::*;
    use std::{
        ptr,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        task::{Wake, Waker},
    };

    #[derive(Default)]
    struct CountingWake(AtomicUsize);

    impl Wake for CountingWake {
        fn wake(self: Arc<Self>) {
            self.wake_by_ref()
        }

        fn wake_by_ref(self: &Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_waker_entry_points() {
        let counter = Arc::new(CountingWake::default());
        let native = NativeWaker::from_std(Waker::from(counter.clone())).into_raw();

        unsafe {
            interlink_waker_wake_by_ref(native);
            let cloned = interlink_waker_clone(native);
            interlink_waker_wake(cloned);
            interlink_waker_drop(native);
            interlink_waker_drop(ptr::null());
        }

        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
        assert_eq!(Arc::strong_count(&counter), 1);
    }
}
