//! Wakers that cross the boundary.
//!
//! A [`NativeWaker`] is the C-shaped notification object: a header holding
//! a vtable of `extern "C"` entry points, embedded at the start of whatever
//! object implements it. Native wakers are turned into [`Waker`]s with
//! [`waker_ref`] or [`OwnedNativeWaker::into_waker`], and [`Waker`]s are
//! turned into native ones with [`NativeWaker::from_std`].
//!
//! Every vtable entry must be callable from any thread, because a managed
//! future may hand its waker to another thread.

use std::{
    fmt,
    marker::PhantomData,
    mem::{self, ManuallyDrop},
    ops::Deref,
    ptr::{self, NonNull},
    sync::Arc,
    task::{RawWaker, RawWakerVTable, Waker},
};
use tracing::trace;

/// Entry points of a native waker. Each takes a pointer to the
/// [`NativeWaker`] header of the object.
///
/// `clone` returns a new owned reference; `wake` and `drop` consume one;
/// `wake_by_ref` consumes nothing.
#[repr(C)]
pub struct NativeWakerVTable {
    pub clone: unsafe extern "C" fn(*const NativeWaker) -> *const NativeWaker,
    pub wake: unsafe extern "C" fn(*const NativeWaker),
    pub wake_by_ref: unsafe extern "C" fn(*const NativeWaker),
    pub drop: unsafe extern "C" fn(*const NativeWaker),
}

/// Header of a native waker object.
#[repr(C)]
pub struct NativeWaker {
    vtable: &'static NativeWakerVTable,
}

impl NativeWaker {
    pub const fn new(vtable: &'static NativeWakerVTable) -> Self {
        NativeWaker { vtable }
    }

    pub fn vtable(&self) -> &'static NativeWakerVTable {
        self.vtable
    }

    pub fn clone_native(&self) -> OwnedNativeWaker {
        unsafe { OwnedNativeWaker::from_raw((self.vtable.clone)(self)) }
    }

    pub fn wake_by_ref(&self) {
        unsafe { (self.vtable.wake_by_ref)(self) }
    }

    /// Wraps a managed [`Waker`] into a reference-counted native waker.
    ///
    /// A [`Waker`] that is itself backed by a native waker is unwrapped
    /// instead of being boxed a second time.
    pub fn from_std(waker: Waker) -> OwnedNativeWaker {
        if let Some(native) = try_into_native_waker_ptr(&waker) {
            // The Waker's reference becomes the returned one.
            mem::forget(waker);
            return unsafe { OwnedNativeWaker::from_raw(native) };
        }
        let boxed = Arc::new(StdWakerBox {
            header: NativeWaker::new(&STD_WAKER_BOX_VTABLE),
            waker,
        });
        unsafe { OwnedNativeWaker::from_raw(Arc::into_raw(boxed).cast()) }
    }
}

impl fmt::Debug for NativeWaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeWaker")
            .field("vtable", &(self.vtable as *const NativeWakerVTable))
            .finish()
    }
}

/// One owned reference to a native waker.
pub struct OwnedNativeWaker(NonNull<NativeWaker>);

unsafe impl Send for OwnedNativeWaker {}
unsafe impl Sync for OwnedNativeWaker {}

impl OwnedNativeWaker {
    /// # Safety
    ///
    /// `ptr` must be non-null and carry one owned reference, as returned by
    /// a vtable `clone` or [`Self::into_raw`].
    pub unsafe fn from_raw(ptr: *const NativeWaker) -> Self {
        OwnedNativeWaker(NonNull::new_unchecked(ptr.cast_mut()))
    }

    pub fn into_raw(self) -> *const NativeWaker {
        let ptr = self.0.as_ptr();
        mem::forget(self);
        ptr
    }

    pub fn wake(self) {
        let ptr = self.into_raw();
        unsafe { ((*ptr).vtable.wake)(ptr) }
    }

    pub fn into_waker(self) -> Waker {
        let raw = RawWaker::new(self.into_raw().cast(), &NATIVE_RAW_WAKER_VTABLE);
        unsafe { Waker::from_raw(raw) }
    }
}

impl Deref for OwnedNativeWaker {
    type Target = NativeWaker;

    fn deref(&self) -> &NativeWaker {
        unsafe { self.0.as_ref() }
    }
}

impl Clone for OwnedNativeWaker {
    fn clone(&self) -> Self {
        self.clone_native()
    }
}

impl Drop for OwnedNativeWaker {
    fn drop(&mut self) {
        let ptr = self.0.as_ptr();
        unsafe { ((*ptr).vtable.drop)(ptr) }
    }
}

impl fmt::Debug for OwnedNativeWaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

static NATIVE_RAW_WAKER_VTABLE: RawWakerVTable =
    RawWakerVTable::new(raw_clone, raw_wake, raw_wake_by_ref, raw_drop);

unsafe fn raw_clone(data: *const ()) -> RawWaker {
    let native = data.cast::<NativeWaker>();
    trace!(waker = ?native, "cloning native waker");
    let cloned = ((*native).vtable.clone)(native);
    RawWaker::new(cloned.cast(), &NATIVE_RAW_WAKER_VTABLE)
}

unsafe fn raw_wake(data: *const ()) {
    let native = data.cast::<NativeWaker>();
    trace!(waker = ?native, "waking native waker");
    ((*native).vtable.wake)(native)
}

unsafe fn raw_wake_by_ref(data: *const ()) {
    let native = data.cast::<NativeWaker>();
    trace!(waker = ?native, "waking native waker by reference");
    ((*native).vtable.wake_by_ref)(native)
}

unsafe fn raw_drop(data: *const ()) {
    let native = data.cast::<NativeWaker>();
    ((*native).vtable.drop)(native)
}

/// A [`Waker`] borrowed from a native waker. Dropping it releases nothing;
/// cloning it clones the native waker.
pub struct WakerRef<'a> {
    waker: ManuallyDrop<Waker>,
    borrow: PhantomData<&'a NativeWaker>,
}

impl Deref for WakerRef<'_> {
    type Target = Waker;

    fn deref(&self) -> &Waker {
        &self.waker
    }
}

pub fn waker_ref(native: &NativeWaker) -> WakerRef<'_> {
    let raw = RawWaker::new(
        (native as *const NativeWaker).cast(),
        &NATIVE_RAW_WAKER_VTABLE,
    );
    WakerRef {
        waker: ManuallyDrop::new(unsafe { Waker::from_raw(raw) }),
        borrow: PhantomData,
    }
}

/// Returns the native waker behind `waker`, if it is backed by one.
pub fn try_into_native_waker_ptr(waker: &Waker) -> Option<*const NativeWaker> {
    if ptr::eq(waker.vtable(), &NATIVE_RAW_WAKER_VTABLE) {
        Some(waker.data().cast())
    } else {
        None
    }
}

#[repr(C)]
struct StdWakerBox {
    header: NativeWaker,
    waker: Waker,
}

static STD_WAKER_BOX_VTABLE: NativeWakerVTable = NativeWakerVTable {
    clone: std_waker_box_clone,
    wake: std_waker_box_wake,
    wake_by_ref: std_waker_box_wake_by_ref,
    drop: std_waker_box_drop,
};

unsafe extern "C" fn std_waker_box_clone(this: *const NativeWaker) -> *const NativeWaker {
    Arc::increment_strong_count(this.cast::<StdWakerBox>());
    this
}

unsafe extern "C" fn std_waker_box_wake(this: *const NativeWaker) {
    let this = Arc::from_raw(this.cast::<StdWakerBox>());
    this.waker.wake_by_ref();
}

unsafe extern "C" fn std_waker_box_wake_by_ref(this: *const NativeWaker) {
    (*this.cast::<StdWakerBox>()).waker.wake_by_ref();
}

unsafe extern "C" fn std_waker_box_drop(this: *const NativeWaker) {
    drop(Arc::from_raw(this.cast::<StdWakerBox>()));
}

/// Slot for a waker that is woken at most once.
#[derive(Default)]
pub struct OptionWaker {
    inner: Option<Waker>,
}

impl OptionWaker {
    pub const fn empty() -> Self {
        OptionWaker { inner: None }
    }

    /// Stores a clone of `waker`, replacing any previously stored one.
    pub fn set(&mut self, waker: &Waker) {
        match &mut self.inner {
            Some(stored) => stored.clone_from(waker),
            None => self.inner = Some(waker.clone()),
        }
    }

    pub fn set_none(&mut self) {
        self.inner = None;
    }

    pub fn is_set(&self) -> bool {
        self.inner.is_some()
    }

    /// Consumes and invokes the stored waker.
    ///
    /// # Panics
    ///
    /// Panics if no waker is stored, including when it was already woken.
    pub fn wake_mut(&mut self) {
        match self.inner.take() {
            Some(waker) => waker.wake(),
            None => panic!(
                "OptionWaker::set() should be called before waking; \
                 OptionWaker::wake_mut() should be called at most once after set()"
            ),
        }
    }
}

impl fmt::Debug for OptionWaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionWaker")
            .field("is_set", &self.is_set())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod waker_test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Wake;

    #[derive(Default)]
    pub(crate) struct CountingWake(pub(crate) AtomicUsize);

    impl Wake for CountingWake {
        fn wake(self: Arc<Self>) {
            self.wake_by_ref()
        }

        fn wake_by_ref(self: &Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl CountingWake {
        pub(crate) fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_std_waker_behind_native_waker() {
        let counter = Arc::new(CountingWake::default());
        let native = NativeWaker::from_std(Waker::from(counter.clone()));

        native.wake_by_ref();
        let cloned = native.clone();
        cloned.wake();
        assert_eq!(counter.count(), 2);

        drop(native);
        assert_eq!(Arc::strong_count(&counter), 1);
    }

    #[test]
    fn test_native_waker_detection() {
        let counter = Arc::new(CountingWake::default());
        let std_waker = Waker::from(counter.clone());
        assert!(try_into_native_waker_ptr(&std_waker).is_none());

        let native = NativeWaker::from_std(std_waker);
        let borrowed = waker_ref(&native);
        assert_eq!(
            try_into_native_waker_ptr(&borrowed),
            Some(&*native as *const NativeWaker)
        );

        borrowed.wake_by_ref();
        borrowed.clone().wake();
        assert_eq!(counter.count(), 2);
    }

    #[test]
    fn test_from_std_unwraps_native_backed_waker() {
        let counter = Arc::new(CountingWake::default());
        let native = NativeWaker::from_std(Waker::from(counter.clone()));
        let ptr = &*native as *const NativeWaker;

        let rewrapped = NativeWaker::from_std(native.clone().into_waker());
        assert_eq!(&*rewrapped as *const NativeWaker, ptr);
    }

    #[test]
    fn test_option_waker_replaces_and_wakes_once() {
        let first = Arc::new(CountingWake::default());
        let second = Arc::new(CountingWake::default());

        let mut slot = OptionWaker::empty();
        slot.set(&Waker::from(first.clone()));
        slot.set(&Waker::from(second.clone()));
        slot.wake_mut();

        assert_eq!(first.count(), 0);
        assert_eq!(second.count(), 1);
        assert!(!slot.is_set());
    }

    #[test]
    #[should_panic(expected = "OptionWaker::wake_mut() should be called at most once")]
    fn test_option_waker_double_wake_panics() {
        let mut slot = OptionWaker::empty();
        slot.set(&Waker::from(Arc::new(CountingWake::default())));
        slot.wake_mut();
        slot.wake_mut();
    }

    #[test]
    fn test_set_none_drops_stored_waker() {
        let counter = Arc::new(CountingWake::default());
        let mut slot = OptionWaker::empty();
        slot.set(&Waker::from(counter.clone()));
        slot.set_none();
        assert!(!slot.is_set());
        assert_eq!(Arc::strong_count(&counter), 1);
    }
}
