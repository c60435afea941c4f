use std::{
    cmp::Ordering,
    ffi::c_void,
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    mem,
    ops::{Deref, DerefMut},
    ptr,
};

/// Destructor entry point of the side that allocated a boxed value.
#[repr(C)]
pub struct Disposer {
    pub dispose: unsafe extern "C" fn(*mut c_void),
}

struct DisposerHolder<T>(PhantomData<T>);

impl<T> DisposerHolder<T> {
    const DISPOSER: Disposer = Disposer {
        dispose: dispose_box::<T>,
    };
}

unsafe extern "C" fn dispose_box<T>(ptr: *mut c_void) {
    drop(Box::from_raw(ptr.cast::<T>()));
}

/// Exclusive ownership of a heap value whose destructor may live on the
/// other side of the boundary.
///
/// Mirrors the native two-word owned pointer: a disposer and the object.
/// Moving leaves nothing behind to drop twice; an empty box has a null
/// object pointer and dropping it does nothing.
#[repr(C)]
pub struct OwnedBox<T> {
    disposer: *const Disposer,
    ptr: *mut T,
    ownership_marker: PhantomData<T>,
}

unsafe impl<T: Send> Send for OwnedBox<T> {}
unsafe impl<T: Sync> Sync for OwnedBox<T> {}

static_assertions::assert_eq_size!(OwnedBox<u64>, [usize; 2]);

impl<T> OwnedBox<T> {
    pub fn new(value: T) -> Self {
        Box::new(value).into()
    }

    pub const fn null() -> Self {
        OwnedBox {
            disposer: ptr::null(),
            ptr: ptr::null_mut(),
            ownership_marker: PhantomData,
        }
    }

    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// Releases ownership without running the destructor.
    pub fn into_raw(self) -> *mut T {
        let ptr = self.ptr;
        mem::forget(self);
        ptr
    }

    /// Takes back a pointer previously produced by [`Self::into_raw`] on a
    /// box created by [`Self::new`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `into_raw` on a box allocated by this side, and
    /// must not be used again by the caller. Anything else is undefined
    /// behavior.
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        OwnedBox::from_raw_parts(ptr, &DisposerHolder::<T>::DISPOSER)
    }

    /// # Safety
    ///
    /// `disposer` must outlive the box and know how to destroy `ptr`; `ptr`
    /// must be exclusively owned by the new box.
    pub unsafe fn from_raw_parts(ptr: *mut T, disposer: *const Disposer) -> Self {
        OwnedBox {
            disposer,
            ptr,
            ownership_marker: PhantomData,
        }
    }

    /// Moves the contents out, leaving an empty box behind.
    pub fn take(&mut self) -> Self {
        mem::replace(self, OwnedBox::null())
    }

    pub fn as_ref(&self) -> Option<&T> {
        unsafe { self.ptr.as_ref() }
    }

    pub fn as_mut(&mut self) -> Option<&mut T> {
        unsafe { self.ptr.as_mut() }
    }

    pub fn into_option(self) -> Option<Self> {
        if self.is_null() {
            None
        } else {
            Some(self)
        }
    }
}

impl<T> From<Box<T>> for OwnedBox<T> {
    fn from(b: Box<T>) -> Self {
        unsafe { OwnedBox::from_raw(Box::into_raw(b)) }
    }
}

impl<T> Default for OwnedBox<T> {
    fn default() -> Self {
        OwnedBox::null()
    }
}

impl<T> Deref for OwnedBox<T> {
    type Target = T;

    /// # Panics
    ///
    /// Panics if the box is empty.
    fn deref(&self) -> &T {
        match self.as_ref() {
            Some(value) => value,
            None => panic!("called deref on a null OwnedBox"),
        }
    }
}

impl<T> DerefMut for OwnedBox<T> {
    fn deref_mut(&mut self) -> &mut T {
        match self.as_mut() {
            Some(value) => value,
            None => panic!("called deref_mut on a null OwnedBox"),
        }
    }
}

impl<T> Drop for OwnedBox<T> {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe { ((*self.disposer).dispose)(self.ptr.cast()) }
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for OwnedBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_ref() {
            Some(value) => fmt::Debug::fmt(value, f),
            None => f.write_str("null"),
        }
    }
}

impl<T: fmt::Display> fmt::Display for OwnedBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_ref() {
            Some(value) => fmt::Display::fmt(value, f),
            None => f.write_str("null"),
        }
    }
}

impl<T: PartialEq> PartialEq for OwnedBox<T> {
    fn eq(&self, other: &Self) -> bool {
        self.as_ref() == other.as_ref()
    }
}

impl<T: Eq> Eq for OwnedBox<T> {}

impl<T: PartialOrd> PartialOrd for OwnedBox<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.as_ref().partial_cmp(&other.as_ref())
    }
}

impl<T: Ord> Ord for OwnedBox<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_ref().cmp(&other.as_ref())
    }
}

impl<T: Hash> Hash for OwnedBox<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_ref().hash(state)
    }
}

#[cfg(test)]
mod owned_box_test {
    use super::*;
    use std::cell::Cell;

    thread_local! {
        static DISPOSED: Cell<usize> = const { Cell::new(0) };
    }

    unsafe extern "C" fn counting_dispose(ptr: *mut c_void) {
        DISPOSED.with(|d| d.set(d.get() + 1));
        drop(Box::from_raw(ptr.cast::<u32>()));
    }

    static COUNTING: Disposer = Disposer {
        dispose: counting_dispose,
    };

    #[test]
    fn test_move_leaves_source_empty() {
        let mut a = OwnedBox::new(5u32);
        let b = a.take();
        assert!(a.is_null());
        assert_eq!(*b, 5);
        assert_eq!(a.as_ref(), None);
    }

    #[test]
    fn test_raw_round_trip() {
        let raw = OwnedBox::new(String::from("owned")).into_raw();
        let back = unsafe { OwnedBox::from_raw(raw) };
        assert_eq!(back.as_str(), "owned");
    }

    #[test]
    fn test_disposer_runs_once_and_not_for_null() {
        DISPOSED.with(|d| d.set(0));
        {
            let raw = Box::into_raw(Box::new(1u32));
            let mut a = unsafe { OwnedBox::from_raw_parts(raw, &COUNTING) };
            let _b = a.take();
            let _empty = OwnedBox::<u32>::null();
        }
        assert_eq!(DISPOSED.with(|d| d.get()), 1);
    }

    #[test]
    #[should_panic(expected = "null OwnedBox")]
    fn test_deref_null_panics() {
        let b = OwnedBox::<u8>::null();
        let _value: u8 = *b;
    }

    #[test]
    fn test_comparisons_forward_to_pointee() {
        assert_eq!(OwnedBox::new(3), OwnedBox::new(3));
        assert!(OwnedBox::new(1) < OwnedBox::new(2));
        assert!(OwnedBox::<i32>::null() < OwnedBox::new(i32::MIN));
        assert_eq!(format!("{}", OwnedBox::new(42)), "42");
    }
}
