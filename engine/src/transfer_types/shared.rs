use static_assertions::{assert_eq_align, assert_eq_size};
use std::{
    fmt,
    marker::PhantomData,
    mem::ManuallyDrop,
    ops::Deref,
    ptr,
    sync::atomic::{fence, AtomicUsize, Ordering},
};

/// Reference counts and type-erased lifecycle entry points of a shared
/// allocation. Consumers never look inside; only the handles do.
#[repr(C)]
pub struct ControlBlock {
    strong: AtomicUsize,
    // Counts weak handles plus one held collectively by all strong handles.
    weak: AtomicUsize,
    destroy: unsafe fn(*const ControlBlock),
    dealloc: unsafe fn(*const ControlBlock),
}

#[repr(C)]
struct SharedInner<T> {
    ctrl: ControlBlock,
    value: ManuallyDrop<T>,
}

unsafe fn destroy_value<T>(ctrl: *const ControlBlock) {
    let inner = ctrl.cast::<SharedInner<T>>().cast_mut();
    ManuallyDrop::drop(&mut (*inner).value);
}

unsafe fn dealloc_inner<T>(ctrl: *const ControlBlock) {
    drop(Box::from_raw(ctrl.cast::<SharedInner<T>>().cast_mut()));
}

unsafe fn release_weak(ctrl: *const ControlBlock) {
    if (*ctrl).weak.fetch_sub(1, Ordering::Release) == 1 {
        fence(Ordering::Acquire);
        ((*ctrl).dealloc)(ctrl);
    }
}

/// Reference-counted shared ownership.
///
/// Same two-word layout as the native shared pointer: object pointer
/// followed by control block pointer. Both are null for an empty handle.
#[repr(C)]
pub struct SharedHandle<T> {
    ptr: *const T,
    ctrl: *const ControlBlock,
    ownership_marker: PhantomData<T>,
}

/// Non-owning observer of a [`SharedHandle`] allocation.
///
/// Never keeps the value alive; [`WeakHandle::upgrade`] fails once the
/// last strong handle is gone.
#[repr(C)]
pub struct WeakHandle<T> {
    ptr: *const T,
    ctrl: *const ControlBlock,
    ownership_marker: PhantomData<T>,
}

assert_eq_size!(SharedHandle<u64>, [usize; 2]);
assert_eq_align!(SharedHandle<u64>, usize);
assert_eq_size!(WeakHandle<u64>, [usize; 2]);
assert_eq_align!(WeakHandle<u64>, usize);

unsafe impl<T: Send + Sync> Send for SharedHandle<T> {}
unsafe impl<T: Send + Sync> Sync for SharedHandle<T> {}
unsafe impl<T: Send + Sync> Send for WeakHandle<T> {}
unsafe impl<T: Send + Sync> Sync for WeakHandle<T> {}

impl<T> SharedHandle<T> {
    pub fn new(value: T) -> Self {
        let inner = Box::into_raw(Box::new(SharedInner {
            ctrl: ControlBlock {
                strong: AtomicUsize::new(1),
                weak: AtomicUsize::new(1),
                destroy: destroy_value::<T>,
                dealloc: dealloc_inner::<T>,
            },
            value: ManuallyDrop::new(value),
        }));
        unsafe {
            SharedHandle {
                ptr: ptr::addr_of!((*inner).value).cast(),
                ctrl: ptr::addr_of!((*inner).ctrl),
                ownership_marker: PhantomData,
            }
        }
    }

    pub const fn null() -> Self {
        SharedHandle {
            ptr: ptr::null(),
            ctrl: ptr::null(),
            ownership_marker: PhantomData,
        }
    }

    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    pub fn get(&self) -> Option<&T> {
        unsafe { self.ptr.as_ref() }
    }

    pub fn downgrade(this: &Self) -> WeakHandle<T> {
        if let Some(ctrl) = unsafe { this.ctrl.as_ref() } {
            ctrl.weak.fetch_add(1, Ordering::Relaxed);
        }
        WeakHandle {
            ptr: this.ptr,
            ctrl: this.ctrl,
            ownership_marker: PhantomData,
        }
    }

    pub fn strong_count(this: &Self) -> usize {
        match unsafe { this.ctrl.as_ref() } {
            Some(ctrl) => ctrl.strong.load(Ordering::Acquire),
            None => 0,
        }
    }

    pub fn weak_count(this: &Self) -> usize {
        match unsafe { this.ctrl.as_ref() } {
            Some(ctrl) => ctrl.weak.load(Ordering::Acquire) - 1,
            None => 0,
        }
    }

    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        ptr::eq(this.ctrl, other.ctrl)
    }
}

impl<T> Clone for SharedHandle<T> {
    fn clone(&self) -> Self {
        if let Some(ctrl) = unsafe { self.ctrl.as_ref() } {
            ctrl.strong.fetch_add(1, Ordering::Relaxed);
        }
        SharedHandle {
            ptr: self.ptr,
            ctrl: self.ctrl,
            ownership_marker: PhantomData,
        }
    }
}

impl<T> Drop for SharedHandle<T> {
    fn drop(&mut self) {
        let ctrl = self.ctrl;
        if ctrl.is_null() {
            return;
        }
        unsafe {
            if (*ctrl).strong.fetch_sub(1, Ordering::Release) == 1 {
                fence(Ordering::Acquire);
                ((*ctrl).destroy)(ctrl);
                release_weak(ctrl);
            }
        }
    }
}

impl<T> Default for SharedHandle<T> {
    fn default() -> Self {
        SharedHandle::null()
    }
}

impl<T> Deref for SharedHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("called deref on a null SharedHandle"),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for SharedHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => fmt::Debug::fmt(value, f),
            None => f.write_str("null"),
        }
    }
}

impl<T> WeakHandle<T> {
    /// An empty weak handle that never upgrades.
    pub const fn new() -> Self {
        WeakHandle {
            ptr: ptr::null(),
            ctrl: ptr::null(),
            ownership_marker: PhantomData,
        }
    }

    pub fn upgrade(&self) -> Option<SharedHandle<T>> {
        let ctrl = unsafe { self.ctrl.as_ref() }?;
        let mut strong = ctrl.strong.load(Ordering::Relaxed);
        loop {
            if strong == 0 {
                return None;
            }
            match ctrl.strong.compare_exchange_weak(
                strong,
                strong + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    return Some(SharedHandle {
                        ptr: self.ptr,
                        ctrl: self.ctrl,
                        ownership_marker: PhantomData,
                    })
                }
                Err(current) => strong = current,
            }
        }
    }

    pub fn strong_count(&self) -> usize {
        match unsafe { self.ctrl.as_ref() } {
            Some(ctrl) => ctrl.strong.load(Ordering::Acquire),
            None => 0,
        }
    }
}

impl<T> Clone for WeakHandle<T> {
    fn clone(&self) -> Self {
        if let Some(ctrl) = unsafe { self.ctrl.as_ref() } {
            ctrl.weak.fetch_add(1, Ordering::Relaxed);
        }
        WeakHandle {
            ptr: self.ptr,
            ctrl: self.ctrl,
            ownership_marker: PhantomData,
        }
    }
}

impl<T> Drop for WeakHandle<T> {
    fn drop(&mut self) {
        if !self.ctrl.is_null() {
            unsafe { release_weak(self.ctrl) }
        }
    }
}

impl<T> Default for WeakHandle<T> {
    fn default() -> Self {
        WeakHandle::new()
    }
}

impl<T> fmt::Debug for WeakHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(Weak)")
    }
}
