use static_assertions::{assert_eq_align, assert_eq_size};
use std::{fmt, marker::PhantomData, mem::MaybeUninit, ptr};

/// Tagged optional value with a stable C layout: a presence flag followed
/// by the (possibly uninitialized) payload.
#[repr(C)]
pub struct Maybe<T> {
    is_set: bool,
    value: MaybeUninit<T>,
}

#[allow(non_snake_case)]
impl<T> Maybe<T> {
    pub const fn Some(value: T) -> Self {
        Maybe {
            is_set: true,
            value: MaybeUninit::new(value),
        }
    }

    pub const fn None() -> Self {
        Maybe {
            is_set: false,
            value: MaybeUninit::uninit(),
        }
    }
}

impl<T> Maybe<T> {
    pub fn is_some(&self) -> bool {
        self.is_set
    }

    pub fn is_none(&self) -> bool {
        !self.is_set
    }

    pub fn as_ref(&self) -> Option<&T> {
        if self.is_set {
            Some(unsafe { self.value.assume_init_ref() })
        } else {
            None
        }
    }

    pub fn as_mut(&mut self) -> Option<&mut T> {
        if self.is_set {
            Some(unsafe { self.value.assume_init_mut() })
        } else {
            None
        }
    }

    pub fn take(&mut self) -> Option<T> {
        if self.is_set {
            self.is_set = false;
            Some(unsafe { self.value.assume_init_read() })
        } else {
            None
        }
    }

    pub fn into_option(mut self) -> Option<T> {
        self.take()
    }
}

impl<T> Drop for Maybe<T> {
    fn drop(&mut self) {
        if self.is_set {
            unsafe { self.value.assume_init_drop() }
        }
    }
}

impl<T> Default for Maybe<T> {
    fn default() -> Self {
        Maybe::None()
    }
}

impl<T> From<Option<T>> for Maybe<T> {
    fn from(option: Option<T>) -> Self {
        match option {
            Some(value) => Maybe::Some(value),
            None => Maybe::None(),
        }
    }
}

impl<T> From<Maybe<T>> for Option<T> {
    fn from(maybe: Maybe<T>) -> Self {
        maybe.into_option()
    }
}

impl<T: Clone> Clone for Maybe<T> {
    fn clone(&self) -> Self {
        self.as_ref().cloned().into()
    }
}

impl<T: PartialEq> PartialEq for Maybe<T> {
    fn eq(&self, other: &Self) -> bool {
        self.as_ref() == other.as_ref()
    }
}

impl<T: Eq> Eq for Maybe<T> {}

impl<T: fmt::Debug> fmt::Debug for Maybe<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_ref() {
            Some(value) => f.debug_tuple("Some").field(value).finish(),
            None => f.write_str("None"),
        }
    }
}

/// Optional reference that uses the null pointer as its absent state, so it
/// crosses the boundary exactly like a nullable pointer.
#[repr(transparent)]
pub struct MaybeRef<'a, T> {
    ptr: *const T,
    borrow: PhantomData<&'a T>,
}

assert_eq_size!(MaybeRef<'static, u64>, &'static u64);
assert_eq_align!(MaybeRef<'static, u64>, &'static u64);
assert_eq_size!(MaybeRef<'static, u8>, Option<&'static u8>);

impl<T> Clone for MaybeRef<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for MaybeRef<'_, T> {}

unsafe impl<T: Sync> Send for MaybeRef<'_, T> {}
unsafe impl<T: Sync> Sync for MaybeRef<'_, T> {}

impl<'a, T> MaybeRef<'a, T> {
    pub const fn none() -> Self {
        MaybeRef {
            ptr: ptr::null(),
            borrow: PhantomData,
        }
    }

    pub fn is_some(&self) -> bool {
        !self.ptr.is_null()
    }

    pub fn is_none(&self) -> bool {
        self.ptr.is_null()
    }

    pub fn get(&self) -> Option<&'a T> {
        unsafe { self.ptr.as_ref() }
    }
}

impl<'a, T> From<&'a T> for MaybeRef<'a, T> {
    fn from(r: &'a T) -> Self {
        MaybeRef {
            ptr: r,
            borrow: PhantomData,
        }
    }
}

impl<'a, T> From<Option<&'a T>> for MaybeRef<'a, T> {
    fn from(r: Option<&'a T>) -> Self {
        match r {
            Some(r) => r.into(),
            None => MaybeRef::none(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for MaybeRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.get(), f)
    }
}
