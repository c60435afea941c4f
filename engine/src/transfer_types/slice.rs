use libc::size_t;
use static_assertions::{assert_eq_align, assert_eq_size, assert_not_impl_any};
use std::{fmt, marker::PhantomData, ptr::NonNull, slice};

/// This structure provides FFI-safe representation for a borrowed slice
/// by splitting it into data and length parts.
///
/// The data pointer is never null, even for empty slices: it is a
/// well-aligned dangling sentinel in that case.
///
/// Example C definition for `Slice<u8>`:
/// ```c
/// struct ByteSlice {
///     const uint8_t *data;
///     size_t length;
/// };
/// ```
#[repr(C)]
pub struct Slice<'a, T> {
    data: NonNull<T>,
    length: size_t,
    borrow: PhantomData<&'a [T]>,
}

assert_eq_size!(Slice<'static, u8>, [usize; 2]);
assert_eq_align!(Slice<'static, u8>, usize);

// Can't be derived without bound on `T: Clone`.
impl<T> Clone for Slice<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Slice<'_, T> {}

unsafe impl<T: Sync> Send for Slice<'_, T> {}
unsafe impl<T: Sync> Sync for Slice<'_, T> {}

impl<'a, T> Slice<'a, T> {
    pub fn new(s: &'a [T]) -> Self {
        Slice {
            data: NonNull::from(s).cast(),
            length: s.len(),
            borrow: PhantomData,
        }
    }

    /// Rebuilds a slice from parts that were produced by this side.
    ///
    /// # Safety
    ///
    /// `data` must be non-null and valid for `length` reads of `T` for `'a`.
    pub unsafe fn from_raw_parts_unchecked(data: *const T, length: usize) -> Self {
        Slice {
            data: NonNull::new_unchecked(data as *mut T),
            length,
            borrow: PhantomData,
        }
    }

    /// Rebuilds a slice from parts handed over by the FFI caller.
    ///
    /// A null data pointer is accepted for an empty slice and replaced with
    /// the dangling sentinel, because `slice::from_raw_parts` requires a
    /// non-null data part.
    ///
    /// # Safety
    ///
    /// When `length` is non-zero, `data` must be valid for `length` reads of
    /// `T` for `'a`.
    pub unsafe fn from_raw_parts(data: *const T, length: usize) -> Self {
        match NonNull::new(data as *mut T) {
            Some(data) => Slice {
                data,
                length,
                borrow: PhantomData,
            },
            None => {
                debug_assert_eq!(length, 0, "null slice data with non-zero length");
                Slice {
                    data: NonNull::dangling(),
                    length: 0,
                    borrow: PhantomData,
                }
            }
        }
    }

    pub fn as_slice(&self) -> &'a [T] {
        unsafe { slice::from_raw_parts(self.data.as_ptr(), self.length) }
    }

    /// Pointer to the first element. Never null.
    pub fn as_ptr(&self) -> *const T {
        self.data.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

impl<'a, T> From<&'a [T]> for Slice<'a, T> {
    fn from(s: &'a [T]) -> Self {
        Slice::new(s)
    }
}

impl<'a, T> From<&'a Vec<T>> for Slice<'a, T> {
    fn from(v: &'a Vec<T>) -> Self {
        Slice::new(v.as_slice())
    }
}

impl<T: fmt::Debug> fmt::Debug for Slice<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

/// Mutable equivalent of [`Slice`].
///
/// Deliberately neither `Clone` nor `Copy`: two live copies would be two
/// aliasing mutable views of the same memory.
#[repr(C)]
pub struct SliceMut<'a, T> {
    data: NonNull<T>,
    length: size_t,
    borrow: PhantomData<&'a mut [T]>,
}

assert_eq_size!(SliceMut<'static, u8>, Slice<'static, u8>);
assert_not_impl_any!(SliceMut<'static, u8>: Clone, Copy);

unsafe impl<T: Send> Send for SliceMut<'_, T> {}
unsafe impl<T: Sync> Sync for SliceMut<'_, T> {}

impl<'a, T> SliceMut<'a, T> {
    pub fn new(s: &'a mut [T]) -> Self {
        SliceMut {
            length: s.len(),
            data: NonNull::from(s).cast(),
            borrow: PhantomData,
        }
    }

    /// # Safety
    ///
    /// When `length` is non-zero, `data` must be valid for `length` reads
    /// and writes of `T` for `'a`, and nothing else may access that memory
    /// while the view is alive.
    pub unsafe fn from_raw_parts(data: *mut T, length: usize) -> Self {
        match NonNull::new(data) {
            Some(data) => SliceMut {
                data,
                length,
                borrow: PhantomData,
            },
            None => {
                debug_assert_eq!(length, 0, "null slice data with non-zero length");
                SliceMut {
                    data: NonNull::dangling(),
                    length: 0,
                    borrow: PhantomData,
                }
            }
        }
    }

    pub fn as_slice(&self) -> &[T] {
        unsafe { slice::from_raw_parts(self.data.as_ptr(), self.length) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        unsafe { slice::from_raw_parts_mut(self.data.as_ptr(), self.length) }
    }

    pub fn into_mut_slice(self) -> &'a mut [T] {
        unsafe { slice::from_raw_parts_mut(self.data.as_ptr(), self.length) }
    }

    /// Reborrows as an immutable view; the mutable view stays unusable
    /// while it is alive.
    pub fn as_const(&self) -> Slice<'_, T> {
        Slice::new(self.as_slice())
    }

    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.data.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

impl<'a, T> From<&'a mut [T]> for SliceMut<'a, T> {
    fn from(s: &'a mut [T]) -> Self {
        SliceMut::new(s)
    }
}

impl<T: fmt::Debug> fmt::Debug for SliceMut<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

#[cfg(test)]
mod slice_test {
    use super::*;

    #[test]
    fn test_empty_slice_has_non_null_data() {
        let empty: Vec<u64> = Vec::new();
        let slice = Slice::from(&empty);

        assert_eq!(slice.len(), 0);
        assert!(slice.is_empty());
        assert!(!slice.as_ptr().is_null());
        assert_eq!(slice.as_ptr() as usize % std::mem::align_of::<u64>(), 0);
    }

    #[test]
    fn test_null_extern_parts_become_empty_slice() {
        let slice = unsafe { Slice::<u32>::from_raw_parts(std::ptr::null(), 0) };
        assert!(slice.as_slice().is_empty());
        assert!(!slice.as_ptr().is_null());

        let mut slice = unsafe { SliceMut::<u32>::from_raw_parts(std::ptr::null_mut(), 0) };
        assert!(slice.as_mut_slice().is_empty());
    }

    #[test]
    fn test_const_slice_copies_share_referent() {
        let data = [1, 2, 3];
        let a = Slice::new(&data[..]);
        let b = a;
        assert_eq!(a.as_slice(), b.as_slice());
        assert_eq!(a.as_ptr(), b.as_ptr());
    }

    #[test]
    fn test_mut_slice_writes_through() {
        let mut data = [1u8, 2, 3];
        let mut slice = SliceMut::new(&mut data[..]);
        slice.as_mut_slice()[1] = 20;
        assert_eq!(slice.as_const().as_slice(), &[1, 20, 3]);
        assert_eq!(data, [1, 20, 3]);
    }
}
