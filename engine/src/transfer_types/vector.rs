use super::slice::{Slice, SliceMut};
use static_assertions::{assert_eq_align, assert_eq_size};
use std::{fmt, slice};

/// Growable contiguous buffer owned by this side of the boundary.
///
/// Allocation and deallocation always go through this side's allocator;
/// the C side grows and shrinks the buffer only through the exported
/// functions.
#[derive(Clone, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct BridgeVec<T>(Vec<T>);

assert_eq_size!(BridgeVec<u8>, [usize; 3]);
assert_eq_align!(BridgeVec<u8>, usize);

impl<T> Default for BridgeVec<T> {
    fn default() -> Self {
        BridgeVec::new()
    }
}

impl<T> BridgeVec<T> {
    pub const fn new() -> Self {
        BridgeVec(Vec::new())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        BridgeVec(Vec::with_capacity(capacity))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.0.capacity()
    }

    /// Makes room for at least `additional` more elements; growth is
    /// amortized.
    pub fn reserve(&mut self, additional: usize) {
        self.0.reserve(additional)
    }

    pub fn push_back(&mut self, value: T) {
        self.0.push(value)
    }

    /// Constructs the new last element in place and returns it.
    pub fn emplace_back<F: FnOnce() -> T>(&mut self, f: F) -> &mut T {
        let index = self.0.len();
        self.0.push(f());
        &mut self.0[index]
    }

    pub fn truncate(&mut self, len: usize) {
        self.0.truncate(len)
    }

    pub fn clear(&mut self) {
        self.0.clear()
    }

    pub fn as_slice(&self) -> Slice<'_, T> {
        Slice::new(&self.0)
    }

    pub fn as_mut_slice(&mut self) -> SliceMut<'_, T> {
        SliceMut::new(&mut self.0)
    }

    /// Pointer to the first element; not null even when empty.
    pub fn data(&self) -> *const T {
        self.0.as_ptr()
    }

    /// # Safety
    ///
    /// `new_len` must not exceed `capacity()` and the elements up to
    /// `new_len` must be initialized.
    pub unsafe fn set_len(&mut self, new_len: usize) {
        self.0.set_len(new_len)
    }

    /// Pointer to the spare capacity, used by the C side to write elements
    /// before calling [`Self::set_len`].
    pub fn spare_capacity_ptr(&mut self) -> *mut T {
        self.0.spare_capacity_mut().as_mut_ptr().cast()
    }

    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.0.iter()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.0
    }
}

impl<T> From<Vec<T>> for BridgeVec<T> {
    fn from(v: Vec<T>) -> Self {
        BridgeVec(v)
    }
}

impl<T> From<BridgeVec<T>> for Vec<T> {
    fn from(v: BridgeVec<T>) -> Self {
        v.0
    }
}

impl<T> FromIterator<T> for BridgeVec<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        BridgeVec(iter.into_iter().collect())
    }
}

impl<T> Extend<T> for BridgeVec<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.0.extend(iter)
    }
}

impl<'a, T> IntoIterator for &'a BridgeVec<T> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<T> std::ops::Deref for BridgeVec<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

impl<T> std::ops::DerefMut for BridgeVec<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.0
    }
}

impl<T: fmt::Debug> fmt::Debug for BridgeVec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}
