use crate::errors::RemoteError;
use static_assertions::assert_eq_size;
use std::{fmt::Display, mem, ptr, slice};

/// Owned message buffer of an error crossing the boundary.
///
/// A null `ptr` means "no message". Allocated by [`MessageBuf::alloc`]
/// and freed exactly once by whoever ends up owning it.
#[repr(C)]
#[derive(Debug)]
pub struct MessageBuf {
    pub ptr: *mut u8,
    pub len: usize,
}

assert_eq_size!(MessageBuf, [usize; 2]);

impl MessageBuf {
    pub const fn empty() -> Self {
        MessageBuf {
            ptr: ptr::null_mut(),
            len: 0,
        }
    }

    /// Copies `bytes` into a fresh allocation. The copy is what makes it
    /// safe for the caller to reclaim its own storage right after the call.
    pub fn alloc(bytes: &[u8]) -> Self {
        let len = bytes.len();
        let ptr = Box::into_raw(Box::<[u8]>::from(bytes)).cast::<u8>();
        MessageBuf { ptr, len }
    }

    pub fn is_empty(&self) -> bool {
        self.ptr.is_null()
    }

    fn as_bytes(&self) -> &[u8] {
        if self.ptr.is_null() {
            &[]
        } else {
            unsafe { slice::from_raw_parts(self.ptr, self.len) }
        }
    }

    /// Converts into an owned error, freeing the buffer.
    pub fn into_remote_error(self) -> RemoteError {
        let err = RemoteError::new(String::from_utf8_lossy(self.as_bytes()));
        drop(self);
        err
    }
}

impl Drop for MessageBuf {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            let raw = ptr::slice_from_raw_parts_mut(self.ptr, self.len);
            drop(unsafe { Box::from_raw(raw) });
            self.ptr = ptr::null_mut();
        }
    }
}

/// Outcome of a call across the boundary: either success or an owned
/// error description.
///
/// Consuming it with [`BridgeResult::into_result`] happens at most once
/// because it takes `self`. A result that is dropped unconsumed still frees
/// its message.
#[repr(C)]
#[derive(Debug)]
#[must_use]
pub struct BridgeResult {
    err: MessageBuf,
}

impl BridgeResult {
    pub const fn ok() -> Self {
        BridgeResult {
            err: MessageBuf::empty(),
        }
    }

    pub fn error(description: &str) -> Self {
        BridgeResult {
            err: MessageBuf::alloc(description.as_bytes()),
        }
    }

    /// # Safety
    ///
    /// `buf` must have been produced by [`MessageBuf::alloc`] (directly or
    /// through the exported allocation entry point) and not freed.
    pub unsafe fn from_message_buf(buf: MessageBuf) -> Self {
        BridgeResult { err: buf }
    }

    pub fn is_ok(&self) -> bool {
        self.err.is_empty()
    }

    /// The error description, if any, without consuming the result.
    pub fn message(&self) -> Option<&[u8]> {
        if self.is_ok() {
            None
        } else {
            Some(self.err.as_bytes())
        }
    }

    pub fn into_result(mut self) -> Result<(), RemoteError> {
        let err = mem::replace(&mut self.err, MessageBuf::empty());
        if err.is_empty() {
            Ok(())
        } else {
            Err(err.into_remote_error())
        }
    }
}

impl From<Result<(), RemoteError>> for BridgeResult {
    fn from(result: Result<(), RemoteError>) -> Self {
        match result {
            Ok(()) => BridgeResult::ok(),
            Err(err) => BridgeResult::error(err.message()),
        }
    }
}

/// Writes the success value of `result` to `ret`, or turns its error into a
/// [`BridgeResult`] error.
///
/// # Safety
///
/// `ret` must be valid for a write of `T`; it is left untouched on error.
pub unsafe fn write_result<T, E: Display>(ret: *mut T, result: Result<T, E>) -> BridgeResult {
    match result {
        Ok(value) => {
            ptr::write(ret, value);
            BridgeResult::ok()
        }
        Err(err) => BridgeResult::error(&err.to_string()),
    }
}
