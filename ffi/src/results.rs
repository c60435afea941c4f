use interlink::{BridgeResult, MessageBuf, Slice};
use libc::size_t;
use std::ptr;

/// Copies an error description so the caller may reclaim its own buffer as
/// soon as this returns.
///
/// # Safety
///
/// `data` must be valid for `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn interlink_error_message_alloc(data: *const u8, len: size_t) -> MessageBuf {
    MessageBuf::alloc(Slice::from_raw_parts(data, len).as_slice())
}

#[no_mangle]
pub extern "C" fn interlink_result_ok() -> BridgeResult {
    BridgeResult::ok()
}

/// Wraps a buffer from [`interlink_error_message_alloc`], taking ownership
/// of it.
///
/// # Safety
///
/// `message` must come from [`interlink_error_message_alloc`] and must not
/// be used or freed by the caller afterwards.
#[no_mangle]
pub unsafe extern "C" fn interlink_result_error(message: MessageBuf) -> BridgeResult {
    BridgeResult::from_message_buf(message)
}

/// Error description of `result`, or null when it is ok. Not
/// NUL-terminated.
///
/// # Safety
///
/// `result` must point to a live result; `len` must be valid for a write.
#[no_mangle]
pub unsafe extern "C" fn interlink_result_message(result: *const BridgeResult, len: *mut size_t) -> *const u8 {
    match (*result).message() {
        Some(message) => {
            *len = message.len();
            message.as_ptr()
        }
        None => {
            *len = 0;
            ptr::null()
        }
    }
}

/// Consumes `result`, freeing its message if it carries one.
#[no_mangle]
pub extern "C" fn interlink_result_free(result: BridgeResult) {
    drop(result)
}

#[cfg(test)]
mod results_test {
    use super::*;
    use interlink::RemoteError;

    #[test]
    fn test_error_round_trip_through_c_surface() {
        let mut description = b"native exception".to_vec();
        let message = unsafe { interlink_error_message_alloc(description.as_ptr(), description.len()) };
        description.fill(0);

        let result = unsafe { interlink_result_error(message) };
        let mut len = 0;
        let ptr = unsafe { interlink_result_message(&result, &mut len) };
        assert_eq!(unsafe { std::slice::from_raw_parts(ptr, len) }, b"native exception");
        assert_eq!(
            result.into_result(),
            Err(RemoteError::new("native exception"))
        );
    }

    #[test]
    fn test_ok_has_no_message() {
        let result = interlink_result_ok();
        let mut len = 1;
        assert!(unsafe { interlink_result_message(&result, &mut len) }.is_null());
        assert_eq!(len, 0);
        interlink_result_free(result);
    }
}
