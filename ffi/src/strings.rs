use crate::{panic::catch_panic, CResult};
use interlink::{BridgeString, BridgeVec, Slice};
use libc::{c_char, c_int, size_t};
use std::{cmp::Ordering, ptr};

unsafe fn bytes<'a>(data: *const u8, len: size_t) -> &'a [u8] {
    Slice::from_raw_parts(data, len).as_slice()
}

/// Validates `data[..len]` as UTF-8 and copies it into `out`.
///
/// # Safety
///
/// `data` must be valid for `len` bytes (or null with `len == 0`); `out`
/// must be valid for writing a string.
#[no_mangle]
pub unsafe extern "C" fn interlink_string_from_utf8(
    data: *const u8,
    len: size_t,
    out: *mut BridgeString,
) -> CResult<bool> {
    let bytes = bytes(data, len);
    catch_panic("interlink_string_from_utf8", || {
        let string = BridgeString::from_utf8(bytes).map_err(|err| err.to_string())?;
        out.write(string);
        Ok(true)
    })
}

/// Replaces invalid sequences with U+FFFD, so only allocation failures
/// are reported.
///
/// # Safety
///
/// Same as [`interlink_string_from_utf8`].
#[no_mangle]
pub unsafe extern "C" fn interlink_string_from_utf8_lossy(
    data: *const u8,
    len: size_t,
    out: *mut BridgeString,
) -> CResult<bool> {
    let bytes = bytes(data, len);
    catch_panic("interlink_string_from_utf8_lossy", || {
        out.write(BridgeString::from_utf8_lossy(bytes));
        Ok(true)
    })
}

/// # Safety
///
/// `data` must be valid for `len` UTF-16 code units; `out` must be valid
/// for writing a string.
#[no_mangle]
pub unsafe extern "C" fn interlink_string_from_utf16(
    data: *const u16,
    len: size_t,
    out: *mut BridgeString,
) -> CResult<bool> {
    let units = Slice::from_raw_parts(data, len).as_slice();
    catch_panic("interlink_string_from_utf16", || {
        let string = BridgeString::from_utf16(units).map_err(|err| err.to_string())?;
        out.write(string);
        Ok(true)
    })
}

/// Not NUL-terminated; see [`interlink_string_c_str`].
///
/// # Safety
///
/// `s` must point to a live string.
#[no_mangle]
pub unsafe extern "C" fn interlink_string_data(s: *const BridgeString) -> *const u8 {
    (*s).data()
}

/// # Safety
///
/// `s` must point to a live string.
#[no_mangle]
pub unsafe extern "C" fn interlink_string_len(s: *const BridgeString) -> size_t {
    (*s).len()
}

/// NUL-terminated view of `s`, valid until `s` is next modified.
///
/// # Safety
///
/// `s` must point to a live string.
#[no_mangle]
pub unsafe extern "C" fn interlink_string_c_str(s: *mut BridgeString) -> *const c_char {
    (*s).c_str()
}

/// # Safety
///
/// `s` must point to a live string and `data` must be valid for `len`
/// bytes.
#[no_mangle]
pub unsafe extern "C" fn interlink_string_push(
    s: *mut BridgeString,
    data: *const u8,
    len: size_t,
) -> CResult<bool> {
    let bytes = bytes(data, len);
    catch_panic("interlink_string_push", || {
        let tail = std::str::from_utf8(bytes).map_err(|err| err.to_string())?;
        (*s).push_str(tail);
        Ok(true)
    })
}

/// Byte-wise lexicographic comparison: negative, zero or positive.
///
/// # Safety
///
/// Both pointers must point to live strings.
#[no_mangle]
pub unsafe extern "C" fn interlink_string_cmp(a: *const BridgeString, b: *const BridgeString) -> c_int {
    match (*a).cmp(&*b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

/// # Safety
///
/// `v` must point to a live vector.
#[no_mangle]
pub unsafe extern "C" fn interlink_vec_u8_push(v: *mut BridgeVec<u8>, byte: u8) -> CResult<bool> {
    catch_panic("interlink_vec_u8_push", || {
        (*v).push_back(byte);
        Ok(true)
    })
}

/// Fails instead of growing when the new capacity would overflow.
///
/// # Safety
///
/// `v` must point to a live vector.
#[no_mangle]
pub unsafe extern "C" fn interlink_vec_u8_reserve(v: *mut BridgeVec<u8>, additional: size_t) -> CResult<bool> {
    catch_panic("interlink_vec_u8_reserve", || {
        (*v).reserve(additional);
        Ok(true)
    })
}

/// # Safety
///
/// `v` must point to a live vector.
#[no_mangle]
pub unsafe extern "C" fn interlink_vec_u8_truncate(v: *mut BridgeVec<u8>, len: size_t) -> CResult<bool> {
    catch_panic("interlink_vec_u8_truncate", || {
        (*v).truncate(len);
        Ok(true)
    })
}

/// # Safety
///
/// `v` must point to a live vector.
#[no_mangle]
pub unsafe extern "C" fn interlink_vec_u8_clear(v: *mut BridgeVec<u8>) {
    (*v).clear()
}

/// # Safety
///
/// `v` must point to a live vector.
#[no_mangle]
pub unsafe extern "C" fn interlink_vec_u8_len(v: *const BridgeVec<u8>) -> size_t {
    (*v).len()
}

/// # Safety
///
/// `v` must point to a live vector.
#[no_mangle]
pub unsafe extern "C" fn interlink_vec_u8_capacity(v: *const BridgeVec<u8>) -> size_t {
    (*v).capacity()
}

/// Never null, even when empty.
///
/// # Safety
///
/// `v` must point to a live vector.
#[no_mangle]
pub unsafe extern "C" fn interlink_vec_u8_data(v: *const BridgeVec<u8>) -> *const u8 {
    (*v).data()
}

/// Copies `data[..len]` into a new vector at `out`.
///
/// # Safety
///
/// `data` must be valid for `len` bytes; `out` must be valid for writing
/// a vector.
#[no_mangle]
pub unsafe extern "C" fn interlink_vec_u8_from_bytes(
    data: *const u8,
    len: size_t,
    out: *mut BridgeVec<u8>,
) -> CResult<bool> {
    let bytes = bytes(data, len);
    catch_panic("interlink_vec_u8_from_bytes", || {
        ptr::write(out, bytes.iter().copied().collect());
        Ok(true)
    })
}

#[cfg(test)]
mod strings_test {
    use super::*;
    use std::{ffi::CStr, mem::MaybeUninit};

    #[test]
    fn test_from_utf8_rejects_invalid_bytes() {
        let mut out = MaybeUninit::<BridgeString>::uninit();
        let bytes = b"ab\xffcd";
        match unsafe { interlink_string_from_utf8(bytes.as_ptr(), bytes.len(), out.as_mut_ptr()) } {
            CResult::Ok(_) => unreachable!(),
            CResult::Err(msg) => assert!(msg.contains("byte offset 2"), "{msg}"),
        }

        let res = unsafe { interlink_string_from_utf8_lossy(bytes.as_ptr(), bytes.len(), out.as_mut_ptr()) };
        assert!(res.unwrap());
        let lossy = unsafe { out.assume_init() };
        assert_eq!(lossy, "ab\u{fffd}cd");
    }

    #[test]
    fn test_null_pointer_with_zero_length() {
        let mut out = MaybeUninit::<BridgeString>::uninit();
        let res = unsafe { interlink_string_from_utf8(ptr::null(), 0, out.as_mut_ptr()) };
        assert!(res.unwrap());
        let mut s = unsafe { out.assume_init() };
        assert_eq!(unsafe { interlink_string_len(&s) }, 0);

        let c_str = unsafe { CStr::from_ptr(interlink_string_c_str(&mut s)) };
        assert_eq!(c_str.to_bytes(), b"");
    }

    #[test]
    fn test_push_and_compare() {
        let mut a = BridgeString::from("app");
        let b = BridgeString::from("apple");
        assert_eq!(unsafe { interlink_string_cmp(&a, &b) }, -1);

        let tail = b"le";
        assert!(unsafe { interlink_string_push(&mut a, tail.as_ptr(), tail.len()) }.unwrap());
        assert_eq!(unsafe { interlink_string_cmp(&a, &b) }, 0);
        assert_eq!(unsafe { interlink_string_cmp(&b, &BridgeString::from("B")) }, 1);
    }

    #[test]
    fn test_vec_u8_operations() {
        let mut out = MaybeUninit::<BridgeVec<u8>>::uninit();
        assert!(unsafe { interlink_vec_u8_from_bytes(b"abc".as_ptr(), 3, out.as_mut_ptr()) }.unwrap());
        let mut v = unsafe { out.assume_init() };

        unsafe {
            assert!(interlink_vec_u8_reserve(&mut v, 16).unwrap());
            assert!(interlink_vec_u8_capacity(&v) >= 19);
            assert!(interlink_vec_u8_push(&mut v, b'd').unwrap());
            assert_eq!(interlink_vec_u8_len(&v), 4);
            assert!(interlink_vec_u8_truncate(&mut v, 2).unwrap());
            assert_eq!(&v[..], b"ab");
            interlink_vec_u8_clear(&mut v);
            assert!(!interlink_vec_u8_data(&v).is_null());
        }
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_vec_u8_reserve_overflow_is_an_error() {
        let mut v = BridgeVec::<u8>::from(b"abc".to_vec());
        match unsafe { interlink_vec_u8_reserve(&mut v, usize::MAX) } {
            CResult::Ok(_) => unreachable!(),
            CResult::Err(msg) => {
                assert!(msg.starts_with("interlink_vec_u8_reserve panicked: "), "{msg}");
                assert!(msg.contains("capacity overflow"), "{msg}");
            }
        }

        assert_eq!(&v[..], b"abc");
        assert!(unsafe { interlink_vec_u8_push(&mut v, b'd') }.unwrap());
        assert_eq!(&v[..], b"abcd");
    }
}
