use interlink::{BridgeString, OwnedBox};
use std::{mem, ptr};

/// Moves the string at `s` into a new box at `out`.
///
/// # Safety
///
/// `s` must hold a live string, which is moved out: the caller must not
/// drop it afterwards. `out` must be valid for writing a box.
#[no_mangle]
pub unsafe extern "C" fn interlink_box_string_from_string(
    s: *mut BridgeString,
    out: *mut OwnedBox<BridgeString>,
) {
    out.write(OwnedBox::new(ptr::read(s)))
}

/// Null for an empty box.
///
/// # Safety
///
/// `b` must point to a live box.
#[no_mangle]
pub unsafe extern "C" fn interlink_box_string_get(b: *const OwnedBox<BridgeString>) -> *const BridgeString {
    (*b).as_ref().map_or(ptr::null(), |s| s as *const BridgeString)
}

/// Moves the boxed string into `out` and leaves the box empty. Returns
/// `false`, leaving `out` untouched, when the box was already empty.
///
/// # Safety
///
/// `b` must point to a live box; `out` must be valid for writing a
/// string.
#[no_mangle]
pub unsafe extern "C" fn interlink_box_string_take(
    b: *mut OwnedBox<BridgeString>,
    out: *mut BridgeString,
) -> bool {
    match (*b).as_mut() {
        Some(s) => {
            out.write(mem::take(s));
            drop((*b).take());
            true
        }
        None => false,
    }
}
