//! C-callable surface of the interlink bridge.
//!
//! Layouts mirror `include/interlink.h`. Strings, vectors and results
//! cross by value as their fixed-size handles; wakers and futures cross as
//! pointers to `#[repr(C)]` headers carrying their own entry points.
#![allow(improper_ctypes_definitions)]

mod boxes;
mod panic;
mod results;
mod strings;
mod wakers;

pub use self::{boxes::*, panic::*, results::*, strings::*, wakers::*};

use interlink::{extern_drop_glue, BridgeString, BridgeVec, OwnPromiseNode, OwnedBox, RustFuture};
use std::fmt::Display;

/// Outcome of a fallible C entry point.
#[repr(C)]
#[derive(Debug)]
pub enum CResult<T> {
    Ok(T),
    Err(BridgeString),
}

impl<T> CResult<T> {
    pub fn unwrap(self) -> T {
        match self {
            CResult::Ok(ok) => ok,
            CResult::Err(err) => panic!("{}", err),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, CResult::Ok(_))
    }
}

impl<T, E: Display> From<Result<T, E>> for CResult<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(ok) => CResult::Ok(ok),
            Err(err) => CResult::Err(err.to_string().into()),
        }
    }
}

extern_drop_glue! {
    BridgeString: new = interlink_string_new, drop = interlink_string_drop_in_place;
    BridgeVec<u8>: new = interlink_vec_u8_new, drop = interlink_vec_u8_drop_in_place;
    OwnedBox<BridgeString>: new = interlink_box_string_new, drop = interlink_box_string_drop_in_place;
    OwnPromiseNode: drop = interlink_promise_node_drop_in_place;
    RustFuture<'static, ()>: drop = interlink_future_void_drop_in_place;
}

#[cfg(test)]
mod ffi_test {
    use super::*;
    use interlink::{infallible_future, Promise};
    use std::{cell::Cell, mem::MaybeUninit, rc::Rc};

    #[test]
    fn test_cresult_from_result() {
        let ok: CResult<u8> = Ok::<_, String>(3).into();
        assert_eq!(ok.unwrap(), 3);

        let err: CResult<u8> = Err::<u8, _>("bad input").into();
        match err {
            CResult::Ok(_) => unreachable!(),
            CResult::Err(msg) => assert_eq!(msg, "bad input"),
        }
    }

    #[test]
    #[should_panic(expected = "bad input")]
    fn test_cresult_unwrap_err_panics() {
        let err: CResult<u8> = Err::<u8, _>("bad input").into();
        err.unwrap();
    }

    #[test]
    fn test_drop_glue_for_promise_node() {
        let mut slot = MaybeUninit::<OwnPromiseNode>::new(Promise::ready(1u8).into_node());
        unsafe { interlink_promise_node_drop_in_place(slot.as_mut_ptr()) };
    }

    struct DropFlag(Rc<Cell<bool>>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.set(true);
        }
    }

    #[test]
    fn test_drop_glue_for_future() {
        let dropped = Rc::new(Cell::new(false));
        let flag = DropFlag(dropped.clone());
        let fut = infallible_future::<()>(Box::pin(async move {
            let _flag = flag;
        }));
        assert!(!dropped.get());

        let mut slot = MaybeUninit::new(fut);
        unsafe { interlink_future_void_drop_in_place(slot.as_mut_ptr()) };
        assert!(dropped.get());
    }
}
