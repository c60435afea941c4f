//! In-place construction and destruction of values whose storage is owned
//! by the other side of the boundary.

/// Moves `value` into caller-provided storage.
///
/// # Safety
///
/// `ptr` must be valid for writes and suitably aligned for `T`. Whatever
/// it held before is overwritten without being dropped.
pub unsafe fn new_in_place<T>(ptr: *mut T, value: T) {
    ptr.write(value)
}

/// Drops the value stored at `ptr`, leaving the storage uninitialized.
///
/// # Safety
///
/// `ptr` must hold an initialized `T`. Calling this twice on the same
/// value is undefined behavior; callers track whether they already did.
pub unsafe fn drop_in_place<T>(ptr: *mut T) {
    std::ptr::drop_in_place(ptr)
}

/// Emits `#[no_mangle] extern "C"` glue for each listed type: a `drop`
/// entry point and, optionally, a `new` entry point that default-constructs
/// the value in place.
///
/// ```ignore
/// extern_drop_glue! {
///     BridgeString: new = my_string_new, drop = my_string_drop;
///     OwnPromiseNode: drop = my_promise_node_drop;
/// }
/// ```
#[macro_export]
macro_rules! extern_drop_glue {
    ($($ty:ty: $(new = $new:ident,)? drop = $drop:ident;)*) => {
        $(
            $(
                #[no_mangle]
                pub unsafe extern "C" fn $new(ptr: *mut $ty) {
                    $crate::glue::new_in_place(ptr, <$ty as ::std::default::Default>::default())
                }
            )?

            #[no_mangle]
            pub unsafe extern "C" fn $drop(ptr: *mut $ty) {
                $crate::glue::drop_in_place(ptr)
            }
        )*
    };
}

#[cfg(test)]
mod glue_test {
    use super::*;
    use crate::transfer_types::BridgeString;
    use std::{cell::Cell, mem::MaybeUninit, rc::Rc};

    struct Counted(Rc<Cell<usize>>);

    impl Drop for Counted {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_new_then_drop_in_place() {
        let drops = Rc::new(Cell::new(0));
        let mut slot = MaybeUninit::<Counted>::uninit();

        unsafe {
            new_in_place(slot.as_mut_ptr(), Counted(drops.clone()));
            assert_eq!(drops.get(), 0);
            drop_in_place(slot.as_mut_ptr());
        }
        assert_eq!(drops.get(), 1);
    }

    mod generated {
        use crate::transfer_types::BridgeString;

        crate::extern_drop_glue! {
            BridgeString: new = glue_test_string_new, drop = glue_test_string_drop;
        }
    }

    #[test]
    fn test_generated_glue() {
        let mut slot = MaybeUninit::<BridgeString>::uninit();
        unsafe {
            generated::glue_test_string_new(slot.as_mut_ptr());
            (*slot.as_mut_ptr()).push_str("in place");
            assert_eq!(&*slot.as_ptr(), "in place");
            generated::glue_test_string_drop(slot.as_mut_ptr());
        }
    }
}
