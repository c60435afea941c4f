//! Value types whose layout is fixed so they can be passed across the
//! boundary by value.

mod maybe;
mod owned_box;
mod result;
mod shared;
mod slice;
mod string;
mod vector;

pub use self::{
    maybe::{Maybe, MaybeRef},
    owned_box::{Disposer, OwnedBox},
    result::{write_result, BridgeResult, MessageBuf},
    shared::{ControlBlock, SharedHandle, WeakHandle},
    slice::{Slice, SliceMut},
    string::{BridgeString, StringView},
    vector::BridgeVec,
};
