use crate::CResult;
use interlink::{
    panic_catcher_disable, panic_catcher_enable, panic_catcher_set_fallback_mode,
    panic_catcher_set_hook, PanicCatcherFallbackMode,
};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::panic::UnwindSafe;

/// Mirrors `INTERLINK_PANIC_CATCHER_FALLBACK_MODE_*` in the header.
#[repr(u8)]
#[derive(Clone, Copy, Debug, IntoPrimitive, TryFromPrimitive)]
pub enum CPanicCatcherFallbackMode {
    Continue = 0u8,
    Abort = 1u8,
}

impl From<CPanicCatcherFallbackMode> for PanicCatcherFallbackMode {
    fn from(mode: CPanicCatcherFallbackMode) -> Self {
        match mode {
            CPanicCatcherFallbackMode::Continue => PanicCatcherFallbackMode::Continue,
            CPanicCatcherFallbackMode::Abort => PanicCatcherFallbackMode::Abort,
        }
    }
}

/// Runs the body of the exported function `entry_point`.
///
/// A returned error passes through as is. A panic comes back as an error
/// prefixed with `entry_point`, so native callers can tell a broken
/// invariant from an ordinary failure.
#[inline(always)]
pub(crate) fn catch_panic<F, T>(entry_point: &'static str, f: F) -> CResult<T>
where
    F: FnOnce() -> Result<T, String> + UnwindSafe,
{
    match interlink::catch_panic(f) {
        Ok(Ok(ok)) => CResult::Ok(ok),
        Ok(Err(msg)) => CResult::Err(msg.into()),
        Err(panic) => CResult::Err(format!("{entry_point} panicked: {panic}").into()),
    }
}

#[no_mangle]
pub extern "C" fn interlink_set_panic_catcher_hook() {
    panic_catcher_set_hook()
}

/// Takes one of `INTERLINK_PANIC_CATCHER_FALLBACK_MODE_*`.
#[no_mangle]
pub extern "C" fn interlink_set_panic_catcher_fallback_mode(fallback_mode: u8) -> CResult<bool> {
    match CPanicCatcherFallbackMode::try_from(fallback_mode) {
        Ok(mode) => {
            panic_catcher_set_fallback_mode(mode.into());
            CResult::Ok(true)
        }
        Err(_) => CResult::Err(format!("unknown panic catcher fallback mode {fallback_mode}").into()),
    }
}

#[no_mangle]
pub extern "C" fn interlink_enable_panic_catcher() {
    panic_catcher_enable()
}

#[no_mangle]
pub extern "C" fn interlink_disable_panic_catcher() {
    panic_catcher_disable()
}
