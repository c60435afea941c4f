//! Keeps managed-side panics from unwinding into native frames.
//!
//! Every entry point that native code can reach (a poll callback, a drop
//! callback, an exported `extern "C"` function) runs its body inside
//! [`catch_panic`]. The panic then travels back as an error message over
//! the same channel a regular failure would use.
//!
//! With the hook installed and the catcher enabled on a thread, the
//! message is replaced by a report naming where the panic happened and a
//! backtrace of the managed frames.

use backtrace::Backtrace;
use std::any::Any;
use std::cell::RefCell;
use std::fmt::Write as _;
use std::io::{self, Write as _};
use std::panic::{PanicHookInfo, UnwindSafe};
use std::process::abort;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::error;

/// What the hook does with a panic raised outside any boundary call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PanicCatcherFallbackMode {
    /// Hand the panic to the previously installed hook.
    Continue,
    /// Print the report and abort the process.
    Abort,
}

struct CatcherState {
    enabled: bool,
    // Boundary calls currently on this thread's stack that want a report.
    depth: u32,
    fallback: PanicCatcherFallbackMode,
    // Report of the last panic caught inside a boundary call.
    report: String,
}

thread_local! {
    static CATCHER: RefCell<CatcherState> = const {
        RefCell::new(CatcherState {
            enabled: false,
            depth: 0,
            fallback: PanicCatcherFallbackMode::Continue,
            report: String::new(),
        })
    };
}

static HOOK_INSTALLED: AtomicBool = AtomicBool::new(false);

fn enter_boundary() -> bool {
    CATCHER.with(|state| {
        let mut state = state.borrow_mut();
        if !state.enabled {
            return false;
        }
        match state.depth.checked_add(1) {
            Some(depth) => state.depth = depth,
            None => abort(),
        }
        true
    })
}

fn leave_boundary() {
    CATCHER.with(|state| {
        let mut state = state.borrow_mut();
        match state.depth.checked_sub(1) {
            Some(depth) => state.depth = depth,
            None => abort(),
        }
    })
}

/// The report recorded for the last panic caught by a boundary call on
/// the current thread.
pub fn panic_catcher_get_backtrace() -> Option<String> {
    CATCHER.with(|state| {
        let state = state.borrow();
        (!state.report.is_empty()).then(|| state.report.clone())
    })
}

/// Returns the previous mode.
pub fn panic_catcher_set_fallback_mode(mode: PanicCatcherFallbackMode) -> PanicCatcherFallbackMode {
    CATCHER.with(|state| std::mem::replace(&mut state.borrow_mut().fallback, mode))
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_owned()
    }
}

/// Runs the body of a boundary call, turning a panic into its message.
///
/// This always catches, whatever the catcher state is. The message is the
/// panic payload, or the full report when this thread has the catcher
/// enabled and the hook is installed.
#[inline(always)]
pub fn catch_panic<F, T>(f: F) -> Result<T, String>
where
    F: FnOnce() -> T + UnwindSafe,
{
    let reporting = enter_boundary();
    let result = std::panic::catch_unwind(f);
    if reporting {
        leave_boundary();
    }
    result.map_err(|payload| {
        let report = if reporting && HOOK_INSTALLED.load(Ordering::SeqCst) {
            panic_catcher_get_backtrace()
        } else {
            None
        };
        report.unwrap_or_else(|| payload_message(&*payload))
    })
}

fn write_report(info: &PanicHookInfo<'_>, out: &mut String) {
    let (file, line) = info
        .location()
        .map_or(("<unknown>", 0), |loc| (loc.file(), loc.line()));
    out.clear();
    let _ = write!(
        out,
        "managed code panicked at {}:{} on thread '{}': {}\n{:?}\n",
        file,
        line,
        std::thread::current().name().unwrap_or("<unnamed>"),
        payload_message(info.payload()),
        Backtrace::new()
    );
}

/// Installs the process-wide hook. Later calls do nothing.
pub fn panic_catcher_set_hook() {
    if HOOK_INSTALLED.swap(true, Ordering::SeqCst) {
        return;
    }
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let fallback = CATCHER.with(|state| {
            let mut state = state.borrow_mut();
            if state.depth > 0 {
                let mut report = std::mem::take(&mut state.report);
                write_report(info, &mut report);
                state.report = report;
                None
            } else {
                Some(state.fallback)
            }
        });
        match fallback {
            None => {}
            Some(PanicCatcherFallbackMode::Continue) => previous(info),
            Some(PanicCatcherFallbackMode::Abort) => {
                let mut report = String::new();
                write_report(info, &mut report);
                error!("panic outside any boundary call, aborting");
                let _ = io::stderr().write_all(report.as_bytes());
                abort();
            }
        }
    }));
}

/// Turns on reports for panics caught on this thread.
pub fn panic_catcher_enable() {
    CATCHER.with(|state| state.borrow_mut().enabled = true);
}

pub fn panic_catcher_disable() {
    CATCHER.with(|state| state.borrow_mut().enabled = false);
}

#[cfg(test)]
mod panic_test {
    use super::*;

    #[test]
    #[cfg_attr(miri, ignore)]
    #[should_panic(expected = r#"unhandled outside a boundary"#)]
    fn test_hook_passes_panics_outside_boundary_calls_through() {
        panic_catcher_set_hook();
        panic!("unhandled outside a boundary");
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    #[should_panic(expected = r#"unhandled after disable"#)]
    fn test_disabled_catcher_passes_panics_through() {
        panic_catcher_set_hook();
        panic_catcher_enable();
        panic_catcher_disable();
        panic!("unhandled after disable");
    }

    #[test]
    fn test_catch_panic_without_report_uses_payload() {
        match catch_panic::<_, ()>(|| panic!("poll callback {}", "failed")) {
            Ok(_) => unreachable!(),
            Err(msg) => assert_eq!(msg, "poll callback failed"),
        }
        assert_eq!(catch_panic(|| 7), Ok(7));
    }

    #[test]
    fn test_non_string_payload_has_a_message() {
        let err = catch_panic::<_, ()>(|| std::panic::panic_any(17u8)).unwrap_err();
        assert_eq!(err, "<non-string panic payload>");
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_enabled_catcher_reports_location() {
        panic_catcher_set_hook();
        panic_catcher_enable();
        match catch_panic::<_, ()>(|| panic!("drop callback failed")) {
            Ok(_) => unreachable!(),
            Err(msg) => {
                assert!(msg.starts_with("managed code panicked at "));
                assert!(msg.contains(file!()));
                assert!(msg.contains(": drop callback failed\n"));
            }
        }
        assert!(panic_catcher_get_backtrace().is_some());
        panic_catcher_disable();
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_nested_boundary_calls_report_the_outer_panic() {
        panic_catcher_set_hook();
        assert_eq!(
            panic_catcher_set_fallback_mode(PanicCatcherFallbackMode::Abort),
            PanicCatcherFallbackMode::Continue
        );
        panic_catcher_enable();
        match catch_panic::<_, ()>(|| {
            let inner = catch_panic::<_, ()>(|| panic!("inner poll failed")).unwrap_err();
            assert!(inner.contains("inner poll failed"));
            panic!("outer poll failed")
        }) {
            Ok(_) => unreachable!(),
            Err(msg) => {
                assert!(msg.contains("outer poll failed"));
                assert!(!msg.contains("inner poll failed"));
            }
        }
        panic_catcher_disable();
        panic_catcher_set_fallback_mode(PanicCatcherFallbackMode::Continue);
    }
}
