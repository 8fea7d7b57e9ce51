// src/engine/common.rs
//
// Common utilities shared across engine modules.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tracing::error;

/// Run `f`, turning a panic into an error message instead of unwinding into
/// the worker thread.
pub fn run_with_panic_policy<T>(stage: &'static str, f: impl FnOnce() -> T) -> Result<T, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = format!("{stage} panicked: {}", panic_message(payload.as_ref()));
        error!(stage, %message, "task body panicked");
        message
    })
}

pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}
