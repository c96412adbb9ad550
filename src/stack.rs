//! Call-stack capture for raise sites.
//!
//! Stacks are captured as text with `std::backtrace::Backtrace::force_capture`,
//! independent of `RUST_BACKTRACE`. Capture is the expensive part of a raise,
//! so it can be switched off per thread:
//!
//! ```rust
//! use dispatch_errors::stack::{self, CapturePolicy};
//!
//! stack::set_capture_policy(CapturePolicy::Never);
//! assert!(stack::capture().is_empty());
//! stack::reset_capture_policy();
//! ```
//!
//! The policy is thread-local: a latency-sensitive worker can disable capture
//! without affecting the rest of the process.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::Cell;

/// Whether raise sites on this thread capture a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapturePolicy {
    /// Capture on every stack-capturing raise (default).
    #[default]
    Always,
    /// Never capture; every raise behaves like its no-stack variant.
    Never,
}

thread_local! {
    static CAPTURE_POLICY: Cell<CapturePolicy> = const { Cell::new(CapturePolicy::Always) };
}

/// Set the capture policy for the current thread.
#[inline]
pub fn set_capture_policy(policy: CapturePolicy) {
    CAPTURE_POLICY.with(|p| p.set(policy));
}

/// Current capture policy for this thread.
#[inline]
pub fn capture_policy() -> CapturePolicy {
    CAPTURE_POLICY.with(Cell::get)
}

/// Restore the default policy ([`CapturePolicy::Always`]).
#[inline]
pub fn reset_capture_policy() {
    set_capture_policy(CapturePolicy::Always);
}

/// Capture the current call stack as text.
///
/// Returns an empty string when the thread policy is [`CapturePolicy::Never`]
/// or when the platform cannot produce a backtrace.
pub fn capture() -> String {
    match capture_policy() {
        CapturePolicy::Never => String::new(),
        CapturePolicy::Always => force_capture(),
    }
}

/// Capture the current call stack regardless of the thread policy.
///
/// Used when a foreign panic is normalized: that error has no raise site of
/// its own, so the recovery point's stack is all there is.
pub fn force_capture() -> String {
    let trace = Backtrace::force_capture();
    match trace.status() {
        BacktraceStatus::Captured => trace.to_string(),
        _ => String::new(),
    }
}
