//! # Dispatch Errors
//!
//! Classified errors raised over unwinding, and a chained dispatcher that
//! decides which handlers see them.
//!
//! ## Design Philosophy
//!
//! 1. **Errors carry a code** so handlers can be chosen by classification
//! 2. **Raising is a non-local exit** that lands at exactly one recovery point
//! 3. **Nothing is swallowed silently**: an error no handler claims is re-raised
//! 4. **Filters can veto** dispatch entirely, before any handler runs
//! 5. **Finalizers always run**, on every exit path
//!
//! ## Handler Resolution
//!
//! For a raised error with code `c`:
//!
//! - Filters run in registration order; the first `false` discards the error
//! - The specific handler for `c` runs, if any
//! - Every group handler whose group contains `c` runs, in registration order
//! - The fallback handler runs only if no specific handler matched
//! - The global handler runs last, every time
//!
//! ## Quick Start
//!
//! ```rust
//! use dispatch_errors::{protect, throw_with_context, Outcome};
//!
//! let mut not_found = Vec::new();
//!
//! let outcome = protect(|| throw_with_context(404, "user not found", "user_id", 42))
//!     .on_code(404, |err| not_found.push(err.context_i64("user_id")))
//!     .run();
//!
//! assert_eq!(outcome, Outcome::Handled);
//! assert_eq!(not_found, vec![Some(42)]);
//! ```
//!
//! ## Unmatched Errors Propagate
//!
//! ```rust
//! use dispatch_errors::{catch, protect, throw};
//!
//! let escaped = catch(|| {
//!     protect(|| throw(500, "server error"))
//!         .on_code(404, |_| {})
//!         .run();
//! })
//! .unwrap_err();
//!
//! assert_eq!(escaped.code(), 500);
//! ```
//!
//! ## Features
//!
//! - `trusted_debug`: full multi-line error dumps, stack included (debug builds only)

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::borrow::Cow;
use std::fmt;
use std::panic;
use std::result;

pub mod codes;
pub mod context;
pub mod convenience;
pub mod dispatch;
pub mod logging;
pub mod ring_buffer;
pub mod stack;
pub mod throw;

pub use codes::{CodeGroup, FALLBACK_CODE, RESERVED_CODE};
pub use context::{ContextMap, ContextValue};
pub use dispatch::*;
pub use logging::ErrorLog;
pub use ring_buffer::{ErrorJournal, JournalEntry};
pub use throw::*;

/// Type alias for Results carrying a classified error.
pub type Result<T> = result::Result<T, ClassifiedError>;

/// Payload that aborts a protected block without classification.
///
/// A dispatcher that recovers `Pass` completes normally: no handler runs and
/// nothing is re-raised. Raise it with [`pass`](crate::throw::pass).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pass;

/// An error with a classification code, carried across an unwind.
///
/// # Fields
///
/// - `code`: classification, [`FALLBACK_CODE`] when unclassified
/// - `message`: human-readable description, fixed at construction
/// - `stack`: captured call stack, empty when not captured
/// - `context`: key/value pairs, absent until the first write
///
/// # Mutation Discipline
///
/// Context is only changed by the consuming builders [`with_context`] and
/// [`with_context_map`], which take the error by value and hand back the
/// updated one. Handlers see `&ClassifiedError`, so no handler can observe
/// another handler's partial update.
///
/// [`with_context`]: ClassifiedError::with_context
/// [`with_context_map`]: ClassifiedError::with_context_map
#[derive(Clone)]
pub struct ClassifiedError {
    code: i64,
    message: Cow<'static, str>,
    stack: String,
    context: Option<ContextMap>,
}

impl ClassifiedError {
    /// Create an error and capture the current stack (subject to the
    /// thread's [`stack::CapturePolicy`]).
    #[inline]
    pub fn new(code: i64, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            stack: stack::capture(),
            context: None,
        }
    }

    /// Create an error without capturing a stack. For latency-sensitive raise sites.
    #[inline]
    pub fn without_stack(code: i64, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            stack: String::new(),
            context: None,
        }
    }

    /// Create an unclassified error ([`FALLBACK_CODE`]) with a captured stack.
    #[inline]
    pub fn unclassified(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(FALLBACK_CODE, message)
    }

    /// Attach a stack captured elsewhere, replacing any existing one.
    #[inline]
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = stack.into();
        self
    }

    /// Add or replace one context entry. Prior entries are preserved.
    #[inline]
    pub fn with_context(
        mut self,
        key: impl Into<Cow<'static, str>>,
        value: impl Into<ContextValue>,
    ) -> Self {
        self.context
            .get_or_insert_with(ContextMap::new)
            .insert(key, value);
        self
    }

    /// Merge entries into the context, overwriting on key collision.
    ///
    /// Keys not present in `entries` are left untouched.
    pub fn with_context_map<I, K, V>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Cow<'static, str>>,
        V: Into<ContextValue>,
    {
        self.context
            .get_or_insert_with(ContextMap::new)
            .extend(entries);
        self
    }

    /// Look up a context value. `None` if the context is unset or the key absent.
    #[inline]
    pub fn get_context(&self, key: &str) -> Option<&ContextValue> {
        self.context.as_ref().and_then(|ctx| ctx.get(key))
    }

    /// `true` if the context holds `key`.
    #[inline]
    pub fn has_context(&self, key: &str) -> bool {
        self.get_context(key).is_some()
    }

    /// Text context value, `None` if absent or not text.
    #[inline]
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.get_context(key).and_then(ContextValue::as_str)
    }

    /// Integer context value, `None` if absent or not an integer.
    #[inline]
    pub fn context_i64(&self, key: &str) -> Option<i64> {
        self.get_context(key).and_then(ContextValue::as_i64)
    }

    /// Boolean context value.
    #[inline]
    pub fn context_bool(&self, key: &str) -> Option<bool> {
        self.get_context(key).and_then(ContextValue::as_bool)
    }

    /// Downcast an opaque context value.
    #[inline]
    pub fn context_as<T: std::any::Any>(&self, key: &str) -> Option<&T> {
        self.get_context(key).and_then(ContextValue::downcast_ref::<T>)
    }

    /// Get error code
    #[inline]
    pub const fn code(&self) -> i64 {
        self.code
    }

    /// Message fixed at construction.
    #[inline]
    pub fn message(&self) -> &str {
        self.message.as_ref()
    }

    /// Captured stack text, empty if no stack was captured.
    #[inline]
    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// `true` if a stack was captured.
    #[inline]
    pub fn has_stack(&self) -> bool {
        !self.stack.is_empty()
    }

    /// The context map, `None` until the first write.
    #[inline]
    pub fn context(&self) -> Option<&ContextMap> {
        self.context.as_ref()
    }

    /// `true` when the error carries [`FALLBACK_CODE`].
    #[inline]
    pub const fn is_fallback(&self) -> bool {
        self.code == FALLBACK_CODE
    }

    /// Borrowed log view. See [`logging`].
    #[inline]
    pub fn log(&self) -> ErrorLog<'_> {
        ErrorLog::new(self)
    }

    /// Callback form of [`log`](Self::log) for frameworks that consume the
    /// view inside a closure.
    #[inline]
    pub fn with_log<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&ErrorLog<'_>) -> R,
    {
        let log = self.log();
        f(&log)
    }

    /// Unwind with this error as payload.
    ///
    /// Uses `resume_unwind`, so the panic hook is not invoked: a classified
    /// raise is control flow, not a crash report.
    pub fn raise(self) -> ! {
        panic::resume_unwind(Box::new(self))
    }
}

impl PartialEq for ClassifiedError {
    /// Unset and empty context compare equal.
    fn eq(&self, other: &Self) -> bool {
        fn entries(ctx: &Option<ContextMap>) -> Option<&ContextMap> {
            ctx.as_ref().filter(|c| !c.is_empty())
        }

        self.code == other.code
            && self.message == other.message
            && self.stack == other.stack
            && entries(&self.context) == entries(&other.context)
    }
}

impl fmt::Debug for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassifiedError")
            .field("code", &format_args!("{}", codes::DisplayCode(self.code)))
            .field("message", &self.message)
            .field("context", &self.context)
            .field("stack_lines", &self.log().stack_depth())
            .finish()
    }
}

impl fmt::Display for ClassifiedError {
    /// Writes the message only, so the error reads naturally wherever a
    /// standard error is expected.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ClassifiedError {}

#[cfg(test)]
mod unit_tests {
    use super::*;
    use crate::stack::{self, CapturePolicy};

    #[test]
    fn with_context_allocates_lazily() {
        let err = ClassifiedError::without_stack(500, "server error");
        assert!(err.context().is_none());
        assert!(!err.has_context("key1"));

        let err = err.with_context("key1", "value1");
        assert_eq!(err.context_str("key1"), Some("value1"));
    }

    #[test]
    fn with_context_preserves_prior_entries() {
        let err = ClassifiedError::without_stack(500, "server error")
            .with_context("key1", "value1")
            .with_context("key2", 2);

        assert_eq!(err.context_str("key1"), Some("value1"));
        assert_eq!(err.context_i64("key2"), Some(2));
        assert!(err.has_context("key1"));
        assert!(!err.has_context("nonexistent"));
    }

    #[test]
    fn with_context_map_merges_and_overwrites() {
        let err = ClassifiedError::without_stack(400, "bad request")
            .with_context("param1", "old")
            .with_context("kept", true)
            .with_context_map([("param1", "value1"), ("param2", "value2")]);

        assert_eq!(err.context_str("param1"), Some("value1"));
        assert_eq!(err.context_str("param2"), Some("value2"));
        assert_eq!(err.context_bool("kept"), Some(true));
    }

    #[test]
    fn with_context_map_accepts_context_map() {
        let entries: ContextMap = [("a", 1), ("b", 2)].into_iter().collect();
        let err = ClassifiedError::without_stack(1, "x").with_context_map(entries);
        assert_eq!(err.context().map(ContextMap::len), Some(2));
    }

    #[test]
    fn get_context_on_missing_key_never_panics() {
        let err = ClassifiedError::without_stack(1, "x");
        assert!(err.get_context("anything").is_none());
        assert!(err.context_as::<u8>("anything").is_none());
    }

    #[test]
    fn opaque_context_downcasts() {
        #[derive(Debug, PartialEq)]
        struct Tenant(&'static str);

        let err = ClassifiedError::without_stack(1, "x")
            .with_context("tenant", ContextValue::opaque(Tenant("acme")));
        assert_eq!(err.context_as::<Tenant>("tenant"), Some(&Tenant("acme")));
        assert!(err.context_as::<String>("tenant").is_none());
    }

    #[test]
    fn display_is_message() {
        let err = ClassifiedError::without_stack(404, "not found");
        assert_eq!(err.to_string(), "not found");

        let as_std: &dyn std::error::Error = &err;
        assert_eq!(as_std.to_string(), "not found");
    }

    #[test]
    fn new_captures_stack_unless_disabled() {
        stack::reset_capture_policy();
        let with = ClassifiedError::new(1, "x");
        let without = ClassifiedError::without_stack(1, "x");
        assert!(without.stack().is_empty());
        // Backtraces are platform dependent; only assert when one was produced.
        if with.has_stack() {
            assert!(with.log().stack_depth() > 0);
        }

        stack::set_capture_policy(CapturePolicy::Never);
        assert!(!ClassifiedError::new(1, "x").has_stack());
        stack::reset_capture_policy();
    }

    #[test]
    fn unclassified_uses_fallback_code() {
        let err = ClassifiedError::unclassified("oops");
        assert!(err.is_fallback());
        assert_eq!(err.code(), FALLBACK_CODE);
    }

    #[test]
    fn equality_treats_unset_and_empty_context_alike() {
        let a = ClassifiedError::without_stack(1, "x");
        let b = ClassifiedError::without_stack(1, "x")
            .with_context_map(std::iter::empty::<(&'static str, i64)>());
        assert_eq!(a, b);
        assert_ne!(a, b.clone().with_context("k", 1));
    }

    #[test]
    fn raise_unwinds_with_payload() {
        let result: std::thread::Result<()> =
            panic::catch_unwind(|| ClassifiedError::without_stack(418, "teapot").raise());
        let payload = result.unwrap_err();

        let err = payload
            .downcast::<ClassifiedError>()
            .expect("payload should be a ClassifiedError");
        assert_eq!(err.code(), 418);
        assert_eq!(err.message(), "teapot");
    }

    #[test]
    fn debug_hides_stack_text() {
        let err = ClassifiedError::without_stack(7, "x").with_stack("secret/path.rs:1");
        let rendered = format!("{err:?}");
        assert!(!rendered.contains("secret/path.rs"));
        assert!(rendered.contains("stack_lines"));
    }
}
