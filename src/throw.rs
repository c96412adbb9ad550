//! Raise primitives.
//!
//! Every function here unwinds with a [`ClassifiedError`] payload (or [`Pass`])
//! and returns `!`. They come in four shapes:
//!
//! - explicit code: [`throw`], [`throw_no_stack`]
//! - unclassified ([`FALLBACK_CODE`]): [`fail`]
//! - conditional: [`throw_if`], [`throw_unless`], [`throw_code_if`], [`throw_code_unless`]
//! - from a `Result`: [`check`], [`check_code`], [`check_fn`] and the [`OrThrow`] trait
//!
//! Each has a `_with_context` form attaching one context entry. The no-stack
//! variants skip stack capture for latency-sensitive call sites; everything
//! else captures according to the thread's [`stack::CapturePolicy`](crate::stack::CapturePolicy).
//!
//! Errors converted from a `Result` use the error's `Display` text as message.

use crate::codes::FALLBACK_CODE;
use crate::context::ContextValue;
use crate::{ClassifiedError, Pass};
use std::borrow::Cow;
use std::fmt;
use std::panic;

/// Raise `code` with a captured stack.
#[inline]
pub fn throw(code: i64, message: impl Into<Cow<'static, str>>) -> ! {
    ClassifiedError::new(code, message).raise()
}

/// Raise `code` with a captured stack and one context entry.
#[inline]
pub fn throw_with_context(
    code: i64,
    message: impl Into<Cow<'static, str>>,
    key: impl Into<Cow<'static, str>>,
    value: impl Into<ContextValue>,
) -> ! {
    ClassifiedError::new(code, message)
        .with_context(key, value)
        .raise()
}

/// Raise `code` without capturing a stack.
#[inline]
pub fn throw_no_stack(code: i64, message: impl Into<Cow<'static, str>>) -> ! {
    ClassifiedError::without_stack(code, message).raise()
}

/// Raise `code` without capturing a stack, with one context entry.
#[inline]
pub fn throw_no_stack_with_context(
    code: i64,
    message: impl Into<Cow<'static, str>>,
    key: impl Into<Cow<'static, str>>,
    value: impl Into<ContextValue>,
) -> ! {
    ClassifiedError::without_stack(code, message)
        .with_context(key, value)
        .raise()
}

/// Raise an unclassified error.
#[inline]
pub fn fail(message: impl Into<Cow<'static, str>>) -> ! {
    throw(FALLBACK_CODE, message)
}

/// [`fail`] with one context entry.
#[inline]
pub fn fail_with_context(
    message: impl Into<Cow<'static, str>>,
    key: impl Into<Cow<'static, str>>,
    value: impl Into<ContextValue>,
) -> ! {
    throw_with_context(FALLBACK_CODE, message, key, value)
}

/// Abort the enclosing protected block without classification.
///
/// The dispatcher swallows it: no handler runs, nothing propagates.
#[inline]
pub fn pass() -> ! {
    panic::resume_unwind(Box::new(Pass))
}

// ============================================================================
// Conditional raises
// ============================================================================

/// Raise an unclassified error when `condition` holds.
#[inline]
pub fn throw_if(condition: bool, message: impl Into<Cow<'static, str>>) {
    if condition {
        fail(message);
    }
}

/// [`throw_if`] with one context entry.
#[inline]
pub fn throw_if_with_context(
    condition: bool,
    message: impl Into<Cow<'static, str>>,
    key: impl Into<Cow<'static, str>>,
    value: impl Into<ContextValue>,
) {
    if condition {
        fail_with_context(message, key, value);
    }
}

/// Raise an unclassified error unless `condition` holds.
#[inline]
pub fn throw_unless(condition: bool, message: impl Into<Cow<'static, str>>) {
    throw_if(!condition, message);
}

/// [`throw_unless`] with one context entry.
#[inline]
pub fn throw_unless_with_context(
    condition: bool,
    message: impl Into<Cow<'static, str>>,
    key: impl Into<Cow<'static, str>>,
    value: impl Into<ContextValue>,
) {
    throw_if_with_context(!condition, message, key, value);
}

/// Raise `code` when `condition` holds.
#[inline]
pub fn throw_code_if(code: i64, condition: bool, message: impl Into<Cow<'static, str>>) {
    if condition {
        throw(code, message);
    }
}

/// [`throw_code_if`] with one context entry.
#[inline]
pub fn throw_code_if_with_context(
    code: i64,
    condition: bool,
    message: impl Into<Cow<'static, str>>,
    key: impl Into<Cow<'static, str>>,
    value: impl Into<ContextValue>,
) {
    if condition {
        throw_with_context(code, message, key, value);
    }
}

/// Raise `code` unless `condition` holds.
#[inline]
pub fn throw_code_unless(code: i64, condition: bool, message: impl Into<Cow<'static, str>>) {
    throw_code_if(code, !condition, message);
}

/// [`throw_code_unless`] with one context entry.
#[inline]
pub fn throw_code_unless_with_context(
    code: i64,
    condition: bool,
    message: impl Into<Cow<'static, str>>,
    key: impl Into<Cow<'static, str>>,
    value: impl Into<ContextValue>,
) {
    throw_code_if_with_context(code, !condition, message, key, value);
}

// ============================================================================
// Result conversions
// ============================================================================

/// Raise an unclassified error if `result` is `Err`.
#[inline]
pub fn check<E: fmt::Display>(result: Result<(), E>) {
    if let Err(e) = result {
        fail(e.to_string());
    }
}

/// [`check`] with one context entry.
#[inline]
pub fn check_with_context<E: fmt::Display>(
    result: Result<(), E>,
    key: impl Into<Cow<'static, str>>,
    value: impl Into<ContextValue>,
) {
    if let Err(e) = result {
        fail_with_context(e.to_string(), key, value);
    }
}

/// Raise `code` if `result` is `Err`.
#[inline]
pub fn check_code<E: fmt::Display>(code: i64, result: Result<(), E>) {
    if let Err(e) = result {
        throw(code, e.to_string());
    }
}

/// [`check_code`] with one context entry.
#[inline]
pub fn check_code_with_context<E: fmt::Display>(
    code: i64,
    result: Result<(), E>,
    key: impl Into<Cow<'static, str>>,
    value: impl Into<ContextValue>,
) {
    if let Err(e) = result {
        throw_with_context(code, e.to_string(), key, value);
    }
}

/// Call `f` and raise an unclassified error if it fails.
#[inline]
pub fn check_fn<E: fmt::Display>(f: impl FnOnce() -> Result<(), E>) {
    check(f());
}

/// [`check_fn`] with one context entry.
#[inline]
pub fn check_fn_with_context<E: fmt::Display>(
    f: impl FnOnce() -> Result<(), E>,
    key: impl Into<Cow<'static, str>>,
    value: impl Into<ContextValue>,
) {
    check_with_context(f(), key, value);
}

/// Unwrap a `Result`, raising on `Err`.
///
/// ```rust
/// use dispatch_errors::{catch, OrThrow};
///
/// let port: u16 = catch(|| "8080".parse::<u16>().or_throw()).unwrap();
/// assert_eq!(port, 8080);
///
/// let err = catch(|| "http".parse::<u16>().or_throw_code(400)).unwrap_err();
/// assert_eq!(err.code(), 400);
/// assert_eq!(err.message(), "invalid digit found in string");
/// ```
pub trait OrThrow<T> {
    /// Raise an unclassified error on `Err`.
    fn or_throw(self) -> T;

    /// Raise `code` on `Err`.
    fn or_throw_code(self, code: i64) -> T;

    /// Raise an unclassified error with one context entry on `Err`.
    fn or_throw_with_context(
        self,
        key: impl Into<Cow<'static, str>>,
        value: impl Into<ContextValue>,
    ) -> T;

    /// Raise `code` with one context entry on `Err`.
    fn or_throw_code_with_context(
        self,
        code: i64,
        key: impl Into<Cow<'static, str>>,
        value: impl Into<ContextValue>,
    ) -> T;
}

impl<T, E: fmt::Display> OrThrow<T> for Result<T, E> {
    #[inline]
    fn or_throw(self) -> T {
        self.or_throw_code(FALLBACK_CODE)
    }

    #[inline]
    fn or_throw_code(self, code: i64) -> T {
        match self {
            Ok(value) => value,
            Err(e) => throw(code, e.to_string()),
        }
    }

    #[inline]
    fn or_throw_with_context(
        self,
        key: impl Into<Cow<'static, str>>,
        value: impl Into<ContextValue>,
    ) -> T {
        self.or_throw_code_with_context(FALLBACK_CODE, key, value)
    }

    #[inline]
    fn or_throw_code_with_context(
        self,
        code: i64,
        key: impl Into<Cow<'static, str>>,
        value: impl Into<ContextValue>,
    ) -> T {
        match self {
            Ok(value) => value,
            Err(e) => throw_with_context(code, e.to_string(), key, value),
        }
    }
}
