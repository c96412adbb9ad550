//! Structured log view of a classified error.
//!
//! [`ErrorLog`] borrows from a [`ClassifiedError`] and cannot outlive it. The
//! dispatcher builds one for every `tracing` event it emits, and handlers can
//! do the same with [`ClassifiedError::log`].
//!
//! Every field is truncated to [`MAX_FIELD_OUTPUT_LEN`] bytes on a UTF-8
//! boundary, with a visible marker, so one oversized message or context value
//! cannot flood a log sink. The stack is summarized as a frame count; the full
//! text is only rendered by `format_for_trusted_debug` (feature
//! `trusted_debug`, debug builds).

use crate::ClassifiedError;
use crate::codes::DisplayCode;
use crate::context::ContextMap;
use std::borrow::Cow;
use std::fmt;

/// Maximum length for any individual field in formatted output.
pub const MAX_FIELD_OUTPUT_LEN: usize = 1024;

/// Truncation indicator appended to truncated strings.
const TRUNCATION_INDICATOR: &str = "...[TRUNCATED]";

/// Borrowed, short-lived view of a [`ClassifiedError`].
///
/// ```rust
/// # use dispatch_errors::ClassifiedError;
/// let err = ClassifiedError::without_stack(404, "not found").with_context("user", 7);
/// let mut line = String::new();
/// err.log().write_to(&mut line).unwrap();
/// assert_eq!(line, "[404] message='not found' user='7'");
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ErrorLog<'a> {
    code: i64,
    message: &'a str,
    stack: &'a str,
    context: Option<&'a ContextMap>,
}

impl<'a> ErrorLog<'a> {
    pub(crate) fn new(err: &'a ClassifiedError) -> Self {
        Self {
            code: err.code(),
            message: err.message(),
            stack: err.stack(),
            context: err.context(),
        }
    }

    /// Error code.
    #[inline]
    pub const fn code(&self) -> i64 {
        self.code
    }

    /// Untruncated message.
    #[inline]
    pub const fn message(&self) -> &'a str {
        self.message
    }

    /// Untruncated stack text.
    #[inline]
    pub const fn stack(&self) -> &'a str {
        self.stack
    }

    /// Context map, if one was set.
    #[inline]
    pub const fn context(&self) -> Option<&'a ContextMap> {
        self.context
    }

    /// Number of lines in the captured stack, zero if none was captured.
    pub fn stack_depth(&self) -> usize {
        self.stack.lines().filter(|l| !l.trim().is_empty()).count()
    }

    /// Write a single-line record without intermediate allocation for fields
    /// that fit the length cap.
    pub fn write_to(&self, f: &mut impl fmt::Write) -> fmt::Result {
        write!(
            f,
            "[{}] message='{}'",
            DisplayCode(self.code),
            truncate_with_indicator(self.message)
        )?;

        if let Some(context) = self.context {
            for (key, value) in context.iter() {
                let rendered = value.to_string();
                write!(
                    f,
                    " {}='{}'",
                    truncate_with_indicator(key),
                    truncate_with_indicator(&rendered)
                )?;
            }
        }

        let depth = self.stack_depth();
        if depth > 0 {
            write!(f, " stack=<{depth} lines>")?;
        }

        Ok(())
    }

    /// Full multi-line dump, stack included.
    ///
    /// Only available with the `trusted_debug` feature in debug builds: stacks
    /// reveal file paths and internal structure.
    #[cfg(all(feature = "trusted_debug", debug_assertions))]
    pub fn format_for_trusted_debug(&self) -> String {
        let mut output = format!("[{}] {}", DisplayCode(self.code), self.message);

        if let Some(context) = self.context {
            for (key, value) in context.iter() {
                output.push_str(&format!("\n  {key} ({}) = {value}", value.kind()));
            }
        }

        if !self.stack.is_empty() {
            output.push_str("\nstack:\n");
            output.push_str(self.stack);
        }

        output
    }
}

impl fmt::Display for ErrorLog<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_to(f)
    }
}

/// Truncate a string for display.
///
/// Returns a Cow<str> to avoid allocation when no truncation is needed.
fn truncate_with_indicator(s: &str) -> Cow<'_, str> {
    if s.len() <= MAX_FIELD_OUTPUT_LEN {
        return Cow::Borrowed(s);
    }

    let max_content_len = MAX_FIELD_OUTPUT_LEN.saturating_sub(TRUNCATION_INDICATOR.len());

    let mut idx = max_content_len;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }

    if idx == 0 {
        return Cow::Borrowed(TRUNCATION_INDICATOR);
    }

    let mut result = String::with_capacity(idx + TRUNCATION_INDICATOR.len());
    result.push_str(&s[..idx]);
    result.push_str(TRUNCATION_INDICATOR);
    Cow::Owned(result)
}
