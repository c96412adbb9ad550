//! Error code space - classification integers and code groups.
//!
//! A classified error carries an `i64` code. Two values are reserved and can
//! never be used to register a specific or group handler:
//!
//! - [`FALLBACK_CODE`] (`i64::MIN`): "unclassified". Every raise that does not
//!   pick a code, and every foreign panic normalized by the dispatcher, uses it.
//! - [`RESERVED_CODE`] (`0`): never a real classification.
//!
//! Both are frozen `const`s. There is no runtime knob to move them.
//!
//! # Example
//!
//! ```rust
//! use dispatch_errors::{define_codes, CodeGroup, codes};
//!
//! define_codes! {
//!     BAD_REQUEST = 400,
//!     UNAUTHORIZED = 401,
//!     NOT_FOUND = 404,
//! }
//!
//! let client_errors = CodeGroup::from([BAD_REQUEST, UNAUTHORIZED, NOT_FOUND]);
//! assert!(client_errors.contains(NOT_FOUND));
//! assert!(!codes::is_reserved(NOT_FOUND));
//! ```

use smallvec::SmallVec;
use std::fmt;

/// Code carried by errors that were raised without a classification.
pub const FALLBACK_CODE: i64 = i64::MIN;

/// Code that must never be used as a classification.
pub const RESERVED_CODE: i64 = 0;

/// Returns `true` for the two codes that are closed to handler registration.
#[inline]
pub const fn is_reserved(code: i64) -> bool {
    code == RESERVED_CODE || code == FALLBACK_CODE
}

/// Validate a code in const context.
///
/// # Panics
///
/// Panics at compile time (in const items) if `code` is reserved.
#[inline]
pub const fn checked_code(code: i64) -> i64 {
    assert!(!is_reserved(code), "error code 0 and FALLBACK_CODE are reserved");
    code
}

/// Define named error code constants with compile-time rejection of reserved values.
///
/// ```rust
/// # use dispatch_errors::define_codes;
/// define_codes! {
///     /// Upstream did not answer in time.
///     UPSTREAM_TIMEOUT = 504,
///     QUOTA_EXCEEDED = 429,
/// }
/// assert_eq!(UPSTREAM_TIMEOUT, 504);
/// ```
///
/// ```rust,compile_fail
/// # use dispatch_errors::define_codes;
/// define_codes! { NOTHING = 0 }
/// ```
#[macro_export]
macro_rules! define_codes {
    ($( $(#[$meta:meta])* $name:ident = $code:expr ),+ $(,)?) => {
        $(
            $(#[$meta])*
            pub const $name: i64 = $crate::codes::checked_code($code);
        )+
    };
}

/// The codes sharing one group handler.
///
/// Reserved codes are dropped on construction. Duplicates are kept: a group
/// handler fires once per occurrence of the raised code. Most groups are
/// small (a handful of HTTP-like codes), so storage stays inline up to eight
/// entries.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CodeGroup {
    codes: SmallVec<[i64; 8]>,
}

impl CodeGroup {
    /// Create an empty group.
    #[inline]
    pub fn new() -> Self {
        Self {
            codes: SmallVec::new(),
        }
    }

    /// Append a code. Reserved codes are ignored.
    ///
    /// Returns `true` if the code was added.
    pub fn insert(&mut self, code: i64) -> bool {
        if is_reserved(code) {
            return false;
        }
        self.codes.push(code);
        true
    }

    /// Membership test.
    #[inline]
    pub fn contains(&self, code: i64) -> bool {
        self.codes.contains(&code)
    }

    /// How many times `code` was added.
    #[inline]
    pub fn occurrences(&self, code: i64) -> usize {
        self.codes.iter().filter(|c| **c == code).count()
    }

    /// `true` if no usable code was added.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Number of entries, duplicates included.
    #[inline]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Codes in insertion order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.codes.iter().copied()
    }
}

impl FromIterator<i64> for CodeGroup {
    fn from_iter<I: IntoIterator<Item = i64>>(iter: I) -> Self {
        let mut group = Self::new();
        for code in iter {
            group.insert(code);
        }
        group
    }
}

impl<const N: usize> From<[i64; N]> for CodeGroup {
    fn from(codes: [i64; N]) -> Self {
        codes.into_iter().collect()
    }
}

impl From<&[i64]> for CodeGroup {
    fn from(codes: &[i64]) -> Self {
        codes.iter().copied().collect()
    }
}

impl From<Vec<i64>> for CodeGroup {
    fn from(codes: Vec<i64>) -> Self {
        codes.into_iter().collect()
    }
}

impl fmt::Debug for CodeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.codes.iter()).finish()
    }
}

/// Render a code for logs: `FALLBACK` for the sentinel, the number otherwise.
pub(crate) struct DisplayCode(pub(crate) i64);

impl fmt::Display for DisplayCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == FALLBACK_CODE {
            f.write_str("FALLBACK")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    define_codes! {
        TEST_NOT_FOUND = 404,
        TEST_NEGATIVE = -7,
    }

    #[test]
    fn reserved_codes() {
        assert!(is_reserved(0));
        assert!(is_reserved(FALLBACK_CODE));
        assert!(!is_reserved(1));
        assert!(!is_reserved(-1));
        assert!(!is_reserved(i64::MAX));
    }

    #[test]
    fn define_codes_produces_constants() {
        assert_eq!(TEST_NOT_FOUND, 404);
        assert_eq!(TEST_NEGATIVE, -7);
    }

    #[test]
    fn group_drops_reserved_and_keeps_duplicates() {
        let group = CodeGroup::from([400, 0, 401, FALLBACK_CODE, 400]);
        assert_eq!(group.len(), 3);
        assert_eq!(group.iter().collect::<Vec<_>>(), vec![400, 401, 400]);
        assert_eq!(group.occurrences(400), 2);
        assert_eq!(group.occurrences(401), 1);
        assert_eq!(group.occurrences(404), 0);
    }

    #[test]
    fn group_of_only_reserved_codes_is_empty() {
        let group = CodeGroup::from(vec![0, FALLBACK_CODE]);
        assert!(group.is_empty());
    }

    #[test]
    fn group_spills_past_inline_capacity() {
        let group: CodeGroup = (1..=20).collect();
        assert_eq!(group.len(), 20);
        assert!(group.contains(20));
    }

    #[test]
    fn display_code_names_fallback() {
        assert_eq!(DisplayCode(FALLBACK_CODE).to_string(), "FALLBACK");
        assert_eq!(DisplayCode(404).to_string(), "404");
    }
}
