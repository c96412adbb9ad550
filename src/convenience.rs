//! Convenience macros for raising with format strings.
//!
//! # Usage
//!
//! ```rust
//! # use dispatch_errors::{catch, throw};
//! let shard = 3;
//! let err = catch::<()>(|| throw!(503, "shard {} unavailable", shard)).unwrap_err();
//! assert_eq!(err.code(), 503);
//! assert_eq!(err.message(), "shard 3 unavailable");
//! ```
//!
//! ```rust
//! # use dispatch_errors::{catch, ensure, context};
//! let err = catch(|| ensure!(1 + 1 == 3, 422, "arithmetic is {}", "broken")).unwrap_err();
//! assert_eq!(err.code(), 422);
//!
//! let ctx = context! { "user_id" => 7, "region" => "eu" };
//! assert_eq!(ctx.len(), 2);
//! ```
//!
//! The message argument must be a format literal. Dynamic messages go through
//! the plain functions in [`throw`](crate::throw), which take `Into<Cow<str>>`.

/// Raise a classified error with a formatted message.
///
/// Forms:
///
/// - `throw!(code, "literal")`
/// - `throw!(code, "format {}", args...)`
/// - `throw!(code, "format {}", args...; "key" => value, ...)` with context
#[macro_export]
macro_rules! throw {
    ($code:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::throw::throw($code, ::std::format!($fmt $(, $arg)*))
    };
    ($code:expr, $fmt:literal $(, $arg:expr)*; $($key:expr => $value:expr),+ $(,)?) => {
        $crate::ClassifiedError::new($code, ::std::format!($fmt $(, $arg)*))
            .with_context_map($crate::context! { $($key => $value),+ })
            .raise()
    };
}

/// Raise `code` unless `condition` holds.
///
/// Same message forms as [`throw!`](crate::throw!), minus context.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $code:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
        if !$cond {
            $crate::throw!($code, $fmt $(, $arg)*);
        }
    };
}

/// Build a [`ContextMap`](crate::ContextMap) from `key => value` pairs.
///
/// Later pairs overwrite earlier ones with the same key.
#[macro_export]
macro_rules! context {
    () => {
        $crate::ContextMap::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::ContextMap::new();
        $( map.insert($key, $value); )+
        map
    }};
}
