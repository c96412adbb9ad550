//! The dispatcher: run a protected block, resolve handlers for what it raises.
//!
//! # Lifecycle
//!
//! A [`Dispatcher`] is bound to exactly one protected block by [`protect`],
//! configured by chained registration calls, and consumed by [`run`] or
//! [`run_with_finally`]. It is never reused.
//!
//! # Resolution Order
//!
//! Given the normalized error `e`:
//!
//! 1. Filters, in registration order. The first `false` discards `e`: no
//!    handler runs, not even the global one, and nothing is re-raised.
//! 2. The specific handler for `e.code()`.
//! 3. Every group handler whose group contains `e.code()`, in registration
//!    order, whether or not step 2 ran.
//! 4. The fallback handler, only if step 2 found no specific handler.
//! 5. The global handler, always last.
//!
//! If no filter vetoed and no handler ran, `e` is re-raised into the caller's
//! unwind context. The finalizer runs after all of this, on every path.
//!
//! # Payload Normalization
//!
//! - [`ClassifiedError`]: used as-is, stack and context untouched
//! - [`Pass`]: swallowed, no normalization, no handlers
//! - Anything else (`panic!("...")`, `panic_any(..)`): becomes a
//!   [`FALLBACK_CODE`] error whose message names the payload, with a fresh stack
//!
//! [`run`]: Dispatcher::run
//! [`run_with_finally`]: Dispatcher::run_with_finally

use crate::codes::{CodeGroup, DisplayCode, FALLBACK_CODE, is_reserved};
use crate::context::ContextMap;
use crate::stack;
use crate::{ClassifiedError, Pass};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, trace, warn};

const LOG_TARGET: &str = "dispatch_errors.dispatch";

type Handler<'a> = Box<dyn FnMut(&ClassifiedError) + 'a>;
type Filter<'a> = Box<dyn FnMut(&ClassifiedError) -> bool + 'a>;

/// How a [`Dispatcher::run`] call ended.
///
/// The fourth path, an unhandled error, does not return: it re-raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The protected block returned normally.
    Completed,
    /// The block raised [`Pass`]; it was swallowed.
    Passed,
    /// At least one handler ran.
    Handled,
    /// A filter vetoed dispatch; the error was discarded.
    Filtered,
}

impl Outcome {
    /// `true` if the protected block raised anything.
    #[inline]
    pub const fn raised(self) -> bool {
        !matches!(self, Self::Completed)
    }
}

struct GroupHandler<'a> {
    codes: CodeGroup,
    handler: Handler<'a>,
}

/// Handler registries owned by one dispatcher.
#[derive(Default)]
struct Registry<'a> {
    specific: HashMap<i64, Handler<'a>>,
    groups: Vec<GroupHandler<'a>>,
    global: Option<Handler<'a>>,
    fallback: Option<Handler<'a>>,
    filters: Vec<Filter<'a>>,
}

enum Resolution {
    Filtered,
    Handled,
    Unhandled,
}

impl<'a> Registry<'a> {
    fn resolve(&mut self, err: &ClassifiedError) -> Resolution {
        for (index, filter) in self.filters.iter_mut().enumerate() {
            if !filter(err) {
                debug!(
                    target: LOG_TARGET,
                    filter = index,
                    error = %err.log(),
                    "dispatch suppressed by filter"
                );
                return Resolution::Filtered;
            }
        }

        let code = err.code();
        let mut handled = false;
        let mut has_specific = false;

        if let Some(handler) = self.specific.get_mut(&code) {
            trace!(target: LOG_TARGET, code, "specific handler");
            handler(err);
            has_specific = true;
            handled = true;
        }

        for group in self.groups.iter_mut() {
            // Once per occurrence of `code` in the group.
            for _ in 0..group.codes.occurrences(code) {
                trace!(target: LOG_TARGET, code, group = ?group.codes, "group handler");
                (group.handler)(err);
                handled = true;
            }
        }

        if !has_specific {
            if let Some(handler) = self.fallback.as_mut() {
                trace!(target: LOG_TARGET, code = %DisplayCode(code), "fallback handler");
                handler(err);
                handled = true;
            }
        }

        if let Some(handler) = self.global.as_mut() {
            trace!(target: LOG_TARGET, code = %DisplayCode(code), "global handler");
            handler(err);
            handled = true;
        }

        if handled {
            Resolution::Handled
        } else {
            Resolution::Unhandled
        }
    }
}

/// Runs a protected block and dispatches what it raises.
///
/// Handlers and filters may borrow from the caller for `'a`; they are plain
/// `FnMut` closures and run on the calling thread.
///
/// ```rust
/// use dispatch_errors::{protect, throw, Outcome};
/// use std::cell::RefCell;
///
/// let order = RefCell::new(Vec::new());
///
/// let outcome = protect(|| throw(403, "forbidden"))
///     .on_group([400, 401, 403, 404], |_| order.borrow_mut().push("group"))
///     .on_any(|_| order.borrow_mut().push("any"))
///     .on_unmatched(|_| order.borrow_mut().push("unmatched"))
///     .run();
///
/// assert_eq!(outcome, Outcome::Handled);
/// // No specific handler for 403, so the fallback fires too.
/// assert_eq!(*order.borrow(), ["group", "unmatched", "any"]);
/// ```
#[must_use = "a dispatcher does nothing until `run` or `run_with_finally` is called"]
pub struct Dispatcher<'a, F> {
    block: F,
    registry: Registry<'a>,
}

/// Bind a protected block to a new [`Dispatcher`].
#[inline]
pub fn protect<'a, F: FnOnce()>(block: F) -> Dispatcher<'a, F> {
    Dispatcher::new(block)
}

impl<'a, F: FnOnce()> Dispatcher<'a, F> {
    /// Bind a protected block. Same as [`protect`].
    #[inline]
    pub fn new(block: F) -> Self {
        Self {
            block,
            registry: Registry::default(),
        }
    }

    /// Handle errors with exactly `code`. Last registration for a code wins.
    ///
    /// Ignored for [`RESERVED_CODE`](crate::RESERVED_CODE) and [`FALLBACK_CODE`].
    pub fn on_code(mut self, code: i64, handler: impl FnMut(&ClassifiedError) + 'a) -> Self {
        if is_reserved(code) {
            debug!(
                target: LOG_TARGET,
                code = %DisplayCode(code),
                "ignoring specific handler for reserved code"
            );
            return self;
        }
        self.registry.specific.insert(code, Box::new(handler));
        self
    }

    /// Handle every code in `codes`, in addition to any specific handler.
    ///
    /// Reserved codes in the group are skipped. A group with no usable code
    /// registers nothing. A code listed more than once runs the handler once
    /// per listing.
    pub fn on_group(
        mut self,
        codes: impl Into<CodeGroup>,
        handler: impl FnMut(&ClassifiedError) + 'a,
    ) -> Self {
        let codes = codes.into();
        if codes.is_empty() {
            debug!(target: LOG_TARGET, "ignoring group handler with no usable codes");
            return self;
        }
        self.registry.groups.push(GroupHandler {
            codes,
            handler: Box::new(handler),
        });
        self
    }

    /// Handle every error that reaches resolution, after all other handlers.
    /// Last registration wins.
    pub fn on_any(mut self, handler: impl FnMut(&ClassifiedError) + 'a) -> Self {
        self.registry.global = Some(Box::new(handler));
        self
    }

    /// Handle errors no specific handler claimed. Last registration wins.
    pub fn on_unmatched(mut self, handler: impl FnMut(&ClassifiedError) + 'a) -> Self {
        self.registry.fallback = Some(Box::new(handler));
        self
    }

    /// Add a filter. Returning `false` discards the error: no handler runs
    /// and it is not re-raised. Filters run in registration order.
    pub fn filter(mut self, predicate: impl FnMut(&ClassifiedError) -> bool + 'a) -> Self {
        self.registry.filters.push(Box::new(predicate));
        self
    }

    /// Run the block and dispatch, with no finalizer.
    ///
    /// # Panics
    ///
    /// Re-raises the normalized error when no filter vetoed it and no handler ran.
    #[inline]
    pub fn run(self) -> Outcome {
        self.run_with_finally(|| {})
    }

    /// Run the block, dispatch, then run `finalizer`.
    ///
    /// The finalizer runs exactly once on every path: normal completion,
    /// [`Pass`], handled, filtered, re-raise, and a panicking handler.
    ///
    /// # Panics
    ///
    /// Re-raises the normalized error when no filter vetoed it and no handler ran.
    pub fn run_with_finally(self, finalizer: impl FnOnce()) -> Outcome {
        let _finally = Finally(Some(finalizer));
        let Self {
            block,
            mut registry,
        } = self;

        let payload = match panic::catch_unwind(AssertUnwindSafe(block)) {
            Ok(()) => return Outcome::Completed,
            Err(payload) => payload,
        };

        if payload.is::<Pass>() {
            trace!(target: LOG_TARGET, "protected block passed");
            return Outcome::Passed;
        }

        let err = normalize(payload);
        match registry.resolve(&err) {
            Resolution::Filtered => Outcome::Filtered,
            Resolution::Handled => Outcome::Handled,
            Resolution::Unhandled => {
                warn!(
                    target: LOG_TARGET,
                    error = %err.log(),
                    "no handler claimed error, re-raising"
                );
                err.raise()
            }
        }
    }
}

impl<F> fmt::Debug for Dispatcher<'_, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut codes: Vec<_> = self.registry.specific.keys().copied().collect();
        codes.sort_unstable();
        f.debug_struct("Dispatcher")
            .field("specific", &codes)
            .field(
                "groups",
                &self.registry.groups.iter().map(|g| &g.codes).collect::<Vec<_>>(),
            )
            .field("global", &self.registry.global.is_some())
            .field("fallback", &self.registry.fallback.is_some())
            .field("filters", &self.registry.filters.len())
            .finish()
    }
}

/// Runs the finalizer when dropped, including during unwinding.
struct Finally<G: FnOnce()>(Option<G>);

impl<G: FnOnce()> Drop for Finally<G> {
    fn drop(&mut self) {
        if let Some(finalizer) = self.0.take() {
            finalizer();
        }
    }
}

/// Run `block`, returning what it raised as `Err`.
///
/// The discriminated-result counterpart of a dispatcher: foreign panics are
/// normalized exactly as [`Dispatcher`] does. A [`Pass`] raised inside is
/// re-raised untouched so an enclosing dispatcher can still swallow it.
///
/// ```rust
/// use dispatch_errors::{catch, throw};
///
/// let ok = catch(|| 2 + 2);
/// assert_eq!(ok.unwrap(), 4);
///
/// let err = catch(|| -> i32 { throw(409, "conflict") }).unwrap_err();
/// assert_eq!(err.code(), 409);
/// ```
pub fn catch<T>(block: impl FnOnce() -> T) -> crate::Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(block)) {
        Ok(value) => Ok(value),
        Err(payload) if payload.is::<Pass>() => panic::resume_unwind(payload),
        Err(payload) => Err(normalize(payload)),
    }
}

/// Turn a recovered payload into a classified error.
fn normalize(payload: Box<dyn Any + Send>) -> ClassifiedError {
    match payload.downcast::<ClassifiedError>() {
        Ok(err) => *err,
        Err(payload) => {
            let (text, kind) = describe_payload(payload.as_ref());
            ClassifiedError::without_stack(
                FALLBACK_CODE,
                format!("unexpected panic: {text} (type: {kind})"),
            )
            .with_stack(stack::force_capture())
            .with_context_map(ContextMap::new())
        }
    }
}

fn describe_payload(payload: &(dyn Any + Send)) -> (String, &'static str) {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        ((*s).to_string(), "&str")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        (s.clone(), "String")
    } else {
        (String::from("<opaque>"), "non-string payload")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::throw::{pass, throw, throw_with_context};
    use std::cell::{Cell, RefCell};

    fn unwind_payload(f: impl FnOnce()) -> ClassifiedError {
        let payload = panic::catch_unwind(AssertUnwindSafe(f)).unwrap_err();
        *payload
            .downcast::<ClassifiedError>()
            .expect("re-raised payload should be a ClassifiedError")
    }

    #[test]
    fn specific_handler_receives_error() {
        let mut caught = None;

        let outcome = protect(|| throw(123, "test error"))
            .on_code(123, |err| caught = Some(err.clone()))
            .run();

        assert_eq!(outcome, Outcome::Handled);
        let caught = caught.expect("handler should run");
        assert_eq!(caught.code(), 123);
        assert_eq!(caught.message(), "test error");
    }

    #[test]
    fn last_specific_registration_wins() {
        let hits = RefCell::new(Vec::new());

        protect(|| throw(7, "x"))
            .on_code(7, |_| hits.borrow_mut().push("first"))
            .on_code(7, |_| hits.borrow_mut().push("second"))
            .run();

        assert_eq!(*hits.borrow(), ["second"]);
    }

    #[test]
    fn reserved_codes_are_not_registered() {
        let hits = Cell::new(0);

        let dispatcher = protect(|| throw(FALLBACK_CODE, "x"))
            .on_code(0, |_| hits.set(hits.get() + 1))
            .on_code(FALLBACK_CODE, |_| hits.set(hits.get() + 1))
            .on_group([0, FALLBACK_CODE], |_| hits.set(hits.get() + 1))
            .on_unmatched(|_| {});

        let rendered = format!("{dispatcher:?}");
        assert!(rendered.contains("specific: []"));
        assert!(rendered.contains("groups: []"));

        assert_eq!(dispatcher.run(), Outcome::Handled);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn group_and_global_for_raised_code() {
        let order = RefCell::new(Vec::new());

        protect(|| throw(404, "not found"))
            .on_group([400, 401, 403, 404], |err| {
                assert_eq!(err.code(), 404);
                order.borrow_mut().push("group");
            })
            .on_any(|_| order.borrow_mut().push("global"))
            .run();

        assert_eq!(*order.borrow(), ["group", "global"]);
    }

    #[test]
    fn groups_run_alongside_specific_in_registration_order() {
        let order = RefCell::new(Vec::new());

        protect(|| throw(403, "forbidden"))
            .on_group([403, 404], |_| order.borrow_mut().push("g1"))
            .on_code(403, |_| order.borrow_mut().push("specific"))
            .on_group([400, 403], |_| order.borrow_mut().push("g2"))
            .on_unmatched(|_| order.borrow_mut().push("fallback"))
            .run();

        assert_eq!(*order.borrow(), ["specific", "g1", "g2"]);
    }

    #[test]
    fn duplicate_code_in_one_group_fires_per_occurrence() {
        let order = RefCell::new(Vec::new());

        protect(|| throw(401, "unauthorized"))
            .on_group([401, 403, 401], |_| order.borrow_mut().push("dup"))
            .on_group([401], |_| order.borrow_mut().push("single"))
            .run();

        assert_eq!(*order.borrow(), ["dup", "dup", "single"]);
    }

    #[test]
    fn fallback_and_global_when_no_specific_matches() {
        let unmatched = Cell::new(false);
        let global = Cell::new(false);

        protect(|| throw(999, "unknown error"))
            .on_code(404, |_| panic!("404 handler must not run"))
            .on_unmatched(|_| unmatched.set(true))
            .on_any(|_| global.set(true))
            .run();

        assert!(unmatched.get());
        assert!(global.get());
    }

    #[test]
    fn specific_match_skips_fallback() {
        let unmatched = Cell::new(false);

        protect(|| throw(404, "not found"))
            .on_code(404, |_| {})
            .on_unmatched(|_| unmatched.set(true))
            .run();

        assert!(!unmatched.get());
    }

    #[test]
    fn filter_blocks_all_handlers_and_reraise() {
        let filter_called = Cell::new(false);
        let handler_called = Cell::new(false);

        let outcome = protect(|| throw(500, "server error"))
            .filter(|err| {
                filter_called.set(true);
                (400..500).contains(&err.code())
            })
            .on_code(500, |_| handler_called.set(true))
            .on_any(|_| handler_called.set(true))
            .on_unmatched(|_| handler_called.set(true))
            .run();

        assert_eq!(outcome, Outcome::Filtered);
        assert!(filter_called.get());
        assert!(!handler_called.get());
    }

    #[test]
    fn filtered_error_without_handlers_is_not_reraised() {
        let outcome = protect(|| throw(500, "server error"))
            .filter(|_| false)
            .run();
        assert_eq!(outcome, Outcome::Filtered);
    }

    #[test]
    fn multiple_filters_pass_in_order() {
        let order = RefCell::new(Vec::new());
        let handled = Cell::new(false);

        protect(|| throw_with_context(403, "forbidden", "user_id", 123))
            .filter(|err| {
                order.borrow_mut().push(1);
                err.code() >= 400
            })
            .filter(|err| {
                order.borrow_mut().push(2);
                err.has_context("user_id")
            })
            .on_code(403, |_| handled.set(true))
            .run();

        assert_eq!(*order.borrow(), [1, 2]);
        assert!(handled.get());
    }

    #[test]
    fn vetoing_filter_side_effects_are_observed() {
        let first = Cell::new(false);
        let second = Cell::new(false);
        let handler_called = Cell::new(false);

        let outcome = protect(|| throw(404, "not found"))
            .filter(|_| {
                first.set(true);
                true
            })
            .filter(|_| {
                second.set(true);
                false
            })
            .on_code(404, |_| handler_called.set(true))
            .on_group([404], |_| handler_called.set(true))
            .on_unmatched(|_| handler_called.set(true))
            .on_any(|_| handler_called.set(true))
            .run();

        assert_eq!(outcome, Outcome::Filtered);
        assert!(first.get());
        assert!(second.get());
        assert!(!handler_called.get());
    }

    #[test]
    fn failing_filter_short_circuits_later_filters() {
        let third = Cell::new(false);

        protect(|| throw(1, "x"))
            .filter(|_| true)
            .filter(|_| false)
            .filter(|_| {
                third.set(true);
                true
            })
            .on_any(|_| {})
            .run();

        assert!(!third.get());
    }

    #[test]
    fn unhandled_error_is_reraised_unchanged() {
        let err = unwind_payload(|| {
            protect(|| throw_with_context(500, "server error", "shard", "eu-1"))
                .on_code(404, |_| {})
                .run();
        });

        assert_eq!(err.code(), 500);
        assert_eq!(err.message(), "server error");
        assert_eq!(err.context_str("shard"), Some("eu-1"));
    }

    #[test]
    fn reraise_preserves_first_captured_stack() {
        let original = ClassifiedError::without_stack(42, "x").with_stack("origin frame");
        let sent = original.clone();

        let err = unwind_payload(move || {
            protect(move || sent.raise()).run();
        });

        assert_eq!(err, original);
    }

    #[test]
    fn pass_completes_without_handlers() {
        let handled = Cell::new(false);
        let finalized = Cell::new(false);

        let outcome = protect(|| pass())
            .on_any(|_| handled.set(true))
            .on_unmatched(|_| handled.set(true))
            .run_with_finally(|| finalized.set(true));

        assert_eq!(outcome, Outcome::Passed);
        assert!(!handled.get());
        assert!(finalized.get());
    }

    #[test]
    fn plain_panic_is_normalized_to_fallback() {
        let mut seen = None;
        let global = Cell::new(false);

        let outcome = protect(|| panic!("index out of range"))
            .on_unmatched(|err| seen = Some(err.clone()))
            .on_any(|err| global.set(err.is_fallback()))
            .run();

        assert_eq!(outcome, Outcome::Handled);
        assert!(global.get());
        let seen = seen.expect("fallback handler should run");
        assert_eq!(seen.code(), FALLBACK_CODE);
        assert!(seen.message().contains("index out of range"));
        assert!(seen.message().contains("type:"));
        assert_eq!(seen.context().map(ContextMap::len), Some(0));
    }

    #[test]
    fn formatted_panic_reports_string_payload() {
        let mut message = String::new();
        let code = 7;

        protect(|| panic!("bad code {code}"))
            .on_unmatched(|err| message = err.message().to_string())
            .run();

        assert_eq!(message, "unexpected panic: bad code 7 (type: String)");
    }

    #[test]
    fn normalized_panic_captures_stack_under_never_policy() {
        let supported = !stack::force_capture().is_empty();
        let mut had_stack = None;

        stack::set_capture_policy(stack::CapturePolicy::Never);
        protect(|| panic::resume_unwind(Box::new("x")))
            .on_any(|err| had_stack = Some(err.has_stack()))
            .run();
        stack::reset_capture_policy();

        assert_eq!(had_stack, Some(supported));
    }

    #[test]
    fn opaque_panic_payload_is_described() {
        let mut message = String::new();

        protect(|| panic::panic_any(17u32))
            .on_any(|err| message = err.message().to_string())
            .run();

        assert!(message.contains("non-string payload"));
    }

    #[test]
    fn finally_runs_on_every_path() {
        let count = Cell::new(0);
        let bump = || count.set(count.get() + 1);

        protect(|| {}).run_with_finally(bump);
        protect(|| throw(1, "x")).on_any(|_| {}).run_with_finally(bump);
        protect(|| throw(1, "x")).filter(|_| false).run_with_finally(bump);
        protect(|| pass()).run_with_finally(bump);
        assert_eq!(count.get(), 4);

        let _ = unwind_payload(|| {
            protect(|| throw(1, "x")).run_with_finally(bump);
        });
        assert_eq!(count.get(), 5);
    }

    #[test]
    fn finally_runs_after_handlers() {
        let order = RefCell::new(Vec::new());

        protect(|| throw(500, "test"))
            .on_code(500, |_| order.borrow_mut().push("handler"))
            .run_with_finally(|| order.borrow_mut().push("finally"));

        assert_eq!(*order.borrow(), ["handler", "finally"]);
    }

    #[test]
    fn finally_runs_when_handler_panics() {
        let finalized = Cell::new(false);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            protect(|| throw(1, "x"))
                .on_code(1, |_| throw(2, "handler failed"))
                .run_with_finally(|| finalized.set(true));
        }));

        assert!(result.is_err());
        assert!(finalized.get());
    }

    #[test]
    fn completed_block_runs_no_handlers() {
        let called = Cell::new(false);
        let handled = Cell::new(false);

        let outcome = protect(|| called.set(true))
            .on_any(|_| handled.set(true))
            .run();

        assert_eq!(outcome, Outcome::Completed);
        assert!(!outcome.raised());
        assert!(called.get());
        assert!(!handled.get());
    }

    #[test]
    fn nested_dispatchers_compose() {
        let outer_seen = Cell::new(0);

        protect(|| {
            protect(|| throw(503, "unavailable"))
                .on_code(404, |_| {})
                .run();
        })
        .on_code(503, |err| outer_seen.set(err.code()))
        .run();

        assert_eq!(outer_seen.get(), 503);
    }

    #[test]
    fn catch_returns_value_or_error() {
        assert_eq!(catch(|| "ok").unwrap(), "ok");

        let err = catch::<()>(|| panic!("boom")).unwrap_err();
        assert!(err.is_fallback());
    }

    #[test]
    fn catch_lets_pass_through_to_dispatcher() {
        let outcome = protect(|| {
            let _ = catch::<()>(|| pass());
            unreachable!("pass should unwind through catch");
        })
        .run();

        assert_eq!(outcome, Outcome::Passed);
    }
}
