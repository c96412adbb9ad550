//! Bounded in-memory journal of dispatched errors.
//!
//! [`ErrorJournal`] keeps the most recent errors in a fixed-size ring with
//! FIFO eviction. Each entry is capped at a byte budget, so a burst of errors
//! with huge messages or context holds memory steady.
//!
//! Typical use is as the global handler of a dispatcher:
//!
//! ```rust
//! use dispatch_errors::{protect, throw, ErrorJournal};
//!
//! let journal = ErrorJournal::new(100, 512);
//!
//! protect(|| throw(404, "user not found"))
//!     .on_code(404, |_| {})
//!     .on_any(journal.recorder())
//!     .run();
//!
//! let recent = journal.get_recent(1);
//! assert_eq!(recent[0].code, 404);
//! assert_eq!(recent[0].message.as_ref(), "user not found");
//! ```
//!
//! Clones share the same buffer, so a journal can be handed to several
//! dispatchers or threads and read from anywhere.

use crate::ClassifiedError;
use smallvec::SmallVec;
use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

const MESSAGE_CAP: usize = 512;
const CONTEXT_VALUE_CAP: usize = 128;
const TRUNCATION_INDICATOR: &str = "...[TRUNC]";

/// A single journal entry with bounded size.
///
/// Strings are `Arc<str>` so reading entries back clones refcounts, not text.
#[derive(Clone, Debug)]
pub struct JournalEntry {
    /// Unix timestamp (seconds) of recording
    pub timestamp: u64,
    /// Error code
    pub code: i64,
    /// Message, possibly truncated
    pub message: Arc<str>,
    /// Context rendered as text, in insertion order, possibly truncated
    pub context: Arc<[(Arc<str>, Arc<str>)]>,
    /// Whether the error carried a captured stack
    pub has_stack: bool,
    /// Approximate payload size in bytes
    pub size_bytes: usize,
}

impl JournalEntry {
    /// Look up a recorded context value.
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context
            .iter()
            .find(|(k, _)| k.as_ref() == key)
            .map(|(_, v)| v.as_ref())
    }
}

struct RingBuffer {
    entries: Box<[Option<JournalEntry>]>,
    tail: usize,
    head: usize,
    len: usize,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            entries: std::iter::repeat_with(|| None)
                .take(capacity)
                .collect::<Box<[Option<JournalEntry>]>>(),
            tail: 0,
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, entry: JournalEntry) -> Option<JournalEntry> {
        let evicted = self.entries[self.tail].replace(entry);
        self.tail = (self.tail + 1) % self.entries.len();

        if self.len < self.entries.len() {
            self.len += 1;
        } else {
            self.head = (self.head + 1) % self.entries.len();
        }

        evicted
    }

    #[inline]
    fn len(&self) -> usize {
        self.len
    }

    fn iter(&self) -> impl DoubleEndedIterator<Item = &JournalEntry> {
        let head = self.head;
        let cap = self.entries.len();

        (0..self.len).filter_map(move |i| self.entries[(head + i) % cap].as_ref())
    }

    fn clear(&mut self) {
        self.entries.iter_mut().for_each(|entry| *entry = None);
        self.head = 0;
        self.tail = 0;
        self.len = 0;
    }
}

/// Bounded, shareable error journal.
///
/// Backed by an `RwLock`: many readers at once, one writer. A poisoned lock
/// is recovered rather than propagated, since every write leaves the ring in
/// a consistent state.
#[derive(Clone)]
pub struct ErrorJournal {
    buffer: Arc<RwLock<RingBuffer>>,
    max_entries: usize,
    max_entry_bytes: usize,
    eviction_count: Arc<AtomicU64>,
}

impl ErrorJournal {
    /// Create a journal holding at most `max_entries` entries (minimum one)
    /// of at most `max_entry_bytes` payload bytes each.
    pub fn new(max_entries: usize, max_entry_bytes: usize) -> Self {
        let bounded_entries = max_entries.max(1);
        Self {
            buffer: Arc::new(RwLock::new(RingBuffer::new(bounded_entries))),
            max_entries: bounded_entries,
            max_entry_bytes,
            eviction_count: Arc::new(AtomicU64::new(0)),
        }
    }

    #[inline]
    fn read_buffer(&self) -> RwLockReadGuard<'_, RingBuffer> {
        match self.buffer.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[inline]
    fn write_buffer(&self) -> RwLockWriteGuard<'_, RingBuffer> {
        match self.buffer.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record an error, evicting the oldest entry when full.
    pub fn record(&self, err: &ClassifiedError) {
        let entry = self.create_entry(err);

        if self.write_buffer().push(entry).is_some() {
            self.eviction_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A handler closure that records into this journal.
    ///
    /// Suitable for [`Dispatcher::on_any`](crate::Dispatcher::on_any) or any
    /// other registration slot.
    pub fn recorder(&self) -> impl FnMut(&ClassifiedError) + 'static {
        let journal = self.clone();
        move |err| journal.record(err)
    }

    fn create_entry(&self, err: &ClassifiedError) -> JournalEntry {
        let mut remaining = self.max_entry_bytes;

        let message = truncate_to_bytes(err.message(), remaining.min(MESSAGE_CAP));
        let mut size = message.len();
        remaining = remaining.saturating_sub(message.len());

        let mut context: SmallVec<[(Arc<str>, Arc<str>); 8]> = SmallVec::new();
        if let Some(map) = err.context() {
            for (key, value) in map.iter() {
                if key.len() >= remaining {
                    break;
                }
                let rendered = value.to_string();
                let value_cap = (remaining - key.len()).min(CONTEXT_VALUE_CAP);
                let value = truncate_to_bytes(&rendered, value_cap);
                let used = key.len() + value.len();
                if used > remaining {
                    break;
                }
                size += used;
                remaining -= used;

                context.push((Arc::from(key), Arc::from(value.as_ref())));
            }
        }

        JournalEntry {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_secs()),
            code: err.code(),
            message: Arc::from(message.as_ref()),
            context: context.into_vec().into_boxed_slice().into(),
            has_stack: err.has_stack(),
            size_bytes: size,
        }
    }

    /// The `count` most recent entries, newest first.
    pub fn get_recent(&self, count: usize) -> Vec<JournalEntry> {
        self.read_buffer().iter().rev().take(count).cloned().collect()
    }

    /// All entries, newest first.
    pub fn get_all(&self) -> Vec<JournalEntry> {
        self.read_buffer().iter().rev().cloned().collect()
    }

    /// Entries matching `predicate`, oldest first.
    pub fn get_filtered<F>(&self, predicate: F) -> Vec<JournalEntry>
    where
        F: Fn(&JournalEntry) -> bool,
    {
        self.read_buffer()
            .iter()
            .filter(|e| predicate(e))
            .cloned()
            .collect()
    }

    /// Entries recorded for `code`, oldest first.
    pub fn get_by_code(&self, code: i64) -> Vec<JournalEntry> {
        self.get_filtered(|e| e.code == code)
    }

    /// Number of entries held.
    #[inline]
    pub fn len(&self) -> usize {
        self.read_buffer().len()
    }

    /// `true` if nothing is held.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of entry payload sizes (lower-bound estimate of memory held).
    pub fn payload_bytes(&self) -> usize {
        self.read_buffer().iter().map(|e| e.size_bytes).sum()
    }

    /// Entries dropped to make room since creation.
    #[inline]
    pub fn eviction_count(&self) -> u64 {
        self.eviction_count.load(Ordering::Relaxed)
    }

    /// Drop every entry. The eviction count is kept.
    pub fn clear(&self) {
        self.write_buffer().clear();
    }

    /// Maximum number of entries.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    /// `true` once the next record will evict.
    pub fn is_full(&self) -> bool {
        self.len() >= self.max_entries
    }
}

impl std::fmt::Debug for ErrorJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorJournal")
            .field("len", &self.len())
            .field("capacity", &self.max_entries)
            .field("max_entry_bytes", &self.max_entry_bytes)
            .field("evictions", &self.eviction_count())
            .finish()
    }
}

/// Truncate to at most `max_bytes`, on a UTF-8 boundary.
fn truncate_to_bytes(s: &str, max_bytes: usize) -> Cow<'_, str> {
    if max_bytes == 0 {
        return Cow::Borrowed("");
    }
    if s.len() <= max_bytes {
        return Cow::Borrowed(s);
    }
    if max_bytes <= TRUNCATION_INDICATOR.len() {
        return Cow::Borrowed(&TRUNCATION_INDICATOR[..max_bytes]);
    }

    let mut idx = max_bytes - TRUNCATION_INDICATOR.len();
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }

    if idx == 0 {
        return Cow::Borrowed(TRUNCATION_INDICATOR);
    }

    let mut out = String::with_capacity(idx + TRUNCATION_INDICATOR.len());
    out.push_str(&s[..idx]);
    out.push_str(TRUNCATION_INDICATOR);
    Cow::Owned(out)
}
