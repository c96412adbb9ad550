//! Key/value context attached to a classified error.
//!
//! # Value Discipline
//!
//! Context values are a closed sum type, [`ContextValue`], covering the
//! payloads that show up at raise sites in practice (text, integers, floats,
//! booleans). Anything else travels as [`ContextValue::Opaque`], a shared
//! `Any` that the reader downcasts at read time with
//! [`ContextValue::downcast_ref`].
//!
//! # Memory Model
//!
//! - A [`ContextMap`] keeps entries inline up to four, the common case
//! - Keys are unique; inserting an existing key replaces its value
//! - Owned text values are zeroized on drop, borrowed `'static` text is not
//!
//! Errors cross an unwind boundary as a `Box<dyn Any + Send>` payload, so every
//! value must be `Send + Sync + 'static`.

use smallvec::SmallVec;
use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroize;

/// A single context value.
#[derive(Clone)]
pub enum ContextValue {
    /// Text, either a literal or an owned, runtime string.
    Str(Cow<'static, str>),
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    UInt(u64),
    /// Floating point number.
    Float(f64),
    /// Boolean flag.
    Bool(bool),
    /// Any other value. Read it back with [`ContextValue::downcast_ref`].
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl ContextValue {
    /// Wrap an arbitrary value.
    #[inline]
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        Self::Opaque(Arc::new(value))
    }

    /// Text view.
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    /// Integer view. `UInt` values that fit in `i64` are converted.
    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Int(v) => Some(v),
            Self::UInt(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Unsigned view. Non-negative `Int` values are converted.
    #[inline]
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Self::UInt(v) => Some(v),
            Self::Int(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Float view. Integers are not converted.
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Float(v) => Some(v),
            _ => None,
        }
    }

    /// Boolean view.
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// Downcast an opaque value. Returns `None` for the typed variants and for
    /// a type mismatch.
    #[inline]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Opaque(v) => v.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Short name of the variant, used by the log view.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Str(_) => "str",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::Opaque(_) => "opaque",
        }
    }
}

impl PartialEq for ContextValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::UInt(a), Self::UInt(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            // Opaque values have no equality of their own; identity it is.
            (Self::Opaque(a), Self::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Self::Int(v) => f.debug_tuple("Int").field(v).finish(),
            Self::UInt(v) => f.debug_tuple("UInt").field(v).finish(),
            Self::Float(v) => f.debug_tuple("Float").field(v).finish(),
            Self::Bool(v) => f.debug_tuple("Bool").field(v).finish(),
            Self::Opaque(_) => f.write_str("Opaque(..)"),
        }
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Opaque(_) => f.write_str("<opaque>"),
        }
    }
}

impl Zeroize for ContextValue {
    fn zeroize(&mut self) {
        match self {
            Self::Str(Cow::Owned(s)) => s.zeroize(),
            Self::Str(Cow::Borrowed(_)) => {}
            Self::Int(v) => v.zeroize(),
            Self::UInt(v) => v.zeroize(),
            Self::Float(v) => v.zeroize(),
            Self::Bool(v) => *v = false,
            // Shared with other holders; not ours to clear.
            Self::Opaque(_) => {}
        }
    }
}

impl Drop for ContextValue {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl From<&'static str> for ContextValue {
    fn from(value: &'static str) -> Self {
        Self::Str(Cow::Borrowed(value))
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        Self::Str(Cow::Owned(value))
    }
}

impl From<Cow<'static, str>> for ContextValue {
    fn from(value: Cow<'static, str>) -> Self {
        Self::Str(value)
    }
}

macro_rules! impl_from_signed {
    ($($t:ty),+) => {
        $(impl From<$t> for ContextValue {
            fn from(value: $t) -> Self {
                Self::Int(i64::from(value))
            }
        })+
    };
}

macro_rules! impl_from_unsigned {
    ($($t:ty),+) => {
        $(impl From<$t> for ContextValue {
            fn from(value: $t) -> Self {
                Self::UInt(u64::from(value))
            }
        })+
    };
}

impl_from_signed!(i8, i16, i32, i64);
impl_from_unsigned!(u8, u16, u32, u64);

impl From<usize> for ContextValue {
    fn from(value: usize) -> Self {
        Self::UInt(value as u64)
    }
}

impl From<f32> for ContextValue {
    fn from(value: f32) -> Self {
        Self::Float(f64::from(value))
    }
}

impl From<f64> for ContextValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Context entries keyed by unique strings.
///
/// Insertion order is kept for stable log output but is not part of equality:
/// two maps with the same entries compare equal whatever order they were
/// written in.
#[derive(Clone, Default)]
pub struct ContextMap {
    entries: SmallVec<[(Cow<'static, str>, ContextValue); 4]>,
}

impl ContextMap {
    /// Create an empty map.
    #[inline]
    pub fn new() -> Self {
        Self {
            entries: SmallVec::new(),
        }
    }

    /// Insert or replace a value, returning the previous one.
    pub fn insert(
        &mut self,
        key: impl Into<Cow<'static, str>>,
        value: impl Into<ContextValue>,
    ) -> Option<ContextValue> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Value for `key`, if present.
    #[inline]
    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_ref() == key)
            .map(|(_, v)| v)
    }

    /// `true` if `key` is present.
    #[inline]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Merge every entry of `other`, overwriting on key collision.
    pub fn merge(&mut self, other: ContextMap) {
        for (key, value) in other {
            self.insert(key, value);
        }
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if the map has no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ContextValue)> {
        self.entries.iter().map(|(k, v)| (k.as_ref(), v))
    }
}

impl PartialEq for ContextMap {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(key, value)| other.get(key) == Some(value))
    }
}

impl fmt::Debug for ContextMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V> FromIterator<(K, V)> for ContextMap
where
    K: Into<Cow<'static, str>>,
    V: Into<ContextValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        map.extend(iter);
        map
    }
}

impl<K, V> Extend<(K, V)> for ContextMap
where
    K: Into<Cow<'static, str>>,
    V: Into<ContextValue>,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl IntoIterator for ContextMap {
    type Item = (Cow<'static, str>, ContextValue);
    type IntoIter = smallvec::IntoIter<[(Cow<'static, str>, ContextValue); 4]>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
