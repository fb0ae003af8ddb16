//! Composite key derivation for metric buckets.
//!
//! Keys are a 64-bit digest over an ordered list of event fields. Each field
//! is written as a one-byte type tag followed by its payload, so an absent
//! field, the string `"1"` and the number `1` all hash differently.

use crate::core::{Event, FieldValue};
use rustc_hash::FxHasher;
use std::fmt;
use std::hash::Hasher;

const TAG_ABSENT: u8 = 0;
const TAG_STRING: u8 = 1;
const TAG_NUMBER: u8 = 2;
const TAG_BOOL: u8 = 3;
const TAG_EXTRA: u8 = 4;

/// Stable identity of a metric bucket within a flush window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompositeKey(u64);

impl CompositeKey {
    /// Wraps a raw digest
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw digest value
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Hashes `fields` of `event` in the given order.
pub fn hash_fields(event: &Event, fields: &[&str]) -> CompositeKey {
    let mut hasher = FxHasher::default();
    for field in fields {
        write_value(&mut hasher, event.get(field));
    }
    CompositeKey(hasher.finish())
}

/// Hashes a list of optional string values, as used for grouping dimensions.
pub fn hash_values<'a, I>(values: I) -> CompositeKey
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut hasher = FxHasher::default();
    for value in values {
        match value {
            Some(s) => {
                hasher.write_u8(TAG_STRING);
                hasher.write(s.as_bytes());
                hasher.write_u8(0xff);
            },
            None => hasher.write_u8(TAG_ABSENT),
        }
    }
    CompositeKey(hasher.finish())
}

/// Folds extra discriminator bytes into an existing key.
pub fn append(key: CompositeKey, extra: &[u8]) -> CompositeKey {
    let mut hasher = FxHasher::default();
    hasher.write_u64(key.0);
    hasher.write_u8(TAG_EXTRA);
    hasher.write_usize(extra.len());
    hasher.write(extra);
    CompositeKey(hasher.finish())
}

fn write_value(hasher: &mut FxHasher, value: Option<&FieldValue>) {
    match value {
        None => hasher.write_u8(TAG_ABSENT),
        Some(FieldValue::String(s)) => {
            hasher.write_u8(TAG_STRING);
            // length prefix keeps ["ab", "c"] apart from ["a", "bc"]
            hasher.write_usize(s.len());
            hasher.write(s.as_bytes());
        },
        Some(FieldValue::Number(n)) => {
            hasher.write_u8(TAG_NUMBER);
            let canonical = if *n == 0.0 { 0.0f64 } else { *n };
            hasher.write_u64(canonical.to_bits());
        },
        Some(FieldValue::Bool(b)) => {
            hasher.write_u8(TAG_BOOL);
            hasher.write_u8(u8::from(*b));
        },
    }
}
