//! Stored values and the entry record.

use crate::protocol::Frame;
use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Error returned when a stored value cannot be coerced.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoerceError {
    #[error("value ({0}) cannot cast to int")]
    NotInteger(String),
}

/// A stored value. The variant records how the value arrived on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bytes(Bytes),
    Int(i64),
    Str(String),
}

impl Value {
    /// Bulk representation used by `get` replies and snapshot records.
    pub fn to_bulk(&self) -> Bytes {
        match self {
            Value::Bytes(b) => b.clone(),
            Value::Int(n) => Bytes::from(n.to_string()),
            Value::Str(s) => Bytes::from(s.clone()),
        }
    }

    /// Base-10 integer view of the value.
    pub fn to_integer(&self) -> Result<i64, CoerceError> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::Str(s) => s
                .parse()
                .map_err(|_| CoerceError::NotInteger(s.clone())),
            Value::Bytes(b) => std::str::from_utf8(b)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| CoerceError::NotInteger(String::from_utf8_lossy(b).into_owned())),
        }
    }

    /// Converts a request argument into a value. Only scalar frames qualify.
    pub fn from_frame(frame: &Frame) -> Option<Value> {
        match frame {
            Frame::Bulk(b) => Some(Value::Bytes(b.clone())),
            Frame::Integer(n) => Some(Value::Int(*n)),
            Frame::Simple(s) => Some(Value::Str(s.clone())),
            _ => None,
        }
    }

    /// Frame carrying the value with its original type, for persisted records.
    pub fn to_frame(&self) -> Frame {
        match self {
            Value::Bytes(b) => Frame::Bulk(b.clone()),
            Value::Int(n) => Frame::Integer(*n),
            Value::Str(s) => Frame::Simple(s.clone()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Bytes(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

/// One stored key.
///
/// `expire_at` is an absolute deadline in nanoseconds since the Unix epoch;
/// zero means the entry never expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: Value,
    pub expire_at: i64,
}

impl Entry {
    pub fn new(key: impl Into<String>, value: Value, expire_at: i64) -> Self {
        Self {
            key: key.into(),
            value,
            expire_at,
        }
    }

    /// Whether the entry is semantically absent at `now`.
    #[inline]
    pub fn is_expired(&self, now: i64) -> bool {
        self.expire_at > 0 && self.expire_at <= now
    }
}

/// Current wall-clock time in nanoseconds since the Unix epoch.
pub fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos().min(i64::MAX as u128) as i64)
        .unwrap_or(0)
}
