//! Identity types for Tally records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Reserved prefix carried by every client-issued placeholder id.
///
/// Server-assigned ids never start with this prefix.
pub const TEMP_ID_PREFIX: &str = "tmp~";

/// Identifier of a record, either server-assigned or a client placeholder.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if this id is a client placeholder still awaiting reconciliation.
    pub fn is_temporary(&self) -> bool {
        is_temporary(&self.0)
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

/// Pure predicate: does `id` carry the reserved placeholder prefix?
pub fn is_temporary(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for RecordId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for RecordId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for RecordId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for RecordId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
