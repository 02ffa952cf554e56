//! Declared shapes of cached values.
//!
//! Every affected key names the shape of its value when the mutation is
//! built, so adapters know which sub-collection to edit without inspecting
//! the value. Records inside a collection are decoded into their [`Record`]
//! type, edited, and re-encoded; a collection that nothing touched is left
//! byte-for-byte as it was.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tally_core::{CacheError, Record, RecordId};

use crate::key::CacheKey;

/// How the value under a key is laid out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueShape {
    /// `[record, ...]`
    List,
    /// `{ <owned_field>: [...], <shared_field>: [...], .. }`. New records go
    /// to the owned side; edits apply to both.
    OwnedSharedPartition {
        owned_field: String,
        shared_field: String,
    },
    /// An aggregate object carrying one nested record list.
    DetailWithNestedList { list_field: String },
    /// A single record.
    Entity,
}

impl ValueShape {
    pub fn partition(owned_field: impl Into<String>, shared_field: impl Into<String>) -> Self {
        Self::OwnedSharedPartition {
            owned_field: owned_field.into(),
            shared_field: shared_field.into(),
        }
    }

    pub fn nested(list_field: impl Into<String>) -> Self {
        Self::DetailWithNestedList {
            list_field: list_field.into(),
        }
    }

    fn mismatch(&self, key: &CacheKey, reason: impl Into<String>) -> CacheError {
        CacheError::ShapeMismatch {
            key: key.to_string(),
            shape: self.to_string(),
            reason: reason.into(),
        }
    }

    /// The record collections inside `value`. `owned_only` restricts a
    /// partition to its owned side.
    fn collections<'v>(
        &self,
        key: &CacheKey,
        value: &'v mut Value,
        owned_only: bool,
    ) -> Result<Vec<&'v mut Value>, CacheError> {
        let slots = match self {
            Self::List => vec![value],
            Self::OwnedSharedPartition {
                owned_field,
                shared_field,
            } => {
                let object = value
                    .as_object_mut()
                    .ok_or_else(|| self.mismatch(key, "expected an object"))?;
                let wanted = if owned_only { 1 } else { 2 };
                let slots: Vec<&mut Value> = object
                    .iter_mut()
                    .filter(|(name, _)| {
                        *name == owned_field || (!owned_only && *name == shared_field)
                    })
                    .map(|(_, v)| v)
                    .collect();
                if slots.len() != wanted {
                    return Err(self.mismatch(key, "partition field missing"));
                }
                slots
            }
            Self::DetailWithNestedList { list_field } => {
                let object = value
                    .as_object_mut()
                    .ok_or_else(|| self.mismatch(key, "expected an object"))?;
                let slot = object
                    .get_mut(list_field.as_str())
                    .ok_or_else(|| self.mismatch(key, format!("missing field `{}`", list_field)))?;
                vec![slot]
            }
            Self::Entity => Vec::new(),
        };
        if slots.iter().any(|s| !s.is_array()) {
            return Err(self.mismatch(key, "collection is not an array"));
        }
        Ok(slots)
    }

    /// Apply `edit` to each collection and re-encode the ones it touched.
    fn edit<T, F>(
        &self,
        key: &CacheKey,
        current: Option<&Value>,
        owned_only: bool,
        mut edit: F,
    ) -> Result<Edit, CacheError>
    where
        T: Record,
        F: FnMut(&mut Vec<T>) -> usize,
    {
        let Some(current) = current else {
            return Ok(Edit::untouched(None));
        };

        if let Self::Entity = self {
            let mut records = vec![decode::<T>(key, current)?];
            let touched = edit(&mut records);
            let value = match records.first() {
                Some(record) if touched > 0 => Some(encode(key, record)?),
                Some(_) => Some(current.clone()),
                None => None,
            };
            return Ok(Edit { value, touched });
        }

        let mut value = current.clone();
        let mut touched = 0;
        for slot in self.collections(key, &mut value, owned_only)? {
            let mut records: Vec<T> = decode(key, slot)?;
            let n = edit(&mut records);
            if n > 0 {
                *slot = encode(key, &records)?;
                touched += n;
            }
        }
        Ok(Edit {
            value: Some(value),
            touched,
        })
    }

    /// Add `record` to the primary collection. Absent values and single
    /// entities are left as they are.
    pub fn insert<T: Record>(
        &self,
        key: &CacheKey,
        current: Option<&Value>,
        record: &T,
        at: InsertAt,
    ) -> Result<Edit, CacheError> {
        if let Self::Entity = self {
            return Ok(Edit::untouched(current.cloned()));
        }
        self.edit::<T, _>(key, current, true, |records| {
            match at {
                InsertAt::Start => records.insert(0, record.clone()),
                InsertAt::End => records.push(record.clone()),
            }
            1
        })
    }

    /// Apply `patch` to every record carrying `id`.
    pub fn update<T, F>(
        &self,
        key: &CacheKey,
        current: Option<&Value>,
        id: &RecordId,
        mut patch: F,
    ) -> Result<Edit, CacheError>
    where
        T: Record,
        F: FnMut(&mut T),
    {
        self.edit::<T, _>(key, current, false, |records| {
            let mut n = 0;
            for record in records.iter_mut().filter(|r| r.record_id() == id) {
                patch(record);
                n += 1;
            }
            n
        })
    }

    /// Swap every record carrying `id` for `replacement`.
    pub fn replace<T: Record>(
        &self,
        key: &CacheKey,
        current: Option<&Value>,
        id: &RecordId,
        replacement: &T,
    ) -> Result<Edit, CacheError> {
        self.update::<T, _>(key, current, id, |record| *record = replacement.clone())
    }

    /// Drop every record matching `predicate`. A matching entity removes the
    /// whole value.
    pub fn remove_where<T, P>(
        &self,
        key: &CacheKey,
        current: Option<&Value>,
        mut predicate: P,
    ) -> Result<Edit, CacheError>
    where
        T: Record,
        P: FnMut(&T) -> bool,
    {
        self.edit::<T, _>(key, current, false, |records| {
            let before = records.len();
            records.retain(|r| !predicate(r));
            before - records.len()
        })
    }

    pub fn remove<T: Record>(
        &self,
        key: &CacheKey,
        current: Option<&Value>,
        id: &RecordId,
    ) -> Result<Edit, CacheError> {
        self.remove_where::<T, _>(key, current, |r| r.record_id() == id)
    }

    /// Decode every record held under the shape.
    pub fn records<T: Record>(&self, key: &CacheKey, value: &Value) -> Result<Vec<T>, CacheError> {
        if let Self::Entity = self {
            return Ok(vec![decode(key, value)?]);
        }
        let mut value = value.clone();
        let mut all = Vec::new();
        for slot in self.collections(key, &mut value, false)? {
            all.extend(decode::<Vec<T>>(key, slot)?);
        }
        Ok(all)
    }
}

impl fmt::Display for ValueShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List => write!(f, "list"),
            Self::OwnedSharedPartition {
                owned_field,
                shared_field,
            } => write!(f, "partition({}/{})", owned_field, shared_field),
            Self::DetailWithNestedList { list_field } => write!(f, "detail({})", list_field),
            Self::Entity => write!(f, "entity"),
        }
    }
}

/// Where [`ValueShape::insert`] places a new record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertAt {
    Start,
    #[default]
    End,
}

/// Result of a shaped edit: the new value and how many records changed.
#[derive(Debug, Clone, PartialEq)]
pub struct Edit {
    pub value: Option<Value>,
    pub touched: usize,
}

impl Edit {
    pub fn untouched(value: Option<Value>) -> Self {
        Self { value, touched: 0 }
    }
}

/// A cache key a mutation declares it will modify, with its value shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffectedKey {
    pub key: CacheKey,
    pub shape: ValueShape,
}

impl AffectedKey {
    pub fn new(key: CacheKey, shape: ValueShape) -> Self {
        Self { key, shape }
    }

    pub fn list(key: CacheKey) -> Self {
        Self::new(key, ValueShape::List)
    }

    pub fn entity(key: CacheKey) -> Self {
        Self::new(key, ValueShape::Entity)
    }
}

/// Any JSON object with an `id`, for edits that do not know the record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: RecordId,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record for RawRecord {
    fn record_id(&self) -> &RecordId {
        &self.id
    }

    fn set_record_id(&mut self, id: RecordId) {
        self.id = id;
    }
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(
    key: &CacheKey,
    value: &Value,
) -> Result<T, CacheError> {
    T::deserialize(value).map_err(|e| CacheError::Decode {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn encode<T: Serialize + ?Sized>(
    key: &CacheKey,
    value: &T,
) -> Result<Value, CacheError> {
    serde_json::to_value(value).map_err(|e| CacheError::Encode {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
