//! Update: merge changes into a record by id, then overwrite it with the
//! server's copy.

use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use tally_core::{MutationError, Record, RecordId};

use crate::engine::{reconcile_failed, speculation_failed, MutationContext, MutationPlan};
use crate::shape::AffectedKey;

/// Input of an update: which record and what to change.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch<P> {
    pub id: RecordId,
    pub changes: P,
}

impl<P> Patch<P> {
    pub fn new(id: impl Into<RecordId>, changes: P) -> Self {
        Self {
            id: id.into(),
            changes,
        }
    }
}

/// Updates a `T` in place with a caller-supplied field merge.
pub struct UpdatePlan<T, P, M> {
    keys: Vec<AffectedKey>,
    merge: M,
    require_present: bool,
    _marker: PhantomData<fn(&P) -> T>,
}

impl<T, P, M> UpdatePlan<T, P, M>
where
    T: Record,
    M: Fn(&mut T, &P) + Send + Sync,
{
    pub fn new(keys: Vec<AffectedKey>, merge: M) -> Self {
        Self {
            keys,
            merge,
            require_present: false,
            _marker: PhantomData,
        }
    }

    /// Fail the mutation when a cached key does not hold the record.
    pub fn require_present(mut self) -> Self {
        self.require_present = true;
        self
    }
}

impl<T, P, M> fmt::Debug for UpdatePlan<T, P, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdatePlan")
            .field("keys", &self.keys)
            .field("require_present", &self.require_present)
            .finish_non_exhaustive()
    }
}

impl<T, P, M> MutationPlan<Patch<P>, T> for UpdatePlan<T, P, M>
where
    T: Record,
    P: Send + Sync,
    M: Fn(&mut T, &P) + Send + Sync,
{
    fn affected_keys(&self, _input: &Patch<P>) -> Vec<AffectedKey> {
        self.keys.clone()
    }

    fn speculate(
        &self,
        key: &AffectedKey,
        current: Option<&Value>,
        input: &Patch<P>,
        _ctx: &MutationContext,
    ) -> Result<Option<Value>, MutationError> {
        let edit = key
            .shape
            .update::<T, _>(&key.key, current, &input.id, |record| {
                (self.merge)(record, &input.changes)
            })
            .map_err(|e| speculation_failed(&key.key, e))?;
        if self.require_present && current.is_some() && edit.touched == 0 {
            return Err(MutationError::RecordNotFound {
                key: key.key.to_string(),
                id: input.id.to_string(),
            });
        }
        Ok(edit.value)
    }

    fn reconcile(
        &self,
        key: &AffectedKey,
        current: Option<&Value>,
        result: &T,
        _ctx: &MutationContext,
    ) -> Result<Option<Value>, MutationError> {
        let edit = key
            .shape
            .replace(&key.key, current, result.record_id(), result)
            .map_err(|e| reconcile_failed(&key.key, e))?;
        Ok(edit.value)
    }
}
