//! Create: insert a provisional record under a placeholder id, then swap in
//! the server's record.

use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use tally_core::{MutationError, Record, RecordId, Timestamp};

use crate::engine::{reconcile_failed, speculation_failed, MutationContext, MutationPlan};
use crate::shape::{AffectedKey, InsertAt};
use crate::temp_id::TempIdAllocator;

/// Creates a `T` from an input `I`.
///
/// `build` receives the input, the placeholder id and the mutation time, and
/// returns the provisional record shown until the server answers.
pub struct CreatePlan<T, I, B> {
    keys: Vec<AffectedKey>,
    kind_hint: String,
    insert_at: InsertAt,
    build: B,
    _marker: PhantomData<fn(&I) -> T>,
}

impl<T, I, B> CreatePlan<T, I, B>
where
    T: Record,
    B: Fn(&I, &RecordId, Timestamp) -> T + Send + Sync,
{
    pub fn new(kind_hint: impl Into<String>, keys: Vec<AffectedKey>, build: B) -> Self {
        Self {
            keys,
            kind_hint: kind_hint.into(),
            insert_at: InsertAt::End,
            build,
            _marker: PhantomData,
        }
    }

    /// Put new records first instead of last.
    pub fn prepend(mut self) -> Self {
        self.insert_at = InsertAt::Start;
        self
    }
}

impl<T, I, B> fmt::Debug for CreatePlan<T, I, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreatePlan")
            .field("keys", &self.keys)
            .field("kind_hint", &self.kind_hint)
            .field("insert_at", &self.insert_at)
            .finish_non_exhaustive()
    }
}

impl<T, I, B> MutationPlan<I, T> for CreatePlan<T, I, B>
where
    T: Record,
    I: Send + Sync,
    B: Fn(&I, &RecordId, Timestamp) -> T + Send + Sync,
{
    fn affected_keys(&self, _input: &I) -> Vec<AffectedKey> {
        self.keys.clone()
    }

    fn prepare(
        &self,
        _input: &I,
        ctx: &mut MutationContext,
        ids: &TempIdAllocator,
    ) -> Result<(), MutationError> {
        ctx.temp_id = Some(ids.allocate(&self.kind_hint));
        Ok(())
    }

    fn speculate(
        &self,
        key: &AffectedKey,
        current: Option<&Value>,
        input: &I,
        ctx: &MutationContext,
    ) -> Result<Option<Value>, MutationError> {
        let temp_id = ctx
            .temp_id
            .as_ref()
            .ok_or_else(|| speculation_failed(&key.key, "no placeholder id allocated"))?;
        let mut record = (self.build)(input, temp_id, ctx.now);
        record.set_record_id(temp_id.clone());

        let edit = key
            .shape
            .insert(&key.key, current, &record, self.insert_at)
            .map_err(|e| speculation_failed(&key.key, e))?;
        Ok(edit.value)
    }

    fn reconcile(
        &self,
        key: &AffectedKey,
        current: Option<&Value>,
        result: &T,
        ctx: &MutationContext,
    ) -> Result<Option<Value>, MutationError> {
        let Some(temp_id) = ctx.temp_id.as_ref() else {
            return Ok(current.cloned());
        };
        let edit = key
            .shape
            .replace(&key.key, current, temp_id, result)
            .map_err(|e| reconcile_failed(&key.key, e))?;
        if edit.touched == 0 && current.is_some() {
            tracing::debug!(key = %key.key, temp_id = %temp_id, "placeholder not found while reconciling");
        }
        Ok(edit.value)
    }
}
