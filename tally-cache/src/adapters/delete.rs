//! Delete: remove matching records speculatively.
//!
//! Nothing is re-inserted by hand on failure; the engine's snapshot restore
//! puts every removed record back at its original position.

use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use tally_core::{MutationError, Record, RecordId};

use crate::engine::{speculation_failed, MutationContext, MutationPlan};
use crate::shape::AffectedKey;

fn matches_id<T: Record>(id: &RecordId, record: &T) -> bool {
    record.record_id() == id
}

/// Removes every `T` for which `matcher(input, record)` holds.
pub struct DeletePlan<T, I, M> {
    keys: Vec<AffectedKey>,
    matcher: M,
    _marker: PhantomData<fn(&I) -> T>,
}

impl<T: Record> DeletePlan<T, RecordId, fn(&RecordId, &T) -> bool> {
    /// Delete the record whose id is the input.
    pub fn by_id(keys: Vec<AffectedKey>) -> Self {
        Self {
            keys,
            matcher: matches_id::<T>,
            _marker: PhantomData,
        }
    }
}

impl<T, I, M> DeletePlan<T, I, M>
where
    T: Record,
    M: Fn(&I, &T) -> bool + Send + Sync,
{
    /// Delete by predicate, for records whose id alone is ambiguous.
    pub fn matching(keys: Vec<AffectedKey>, matcher: M) -> Self {
        Self {
            keys,
            matcher,
            _marker: PhantomData,
        }
    }
}

impl<T, I, M> fmt::Debug for DeletePlan<T, I, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeletePlan")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl<T, I, M, O> MutationPlan<I, O> for DeletePlan<T, I, M>
where
    T: Record,
    I: Send + Sync,
    M: Fn(&I, &T) -> bool + Send + Sync,
{
    fn affected_keys(&self, _input: &I) -> Vec<AffectedKey> {
        self.keys.clone()
    }

    fn speculate(
        &self,
        key: &AffectedKey,
        current: Option<&Value>,
        input: &I,
        _ctx: &MutationContext,
    ) -> Result<Option<Value>, MutationError> {
        let edit = key
            .shape
            .remove_where::<T, _>(&key.key, current, |record| (self.matcher)(input, record))
            .map_err(|e| speculation_failed(&key.key, e))?;
        Ok(edit.value)
    }

    /// The removal already reflects the server state.
    fn reconcile(
        &self,
        _key: &AffectedKey,
        current: Option<&Value>,
        _result: &O,
        _ctx: &MutationContext,
    ) -> Result<Option<Value>, MutationError> {
        Ok(current.cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::CacheKey;
    use chrono::{TimeZone, Utc};
    use tally_core::TaskCompletion;

    fn completion(id: &str, task: &str, person: &str) -> TaskCompletion {
        TaskCompletion::new(
            RecordId::from(id),
            task,
            person,
            Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).unwrap(),
            None,
        )
    }

    fn ids(value: Value) -> Vec<String> {
        serde_json::from_value::<Vec<TaskCompletion>>(value)
            .unwrap()
            .into_iter()
            .map(|c| c.id.into_inner())
            .collect()
    }

    #[test]
    fn test_delete_by_id() {
        let key = AffectedKey::list(CacheKey::collection("completions"));
        let plan = DeletePlan::<TaskCompletion, _, _>::by_id(vec![key.clone()]);
        let current = serde_json::to_value(vec![
            completion("c1", "t1", "p1"),
            completion("c2", "t1", "p1"),
            completion("c3", "t1", "p1"),
        ])
        .unwrap();
        let ctx = MutationContext::new(Utc::now());

        let value = MutationPlan::<RecordId, ()>::speculate(
            &plan,
            &key,
            Some(&current),
            &RecordId::from("c2"),
            &ctx,
        )
        .unwrap()
        .unwrap();
        assert_eq!(ids(value), vec!["c1", "c3"]);
    }

    #[test]
    fn test_delete_by_predicate() {
        let key = AffectedKey::list(CacheKey::collection("completions"));
        let plan = DeletePlan::matching(
            vec![key.clone()],
            |(task, person): &(String, String), c: &TaskCompletion| {
                c.task_id == task.as_str() && c.person_id == person.as_str()
            },
        );
        let current = serde_json::to_value(vec![
            completion("c1", "t1", "p1"),
            completion("c2", "t1", "p2"),
        ])
        .unwrap();
        let ctx = MutationContext::new(Utc::now());

        let value = MutationPlan::<(String, String), ()>::speculate(
            &plan,
            &key,
            Some(&current),
            &("t1".to_string(), "p2".to_string()),
            &ctx,
        )
        .unwrap()
        .unwrap();
        assert_eq!(ids(value), vec!["c1"]);
    }
}
