//! Check-in and undo for task completions.
//!
//! Both edit the nested view trees the dashboard renders. After adding or
//! removing the completion they re-derive the task aggregate (done flag,
//! count, sum, percent, sequence numbers, running totals) with the same
//! rules the server applies, so the speculative view matches what the
//! server will send back.

use chrono::FixedOffset;
use serde_json::Value;
use tally_core::{
    CacheError, CompletionSection, ConfigError, KioskBoard, MutationError, PeriodClock,
    PersonDetail, RecordId, ResetPeriod, TaskCompletion, TaskKind, TaskTree, TaskView,
    Timestamp, UndoWindow, ValidationError,
};

use crate::engine::{reconcile_failed, speculation_failed, MutationContext, MutationPlan};
use crate::key::CacheKey;
use crate::shape::{decode, encode, AffectedKey, ValueShape};
use crate::temp_id::TempIdAllocator;

/// Which view tree a key holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeKind {
    /// One [`PersonDetail`].
    PersonDetail,
    /// One [`KioskBoard`].
    KioskBoard,
    /// A list of [`PersonDetail`].
    People,
}

impl TreeKind {
    fn shape(self) -> ValueShape {
        match self {
            Self::PersonDetail => ValueShape::nested("assignments"),
            Self::KioskBoard => ValueShape::nested("people"),
            Self::People => ValueShape::List,
        }
    }
}

/// A key holding a view tree that shows task completions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeKey {
    pub key: CacheKey,
    pub tree: TreeKind,
}

impl TreeKey {
    pub fn person_detail(key: CacheKey) -> Self {
        Self {
            key,
            tree: TreeKind::PersonDetail,
        }
    }

    pub fn kiosk_board(key: CacheKey) -> Self {
        Self {
            key,
            tree: TreeKind::KioskBoard,
        }
    }

    pub fn people(key: CacheKey) -> Self {
        Self {
            key,
            tree: TreeKind::People,
        }
    }

    fn affected(&self) -> AffectedKey {
        AffectedKey::new(self.key.clone(), self.tree.shape())
    }
}

/// Decode the tree under `key`, let `edit` change it, and re-encode.
///
/// Returns the new value and how many task views `edit` reported touching.
fn edit_tree<F>(
    tree: TreeKind,
    key: &CacheKey,
    value: &Value,
    mut edit: F,
) -> Result<(Value, usize), CacheError>
where
    F: FnMut(&mut dyn TaskTree) -> usize,
{
    match tree {
        TreeKind::PersonDetail => {
            let mut detail: PersonDetail = decode(key, value)?;
            let hits = edit(&mut detail);
            Ok((encode(key, &detail)?, hits))
        }
        TreeKind::KioskBoard => {
            let mut board: KioskBoard = decode(key, value)?;
            let hits = edit(&mut board);
            Ok((encode(key, &board)?, hits))
        }
        TreeKind::People => {
            let mut people: Vec<PersonDetail> = decode(key, value)?;
            let hits = edit(&mut people);
            Ok((encode(key, &people)?, hits))
        }
    }
}

/// Settings shared by check-in and undo.
#[derive(Debug, Clone)]
struct Trees {
    keys: Vec<TreeKey>,
    offset: FixedOffset,
}

impl Trees {
    fn affected(&self) -> Vec<AffectedKey> {
        self.keys.iter().map(TreeKey::affected).collect()
    }

    fn kind_of(&self, key: &CacheKey) -> Option<TreeKind> {
        self.keys.iter().find(|k| &k.key == key).map(|k| k.tree)
    }

    fn clock(&self, now: Timestamp) -> PeriodClock {
        PeriodClock::new(now, self.offset)
    }

    /// Apply `f` to the task `task_id` of `person_id` in the tree under `key`.
    ///
    /// An absent key stays absent; a tree that does not show the task is left
    /// unchanged.
    fn with_task<F>(
        &self,
        key: &AffectedKey,
        current: Option<&Value>,
        person_id: &RecordId,
        task_id: &RecordId,
        mut f: F,
    ) -> Result<Option<Value>, CacheError>
    where
        F: FnMut(ResetPeriod, &mut TaskView),
    {
        let Some(current) = current else {
            return Ok(None);
        };
        let Some(tree) = self.kind_of(&key.key) else {
            return Ok(Some(current.clone()));
        };
        let (value, hits) = edit_tree(tree, &key.key, current, |t| {
            t.with_task_mut(person_id, task_id, &mut f)
        })?;
        if hits == 0 {
            return Ok(Some(current.clone()));
        }
        Ok(Some(value))
    }
}

// ============================================================================
// CHECK-IN
// ============================================================================

/// A person checking in a task, with a value for counters and accumulators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckIn {
    pub person_id: RecordId,
    pub task_id: RecordId,
    /// Kind of the task being checked in; PROGRESS requires a value.
    pub kind: TaskKind,
    pub value: Option<i64>,
}

impl CheckIn {
    pub fn new(person_id: impl Into<RecordId>, task_id: impl Into<RecordId>, kind: TaskKind) -> Self {
        Self {
            person_id: person_id.into(),
            task_id: task_id.into(),
            kind,
            value: None,
        }
    }

    pub fn with_value(mut self, value: i64) -> Self {
        self.value = Some(value);
        self
    }

    /// Values are never negative, and an accumulator entry must carry one.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.value {
            Some(value) if value < 0 => Err(ValidationError::InvalidValue {
                field: "value".to_string(),
                reason: format!("{value} is negative"),
            }),
            None if self.kind == TaskKind::Progress => Err(ValidationError::InvalidValue {
                field: "value".to_string(),
                reason: "a progress check-in needs a value".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// Records a completion under a placeholder id and re-derives the task.
///
/// The server answers with the stored [`TaskCompletion`].
#[derive(Debug, Clone)]
pub struct CheckInPlan {
    trees: Trees,
}

impl CheckInPlan {
    pub fn new(keys: Vec<TreeKey>, offset: FixedOffset) -> Self {
        Self {
            trees: Trees { keys, offset },
        }
    }

    pub fn from_config(keys: Vec<TreeKey>, config: &CompletionSection) -> Result<Self, ConfigError> {
        Ok(Self::new(keys, config.offset()?))
    }
}

impl MutationPlan<CheckIn, TaskCompletion> for CheckInPlan {
    fn affected_keys(&self, _input: &CheckIn) -> Vec<AffectedKey> {
        self.trees.affected()
    }

    fn validate(&self, input: &CheckIn, _now: Timestamp) -> Result<(), MutationError> {
        Ok(input.validate()?)
    }

    fn prepare(
        &self,
        _input: &CheckIn,
        ctx: &mut MutationContext,
        ids: &TempIdAllocator,
    ) -> Result<(), MutationError> {
        ctx.temp_id = Some(ids.allocate("completion"));
        Ok(())
    }

    fn speculate(
        &self,
        key: &AffectedKey,
        current: Option<&Value>,
        input: &CheckIn,
        ctx: &MutationContext,
    ) -> Result<Option<Value>, MutationError> {
        let temp_id = ctx
            .temp_id
            .clone()
            .ok_or_else(|| speculation_failed(&key.key, "no placeholder id allocated"))?;
        let clock = self.trees.clock(ctx.now);
        self.trees
            .with_task(key, current, &input.person_id, &input.task_id, |period, view| {
                let completion = TaskCompletion::new(
                    temp_id.clone(),
                    input.task_id.clone(),
                    input.person_id.clone(),
                    ctx.now,
                    input.value,
                );
                view.record_completion(completion, period, clock);
            })
            .map_err(|e| speculation_failed(&key.key, e))
    }

    fn reconcile(
        &self,
        key: &AffectedKey,
        current: Option<&Value>,
        result: &TaskCompletion,
        ctx: &MutationContext,
    ) -> Result<Option<Value>, MutationError> {
        let Some(temp_id) = ctx.temp_id.as_ref() else {
            return Ok(current.cloned());
        };
        let clock = self.trees.clock(ctx.now);
        self.trees
            .with_task(key, current, &result.person_id, &result.task_id, |period, view| {
                view.replace_completion(temp_id, result.clone(), period, clock);
            })
            .map_err(|e| reconcile_failed(&key.key, e))
    }
}

// ============================================================================
// UNDO
// ============================================================================

/// Removing a completion the person sees on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Undo {
    pub completion: TaskCompletion,
    /// Kind of the completed task; SIMPLE completions are window-gated.
    pub kind: TaskKind,
}

impl Undo {
    pub fn new(completion: TaskCompletion, kind: TaskKind) -> Self {
        Self { completion, kind }
    }
}

/// Removes a completion and re-derives the task.
#[derive(Debug, Clone)]
pub struct UndoPlan {
    trees: Trees,
    window: UndoWindow,
}

impl UndoPlan {
    pub fn new(keys: Vec<TreeKey>, offset: FixedOffset, window: UndoWindow) -> Self {
        Self {
            trees: Trees { keys, offset },
            window,
        }
    }

    pub fn from_config(keys: Vec<TreeKey>, config: &CompletionSection) -> Result<Self, ConfigError> {
        Ok(Self::new(keys, config.offset()?, config.undo_window()))
    }

    pub fn window(&self) -> UndoWindow {
        self.window
    }
}

impl<O> MutationPlan<Undo, O> for UndoPlan {
    fn affected_keys(&self, _input: &Undo) -> Vec<AffectedKey> {
        self.trees.affected()
    }

    fn validate(&self, input: &Undo, now: Timestamp) -> Result<(), MutationError> {
        if self.window.permits(input.kind, &input.completion, now) {
            return Ok(());
        }
        Err(MutationError::UndoWindowExpired {
            completion_id: input.completion.id.to_string(),
            elapsed_past: self.window.closed_for(&input.completion, now),
        })
    }

    fn speculate(
        &self,
        key: &AffectedKey,
        current: Option<&Value>,
        input: &Undo,
        ctx: &MutationContext,
    ) -> Result<Option<Value>, MutationError> {
        let completion = &input.completion;
        let clock = self.trees.clock(ctx.now);
        self.trees
            .with_task(key, current, &completion.person_id, &completion.task_id, |period, view| {
                view.remove_completion(&completion.id, period, clock);
            })
            .map_err(|e| speculation_failed(&key.key, e))
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
    use chrono::{Duration, Offset, TimeZone, Utc};
    use tally_core::{Assignment, Person, Routine, RoutineView, Task};

    fn now() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 3, 10, 18, 0, 0).unwrap()
    }

    fn detail(kind: TaskKind, target: Option<i64>, completions: Vec<TaskCompletion>) -> PersonDetail {
        let task = Task {
            id: RecordId::from("t1"),
            routine_id: RecordId::from("r1"),
            name: "Stretch".to_string(),
            kind,
            target,
            unit: None,
            position: 0,
        };
        PersonDetail {
            person: Person {
                id: RecordId::from("p1"),
                name: "Ana".to_string(),
                color: None,
                avatar: None,
                created_at: now(),
            },
            assignments: vec![Assignment {
                id: RecordId::from("a1"),
                person_id: RecordId::from("p1"),
                routine: RoutineView {
                    routine: Routine {
                        id: RecordId::from("r1"),
                        name: "Daily".to_string(),
                        reset_period: ResetPeriod::Daily,
                        shared_by: None,
                        created_at: now(),
                    },
                    tasks: vec![TaskView::derived(
                        task,
                        completions,
                        ResetPeriod::Daily,
                        PeriodClock::utc(now()),
                    )],
                },
            }],
        }
    }

    fn view_of(value: &Value) -> TaskView {
        let detail: PersonDetail = serde_json::from_value(value.clone()).unwrap();
        detail.assignments[0].routine.tasks[0].clone()
    }

    fn key() -> TreeKey {
        TreeKey::person_detail(CacheKey::detail("person-detail", &RecordId::from("p1")))
    }

    #[test]
    fn test_check_in_then_reconcile() {
        let plan = CheckInPlan::new(vec![key()], Utc.fix());
        let affected = key().affected();
        let current = serde_json::to_value(detail(TaskKind::Multiple, Some(3), vec![])).unwrap();
        let mut ctx = MutationContext::new(now());
        MutationPlan::prepare(&plan, &CheckIn::new("p1", "t1", TaskKind::Multiple), &mut ctx, &TempIdAllocator::new())
            .unwrap();

        let speculated = plan
            .speculate(&affected, Some(&current), &CheckIn::new("p1", "t1", TaskKind::Multiple), &ctx)
            .unwrap()
            .unwrap();
        let view = view_of(&speculated);
        assert_eq!(view.aggregate.completion_count, 1);
        assert!(view.completions[0].id.is_temporary());

        let server = TaskCompletion::new(RecordId::from("c-1"), "t1", "p1", now(), None);
        let reconciled = plan
            .reconcile(&affected, Some(&speculated), &server, &ctx)
            .unwrap()
            .unwrap();
        let view = view_of(&reconciled);
        assert_eq!(view.completions.len(), 1);
        assert_eq!(view.completions[0].id, "c-1");
    }

    #[test]
    fn test_other_person_is_untouched() {
        let plan = CheckInPlan::new(vec![key()], Utc.fix());
        let current = serde_json::to_value(detail(TaskKind::Simple, None, vec![])).unwrap();
        let mut ctx = MutationContext::new(now());
        MutationPlan::prepare(&plan, &CheckIn::new("p2", "t1", TaskKind::Simple), &mut ctx, &TempIdAllocator::new())
            .unwrap();

        let value = plan
            .speculate(&key().affected(), Some(&current), &CheckIn::new("p2", "t1", TaskKind::Simple), &ctx)
            .unwrap();
        assert_eq!(value, Some(current));
    }

    #[test]
    fn test_check_in_rejects_negative_and_missing_values() {
        let plan = CheckInPlan::new(vec![key()], Utc.fix());
        let negative = CheckIn::new("p1", "t1", TaskKind::Progress).with_value(-30);
        assert!(matches!(
            plan.validate(&negative, now()),
            Err(MutationError::Invalid(ValidationError::InvalidValue { .. }))
        ));

        let missing = CheckIn::new("p1", "t1", TaskKind::Progress);
        assert!(plan.validate(&missing, now()).is_err());

        assert!(plan.validate(&CheckIn::new("p1", "t1", TaskKind::Simple), now()).is_ok());
        assert!(plan
            .validate(&CheckIn::new("p1", "t1", TaskKind::Progress).with_value(0), now())
            .is_ok());
    }

    #[test]
    fn test_undo_window_gates_simple_only() {
        let plan = UndoPlan::new(vec![key()], Utc.fix(), UndoWindow::default());
        let old = TaskCompletion::new(
            RecordId::from("c1"),
            "t1",
            "p1",
            now() - Duration::minutes(10),
            None,
        );

        let simple = Undo::new(old.clone(), TaskKind::Simple);
        let err = MutationPlan::<Undo, ()>::validate(&plan, &simple, now()).unwrap_err();
        match err {
            MutationError::UndoWindowExpired { elapsed_past, .. } => {
                assert_eq!(elapsed_past, std::time::Duration::from_secs(300));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let counter = Undo::new(old, TaskKind::Multiple);
        assert!(MutationPlan::<Undo, ()>::validate(&plan, &counter, now()).is_ok());
    }

    #[test]
    fn test_undo_subtracts_from_running_total() {
        let plan = UndoPlan::new(vec![key()], Utc.fix(), UndoWindow::default());
        let c1 = TaskCompletion::new(RecordId::from("c1"), "t1", "p1", now() - Duration::hours(2), Some(40));
        let c2 = TaskCompletion::new(RecordId::from("c2"), "t1", "p1", now() - Duration::hours(1), Some(30));
        let current =
            serde_json::to_value(detail(TaskKind::Progress, Some(100), vec![c1.clone(), c2])).unwrap();
        let ctx = MutationContext::new(now());

        let undo = Undo::new(c1, TaskKind::Progress);
        let value = MutationPlan::<Undo, ()>::speculate(&plan, &key().affected(), Some(&current), &undo, &ctx)
            .unwrap()
            .unwrap();
        let view = view_of(&value);
        assert_eq!(view.aggregate.total_value, 30);
        assert_eq!(view.completions.len(), 1);
        assert_eq!(view.completions[0].sequence, Some(1));
        assert_eq!(view.completions[0].running_total, Some(30));
    }
}
