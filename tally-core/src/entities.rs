//! Entity records and the nested view trees the dashboard caches.

use crate::{
    derive_at, PeriodClock, RecordId, ResetPeriod, TaskAggregate, TaskKind, Timestamp,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Any record that can live inside a cached collection.
///
/// Implementations must round-trip through serde and expose the id that
/// create/update/delete use to find them.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn record_id(&self) -> &RecordId;

    /// Replace the record's id (used when a placeholder is resolved).
    fn set_record_id(&mut self, id: RecordId);
}

macro_rules! impl_record {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Record for $ty {
                fn record_id(&self) -> &RecordId {
                    &self.id
                }

                fn set_record_id(&mut self, id: RecordId) {
                    self.id = id;
                }
            }
        )+
    };
}

// ============================================================================
// PLAIN RECORDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: RecordId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub created_at: Timestamp,
}

/// A recurring task list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routine {
    pub id: RecordId,
    pub name: String,
    pub reset_period: ResetPeriod,
    /// Set when the routine is shared into this account by another owner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_by: Option<RecordId>,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: RecordId,
    pub routine_id: RecordId,
    pub name: String,
    pub kind: TaskKind,
    /// Target count (MULTIPLE) or sum (PROGRESS).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub position: u32,
}

/// One check-in of a task by a person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCompletion {
    pub id: RecordId,
    pub task_id: RecordId,
    pub person_id: RecordId,
    pub completed_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<i64>,
    /// 1-based order within the period (PROGRESS only, derived).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u32>,
    /// Sum of values up to and including this entry (PROGRESS only, derived).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_total: Option<i64>,
}

impl TaskCompletion {
    pub fn new(
        id: RecordId,
        task_id: impl Into<RecordId>,
        person_id: impl Into<RecordId>,
        completed_at: Timestamp,
        value: Option<i64>,
    ) -> Self {
        Self {
            id,
            task_id: task_id.into(),
            person_id: person_id.into(),
            completed_at,
            value,
            sequence: None,
            running_total: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub id: RecordId,
    pub person_id: RecordId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<i64>,
    pub created_at: Timestamp,
}

/// A check-in device shared by several people.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kiosk {
    pub id: RecordId,
    pub name: String,
    pub person_ids: Vec<RecordId>,
    pub created_at: Timestamp,
}

impl_record!(Person, Routine, Task, TaskCompletion, Goal, Kiosk);

// ============================================================================
// VIEW TREES
// ============================================================================

/// A task with its in-period completions and derived aggregate, as rendered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskView {
    pub task: Task,
    pub completions: Vec<TaskCompletion>,
    #[serde(flatten)]
    pub aggregate: TaskAggregate,
}

impl TaskView {
    /// Build a view from raw completions, deriving the aggregate.
    pub fn derived(
        task: Task,
        completions: Vec<TaskCompletion>,
        period: ResetPeriod,
        clock: PeriodClock,
    ) -> Self {
        let mut view = Self {
            task,
            completions,
            aggregate: TaskAggregate::default(),
        };
        view.recompute(period, clock);
        view
    }

    /// Re-derive the aggregate and drop completions outside the period.
    pub fn recompute(&mut self, period: ResetPeriod, clock: PeriodClock) {
        let derivation = derive_at(
            self.task.kind,
            self.task.target,
            &self.completions,
            period,
            clock,
        );
        self.completions = derivation.in_period;
        self.aggregate = derivation.aggregate;
    }

    pub fn completion(&self, id: &RecordId) -> Option<&TaskCompletion> {
        self.completions.iter().find(|c| &c.id == id)
    }

    /// Add a completion and re-derive.
    pub fn record_completion(
        &mut self,
        completion: TaskCompletion,
        period: ResetPeriod,
        clock: PeriodClock,
    ) {
        self.completions.push(completion);
        self.recompute(period, clock);
    }

    /// Remove a completion and re-derive. Returns the removed record.
    pub fn remove_completion(
        &mut self,
        id: &RecordId,
        period: ResetPeriod,
        clock: PeriodClock,
    ) -> Option<TaskCompletion> {
        let index = self.completions.iter().position(|c| &c.id == id)?;
        let removed = self.completions.remove(index);
        self.recompute(period, clock);
        Some(removed)
    }

    /// Swap the completion carrying `id` for `replacement` and re-derive.
    pub fn replace_completion(
        &mut self,
        id: &RecordId,
        replacement: TaskCompletion,
        period: ResetPeriod,
        clock: PeriodClock,
    ) -> bool {
        match self.completions.iter_mut().find(|c| &c.id == id) {
            Some(slot) => {
                *slot = replacement;
                self.recompute(period, clock);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutineView {
    pub routine: Routine,
    pub tasks: Vec<TaskView>,
}

/// A routine assigned to a person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: RecordId,
    pub person_id: RecordId,
    pub routine: RoutineView,
}

/// A person with the full assignment→routine→task→completion tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonDetail {
    pub person: Person,
    pub assignments: Vec<Assignment>,
}

/// Everything a kiosk renders: several people's detail trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KioskBoard {
    pub kiosk: Kiosk,
    pub people: Vec<PersonDetail>,
}

/// A tree containing task views for one or more people.
///
/// Check-in and undo use this to reach a task without knowing which
/// representation (person detail, kiosk board) they are editing.
pub trait TaskTree {
    /// Visit every `(person, period, task view)` in the tree.
    fn for_each_task_mut(&mut self, f: &mut dyn FnMut(&RecordId, ResetPeriod, &mut TaskView));

    /// Apply `f` to the task `task_id` as seen by `person_id`.
    ///
    /// Returns how many task views were visited (a routine may be assigned
    /// twice to the same person on a board).
    fn with_task_mut(
        &mut self,
        person_id: &RecordId,
        task_id: &RecordId,
        f: &mut dyn FnMut(ResetPeriod, &mut TaskView),
    ) -> usize {
        let mut hits = 0;
        self.for_each_task_mut(&mut |person, period, view| {
            if person == person_id && &view.task.id == task_id {
                hits += 1;
                f(period, view);
            }
        });
        hits
    }
}

impl TaskTree for PersonDetail {
    fn for_each_task_mut(&mut self, f: &mut dyn FnMut(&RecordId, ResetPeriod, &mut TaskView)) {
        let person_id = &self.person.id;
        for assignment in &mut self.assignments {
            let period = assignment.routine.routine.reset_period;
            for view in &mut assignment.routine.tasks {
                f(person_id, period, view);
            }
        }
    }
}

impl TaskTree for KioskBoard {
    fn for_each_task_mut(&mut self, f: &mut dyn FnMut(&RecordId, ResetPeriod, &mut TaskView)) {
        for detail in &mut self.people {
            detail.for_each_task_mut(f);
        }
    }
}

impl TaskTree for Vec<PersonDetail> {
    fn for_each_task_mut(&mut self, f: &mut dyn FnMut(&RecordId, ResetPeriod, &mut TaskView)) {
        for detail in self.iter_mut() {
            detail.for_each_task_mut(f);
        }
    }
}
