//! Task-completion derivation.
//!
//! A task's state is never stored. It is a pure function of the task kind,
//! its optional target, the completions inside the current reset period and
//! the current time. Both the server and the optimistic client run
//! [`derive`], so a speculative check-in renders exactly what the server
//! will send back.

use crate::{ResetPeriod, TaskCompletion, TaskKind, Timestamp};
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Derived per-period state of one task.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskAggregate {
    pub is_complete: bool,
    pub completion_count: u32,
    pub total_value: i64,
    /// Percentage toward the target, capped at 100. Absent without a target.
    pub progress_percent: Option<f64>,
}

/// Output of [`derive`]: the aggregate plus the in-period completions in
/// entry order, each carrying its derived sequence and running total.
#[derive(Debug, Clone, PartialEq)]
pub struct Derivation {
    pub aggregate: TaskAggregate,
    pub in_period: Vec<TaskCompletion>,
}

/// The household clock: the current instant and the local UTC offset used
/// for period boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodClock {
    pub now: Timestamp,
    pub offset: FixedOffset,
}

impl PeriodClock {
    pub fn new(now: Timestamp, offset: FixedOffset) -> Self {
        Self { now, offset }
    }

    pub fn utc(now: Timestamp) -> Self {
        Self {
            now,
            offset: Utc.fix(),
        }
    }

    pub fn period_start(&self, period: ResetPeriod) -> Timestamp {
        period.period_start(self.now, self.offset)
    }
}

/// Derive the aggregate of a task from its completions.
///
/// Completions before `period_start` are ignored. In-period completions are
/// ordered by `(completed_at, id)`; for [`TaskKind::Progress`] each gets a
/// 1-based `sequence` and the `running_total` after its value was added.
pub fn derive(
    kind: TaskKind,
    target: Option<i64>,
    completions: &[TaskCompletion],
    period_start: Timestamp,
) -> Derivation {
    let mut in_period: Vec<TaskCompletion> = completions
        .iter()
        .filter(|c| c.completed_at >= period_start)
        .cloned()
        .collect();
    in_period.sort_by(|a, b| {
        a.completed_at
            .cmp(&b.completed_at)
            .then_with(|| a.id.cmp(&b.id))
    });

    let count = u32::try_from(in_period.len()).unwrap_or(u32::MAX);
    let mut running = 0i64;
    for (index, completion) in in_period.iter_mut().enumerate() {
        running = running.saturating_add(completion.value.unwrap_or(0));
        if kind == TaskKind::Progress {
            completion.sequence = Some(u32::try_from(index + 1).unwrap_or(u32::MAX));
            completion.running_total = Some(running);
        } else {
            completion.sequence = None;
            completion.running_total = None;
        }
    }
    let total = running;

    let aggregate = match kind {
        TaskKind::Simple => TaskAggregate {
            is_complete: count > 0,
            completion_count: count,
            total_value: total,
            progress_percent: None,
        },
        TaskKind::Multiple => TaskAggregate {
            is_complete: target.is_some_and(|t| i64::from(count) >= t),
            completion_count: count,
            total_value: total,
            progress_percent: target.map(|t| percent(i64::from(count), t)),
        },
        TaskKind::Progress => TaskAggregate {
            is_complete: target.is_some_and(|t| total >= t),
            completion_count: count,
            total_value: total,
            progress_percent: target.map(|t| percent(total, t)),
        },
    };

    Derivation {
        aggregate,
        in_period,
    }
}

/// Derive against a reset period and clock rather than an explicit start.
pub fn derive_at(
    kind: TaskKind,
    target: Option<i64>,
    completions: &[TaskCompletion],
    period: ResetPeriod,
    clock: PeriodClock,
) -> Derivation {
    derive(kind, target, completions, clock.period_start(period))
}

fn percent(amount: i64, target: i64) -> f64 {
    if target <= 0 {
        return 100.0;
    }
    let pct = (amount as f64 / target as f64) * 100.0;
    pct.clamp(0.0, 100.0)
}

// ============================================================================
// UNDO WINDOW
// ============================================================================

/// Grace period after a SIMPLE completion during which it may be undone.
///
/// Expiry is a pure wall-clock comparison; the server is never told.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoWindow {
    pub duration: Duration,
}

impl UndoWindow {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Time left before the window closes, or `None` once closed.
    pub fn remaining(&self, completion: &TaskCompletion, now: Timestamp) -> Option<Duration> {
        let elapsed = (now - completion.completed_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        self.duration.checked_sub(elapsed).filter(|d| !d.is_zero())
    }

    /// Whether `completion` is still inside the window.
    pub fn is_open(&self, completion: &TaskCompletion, now: Timestamp) -> bool {
        self.remaining(completion, now).is_some()
    }

    /// How long ago the window closed (zero while open).
    pub fn closed_for(&self, completion: &TaskCompletion, now: Timestamp) -> Duration {
        let elapsed = (now - completion.completed_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        elapsed.saturating_sub(self.duration)
    }

    /// Whether a client-initiated undo of `completion` is allowed.
    ///
    /// Only SIMPLE completions are gated by the window; counter and
    /// accumulator entries can be removed while they are in the period.
    pub fn permits(&self, kind: TaskKind, completion: &TaskCompletion, now: Timestamp) -> bool {
        !kind.uses_undo_window() || self.is_open(completion, now)
    }
}

impl Default for UndoWindow {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}
