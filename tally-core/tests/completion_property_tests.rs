//! Property tests for task-completion derivation.

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use tally_core::{derive, RecordId, TaskCompletion, TaskKind, Timestamp};

fn period_start() -> Timestamp {
    Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap()
}

fn kind_strategy() -> impl Strategy<Value = TaskKind> {
    prop_oneof![
        Just(TaskKind::Simple),
        Just(TaskKind::Multiple),
        Just(TaskKind::Progress),
    ]
}

/// Completions spread across the previous and current period, unique ids.
fn completions_strategy() -> impl Strategy<Value = Vec<TaskCompletion>> {
    prop::collection::vec((-3_000i64..3_000, 1i64..100), 0..20).prop_map(|entries| {
        entries
            .into_iter()
            .enumerate()
            .map(|(i, (minutes, value))| {
                TaskCompletion::new(
                    RecordId::new(format!("c{:03}", i)),
                    "task",
                    "person",
                    period_start() + Duration::minutes(minutes),
                    Some(value),
                )
            })
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: derivation does not depend on the order completions arrive in.
    #[test]
    fn prop_derive_is_order_independent(
        kind in kind_strategy(),
        target in prop::option::of(1i64..500),
        (original, shuffled) in completions_strategy()
            .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle())),
    ) {
        let a = derive(kind, target, &original, period_start());
        let b = derive(kind, target, &shuffled, period_start());
        prop_assert_eq!(a, b);
    }

    /// Property: completions before the period start never change the result.
    #[test]
    fn prop_out_of_period_completions_are_ignored(
        kind in kind_strategy(),
        target in prop::option::of(1i64..500),
        completions in completions_strategy(),
    ) {
        let in_period: Vec<TaskCompletion> = completions
            .iter()
            .filter(|c| c.completed_at >= period_start())
            .cloned()
            .collect();
        let all = derive(kind, target, &completions, period_start());
        let only_current = derive(kind, target, &in_period, period_start());
        prop_assert_eq!(all, only_current);
    }

    /// Property: adding an in-period completion strictly increases count and sum.
    #[test]
    fn prop_adding_completion_is_strictly_monotonic(
        kind in kind_strategy(),
        target in prop::option::of(1i64..500),
        completions in completions_strategy(),
        minutes in 0i64..1_000,
        value in 1i64..100,
    ) {
        let before = derive(kind, target, &completions, period_start());
        let mut grown = completions.clone();
        grown.push(TaskCompletion::new(
            RecordId::from("new"),
            "task",
            "person",
            period_start() + Duration::minutes(minutes),
            Some(value),
        ));
        let after = derive(kind, target, &grown, period_start());

        prop_assert_eq!(after.aggregate.completion_count, before.aggregate.completion_count + 1);
        prop_assert!(after.aggregate.total_value > before.aggregate.total_value);
        // Once done, a task stays done as completions are added
        prop_assert!(!before.aggregate.is_complete || after.aggregate.is_complete);
    }

    /// Property: PROGRESS running totals end at the aggregate sum.
    #[test]
    fn prop_progress_running_total_matches_sum(
        completions in completions_strategy(),
    ) {
        let d = derive(TaskKind::Progress, Some(100), &completions, period_start());
        let last = d.in_period.last().and_then(|c| c.running_total).unwrap_or(0);
        prop_assert_eq!(last, d.aggregate.total_value);
        for (i, c) in d.in_period.iter().enumerate() {
            prop_assert_eq!(c.sequence, Some(i as u32 + 1));
        }
    }
}

#[test]
fn accumulator_check_in_sequences_after_prior_entries() {
    let prior = vec![TaskCompletion::new(
        RecordId::from("c1"),
        "task",
        "person",
        period_start() + Duration::hours(8),
        Some(40),
    )];
    let before = derive(TaskKind::Progress, Some(100), &prior, period_start());
    assert_eq!(before.aggregate.total_value, 40);

    let mut after_input = prior.clone();
    after_input.push(TaskCompletion::new(
        RecordId::from("c2"),
        "task",
        "person",
        period_start() + Duration::hours(9),
        Some(30),
    ));
    let after = derive(TaskKind::Progress, Some(100), &after_input, period_start());

    assert_eq!(after.aggregate.total_value, 70);
    assert!(!after.aggregate.is_complete);
    let entry = after.in_period.iter().find(|c| c.id == "c2").unwrap();
    assert_eq!(entry.running_total, Some(70));
    assert_eq!(entry.sequence, Some(before.aggregate.completion_count + 1));
}
