//! Tally Test Utilities
//!
//! Shared test infrastructure for the Tally workspace:
//! - Mock transport and mock server for driving the mutation engine
//! - Proptest generators for records and completions
//! - Fixtures for person detail trees and kiosk boards
//! - Assertions for cache contents

pub use tally_cache::{CacheKey, CacheStore, MutationRequest, QueryFetcher, Transport};
pub use tally_core::{
    Assignment, Goal, Kiosk, KioskBoard, MutationKind, Person, PersonDetail, RecordId,
    ResetPeriod, Routine, RoutineView, Task, TaskCompletion, TaskKind, TaskView, Timestamp,
    TransportError,
};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// MOCK TRANSPORT
// ============================================================================

type Reply<I, O> = Box<dyn FnOnce(&I) -> Result<O, TransportError> + Send>;
type Responder<I, O> = Box<dyn Fn(&I) -> Result<O, TransportError> + Send + Sync>;

/// Transport with scripted replies and a log of what was sent.
///
/// Scripted replies are consumed in order; once they run out the fallback
/// responder answers, and without one every call fails with a network error.
pub struct MockTransport<I, O> {
    replies: Mutex<VecDeque<Reply<I, O>>>,
    fallback: Option<Responder<I, O>>,
    sent: Mutex<Vec<(MutationKind, I)>>,
    delay: Option<Duration>,
}

impl<I, O> Default for MockTransport<I, O> {
    fn default() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: None,
            sent: Mutex::new(Vec::new()),
            delay: None,
        }
    }
}

impl<I, O> MockTransport<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every call with `f(input)`.
    pub fn responding<F>(f: F) -> Self
    where
        F: Fn(&I) -> Result<O, TransportError> + Send + Sync + 'static,
    {
        Self {
            fallback: Some(Box::new(f)),
            ..Self::default()
        }
    }

    /// Always reject with `error`.
    pub fn rejecting(error: TransportError) -> Self {
        Self::responding(move |_| Err(error.clone()))
    }

    /// Queue a reply for the next call.
    pub fn push_reply<F>(&self, f: F)
    where
        F: FnOnce(&I) -> Result<O, TransportError> + Send + 'static,
    {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(Box::new(f));
        }
    }

    pub fn push_ok(&self, value: O) {
        self.push_reply(move |_| Ok(value));
    }

    pub fn push_err(&self, error: TransportError) {
        self.push_reply(move |_| Err(error));
    }

    /// Wait this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn sent(&self) -> Vec<(MutationKind, I)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl<I, O> Transport<I, O> for MockTransport<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Send + 'static,
{
    async fn send(&self, request: &MutationRequest<I>) -> Result<O, TransportError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((request.kind.clone(), request.input.clone()));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.replies.lock().ok().and_then(|mut r| r.pop_front());
        match (scripted, &self.fallback) {
            (Some(reply), _) => reply(&request.input),
            (None, Some(fallback)) => fallback(&request.input),
            (None, None) => Err(TransportError::Network {
                reason: "no scripted reply".to_string(),
            }),
        }
    }
}

// ============================================================================
// MOCK SERVER
// ============================================================================

/// In-memory server truth that answers cache refreshes.
#[derive(Debug, Default)]
pub struct MockServer {
    truth: Mutex<HashMap<CacheKey, Value>>,
    fetches: AtomicUsize,
    delay: Option<Duration>,
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set(&self, key: CacheKey, value: Value) {
        if let Ok(mut truth) = self.truth.lock() {
            truth.insert(key, value);
        }
    }

    /// Serialize `value` and store it as the truth for `key`.
    pub fn set_json<T: serde::Serialize>(&self, key: CacheKey, value: &T) {
        if let Ok(value) = serde_json::to_value(value) {
            self.set(key, value);
        }
    }

    pub fn remove(&self, key: &CacheKey) {
        if let Ok(mut truth) = self.truth.lock() {
            truth.remove(key);
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        self.truth.lock().ok().and_then(|t| t.get(key).cloned())
    }

    /// Apply `f` to the truth under `key`, if present.
    pub fn update<F>(&self, key: &CacheKey, f: F)
    where
        F: FnOnce(&mut Value),
    {
        if let Ok(mut truth) = self.truth.lock() {
            if let Some(value) = truth.get_mut(key) {
                f(value);
            }
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Load every known truth into `store`, as an initial page load would.
    pub fn prime(&self, store: &CacheStore) {
        let entries: Vec<(CacheKey, Option<Value>)> = self
            .truth
            .lock()
            .map(|t| t.iter().map(|(k, v)| (k.clone(), Some(v.clone()))).collect())
            .unwrap_or_default();
        let _ = store.write_batch(entries);
    }
}

#[async_trait]
impl QueryFetcher for MockServer {
    async fn fetch(&self, key: &CacheKey) -> Result<Option<Value>, TransportError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        // Read before waiting: the answer reflects truth at request time
        let value = self.get(key);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(value)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Tally records.

    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc, Weekday};
    use proptest::prelude::*;

    /// A plausible server id (never temporary).
    pub fn arb_record_id() -> impl Strategy<Value = RecordId> {
        "[a-z0-9]{6,12}".prop_map(RecordId::new)
    }

    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (0i64..(365 * 24 * 60)).prop_map(|minutes| {
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_default()
                + ChronoDuration::minutes(minutes)
        })
    }

    pub fn arb_task_kind() -> impl Strategy<Value = TaskKind> {
        prop_oneof![
            Just(TaskKind::Simple),
            Just(TaskKind::Multiple),
            Just(TaskKind::Progress),
        ]
    }

    pub fn arb_weekday() -> impl Strategy<Value = Weekday> {
        (0u8..7).prop_map(|n| match n {
            0 => Weekday::Mon,
            1 => Weekday::Tue,
            2 => Weekday::Wed,
            3 => Weekday::Thu,
            4 => Weekday::Fri,
            5 => Weekday::Sat,
            _ => Weekday::Sun,
        })
    }

    pub fn arb_reset_period() -> impl Strategy<Value = ResetPeriod> {
        prop_oneof![
            Just(ResetPeriod::Daily),
            arb_weekday().prop_map(|anchor| ResetPeriod::Weekly { anchor }),
            (1u32..=31).prop_map(|anchor_day| ResetPeriod::Monthly { anchor_day }),
        ]
    }

    /// A goal owned by `person-1`.
    pub fn arb_goal() -> impl Strategy<Value = Goal> {
        (
            arb_record_id(),
            "[A-Za-z ]{1,20}",
            prop::option::of(1i64..1_000),
            arb_timestamp(),
        )
            .prop_map(|(id, name, target, created_at)| Goal {
                id,
                person_id: RecordId::from("person-1"),
                name,
                target,
                created_at,
            })
    }

    /// Goals with distinct ids.
    pub fn arb_goals(max: usize) -> impl Strategy<Value = Vec<Goal>> {
        prop::collection::vec(arb_goal(), 0..=max).prop_map(|goals| {
            goals
                .into_iter()
                .enumerate()
                .map(|(i, mut g)| {
                    g.id = RecordId::new(format!("{}-{}", g.id, i));
                    g
                })
                .collect()
        })
    }

    /// Completions of `task_id` by `person_id` at most two days before `now`.
    pub fn arb_completions(
        task_id: &str,
        person_id: &str,
        now: Timestamp,
        max: usize,
    ) -> impl Strategy<Value = Vec<TaskCompletion>> {
        let task_id = task_id.to_string();
        let person_id = person_id.to_string();
        prop::collection::vec((0i64..(2 * 24 * 60), 1i64..50), 0..=max).prop_map(
            move |entries| {
                entries
                    .into_iter()
                    .enumerate()
                    .map(|(i, (minutes_ago, value))| {
                        TaskCompletion::new(
                            RecordId::new(format!("c{:03}", i)),
                            task_id.as_str(),
                            person_id.as_str(),
                            now - ChronoDuration::minutes(minutes_ago),
                            Some(value),
                        )
                    })
                    .collect()
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built records and view trees.

    use super::*;
    use chrono::{TimeZone, Utc};
    use tally_core::PeriodClock;

    /// 2026-03-10 18:00 UTC, a Tuesday.
    pub fn fixed_now() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 3, 10, 18, 0, 0)
            .single()
            .unwrap_or_default()
    }

    pub fn person(id: &str, name: &str) -> Person {
        Person {
            id: RecordId::from(id),
            name: name.to_string(),
            color: None,
            avatar: None,
            created_at: fixed_now(),
        }
    }

    pub fn routine(id: &str, reset_period: ResetPeriod) -> Routine {
        Routine {
            id: RecordId::from(id),
            name: format!("Routine {}", id),
            reset_period,
            shared_by: None,
            created_at: fixed_now(),
        }
    }

    pub fn task(id: &str, routine_id: &str, kind: TaskKind, target: Option<i64>) -> Task {
        Task {
            id: RecordId::from(id),
            routine_id: RecordId::from(routine_id),
            name: format!("Task {}", id),
            kind,
            target,
            unit: None,
            position: 0,
        }
    }

    pub fn goal(id: &str, person_id: &str, name: &str) -> Goal {
        Goal {
            id: RecordId::from(id),
            person_id: RecordId::from(person_id),
            name: name.to_string(),
            target: None,
            created_at: fixed_now(),
        }
    }

    pub fn completion(id: &str, task_id: &str, person_id: &str, at: Timestamp, value: Option<i64>) -> TaskCompletion {
        TaskCompletion::new(RecordId::from(id), task_id, person_id, at, value)
    }

    /// A person with one daily routine holding a single task.
    pub fn person_detail(
        person_id: &str,
        task: Task,
        completions: Vec<TaskCompletion>,
        now: Timestamp,
    ) -> PersonDetail {
        let routine = routine(task.routine_id.as_str(), ResetPeriod::Daily);
        let view = TaskView::derived(task, completions, routine.reset_period, PeriodClock::utc(now));
        PersonDetail {
            person: person(person_id, &format!("Person {}", person_id)),
            assignments: vec![Assignment {
                id: RecordId::new(format!("assign-{}-{}", person_id, routine.id)),
                person_id: RecordId::from(person_id),
                routine: RoutineView {
                    routine,
                    tasks: vec![view],
                },
            }],
        }
    }

    pub fn kiosk_board(kiosk_id: &str, people: Vec<PersonDetail>) -> KioskBoard {
        KioskBoard {
            kiosk: Kiosk {
                id: RecordId::from(kiosk_id),
                name: format!("Kiosk {}", kiosk_id),
                person_ids: people.iter().map(|p| p.person.id.clone()).collect(),
                created_at: fixed_now(),
            },
            people,
        }
    }

    pub fn person_detail_key(person_id: &str) -> CacheKey {
        CacheKey::detail("person-detail", &RecordId::from(person_id))
    }

    pub fn kiosk_board_key(kiosk_id: &str) -> CacheKey {
        CacheKey::detail("kiosk-board", &RecordId::from(kiosk_id))
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over cached JSON values.

    use super::*;

    /// Every `"id"` string anywhere in `value` that is a placeholder.
    pub fn temporary_ids(value: &Value) -> Vec<String> {
        let mut found = Vec::new();
        collect_temporary_ids(value, &mut found);
        found
    }

    fn collect_temporary_ids(value: &Value, found: &mut Vec<String>) {
        match value {
            Value::Object(map) => {
                for (name, field) in map {
                    match field {
                        Value::String(s) if name == "id" && tally_core::is_temporary(s) => {
                            found.push(s.clone())
                        }
                        other => collect_temporary_ids(other, found),
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    collect_temporary_ids(item, found);
                }
            }
            _ => {}
        }
    }

    pub fn assert_no_temporary_ids(value: &Value) {
        let found = temporary_ids(value);
        assert!(found.is_empty(), "placeholder ids left in cache: {:?}", found);
    }

    /// The task view for `task_id` inside a cached person detail.
    pub fn task_view_in(detail: &Value, task_id: &str) -> TaskView {
        let detail: PersonDetail = match serde_json::from_value(detail.clone()) {
            Ok(detail) => detail,
            Err(e) => panic!("not a person detail: {}", e),
        };
        detail
            .assignments
            .into_iter()
            .flat_map(|a| a.routine.tasks)
            .find(|v| v.task.id == task_id)
            .unwrap_or_else(|| panic!("task {} not in detail", task_id))
    }

    pub fn assert_cached(store: &CacheStore, key: &CacheKey, expected: &Value) {
        let actual = store.peek(key).ok().flatten().map(|e| e.value);
        assert_eq!(actual.as_ref(), Some(expected), "cache value for {}", key);
    }
}

// ============================================================================
// TESTS
// ============================================================================
