//! Optimistic mutation engine.
//!
//! [`MutationEngine::run`] drives one write through a fixed lifecycle:
//!
//! 1. cancel any refresh in flight for the affected keys
//! 2. snapshot the affected keys, then validate the request
//! 3. speculate on every key and commit all results in one batch
//! 4. send the request through the transport (the only await point)
//! 5. on success reconcile every key, on failure restore the snapshot;
//!    either way schedule a refresh of every affected key
//! 6. call the settled hook exactly once
//!
//! A rejected request still passes through steps 1, 2, 5 and 6: nothing is
//! written, but every affected key is scheduled for refresh.
//!
//! A speculate or reconcile transform that fails is a defect. Speculation
//! results are only committed once every key has produced one, so a failing
//! transform leaves the store exactly as the snapshot recorded it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tally_core::{
    EngineSection, MutationError, MutationKind, RecordId, TallyConfig, TallyError, TallyResult,
    Timestamp,
};

use crate::key::CacheKey;
use crate::key_lock::KeyLocks;
use crate::shape::{decode, encode, AffectedKey, RawRecord};
use crate::snapshot::Snapshot;
use crate::store::CacheStore;
use crate::temp_id::TempIdAllocator;
use crate::transport::Transport;

// ============================================================================
// REQUEST, CONTEXT, OUTCOME
// ============================================================================

/// One write: what kind of mutation it is and its input payload.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest<I> {
    pub kind: MutationKind,
    pub input: I,
}

impl<I> MutationRequest<I> {
    pub fn new(kind: MutationKind, input: I) -> Self {
        Self { kind, input }
    }
}

/// State shared by the transforms of a single run.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationContext {
    /// Placeholder id allocated for a create, if any.
    pub temp_id: Option<RecordId>,
    /// Wall-clock time the mutation started.
    pub now: Timestamp,
}

impl MutationContext {
    pub fn new(now: Timestamp) -> Self {
        Self { temp_id: None, now }
    }
}

/// What the settled hook receives.
#[derive(Debug)]
pub struct MutationOutcome<'a, O> {
    pub kind: &'a MutationKind,
    pub temp_id: Option<&'a RecordId>,
    pub result: Result<&'a O, &'a TallyError>,
    /// Set when the server accepted the write but its result could not be
    /// folded into the cache. The cache shows the snapshot until the
    /// scheduled refresh lands.
    pub reconcile_defect: Option<&'a TallyError>,
}

impl<O> MutationOutcome<'_, O> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// True when a confirmed write was reverted in the cache.
    pub fn was_reverted(&self) -> bool {
        self.reconcile_defect.is_some()
    }
}

// ============================================================================
// PLAN AND HOOKS
// ============================================================================

/// The per-mutation half of the lifecycle: which keys it touches and how.
///
/// `speculate` and `reconcile` are synchronous. Returning `Ok(None)` leaves
/// the key absent (or removes it).
pub trait MutationPlan<I, O>: Send + Sync {
    fn affected_keys(&self, input: &I) -> Vec<AffectedKey>;

    /// Reject a request before anything is speculated.
    fn validate(&self, _input: &I, _now: Timestamp) -> Result<(), MutationError> {
        Ok(())
    }

    /// Runs once before speculation, e.g. to allocate a placeholder id.
    fn prepare(
        &self,
        _input: &I,
        _ctx: &mut MutationContext,
        _ids: &TempIdAllocator,
    ) -> Result<(), MutationError> {
        Ok(())
    }

    fn speculate(
        &self,
        key: &AffectedKey,
        current: Option<&Value>,
        input: &I,
        ctx: &MutationContext,
    ) -> Result<Option<Value>, MutationError>;

    /// Fold the server's result into `key`.
    ///
    /// By default, when a placeholder id was allocated, every record carrying
    /// it is replaced by the server result; otherwise the value is overwritten
    /// with the server result wholesale.
    fn reconcile(
        &self,
        key: &AffectedKey,
        current: Option<&Value>,
        result: &O,
        ctx: &MutationContext,
    ) -> Result<Option<Value>, MutationError>
    where
        O: Serialize,
    {
        let server = encode(&key.key, result).map_err(|e| reconcile_failed(&key.key, e))?;
        match &ctx.temp_id {
            Some(temp_id) => {
                let replacement: RawRecord =
                    decode(&key.key, &server).map_err(|e| reconcile_failed(&key.key, e))?;
                let edit = key
                    .shape
                    .replace(&key.key, current, temp_id, &replacement)
                    .map_err(|e| reconcile_failed(&key.key, e))?;
                Ok(edit.value)
            }
            None => Ok(Some(server)),
        }
    }
}

pub(crate) fn speculation_failed(key: &CacheKey, e: impl fmt::Display) -> MutationError {
    MutationError::SpeculationFailed {
        key: key.to_string(),
        reason: e.to_string(),
    }
}

pub(crate) fn reconcile_failed(key: &CacheKey, e: impl fmt::Display) -> MutationError {
    MutationError::ReconcileFailed {
        key: key.to_string(),
        reason: e.to_string(),
    }
}

/// Caller callbacks run at the end of a mutation.
pub trait MutationHooks<O>: Send + Sync {
    /// Compensating action, run after rollback.
    fn on_error(&self, _error: &TallyError) {}

    /// Runs exactly once per mutation, whatever the outcome.
    fn on_settled(&self, _outcome: &MutationOutcome<'_, O>) {}
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl<O> MutationHooks<O> for NoHooks {}

// ============================================================================
// ENGINE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Hold per-key locks from step 1 through step 6.
    pub serialize_per_key: bool,
    /// Schedule a refresh of every affected key after settlement.
    pub refresh_on_settle: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            serialize_per_key: true,
            refresh_on_settle: true,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_serialize_per_key(mut self, enabled: bool) -> Self {
        self.serialize_per_key = enabled;
        self
    }

    pub fn with_refresh_on_settle(mut self, enabled: bool) -> Self {
        self.refresh_on_settle = enabled;
        self
    }
}

impl From<&EngineSection> for EngineConfig {
    fn from(section: &EngineSection) -> Self {
        Self::new()
            .with_serialize_per_key(section.serialize_per_key)
            .with_refresh_on_settle(section.refresh_on_settle)
    }
}

type Clock = Arc<dyn Fn() -> Timestamp + Send + Sync>;

/// Runs optimistic mutations against one cache store.
pub struct MutationEngine {
    store: Arc<CacheStore>,
    ids: TempIdAllocator,
    locks: KeyLocks,
    config: EngineConfig,
    clock: Clock,
}

impl fmt::Debug for MutationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationEngine")
            .field("config", &self.config)
            .field("ids_issued", &self.ids.issued())
            .finish_non_exhaustive()
    }
}

impl MutationEngine {
    pub fn new(store: Arc<CacheStore>, config: EngineConfig) -> Self {
        Self {
            store,
            ids: TempIdAllocator::new(),
            locks: KeyLocks::new(),
            config,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_defaults(store: Arc<CacheStore>) -> Self {
        Self::new(store, EngineConfig::default())
    }

    /// Build an engine over a fresh store sized from the `[engine]` section.
    pub fn from_config(config: &TallyConfig) -> Self {
        let store = Arc::new(CacheStore::new(config.engine.event_capacity));
        Self::new(store, EngineConfig::from(&config.engine))
    }

    /// Use `clock` instead of the system time for `MutationContext::now`.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> Timestamp + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn ids(&self) -> &TempIdAllocator {
        &self.ids
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> Timestamp {
        (self.clock)()
    }

    /// Run one mutation to settlement and return the server's result.
    pub async fn run<I, O, P, T, H>(
        &self,
        request: MutationRequest<I>,
        plan: &P,
        transport: &T,
        hooks: &H,
    ) -> TallyResult<O>
    where
        I: Send + Sync,
        O: Serialize + Send + Sync,
        P: MutationPlan<I, O> + ?Sized,
        T: Transport<I, O> + ?Sized,
        H: MutationHooks<O> + ?Sized,
    {
        let mut ctx = MutationContext::new(self.now());
        let mut defect = None;

        let affected = plan.affected_keys(&request.input);
        let keys: Vec<CacheKey> = affected.iter().map(|a| a.key.clone()).collect();

        let guards = if self.config.serialize_per_key {
            match self.locks.acquire(&keys).await {
                Ok(guards) => Some(guards),
                Err(e) => return settle(&request.kind, &ctx, hooks, Err(e.into()), None),
            }
        } else {
            None
        };

        let result = self
            .lifecycle(&request, plan, transport, &affected, &mut ctx, &mut defect)
            .await;
        let result = settle(&request.kind, &ctx, hooks, result, defect.as_ref());
        drop(guards);
        result
    }

    async fn lifecycle<I, O, P, T>(
        &self,
        request: &MutationRequest<I>,
        plan: &P,
        transport: &T,
        affected: &[AffectedKey],
        ctx: &mut MutationContext,
        defect: &mut Option<TallyError>,
    ) -> TallyResult<O>
    where
        I: Send + Sync,
        O: Serialize + Send + Sync,
        P: MutationPlan<I, O> + ?Sized,
        T: Transport<I, O> + ?Sized,
    {
        let owned: Vec<CacheKey> = affected.iter().map(|a| a.key.clone()).collect();
        let keys = owned.as_slice();

        // 1. Cancel refreshes that would land on top of the speculation
        for key in keys {
            if self.store.cancel_pending_refresh(key)? {
                tracing::debug!(key = %key, "cancelled in-flight refresh");
            }
        }

        // 2. Snapshot
        let snapshot = Snapshot::capture(&self.store, keys)?;

        if let Err(e) = plan.validate(&request.input, ctx.now) {
            tracing::debug!(
                mutation = %request.kind,
                error = %e,
                "mutation rejected before speculation"
            );
            self.schedule_refreshes(keys)?;
            return Err(e.into());
        }

        // 3. Speculate on every key, commit only if all succeed
        let speculated = match plan.prepare(&request.input, ctx, &self.ids) {
            Ok(()) => self.speculate_all::<I, O, P>(plan, affected, &snapshot, &request.input, ctx),
            Err(e) => Err(e),
        };
        match speculated {
            Ok(writes) => self.store.write_batch(writes)?,
            Err(e) => {
                tracing::error!(
                    mutation = %request.kind,
                    error = %e,
                    "speculation failed, nothing committed"
                );
                self.schedule_refreshes(keys)?;
                return Err(e.into());
            }
        }
        tracing::debug!(
            mutation = %request.kind,
            keys = keys.len(),
            temp_id = ctx.temp_id.as_ref().map(RecordId::as_str),
            "speculation applied"
        );

        // 4. Transport
        let sent = transport.send(request).await;

        // 5. Reconcile or roll back
        match sent {
            Ok(result) => {
                match self.reconcile_all::<I, O, P>(plan, affected, keys, &result, ctx) {
                    Ok(writes) => self.store.write_batch(writes)?,
                    Err(e) => {
                        tracing::error!(
                            mutation = %request.kind,
                            error = %e,
                            "reconcile failed, restoring snapshot until refresh"
                        );
                        snapshot.restore(&self.store)?;
                        *defect = Some(e);
                    }
                }
                self.schedule_refreshes(keys)?;
                tracing::debug!(mutation = %request.kind, "mutation confirmed");
                Ok(result)
            }
            Err(e) => {
                tracing::warn!(
                    mutation = %request.kind,
                    error = %e,
                    conflict = e.is_conflict(),
                    "transport rejected mutation, rolling back"
                );
                snapshot.restore(&self.store)?;
                self.schedule_refreshes(keys)?;
                Err(MutationError::Rejected(e).into())
            }
        }
    }

    fn speculate_all<I, O, P>(
        &self,
        plan: &P,
        affected: &[AffectedKey],
        snapshot: &Snapshot,
        input: &I,
        ctx: &MutationContext,
    ) -> Result<Vec<(CacheKey, Option<Value>)>, MutationError>
    where
        P: MutationPlan<I, O> + ?Sized,
    {
        let mut working: HashMap<CacheKey, Option<Value>> = HashMap::new();
        let mut order = Vec::new();
        for key in affected {
            let current = match working.get(&key.key) {
                Some(value) => value.clone(),
                None => {
                    order.push(key.key.clone());
                    snapshot.get(&key.key).cloned().flatten()
                }
            };
            let next = plan.speculate(key, current.as_ref(), input, ctx)?;
            working.insert(key.key.clone(), next);
        }
        Ok(order
            .into_iter()
            .map(|k| {
                let value = working.remove(&k).flatten();
                (k, value)
            })
            .collect())
    }

    fn reconcile_all<I, O, P>(
        &self,
        plan: &P,
        affected: &[AffectedKey],
        keys: &[CacheKey],
        result: &O,
        ctx: &MutationContext,
    ) -> Result<Vec<(CacheKey, Option<Value>)>, TallyError>
    where
        O: Serialize,
        P: MutationPlan<I, O> + ?Sized,
    {
        let mut working: HashMap<CacheKey, Option<Value>> = HashMap::new();
        let mut order = Vec::new();
        let current = self.store.peek_many(keys)?;
        for (key, value) in keys.iter().zip(current) {
            if !working.contains_key(key) {
                order.push(key.clone());
                working.insert(key.clone(), value);
            }
        }
        for key in affected {
            let current = working.get(&key.key).cloned().flatten();
            let next = plan.reconcile(key, current.as_ref(), result, ctx)?;
            working.insert(key.key.clone(), next);
        }
        Ok(order
            .into_iter()
            .map(|k| {
                let value = working.remove(&k).flatten();
                (k, value)
            })
            .collect())
    }

    fn schedule_refreshes(&self, keys: &[CacheKey]) -> TallyResult<()> {
        if !self.config.refresh_on_settle {
            return Ok(());
        }
        for key in keys {
            self.store.schedule_refresh(key)?;
        }
        Ok(())
    }
}

/// Step 6: error hook then settled hook, exactly once.
fn settle<O, H>(
    kind: &MutationKind,
    ctx: &MutationContext,
    hooks: &H,
    result: TallyResult<O>,
    reconcile_defect: Option<&TallyError>,
) -> TallyResult<O>
where
    H: MutationHooks<O> + ?Sized,
{
    if let Err(e) = &result {
        hooks.on_error(e);
    }
    hooks.on_settled(&MutationOutcome {
        kind,
        temp_id: ctx.temp_id.as_ref(),
        result: result.as_ref(),
        reconcile_defect,
    });
    result
}
