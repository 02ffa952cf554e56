//! Tally Cache - Optimistic Mutations
//!
//! A process-local query cache and the engine that applies writes to it
//! before the server confirms them:
//!
//! - [`CacheStore`]: materialized query results with refresh bookkeeping
//! - [`ReadThrough`]: reads that fall back to a [`QueryFetcher`]
//! - [`Snapshot`]: capture and verbatim restore of affected keys
//! - [`TempIdAllocator`]: placeholder ids for unconfirmed records
//! - [`MutationEngine`]: the speculate → send → reconcile/rollback lifecycle
//! - [`adapters`]: create, update, delete, check-in and undo plans

pub mod adapters;
mod engine;
mod freshness;
mod key;
mod key_lock;
mod read_through;
mod shape;
mod snapshot;
mod store;
mod temp_id;
mod transport;

pub use engine::{
    EngineConfig, MutationContext, MutationEngine, MutationHooks, MutationOutcome, MutationPlan,
    MutationRequest, NoHooks,
};
pub use freshness::{CacheRead, Freshness};
pub use key::CacheKey;
pub use key_lock::{KeyGuards, KeyLocks};
pub use read_through::{QueryFetcher, ReadThrough, ReadThroughConfig};
pub use shape::{AffectedKey, Edit, InsertAt, RawRecord, ValueShape};
pub use snapshot::Snapshot;
pub use store::{CacheEvent, CacheStats, CachedValue, CacheStore, RefreshTicket};
pub use temp_id::{is_temporary, TempIdAllocator};
pub use transport::Transport;
