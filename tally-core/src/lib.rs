//! Tally Core - Domain Types
//!
//! Records, view trees, reset periods and the task-completion derivation
//! shared by the optimistic client cache and its tests. This crate has no
//! I/O and no async.

pub mod completion;
pub mod config;
pub mod entities;
pub mod enums;
pub mod error;
pub mod identity;
pub mod period;

pub use completion::{derive, derive_at, Derivation, PeriodClock, TaskAggregate, UndoWindow};
pub use config::{CacheSection, CompletionSection, EngineSection, TallyConfig, CONFIG_ENV_VAR};
pub use entities::{
    Assignment, Goal, Kiosk, KioskBoard, Person, PersonDetail, Record, Routine, RoutineView, Task,
    TaskCompletion, TaskTree, TaskView,
};
pub use enums::{MutationKind, TaskKind};
pub use error::{
    CacheError, ConfigError, MutationError, TallyError, TallyResult, TransportError,
    ValidationError,
};
pub use identity::{is_temporary, RecordId, Timestamp, TEMP_ID_PREFIX};
pub use period::ResetPeriod;
