//! Error types for Tally operations

use std::time::Duration;
use thiserror::Error;

/// Cache layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache lock poisoned")]
    LockPoisoned,

    #[error("Value under {key} does not match declared shape {shape}: {reason}")]
    ShapeMismatch {
        key: String,
        shape: String,
        reason: String,
    },

    #[error("Failed to encode value for {key}: {reason}")]
    Encode { key: String, reason: String },

    #[error("Failed to decode value for {key}: {reason}")]
    Decode { key: String, reason: String },
}

/// Errors raised by the transport while sending a mutation or fetching a query.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network failure: {reason}")]
    Network { reason: String },

    #[error("Request timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("Rejected by validation: {message}")]
    Validation { message: String },

    #[error("Not authorized: {message}")]
    Unauthorized { message: String },

    /// Another actor already completed or claimed the target.
    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Server responded with status {status}: {message}")]
    Server { status: u16, message: String },
}

impl TransportError {
    /// Returns true for the expected-race rejection class.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Message suitable for showing to the person who triggered the mutation.
    ///
    /// Conflicts are an expected race outcome, so they get a neutral sentence
    /// instead of the raw failure.
    pub fn user_message(&self) -> String {
        match self {
            Self::Conflict { .. } => "Someone else already took care of this.".to_string(),
            Self::Validation { message } => message.clone(),
            Self::Unauthorized { .. } => "You don't have permission to do that.".to_string(),
            Self::Network { .. } | Self::Timeout { .. } => {
                "Couldn't reach the server. Your change was not saved.".to_string()
            }
            Self::Server { .. } => "Something went wrong. Your change was not saved.".to_string(),
        }
    }
}

/// Mutation lifecycle errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MutationError {
    #[error("Mutation rejected by transport: {0}")]
    Rejected(#[from] TransportError),

    #[error("Speculative update failed for {key}: {reason}")]
    SpeculationFailed { key: String, reason: String },

    #[error("Reconciliation failed for {key}: {reason}")]
    ReconcileFailed { key: String, reason: String },

    #[error("Record {id} not found under {key}")]
    RecordNotFound { key: String, id: String },

    #[error("Invalid mutation input: {0}")]
    Invalid(#[from] ValidationError),

    #[error("Undo window for completion {completion_id} closed {elapsed_past:?} ago")]
    UndoWindowExpired {
        completion_id: String,
        elapsed_past: Duration,
    },
}

impl MutationError {
    /// The transport error behind a rejection, if any.
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            Self::Rejected(e) => Some(e),
            _ => None,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or TALLY_CONFIG)")]
    MissingConfigPath,

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Validation errors for domain values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}

/// Master error type for all Tally errors.
#[derive(Debug, Clone, Error)]
pub enum TallyError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Mutation error: {0}")]
    Mutation(#[from] MutationError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl TallyError {
    /// The transport error at the root of this failure, if it came from the wire.
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Mutation(m) => m.transport(),
            _ => None,
        }
    }

    /// True when the failure is a conflict-class transport rejection.
    pub fn is_conflict(&self) -> bool {
        self.transport().is_some_and(TransportError::is_conflict)
    }

    /// True when the failure is a defect in a speculate/reconcile transform.
    pub fn is_defect(&self) -> bool {
        matches!(
            self,
            Self::Cache(_)
                | Self::Mutation(MutationError::SpeculationFailed { .. })
                | Self::Mutation(MutationError::ReconcileFailed { .. })
        )
    }
}

/// Result type alias for Tally operations.
pub type TallyResult<T> = Result<T, TallyError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_error_display_shape_mismatch() {
        let err = CacheError::ShapeMismatch {
            key: "people:{}".to_string(),
            shape: "List".to_string(),
            reason: "expected array".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("people:{}"));
        assert!(msg.contains("List"));
        assert!(msg.contains("expected array"));
    }

    #[test]
    fn test_conflict_gets_neutral_message() {
        let err = TransportError::Conflict {
            message: "task already completed".to_string(),
        };
        assert!(err.is_conflict());
        assert!(!err.user_message().contains("already completed"));
        assert!(!err.user_message().contains("wrong"));
    }

    #[test]
    fn test_validation_message_passes_through() {
        let err = TransportError::Validation {
            message: "Limit reached".to_string(),
        };
        assert_eq!(err.user_message(), "Limit reached");
    }

    #[test]
    fn test_tally_error_finds_wrapped_transport_error() {
        let err = TallyError::from(MutationError::Rejected(TransportError::Conflict {
            message: "claimed".to_string(),
        }));
        assert!(err.is_conflict());
        assert!(!err.is_defect());
    }

    #[test]
    fn test_defect_classification() {
        let err = TallyError::from(MutationError::SpeculationFailed {
            key: "k".to_string(),
            reason: "boom".to_string(),
        });
        assert!(err.is_defect());
        assert!(err.transport().is_none());

        let invalid = TallyError::from(MutationError::from(ValidationError::InvalidValue {
            field: "value".to_string(),
            reason: "must not be negative".to_string(),
        }));
        assert!(!invalid.is_defect());

        let err = TallyError::from(CacheError::LockPoisoned);
        assert!(err.is_defect());
    }

    #[test]
    fn test_tally_error_from_variants() {
        let cache = TallyError::from(CacheError::LockPoisoned);
        assert!(matches!(cache, TallyError::Cache(_)));

        let transport = TallyError::from(TransportError::Timeout {
            elapsed: Duration::from_secs(3),
        });
        assert!(matches!(transport, TallyError::Transport(_)));

        let validation = TallyError::from(ValidationError::UnknownVariant {
            kind: "task kind",
            value: "weird".to_string(),
        });
        assert!(matches!(validation, TallyError::Validation(_)));
    }

    #[test]
    fn test_undo_window_expired_display() {
        let err = MutationError::UndoWindowExpired {
            completion_id: "c1".to_string(),
            elapsed_past: Duration::from_secs(42),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("c1"));
        assert!(msg.contains("42"));
    }
}
