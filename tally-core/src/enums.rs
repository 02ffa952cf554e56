//! Enum types shared across the dashboard.

use crate::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// TASK KIND
// ============================================================================

/// How a task turns its completions into an aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    /// Once per period: done as soon as one completion exists.
    Simple,
    /// Repeatable counter: aggregate is the number of completions.
    Multiple,
    /// Accumulator: aggregate is the sum of completion values.
    Progress,
}

impl TaskKind {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            TaskKind::Simple => "SIMPLE",
            TaskKind::Multiple => "MULTIPLE",
            TaskKind::Progress => "PROGRESS",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, ValidationError> {
        match s.to_ascii_uppercase().as_str() {
            "SIMPLE" => Ok(TaskKind::Simple),
            "MULTIPLE" => Ok(TaskKind::Multiple),
            "PROGRESS" => Ok(TaskKind::Progress),
            _ => Err(ValidationError::UnknownVariant {
                kind: "task kind",
                value: s.to_string(),
            }),
        }
    }

    /// Whether completions of this kind are subject to the undo window.
    pub fn uses_undo_window(&self) -> bool {
        matches!(self, TaskKind::Simple)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for TaskKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

// ============================================================================
// MUTATION KIND
// ============================================================================

/// The operation a mutation request performs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
    CheckIn,
    Undo,
    /// Anything else, named by the caller for logging.
    Custom(String),
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationKind::Create => f.write_str("create"),
            MutationKind::Update => f.write_str("update"),
            MutationKind::Delete => f.write_str("delete"),
            MutationKind::CheckIn => f.write_str("check-in"),
            MutationKind::Undo => f.write_str("undo"),
            MutationKind::Custom(name) => f.write_str(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_kind_roundtrip() {
        for kind in [TaskKind::Simple, TaskKind::Multiple, TaskKind::Progress] {
            assert_eq!(TaskKind::from_db_str(kind.as_db_str()).unwrap(), kind);
            assert_eq!(kind.to_string().parse::<TaskKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_task_kind_parse_is_case_insensitive() {
        assert_eq!("progress".parse::<TaskKind>().unwrap(), TaskKind::Progress);
        assert!("paused".parse::<TaskKind>().is_err());
    }

    #[test]
    fn test_task_kind_serde_uses_screaming_case() {
        let json = serde_json::to_value(TaskKind::Multiple).unwrap();
        assert_eq!(json, serde_json::json!("MULTIPLE"));
    }

    #[test]
    fn test_only_simple_uses_undo_window() {
        assert!(TaskKind::Simple.uses_undo_window());
        assert!(!TaskKind::Multiple.uses_undo_window());
        assert!(!TaskKind::Progress.uses_undo_window());
    }

    #[test]
    fn test_mutation_kind_display() {
        assert_eq!(MutationKind::CheckIn.to_string(), "check-in");
        assert_eq!(MutationKind::Custom("archive".into()).to_string(), "archive");
    }
}
