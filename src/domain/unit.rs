//! Collection unit lifecycle state.
//!
//! Every unit starts `Queued` and ends in exactly one of the terminal
//! states `Done` or `Failed`. A failed unit always records why.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a collection unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    /// Registered, waiting for dependencies or a concurrency slot
    Queued,

    /// Action is executing
    Running,

    /// Action returned and its fields were published
    Done,

    /// Unit output is unusable (see [`FailureCause`])
    Failed,
}

impl UnitState {
    /// Whether the state can no longer change
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl Default for UnitState {
    fn default() -> Self {
        Self::Queued
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Why a unit ended in [`UnitState::Failed`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FailureCause {
    /// The action returned a fatal error
    Error { message: String },

    /// A declared dependency failed, so the action never ran
    DependencyFailed { dependency: String },

    /// The action exceeded its timeout and was aborted
    TimedOut { after_ms: u64 },

    /// The action panicked
    Panicked { message: String },

    /// The run deadline passed before the unit finished
    DeadlineExceeded,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error { message } => write!(f, "{}", message),
            Self::DependencyFailed { dependency } => {
                write!(f, "dependency '{}' failed", dependency)
            }
            Self::TimedOut { after_ms } => write!(f, "timed out after {}ms", after_ms),
            Self::Panicked { message } => write!(f, "panicked: {}", message),
            Self::DeadlineExceeded => f.write_str("run deadline exceeded"),
        }
    }
}

/// Final view of one unit, embedded in the report metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UnitSummary {
    pub name: String,
    pub state: UnitState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<FailureCause>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!UnitState::Queued.is_terminal());
        assert!(!UnitState::Running.is_terminal());
        assert!(UnitState::Done.is_terminal());
        assert!(UnitState::Failed.is_terminal());
    }

    #[test]
    fn test_failure_cause_display() {
        let cause = FailureCause::DependencyFailed {
            dependency: "MainData".to_string(),
        };
        assert_eq!(cause.to_string(), "dependency 'MainData' failed");
        assert_eq!(
            FailureCause::TimedOut { after_ms: 250 }.to_string(),
            "timed out after 250ms"
        );
    }

    #[test]
    fn test_summary_serialization() {
        let summary = UnitSummary {
            name: "NetworkData".to_string(),
            state: UnitState::Failed,
            duration_ms: Some(12),
            cause: Some(FailureCause::DeadlineExceeded),
        };

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["State"], "failed");
        assert_eq!(json["Cause"]["kind"], "deadline_exceeded");
    }
}
