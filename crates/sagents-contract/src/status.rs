//! Worker lifecycle status.

use serde::{Deserialize, Serialize};

/// Lifecycle status of an agent worker. Single-writer: only the owning
/// worker mutates it; everyone else observes it through events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Idle,
    Running,
    Interrupted,
    Cancelled,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Idle => "idle",
            Status::Running => "running",
            Status::Interrupted => "interrupted",
            Status::Cancelled => "cancelled",
            Status::Error => "error",
        }
    }

    /// Whether a new pipeline run may start from this status.
    pub fn can_execute(&self) -> bool {
        matches!(self, Status::Idle | Status::Cancelled | Status::Error)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_allowed_only_outside_running_and_interrupted() {
        assert!(Status::Idle.can_execute());
        assert!(Status::Error.can_execute());
        assert!(Status::Cancelled.can_execute());
        assert!(!Status::Running.can_execute());
        assert!(!Status::Interrupted.can_execute());
    }

    #[test]
    fn serde_uses_snake_case() {
        assert_eq!(serde_json::to_string(&Status::Idle).unwrap(), "\"idle\"");
    }
}
