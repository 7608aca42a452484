//! Action log types: the persisted progress record of a build.
//!
//! An [`Action`] is an ordered list of [`Step`]s, one per pipeline stage that
//! has been entered. Each step carries its own ordered [`LogLine`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{ActionId, LogLineId, StepId};

/// Pipeline stage a step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepName {
    /// Build accepted and queued; created already succeeded.
    #[serde(rename = "ADD_TO_QUEUE")]
    Queued,
    #[serde(rename = "GENERATE_APPLICATION")]
    Generate,
    #[serde(rename = "BUILD_DOCKER_IMAGE")]
    BuildImage,
    #[serde(rename = "PUSH_TO_GITHUB")]
    PublishSource,
}

impl StepName {
    /// Stable name used for persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::Queued => "ADD_TO_QUEUE",
            StepName::Generate => "GENERATE_APPLICATION",
            StepName::BuildImage => "BUILD_DOCKER_IMAGE",
            StepName::PublishSource => "PUSH_TO_GITHUB",
        }
    }

    /// Default human-readable message for a step of this stage.
    pub fn default_message(&self) -> &'static str {
        match self {
            StepName::Queued => "Adding task to queue",
            StepName::Generate => "Generating application",
            StepName::BuildImage => "Building container image",
            StepName::PublishSource => "Pushing changes to GitHub",
        }
    }
}

impl std::fmt::Display for StepName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADD_TO_QUEUE" => Ok(StepName::Queued),
            "GENERATE_APPLICATION" => Ok(StepName::Generate),
            "BUILD_DOCKER_IMAGE" => Ok(StepName::BuildImage),
            "PUSH_TO_GITHUB" => Ok(StepName::PublishSource),
            other => Err(format!("unknown step name: {other}")),
        }
    }
}

/// Status of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Succeeded | StepStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StepStatus::Pending),
            "running" => Ok(StepStatus::Running),
            "succeeded" => Ok(StepStatus::Succeeded),
            "failed" => Ok(StepStatus::Failed),
            other => Err(format!("unknown step status: {other}")),
        }
    }
}

/// Severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// One structured log line attached to a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub id: LogLineId,
    pub step_id: StepId,
    pub level: LogLevel,
    pub message: String,
    /// Arbitrary structured metadata; `Value::Null` when absent.
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// One pipeline stage's progress record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub action_id: ActionId,
    pub name: StepName,
    pub message: String,
    pub status: StepStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Log lines in insertion order.
    pub logs: Vec<LogLine>,
}

/// The ordered steps of one build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub created_at: DateTime<Utc>,
    /// Steps in creation order.
    pub steps: Vec<Step>,
}

impl Action {
    /// The most recent step with the given name.
    pub fn step(&self, name: StepName) -> Option<&Step> {
        self.steps.iter().rev().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_name_round_trip() {
        for name in [
            StepName::Queued,
            StepName::Generate,
            StepName::BuildImage,
            StepName::PublishSource,
        ] {
            assert_eq!(name.as_str().parse::<StepName>().unwrap(), name);
            assert_eq!(
                serde_json::to_value(name).unwrap(),
                serde_json::Value::String(name.as_str().to_string())
            );
        }
        assert!("DEPLOY".parse::<StepName>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!StepStatus::Pending.is_terminal());
        assert!(!StepStatus::Running.is_terminal());
        assert!(StepStatus::Succeeded.is_terminal());
        assert!(StepStatus::Failed.is_terminal());
    }

    #[test]
    fn test_action_step_lookup_returns_latest() {
        let action_id = ActionId::new();
        let make = |name, status| Step {
            id: StepId::new(),
            action_id,
            name,
            message: String::new(),
            status,
            created_at: Utc::now(),
            completed_at: None,
            logs: vec![],
        };
        let action = Action {
            id: action_id,
            created_at: Utc::now(),
            steps: vec![
                make(StepName::Generate, StepStatus::Failed),
                make(StepName::Generate, StepStatus::Running),
            ],
        };

        assert_eq!(
            action.step(StepName::Generate).unwrap().status,
            StepStatus::Running
        );
        assert!(action.step(StepName::PublishSource).is_none());
    }
}
