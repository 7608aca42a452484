//! Build aggregate and derived status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::{Action, Step, StepStatus};
use crate::id::{AppId, BuildId};
use crate::image::StatusQuery;

/// Number of trailing commit id characters used as the version label.
pub const VERSION_LABEL_LEN: usize = 8;

/// One generate-package-deliver attempt for an application version.
///
/// Repositories always return the build with its action, steps and log
/// lines fully loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
    pub id: BuildId,
    pub app_id: AppId,
    pub commit_id: String,
    /// Originating commit message, reused for the published commit.
    pub message: Option<String>,
    pub version: String,
    pub created_at: DateTime<Utc>,
    /// Image references produced by the remote build.
    pub images: Vec<String>,
    /// Opaque handle for polling the remote image build.
    pub status_query: Option<StatusQuery>,
    /// Last time the remote image build was polled (or submitted).
    pub status_updated_at: Option<DateTime<Utc>>,
    pub action: Action,
}

impl Build {
    /// Derived status of this build, see [`BuildStatus::from_steps`].
    pub fn status(&self) -> BuildStatus {
        BuildStatus::from_steps(&self.action.steps)
    }
}

/// Version label derived from a commit id: its trailing eight characters.
///
/// Collisions between commits sharing a suffix are accepted.
pub fn version_label(commit_id: &str) -> String {
    let count = commit_id.chars().count();
    commit_id
        .chars()
        .skip(count.saturating_sub(VERSION_LABEL_LEN))
        .collect()
}

/// Request to start a new build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequest {
    pub app_id: AppId,
    pub commit_id: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Externally visible build status, derived from step statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    /// No steps recorded.
    Invalid,
    Running,
    Completed,
    Failed,
}

impl BuildStatus {
    /// Pure derivation: Failed if any step failed, Completed if all steps
    /// succeeded, Running otherwise, Invalid when there are no steps.
    pub fn from_steps(steps: &[Step]) -> Self {
        Self::from_statuses(steps.iter().map(|s| s.status))
    }

    pub fn from_statuses(statuses: impl IntoIterator<Item = StepStatus>) -> Self {
        let mut any = false;
        let mut all_succeeded = true;
        for status in statuses {
            any = true;
            match status {
                StepStatus::Failed => return BuildStatus::Failed,
                StepStatus::Succeeded => {}
                StepStatus::Pending | StepStatus::Running => all_succeeded = false,
            }
        }
        match (any, all_succeeded) {
            (false, _) => BuildStatus::Invalid,
            (true, true) => BuildStatus::Completed,
            (true, false) => BuildStatus::Running,
        }
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildStatus::Invalid => write!(f, "invalid"),
            BuildStatus::Running => write!(f, "running"),
            BuildStatus::Completed => write!(f, "completed"),
            BuildStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Filter for listing builds. Results are ordered newest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildFilter {
    pub app_id: Option<AppId>,
    pub commit_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use StepStatus::*;

    #[test]
    fn test_version_label_takes_last_eight_chars() {
        assert_eq!(version_label("ckl0a1b2c3d4e5f6g7"), "d4e5f6g7");
        assert_eq!(version_label("abc"), "abc");
        assert_eq!(version_label(""), "");
    }

    #[test]
    fn test_status_invalid_without_steps() {
        assert_eq!(BuildStatus::from_statuses([]), BuildStatus::Invalid);
    }

    #[test]
    fn test_status_completed_when_all_succeeded() {
        assert_eq!(
            BuildStatus::from_statuses([Succeeded, Succeeded, Succeeded]),
            BuildStatus::Completed
        );
    }

    #[test]
    fn test_status_failed_wins_over_running() {
        assert_eq!(
            BuildStatus::from_statuses([Succeeded, Running, Failed]),
            BuildStatus::Failed
        );
        assert_eq!(
            BuildStatus::from_statuses([Failed, Pending]),
            BuildStatus::Failed
        );
    }

    #[test]
    fn test_status_running_otherwise() {
        assert_eq!(
            BuildStatus::from_statuses([Succeeded, Running]),
            BuildStatus::Running
        );
        assert_eq!(BuildStatus::from_statuses([Pending]), BuildStatus::Running);
    }

    #[test]
    fn test_status_is_order_independent() {
        let statuses = [Succeeded, Running, Failed, Pending];
        let expected = BuildStatus::from_statuses(statuses);
        let mut reversed = statuses;
        reversed.reverse();
        assert_eq!(BuildStatus::from_statuses(reversed), expected);
    }
}
