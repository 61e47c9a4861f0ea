//! Typed inbound events.

use serde::Serialize;

/// Job status GitLab reports for a job that finished successfully.
pub const BUILD_STATUS_SUCCESS: &str = "success";

/// A merge request was opened or updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeRequestEvent {
    pub project_id: i64,
    pub mr_iid: i64,
}

/// A CI job changed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildEvent {
    pub project_id: i64,
    pub job_id: i64,
    pub sha: String,
    pub status: String,
}

impl BuildEvent {
    /// Only successful jobs carry a coverage figure worth storing.
    pub fn is_success(&self) -> bool {
        self.status == BUILD_STATUS_SUCCESS
    }
}

/// Every event the service reacts to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundEvent {
    MergeRequest(MergeRequestEvent),
    Build(BuildEvent),
}

impl InboundEvent {
    /// Project the event belongs to.
    pub fn project_id(&self) -> i64 {
        match self {
            Self::MergeRequest(event) => event.project_id,
            Self::Build(event) => event.project_id,
        }
    }
}

impl std::fmt::Display for InboundEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MergeRequest(e) => {
                write!(f, "merge_request project={} mr={}", e.project_id, e.mr_iid)
            }
            Self::Build(e) => write!(
                f,
                "build project={} job={} sha={} status={}",
                e.project_id, e.job_id, e.sha, e.status
            ),
        }
    }
}
