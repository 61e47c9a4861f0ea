//! Commit coverage record.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Coverage known for one commit, plus the merge requests whose current
/// head is that commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitCoverageRecord {
    /// GitLab project ID.
    pub project_id: i64,

    /// Commit SHA.
    pub sha: String,

    /// Coverage percentage; `None` until a successful job reports one.
    pub coverage: Option<f64>,

    /// IIDs of merge requests headed at this commit, ascending.
    pub linked_merge_requests: Vec<i64>,
}

/// Row shape of the `commits` table.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct CommitRow {
    pub project_id: i64,
    pub sha: String,
    pub coverage: Option<f64>,
}

impl CommitRow {
    pub(crate) fn with_links(self, linked_merge_requests: Vec<i64>) -> CommitCoverageRecord {
        CommitCoverageRecord {
            project_id: self.project_id,
            sha: self.sha,
            coverage: known_coverage(self.coverage),
            linked_merge_requests,
        }
    }
}

/// Normalise a reported coverage figure.
///
/// GitLab reports a job without a coverage regex as 0 or null, so a value of
/// exactly zero is indistinguishable from "not measured" and is treated as
/// unknown. Negative and non-finite values are unknown as well.
pub fn known_coverage(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}
