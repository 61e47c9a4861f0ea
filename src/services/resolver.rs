//! Merge request resolver.
//!
//! Turns a merge request into the pair of commits whose coverage is compared:
//! the head (latest commit) and the base (the parent of the oldest commit,
//! i.e. the target branch before the merge request's changes).

use crate::error::AppError;
use crate::services::gitlab_client::{GitLabApi, GitLabCommit};

/// Base and head commits of a merge request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedShas {
    pub base_sha: String,
    pub head_sha: String,
}

/// Resolve the base and head SHAs of a merge request via its commit history.
pub async fn resolve(
    api: &dyn GitLabApi,
    project_id: i64,
    mr_iid: i64,
) -> Result<ResolvedShas, AppError> {
    let commits = api
        .merge_request_commits(project_id, mr_iid)
        .await
        .map_err(|e| {
            AppError::resolution_for(format!("Failed to fetch commits: {}", e), mr_iid)
        })?;

    resolve_from_commits(&commits).ok_or_else(|| {
        AppError::resolution_for("Merge request has no resolvable commits", mr_iid)
    })
}

/// Pick base and head from a most-recent-first commit list.
///
/// Returns `None` for an empty list, or when the oldest commit has no parent
/// (a root commit has no "before" state to compare against).
pub fn resolve_from_commits(commits: &[GitLabCommit]) -> Option<ResolvedShas> {
    let head = commits.first()?;
    let oldest = commits.last()?;
    let base = oldest.parent_ids.first()?;

    Some(ResolvedShas {
        base_sha: base.clone(),
        head_sha: head.id.clone(),
    })
}
