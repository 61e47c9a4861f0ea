//! Coverage fetcher.

use crate::error::AppError;
use crate::models::known_coverage;
use crate::services::gitlab_client::GitLabApi;

/// Coverage reported by a finished job.
///
/// `Ok(None)` when the job has no coverage figure; a reported 0 counts as
/// no figure.
pub async fn fetch_coverage(
    api: &dyn GitLabApi,
    project_id: i64,
    job_id: i64,
) -> Result<Option<f64>, AppError> {
    let job = api
        .job(project_id, job_id)
        .await
        .map_err(|e| AppError::fetch_for_job(format!("Failed to fetch job: {}", e), job_id))?;

    Ok(known_coverage(job.coverage))
}
