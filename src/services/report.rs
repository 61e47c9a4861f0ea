//! Report composer.
//!
//! Formats the coverage comparison for a merge request and keeps exactly one
//! note per merge request up to date: the first report creates the note, every
//! later report edits it in place.

use crate::db::store::Store;
use crate::error::AppError;
use crate::services::gitlab_client::GitLabApi;
use std::fmt;
use std::sync::Arc;

/// Outcome of comparing base and head coverage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoverageReport {
    /// At least one side has no coverage yet.
    Pending,
    Increased { before: f64, after: f64 },
    Decreased { before: f64, after: f64 },
    Unchanged { coverage: f64 },
}

impl CoverageReport {
    /// Compare base (`before`) and head (`after`) coverage.
    pub fn compose(before: Option<f64>, after: Option<f64>) -> Self {
        match (before, after) {
            (Some(before), Some(after)) if after > before => Self::Increased { before, after },
            (Some(before), Some(after)) if after < before => Self::Decreased { before, after },
            (Some(_), Some(after)) => Self::Unchanged { coverage: after },
            _ => Self::Pending,
        }
    }

    /// Check if both sides of the comparison were known.
    pub fn is_complete(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

// `{}` on f64 prints the shortest representation that round-trips.
impl fmt::Display for CoverageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(
                f,
                ":hourglass: Test coverage report is awaiting coverage results for this merge request."
            ),
            Self::Increased { before, after } => write!(
                f,
                ":chart_with_upwards_trend: Test coverage increased from **{}%** to **{}%**.",
                before, after
            ),
            Self::Decreased { before, after } => write!(
                f,
                ":chart_with_downwards_trend: Test coverage decreased from **{}%** to **{}%**.",
                before, after
            ),
            Self::Unchanged { coverage } => {
                write!(f, ":white_check_mark: Test coverage unchanged at **{}%**.", coverage)
            }
        }
    }
}

/// What happened to the merge request note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteAction {
    Created { note_id: i64 },
    Updated { note_id: i64 },
}

/// Result of one report attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportOutcome {
    pub report: CoverageReport,
    pub note: NoteAction,
}

/// Composes coverage reports and posts them as merge request notes.
#[derive(Clone)]
pub struct ReportComposer {
    store: Store,
    api: Arc<dyn GitLabApi>,
}

impl ReportComposer {
    pub fn new(store: Store, api: Arc<dyn GitLabApi>) -> Self {
        Self { store, api }
    }

    /// Build the report for a merge request and create or update its note.
    ///
    /// A failed create stores nothing, so the next attempt creates again.
    pub async fn attempt_report(
        &self,
        project_id: i64,
        mr_iid: i64,
        base_sha: &str,
        head_sha: &str,
    ) -> Result<ReportOutcome, AppError> {
        let before = self.store.coverage(project_id, base_sha).await?;
        let after = self.store.coverage(project_id, head_sha).await?;
        let report = CoverageReport::compose(before, after);
        let body = report.to_string();

        log::debug!(
            "[report] project={} mr={} base={} head={} before={:?} after={:?}",
            project_id,
            mr_iid,
            base_sha,
            head_sha,
            before,
            after
        );

        let note = match self.store.note_id(project_id, mr_iid).await? {
            Some(note_id) => self.update_note(project_id, mr_iid, note_id, &body).await?,
            None => {
                let note = self
                    .api
                    .create_merge_request_note(project_id, mr_iid, &body)
                    .await
                    .map_err(|e| AppError::post(format!("Failed to create note: {}", e)))?;

                if self.store.set_note_id(project_id, mr_iid, note.id).await? {
                    NoteAction::Created { note_id: note.id }
                } else {
                    // A concurrent report recorded its note first; that one stays
                    // canonical and ours is left behind.
                    let note_id = self.store.note_id(project_id, mr_iid).await?.ok_or_else(|| {
                        AppError::database_with_op("note id vanished", "set_note_id")
                    })?;
                    log::warn!(
                        "[report] project={} mr={} note {} superseded by note {}",
                        project_id,
                        mr_iid,
                        note.id,
                        note_id
                    );
                    self.update_note(project_id, mr_iid, note_id, &body).await?
                }
            }
        };

        log::info!(
            "[report] project={} mr={} {:?}: {}",
            project_id,
            mr_iid,
            note,
            body
        );

        Ok(ReportOutcome { report, note })
    }

    async fn update_note(
        &self,
        project_id: i64,
        mr_iid: i64,
        note_id: i64,
        body: &str,
    ) -> Result<NoteAction, AppError> {
        self.api
            .update_merge_request_note(project_id, mr_iid, note_id, body)
            .await
            .map_err(|e| AppError::post_for_note(format!("Failed to update note: {}", e), note_id))?;
        Ok(NoteAction::Updated { note_id })
    }
}
