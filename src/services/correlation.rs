//! Correlation engine.
//!
//! Joins the two unordered event streams: merge request events supply the
//! base/head commits of a merge request, build events supply the coverage of
//! a commit. Both entry points finish by attempting a report, and each checks
//! whether the other half of the join is already in the store, so the final
//! note does not depend on arrival order.
//!
//! Only the head commit is indexed back to its merge requests. Coverage that
//! arrives for a base commit after the merge request event is picked up by
//! the next merge request or head build event, not on its own.

use crate::db::store::Store;
use crate::error::AppError;
use crate::models::{BuildEvent, InboundEvent, MergeRequestEvent};
use crate::services::coverage_fetcher;
use crate::services::gitlab_client::GitLabApi;
use crate::services::report::{ReportComposer, ReportOutcome};
use crate::services::resolver;
use futures::future::join_all;
use std::sync::Arc;

/// Result of handling a build event.
#[derive(Debug)]
pub enum BuildOutcome {
    /// The job did not succeed; nothing was read or written.
    Ignored { status: String },

    /// The job reported no coverage.
    NoCoverage,

    /// Coverage was known; linked merge requests were reported.
    Processed {
        coverage: f64,
        /// False when the commit already had coverage stored.
        newly_stored: bool,
        reports: Vec<LinkedReport>,
    },
}

/// Report attempt for one merge request reached through the head index.
#[derive(Debug)]
pub struct LinkedReport {
    pub mr_iid: i64,
    pub result: Result<ReportOutcome, AppError>,
}

/// Result of handling any inbound event.
#[derive(Debug)]
pub enum EventOutcome {
    MergeRequest(ReportOutcome),
    Build(BuildOutcome),
}

/// The join between merge requests, commits and coverage.
pub struct CorrelationEngine {
    store: Store,
    api: Arc<dyn GitLabApi>,
    reports: ReportComposer,
}

impl CorrelationEngine {
    pub fn new(store: Store, api: Arc<dyn GitLabApi>) -> Self {
        let reports = ReportComposer::new(store.clone(), api.clone());
        Self {
            store,
            api,
            reports,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Route an event to its entry point.
    pub async fn handle(&self, event: &InboundEvent) -> Result<EventOutcome, AppError> {
        match event {
            InboundEvent::MergeRequest(e) => {
                self.on_merge_request(e).await.map(EventOutcome::MergeRequest)
            }
            InboundEvent::Build(e) => self.on_build(e).await.map(EventOutcome::Build),
        }
    }

    /// Resolve, store and index a merge request, then report on it.
    pub async fn on_merge_request(
        &self,
        event: &MergeRequestEvent,
    ) -> Result<ReportOutcome, AppError> {
        let shas = resolver::resolve(self.api.as_ref(), event.project_id, event.mr_iid).await?;

        log::info!(
            "[correlation] project={} mr={} resolved base={} head={}",
            event.project_id,
            event.mr_iid,
            shas.base_sha,
            shas.head_sha
        );

        self.store
            .upsert_merge_request(event.project_id, event.mr_iid, &shas.base_sha, &shas.head_sha)
            .await?;

        self.reports
            .attempt_report(event.project_id, event.mr_iid, &shas.base_sha, &shas.head_sha)
            .await
    }

    /// Store a successful job's coverage and report on every merge request
    /// headed at its commit.
    pub async fn on_build(&self, event: &BuildEvent) -> Result<BuildOutcome, AppError> {
        if !event.is_success() {
            log::debug!(
                "[correlation] project={} job={} sha={} skipped with status {}",
                event.project_id,
                event.job_id,
                event.sha,
                event.status
            );
            return Ok(BuildOutcome::Ignored {
                status: event.status.clone(),
            });
        }

        let Some(coverage) =
            coverage_fetcher::fetch_coverage(self.api.as_ref(), event.project_id, event.job_id)
                .await?
        else {
            log::debug!(
                "[correlation] project={} job={} sha={} reported no coverage",
                event.project_id,
                event.job_id,
                event.sha
            );
            return Ok(BuildOutcome::NoCoverage);
        };

        let newly_stored = self
            .store
            .store_coverage(event.project_id, &event.sha, coverage)
            .await?;

        log::info!(
            "[correlation] project={} job={} sha={} coverage={} stored={}",
            event.project_id,
            event.job_id,
            event.sha,
            coverage,
            newly_stored
        );

        let linked = self
            .store
            .linked_merge_requests(event.project_id, &event.sha)
            .await?;

        let reports = join_all(
            linked
                .into_iter()
                .map(|mr_iid| self.report_linked(event.project_id, mr_iid)),
        )
        .await
        .into_iter()
        .flatten()
        .collect();

        Ok(BuildOutcome::Processed {
            coverage,
            newly_stored,
            reports,
        })
    }

    /// Report on a merge request found through the head index.
    ///
    /// `None` when the record is missing or not yet resolved.
    async fn report_linked(&self, project_id: i64, mr_iid: i64) -> Option<LinkedReport> {
        let record = match self.store.merge_request(project_id, mr_iid).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                log::debug!(
                    "[correlation] project={} mr={} linked but not stored",
                    project_id,
                    mr_iid
                );
                return None;
            }
            Err(e) => {
                log::error!(
                    "[correlation] project={} mr={} lookup failed: {}",
                    project_id,
                    mr_iid,
                    e
                );
                return Some(LinkedReport {
                    mr_iid,
                    result: Err(e),
                });
            }
        };

        let Some((base_sha, head_sha)) = record.shas() else {
            log::debug!(
                "[correlation] project={} mr={} not resolved yet",
                project_id,
                mr_iid
            );
            return None;
        };

        let result = self
            .reports
            .attempt_report(project_id, mr_iid, base_sha, head_sha)
            .await;

        if let Err(e) = &result {
            log::error!(
                "[correlation] project={} mr={} report failed: {}",
                project_id,
                mr_iid,
                e
            );
        }

        Some(LinkedReport { mr_iid, result })
    }
}
