//! Event dispatcher.
//!
//! Decodes GitLab webhook payloads into [`InboundEvent`]s and runs each one as
//! its own task. Tasks share nothing but the store and the API client; a
//! failing task is logged and never affects the next event.

use crate::error::AppError;
use crate::models::{BuildEvent, InboundEvent, MergeRequestEvent};
use crate::services::correlation::{BuildOutcome, CorrelationEngine, EventOutcome};
use serde::Deserialize;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// `X-Gitlab-Event` value for merge request events.
pub const MERGE_REQUEST_HOOK: &str = "Merge Request Hook";
/// `X-Gitlab-Event` value for job events.
pub const JOB_HOOK: &str = "Job Hook";
/// Older GitLab versions send job events under this name.
pub const BUILD_HOOK: &str = "Build Hook";

#[derive(Debug, Deserialize)]
struct Envelope {
    object_kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MergeRequestHook {
    object_attributes: MergeRequestAttributes,
}

#[derive(Debug, Deserialize)]
struct MergeRequestAttributes {
    iid: i64,
    target_project_id: i64,
}

#[derive(Debug, Deserialize)]
struct JobHook {
    project_id: i64,
    build_id: i64,
    sha: String,
    build_status: String,
}

enum Kind {
    MergeRequest,
    Build,
}

/// Decode a webhook payload.
///
/// `event_kind` is the `X-Gitlab-Event` header; when absent the payload's
/// `object_kind` decides.
pub fn decode(event_kind: Option<&str>, payload: &[u8]) -> Result<InboundEvent, AppError> {
    let kind = match event_kind {
        Some(MERGE_REQUEST_HOOK) => Kind::MergeRequest,
        Some(JOB_HOOK) | Some(BUILD_HOOK) => Kind::Build,
        Some(other) => return Err(AppError::unsupported_event(other)),
        None => {
            let envelope: Envelope = serde_json::from_slice(payload)?;
            match envelope.object_kind.as_deref() {
                Some("merge_request") => Kind::MergeRequest,
                Some("build") => Kind::Build,
                Some(other) => return Err(AppError::unsupported_event(other)),
                None => return Err(AppError::decode("Missing event kind")),
            }
        }
    };

    match kind {
        Kind::MergeRequest => {
            let hook: MergeRequestHook = serde_json::from_slice(payload).map_err(|e| {
                AppError::decode_for_kind(e.to_string(), MERGE_REQUEST_HOOK)
            })?;
            Ok(InboundEvent::MergeRequest(MergeRequestEvent {
                project_id: hook.object_attributes.target_project_id,
                mr_iid: hook.object_attributes.iid,
            }))
        }
        Kind::Build => {
            let hook: JobHook = serde_json::from_slice(payload)
                .map_err(|e| AppError::decode_for_kind(e.to_string(), JOB_HOOK))?;
            if hook.sha.trim().is_empty() {
                return Err(AppError::decode_for_kind("Empty commit SHA", JOB_HOOK));
            }
            Ok(InboundEvent::Build(BuildEvent {
                project_id: hook.project_id,
                job_id: hook.build_id,
                sha: hook.sha,
                status: hook.build_status,
            }))
        }
    }
}

/// Spawns one task per event against a shared engine.
#[derive(Clone)]
pub struct Dispatcher {
    engine: Arc<CorrelationEngine>,
}

impl Dispatcher {
    pub fn new(engine: Arc<CorrelationEngine>) -> Self {
        Self { engine }
    }

    /// Run an event in the background.
    ///
    /// Callers may drop the handle; it is returned so tests can wait.
    pub fn dispatch(&self, event: InboundEvent) -> JoinHandle<()> {
        let engine = self.engine.clone();
        tokio::spawn(async move {
            match engine.handle(&event).await {
                Ok(outcome) => log_outcome(&event, &outcome),
                Err(e) => log::error!("[dispatch] {} failed: {}", event, e),
            }
        })
    }
}

fn log_outcome(event: &InboundEvent, outcome: &EventOutcome) {
    match outcome {
        EventOutcome::MergeRequest(report) => {
            log::info!("[dispatch] {} done: {:?}", event, report.note);
        }
        EventOutcome::Build(BuildOutcome::Processed { reports, .. }) => {
            let failed = reports.iter().filter(|r| r.result.is_err()).count();
            log::info!(
                "[dispatch] {} done: {} linked merge request(s), {} failed",
                event,
                reports.len(),
                failed
            );
        }
        EventOutcome::Build(_) => log::debug!("[dispatch] {} done: nothing to report", event),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bytes(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_decode_merge_request_hook() {
        let payload = bytes(json!({
            "object_kind": "merge_request",
            "project": { "id": 99 },
            "object_attributes": {
                "id": 12345,
                "iid": 5,
                "target_project_id": 42,
                "source_project_id": 99,
                "last_commit": { "id": "abc123" }
            }
        }));

        let event = decode(Some(MERGE_REQUEST_HOOK), &payload).unwrap();
        assert_eq!(
            event,
            InboundEvent::MergeRequest(MergeRequestEvent {
                project_id: 42,
                mr_iid: 5,
            })
        );
    }

    #[test]
    fn test_decode_job_hook() {
        let payload = bytes(json!({
            "object_kind": "build",
            "project_id": 42,
            "build_id": 1001,
            "sha": "abc123",
            "build_status": "success",
            "build_name": "test"
        }));

        for kind in [JOB_HOOK, BUILD_HOOK] {
            let event = decode(Some(kind), &payload).unwrap();
            assert_eq!(
                event,
                InboundEvent::Build(BuildEvent {
                    project_id: 42,
                    job_id: 1001,
                    sha: "abc123".to_string(),
                    status: "success".to_string(),
                })
            );
        }
    }

    #[test]
    fn test_decode_falls_back_to_object_kind() {
        let payload = bytes(json!({
            "object_kind": "build",
            "project_id": 1,
            "build_id": 2,
            "sha": "s",
            "build_status": "failed"
        }));

        let event = decode(None, &payload).unwrap();
        assert!(matches!(event, InboundEvent::Build(ref b) if b.status == "failed"));
    }

    #[test]
    fn test_decode_unsupported_kind() {
        let payload = bytes(json!({ "object_kind": "push" }));

        assert!(decode(Some("Push Hook"), &payload)
            .unwrap_err()
            .is_unsupported_event());
        assert!(decode(None, &payload).unwrap_err().is_unsupported_event());
    }

    #[test]
    fn test_decode_malformed_payload() {
        let err = decode(Some(MERGE_REQUEST_HOOK), b"{\"object_attributes\": {}}").unwrap_err();
        assert!(matches!(
            err,
            AppError::Decode { event_kind: Some(ref k), .. } if k == MERGE_REQUEST_HOOK
        ));

        assert!(decode(None, b"not json").unwrap_err().is_decode());
        assert!(decode(None, b"{}").unwrap_err().is_decode());
    }

    #[test]
    fn test_decode_rejects_empty_sha() {
        let payload = bytes(json!({
            "project_id": 1,
            "build_id": 2,
            "sha": "",
            "build_status": "success"
        }));
        assert!(decode(Some(JOB_HOOK), &payload).unwrap_err().is_decode());
    }
}
