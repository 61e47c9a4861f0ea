//! Webhook HTTP server.
//!
//! Receives GitLab webhook deliveries, acknowledges them immediately and hands
//! the decoded event to the [`Dispatcher`]. Processing happens after the
//! response is sent, so a slow GitLab API never holds up a delivery.

use crate::db::store::Store;
use crate::error::AppError;
use crate::services::dispatcher::{self, Dispatcher};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Header carrying the GitLab event name.
pub const EVENT_HEADER: &str = "x-gitlab-event";
/// Header carrying the shared webhook secret.
pub const TOKEN_HEADER: &str = "x-gitlab-token";

/// Shared state for the webhook routes.
#[derive(Clone)]
pub struct WebhookState {
    pub store: Store,
    pub dispatcher: Dispatcher,
    /// Expected `X-Gitlab-Token`; `None` accepts any delivery.
    pub webhook_secret: Option<Arc<str>>,
}

#[derive(Serialize)]
struct ApiError {
    code: String,
    message: String,
}

/// Wrapper to make AppError usable as an axum error response.
struct ApiErr(AppError);

impl IntoResponse for ApiErr {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            AppError::Decode { .. } => (StatusCode::BAD_REQUEST, "INVALID_PAYLOAD"),
            AppError::Authentication { .. } => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        (
            status,
            Json(ApiError {
                code: code.to_string(),
                message: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<AppError> for ApiErr {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

#[derive(Debug, Serialize)]
struct Accepted {
    status: &'static str,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
}

/// Build the webhook router.
pub fn build_router(state: WebhookState) -> Router {
    Router::new()
        .route("/", post(receive_webhook))
        .route("/webhook", post(receive_webhook))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve `router` on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("[webhook] Server listening on http://{}", addr);
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        })
        .await
        .map_err(|e| AppError::internal(format!("Webhook server error: {}", e)))?;

    log::info!("[webhook] Server stopped");
    Ok(())
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn receive_webhook(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Accepted>), ApiErr> {
    check_token(state.webhook_secret.as_deref(), &headers)?;

    let event_kind = headers.get(EVENT_HEADER).and_then(|v| v.to_str().ok());

    if let Some(journal_kind) = journal_kind(event_kind, &body) {
        if let Err(e) = state
            .store
            .record_event(&journal_kind, &String::from_utf8_lossy(&body))
            .await
        {
            log::warn!("[webhook] Failed to journal {} delivery: {}", journal_kind, e);
        }
    }

    let event = match dispatcher::decode(event_kind, &body) {
        Ok(event) => event,
        Err(e) if e.is_unsupported_event() => {
            log::debug!("[webhook] Ignoring delivery: {}", e);
            return Ok((StatusCode::ACCEPTED, Json(Accepted { status: "ignored" })));
        }
        Err(e) => {
            log::warn!("[webhook] Rejecting delivery: {}", e);
            return Err(e.into());
        }
    };

    log::info!("[webhook] Accepted {}", event);
    state.dispatcher.dispatch(event);

    Ok((StatusCode::ACCEPTED, Json(Accepted { status: "accepted" })))
}

/// Kind under which a delivery is journaled; `None` when the body is not JSON.
fn journal_kind(event_kind: Option<&str>, body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let kind = event_kind
        .or_else(|| value.get("object_kind").and_then(|k| k.as_str()))
        .unwrap_or("unknown");
    Some(kind.to_string())
}

fn check_token(expected: Option<&str>, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = expected else {
        return Ok(());
    };

    match headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
        Some(token) if token == expected => Ok(()),
        Some(_) => Err(AppError::authentication("Webhook token mismatch")),
        None => Err(AppError::authentication("Missing webhook token")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_check_token_without_secret_accepts_anything() {
        assert!(check_token(None, &HeaderMap::new()).is_ok());
    }

    #[test]
    fn test_check_token() {
        let mut headers = HeaderMap::new();
        assert!(check_token(Some("s3cret"), &headers).is_err());

        headers.insert(TOKEN_HEADER, HeaderValue::from_static("wrong"));
        assert!(check_token(Some("s3cret"), &headers).is_err());

        headers.insert(TOKEN_HEADER, HeaderValue::from_static("s3cret"));
        assert!(check_token(Some("s3cret"), &headers).is_ok());
    }

    #[test]
    fn test_journal_kind() {
        assert_eq!(
            journal_kind(Some("Push Hook"), b"{}").as_deref(),
            Some("Push Hook")
        );
        assert_eq!(
            journal_kind(None, br#"{"object_kind":"pipeline"}"#).as_deref(),
            Some("pipeline")
        );
        assert_eq!(journal_kind(None, b"[]").as_deref(), Some("unknown"));
        assert_eq!(journal_kind(Some("Job Hook"), b"not json"), None);
    }

    #[test]
    fn test_error_status_codes() {
        let status = |e: AppError| ApiErr(e).into_response().status();
        assert_eq!(status(AppError::decode("bad")), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(AppError::authentication("nope")),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status(AppError::internal("boom")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
