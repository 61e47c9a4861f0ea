//! Application error types.
//!
//! Every failure that can occur while handling an inbound event is expressed
//! as an [`AppError`]. Errors are logged at the task boundary and never reach
//! the webhook sender, except for decode failures which are answered inline.

use serde::Serialize;
use thiserror::Error;

/// Application-level errors.
///
/// All variants serialize to a structured JSON object so the webhook
/// listener can return them as response bodies.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum AppError {
    /// Inbound payload could not be decoded.
    #[error("Decode error: {message}")]
    Decode {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        event_kind: Option<String>,
    },

    /// Inbound payload is well-formed but not an event this service handles.
    #[error("Unsupported event: {event_kind}")]
    UnsupportedEvent { event_kind: String },

    /// Merge request commit history could not be resolved.
    #[error("Resolution error: {message}")]
    Resolution {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        merge_request_iid: Option<i64>,
    },

    /// Job coverage could not be fetched.
    #[error("Fetch error: {message}")]
    Fetch {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        job_id: Option<i64>,
    },

    /// Database operation failed.
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        operation: Option<String>,
    },

    /// Creating or updating the coverage note failed.
    #[error("Post error: {message}")]
    Post {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        note_id: Option<i64>,
    },

    /// GitLab API request failed.
    #[error("GitLab API error: {message}")]
    GitLabApi {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },

    /// Network request failed.
    #[error("Network error: {message}")]
    Network { message: String },

    /// Authentication failed or credentials invalid.
    #[error("Authentication error: {message}")]
    Authentication { message: String },

    /// Invalid process configuration.
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },

    /// Internal application error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
            event_kind: None,
        }
    }

    /// Create a decode error tagged with the declared event kind.
    pub fn decode_for_kind(message: impl Into<String>, event_kind: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
            event_kind: Some(event_kind.into()),
        }
    }

    /// Create an unsupported event error.
    pub fn unsupported_event(event_kind: impl Into<String>) -> Self {
        Self::UnsupportedEvent {
            event_kind: event_kind.into(),
        }
    }

    /// Create a resolution error for a specific merge request.
    pub fn resolution_for(message: impl Into<String>, merge_request_iid: i64) -> Self {
        Self::Resolution {
            message: message.into(),
            merge_request_iid: Some(merge_request_iid),
        }
    }

    /// Create a fetch error for a specific job.
    pub fn fetch_for_job(message: impl Into<String>, job_id: i64) -> Self {
        Self::Fetch {
            message: message.into(),
            job_id: Some(job_id),
        }
    }

    /// Create a database error with optional operation context.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            operation: None,
        }
    }

    /// Create a database error with operation context.
    pub fn database_with_op(message: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            operation: Some(operation.into()),
        }
    }

    /// Create a post error for a note that has not been created yet.
    pub fn post(message: impl Into<String>) -> Self {
        Self::Post {
            message: message.into(),
            note_id: None,
        }
    }

    /// Create a post error for an existing note.
    pub fn post_for_note(message: impl Into<String>, note_id: i64) -> Self {
        Self::Post {
            message: message.into(),
            note_id: Some(note_id),
        }
    }

    /// Create a GitLab API error.
    pub fn gitlab_api(message: impl Into<String>) -> Self {
        Self::GitLabApi {
            message: message.into(),
            status_code: None,
            endpoint: None,
        }
    }

    /// Create a GitLab API error with status code and endpoint.
    pub fn gitlab_api_full(
        message: impl Into<String>,
        status_code: u16,
        endpoint: impl Into<String>,
    ) -> Self {
        Self::GitLabApi {
            message: message.into(),
            status_code: Some(status_code),
            endpoint: Some(endpoint.into()),
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create a configuration error for a named field.
    pub fn config_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if this error came from a malformed inbound payload.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }

    /// Check if this error marks an event kind the service ignores.
    pub fn is_unsupported_event(&self) -> bool {
        matches!(self, Self::UnsupportedEvent { .. })
    }
}

// Conversions from common error types

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::database(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::network("Request timed out")
        } else if err.is_connect() {
            Self::network("Failed to connect to server")
        } else if err.is_status() {
            Self::gitlab_api(format!("HTTP error: {}", err))
        } else {
            Self::network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::decode(format!("JSON error: {}", err))
    }
}

impl From<crate::db::DbError> for AppError {
    fn from(err: crate::db::DbError) -> Self {
        Self::database(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serialization() {
        let err = AppError::database("connection failed");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"type\":\"Database\""));
        assert!(json.contains("connection failed"));
    }

    #[test]
    fn test_gitlab_api_error_full() {
        let err = AppError::gitlab_api_full("Not Found", 404, "/projects/1/jobs/2");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"status_code\":404"));
        assert!(json.contains("/projects/1/jobs/2"));
    }

    #[test]
    fn test_optional_fields_not_serialized() {
        let err = AppError::post("create failed");
        let json = serde_json::to_string(&err).unwrap();
        assert!(!json.contains("note_id"));
    }

    #[test]
    fn test_json_error_is_decode_error() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err = AppError::from(parse.unwrap_err());
        assert!(err.is_decode());
    }

    #[test]
    fn test_display_impl() {
        let err = AppError::resolution_for("merge request has no commits", 5);
        assert_eq!(
            format!("{}", err),
            "Resolution error: merge request has no commits"
        );
        assert_eq!(
            AppError::unsupported_event("Push Hook").to_string(),
            "Unsupported event: Push Hook"
        );
    }
}
