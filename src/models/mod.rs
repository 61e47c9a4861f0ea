//! Data models for the coverage reporter.
//!
//! Persisted records derive `FromRow` for SQLx queries; inbound events are the
//! typed output of webhook decoding.

pub mod commit;
pub mod event;
pub mod merge_request;

// Re-exports for convenient access
pub use commit::{known_coverage, CommitCoverageRecord};
pub use event::{BuildEvent, InboundEvent, MergeRequestEvent, BUILD_STATUS_SUCCESS};
pub use merge_request::MergeRequestRecord;
