//! Business logic services.
//!
//! This module contains the GitLab client, the correlation engine and the
//! webhook transport that feeds it.
//!
//! Services are written against the [`GitLabApi`] trait so they can be tested
//! without a GitLab instance.

pub mod correlation;
pub mod coverage_fetcher;
pub mod dispatcher;
pub mod fakes;
pub mod gitlab_client;
pub mod report;
pub mod resolver;
pub mod webhook_server;

pub use correlation::{BuildOutcome, CorrelationEngine, EventOutcome};
pub use dispatcher::Dispatcher;
pub use gitlab_client::{GitLabApi, GitLabClient};
pub use report::{CoverageReport, NoteAction, ReportOutcome};
