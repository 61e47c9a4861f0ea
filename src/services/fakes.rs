//! In-memory GitLab fake (testing only).
//!
//! `MemoryGitLab` satisfies [`GitLabApi`] from preloaded commit lists and job
//! coverage, records every note it is asked to create or update, and can be
//! told to fail individual operations.

use crate::error::AppError;
use crate::services::gitlab_client::{GitLabApi, GitLabCommit, GitLabJob, GitLabNote};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

/// A note write observed by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteCall {
    Create {
        project_id: i64,
        mr_iid: i64,
        body: String,
    },
    Update {
        project_id: i64,
        mr_iid: i64,
        note_id: i64,
        body: String,
    },
}

#[derive(Debug, Default)]
struct State {
    commits: HashMap<(i64, i64), Vec<GitLabCommit>>,
    jobs: HashMap<(i64, i64), GitLabJob>,
    notes: HashMap<(i64, i64), Vec<GitLabNote>>,
    calls: Vec<NoteCall>,
    next_note_id: i64,
}

/// In-memory GitLab backed by hash maps.
#[derive(Debug, Default)]
pub struct MemoryGitLab {
    state: Mutex<State>,
    fail_commits: AtomicBool,
    fail_jobs: AtomicBool,
    fail_creates: AtomicBool,
    fail_updates: AtomicBool,
}

impl MemoryGitLab {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Set the history of a merge request as a linear chain ending at `head`.
    ///
    /// `chain` is oldest first and starts with the base commit, so
    /// `["c1", "c2", "c3"]` yields commits c3 and c2 (most recent first) with
    /// c1 as the base.
    pub fn set_linear_history(&self, project_id: i64, mr_iid: i64, chain: &[&str]) {
        let commits = chain
            .windows(2)
            .rev()
            .map(|pair| GitLabCommit {
                id: pair[1].to_string(),
                short_id: None,
                title: None,
                parent_ids: vec![pair[0].to_string()],
            })
            .collect();
        self.set_commits(project_id, mr_iid, commits);
    }

    /// Set the raw commit list of a merge request, most recent first.
    pub fn set_commits(&self, project_id: i64, mr_iid: i64, commits: Vec<GitLabCommit>) {
        self.state().commits.insert((project_id, mr_iid), commits);
    }

    /// Set the coverage a job reports.
    pub fn set_job_coverage(&self, project_id: i64, job_id: i64, coverage: Option<f64>) {
        self.state().jobs.insert(
            (project_id, job_id),
            GitLabJob {
                id: job_id,
                status: Some("success".to_string()),
                coverage,
            },
        );
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub fn fail_jobs(&self, fail: bool) {
        self.fail_jobs.store(fail, Ordering::SeqCst);
    }

    pub fn fail_note_creation(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_note_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Notes currently present on a merge request.
    pub fn notes(&self, project_id: i64, mr_iid: i64) -> Vec<GitLabNote> {
        self.state()
            .notes
            .get(&(project_id, mr_iid))
            .cloned()
            .unwrap_or_default()
    }

    /// Every note create/update call, in order.
    pub fn calls(&self) -> Vec<NoteCall> {
        self.state().calls.clone()
    }

    fn unavailable(endpoint: String) -> AppError {
        AppError::gitlab_api_full("Service unavailable", 503, endpoint)
    }
}

#[async_trait]
impl GitLabApi for MemoryGitLab {
    async fn merge_request_commits(
        &self,
        project_id: i64,
        mr_iid: i64,
    ) -> Result<Vec<GitLabCommit>, AppError> {
        let endpoint = format!("/projects/{}/merge_requests/{}/commits", project_id, mr_iid);
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(Self::unavailable(endpoint));
        }
        self.state()
            .commits
            .get(&(project_id, mr_iid))
            .cloned()
            .ok_or_else(|| AppError::gitlab_api_full("Resource not found", 404, endpoint))
    }

    async fn job(&self, project_id: i64, job_id: i64) -> Result<GitLabJob, AppError> {
        let endpoint = format!("/projects/{}/jobs/{}", project_id, job_id);
        if self.fail_jobs.load(Ordering::SeqCst) {
            return Err(Self::unavailable(endpoint));
        }
        self.state()
            .jobs
            .get(&(project_id, job_id))
            .cloned()
            .ok_or_else(|| AppError::gitlab_api_full("Resource not found", 404, endpoint))
    }

    async fn create_merge_request_note(
        &self,
        project_id: i64,
        mr_iid: i64,
        body: &str,
    ) -> Result<GitLabNote, AppError> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(Self::unavailable(format!(
                "/projects/{}/merge_requests/{}/notes",
                project_id, mr_iid
            )));
        }

        let mut state = self.state();
        state.next_note_id += 1;
        let note = GitLabNote {
            id: state.next_note_id,
            body: body.to_string(),
        };
        state
            .notes
            .entry((project_id, mr_iid))
            .or_default()
            .push(note.clone());
        state.calls.push(NoteCall::Create {
            project_id,
            mr_iid,
            body: body.to_string(),
        });
        Ok(note)
    }

    async fn update_merge_request_note(
        &self,
        project_id: i64,
        mr_iid: i64,
        note_id: i64,
        body: &str,
    ) -> Result<GitLabNote, AppError> {
        let endpoint = format!(
            "/projects/{}/merge_requests/{}/notes/{}",
            project_id, mr_iid, note_id
        );
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Self::unavailable(endpoint));
        }

        let mut state = self.state();
        let note = state
            .notes
            .get_mut(&(project_id, mr_iid))
            .and_then(|notes| notes.iter_mut().find(|n| n.id == note_id))
            .ok_or_else(|| AppError::gitlab_api_full("Resource not found", 404, endpoint))?;
        note.body = body.to_string();
        let updated = note.clone();

        state.calls.push(NoteCall::Update {
            project_id,
            mr_iid,
            note_id,
            body: body.to_string(),
        });
        Ok(updated)
    }
}
