//! Persistent correlation store.
//!
//! Holds both sides of the coverage join, scoped by project:
//! merge request -> (base, head, note) and commit -> (coverage, linked MRs).
//! Every write is a single statement or a single transaction, so a failure
//! leaves the previous state untouched. Missing rows read as `None`.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::commit::CommitRow;
use crate::models::{known_coverage, CommitCoverageRecord, MergeRequestRecord};

/// Get the current Unix timestamp.
fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Handle to the correlation tables. Cheap to clone; safe to share across tasks.
#[derive(Debug, Clone)]
pub struct Store {
    pool: DbPool,
}

impl Store {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Record the resolved SHAs of a merge request and index it under its head.
    ///
    /// Keeps any existing `note_id`. Links from a previous head commit of the
    /// same merge request are dropped, so a commit's link set only ever holds
    /// merge requests currently headed there.
    pub async fn upsert_merge_request(
        &self,
        project_id: i64,
        mr_iid: i64,
        base_sha: &str,
        head_sha: &str,
    ) -> Result<MergeRequestRecord, AppError> {
        let updated_at = now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO merge_requests (project_id, mr_iid, base_sha, head_sha, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(project_id, mr_iid) DO UPDATE SET
                base_sha = excluded.base_sha,
                head_sha = excluded.head_sha,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(project_id)
        .bind(mr_iid)
        .bind(base_sha)
        .bind(head_sha)
        .bind(updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO commits (project_id, sha, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(project_id, sha) DO NOTHING
            "#,
        )
        .bind(project_id)
        .bind(head_sha)
        .bind(updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "DELETE FROM commit_merge_requests WHERE project_id = ? AND mr_iid = ? AND sha != ?",
        )
        .bind(project_id)
        .bind(mr_iid)
        .bind(head_sha)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT OR IGNORE INTO commit_merge_requests (project_id, sha, mr_iid) VALUES (?, ?, ?)",
        )
        .bind(project_id)
        .bind(head_sha)
        .bind(mr_iid)
        .execute(&mut *tx)
        .await?;

        let record = sqlx::query_as::<_, MergeRequestRecord>(
            r#"
            SELECT project_id, mr_iid, base_sha, head_sha, note_id, updated_at
            FROM merge_requests
            WHERE project_id = ? AND mr_iid = ?
            "#,
        )
        .bind(project_id)
        .bind(mr_iid)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(record)
    }

    /// Look up a merge request record.
    pub async fn merge_request(
        &self,
        project_id: i64,
        mr_iid: i64,
    ) -> Result<Option<MergeRequestRecord>, AppError> {
        let record = sqlx::query_as::<_, MergeRequestRecord>(
            r#"
            SELECT project_id, mr_iid, base_sha, head_sha, note_id, updated_at
            FROM merge_requests
            WHERE project_id = ? AND mr_iid = ?
            "#,
        )
        .bind(project_id)
        .bind(mr_iid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Look up a commit record together with its linked merge requests.
    pub async fn commit(
        &self,
        project_id: i64,
        sha: &str,
    ) -> Result<Option<CommitCoverageRecord>, AppError> {
        let row = sqlx::query_as::<_, CommitRow>(
            "SELECT project_id, sha, coverage FROM commits WHERE project_id = ? AND sha = ?",
        )
        .bind(project_id)
        .bind(sha)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let links = self.linked_merge_requests(project_id, sha).await?;
        Ok(Some(row.with_links(links)))
    }

    /// Coverage known for a commit, if any.
    pub async fn coverage(&self, project_id: i64, sha: &str) -> Result<Option<f64>, AppError> {
        let row: Option<(Option<f64>,)> =
            sqlx::query_as("SELECT coverage FROM commits WHERE project_id = ? AND sha = ?")
                .bind(project_id)
                .bind(sha)
                .fetch_optional(&self.pool)
                .await?;

        Ok(known_coverage(row.and_then(|(coverage,)| coverage)))
    }

    /// Store a commit's coverage unless one is already known.
    ///
    /// Zero or otherwise unknown values are never persisted. Returns whether
    /// the value was written.
    pub async fn store_coverage(
        &self,
        project_id: i64,
        sha: &str,
        coverage: f64,
    ) -> Result<bool, AppError> {
        let Some(coverage) = known_coverage(Some(coverage)) else {
            return Ok(false);
        };

        let result = sqlx::query(
            r#"
            INSERT INTO commits (project_id, sha, coverage, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(project_id, sha) DO UPDATE SET
                coverage = excluded.coverage,
                updated_at = excluded.updated_at
            WHERE commits.coverage IS NULL
            "#,
        )
        .bind(project_id)
        .bind(sha)
        .bind(coverage)
        .bind(now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Merge requests whose current head is `sha`, ascending by IID.
    pub async fn linked_merge_requests(
        &self,
        project_id: i64,
        sha: &str,
    ) -> Result<Vec<i64>, AppError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT mr_iid FROM commit_merge_requests
            WHERE project_id = ? AND sha = ?
            ORDER BY mr_iid ASC
            "#,
        )
        .bind(project_id)
        .bind(sha)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(iid,)| iid).collect())
    }

    /// ID of the coverage note already posted on a merge request.
    pub async fn note_id(&self, project_id: i64, mr_iid: i64) -> Result<Option<i64>, AppError> {
        let row: Option<(Option<i64>,)> = sqlx::query_as(
            "SELECT note_id FROM merge_requests WHERE project_id = ? AND mr_iid = ?",
        )
        .bind(project_id)
        .bind(mr_iid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|(note_id,)| note_id))
    }

    /// Remember the note posted on a merge request.
    ///
    /// Only fills an empty slot: returns `false` and leaves the stored id
    /// alone when another note was recorded first.
    pub async fn set_note_id(
        &self,
        project_id: i64,
        mr_iid: i64,
        note_id: i64,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE merge_requests SET note_id = ?, updated_at = ?
            WHERE project_id = ? AND mr_iid = ? AND note_id IS NULL
            "#,
        )
        .bind(note_id)
        .bind(now())
        .bind(project_id)
        .bind(mr_iid)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        match self.note_id(project_id, mr_iid).await? {
            Some(_) => Ok(false),
            None => Err(AppError::database_with_op(
                format!("merge request {} of project {} is not stored", mr_iid, project_id),
                "set_note_id",
            )),
        }
    }

    /// Append a raw webhook payload to the event journal.
    pub async fn record_event(&self, event_kind: &str, payload: &str) -> Result<i64, AppError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO webhook_events (event_kind, payload, received_at) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(event_kind)
        .bind(payload)
        .bind(now())
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    async fn setup_store() -> (Store, TempDir) {
        let dir = tempdir().unwrap();
        let pool = crate::db::initialize(&dir.path().join("test.db"))
            .await
            .unwrap();
        (Store::new(pool), dir)
    }

    #[tokio::test]
    async fn test_missing_rows_read_as_none() {
        let (store, _dir) = setup_store().await;

        assert!(store.merge_request(1, 1).await.unwrap().is_none());
        assert!(store.commit(1, "abc").await.unwrap().is_none());
        assert!(store.coverage(1, "abc").await.unwrap().is_none());
        assert!(store.note_id(1, 1).await.unwrap().is_none());
        assert!(store.linked_merge_requests(1, "abc").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_merge_request_links_head() {
        let (store, _dir) = setup_store().await;

        let record = store.upsert_merge_request(1, 5, "c1", "c2").await.unwrap();
        assert_eq!(record.shas(), Some(("c1", "c2")));
        assert_eq!(record.note_id, None);

        let commit = store.commit(1, "c2").await.unwrap().unwrap();
        assert_eq!(commit.coverage, None);
        assert_eq!(commit.linked_merge_requests, vec![5]);

        // Only the head is indexed.
        assert!(store.commit(1, "c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_merge_request_keeps_note_and_moves_link() {
        let (store, _dir) = setup_store().await;

        store.upsert_merge_request(1, 5, "c1", "c2").await.unwrap();
        assert!(store.set_note_id(1, 5, 900).await.unwrap());

        let record = store.upsert_merge_request(1, 5, "c1", "c3").await.unwrap();
        assert_eq!(record.head_sha.as_deref(), Some("c3"));
        assert_eq!(record.note_id, Some(900));

        assert!(store.linked_merge_requests(1, "c2").await.unwrap().is_empty());
        assert_eq!(store.linked_merge_requests(1, "c3").await.unwrap(), vec![5]);
    }

    #[tokio::test]
    async fn test_shared_head_links_every_merge_request() {
        let (store, _dir) = setup_store().await;

        store.upsert_merge_request(1, 8, "base", "head").await.unwrap();
        store.upsert_merge_request(1, 3, "base", "head").await.unwrap();
        store.upsert_merge_request(2, 3, "base", "head").await.unwrap();

        assert_eq!(store.linked_merge_requests(1, "head").await.unwrap(), vec![3, 8]);
        assert_eq!(store.linked_merge_requests(2, "head").await.unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn test_store_coverage_never_overwrites() {
        let (store, _dir) = setup_store().await;

        assert!(store.store_coverage(1, "abc", 70.5).await.unwrap());
        assert!(!store.store_coverage(1, "abc", 80.0).await.unwrap());
        assert_eq!(store.coverage(1, "abc").await.unwrap(), Some(70.5));
    }

    #[tokio::test]
    async fn test_store_coverage_ignores_zero() {
        let (store, _dir) = setup_store().await;

        assert!(!store.store_coverage(1, "abc", 0.0).await.unwrap());
        assert!(store.commit(1, "abc").await.unwrap().is_none());

        store.store_coverage(1, "abc", 42.0).await.unwrap();
        assert!(!store.store_coverage(1, "abc", 0.0).await.unwrap());
        assert_eq!(store.coverage(1, "abc").await.unwrap(), Some(42.0));
    }

    #[tokio::test]
    async fn test_store_coverage_fills_indexed_commit() {
        let (store, _dir) = setup_store().await;

        store.upsert_merge_request(1, 5, "c1", "c2").await.unwrap();
        assert!(store.store_coverage(1, "c2", 65.0).await.unwrap());

        let commit = store.commit(1, "c2").await.unwrap().unwrap();
        assert_eq!(commit.coverage, Some(65.0));
        assert_eq!(commit.linked_merge_requests, vec![5]);
    }

    #[tokio::test]
    async fn test_coverage_is_scoped_by_project() {
        let (store, _dir) = setup_store().await;

        store.store_coverage(1, "abc", 50.0).await.unwrap();
        assert_eq!(store.coverage(2, "abc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_note_id_never_replaces_stored_note() {
        let (store, _dir) = setup_store().await;
        store.upsert_merge_request(1, 5, "c1", "c2").await.unwrap();

        assert!(store.set_note_id(1, 5, 900).await.unwrap());
        assert!(!store.set_note_id(1, 5, 901).await.unwrap());
        assert_eq!(store.note_id(1, 5).await.unwrap(), Some(900));
    }

    #[tokio::test]
    async fn test_set_note_id_requires_record() {
        let (store, _dir) = setup_store().await;

        let err = store.set_note_id(1, 99, 1).await.unwrap_err();
        assert!(matches!(err, AppError::Database { .. }));
    }

    #[tokio::test]
    async fn test_record_event() {
        let (store, _dir) = setup_store().await;

        let first = store.record_event("Job Hook", "{}").await.unwrap();
        let second = store
            .record_event("Merge Request Hook", "{\"object_kind\":\"merge_request\"}")
            .await
            .unwrap();
        assert!(second > first);

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM webhook_events")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count.0, 2);
    }
}
