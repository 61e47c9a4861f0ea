//! Merge request record.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// What the store knows about one merge request.
///
/// The SHAs always reflect the most recent push. `note_id` is set by the
/// first successful note creation and reused for every later update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MergeRequestRecord {
    /// GitLab project ID.
    pub project_id: i64,

    /// Project-scoped MR number.
    pub mr_iid: i64,

    /// Commit the merge request's history parents onto.
    pub base_sha: Option<String>,

    /// Latest commit in the merge request.
    pub head_sha: Option<String>,

    /// ID of the coverage note posted on the merge request.
    pub note_id: Option<i64>,

    /// Last write to this record (Unix).
    pub updated_at: i64,
}

impl MergeRequestRecord {
    /// Both SHAs, if the record has been resolved.
    pub fn shas(&self) -> Option<(&str, &str)> {
        match (self.base_sha.as_deref(), self.head_sha.as_deref()) {
            (Some(base), Some(head)) => Some((base, head)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(base: Option<&str>, head: Option<&str>) -> MergeRequestRecord {
        MergeRequestRecord {
            project_id: 1,
            mr_iid: 5,
            base_sha: base.map(String::from),
            head_sha: head.map(String::from),
            note_id: None,
            updated_at: 0,
        }
    }

    #[test]
    fn test_shas_requires_both_sides() {
        assert_eq!(record(Some("c1"), Some("c2")).shas(), Some(("c1", "c2")));
        assert_eq!(record(None, Some("c2")).shas(), None);
        assert_eq!(record(Some("c1"), None).shas(), None);
    }
}
