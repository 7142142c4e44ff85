//! Outbound mutation journal model

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Operation recorded for a journaled progress mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalOp {
    /// First local write for a (user, lesson) pair
    CreateProgress,
    /// Subsequent local write for an existing pair
    UpdateProgress,
}

impl JournalOp {
    /// Database tag for this operation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateProgress => "create_progress",
            Self::UpdateProgress => "update_progress",
        }
    }
}

impl FromStr for JournalOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create_progress" => Ok(Self::CreateProgress),
            "update_progress" => Ok(Self::UpdateProgress),
            other => Err(format!("unknown journal operation '{other}'")),
        }
    }
}

/// One outbound mutation awaiting upload.
///
/// Rows are processed in insertion-id order and are only ever mutated to
/// bump `retry_count`; a successful upload deletes the row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Monotonic insertion id assigned by the store
    pub id: i64,
    /// Recorded operation
    pub op: JournalOp,
    /// Id of the progress row this entry refers to
    pub entity_id: String,
    /// Serialized document captured at mutation time
    pub payload: String,
    /// Failed upload attempts so far
    pub retry_count: u32,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_op_round_trips_through_tags() {
        for op in [JournalOp::CreateProgress, JournalOp::UpdateProgress] {
            assert_eq!(op.as_str().parse::<JournalOp>().unwrap(), op);
        }
        assert!("delete_progress".parse::<JournalOp>().is_err());
    }
}
