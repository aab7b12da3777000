//! Sync conflict model

use serde::{Deserialize, Serialize};

/// Side whose value was kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictWinner {
    Local,
    Remote,
}

impl ConflictWinner {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }

    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("remote") {
            Self::Remote
        } else {
            Self::Local
        }
    }
}

/// Recorded sync conflict resolved by last-write-wins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Remote collection of the record
    pub collection: String,
    /// Stable key or remote id of the record
    pub record_key: String,
    /// Local timestamp when the conflict occurred
    pub local_updated_at: i64,
    /// Remote timestamp
    pub incoming_updated_at: i64,
    /// Resolution timestamp (unix ms)
    pub resolved_at: i64,
    /// Which side was kept
    pub winner: ConflictWinner,
}
