//! Identity and sync bookkeeping shared by every synchronized entity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Store-local identity, using UUID v7 (time-sortable).
///
/// Never sent to the backend as the record identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalId(Uuid);

impl LocalId {
    /// Create a new unique local ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LocalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Clock value for a local mutation following one stamped `previous`.
#[must_use]
pub const fn next_clock(previous: i64, now: i64) -> i64 {
    let bumped = previous.saturating_add(1);
    if now > bumped {
        now
    } else {
        bumped
    }
}

/// Remote identity, mutation clock, tombstone and dirty flag.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncMeta {
    /// Backend-assigned id; `None` until the first successful push
    pub remote_id: Option<String>,
    /// Last mutation (Unix ms), never moves backwards
    pub updated_at: i64,
    /// Tombstone flag
    pub deleted: bool,
    /// Local state matches the last confirmed push or pull
    pub is_synced: bool,
}

impl SyncMeta {
    /// Metadata for an entity created locally at `now`.
    #[must_use]
    pub const fn new_local(now: i64) -> Self {
        Self {
            remote_id: None,
            updated_at: now,
            deleted: false,
            is_synced: false,
        }
    }

    /// Metadata for an entity materialized from a remote record.
    #[must_use]
    pub fn from_remote(remote_id: impl Into<String>, updated_at: i64, deleted: bool) -> Self {
        Self {
            remote_id: Some(remote_id.into()),
            updated_at,
            deleted,
            is_synced: true,
        }
    }

    /// Record a local mutation at `now`.
    ///
    /// The clock always advances, even when `now` is behind the stored value
    /// (same-millisecond edits, or a remote stamp from a faster clock), so a
    /// push confirmation carrying the old clock never marks this edit synced.
    pub fn touch(&mut self, now: i64) {
        self.updated_at = next_clock(self.updated_at, now);
        self.is_synced = false;
    }

    /// Record a local deletion at `now`.
    pub fn mark_deleted(&mut self, now: i64) {
        self.touch(now);
        self.deleted = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_id_parse_roundtrip() {
        let id = LocalId::new();
        let parsed: LocalId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn touch_always_advances_clock() {
        let mut meta = SyncMeta::from_remote("r1", 500, false);
        meta.touch(100);
        assert_eq!(meta.updated_at, 501);
        assert!(!meta.is_synced);

        meta.touch(501);
        assert_eq!(meta.updated_at, 502);

        meta.touch(900);
        assert_eq!(meta.updated_at, 900);
    }

    #[test]
    fn mark_deleted_sets_tombstone_and_dirty() {
        let mut meta = SyncMeta::from_remote("r1", 10, false);
        meta.mark_deleted(20);
        assert!(meta.deleted);
        assert!(!meta.is_synced);
        assert_eq!(meta.updated_at, 20);
    }
}
