//! Last-write-wins merge policy.
//!
//! Pure functions only: the per-entity pull code feeds in the local clock and
//! the remote record's clock and acts on the returned decision.

use crate::models::AiProfile;

/// Clock state of the local copy of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalClock {
    pub updated_at: i64,
    pub deleted: bool,
}

impl LocalClock {
    pub const fn new(updated_at: i64, deleted: bool) -> Self {
        Self {
            updated_at,
            deleted,
        }
    }
}

/// What a pull does with one remote record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// No local copy: materialize the remote record
    Insert,
    /// Remote is strictly newer: overwrite local fields
    ApplyRemote,
    /// Remote is deleted: tombstone the local copy whatever its clock
    ApplyTombstone,
    /// Local is newer: keep it and log the conflict
    KeepLocal,
    /// Same clock, or a tombstone already applied on both sides
    Unchanged,
}

impl MergeDecision {
    /// Whether the decision changes the local store.
    pub const fn applies(self) -> bool {
        matches!(self, Self::Insert | Self::ApplyRemote | Self::ApplyTombstone)
    }
}

/// Decide how a remote record merges into the local store.
///
/// Remote wins only when strictly newer; ties keep the local copy. A remote
/// tombstone always wins so a stale local edit can never resurrect a record.
pub const fn decide(local: Option<LocalClock>, remote_updated_at: i64, remote_deleted: bool) -> MergeDecision {
    let Some(local) = local else {
        return if remote_deleted {
            MergeDecision::Unchanged
        } else {
            MergeDecision::Insert
        };
    };

    if remote_deleted {
        return if local.deleted {
            MergeDecision::Unchanged
        } else {
            MergeDecision::ApplyTombstone
        };
    }

    if remote_updated_at > local.updated_at {
        MergeDecision::ApplyRemote
    } else if remote_updated_at < local.updated_at {
        MergeDecision::KeepLocal
    } else {
        MergeDecision::Unchanged
    }
}

/// Ranking used to collapse profiles that share a name.
///
/// A usable API key beats none, then the newer clock, then the later tie-break id.
pub fn prefer_profile(
    candidate: (&AiProfile, &str),
    current: (&AiProfile, &str),
) -> bool {
    let (candidate, candidate_id) = candidate;
    let (current, current_id) = current;
    let candidate_key = candidate.has_usable_api_key();
    let current_key = current.has_usable_api_key();
    if candidate_key != current_key {
        return candidate_key;
    }
    if candidate.sync.updated_at != current.sync.updated_at {
        return candidate.sync.updated_at > current.sync.updated_at;
    }
    candidate_id > current_id
}

/// [`prefer_profile`] for two local profiles, tie-broken by local id.
pub fn prefer_local_profile(candidate: &AiProfile, current: &AiProfile) -> bool {
    let candidate_id = candidate.local_id.as_str();
    let current_id = current.local_id.as_str();
    prefer_profile((candidate, &candidate_id), (current, &current_id))
}
