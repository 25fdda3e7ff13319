//! Structured reconciliation conflicts.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A reconciliation problem that is reported, never auto-resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Conflict {
    /// The hash is already owned by another record.
    DuplicateHash {
        id: u64,
        hash: String,
        owner_id: u64,
    },
    /// The record already carries a different hash.
    HashMismatch {
        id: u64,
        existing: String,
        observed: String,
    },
    /// The hash does not fit the 40 bits of a composite key.
    HashOutOfRange { id: u64, hash: String },
    /// The id does not fit the 24 bits of a composite key.
    IdOutOfRange { id: u64 },
}

impl Conflict {
    /// Record the conflict concerns.
    pub fn id(&self) -> u64 {
        match self {
            Conflict::DuplicateHash { id, .. }
            | Conflict::HashMismatch { id, .. }
            | Conflict::HashOutOfRange { id, .. }
            | Conflict::IdOutOfRange { id } => *id,
        }
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conflict::DuplicateHash { id, hash, owner_id } => {
                write!(f, "hash {hash} of #{id} already belongs to #{owner_id}")
            }
            Conflict::HashMismatch {
                id,
                existing,
                observed,
            } => write!(f, "#{id} has hash {existing}, source reported {observed}"),
            Conflict::HashOutOfRange { id, hash } => {
                write!(f, "hash {hash} of #{id} exceeds 40 bits")
            }
            Conflict::IdOutOfRange { id } => write!(f, "id #{id} exceeds 24 bits"),
        }
    }
}
