//! Snapshot persistence for the persistent commit map.
//!
//! Two blocks are saved: a keys block (the persistent commit TxIds, in key
//! order) and a values block (the per-commit persistent attributes in the
//! same order, followed by the decommission flag). The loader accepts the
//! current version and two past revisions:
//!
//! - v7 (current): adds the decommission flag;
//! - v6: adds the commit's user (older snapshots default to the root user);
//! - v5: the oldest supported layout.

use meridian_types::{CellId, MutationId, TimestampMap, TxId, ROOT_USER};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::commit::{Commit, CommitOptions, CommitState, CoordinatorCommitMode};
use crate::supervisor::TransactionSupervisor;

/// The snapshot version this build writes.
pub const CURRENT_SNAPSHOT_VERSION: u32 = 7;

/// Whether this build can load a snapshot of the given version.
pub fn validate_snapshot_version(version: u32) -> bool {
    matches!(version, 5 | 6 | 7)
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),

    #[error("snapshot codec error: {0}")]
    Codec(#[from] postcard::Error),

    #[error("snapshot has {keys} keys but {values} values")]
    CountMismatch { keys: usize, values: usize },

    #[error("snapshot key {expected} does not match value record {actual}")]
    KeyMismatch { expected: TxId, actual: TxId },
}

// ============================================================================
// Wire layout
// ============================================================================
//
// Field order is the wire format; do not reorder.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PersistedCommit {
    transaction_id: TxId,
    mutation_id: Option<MutationId>,
    participant_cell_ids: Vec<CellId>,
    distributed: bool,
    generate_prepare_timestamp: bool,
    inherit_commit_timestamp: bool,
    coordinator_commit_mode: CoordinatorCommitMode,
    user: String,
    persistent_state: CommitState,
    commit_timestamps: TimestampMap,
}

/// The v5 record predates user tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PersistedCommitV5 {
    transaction_id: TxId,
    mutation_id: Option<MutationId>,
    participant_cell_ids: Vec<CellId>,
    distributed: bool,
    generate_prepare_timestamp: bool,
    inherit_commit_timestamp: bool,
    coordinator_commit_mode: CoordinatorCommitMode,
    persistent_state: CommitState,
    commit_timestamps: TimestampMap,
}

#[derive(Debug, Serialize, Deserialize)]
struct ValuesBlockV7 {
    commits: Vec<PersistedCommit>,
    decommissioned: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ValuesBlockV6 {
    commits: Vec<PersistedCommit>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ValuesBlockV5 {
    commits: Vec<PersistedCommitV5>,
}

impl PersistedCommit {
    fn from_commit(commit: &Commit) -> Self {
        Self {
            transaction_id: commit.transaction_id(),
            mutation_id: commit.mutation_id(),
            participant_cell_ids: commit.participant_cell_ids().to_vec(),
            distributed: commit.distributed(),
            generate_prepare_timestamp: commit.options().generate_prepare_timestamp,
            inherit_commit_timestamp: commit.options().inherit_commit_timestamp,
            coordinator_commit_mode: commit.options().coordinator_commit_mode,
            user: commit.user().to_owned(),
            persistent_state: commit.persistent_state(),
            commit_timestamps: commit.commit_timestamps().clone(),
        }
    }

    fn into_commit(self) -> Commit {
        let mut commit = Commit::new(
            self.transaction_id,
            self.mutation_id,
            self.participant_cell_ids,
            CommitOptions {
                distributed: self.distributed,
                generate_prepare_timestamp: self.generate_prepare_timestamp,
                inherit_commit_timestamp: self.inherit_commit_timestamp,
                coordinator_commit_mode: self.coordinator_commit_mode,
            },
            self.user,
        );
        commit.set_persistent(true);
        commit.set_persistent_state(self.persistent_state);
        commit.set_commit_timestamps(self.commit_timestamps);
        commit
    }
}

impl PersistedCommitV5 {
    fn upgrade(self) -> PersistedCommit {
        PersistedCommit {
            transaction_id: self.transaction_id,
            mutation_id: self.mutation_id,
            participant_cell_ids: self.participant_cell_ids,
            distributed: self.distributed,
            generate_prepare_timestamp: self.generate_prepare_timestamp,
            inherit_commit_timestamp: self.inherit_commit_timestamp,
            coordinator_commit_mode: self.coordinator_commit_mode,
            user: ROOT_USER.to_owned(),
            persistent_state: self.persistent_state,
            commit_timestamps: self.commit_timestamps,
        }
    }
}

// ============================================================================
// Savers and loaders
// ============================================================================

impl TransactionSupervisor {
    /// Saves the keys block: persistent commit TxIds in key order.
    pub fn save_keys(&self) -> Vec<u8> {
        let keys: Vec<TxId> = self
            .persistent_commits()
            .map(Commit::transaction_id)
            .collect();
        postcard::to_allocvec(&keys).expect("snapshot keys always serialize")
    }

    /// Saves the values block: per-commit attributes in key order, then the
    /// decommission flag.
    pub fn save_values(&self) -> Vec<u8> {
        let block = ValuesBlockV7 {
            commits: self
                .persistent_commits()
                .map(PersistedCommit::from_commit)
                .collect(),
            decommissioned: self.decommissioned_flag(),
        };
        postcard::to_allocvec(&block).expect("snapshot values always serialize")
    }

    /// Loads the keys block; the subsequent [`load_values`] call consumes
    /// the staged keys.
    ///
    /// [`load_values`]: TransactionSupervisor::load_values
    pub fn load_keys(&mut self, bytes: &[u8]) -> Result<(), SnapshotError> {
        self.snapshot_keys = postcard::from_bytes(bytes)?;
        Ok(())
    }

    /// Loads the values block for a given snapshot version, rebuilding the
    /// persistent commit map and the decommission flag.
    pub fn load_values(&mut self, version: u32, bytes: &[u8]) -> Result<(), SnapshotError> {
        if !validate_snapshot_version(version) {
            return Err(SnapshotError::UnsupportedVersion(version));
        }

        let (commits, decommissioned) = match version {
            7 => {
                let block: ValuesBlockV7 = postcard::from_bytes(bytes)?;
                (block.commits, block.decommissioned)
            }
            6 => {
                let block: ValuesBlockV6 = postcard::from_bytes(bytes)?;
                (block.commits, false)
            }
            _ => {
                let block: ValuesBlockV5 = postcard::from_bytes(bytes)?;
                (
                    block
                        .commits
                        .into_iter()
                        .map(PersistedCommitV5::upgrade)
                        .collect(),
                    false,
                )
            }
        };

        let keys = std::mem::take(&mut self.snapshot_keys);
        if keys.len() != commits.len() {
            return Err(SnapshotError::CountMismatch {
                keys: keys.len(),
                values: commits.len(),
            });
        }
        for (expected, record) in keys.iter().zip(&commits) {
            if *expected != record.transaction_id {
                return Err(SnapshotError::KeyMismatch {
                    expected: *expected,
                    actual: record.transaction_id,
                });
            }
        }

        for record in commits {
            self.insert_persistent_commit(record.into_commit());
        }
        self.set_decommissioned_flag(decommissioned);
        Ok(())
    }
}
