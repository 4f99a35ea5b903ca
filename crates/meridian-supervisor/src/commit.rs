//! Per-transaction commit coordination records.
//!
//! A [`Commit`] exists for every transaction whose commit this cell
//! coordinates. It is born transient (leader-only); distributed commits are
//! promoted to the persistent map when the phase-one mutation applies, and
//! removed by the finish mutation. On leader loss all transient instances
//! are discarded; persistent ones are replayed on the next activation.

use std::collections::HashSet;

use meridian_types::{CellId, MutationId, TimestampMap, TxId};
use serde::{Deserialize, Serialize};

use crate::response::ResponseSlot;

// ============================================================================
// Commit state
// ============================================================================

/// States of a coordinated commit.
///
/// The persistent state only ever advances along
/// `Start → Prepare → Commit`, `Start → Prepare → Abort` or
/// `Start → Abort`; the remaining states are transient, leader-only
/// waypoints.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum CommitState {
    #[default]
    Start,
    Prepare,
    /// Transient only: waiting on the commit-timestamp combiner.
    GeneratingCommitTimestamps,
    Commit,
    /// Transient only: the phase-two abort mutation is in flight.
    Aborting,
    Abort,
    /// Transient only: the finish mutation is in flight.
    Finishing,
}

impl std::fmt::Display for CommitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CommitState::Start => "Start",
            CommitState::Prepare => "Prepare",
            CommitState::GeneratingCommitTimestamps => "GeneratingCommitTimestamps",
            CommitState::Commit => "Commit",
            CommitState::Aborting => "Aborting",
            CommitState::Abort => "Abort",
            CommitState::Finishing => "Finishing",
        };
        write!(f, "{name}")
    }
}

/// When the coordinator applies its own local commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CoordinatorCommitMode {
    /// During the phase-two commit mutation.
    #[default]
    Eager = 0,
    /// Deferred to the finish mutation, so participants observe the commit
    /// before the coordinator's own effects become visible.
    Lazy = 1,
}

// ============================================================================
// Commit options
// ============================================================================

/// The client-chosen parameters of a commit, fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitOptions {
    pub distributed: bool,
    pub generate_prepare_timestamp: bool,
    pub inherit_commit_timestamp: bool,
    pub coordinator_commit_mode: CoordinatorCommitMode,
}

// ============================================================================
// Commit entity
// ============================================================================

/// A commit being coordinated by this cell.
#[derive(Debug)]
pub struct Commit {
    transaction_id: TxId,
    mutation_id: Option<MutationId>,
    participant_cell_ids: Vec<CellId>,
    options: CommitOptions,
    user: String,

    persistent: bool,
    transient_state: CommitState,
    persistent_state: CommitState,
    commit_timestamps: TimestampMap,
    responded_cell_ids: HashSet<CellId>,
    response: ResponseSlot,
}

impl Commit {
    pub fn new(
        transaction_id: TxId,
        mutation_id: Option<MutationId>,
        participant_cell_ids: Vec<CellId>,
        options: CommitOptions,
        user: impl Into<String>,
    ) -> Self {
        Self {
            transaction_id,
            mutation_id,
            participant_cell_ids,
            options,
            user: user.into(),
            persistent: false,
            transient_state: CommitState::Start,
            persistent_state: CommitState::Start,
            commit_timestamps: TimestampMap::new(),
            responded_cell_ids: HashSet::new(),
            response: ResponseSlot::new(),
        }
    }

    pub fn transaction_id(&self) -> TxId {
        self.transaction_id
    }

    pub fn mutation_id(&self) -> Option<MutationId> {
        self.mutation_id
    }

    pub fn participant_cell_ids(&self) -> &[CellId] {
        &self.participant_cell_ids
    }

    pub fn options(&self) -> &CommitOptions {
        &self.options
    }

    pub fn distributed(&self) -> bool {
        self.options.distributed
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn persistent(&self) -> bool {
        self.persistent
    }

    pub fn set_persistent(&mut self, persistent: bool) {
        self.persistent = persistent;
    }

    pub fn transient_state(&self) -> CommitState {
        self.transient_state
    }

    /// Sets the transient state and clears the responded set; every
    /// transient transition starts observing acknowledgements afresh.
    pub fn set_transient_state(&mut self, state: CommitState) {
        self.transient_state = state;
        self.responded_cell_ids.clear();
    }

    pub fn persistent_state(&self) -> CommitState {
        self.persistent_state
    }

    pub fn set_persistent_state(&mut self, state: CommitState) {
        self.persistent_state = state;
    }

    pub fn commit_timestamps(&self) -> &TimestampMap {
        &self.commit_timestamps
    }

    pub fn set_commit_timestamps(&mut self, commit_timestamps: TimestampMap) {
        self.commit_timestamps = commit_timestamps;
    }

    pub fn responded_cell_ids(&self) -> &HashSet<CellId> {
        &self.responded_cell_ids
    }

    /// Records an acknowledgement from a participant. Duplicates are fine.
    pub fn insert_responded(&mut self, cell_id: CellId) {
        self.responded_cell_ids.insert(cell_id);
    }

    /// Whether every participant acknowledged the current transient state.
    pub fn all_participants_responded(&self) -> bool {
        self.responded_cell_ids.len() == self.participant_cell_ids.len()
    }

    pub fn response(&mut self) -> &mut ResponseSlot {
        &mut self.response
    }

    pub fn response_is_set(&self) -> bool {
        self.response.is_set()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit_with_participants(participants: Vec<CellId>) -> Commit {
        Commit::new(
            TxId::from_raw(1),
            None,
            participants,
            CommitOptions {
                distributed: true,
                generate_prepare_timestamp: true,
                inherit_commit_timestamp: false,
                coordinator_commit_mode: CoordinatorCommitMode::Eager,
            },
            "u",
        )
    }

    #[test]
    fn state_order_follows_protocol() {
        assert!(CommitState::Start < CommitState::Prepare);
        assert!(CommitState::Prepare < CommitState::GeneratingCommitTimestamps);
        assert!(CommitState::GeneratingCommitTimestamps < CommitState::Commit);
        assert!(CommitState::Commit < CommitState::Aborting);
        assert!(CommitState::Abort < CommitState::Finishing);
    }

    #[test]
    fn transient_transition_clears_responded() {
        let p1 = CellId::from_raw(10);
        let p2 = CellId::from_raw(20);
        let mut commit = commit_with_participants(vec![p1, p2]);

        commit.set_transient_state(CommitState::Prepare);
        commit.insert_responded(p1);
        commit.insert_responded(p1);
        assert_eq!(commit.responded_cell_ids().len(), 1);
        assert!(!commit.all_participants_responded());

        commit.insert_responded(p2);
        assert!(commit.all_participants_responded());

        commit.set_transient_state(CommitState::GeneratingCommitTimestamps);
        assert!(commit.responded_cell_ids().is_empty());
    }

    #[test]
    fn empty_participant_set_counts_as_responded() {
        let commit = commit_with_participants(Vec::new());
        assert!(commit.all_participants_responded());
    }
}
