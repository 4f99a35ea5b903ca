//! RPC surface types.
//!
//! The supervisor exposes two services: the client-facing transaction
//! supervisor service and the peer-facing transaction participant service.
//! The hosting RPC layer decodes requests into these structs, tags each
//! in-flight request with a [`RequestId`], and routes them to the matching
//! `handle_*` method on the supervisor; replies come back as
//! [`Reply`](crate::supervisor::Reply) outputs carrying the request's ID.

use meridian_types::{CellId, MutationId, Timestamp, TxId};
use serde::{Deserialize, Serialize};

/// Correlates an in-flight RPC with its eventual reply output. Assigned by
/// the hosting RPC layer; unique per live request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

// ============================================================================
// Transaction supervisor service (client-facing)
// ============================================================================

/// `CommitTransaction`: coordinate an atomic commit.
///
/// `mutation_id` and `user` come from the RPC envelope rather than the
/// request body: the mutation ID keys idempotent reply caching, the user is
/// the authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitTransactionRequest {
    pub transaction_id: TxId,
    pub participant_cell_ids: Vec<CellId>,
    pub force_2pc: bool,
    pub generate_prepare_timestamp: bool,
    pub inherit_commit_timestamp: bool,
    pub coordinator_commit_mode: crate::commit::CoordinatorCommitMode,
    pub mutation_id: Option<MutationId>,
    pub user: String,
}

/// `AbortTransaction`: abort a transaction, forcefully if asked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortTransactionRequest {
    pub transaction_id: TxId,
    pub force: bool,
    pub mutation_id: Option<MutationId>,
    pub user: String,
}

/// `PingTransaction`: extend a transaction's lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingTransactionRequest {
    pub transaction_id: TxId,
    pub ping_ancestors: bool,
}

/// `GetDownedParticipants`: report downed peers. An empty `cell_ids` asks
/// about all known participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetDownedParticipantsRequest {
    pub cell_ids: Vec<CellId>,
}

// ============================================================================
// Transaction participant service (peer-facing)
// ============================================================================

/// `PrepareTransaction` from a peer coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantPrepareRequest {
    pub transaction_id: TxId,
    pub prepare_timestamp: Timestamp,
    pub user: String,
}

/// `CommitTransaction` from a peer coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantCommitRequest {
    pub transaction_id: TxId,
    pub commit_timestamp: Timestamp,
    pub user: String,
}

/// `AbortTransaction` from a peer coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantAbortRequest {
    pub transaction_id: TxId,
    pub user: String,
}
