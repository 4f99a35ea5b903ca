//! Replicated-log mutation types.
//!
//! Every supervisor state transition that must survive failover is recorded
//! as one of these mutations, proposed through the consensus layer and
//! applied deterministically on every replica. The postcard encoding of
//! these structs is part of on-disk compatibility: variant order and field
//! order are the wire format and must not change across revisions.

use meridian_types::{CellId, MutationId, Timestamp, TimestampMap, TxId};
use serde::{Deserialize, Serialize};

use crate::commit::CoordinatorCommitMode;
use crate::error::TxError;

/// Commits a single-cell transaction with already generated timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorCommitSimpleTransaction {
    pub transaction_id: TxId,
    pub mutation_id: Option<MutationId>,
    pub commit_timestamps: TimestampMap,
    pub user: String,
}

/// Promotes a distributed commit to the persistent map and prepares it at
/// the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorCommitDistributedTransactionPhaseOne {
    pub transaction_id: TxId,
    pub mutation_id: Option<MutationId>,
    pub participant_cell_ids: Vec<CellId>,
    pub generate_prepare_timestamp: bool,
    pub inherit_commit_timestamp: bool,
    pub coordinator_commit_mode: CoordinatorCommitMode,
    pub prepare_timestamp: Timestamp,
    pub user: String,
}

/// Records the generated commit timestamps and moves a prepared distributed
/// commit to the commit state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorCommitDistributedTransactionPhaseTwo {
    pub transaction_id: TxId,
    pub commit_timestamps: TimestampMap,
}

/// Aborts a prepared distributed commit, carrying the cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorAbortDistributedTransactionPhaseTwo {
    pub transaction_id: TxId,
    pub error: TxError,
}

/// Aborts a transaction at the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorAbortTransaction {
    pub transaction_id: TxId,
    pub mutation_id: Option<MutationId>,
    pub force: bool,
}

/// Drops a finished distributed commit from the persistent map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorFinishDistributedTransaction {
    pub transaction_id: TxId,
}

/// Participant-side prepare, proposed on behalf of a peer coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantPrepareTransaction {
    pub transaction_id: TxId,
    pub prepare_timestamp: Timestamp,
    pub user: String,
}

/// Participant-side commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantCommitTransaction {
    pub transaction_id: TxId,
    pub commit_timestamp: Timestamp,
    pub user: String,
}

/// Participant-side abort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantAbortTransaction {
    pub transaction_id: TxId,
    pub user: String,
}

/// The supervisor's replicated-log message set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    CoordinatorCommitSimpleTransaction(CoordinatorCommitSimpleTransaction),
    CoordinatorCommitDistributedTransactionPhaseOne(CoordinatorCommitDistributedTransactionPhaseOne),
    CoordinatorCommitDistributedTransactionPhaseTwo(CoordinatorCommitDistributedTransactionPhaseTwo),
    CoordinatorAbortDistributedTransactionPhaseTwo(CoordinatorAbortDistributedTransactionPhaseTwo),
    CoordinatorAbortTransaction(CoordinatorAbortTransaction),
    CoordinatorFinishDistributedTransaction(CoordinatorFinishDistributedTransaction),
    ParticipantPrepareTransaction(ParticipantPrepareTransaction),
    ParticipantCommitTransaction(ParticipantCommitTransaction),
    ParticipantAbortTransaction(ParticipantAbortTransaction),
}

impl Mutation {
    pub fn transaction_id(&self) -> TxId {
        match self {
            Mutation::CoordinatorCommitSimpleTransaction(m) => m.transaction_id,
            Mutation::CoordinatorCommitDistributedTransactionPhaseOne(m) => m.transaction_id,
            Mutation::CoordinatorCommitDistributedTransactionPhaseTwo(m) => m.transaction_id,
            Mutation::CoordinatorAbortDistributedTransactionPhaseTwo(m) => m.transaction_id,
            Mutation::CoordinatorAbortTransaction(m) => m.transaction_id,
            Mutation::CoordinatorFinishDistributedTransaction(m) => m.transaction_id,
            Mutation::ParticipantPrepareTransaction(m) => m.transaction_id,
            Mutation::ParticipantCommitTransaction(m) => m.transaction_id,
            Mutation::ParticipantAbortTransaction(m) => m.transaction_id,
        }
    }

    /// Canonical log-record encoding.
    pub fn encode(&self) -> Vec<u8> {
        postcard::to_allocvec(self).expect("mutations always serialize")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}
