//! # meridian-supervisor: Distributed transaction supervisor
//!
//! This crate implements the transaction-coordination plane of a Meridian
//! cluster: atomic commit and abort of transactions spanning multiple
//! consensus-replicated cells. Each cell runs one
//! [`TransactionSupervisor`]; the instance receiving a client's commit
//! request coordinates it, any cell named in the request participates.
//!
//! Atomicity across participants comes from a two-phase commit protocol
//! whose own state transitions are recorded through the local consensus
//! log ([`mutation`]), so a newly elected leader resumes every in-flight
//! distributed commit from the replicated state ([`snapshot`]).
//!
//! The supervisor is a deterministic state machine: entry points return
//! [`SupervisorOutput`] batches of effects for the hosting shell to
//! execute, and asynchronous completions are fed back in as events. See
//! [`supervisor`] for the full contract.

pub mod abort;
pub mod commit;
pub mod config;
pub mod error;
pub mod mutation;
pub mod participant;
pub mod registry;
pub mod response;
pub mod response_keeper;
pub mod rpc;
pub mod snapshot;
pub mod supervisor;
pub mod timestamps;
pub mod traits;

pub use commit::{CommitState, CoordinatorCommitMode};
pub use config::SupervisorConfig;
pub use error::{ErrorCode, TxError};
pub use mutation::Mutation;
pub use participant::ParticipantCall;
pub use response::frame_to_result;
pub use rpc::RequestId;
pub use snapshot::{CURRENT_SNAPSHOT_VERSION, validate_snapshot_version};
pub use supervisor::{
    ApplyContext, ApplyOutcome, ParticipantCompletion, ParticipantRequest, Proposal, Reply,
    SupervisorOutput, TimestampRequest, TransactionSupervisor,
};
pub use timestamps::{TimestampPlan, TimestampSource, resolve_plan};
pub use traits::{
    ParticipantChannelState, ParticipantDirectory, TimestampProvider, TransactionManager,
};
