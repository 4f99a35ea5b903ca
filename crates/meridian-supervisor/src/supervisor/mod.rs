//! The transaction supervisor state machine.
//!
//! The supervisor coordinates atomic commit and abort of transactions
//! spanning consensus-replicated cells. It is written as a deterministic
//! state machine: every entry point mutates in-memory state and returns a
//! [`SupervisorOutput`] batch of effects (mutations to propose through the
//! consensus layer, replies to deliver, participant RPCs to send, timestamp
//! generation to dispatch, availability probes to run). The hosting shell
//! executes the effects and feeds completions back in:
//!
//! - committed mutations re-enter through [`TransactionSupervisor::apply`],
//!   on every replica, in log order;
//! - participant RPC results re-enter through `on_participant_response`
//!   (including the `participant_completions` the supervisor emits for
//!   requests that complete without touching the wire);
//! - timestamp generation results re-enter through
//!   `on_commit_timestamps_generated`;
//! - the probation and cleanup timers tick through `on_probation_tick` and
//!   `on_participant_cleanup_tick`.
//!
//! All entry points run on one logical automaton thread; only the wrapped
//! participants carry their own locks.

mod coordinator;
mod participant_ops;

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use meridian_types::{CellId, ROOT_USER, TxId};

use crate::abort::Abort;
use crate::commit::{Commit, CommitState, CoordinatorCommitMode};
use crate::config::SupervisorConfig;
use crate::error::TxError;
use crate::mutation::{
    Mutation, ParticipantAbortTransaction, ParticipantCommitTransaction,
    ParticipantPrepareTransaction,
};
use crate::participant::{ParticipantCall, ProbationAction, QueuedSend, SendContext, SendOutcome};
use crate::registry::ParticipantRegistry;
use crate::response::{empty_success_frame, error_frame};
use crate::response_keeper::{ResponseKeeper, ResponseKeeperConfig};
use crate::rpc::{
    AbortTransactionRequest, CommitTransactionRequest, GetDownedParticipantsRequest,
    ParticipantAbortRequest, ParticipantCommitRequest, ParticipantPrepareRequest,
    PingTransactionRequest, RequestId,
};
use crate::timestamps::TimestampPlan;
use crate::traits::{
    ParticipantChannelState, ParticipantDirectory, TimestampProvider, TransactionManager,
};

// ============================================================================
// Outputs
// ============================================================================

/// A mutation to propose through the consensus layer.
///
/// `reply_to`, when set, asks the shell to answer that request from the
/// mutation's application result once it commits.
#[derive(Debug)]
pub struct Proposal {
    pub mutation: Mutation,
    pub reply_to: Option<RequestId>,
}

/// A serialized reply to deliver to a waiting request.
#[derive(Debug)]
pub struct Reply {
    pub request_id: RequestId,
    pub frame: Bytes,
}

/// A participant RPC to send. The shell reports the outcome through
/// `on_participant_response`, echoing `cell_id`, the call's transaction and
/// `state` back.
#[derive(Debug)]
pub struct ParticipantRequest {
    pub cell_id: CellId,
    pub state: CommitState,
    pub call: ParticipantCall,
}

/// A participant request that completed without touching the wire. The
/// shell must feed it back through `on_participant_response` like any other
/// result.
#[derive(Debug)]
pub struct ParticipantCompletion {
    pub cell_id: CellId,
    pub transaction_id: TxId,
    pub state: CommitState,
    pub result: Result<(), TxError>,
}

/// Commit-timestamp generation to dispatch. The shell resolves every plan
/// entry in parallel (one fresh timestamp per source, inherited entries
/// reusing the coordinator's value) and reports through
/// `on_commit_timestamps_generated`.
#[derive(Debug)]
pub struct TimestampRequest {
    pub transaction_id: TxId,
    pub plan: TimestampPlan,
}

/// Effects produced by one supervisor entry point.
///
/// The shell sends the participant requests, proposes the mutations,
/// delivers the replies, dispatches timestamp generation, probes the named
/// cells for availability, and feeds the completions back in.
#[derive(Debug, Default)]
pub struct SupervisorOutput {
    pub proposals: Vec<Proposal>,
    pub replies: Vec<Reply>,
    pub participant_requests: Vec<ParticipantRequest>,
    pub participant_completions: Vec<ParticipantCompletion>,
    pub timestamp_requests: Vec<TimestampRequest>,
    pub availability_probes: Vec<CellId>,
}

impl SupervisorOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty()
            && self.replies.is_empty()
            && self.participant_requests.is_empty()
            && self.participant_completions.is_empty()
            && self.timestamp_requests.is_empty()
            && self.availability_probes.is_empty()
    }

    pub fn merge(&mut self, other: SupervisorOutput) {
        self.proposals.extend(other.proposals);
        self.replies.extend(other.replies);
        self.participant_requests.extend(other.participant_requests);
        self.participant_completions.extend(other.participant_completions);
        self.timestamp_requests.extend(other.timestamp_requests);
        self.availability_probes.extend(other.availability_probes);
    }

    fn reply(request_id: RequestId, frame: Bytes) -> Self {
        let mut output = Self::empty();
        output.replies.push(Reply { request_id, frame });
        output
    }

    fn propose(mutation: Mutation, reply_to: Option<RequestId>) -> Self {
        let mut output = Self::empty();
        output.proposals.push(Proposal { mutation, reply_to });
        output
    }
}

// ============================================================================
// Mutation application context
// ============================================================================

/// Context the consensus layer supplies when applying a mutation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyContext {
    /// True while replaying the log during recovery; demotes logging.
    pub recovery: bool,
}

/// Result of applying one mutation.
///
/// `result` is the mutation's own outcome: participant-side operations
/// surface local transaction-manager failures here so the consensus layer
/// reports them to the peer coordinator.
#[derive(Debug)]
pub struct ApplyOutcome {
    pub output: SupervisorOutput,
    pub result: Result<(), TxError>,
}

impl ApplyOutcome {
    fn ok(output: SupervisorOutput) -> Self {
        Self {
            output,
            result: Ok(()),
        }
    }

    fn err(output: SupervisorOutput, error: TxError) -> Self {
        Self {
            output,
            result: Err(error),
        }
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// One cell's transaction supervisor.
pub struct TransactionSupervisor {
    config: SupervisorConfig,
    self_cell_id: CellId,
    transaction_manager: Box<dyn TransactionManager>,
    timestamp_provider: Box<dyn TimestampProvider>,
    directory: Box<dyn ParticipantDirectory>,

    transient_commits: HashMap<TxId, Commit>,
    // Ordered so snapshots list commits in key order on every replica.
    persistent_commits: BTreeMap<TxId, Commit>,
    transient_aborts: HashMap<TxId, Abort>,

    registry: ParticipantRegistry,
    response_keeper: ResponseKeeper,
    pub(crate) snapshot_keys: Vec<TxId>,

    decommissioned: bool,
    leading: bool,
}

impl TransactionSupervisor {
    pub fn new(
        config: SupervisorConfig,
        self_cell_id: CellId,
        transaction_manager: Box<dyn TransactionManager>,
        timestamp_provider: Box<dyn TimestampProvider>,
        directory: Box<dyn ParticipantDirectory>,
    ) -> Self {
        Self {
            config,
            self_cell_id,
            transaction_manager,
            timestamp_provider,
            directory,
            transient_commits: HashMap::new(),
            persistent_commits: BTreeMap::new(),
            transient_aborts: HashMap::new(),
            registry: ParticipantRegistry::new(),
            response_keeper: ResponseKeeper::new(ResponseKeeperConfig::default()),
            snapshot_keys: Vec::new(),
            decommissioned: false,
            leading: false,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn self_cell_id(&self) -> CellId {
        self.self_cell_id
    }

    pub fn is_leading(&self) -> bool {
        self.leading
    }

    // ========================================================================
    // Client-facing service
    // ========================================================================

    /// `CommitTransaction` RPC entry.
    pub fn handle_commit_transaction(
        &mut self,
        request_id: RequestId,
        request: CommitTransactionRequest,
    ) -> SupervisorOutput {
        tracing::debug!(
            tx = %request.transaction_id,
            participants = request.participant_cell_ids.len(),
            force_2pc = request.force_2pc,
            user = %request.user,
            "commit transaction requested"
        );

        if !self.leading {
            return SupervisorOutput::reply(request_id, error_frame(&self.not_leading_error()));
        }
        if let Some(frame) = self.response_keeper.try_reply(request.mutation_id) {
            return SupervisorOutput::reply(request_id, frame);
        }
        self.coordinator_commit_transaction(request_id, request)
    }

    /// `AbortTransaction` RPC entry.
    pub fn handle_abort_transaction(
        &mut self,
        request_id: RequestId,
        request: AbortTransactionRequest,
    ) -> SupervisorOutput {
        tracing::debug!(
            tx = %request.transaction_id,
            force = request.force,
            user = %request.user,
            "abort transaction requested"
        );

        if !self.leading {
            return SupervisorOutput::reply(request_id, error_frame(&self.not_leading_error()));
        }
        if let Some(frame) = self.response_keeper.try_reply(request.mutation_id) {
            return SupervisorOutput::reply(request_id, frame);
        }
        self.coordinator_abort_transaction(
            Some(request_id),
            request.transaction_id,
            request.mutation_id,
            request.force,
            &request.user,
        )
    }

    /// `PingTransaction` RPC entry. Served from the tracker path, without a
    /// leadership requirement, so ping bursts stay clear of commit
    /// processing.
    pub fn handle_ping_transaction(
        &mut self,
        request_id: RequestId,
        request: PingTransactionRequest,
    ) -> SupervisorOutput {
        let frame = match self
            .transaction_manager
            .ping_transaction(request.transaction_id, request.ping_ancestors)
        {
            Ok(()) => empty_success_frame(),
            Err(error) => error_frame(&error),
        };
        SupervisorOutput::reply(request_id, frame)
    }

    /// `GetDownedParticipants` RPC entry.
    pub fn handle_get_downed_participants(
        &mut self,
        request_id: RequestId,
        request: GetDownedParticipantsRequest,
    ) -> SupervisorOutput {
        let downed = self
            .registry
            .downed_participants(&request.cell_ids, self.self_cell_id);
        tracing::debug!(
            queried = request.cell_ids.len(),
            downed = downed.len(),
            "downed participants queried"
        );
        SupervisorOutput::reply(
            request_id,
            crate::response::encode_frame(&crate::response::ResponseBody::CellIds(downed)),
        )
    }

    /// Commits a transaction on behalf of an in-process caller with the
    /// default options. The outcome arrives as a reply to `request_id`;
    /// [`frame_to_result`](crate::response::frame_to_result) collapses it.
    pub fn commit_transaction(
        &mut self,
        request_id: RequestId,
        transaction_id: TxId,
        user: &str,
        participant_cell_ids: Vec<CellId>,
    ) -> SupervisorOutput {
        self.coordinator_commit_transaction(
            request_id,
            CommitTransactionRequest {
                transaction_id,
                participant_cell_ids,
                force_2pc: false,
                generate_prepare_timestamp: true,
                inherit_commit_timestamp: false,
                coordinator_commit_mode: CoordinatorCommitMode::Eager,
                mutation_id: None,
                user: user.to_owned(),
            },
        )
    }

    /// Aborts a transaction on behalf of an in-process caller.
    pub fn abort_transaction(
        &mut self,
        request_id: RequestId,
        transaction_id: TxId,
        force: bool,
    ) -> SupervisorOutput {
        self.coordinator_abort_transaction(
            Some(request_id),
            transaction_id,
            None,
            force,
            ROOT_USER,
        )
    }

    // ========================================================================
    // Peer-facing service
    // ========================================================================

    /// `PrepareTransaction` from a peer coordinator.
    pub fn handle_participant_prepare(
        &mut self,
        request_id: RequestId,
        request: ParticipantPrepareRequest,
    ) -> SupervisorOutput {
        if !self.leading {
            return SupervisorOutput::reply(request_id, error_frame(&self.not_leading_error()));
        }
        SupervisorOutput::propose(
            Mutation::ParticipantPrepareTransaction(ParticipantPrepareTransaction {
                transaction_id: request.transaction_id,
                prepare_timestamp: request.prepare_timestamp,
                user: request.user,
            }),
            Some(request_id),
        )
    }

    /// `CommitTransaction` from a peer coordinator.
    pub fn handle_participant_commit(
        &mut self,
        request_id: RequestId,
        request: ParticipantCommitRequest,
    ) -> SupervisorOutput {
        if !self.leading {
            return SupervisorOutput::reply(request_id, error_frame(&self.not_leading_error()));
        }
        SupervisorOutput::propose(
            Mutation::ParticipantCommitTransaction(ParticipantCommitTransaction {
                transaction_id: request.transaction_id,
                commit_timestamp: request.commit_timestamp,
                user: request.user,
            }),
            Some(request_id),
        )
    }

    /// `AbortTransaction` from a peer coordinator.
    pub fn handle_participant_abort(
        &mut self,
        request_id: RequestId,
        request: ParticipantAbortRequest,
    ) -> SupervisorOutput {
        if !self.leading {
            return SupervisorOutput::reply(request_id, error_frame(&self.not_leading_error()));
        }
        SupervisorOutput::propose(
            Mutation::ParticipantAbortTransaction(ParticipantAbortTransaction {
                transaction_id: request.transaction_id,
                user: request.user,
            }),
            Some(request_id),
        )
    }

    // ========================================================================
    // Mutation application
    // ========================================================================

    /// Applies a committed mutation. Runs on every replica, in log order.
    pub fn apply(&mut self, mutation: &Mutation, ctx: &ApplyContext) -> ApplyOutcome {
        match mutation {
            Mutation::CoordinatorCommitSimpleTransaction(m) => {
                ApplyOutcome::ok(self.apply_commit_simple_transaction(m, ctx))
            }
            Mutation::CoordinatorCommitDistributedTransactionPhaseOne(m) => {
                self.apply_commit_distributed_phase_one(m, ctx)
            }
            Mutation::CoordinatorCommitDistributedTransactionPhaseTwo(m) => {
                ApplyOutcome::ok(self.apply_commit_distributed_phase_two(m, ctx))
            }
            Mutation::CoordinatorAbortDistributedTransactionPhaseTwo(m) => {
                ApplyOutcome::ok(self.apply_abort_distributed_phase_two(m, ctx))
            }
            Mutation::CoordinatorAbortTransaction(m) => {
                ApplyOutcome::ok(self.apply_coordinator_abort_transaction(m, ctx))
            }
            Mutation::CoordinatorFinishDistributedTransaction(m) => {
                ApplyOutcome::ok(self.apply_finish_distributed_transaction(m, ctx))
            }
            Mutation::ParticipantPrepareTransaction(m) => self.apply_participant_prepare(m, ctx),
            Mutation::ParticipantCommitTransaction(m) => self.apply_participant_commit(m, ctx),
            Mutation::ParticipantAbortTransaction(m) => self.apply_participant_abort(m, ctx),
        }
    }

    // ========================================================================
    // Asynchronous completions
    // ========================================================================

    /// Result of a participant request, from the wire or from a
    /// `participant_completions` output.
    pub fn on_participant_response(
        &mut self,
        cell_id: CellId,
        transaction_id: TxId,
        state: CommitState,
        result: Result<(), TxError>,
    ) -> SupervisorOutput {
        let mut output = SupervisorOutput::empty();

        // The peer answered iff the failure is not a transport-level one.
        if let Some(participant) = self.registry.find(cell_id) {
            let answered = match &result {
                Ok(()) => true,
                Err(error) => !error.is_retriable(),
            };
            if answered {
                let drained = participant.set_up();
                for send in drained {
                    output.merge(self.run_participant_send(cell_id, send));
                }
            } else if let Err(error) = &result {
                participant.set_down(error);
            }
        }

        let Some(commit) = self.persistent_commits.get_mut(&transaction_id) else {
            tracing::debug!(
                tx = %transaction_id,
                participant = %cell_id,
                "participant response for a non-existing commit; ignored"
            );
            return output;
        };
        if commit.transient_state() != state {
            tracing::debug!(
                tx = %transaction_id,
                participant = %cell_id,
                expected = %state,
                actual = %commit.transient_state(),
                "participant response for a commit in wrong state; ignored"
            );
            return output;
        }

        let success = match &result {
            Ok(()) => true,
            Err(error) => {
                let forgotten = error.find_code(crate::error::ErrorCode::NoSuchTransaction)
                    && state != CommitState::Prepare;
                if forgotten {
                    tracing::debug!(
                        tx = %transaction_id,
                        participant = %cell_id,
                        state = %state,
                        "transaction is missing at participant; still considered a success"
                    );
                }
                forgotten
            }
        };

        if success {
            tracing::debug!(
                tx = %transaction_id,
                participant = %cell_id,
                state = %state,
                "coordinator observes participant success"
            );
            // Duplicates are fine.
            commit.insert_responded(cell_id);
            output.merge(self.check_all_participants_responded(transaction_id));
            return output;
        }

        let Err(error) = result else {
            return output;
        };
        match state {
            CommitState::Prepare => {
                tracing::debug!(
                    tx = %transaction_id,
                    participant = %cell_id,
                    error = %error,
                    "coordinator observes participant failure; will abort"
                );
                let wrapped = TxError::new(
                    crate::error::ErrorCode::PrepareFailed,
                    format!("participant cell {cell_id} has failed to prepare"),
                )
                .caused_by(error);
                output.merge(self.change_commit_transient_state(
                    transaction_id,
                    CommitState::Aborting,
                    Some(wrapped),
                ));
            }
            CommitState::Commit | CommitState::Abort => {
                tracing::debug!(
                    tx = %transaction_id,
                    participant = %cell_id,
                    error = %error,
                    "coordinator observes participant failure; will retry"
                );
                output.merge(self.send_participant_request(transaction_id, cell_id));
            }
            _ => {
                tracing::debug!(
                    tx = %transaction_id,
                    participant = %cell_id,
                    state = %state,
                    error = %error,
                    "coordinator observes participant failure; ignored"
                );
            }
        }
        output
    }

    /// Result of an availability probe.
    pub fn on_availability_checked(
        &mut self,
        cell_id: CellId,
        result: Result<(), TxError>,
    ) -> SupervisorOutput {
        let mut output = SupervisorOutput::empty();
        let Some(participant) = self.registry.find(cell_id) else {
            return output;
        };
        match result {
            Ok(()) => {
                let drained = participant.set_up();
                for send in drained {
                    output.merge(self.run_participant_send(cell_id, send));
                }
            }
            Err(error) => {
                tracing::debug!(
                    participant = %cell_id,
                    error = %error,
                    "participant availability check failed"
                );
            }
        }
        output
    }

    /// Probation timer tick: every downed participant either drains one
    /// queued request or gets an availability probe.
    pub fn on_probation_tick(&mut self) -> SupervisorOutput {
        let mut output = SupervisorOutput::empty();
        for participant in self.registry.participants() {
            match participant.probation_step() {
                None => {}
                Some(ProbationAction::RunOne(send)) => {
                    output.merge(self.run_participant_send(participant.cell_id(), send));
                }
                Some(ProbationAction::Probe) => {
                    match participant.state(self.directory.as_ref()) {
                        ParticipantChannelState::Valid => {
                            output.availability_probes.push(participant.cell_id());
                        }
                        state => {
                            tracing::debug!(
                                participant = %participant.cell_id(),
                                state = ?state,
                                "skipping availability probe"
                            );
                        }
                    }
                }
            }
        }
        output
    }

    /// Cleanup timer tick: reap invalidated participant wrappers.
    pub fn on_participant_cleanup_tick(&mut self) {
        self.registry.cleanup(self.directory.as_ref());
    }

    // ========================================================================
    // Decommission gate
    // ========================================================================

    /// Stops accepting new distributed commits; in-flight persistent
    /// commits drain normally.
    pub fn decommission(&mut self) {
        tracing::debug!("decommissioning transaction supervisor");
        self.decommissioned = true;
    }

    /// True once decommissioned and fully drained.
    pub fn is_decommissioned(&self) -> bool {
        self.decommissioned && self.persistent_commits.is_empty()
    }

    pub(crate) fn decommissioned_flag(&self) -> bool {
        self.decommissioned
    }

    pub(crate) fn set_decommissioned_flag(&mut self, decommissioned: bool) {
        self.decommissioned = decommissioned;
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// This replica became the leader: rebuild transient coordination state
    /// from the persistent commits, re-firing their entry actions.
    pub fn on_leader_active(&mut self) -> SupervisorOutput {
        debug_assert!(self.transient_commits.is_empty());
        self.leading = true;

        let mut output = SupervisorOutput::empty();
        let replayed: Vec<(TxId, CommitState)> = self
            .persistent_commits
            .iter()
            .map(|(tx, commit)| (*tx, commit.persistent_state()))
            .collect();
        for (transaction_id, state) in replayed {
            output.merge(self.change_commit_transient_state(transaction_id, state, None));
        }
        output
    }

    /// This replica stopped leading: resolve every outstanding transient
    /// promise, drop transient coordination state and all participant
    /// wrappers. Persistent commits survive and are replayed by the next
    /// leader.
    pub fn on_stop_leading(&mut self) -> SupervisorOutput {
        self.leading = false;

        let mut output = SupervisorOutput::empty();
        let error = TxError::unavailable("cell has stopped leading");

        let transient: Vec<TxId> = self.transient_commits.keys().copied().collect();
        for transaction_id in transient {
            output.merge(self.set_commit_failed(transaction_id, &error));
        }
        self.transient_commits.clear();

        let aborts: Vec<TxId> = self.transient_aborts.keys().copied().collect();
        for transaction_id in aborts {
            output.merge(self.set_abort_failed(transaction_id, &error));
        }
        self.transient_aborts.clear();

        for commit in self.persistent_commits.values_mut() {
            commit.response().drop_waiters();
        }

        self.registry.clear();
        // Reply caching is scoped to a leadership epoch; a stale transient
        // failure must not answer a retry addressed to a later epoch.
        self.response_keeper.clear();
        output
    }

    /// Drops all in-memory state, ahead of a snapshot load.
    pub fn clear(&mut self) {
        self.persistent_commits.clear();
        self.transient_commits.clear();
        self.transient_aborts.clear();
        self.response_keeper.clear();
        self.snapshot_keys.clear();
    }

    // ========================================================================
    // Entity plumbing
    // ========================================================================

    pub(crate) fn find_commit(&self, transaction_id: TxId) -> Option<&Commit> {
        self.transient_commits
            .get(&transaction_id)
            .or_else(|| self.persistent_commits.get(&transaction_id))
    }

    pub(crate) fn find_commit_mut(&mut self, transaction_id: TxId) -> Option<&mut Commit> {
        if self.transient_commits.contains_key(&transaction_id) {
            self.transient_commits.get_mut(&transaction_id)
        } else {
            self.persistent_commits.get_mut(&transaction_id)
        }
    }

    pub(crate) fn persistent_commit_count(&self) -> usize {
        self.persistent_commits.len()
    }

    pub(crate) fn persistent_commits(&self) -> impl Iterator<Item = &Commit> {
        self.persistent_commits.values()
    }

    pub(crate) fn persistent_commit_mut(&mut self, transaction_id: TxId) -> Option<&mut Commit> {
        self.persistent_commits.get_mut(&transaction_id)
    }

    pub(crate) fn insert_transient_commit(&mut self, commit: Commit) {
        debug_assert!(!commit.persistent());
        self.transient_commits.insert(commit.transaction_id(), commit);
    }

    pub(crate) fn take_transient_commit(&mut self, transaction_id: TxId) -> Option<Commit> {
        self.transient_commits.remove(&transaction_id)
    }

    pub(crate) fn insert_persistent_commit(&mut self, commit: Commit) {
        debug_assert!(commit.persistent());
        self.persistent_commits.insert(commit.transaction_id(), commit);
    }

    pub(crate) fn remove_transient_commit(&mut self, transaction_id: TxId) {
        if let Some(commit) = self.transient_commits.remove(&transaction_id) {
            debug_assert!(!commit.persistent());
        }
    }

    pub(crate) fn remove_persistent_commit(&mut self, transaction_id: TxId) {
        if let Some(commit) = self.persistent_commits.remove(&transaction_id) {
            debug_assert!(commit.persistent());
        }
    }

    /// Resolves a commit's response with a failure frame.
    pub(crate) fn set_commit_failed(
        &mut self,
        transaction_id: TxId,
        error: &TxError,
    ) -> SupervisorOutput {
        tracing::debug!(tx = %transaction_id, error = %error, "transaction commit failed");
        self.set_commit_response(transaction_id, error_frame(error))
    }

    /// Resolves a commit's response with its timestamps.
    pub(crate) fn set_commit_succeeded(&mut self, transaction_id: TxId) -> SupervisorOutput {
        let Some(commit) = self.find_commit(transaction_id) else {
            return SupervisorOutput::empty();
        };
        tracing::debug!(
            tx = %transaction_id,
            commit_timestamps = %commit.commit_timestamps(),
            "transaction commit succeeded"
        );
        let frame = crate::response::commit_success_frame(commit.commit_timestamps());
        self.set_commit_response(transaction_id, frame)
    }

    fn set_commit_response(&mut self, transaction_id: TxId, frame: Bytes) -> SupervisorOutput {
        let mut output = SupervisorOutput::empty();
        let Some(commit) = self.find_commit_mut(transaction_id) else {
            return output;
        };
        let mutation_id = commit.mutation_id();
        let waiters = commit.response().set(frame.clone());
        if let Some(mutation_id) = mutation_id {
            self.response_keeper.end_request(mutation_id, frame.clone());
        }
        for request_id in waiters {
            output.replies.push(Reply {
                request_id,
                frame: frame.clone(),
            });
        }
        output
    }

    pub(crate) fn set_abort_failed(
        &mut self,
        transaction_id: TxId,
        error: &TxError,
    ) -> SupervisorOutput {
        tracing::debug!(tx = %transaction_id, error = %error, "transaction abort failed");
        self.set_abort_response(transaction_id, error_frame(error))
    }

    pub(crate) fn set_abort_succeeded(&mut self, transaction_id: TxId) -> SupervisorOutput {
        tracing::debug!(tx = %transaction_id, "transaction abort succeeded");
        self.set_abort_response(transaction_id, empty_success_frame())
    }

    fn set_abort_response(&mut self, transaction_id: TxId, frame: Bytes) -> SupervisorOutput {
        let mut output = SupervisorOutput::empty();
        let Some(abort) = self.transient_aborts.get_mut(&transaction_id) else {
            return output;
        };
        let mutation_id = abort.mutation_id();
        let waiters = abort.response().set(frame.clone());
        if let Some(mutation_id) = mutation_id {
            self.response_keeper.end_request(mutation_id, frame.clone());
        }
        for request_id in waiters {
            output.replies.push(Reply {
                request_id,
                frame: frame.clone(),
            });
        }
        output
    }

    pub(crate) fn transient_abort_mut(&mut self, transaction_id: TxId) -> Option<&mut Abort> {
        self.transient_aborts.get_mut(&transaction_id)
    }

    pub(crate) fn insert_transient_abort(&mut self, abort: Abort) {
        self.transient_aborts.insert(abort.transaction_id(), abort);
    }

    pub(crate) fn remove_abort(&mut self, transaction_id: TxId) {
        self.transient_aborts.remove(&transaction_id);
    }

    // ========================================================================
    // Participant plumbing
    // ========================================================================

    /// Materializes a queued or immediate send and routes its outcome.
    fn run_participant_send(&mut self, cell_id: CellId, send: QueuedSend) -> SupervisorOutput {
        let Some(participant) = self.registry.find(cell_id) else {
            return SupervisorOutput::empty();
        };
        let ctx = SendContext {
            directory: self.directory.as_ref(),
            coordinator_clock: self.timestamp_provider.as_ref(),
        };
        let outcome = participant.run_send(send, &ctx);
        self.route_send_outcome(cell_id, outcome)
    }

    pub(crate) fn route_send_outcome(
        &mut self,
        cell_id: CellId,
        outcome: SendOutcome,
    ) -> SupervisorOutput {
        let mut output = SupervisorOutput::empty();
        match outcome {
            SendOutcome::Dispatched { state, call } => {
                output.participant_requests.push(ParticipantRequest {
                    cell_id,
                    state,
                    call,
                });
            }
            SendOutcome::Completed {
                transaction_id,
                state,
                result,
            } => {
                output.participant_completions.push(ParticipantCompletion {
                    cell_id,
                    transaction_id,
                    state,
                    result,
                });
            }
            SendOutcome::Queued => {}
        }
        output
    }

    fn not_leading_error(&self) -> TxError {
        TxError::unavailable(format!("cell {} is not leading", self.self_cell_id))
    }
}

