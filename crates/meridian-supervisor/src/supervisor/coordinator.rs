//! Coordinator-side protocol: entry points, mutation handlers and the
//! transient state machine.
//!
//! A commit moves through `Start → Prepare → GeneratingCommitTimestamps →
//! Commit → Finishing` (or aborts via `Aborting → Abort → Finishing`).
//! Persistent state advances only through replicated mutations; transient
//! state advances on the leader as participant acknowledgements arrive,
//! firing the next phase's side effects on entry.

use meridian_types::{Timestamp, TxId, ROOT_USER};

use crate::commit::{Commit, CommitOptions, CommitState, CoordinatorCommitMode};
use crate::error::{ErrorCode, TxError};
use crate::mutation::{
    CoordinatorAbortDistributedTransactionPhaseTwo, CoordinatorAbortTransaction,
    CoordinatorCommitDistributedTransactionPhaseOne,
    CoordinatorCommitDistributedTransactionPhaseTwo, CoordinatorCommitSimpleTransaction,
    CoordinatorFinishDistributedTransaction, Mutation,
};
use crate::participant::{CallTemplate, QueuedSend, SendContext};
use crate::rpc::{CommitTransactionRequest, RequestId};
use crate::timestamps::build_timestamp_plan;

use super::{ApplyContext, ApplyOutcome, Reply, SupervisorOutput, TimestampRequest, TransactionSupervisor};

impl TransactionSupervisor {
    // ========================================================================
    // Entry points (leader, outside mutation context)
    // ========================================================================

    pub(crate) fn coordinator_commit_transaction(
        &mut self,
        request_id: RequestId,
        request: CommitTransactionRequest,
    ) -> SupervisorOutput {
        let transaction_id = request.transaction_id;
        let mut output = SupervisorOutput::empty();

        // A live entity means a duplicate submission; not even the response
        // keeper covers this window.
        if let Some(commit) = self.find_commit_mut(transaction_id) {
            if let Some(frame) = commit.response().subscribe(request_id) {
                output.replies.push(Reply { request_id, frame });
            }
            return output;
        }

        let options = CommitOptions {
            distributed: request.force_2pc || !request.participant_cell_ids.is_empty(),
            generate_prepare_timestamp: request.generate_prepare_timestamp,
            inherit_commit_timestamp: request.inherit_commit_timestamp,
            coordinator_commit_mode: request.coordinator_commit_mode,
        };
        let distributed = options.distributed;
        let mut commit = Commit::new(
            transaction_id,
            request.mutation_id,
            request.participant_cell_ids,
            options,
            request.user,
        );
        let subscribed = commit.response().subscribe(request_id);
        debug_assert!(subscribed.is_none());
        self.insert_transient_commit(commit);

        if distributed {
            output.merge(self.commit_distributed_transaction(transaction_id));
        } else {
            output.merge(self.commit_simple_transaction(transaction_id));
        }
        output
    }

    fn commit_simple_transaction(&mut self, transaction_id: TxId) -> SupervisorOutput {
        let mut output = SupervisorOutput::empty();

        let prepare_timestamp = self.timestamp_provider.latest_timestamp();
        if let Err(error) =
            self.transaction_manager
                .prepare_transaction_commit(transaction_id, false, prepare_timestamp)
        {
            tracing::debug!(
                tx = %transaction_id,
                error = %error,
                "error preparing simple transaction commit"
            );
            output.merge(self.set_commit_failed(transaction_id, &error));
            self.remove_transient_commit(transaction_id);
            // Best effort, fire and forget.
            output.merge(self.coordinator_abort_transaction(
                None,
                transaction_id,
                None,
                true,
                ROOT_USER,
            ));
            return output;
        }

        output.merge(self.generate_commit_timestamps(transaction_id));
        output
    }

    fn commit_distributed_transaction(&mut self, transaction_id: TxId) -> SupervisorOutput {
        let Some(commit) = self.find_commit(transaction_id) else {
            return SupervisorOutput::empty();
        };
        debug_assert!(!commit.persistent());

        let prepare_timestamp = if commit.options().generate_prepare_timestamp {
            self.timestamp_provider.latest_timestamp()
        } else {
            Timestamp::NULL
        };

        let mutation = Mutation::CoordinatorCommitDistributedTransactionPhaseOne(
            CoordinatorCommitDistributedTransactionPhaseOne {
                transaction_id,
                mutation_id: commit.mutation_id(),
                participant_cell_ids: commit.participant_cell_ids().to_vec(),
                generate_prepare_timestamp: commit.options().generate_prepare_timestamp,
                inherit_commit_timestamp: commit.options().inherit_commit_timestamp,
                coordinator_commit_mode: commit.options().coordinator_commit_mode,
                prepare_timestamp,
                user: commit.user().to_owned(),
            },
        );
        SupervisorOutput::propose(mutation, None)
    }

    pub(crate) fn coordinator_abort_transaction(
        &mut self,
        waiter: Option<RequestId>,
        transaction_id: TxId,
        mutation_id: Option<meridian_types::MutationId>,
        force: bool,
        user: &str,
    ) -> SupervisorOutput {
        let mut output = SupervisorOutput::empty();

        if let Some(abort) = self.transient_abort_mut(transaction_id) {
            if let Some(request_id) = waiter {
                if let Some(frame) = abort.response().subscribe(request_id) {
                    output.replies.push(Reply { request_id, frame });
                }
            }
            return output;
        }

        let mut abort = crate::abort::Abort::new(transaction_id, mutation_id);
        if let Some(request_id) = waiter {
            abort.response().subscribe(request_id);
        }
        self.insert_transient_abort(abort);

        if let Err(error) = self
            .transaction_manager
            .prepare_transaction_abort(transaction_id, force)
        {
            tracing::debug!(
                tx = %transaction_id,
                force,
                user,
                error = %error,
                "error preparing transaction abort"
            );
            output.merge(self.set_abort_failed(transaction_id, &error));
            self.remove_abort(transaction_id);
            return output;
        }

        output.merge(SupervisorOutput::propose(
            Mutation::CoordinatorAbortTransaction(CoordinatorAbortTransaction {
                transaction_id,
                mutation_id,
                force,
            }),
            None,
        ));
        output
    }

    // ========================================================================
    // Commit-timestamp generation
    // ========================================================================

    fn generate_commit_timestamps(&mut self, transaction_id: TxId) -> SupervisorOutput {
        let Some(commit) = self.find_commit(transaction_id) else {
            return SupervisorOutput::empty();
        };
        let participant_cell_ids = commit.participant_cell_ids().to_vec();
        let inherit = commit.options().inherit_commit_timestamp;

        match build_timestamp_plan(
            self.self_cell_id(),
            &participant_cell_ids,
            inherit,
            self.directory.as_ref(),
        ) {
            Ok(plan) => {
                tracing::debug!(
                    tx = %transaction_id,
                    tags = plan.entries.len(),
                    "generating commit timestamps"
                );
                let mut output = SupervisorOutput::empty();
                output.timestamp_requests.push(TimestampRequest {
                    transaction_id,
                    plan,
                });
                output
            }
            Err(error) => self.on_commit_timestamps_generated(transaction_id, Err(error)),
        }
    }

    /// Completion of the commit-timestamp combiner.
    pub fn on_commit_timestamps_generated(
        &mut self,
        transaction_id: TxId,
        result: Result<meridian_types::TimestampMap, TxError>,
    ) -> SupervisorOutput {
        let Some(commit) = self.find_commit(transaction_id) else {
            tracing::debug!(
                tx = %transaction_id,
                "commit timestamps generated for a non-existing commit; ignored"
            );
            return SupervisorOutput::empty();
        };

        let commit_timestamps = match result {
            Ok(commit_timestamps) => commit_timestamps,
            Err(error) => {
                // The transaction is prepared at the coordinator and possibly
                // at participants; it must be aborted forcefully.
                tracing::debug!(
                    tx = %transaction_id,
                    error = %error,
                    "error generating commit timestamps"
                );
                return self.abort_transaction_unattended(transaction_id);
            }
        };

        tracing::debug!(
            tx = %transaction_id,
            commit_timestamps = %commit_timestamps,
            "commit timestamps generated"
        );

        let mutation = if commit.distributed() {
            Mutation::CoordinatorCommitDistributedTransactionPhaseTwo(
                CoordinatorCommitDistributedTransactionPhaseTwo {
                    transaction_id,
                    commit_timestamps,
                },
            )
        } else {
            Mutation::CoordinatorCommitSimpleTransaction(CoordinatorCommitSimpleTransaction {
                transaction_id,
                mutation_id: commit.mutation_id(),
                commit_timestamps,
                user: commit.user().to_owned(),
            })
        };
        SupervisorOutput::propose(mutation, None)
    }

    fn abort_transaction_unattended(&mut self, transaction_id: TxId) -> SupervisorOutput {
        self.coordinator_abort_transaction(None, transaction_id, None, true, ROOT_USER)
    }

    // ========================================================================
    // Mutation handlers
    // ========================================================================

    pub(crate) fn apply_commit_simple_transaction(
        &mut self,
        m: &CoordinatorCommitSimpleTransaction,
        ctx: &ApplyContext,
    ) -> SupervisorOutput {
        let transaction_id = m.transaction_id;
        let mut output = SupervisorOutput::empty();

        if let Some(commit) = self.find_commit_mut(transaction_id) {
            if commit.persistent_state() != CommitState::Start {
                if !ctx.recovery {
                    tracing::debug!(
                        tx = %transaction_id,
                        state = %commit.persistent_state(),
                        "requested to commit simple transaction in wrong state; ignored"
                    );
                }
                return output;
            }
            commit.set_commit_timestamps(m.commit_timestamps.clone());
        }

        let self_tag = self.self_cell_id().cell_tag();
        let commit_result = match m.commit_timestamps.get(self_tag) {
            Some(commit_timestamp) => self
                .transaction_manager
                .commit_transaction(transaction_id, commit_timestamp),
            None => Err(TxError::internal(format!(
                "no commit timestamp for cell tag {self_tag}"
            ))),
        };
        if let Err(error) = commit_result {
            if self.find_commit(transaction_id).is_some() {
                output.merge(self.set_commit_failed(transaction_id, &error));
                self.remove_transient_commit(transaction_id);
            }
            if !ctx.recovery {
                tracing::debug!(
                    tx = %transaction_id,
                    error = %error,
                    "error committing simple transaction"
                );
            }
            return output;
        }

        if self.find_commit(transaction_id).is_none() {
            // The entity is missing on followers and during recovery;
            // recreate it so the response frame is produced identically.
            let mut commit = Commit::new(
                transaction_id,
                m.mutation_id,
                Vec::new(),
                CommitOptions {
                    distributed: false,
                    generate_prepare_timestamp: true,
                    inherit_commit_timestamp: false,
                    coordinator_commit_mode: CoordinatorCommitMode::Eager,
                },
                m.user.clone(),
            );
            commit.set_commit_timestamps(m.commit_timestamps.clone());
            self.insert_transient_commit(commit);
        }

        output.merge(self.set_commit_succeeded(transaction_id));
        self.remove_transient_commit(transaction_id);
        output
    }

    pub(crate) fn apply_commit_distributed_phase_one(
        &mut self,
        m: &CoordinatorCommitDistributedTransactionPhaseOne,
        ctx: &ApplyContext,
    ) -> ApplyOutcome {
        let transaction_id = m.transaction_id;
        let mut output = SupervisorOutput::empty();

        // Ensure commit existence, possibly moving it from the transient to
        // the persistent map.
        if self.decommissioned_flag() {
            let error = TxError::new(
                ErrorCode::Decommissioned,
                format!("cell {} is decommissioned", self.self_cell_id()),
            );
            if let Some(commit) = self.find_commit(transaction_id) {
                debug_assert!(!commit.persistent());
                output.merge(self.set_commit_failed(transaction_id, &error));
                self.remove_transient_commit(transaction_id);
            }
            return ApplyOutcome::err(output, error);
        }

        if let Some(mut commit) = self.take_transient_commit(transaction_id) {
            commit.set_persistent(true);
            self.insert_persistent_commit(commit);
        } else if let Some(commit) = self.find_commit(transaction_id) {
            if !ctx.recovery {
                tracing::debug!(
                    tx = %transaction_id,
                    state = %commit.persistent_state(),
                    "requested to commit distributed transaction in wrong state; ignored"
                );
            }
            return ApplyOutcome::ok(output);
        } else {
            let mut commit = Commit::new(
                transaction_id,
                m.mutation_id,
                m.participant_cell_ids.clone(),
                CommitOptions {
                    distributed: true,
                    generate_prepare_timestamp: m.generate_prepare_timestamp,
                    inherit_commit_timestamp: m.inherit_commit_timestamp,
                    coordinator_commit_mode: m.coordinator_commit_mode,
                },
                m.user.clone(),
            );
            commit.set_persistent(true);
            self.insert_persistent_commit(commit);
        }

        if !ctx.recovery {
            tracing::debug!(
                tx = %transaction_id,
                user = %m.user,
                participants = m.participant_cell_ids.len(),
                prepare_timestamp = %m.prepare_timestamp,
                "distributed commit phase one started"
            );
        }

        // Prepare at the coordinator.
        if let Err(error) =
            self.transaction_manager
                .prepare_transaction_commit(transaction_id, true, m.prepare_timestamp)
        {
            if !ctx.recovery {
                tracing::debug!(
                    tx = %transaction_id,
                    user = %m.user,
                    error = %error,
                    "coordinator failure; will abort"
                );
            }
            output.merge(self.set_commit_failed(transaction_id, &error));
            self.remove_persistent_commit(transaction_id);
            if let Err(abort_error) = self.transaction_manager.abort_transaction(transaction_id, true)
            {
                if !ctx.recovery {
                    tracing::debug!(
                        tx = %transaction_id,
                        error = %abort_error,
                        "error aborting transaction at coordinator; ignored"
                    );
                }
            }
            return ApplyOutcome::ok(output);
        }

        if !ctx.recovery {
            tracing::debug!(tx = %transaction_id, state = %CommitState::Prepare, "coordinator success");
        }

        self.change_commit_persistent_state(transaction_id, CommitState::Prepare, ctx);
        output.merge(self.change_commit_transient_state(
            transaction_id,
            CommitState::Prepare,
            None,
        ));
        ApplyOutcome::ok(output)
    }

    pub(crate) fn apply_commit_distributed_phase_two(
        &mut self,
        m: &CoordinatorCommitDistributedTransactionPhaseTwo,
        ctx: &ApplyContext,
    ) -> SupervisorOutput {
        let transaction_id = m.transaction_id;
        let mut output = SupervisorOutput::empty();

        let Some(commit) = self.persistent_commit_mut(transaction_id) else {
            if !ctx.recovery {
                tracing::error!(
                    tx = %transaction_id,
                    "requested to execute phase two commit for a non-existing transaction; ignored"
                );
            }
            return output;
        };
        debug_assert!(commit.distributed());
        debug_assert!(commit.persistent());

        if commit.persistent_state() != CommitState::Prepare {
            if !ctx.recovery {
                tracing::error!(
                    tx = %transaction_id,
                    state = %commit.persistent_state(),
                    "requested to execute phase two commit for transaction in wrong state; ignored"
                );
            }
            return output;
        }

        if !ctx.recovery {
            tracing::debug!(
                tx = %transaction_id,
                commit_timestamps = %m.commit_timestamps,
                "distributed commit phase two started"
            );
        }

        let eager =
            commit.options().coordinator_commit_mode == CoordinatorCommitMode::Eager;
        commit.set_commit_timestamps(m.commit_timestamps.clone());
        self.change_commit_persistent_state(transaction_id, CommitState::Commit, ctx);
        output.merge(self.change_commit_transient_state(
            transaction_id,
            CommitState::Commit,
            None,
        ));

        if eager {
            output.merge(self.run_coordinator_commit(transaction_id, ctx));
        }
        output
    }

    pub(crate) fn apply_abort_distributed_phase_two(
        &mut self,
        m: &CoordinatorAbortDistributedTransactionPhaseTwo,
        ctx: &ApplyContext,
    ) -> SupervisorOutput {
        let transaction_id = m.transaction_id;
        let mut output = SupervisorOutput::empty();

        let Some(commit) = self.persistent_commit_mut(transaction_id) else {
            if !ctx.recovery {
                tracing::error!(
                    tx = %transaction_id,
                    "requested to execute phase two abort for a non-existing transaction; ignored"
                );
            }
            return output;
        };
        debug_assert!(commit.distributed());
        debug_assert!(commit.persistent());

        if commit.persistent_state() != CommitState::Prepare {
            if !ctx.recovery {
                tracing::error!(
                    tx = %transaction_id,
                    state = %commit.persistent_state(),
                    "requested to execute phase two abort for transaction in wrong state; ignored"
                );
            }
            return output;
        }

        if let Err(error) = self.transaction_manager.abort_transaction(transaction_id, true) {
            if !ctx.recovery {
                tracing::error!(
                    tx = %transaction_id,
                    error = %error,
                    "error aborting transaction at coordinator; ignored"
                );
            }
        }

        output.merge(self.set_commit_failed(transaction_id, &m.error));
        self.change_commit_persistent_state(transaction_id, CommitState::Abort, ctx);
        output.merge(self.change_commit_transient_state(
            transaction_id,
            CommitState::Abort,
            None,
        ));

        if !ctx.recovery {
            tracing::debug!(tx = %transaction_id, "coordinator aborted");
        }
        output
    }

    pub(crate) fn apply_coordinator_abort_transaction(
        &mut self,
        m: &CoordinatorAbortTransaction,
        ctx: &ApplyContext,
    ) -> SupervisorOutput {
        let transaction_id = m.transaction_id;
        let mut output = SupervisorOutput::empty();

        if self.transient_abort_mut(transaction_id).is_none() {
            self.insert_transient_abort(crate::abort::Abort::new(transaction_id, m.mutation_id));
        }

        if let Err(error) = self.transaction_manager.abort_transaction(transaction_id, m.force) {
            output.merge(self.set_abort_failed(transaction_id, &error));
            self.remove_abort(transaction_id);
            if !ctx.recovery {
                tracing::debug!(
                    tx = %transaction_id,
                    error = %error,
                    "error aborting transaction; ignored"
                );
            }
            return output;
        }

        if let Some(commit) = self.find_commit(transaction_id) {
            let persistent = commit.persistent();
            let error = TxError::new(
                ErrorCode::TransactionAborted,
                format!("transaction {transaction_id} was aborted"),
            );
            output.merge(self.set_commit_failed(transaction_id, &error));

            if persistent {
                output.merge(self.change_commit_transient_state(
                    transaction_id,
                    CommitState::Abort,
                    None,
                ));
                self.change_commit_persistent_state(transaction_id, CommitState::Abort, ctx);
            } else {
                self.remove_transient_commit(transaction_id);
            }
        }

        output.merge(self.set_abort_succeeded(transaction_id));
        self.remove_abort(transaction_id);
        output
    }

    pub(crate) fn apply_finish_distributed_transaction(
        &mut self,
        m: &CoordinatorFinishDistributedTransaction,
        ctx: &ApplyContext,
    ) -> SupervisorOutput {
        let transaction_id = m.transaction_id;
        let mut output = SupervisorOutput::empty();

        let Some(commit) = self.persistent_commit_mut(transaction_id) else {
            if !ctx.recovery {
                tracing::debug!(
                    tx = %transaction_id,
                    "requested to finish a non-existing transaction commit; ignored"
                );
            }
            return output;
        };

        // In lazy mode the presence of commit timestamps is the success
        // indicator: aborts never store any.
        if commit.options().coordinator_commit_mode == CoordinatorCommitMode::Lazy
            && !commit.commit_timestamps().is_empty()
        {
            output.merge(self.run_coordinator_commit(transaction_id, ctx));
        }

        self.remove_persistent_commit(transaction_id);

        if !ctx.recovery {
            tracing::debug!(tx = %transaction_id, "distributed transaction commit finished");
        }
        output
    }

    /// The coordinator's own local commit, inside a mutation context.
    fn run_coordinator_commit(
        &mut self,
        transaction_id: TxId,
        ctx: &ApplyContext,
    ) -> SupervisorOutput {
        let mut output = self.set_commit_succeeded(transaction_id);

        let self_tag = self.self_cell_id().cell_tag();
        let commit_timestamp = self
            .find_commit(transaction_id)
            .and_then(|commit| commit.commit_timestamps().get(self_tag));
        let result = match commit_timestamp {
            Some(commit_timestamp) => self
                .transaction_manager
                .commit_transaction(transaction_id, commit_timestamp),
            None => Err(TxError::internal(format!(
                "no commit timestamp for cell tag {self_tag}"
            ))),
        };
        match result {
            Ok(()) => {
                if !ctx.recovery {
                    tracing::debug!(tx = %transaction_id, "coordinator success");
                }
            }
            Err(error) => {
                // Prepare succeeded, so the local manager promised this
                // cannot happen.
                if !ctx.recovery {
                    tracing::error!(
                        tx = %transaction_id,
                        error = %error,
                        "unexpected coordinator failure; ignored"
                    );
                }
            }
        }
        output
    }

    // ========================================================================
    // Transient state machine (leader only)
    // ========================================================================

    pub(crate) fn change_commit_transient_state(
        &mut self,
        transaction_id: TxId,
        state: CommitState,
        error: Option<TxError>,
    ) -> SupervisorOutput {
        if !self.is_leading() {
            return SupervisorOutput::empty();
        }
        let Some(commit) = self.find_commit_mut(transaction_id) else {
            return SupervisorOutput::empty();
        };

        tracing::debug!(
            tx = %transaction_id,
            from = %commit.transient_state(),
            to = %state,
            "commit transient state changed"
        );
        commit.set_transient_state(state);

        match state {
            CommitState::GeneratingCommitTimestamps => {
                self.generate_commit_timestamps(transaction_id)
            }
            CommitState::Prepare | CommitState::Commit | CommitState::Abort => {
                self.send_participant_requests(transaction_id)
            }
            CommitState::Aborting => {
                let error = error.unwrap_or_else(|| {
                    TxError::internal("transaction aborted for an unknown reason")
                });
                SupervisorOutput::propose(
                    Mutation::CoordinatorAbortDistributedTransactionPhaseTwo(
                        CoordinatorAbortDistributedTransactionPhaseTwo {
                            transaction_id,
                            error,
                        },
                    ),
                    None,
                )
            }
            CommitState::Finishing => SupervisorOutput::propose(
                Mutation::CoordinatorFinishDistributedTransaction(
                    CoordinatorFinishDistributedTransaction { transaction_id },
                ),
                None,
            ),
            CommitState::Start => {
                debug_assert!(false, "illegal transient transition to Start");
                SupervisorOutput::empty()
            }
        }
    }

    pub(crate) fn change_commit_persistent_state(
        &mut self,
        transaction_id: TxId,
        state: CommitState,
        ctx: &ApplyContext,
    ) {
        let Some(commit) = self.find_commit_mut(transaction_id) else {
            return;
        };
        if !ctx.recovery {
            tracing::debug!(
                tx = %transaction_id,
                from = %commit.persistent_state(),
                to = %state,
                "commit persistent state changed"
            );
        }
        commit.set_persistent_state(state);
    }

    fn send_participant_requests(&mut self, transaction_id: TxId) -> SupervisorOutput {
        let mut output = SupervisorOutput::empty();
        let Some(commit) = self.find_commit(transaction_id) else {
            return output;
        };
        debug_assert!(commit.responded_cell_ids().is_empty());

        let participant_cell_ids = commit.participant_cell_ids().to_vec();
        for cell_id in participant_cell_ids {
            output.merge(self.send_participant_request(transaction_id, cell_id));
        }
        output.merge(self.check_all_participants_responded(transaction_id));
        output
    }

    pub(crate) fn send_participant_request(
        &mut self,
        transaction_id: TxId,
        cell_id: meridian_types::CellId,
    ) -> SupervisorOutput {
        let Some(commit) = self.find_commit(transaction_id) else {
            return SupervisorOutput::empty();
        };
        let state = commit.transient_state();

        let (template, succeed_on_unregistered, must_send_immediately) = match state {
            CommitState::Prepare => (
                CallTemplate::Prepare {
                    transaction_id,
                    generate_prepare_timestamp: commit.options().generate_prepare_timestamp,
                    inherit_commit_timestamp: commit.options().inherit_commit_timestamp,
                    user: commit.user().to_owned(),
                },
                false,
                true,
            ),
            CommitState::Commit => (
                CallTemplate::Commit {
                    transaction_id,
                    commit_timestamps: commit.commit_timestamps().clone(),
                },
                true,
                false,
            ),
            CommitState::Abort => (CallTemplate::Abort { transaction_id }, true, false),
            _ => {
                debug_assert!(false, "no participant request in state {state}");
                return SupervisorOutput::empty();
            }
        };

        let participant = self
            .registry
            .get_participant(cell_id, self.directory.as_ref());
        let ctx = SendContext {
            directory: self.directory.as_ref(),
            coordinator_clock: self.timestamp_provider.as_ref(),
        };
        let outcome = participant.issue(
            QueuedSend {
                state,
                template,
                succeed_on_unregistered,
            },
            must_send_immediately,
            &ctx,
        );
        self.route_send_outcome(cell_id, outcome)
    }

    pub(crate) fn check_all_participants_responded(
        &mut self,
        transaction_id: TxId,
    ) -> SupervisorOutput {
        let Some(commit) = self.find_commit(transaction_id) else {
            return SupervisorOutput::empty();
        };
        if !commit.all_participants_responded() {
            return SupervisorOutput::empty();
        }
        match next_commit_state(commit.transient_state()) {
            Some(next) => self.change_commit_transient_state(transaction_id, next, None),
            None => SupervisorOutput::empty(),
        }
    }
}

/// The transient state entered once every participant acknowledged the
/// current one.
fn next_commit_state(state: CommitState) -> Option<CommitState> {
    match state {
        CommitState::Prepare => Some(CommitState::GeneratingCommitTimestamps),
        CommitState::GeneratingCommitTimestamps => Some(CommitState::Commit),
        CommitState::Commit | CommitState::Abort => Some(CommitState::Finishing),
        _ => {
            debug_assert!(false, "no acknowledgement-driven successor for {state}");
            None
        }
    }
}
