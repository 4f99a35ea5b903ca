//! Participant-side mutation handlers.
//!
//! Each handler invokes the local transaction manager and surfaces its
//! failure through the apply result, so the consensus layer reports it to
//! the peer coordinator. The manager is responsible for idempotency:
//! replays and retried coordinator requests must not change state twice.

use crate::commit::CommitState;
use crate::mutation::{
    ParticipantAbortTransaction, ParticipantCommitTransaction, ParticipantPrepareTransaction,
};

use super::{ApplyContext, ApplyOutcome, SupervisorOutput, TransactionSupervisor};

impl TransactionSupervisor {
    pub(crate) fn apply_participant_prepare(
        &mut self,
        m: &ParticipantPrepareTransaction,
        ctx: &ApplyContext,
    ) -> ApplyOutcome {
        let result = self.transaction_manager.prepare_transaction_commit(
            m.transaction_id,
            true,
            m.prepare_timestamp,
        );
        self.log_participant_outcome(m.transaction_id, CommitState::Prepare, &m.user, &result, ctx);
        ApplyOutcome {
            output: SupervisorOutput::empty(),
            result,
        }
    }

    pub(crate) fn apply_participant_commit(
        &mut self,
        m: &ParticipantCommitTransaction,
        ctx: &ApplyContext,
    ) -> ApplyOutcome {
        let result = self
            .transaction_manager
            .commit_transaction(m.transaction_id, m.commit_timestamp);
        self.log_participant_outcome(m.transaction_id, CommitState::Commit, &m.user, &result, ctx);
        ApplyOutcome {
            output: SupervisorOutput::empty(),
            result,
        }
    }

    pub(crate) fn apply_participant_abort(
        &mut self,
        m: &ParticipantAbortTransaction,
        ctx: &ApplyContext,
    ) -> ApplyOutcome {
        let result = self.transaction_manager.abort_transaction(m.transaction_id, true);
        self.log_participant_outcome(m.transaction_id, CommitState::Abort, &m.user, &result, ctx);
        ApplyOutcome {
            output: SupervisorOutput::empty(),
            result,
        }
    }

    fn log_participant_outcome(
        &self,
        transaction_id: meridian_types::TxId,
        state: CommitState,
        user: &str,
        result: &Result<(), crate::error::TxError>,
        ctx: &ApplyContext,
    ) {
        if ctx.recovery {
            return;
        }
        match result {
            Ok(()) => {
                tracing::debug!(tx = %transaction_id, state = %state, user, "participant success");
            }
            Err(error) => {
                tracing::debug!(
                    tx = %transaction_id,
                    state = %state,
                    user,
                    error = %error,
                    "participant failure"
                );
            }
        }
    }
}
