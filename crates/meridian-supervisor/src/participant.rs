//! Wrapped participants: per-peer-cell request multiplexing.
//!
//! A [`WrappedParticipant`] fronts the channel to one peer cell. It tracks
//! the peer's up/down status, queues requests that may wait for the peer to
//! come back, and fails fast for requests that must be sent immediately.
//! While the peer is down, a periodic probation step either forces one
//! queued request through (so its outcome re-evaluates the status) or runs
//! an availability check.
//!
//! The internal lock covers only the up flag and the pending queue; queued
//! requests are materialized into concrete calls after the lock is
//! released, consulting the directory for the channel's current state.

use std::sync::{Mutex, MutexGuard};

use meridian_types::{CellId, CellTag, Timestamp, TimestampMap, TxId};

use crate::commit::CommitState;
use crate::error::TxError;
use crate::traits::{ParticipantChannelState, ParticipantDirectory, TimestampProvider};

// ============================================================================
// Calls and templates
// ============================================================================

/// A concrete RPC to send to a peer cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantCall {
    Prepare {
        transaction_id: TxId,
        prepare_timestamp: Timestamp,
        user: String,
    },
    Commit {
        transaction_id: TxId,
        commit_timestamp: Timestamp,
    },
    Abort {
        transaction_id: TxId,
    },
}

impl ParticipantCall {
    pub fn transaction_id(&self) -> TxId {
        match self {
            ParticipantCall::Prepare { transaction_id, .. }
            | ParticipantCall::Commit { transaction_id, .. }
            | ParticipantCall::Abort { transaction_id } => *transaction_id,
        }
    }
}

/// A deferred request: the concrete call is produced only when the request
/// is actually sent, so queued prepares pick up the clocks and channel
/// state of that moment.
#[derive(Debug, Clone)]
pub enum CallTemplate {
    Prepare {
        transaction_id: TxId,
        generate_prepare_timestamp: bool,
        inherit_commit_timestamp: bool,
        user: String,
    },
    Commit {
        transaction_id: TxId,
        commit_timestamps: TimestampMap,
    },
    Abort {
        transaction_id: TxId,
    },
}

impl CallTemplate {
    pub fn transaction_id(&self) -> TxId {
        match self {
            CallTemplate::Prepare { transaction_id, .. }
            | CallTemplate::Commit { transaction_id, .. }
            | CallTemplate::Abort { transaction_id } => *transaction_id,
        }
    }
}

/// A request waiting on the pending queue.
#[derive(Debug, Clone)]
pub struct QueuedSend {
    /// The commit's transient state when the request was issued; responses
    /// for a state the commit has left are dropped.
    pub state: CommitState,
    pub template: CallTemplate,
    /// Commits and aborts to an unregistered peer succeed vacuously;
    /// prepares never do.
    pub succeed_on_unregistered: bool,
}

/// The result of issuing or draining a request.
#[derive(Debug)]
pub enum SendOutcome {
    /// The call is ready to go over the wire.
    Dispatched { state: CommitState, call: ParticipantCall },
    /// The request completed locally without touching the wire.
    Completed {
        transaction_id: TxId,
        state: CommitState,
        result: Result<(), TxError>,
    },
    /// The peer is down; the request waits on the pending queue.
    Queued,
}

/// What the probation step decided to do with a downed participant.
#[derive(Debug)]
pub enum ProbationAction {
    /// Force one queued request through; its outcome re-evaluates the
    /// up/down status.
    RunOne(QueuedSend),
    /// Nothing queued: run an availability check.
    Probe,
}

/// Collaborators a send needs at materialization time.
pub struct SendContext<'a> {
    pub directory: &'a dyn ParticipantDirectory,
    pub coordinator_clock: &'a dyn TimestampProvider,
}

// ============================================================================
// Wrapped participant
// ============================================================================

#[derive(Debug)]
struct Inner {
    up: bool,
    pending: Vec<QueuedSend>,
}

/// The supervisor's handle to one peer cell.
#[derive(Debug)]
pub struct WrappedParticipant {
    cell_id: CellId,
    inner: Mutex<Inner>,
}

impl WrappedParticipant {
    pub fn new(cell_id: CellId) -> Self {
        Self {
            cell_id,
            inner: Mutex::new(Inner {
                up: true,
                pending: Vec::new(),
            }),
        }
    }

    pub fn cell_id(&self) -> CellId {
        self.cell_id
    }

    pub fn cell_tag(&self) -> CellTag {
        self.cell_id.cell_tag()
    }

    pub fn is_up(&self) -> bool {
        self.lock().up
    }

    /// The state of the backing channel; a channel that cannot be
    /// constructed counts as invalid.
    pub fn state(&self, directory: &dyn ParticipantDirectory) -> ParticipantChannelState {
        directory
            .channel_state(self.cell_id)
            .unwrap_or(ParticipantChannelState::Invalid)
    }

    /// Issues a request. When the peer is up the call is materialized now;
    /// when down it either queues or, for must-send-immediately requests,
    /// fails with the down error.
    pub fn issue(
        &self,
        send: QueuedSend,
        must_send_immediately: bool,
        ctx: &SendContext<'_>,
    ) -> SendOutcome {
        if ctx.directory.channel_state(self.cell_id).is_none() {
            return SendOutcome::Completed {
                transaction_id: send.template.transaction_id(),
                state: send.state,
                result: Err(self.unavailable_error()),
            };
        }

        {
            let mut inner = self.lock();
            if !inner.up {
                if must_send_immediately {
                    return SendOutcome::Completed {
                        transaction_id: send.template.transaction_id(),
                        state: send.state,
                        result: Err(self.down_error()),
                    };
                }
                inner.pending.push(send);
                return SendOutcome::Queued;
            }
        }

        self.run_send(send, ctx)
    }

    /// Materializes a request against the channel's current state.
    pub fn run_send(&self, send: QueuedSend, ctx: &SendContext<'_>) -> SendOutcome {
        let transaction_id = send.template.transaction_id();
        let state = send.state;

        let channel_state = match ctx.directory.channel_state(self.cell_id) {
            Some(channel_state) => channel_state,
            None => {
                return SendOutcome::Completed {
                    transaction_id,
                    state,
                    result: Err(self.unavailable_error()),
                };
            }
        };

        match channel_state {
            ParticipantChannelState::Valid => match self.materialize(send.template, ctx) {
                Ok(call) => SendOutcome::Dispatched { state, call },
                Err(error) => SendOutcome::Completed {
                    transaction_id,
                    state,
                    result: Err(error),
                },
            },
            ParticipantChannelState::Unregistered => {
                let result = if send.succeed_on_unregistered {
                    tracing::debug!(
                        participant = %self.cell_id,
                        tx = %transaction_id,
                        "participant unregistered; assuming success"
                    );
                    Ok(())
                } else {
                    Err(TxError::internal(format!(
                        "participant cell {} is no longer registered",
                        self.cell_id
                    )))
                };
                SendOutcome::Completed {
                    transaction_id,
                    state,
                    result,
                }
            }
            ParticipantChannelState::Invalid => SendOutcome::Completed {
                transaction_id,
                state,
                result: Err(TxError::internal(format!(
                    "participant cell {} is no longer valid",
                    self.cell_id
                ))),
            },
        }
    }

    fn materialize(
        &self,
        template: CallTemplate,
        ctx: &SendContext<'_>,
    ) -> Result<ParticipantCall, TxError> {
        match template {
            CallTemplate::Prepare {
                transaction_id,
                generate_prepare_timestamp,
                inherit_commit_timestamp,
                user,
            } => {
                let prepare_timestamp = self.prepare_timestamp(
                    generate_prepare_timestamp,
                    inherit_commit_timestamp,
                    ctx,
                )?;
                Ok(ParticipantCall::Prepare {
                    transaction_id,
                    prepare_timestamp,
                    user,
                })
            }
            CallTemplate::Commit {
                transaction_id,
                commit_timestamps,
            } => {
                let commit_timestamp =
                    commit_timestamps.get(self.cell_tag()).ok_or_else(|| {
                        TxError::internal(format!(
                            "no commit timestamp for cell tag {}",
                            self.cell_tag()
                        ))
                    })?;
                Ok(ParticipantCall::Commit {
                    transaction_id,
                    commit_timestamp,
                })
            }
            CallTemplate::Abort { transaction_id } => Ok(ParticipantCall::Abort { transaction_id }),
        }
    }

    fn prepare_timestamp(
        &self,
        generate_prepare_timestamp: bool,
        inherit_commit_timestamp: bool,
        ctx: &SendContext<'_>,
    ) -> Result<Timestamp, TxError> {
        if !generate_prepare_timestamp {
            return Ok(Timestamp::NULL);
        }
        if inherit_commit_timestamp {
            return Ok(ctx.coordinator_clock.latest_timestamp());
        }
        ctx.directory
            .latest_timestamp(self.cell_id)
            .ok_or_else(|| self.unavailable_error())
    }

    /// Marks the peer up, returning the queued requests to drain in order.
    pub fn set_up(&self) -> Vec<QueuedSend> {
        let mut inner = self.lock();
        if inner.up {
            return Vec::new();
        }
        inner.up = true;
        let drained = std::mem::take(&mut inner.pending);
        drop(inner);

        tracing::debug!(participant = %self.cell_id, "participant cell is up");
        drained
    }

    /// Marks the peer down.
    pub fn set_down(&self, error: &TxError) {
        let mut inner = self.lock();
        if !inner.up {
            return;
        }
        inner.up = false;
        drop(inner);

        tracing::debug!(participant = %self.cell_id, error = %error, "participant cell is down");
    }

    /// One probation step while down; `None` when the peer is up.
    pub fn probation_step(&self) -> Option<ProbationAction> {
        let mut inner = self.lock();
        if inner.up {
            return None;
        }
        match inner.pending.pop() {
            Some(send) => Some(ProbationAction::RunOne(send)),
            None => Some(ProbationAction::Probe),
        }
    }

    fn unavailable_error(&self) -> TxError {
        TxError::unavailable(format!(
            "participant cell {} is currently unavailable",
            self.cell_id
        ))
    }

    fn down_error(&self) -> TxError {
        TxError::unavailable(format!(
            "participant cell {} is currently down",
            self.cell_id
        ))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("participant lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    struct FixedClock(Timestamp);

    impl TimestampProvider for FixedClock {
        fn latest_timestamp(&self) -> Timestamp {
            self.0
        }
    }

    struct MapDirectory {
        states: HashMap<CellId, ParticipantChannelState>,
        clocks: HashMap<CellId, Timestamp>,
    }

    impl ParticipantDirectory for MapDirectory {
        fn channel_state(&self, cell_id: CellId) -> Option<ParticipantChannelState> {
            self.states.get(&cell_id).copied()
        }

        fn latest_timestamp(&self, cell_id: CellId) -> Option<Timestamp> {
            self.clocks.get(&cell_id).copied()
        }
    }

    fn cell(tag: u16) -> CellId {
        CellId::from_parts(CellTag::new(tag), 1)
    }

    fn valid_directory(cell_id: CellId) -> MapDirectory {
        MapDirectory {
            states: [(cell_id, ParticipantChannelState::Valid)].into(),
            clocks: [(cell_id, Timestamp::from_raw(900))].into(),
        }
    }

    fn prepare_send(tx: u128) -> QueuedSend {
        QueuedSend {
            state: CommitState::Prepare,
            template: CallTemplate::Prepare {
                transaction_id: TxId::from_raw(tx),
                generate_prepare_timestamp: true,
                inherit_commit_timestamp: false,
                user: "u".into(),
            },
            succeed_on_unregistered: false,
        }
    }

    fn abort_send(tx: u128) -> QueuedSend {
        QueuedSend {
            state: CommitState::Abort,
            template: CallTemplate::Abort {
                transaction_id: TxId::from_raw(tx),
            },
            succeed_on_unregistered: true,
        }
    }

    #[test]
    fn up_participant_dispatches_with_peer_clock() {
        let cell_id = cell(7);
        let participant = WrappedParticipant::new(cell_id);
        let directory = valid_directory(cell_id);
        let clock = FixedClock(Timestamp::from_raw(100));
        let ctx = SendContext {
            directory: &directory,
            coordinator_clock: &clock,
        };

        match participant.issue(prepare_send(1), true, &ctx) {
            SendOutcome::Dispatched { state, call } => {
                assert_eq!(state, CommitState::Prepare);
                assert_eq!(
                    call,
                    ParticipantCall::Prepare {
                        transaction_id: TxId::from_raw(1),
                        prepare_timestamp: Timestamp::from_raw(900),
                        user: "u".into(),
                    }
                );
            }
            other => panic!("expected dispatch, got {other:?}"),
        }
    }

    #[test]
    fn inherited_prepare_uses_coordinator_clock() {
        let cell_id = cell(7);
        let participant = WrappedParticipant::new(cell_id);
        let directory = valid_directory(cell_id);
        let clock = FixedClock(Timestamp::from_raw(100));
        let ctx = SendContext {
            directory: &directory,
            coordinator_clock: &clock,
        };

        let send = QueuedSend {
            state: CommitState::Prepare,
            template: CallTemplate::Prepare {
                transaction_id: TxId::from_raw(1),
                generate_prepare_timestamp: true,
                inherit_commit_timestamp: true,
                user: "u".into(),
            },
            succeed_on_unregistered: false,
        };
        match participant.issue(send, true, &ctx) {
            SendOutcome::Dispatched {
                call: ParticipantCall::Prepare { prepare_timestamp, .. },
                ..
            } => assert_eq!(prepare_timestamp, Timestamp::from_raw(100)),
            other => panic!("expected dispatch, got {other:?}"),
        }
    }

    #[test]
    fn must_send_immediately_fails_while_down() {
        let cell_id = cell(7);
        let participant = WrappedParticipant::new(cell_id);
        participant.set_down(&TxError::unavailable("gone"));
        let directory = valid_directory(cell_id);
        let clock = FixedClock(Timestamp::NULL);
        let ctx = SendContext {
            directory: &directory,
            coordinator_clock: &clock,
        };

        match participant.issue(prepare_send(1), true, &ctx) {
            SendOutcome::Completed { result: Err(error), .. } => {
                assert!(error.is_retriable());
            }
            other => panic!("expected down error, got {other:?}"),
        }
    }

    #[test]
    fn queued_sends_drain_in_order_on_set_up() {
        let cell_id = cell(7);
        let participant = WrappedParticipant::new(cell_id);
        participant.set_down(&TxError::unavailable("gone"));
        let directory = valid_directory(cell_id);
        let clock = FixedClock(Timestamp::NULL);
        let ctx = SendContext {
            directory: &directory,
            coordinator_clock: &clock,
        };

        assert!(matches!(
            participant.issue(abort_send(1), false, &ctx),
            SendOutcome::Queued
        ));
        assert!(matches!(
            participant.issue(abort_send(2), false, &ctx),
            SendOutcome::Queued
        ));

        let drained = participant.set_up();
        let ids: Vec<TxId> = drained
            .iter()
            .map(|send| send.template.transaction_id())
            .collect();
        assert_eq!(ids, vec![TxId::from_raw(1), TxId::from_raw(2)]);
        assert!(participant.is_up());
    }

    #[test]
    fn probation_pops_newest_then_probes() {
        let cell_id = cell(7);
        let participant = WrappedParticipant::new(cell_id);
        participant.set_down(&TxError::unavailable("gone"));
        let directory = valid_directory(cell_id);
        let clock = FixedClock(Timestamp::NULL);
        let ctx = SendContext {
            directory: &directory,
            coordinator_clock: &clock,
        };

        participant.issue(abort_send(1), false, &ctx);
        participant.issue(abort_send(2), false, &ctx);

        match participant.probation_step() {
            Some(ProbationAction::RunOne(send)) => {
                assert_eq!(send.template.transaction_id(), TxId::from_raw(2));
            }
            other => panic!("expected queued send, got {other:?}"),
        }
        assert!(matches!(participant.probation_step(), Some(ProbationAction::RunOne(_))));
        assert!(matches!(participant.probation_step(), Some(ProbationAction::Probe)));

        participant.set_up();
        assert!(participant.probation_step().is_none());
    }

    #[test]
    fn unregistered_peer_succeeds_only_when_allowed() {
        let cell_id = cell(7);
        let participant = WrappedParticipant::new(cell_id);
        let directory = MapDirectory {
            states: [(cell_id, ParticipantChannelState::Unregistered)].into(),
            clocks: HashMap::new(),
        };
        let clock = FixedClock(Timestamp::NULL);
        let ctx = SendContext {
            directory: &directory,
            coordinator_clock: &clock,
        };

        match participant.issue(abort_send(1), false, &ctx) {
            SendOutcome::Completed { result: Ok(()), .. } => {}
            other => panic!("expected vacuous success, got {other:?}"),
        }
        match participant.issue(prepare_send(1), true, &ctx) {
            SendOutcome::Completed { result: Err(error), .. } => {
                assert!(!error.is_retriable());
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn unconstructible_channel_is_unavailable() {
        let cell_id = cell(7);
        let participant = WrappedParticipant::new(cell_id);
        let directory = MapDirectory {
            states: HashMap::new(),
            clocks: HashMap::new(),
        };
        let clock = FixedClock(Timestamp::NULL);
        let ctx = SendContext {
            directory: &directory,
            coordinator_clock: &clock,
        };

        match participant.issue(abort_send(1), false, &ctx) {
            SendOutcome::Completed { result: Err(error), .. } => {
                assert!(error.is_retriable());
            }
            other => panic!("expected unavailable, got {other:?}"),
        }
    }
}
