//! Interfaces to the supervisor's external collaborators.
//!
//! The supervisor core never owns transaction state, clocks or channels; it
//! drives them through these traits. The hosting process supplies the
//! implementations at construction time.

use meridian_types::{CellId, Timestamp, TxId};

use crate::error::TxError;

/// The local transaction manager owning row-level transaction state.
///
/// All methods run synchronously on the automaton thread. The manager is
/// responsible for rejecting conflicting state transitions with a typed
/// error; once `prepare_transaction_commit` succeeded,
/// `commit_transaction` must not fail.
pub trait TransactionManager: Send {
    fn prepare_transaction_commit(
        &mut self,
        transaction_id: TxId,
        persistent: bool,
        prepare_timestamp: Timestamp,
    ) -> Result<(), TxError>;

    fn prepare_transaction_abort(&mut self, transaction_id: TxId, force: bool)
    -> Result<(), TxError>;

    fn commit_transaction(
        &mut self,
        transaction_id: TxId,
        commit_timestamp: Timestamp,
    ) -> Result<(), TxError>;

    fn abort_transaction(&mut self, transaction_id: TxId, force: bool) -> Result<(), TxError>;

    fn ping_transaction(&mut self, transaction_id: TxId, ping_ancestors: bool)
    -> Result<(), TxError>;
}

/// The cell's own timestamp provider.
///
/// `latest_timestamp` is a cached read and never blocks; fresh timestamp
/// *generation* is asynchronous and runs through
/// [`TimestampRequest`](crate::supervisor::TimestampRequest) outputs.
pub trait TimestampProvider: Send {
    fn latest_timestamp(&self) -> Timestamp;
}

/// State of the channel backing a wrapped participant, as reported by the
/// participant directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParticipantChannelState {
    /// The channel is usable.
    Valid,
    /// The peer cell has been unregistered from the directory; commit and
    /// abort requests to it succeed vacuously, prepares fail.
    Unregistered,
    /// The channel is defunct and its wrapper must be recreated.
    Invalid,
}

/// Resolves peer cells to channels.
///
/// Backed by the process's channel-provider chain. Returning `None` means
/// no provider could construct a channel for the cell.
pub trait ParticipantDirectory: Send {
    fn channel_state(&self, cell_id: CellId) -> Option<ParticipantChannelState>;

    /// The peer's cached clock reading, used for non-inherited prepare
    /// timestamps. `None` when no channel can be constructed.
    fn latest_timestamp(&self, cell_id: CellId) -> Option<Timestamp>;
}
