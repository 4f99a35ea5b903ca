//! Cross-cell protocol errors.
//!
//! [`TxError`] is the error type exchanged between coordinators, participants
//! and clients. It is a tagged value, an [`ErrorCode`] plus a human-readable
//! message, with an optional causal chain, and it serializes into response
//! frames and replicated mutations.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error codes forming the contract with clients and peer cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Transport-level unavailability: the peer could not be reached, the
    /// channel could not be constructed, or the cell has stopped leading.
    Unavailable,
    /// The request did not complete within its deadline.
    Timeout,
    /// The peer has no record of the transaction.
    NoSuchTransaction,
    /// The cell is draining and accepts no new distributed commits.
    Decommissioned,
    /// A participant failed to prepare; carries the participant failure as
    /// its cause.
    PrepareFailed,
    /// The transaction was aborted while a commit was in flight.
    TransactionAborted,
    /// Any other rejection, including local transaction-manager failures.
    Internal,
}

/// A protocol error with a code and a causal chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct TxError {
    pub code: ErrorCode,
    pub message: String,
    #[source]
    pub cause: Option<Box<TxError>>,
}

impl TxError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    pub fn no_such_transaction(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NoSuchTransaction, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// Attaches `cause` as the reason for this error.
    pub fn caused_by(mut self, cause: TxError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Walks the causal chain looking for `code`.
    pub fn find_code(&self, code: ErrorCode) -> bool {
        if self.code == code {
            return true;
        }
        self.cause.as_ref().is_some_and(|cause| cause.find_code(code))
    }

    /// Whether a request failing with this error may be retried against the
    /// same peer. Only transport-level unavailability and timeouts qualify;
    /// a semantic rejection means the peer answered.
    pub fn is_retriable(&self) -> bool {
        matches!(self.code, ErrorCode::Unavailable | ErrorCode::Timeout)
    }
}
