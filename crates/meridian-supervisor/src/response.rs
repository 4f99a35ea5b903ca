//! Serialized response frames and write-once response slots.
//!
//! Every client-facing outcome travels as an opaque byte frame so that the
//! response keeper can replay it verbatim on retry: two requests with the
//! same mutation ID observe byte-identical replies.

use bytes::Bytes;
use meridian_types::{CellId, TimestampMap};
use serde::{Deserialize, Serialize};

use crate::error::TxError;
use crate::rpc::RequestId;

// ============================================================================
// Response frames
// ============================================================================

/// The decoded body of a response frame.
///
/// Field and variant order is the wire order and must not change across
/// revisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseBody {
    /// A commit succeeded with these per-cell-tag timestamps.
    CommitTimestamps(TimestampMap),
    /// An empty success (aborts, pings, participant operations).
    Empty,
    /// Downed participant cells.
    CellIds(Vec<CellId>),
    /// A typed failure.
    Error(TxError),
}

/// Encodes a response body into an opaque frame.
pub fn encode_frame(body: &ResponseBody) -> Bytes {
    let bytes = postcard::to_allocvec(body).expect("response bodies always serialize");
    Bytes::from(bytes)
}

/// Decodes a response frame.
pub fn decode_frame(frame: &Bytes) -> Result<ResponseBody, TxError> {
    postcard::from_bytes(frame)
        .map_err(|err| TxError::internal(format!("malformed response frame: {err}")))
}

pub fn commit_success_frame(commit_timestamps: &TimestampMap) -> Bytes {
    encode_frame(&ResponseBody::CommitTimestamps(commit_timestamps.clone()))
}

pub fn empty_success_frame() -> Bytes {
    encode_frame(&ResponseBody::Empty)
}

pub fn error_frame(error: &TxError) -> Bytes {
    encode_frame(&ResponseBody::Error(error.clone()))
}

/// Collapses a frame into a plain outcome, for in-process callers that do
/// not care about the success payload.
pub fn frame_to_result(frame: &Bytes) -> Result<(), TxError> {
    match decode_frame(frame)? {
        ResponseBody::Error(error) => Err(error),
        _ => Ok(()),
    }
}

// ============================================================================
// Response slot
// ============================================================================

/// A write-once response frame plus the requests waiting on it.
///
/// The first `set` wins; later writes are ignored. Requests subscribing
/// after resolution observe the stored frame immediately.
#[derive(Debug, Default)]
pub struct ResponseSlot {
    frame: Option<Bytes>,
    waiters: Vec<RequestId>,
}

impl ResponseSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter. Returns the frame if the slot is already
    /// resolved, in which case the waiter is not recorded.
    pub fn subscribe(&mut self, request_id: RequestId) -> Option<Bytes> {
        match &self.frame {
            Some(frame) => Some(frame.clone()),
            None => {
                self.waiters.push(request_id);
                None
            }
        }
    }

    /// Resolves the slot, returning the waiters to notify. Returns an empty
    /// list if the slot was already resolved.
    pub fn set(&mut self, frame: Bytes) -> Vec<RequestId> {
        if self.frame.is_some() {
            return Vec::new();
        }
        self.frame = Some(frame);
        std::mem::take(&mut self.waiters)
    }

    pub fn is_set(&self) -> bool {
        self.frame.is_some()
    }

    /// Drops all registered waiters without resolving the slot.
    pub fn drop_waiters(&mut self) {
        self.waiters.clear();
    }
}

#[cfg(test)]
mod tests {
    use meridian_types::{CellTag, Timestamp};

    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn frame_round_trip() {
        let timestamps: TimestampMap =
            [(CellTag::new(1), Timestamp::from_raw(500))].into_iter().collect();
        let frame = commit_success_frame(&timestamps);
        assert_eq!(
            decode_frame(&frame).unwrap(),
            ResponseBody::CommitTimestamps(timestamps)
        );
        assert!(frame_to_result(&frame).is_ok());
    }

    #[test]
    fn error_frame_surfaces_code() {
        let frame = error_frame(&TxError::new(ErrorCode::TransactionAborted, "aborted"));
        let err = frame_to_result(&frame).unwrap_err();
        assert_eq!(err.code, ErrorCode::TransactionAborted);
    }

    #[test]
    fn slot_resolves_exactly_once() {
        let mut slot = ResponseSlot::new();
        assert_eq!(slot.subscribe(RequestId::new(1)), None);
        assert_eq!(slot.subscribe(RequestId::new(2)), None);

        let waiters = slot.set(empty_success_frame());
        assert_eq!(waiters, vec![RequestId::new(1), RequestId::new(2)]);

        // A second resolution is ignored.
        assert!(slot.set(error_frame(&TxError::internal("late"))).is_empty());

        // Late subscribers observe the first frame.
        let frame = slot.subscribe(RequestId::new(3)).unwrap();
        assert_eq!(decode_frame(&frame).unwrap(), ResponseBody::Empty);
    }
}
