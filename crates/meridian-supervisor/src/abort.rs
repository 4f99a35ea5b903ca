//! Per-transaction abort coordination records.

use meridian_types::{MutationId, TxId};

use crate::response::ResponseSlot;

/// An in-flight abort. Transient only: aborts never touch the snapshot and
/// do not survive leader changes.
#[derive(Debug)]
pub struct Abort {
    transaction_id: TxId,
    mutation_id: Option<MutationId>,
    response: ResponseSlot,
}

impl Abort {
    pub fn new(transaction_id: TxId, mutation_id: Option<MutationId>) -> Self {
        Self {
            transaction_id,
            mutation_id,
            response: ResponseSlot::new(),
        }
    }

    pub fn transaction_id(&self) -> TxId {
        self.transaction_id
    }

    pub fn mutation_id(&self) -> Option<MutationId> {
        self.mutation_id
    }

    pub fn response(&mut self) -> &mut ResponseSlot {
        &mut self.response
    }
}
