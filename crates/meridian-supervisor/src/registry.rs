//! Participant registry: strong and weak maps of wrapped participants.
//!
//! In-flight requests keep a wrapper alive through its strong entry; the
//! weak map lets queries (e.g. the downed-cells RPC) observe participants
//! without pinning them. Wrappers whose channel is no longer valid are
//! replaced on access and reaped by the periodic cleanup.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use meridian_types::CellId;

use crate::participant::WrappedParticipant;
use crate::traits::{ParticipantChannelState, ParticipantDirectory};

#[derive(Debug, Default)]
pub struct ParticipantRegistry {
    strong: HashMap<CellId, Arc<WrappedParticipant>>,
    weak: HashMap<CellId, Weak<WrappedParticipant>>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the wrapper for a cell, creating one if none exists or the
    /// existing one's channel is no longer valid.
    pub fn get_participant(
        &mut self,
        cell_id: CellId,
        directory: &dyn ParticipantDirectory,
    ) -> Arc<WrappedParticipant> {
        if let Some(weak) = self.weak.get(&cell_id) {
            if let Some(participant) = weak.upgrade() {
                let state = participant.state(directory);
                if state == ParticipantChannelState::Valid {
                    return participant;
                }
                if self.strong.remove(&cell_id).is_some() {
                    tracing::debug!(
                        participant = %cell_id,
                        state = ?state,
                        "participant is not valid; invalidated"
                    );
                }
            }
            self.weak.remove(&cell_id);
        }

        let participant = Arc::new(WrappedParticipant::new(cell_id));
        self.strong.insert(cell_id, Arc::clone(&participant));
        self.weak.insert(cell_id, Arc::downgrade(&participant));

        tracing::debug!(participant = %cell_id, "participant cell registered");
        participant
    }

    /// Looks up a live wrapper without creating one.
    pub fn find(&self, cell_id: CellId) -> Option<Arc<WrappedParticipant>> {
        self.weak.get(&cell_id).and_then(Weak::upgrade)
    }

    /// The downed peers among `cell_ids`, or among all known participants
    /// when `cell_ids` is empty. The self cell is never reported.
    pub fn downed_participants(&self, cell_ids: &[CellId], self_cell_id: CellId) -> Vec<CellId> {
        let consider = |participant: &Arc<WrappedParticipant>| {
            let cell_id = participant.cell_id();
            (cell_id != self_cell_id && !participant.is_up()).then_some(cell_id)
        };

        if cell_ids.is_empty() {
            self.weak
                .values()
                .filter_map(Weak::upgrade)
                .filter_map(|participant| consider(&participant))
                .collect()
        } else {
            cell_ids
                .iter()
                .filter_map(|cell_id| self.find(*cell_id))
                .filter_map(|participant| consider(&participant))
                .collect()
        }
    }

    /// All live wrappers, for the probation sweep.
    pub fn participants(&self) -> Vec<Arc<WrappedParticipant>> {
        self.weak.values().filter_map(Weak::upgrade).collect()
    }

    /// Drops strong entries whose channel is no longer valid and weak
    /// entries that expired.
    pub fn cleanup(&mut self, directory: &dyn ParticipantDirectory) {
        self.strong.retain(|cell_id, participant| {
            let valid = participant.state(directory) == ParticipantChannelState::Valid;
            if !valid {
                tracing::debug!(participant = %cell_id, "participant invalidated");
            }
            valid
        });
        self.weak.retain(|_, weak| weak.upgrade().is_some());
    }

    pub fn clear(&mut self) {
        self.strong.clear();
        self.weak.clear();
    }
}
