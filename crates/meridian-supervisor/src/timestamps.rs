//! Commit-timestamp planning.
//!
//! Before entering the commit phase the coordinator produces one commit
//! timestamp per distinct participant cell tag. The plan computed here
//! names the source of each tag's timestamp; the hosting shell dispatches
//! the generation requests in parallel and feeds the combined result back
//! through `on_commit_timestamps_generated`. Any generation failure forces
//! an abort, because participants may already be prepared.

use meridian_types::{CellId, CellTag};

use crate::error::TxError;
use crate::traits::ParticipantDirectory;

/// Where one cell tag's commit timestamp comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampSource {
    /// A fresh timestamp from the coordinator's own provider.
    Coordinator,
    /// The same value generated for the coordinator; used when the commit
    /// inherits the coordinator's timestamp.
    InheritCoordinator,
    /// A fresh timestamp from this participant's provider.
    Participant(CellId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampPlanEntry {
    pub cell_tag: CellTag,
    pub source: TimestampSource,
}

/// The per-tag timestamp sources for one commit, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampPlan {
    pub entries: Vec<TimestampPlanEntry>,
}

/// Builds the timestamp plan for a commit.
///
/// The self cell tag always comes first. Participants sharing an already
/// planned tag are skipped. Fails with `Unavailable` when a participant's
/// provider cannot be reached; the caller turns that into a forced abort.
pub fn build_timestamp_plan(
    self_cell_id: CellId,
    participant_cell_ids: &[CellId],
    inherit_commit_timestamp: bool,
    directory: &dyn ParticipantDirectory,
) -> Result<TimestampPlan, TxError> {
    let mut entries = vec![TimestampPlanEntry {
        cell_tag: self_cell_id.cell_tag(),
        source: TimestampSource::Coordinator,
    }];

    for &cell_id in participant_cell_ids {
        let cell_tag = cell_id.cell_tag();
        if entries.iter().any(|entry| entry.cell_tag == cell_tag) {
            continue;
        }

        if directory.channel_state(cell_id).is_none() {
            return Err(TxError::unavailable(format!(
                "participant cell {cell_id} is currently unavailable"
            )));
        }

        let source = if inherit_commit_timestamp && cell_id != self_cell_id {
            TimestampSource::InheritCoordinator
        } else {
            TimestampSource::Participant(cell_id)
        };
        entries.push(TimestampPlanEntry { cell_tag, source });
    }

    Ok(TimestampPlan { entries })
}

/// Resolves a plan into a commit-timestamp map, given a generator for
/// fresh values. Inherited entries reuse the coordinator's value. Mirrors
/// what a hosting shell does with a [`TimestampPlan`]; also used by tests
/// and simulation.
pub fn resolve_plan<F>(plan: &TimestampPlan, mut fresh: F) -> meridian_types::TimestampMap
where
    F: FnMut(&TimestampSource) -> meridian_types::Timestamp,
{
    let mut coordinator_value = None;
    let mut map = meridian_types::TimestampMap::new();
    for entry in &plan.entries {
        let value = match entry.source {
            TimestampSource::Coordinator => {
                let value = fresh(&entry.source);
                coordinator_value = Some(value);
                value
            }
            TimestampSource::InheritCoordinator => {
                coordinator_value.unwrap_or_else(|| fresh(&entry.source))
            }
            TimestampSource::Participant(_) => fresh(&entry.source),
        };
        map.insert(entry.cell_tag, value);
    }
    map
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use meridian_types::Timestamp;

    use super::*;
    use crate::traits::ParticipantChannelState;

    struct AllValid {
        known: HashSet<CellId>,
    }

    impl ParticipantDirectory for AllValid {
        fn channel_state(&self, cell_id: CellId) -> Option<ParticipantChannelState> {
            self.known
                .contains(&cell_id)
                .then_some(ParticipantChannelState::Valid)
        }

        fn latest_timestamp(&self, _cell_id: CellId) -> Option<Timestamp> {
            None
        }
    }

    fn cell(tag: u16, entropy: u64) -> CellId {
        CellId::from_parts(CellTag::new(tag), entropy)
    }

    #[test]
    fn self_tag_comes_first_and_tags_deduplicate() {
        let self_cell = cell(1, 0);
        let p1 = cell(2, 0);
        let p2 = cell(2, 1); // same tag as p1
        let directory = AllValid {
            known: [p1, p2].into(),
        };

        let plan = build_timestamp_plan(self_cell, &[p1, p2], false, &directory).unwrap();
        assert_eq!(
            plan.entries,
            vec![
                TimestampPlanEntry {
                    cell_tag: CellTag::new(1),
                    source: TimestampSource::Coordinator,
                },
                TimestampPlanEntry {
                    cell_tag: CellTag::new(2),
                    source: TimestampSource::Participant(p1),
                },
            ]
        );
    }

    #[test]
    fn inherited_timestamps_reuse_the_coordinator_value() {
        let self_cell = cell(1, 0);
        let p1 = cell(2, 0);
        let directory = AllValid { known: [p1].into() };

        let plan = build_timestamp_plan(self_cell, &[p1], true, &directory).unwrap();
        assert_eq!(plan.entries[1].source, TimestampSource::InheritCoordinator);
    }

    #[test]
    fn participant_sharing_self_tag_is_skipped() {
        let self_cell = cell(1, 0);
        let same_tag_peer = cell(1, 9);
        let directory = AllValid {
            known: [same_tag_peer].into(),
        };

        let plan = build_timestamp_plan(self_cell, &[same_tag_peer], false, &directory).unwrap();
        assert_eq!(plan.entries.len(), 1);
    }

    #[test]
    fn unreachable_provider_fails_the_plan() {
        let self_cell = cell(1, 0);
        let unreachable = cell(3, 0);
        let directory = AllValid {
            known: HashSet::new(),
        };

        let err = build_timestamp_plan(self_cell, &[unreachable], false, &directory).unwrap_err();
        assert!(err.is_retriable());
    }
}
