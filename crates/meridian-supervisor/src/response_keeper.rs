//! Idempotent reply cache.
//!
//! The response keeper stores serialized reply frames by mutation ID so a
//! retried RPC is answered with the exact bytes of the original reply, even
//! after the commit or abort entity has left the in-memory maps.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use meridian_types::MutationId;

/// Configuration for the response keeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseKeeperConfig {
    /// Maximum number of cached replies. When exceeded, the oldest entry
    /// is evicted; eviction is deterministic so replicas stay in agreement.
    pub max_entries: usize,
}

impl Default for ResponseKeeperConfig {
    fn default() -> Self {
        Self {
            max_entries: 100_000,
        }
    }
}

impl ResponseKeeperConfig {
    /// Configuration for testing (small limits).
    pub fn testing() -> Self {
        Self { max_entries: 4 }
    }
}

/// Cache of reply frames keyed by mutation ID.
#[derive(Debug, Default)]
pub struct ResponseKeeper {
    entries: HashMap<MutationId, Bytes>,
    insertion_order: VecDeque<MutationId>,
    config: ResponseKeeperConfig,
}

impl ResponseKeeper {
    pub fn new(config: ResponseKeeperConfig) -> Self {
        Self {
            entries: HashMap::new(),
            insertion_order: VecDeque::new(),
            config,
        }
    }

    /// Looks up the cached reply for a mutation ID, if any.
    pub fn try_reply(&self, mutation_id: Option<MutationId>) -> Option<Bytes> {
        let mutation_id = mutation_id?;
        self.entries.get(&mutation_id).cloned()
    }

    /// Records the reply for a finished request. The first frame recorded
    /// for a mutation ID wins.
    pub fn end_request(&mut self, mutation_id: MutationId, frame: Bytes) {
        if self.entries.contains_key(&mutation_id) {
            return;
        }
        self.entries.insert(mutation_id, frame);
        self.insertion_order.push_back(mutation_id);
        while self.entries.len() > self.config.max_entries {
            if let Some(oldest) = self.insertion_order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.insertion_order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mid(raw: u128) -> MutationId {
        MutationId::from_raw(raw)
    }

    #[test]
    fn replays_first_recorded_frame() {
        let mut keeper = ResponseKeeper::new(ResponseKeeperConfig::testing());
        keeper.end_request(mid(1), Bytes::from_static(b"first"));
        keeper.end_request(mid(1), Bytes::from_static(b"second"));
        assert_eq!(keeper.try_reply(Some(mid(1))).unwrap(), Bytes::from_static(b"first"));
    }

    #[test]
    fn missing_or_null_mutation_id_misses() {
        let keeper = ResponseKeeper::new(ResponseKeeperConfig::testing());
        assert!(keeper.try_reply(None).is_none());
        assert!(keeper.try_reply(Some(mid(9))).is_none());
    }

    #[test]
    fn evicts_oldest_first() {
        let mut keeper = ResponseKeeper::new(ResponseKeeperConfig::testing());
        for raw in 0..6u128 {
            keeper.end_request(mid(raw), Bytes::from_static(b"frame"));
        }
        assert_eq!(keeper.len(), 4);
        assert!(keeper.try_reply(Some(mid(0))).is_none());
        assert!(keeper.try_reply(Some(mid(1))).is_none());
        assert!(keeper.try_reply(Some(mid(5))).is_some());
    }
}
