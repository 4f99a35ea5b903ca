//! # meridian-types: Core types for Meridian
//!
//! This crate contains the shared types used across the Meridian system:
//! - Entity IDs ([`TxId`], [`CellId`], [`CellTag`], [`MutationId`])
//! - Temporal types ([`Timestamp`], [`TimestampMap`])
//! - Well-known principals ([`ROOT_USER`])
//!
//! All IDs are 128-bit values with a shared bit layout so that the *cell
//! tag*, the 16-bit projection identifying the originating cell, can be
//! extracted uniformly from transaction and cell identifiers.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

// ============================================================================
// Well-known principals
// ============================================================================

/// The superuser every cell trusts; used as the default owner for
/// system-initiated operations and for records predating user tracking.
pub const ROOT_USER: &str = "root";

// ============================================================================
// Bit layout shared by 128-bit IDs
// ============================================================================
//
// bits 112..128   reserved (kind/version)
// bits  96..112   cell tag
// bits  64..96    counter (encodes the start timestamp for tablet-style
//                 transactions; zero for cell ids)
// bits   0..64    entropy

const CELL_TAG_SHIFT: u32 = 96;
const COUNTER_SHIFT: u32 = 64;

fn pack_id(cell_tag: CellTag, counter: u32, entropy: u64) -> u128 {
    (u128::from(cell_tag.as_u16()) << CELL_TAG_SHIFT)
        | (u128::from(counter) << COUNTER_SHIFT)
        | u128::from(entropy)
}

fn unpack_cell_tag(raw: u128) -> CellTag {
    CellTag::new(((raw >> CELL_TAG_SHIFT) & 0xFFFF) as u16)
}

fn unpack_counter(raw: u128) -> u32 {
    ((raw >> COUNTER_SHIFT) & 0xFFFF_FFFF) as u32
}

// ============================================================================
// CellTag
// ============================================================================

/// The 16-bit projection of an ID identifying the cell it originated from.
///
/// Cell tags index cross-cell timestamp maps: a commit carries one
/// timestamp per distinct cell tag among its participants.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct CellTag(u16);

impl CellTag {
    pub fn new(tag: u16) -> Self {
        Self(tag)
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }
}

impl Display for CellTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for CellTag {
    fn from(tag: u16) -> Self {
        Self(tag)
    }
}

impl From<CellTag> for u16 {
    fn from(tag: CellTag) -> Self {
        tag.0
    }
}

// ============================================================================
// TxId
// ============================================================================

/// Unique 128-bit identifier of a transaction.
///
/// Exposes two projections:
/// - [`TxId::cell_tag`]: the cell the transaction originated from;
/// - [`TxId::counter`]: the start-timestamp encoding used by tablet-style
///   transactions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct TxId(u128);

impl TxId {
    pub fn from_raw(raw: u128) -> Self {
        Self(raw)
    }

    /// Assembles a transaction ID from its projections.
    pub fn from_parts(cell_tag: CellTag, counter: u32, entropy: u64) -> Self {
        Self(pack_id(cell_tag, counter, entropy))
    }

    pub fn as_u128(self) -> u128 {
        self.0
    }

    /// The tag of the cell that coordinated the transaction's start.
    pub fn cell_tag(self) -> CellTag {
        unpack_cell_tag(self.0)
    }

    /// The start-timestamp encoding for tablet-style transactions.
    pub fn counter(self) -> u32 {
        unpack_counter(self.0)
    }
}

impl Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl From<u128> for TxId {
    fn from(raw: u128) -> Self {
        Self(raw)
    }
}

impl From<TxId> for u128 {
    fn from(id: TxId) -> Self {
        id.0
    }
}

// ============================================================================
// CellId
// ============================================================================

/// Unique 128-bit identifier of a consensus-replicated cell.
///
/// Every supervisor instance is bound to one *self* cell ID; commit
/// requests name participants by their cell IDs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct CellId(u128);

impl CellId {
    pub fn from_raw(raw: u128) -> Self {
        Self(raw)
    }

    /// Assembles a cell ID from a cell tag and entropy bits.
    pub fn from_parts(cell_tag: CellTag, entropy: u64) -> Self {
        Self(pack_id(cell_tag, 0, entropy))
    }

    pub fn as_u128(self) -> u128 {
        self.0
    }

    pub fn cell_tag(self) -> CellTag {
        unpack_cell_tag(self.0)
    }
}

impl Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl From<u128> for CellId {
    fn from(raw: u128) -> Self {
        Self(raw)
    }
}

impl From<CellId> for u128 {
    fn from(id: CellId) -> Self {
        id.0
    }
}

// ============================================================================
// MutationId
// ============================================================================

/// 128-bit identifier correlating an RPC request with its replicated
/// mutation, used for idempotent reply caching.
///
/// Requests without retry semantics carry no mutation ID; the supervisor
/// models that as `Option<MutationId>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MutationId(u128);

impl MutationId {
    pub fn from_raw(raw: u128) -> Self {
        Self(raw)
    }

    pub fn as_u128(self) -> u128 {
        self.0
    }
}

impl Display for MutationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl From<u128> for MutationId {
    fn from(raw: u128) -> Self {
        Self(raw)
    }
}

// ============================================================================
// Timestamp
// ============================================================================

/// 64-bit monotonic hybrid-logical timestamp.
///
/// Timestamps are generated by per-cell timestamp providers and compared
/// only for ordering; the zero value is reserved as the *null* timestamp,
/// passed where prepare-timestamp generation is disabled.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The reserved null timestamp.
    pub const NULL: Timestamp = Timestamp(0);

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The next representable timestamp; saturates at the maximum.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for Timestamp {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<Timestamp> for u64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

// ============================================================================
// TimestampMap
// ============================================================================

/// Commit timestamps of a transaction, one per distinct participant cell
/// tag.
///
/// Produced by the coordinator before the commit phase and consumed by
/// each participant at commit time, keyed by the participant's own tag.
/// Entry order is the wire order and is preserved across serialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TimestampMap {
    entries: Vec<(CellTag, Timestamp)>,
}

impl TimestampMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a timestamp for a cell tag. The first entry for a tag wins;
    /// callers deduplicate tags before insertion.
    pub fn insert(&mut self, cell_tag: CellTag, timestamp: Timestamp) {
        if self.get(cell_tag).is_none() {
            self.entries.push((cell_tag, timestamp));
        }
    }

    pub fn get(&self, cell_tag: CellTag) -> Option<Timestamp> {
        self.entries
            .iter()
            .find(|(tag, _)| *tag == cell_tag)
            .map(|(_, ts)| *ts)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CellTag, Timestamp)> + '_ {
        self.entries.iter().copied()
    }
}

impl FromIterator<(CellTag, Timestamp)> for TimestampMap {
    fn from_iter<I: IntoIterator<Item = (CellTag, Timestamp)>>(iter: I) -> Self {
        let mut map = TimestampMap::new();
        for (tag, ts) in iter {
            map.insert(tag, ts);
        }
        map
    }
}

impl Display for TimestampMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (tag, ts)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{tag}: {ts}")?;
        }
        write!(f, "}}")
    }
}
