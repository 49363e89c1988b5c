//! Core data types shared across the crate.

use serde::{Deserialize, Serialize};

/// Keys are opaque byte strings, ordered lexicographically by the engine.
pub type Key = Vec<u8>;

/// Values are opaque byte strings. An empty value is distinct from an
/// absent key.
pub type Value = Vec<u8>;

/// Opaque, content-derived identifier naming one immutable state of the
/// index. Two ids are equal iff the states they name are byte-identical.
///
/// The coordinator never inspects the bytes; it only stores, compares and
/// forwards them. An empty id is never produced by an engine and is
/// rejected wherever one is supplied externally.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotId(Vec<u8>);

impl SnapshotId {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Render as lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        Ok(Self(hex::decode(s)?))
    }
}

impl std::fmt::Debug for SnapshotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SnapshotId({})", self.to_hex())
    }
}

impl std::fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A 32-byte content fingerprint.
///
/// Used both as the digest of an observed read (change detection) and as a
/// chunk id in content-addressed storage.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest([u8; 32]);

impl Digest {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

/// A batch of mutations applied atomically against one base snapshot.
///
/// Sets are applied before deletes.
#[derive(Clone, Debug, Default)]
pub struct MutationBatch {
    pub set: Vec<(Key, Value)>,
    pub del: Vec<Key>,
}

impl MutationBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<Key>, value: impl Into<Value>) -> Self {
        self.set.push((key.into(), value.into()));
        self
    }

    pub fn del(mut self, key: impl Into<Key>) -> Self {
        self.del.push(key.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.del.is_empty()
    }
}

/// Parameters defining a bounded, directional, paginated view over ordered
/// keys.
///
/// Every field participates in the fingerprint of a scan: changing any of
/// them can change the digest even when the matched rows are identical,
/// because the digest reflects the read's enumeration, not only its content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeDescriptor {
    pub start_key: Option<Key>,
    pub end_key: Option<Key>,
    pub start_inclusive: bool,
    pub end_inclusive: bool,
    pub offset: usize,
    pub limit: Option<usize>,
    pub reverse: bool,
}

impl Default for RangeDescriptor {
    fn default() -> Self {
        Self {
            start_key: None,
            end_key: None,
            start_inclusive: true,
            end_inclusive: false,
            offset: 0,
            limit: None,
            reverse: false,
        }
    }
}

impl RangeDescriptor {
    /// The unbounded range over all keys.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn from(start: impl Into<Key>) -> Self {
        Self {
            start_key: Some(start.into()),
            ..Self::default()
        }
    }

    pub fn between(start: impl Into<Key>, end: impl Into<Key>) -> Self {
        Self {
            start_key: Some(start.into()),
            end_key: Some(end.into()),
            ..Self::default()
        }
    }

    pub fn end_inclusive(mut self, inclusive: bool) -> Self {
        self.end_inclusive = inclusive;
        self
    }

    pub fn start_inclusive(mut self, inclusive: bool) -> Self {
        self.start_inclusive = inclusive;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn reversed(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    /// Whether the descriptor carries pagination fields (rejected by
    /// `count`).
    pub fn has_pagination(&self) -> bool {
        self.offset != 0 || self.limit.is_some()
    }
}

/// One row of a snapshot-to-snapshot diff. `None` means the key is absent
/// on that side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffEntry {
    pub key: Key,
    pub left: Option<Value>,
    pub right: Option<Value>,
}

/// What a live query observes: a single key or a range view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadDescriptor {
    Key(Key),
    Range(RangeDescriptor),
}

/// Which side of the current pointer a history scan enumerates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryDirection {
    /// Entries before the pointer, nearest first.
    Undo,
    /// Entries after the pointer, nearest first.
    Redo,
}

/// One page of timeline history.
///
/// `total` is the number of entries available in the scanned direction,
/// independent of the requested page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryPage {
    pub total: usize,
    pub entries: Vec<SnapshotId>,
}
