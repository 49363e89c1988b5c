//! Contracts for the external collaborators: the immutable tree index and
//! the content-addressed chunk store beneath it.
//!
//! The coordinator drives these through trait objects and never reaches
//! into their internals. The chunk store is only touched transitively
//! through an engine implementation; in particular, the coordinator never
//! initiates a GC cycle.

use crate::types::{Digest, DiffEntry, Key, MutationBatch, RangeDescriptor, SnapshotId, Value};
use thiserror::Error;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Failures surfaced from an engine or chunk store implementation.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("unknown snapshot: {0}")]
    UnknownSnapshot(SnapshotId),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Client contract for the immutable, content-addressed index.
///
/// Every operation is keyed by an explicit snapshot id; implementations
/// must never observe state through any other channel. `mutate` returns the
/// id of a new snapshot and leaves the base untouched.
pub trait TreeEngine: Send + Sync {
    /// Create an empty snapshot.
    fn create(&self) -> EngineResult<SnapshotId>;

    /// Apply a batch against `snapshot` and return the resulting snapshot.
    fn mutate(&self, snapshot: &SnapshotId, batch: &MutationBatch) -> EngineResult<SnapshotId>;

    /// Point lookup.
    fn get(&self, snapshot: &SnapshotId, key: &[u8]) -> EngineResult<Option<Value>>;

    /// Ordered range scan honoring every descriptor field.
    fn scan(
        &self,
        snapshot: &SnapshotId,
        range: &RangeDescriptor,
    ) -> EngineResult<Vec<(Key, Value)>>;

    /// Number of keys matched by the descriptor's bounds. Rejects
    /// descriptors carrying `offset` or `limit`.
    fn count(&self, snapshot: &SnapshotId, range: &RangeDescriptor) -> EngineResult<u64>;

    /// Key-wise difference between two snapshots over a range.
    fn diff(
        &self,
        left: &SnapshotId,
        right: &SnapshotId,
        range: &RangeDescriptor,
    ) -> EngineResult<Vec<DiffEntry>>;

    /// Fingerprint of a point lookup. Distinguishes an absent key from a
    /// present key with an empty value.
    fn fingerprint_get(&self, snapshot: &SnapshotId, key: &[u8]) -> EngineResult<Digest>;

    /// Fingerprint of a range scan. Every descriptor field is part of the
    /// input domain: the digest reflects the enumeration, not only the
    /// matched content.
    fn fingerprint_scan(&self, snapshot: &SnapshotId, range: &RangeDescriptor)
        -> EngineResult<Digest>;

    /// Combined value + fingerprint lookup. Engines able to answer both in
    /// one round trip should override the default.
    fn get_with_fingerprint(
        &self,
        snapshot: &SnapshotId,
        key: &[u8],
    ) -> EngineResult<(Option<Value>, Digest)> {
        Ok((self.get(snapshot, key)?, self.fingerprint_get(snapshot, key)?))
    }

    /// Combined scan + fingerprint. See [`TreeEngine::get_with_fingerprint`].
    fn scan_with_fingerprint(
        &self,
        snapshot: &SnapshotId,
        range: &RangeDescriptor,
    ) -> EngineResult<(Vec<(Key, Value)>, Digest)> {
        Ok((self.scan(snapshot, range)?, self.fingerprint_scan(snapshot, range)?))
    }
}

/// Counters reported by a chunk store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChunkStoreStats {
    pub chunks: u64,
    pub bytes: u64,
}

/// Outcome of a mark-and-sweep cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub swept: usize,
    pub retained: usize,
}

/// Content-addressed blob storage with mark-and-sweep garbage collection.
///
/// `put` is idempotent: storing the same bytes twice yields the same id.
/// GC is driven by the owner of the store, never by the coordinator:
/// `begin_gc_cycle`, then `mark_reachable` for every live root, then
/// `sweep`.
pub trait ChunkStore: Send + Sync {
    fn put(&self, bytes: &[u8]) -> EngineResult<Digest>;

    fn get(&self, id: &Digest) -> EngineResult<Option<Vec<u8>>>;

    fn has(&self, id: &Digest) -> bool;

    fn begin_gc_cycle(&self) -> EngineResult<()>;

    fn mark_reachable(&self, id: &Digest) -> EngineResult<()>;

    fn sweep(&self) -> EngineResult<SweepReport>;

    fn stats(&self) -> ChunkStoreStats;
}
