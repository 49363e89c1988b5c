//! In-memory reference implementations of the engine and chunk store
//! contracts, useful for tests and default flows.
//!
//! Snapshots are whole key-value maps encoded with MessagePack and stored
//! as chunks; ids are BLAKE3 hashes of the encoded bytes, so byte-identical
//! states always share one id. Fingerprints hash the observed rows together
//! with every descriptor parameter.

use crate::engine::{ChunkStore, ChunkStoreStats, EngineError, EngineResult, SweepReport, TreeEngine};
use crate::types::{Digest, DiffEntry, Key, MutationBatch, RangeDescriptor, SnapshotId, Value};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::Bound;
use std::sync::Arc;

fn hash_bytes(bytes: &[u8]) -> Digest {
    Digest::from_bytes(*blake3::hash(bytes).as_bytes())
}

/// Chunk store backed by a process-local map.
#[derive(Default)]
pub struct MemoryChunkStore {
    chunks: RwLock<HashMap<Digest, Vec<u8>>>,
    /// Reachable set of the in-progress GC cycle, if any.
    gc_marks: Mutex<Option<HashSet<Digest>>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChunkStore for MemoryChunkStore {
    fn put(&self, bytes: &[u8]) -> EngineResult<Digest> {
        let id = hash_bytes(bytes);
        self.chunks.write().entry(id).or_insert_with(|| bytes.to_vec());
        Ok(id)
    }

    fn get(&self, id: &Digest) -> EngineResult<Option<Vec<u8>>> {
        Ok(self.chunks.read().get(id).cloned())
    }

    fn has(&self, id: &Digest) -> bool {
        self.chunks.read().contains_key(id)
    }

    fn begin_gc_cycle(&self) -> EngineResult<()> {
        let mut marks = self.gc_marks.lock();
        if marks.is_some() {
            return Err(EngineError::InvalidOperation(
                "gc cycle already in progress".into(),
            ));
        }
        *marks = Some(HashSet::new());
        Ok(())
    }

    fn mark_reachable(&self, id: &Digest) -> EngineResult<()> {
        match self.gc_marks.lock().as_mut() {
            Some(marks) => {
                marks.insert(*id);
                Ok(())
            }
            None => Err(EngineError::InvalidOperation(
                "no gc cycle in progress".into(),
            )),
        }
    }

    fn sweep(&self) -> EngineResult<SweepReport> {
        let marks = self
            .gc_marks
            .lock()
            .take()
            .ok_or_else(|| EngineError::InvalidOperation("no gc cycle in progress".into()))?;

        let mut chunks = self.chunks.write();
        let before = chunks.len();
        chunks.retain(|id, _| marks.contains(id));
        Ok(SweepReport {
            swept: before - chunks.len(),
            retained: chunks.len(),
        })
    }

    fn stats(&self) -> ChunkStoreStats {
        let chunks = self.chunks.read();
        ChunkStoreStats {
            chunks: chunks.len() as u64,
            bytes: chunks.values().map(|c| c.len() as u64).sum(),
        }
    }
}

/// Tree engine backed by a chunk store, one encoded map per snapshot.
pub struct MemoryEngine {
    chunks: Arc<dyn ChunkStore>,
    /// Snapshot id -> chunk holding the encoded map.
    roots: RwLock<HashMap<SnapshotId, Digest>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::with_chunk_store(Arc::new(MemoryChunkStore::new()))
    }

    pub fn with_chunk_store(chunks: Arc<dyn ChunkStore>) -> Self {
        Self {
            chunks,
            roots: RwLock::new(HashMap::new()),
        }
    }

    pub fn chunk_store(&self) -> &Arc<dyn ChunkStore> {
        &self.chunks
    }

    fn load(&self, snapshot: &SnapshotId) -> EngineResult<BTreeMap<Key, Value>> {
        let chunk_id = self
            .roots
            .read()
            .get(snapshot)
            .copied()
            .ok_or_else(|| EngineError::UnknownSnapshot(snapshot.clone()))?;

        let bytes = self
            .chunks
            .get(&chunk_id)?
            .ok_or_else(|| EngineError::Storage(format!("missing chunk {}", chunk_id.to_hex())))?;

        rmp_serde::from_slice(&bytes).map_err(|e| EngineError::Storage(e.to_string()))
    }

    fn store(&self, map: &BTreeMap<Key, Value>) -> EngineResult<SnapshotId> {
        let bytes = rmp_serde::to_vec(map).map_err(|e| EngineError::Storage(e.to_string()))?;
        let chunk_id = self.chunks.put(&bytes)?;
        let id = SnapshotId::from_bytes(chunk_id.as_bytes().as_slice());
        self.roots.write().insert(id.clone(), chunk_id);
        Ok(id)
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn check_bounds(range: &RangeDescriptor) -> EngineResult<()> {
    if let (Some(start), Some(end)) = (&range.start_key, &range.end_key) {
        if start > end {
            return Err(EngineError::InvalidRange(
                "start_key sorts after end_key".into(),
            ));
        }
    }
    Ok(())
}

fn key_in_bounds(key: &[u8], range: &RangeDescriptor) -> bool {
    use std::cmp::Ordering;
    if let Some(start) = &range.start_key {
        match key.cmp(start.as_slice()) {
            Ordering::Less => return false,
            Ordering::Equal if !range.start_inclusive => return false,
            _ => {}
        }
    }
    if let Some(end) = &range.end_key {
        match key.cmp(end.as_slice()) {
            Ordering::Greater => return false,
            Ordering::Equal if !range.end_inclusive => return false,
            _ => {}
        }
    }
    true
}

/// Rows matched by the descriptor's bounds, in ascending key order, before
/// direction and pagination are applied.
fn bounded_rows(map: &BTreeMap<Key, Value>, range: &RangeDescriptor) -> Vec<(Key, Value)> {
    // Equal bounds with either side exclusive is a valid, empty
    // enumeration; BTreeMap::range would panic on the doubly-excluded form.
    if let (Some(start), Some(end)) = (&range.start_key, &range.end_key) {
        if start == end && !(range.start_inclusive && range.end_inclusive) {
            return Vec::new();
        }
    }

    let start = match &range.start_key {
        Some(k) if range.start_inclusive => Bound::Included(k.clone()),
        Some(k) => Bound::Excluded(k.clone()),
        None => Bound::Unbounded,
    };
    let end = match &range.end_key {
        Some(k) if range.end_inclusive => Bound::Included(k.clone()),
        Some(k) => Bound::Excluded(k.clone()),
        None => Bound::Unbounded,
    };

    map.range((start, end))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Full enumeration for a descriptor: bounds, direction, then pagination.
fn select_rows(map: &BTreeMap<Key, Value>, range: &RangeDescriptor) -> Vec<(Key, Value)> {
    let mut rows = bounded_rows(map, range);
    if range.reverse {
        rows.reverse();
    }
    let mut rows: Vec<_> = rows.into_iter().skip(range.offset).collect();
    if let Some(limit) = range.limit {
        rows.truncate(limit);
    }
    rows
}

fn hash_range_params(hasher: &mut blake3::Hasher, range: &RangeDescriptor) {
    for bound in [&range.start_key, &range.end_key] {
        match bound {
            Some(key) => {
                hasher.update(&[1]);
                hasher.update(&(key.len() as u64).to_le_bytes());
                hasher.update(key);
            }
            None => {
                hasher.update(&[0]);
            }
        }
    }
    hasher.update(&[
        range.start_inclusive as u8,
        range.end_inclusive as u8,
        range.reverse as u8,
    ]);
    hasher.update(&(range.offset as u64).to_le_bytes());
    match range.limit {
        Some(limit) => {
            hasher.update(&[1]);
            hasher.update(&(limit as u64).to_le_bytes());
        }
        None => {
            hasher.update(&[0]);
        }
    }
}

fn leaf_digest(key: &[u8], value: Option<&[u8]>) -> Digest {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"leaf");
    hasher.update(&(key.len() as u64).to_le_bytes());
    hasher.update(key);
    match value {
        Some(v) => {
            hasher.update(&[1]);
            hasher.update(&(v.len() as u64).to_le_bytes());
            hasher.update(v);
        }
        None => {
            hasher.update(&[0]);
        }
    }
    Digest::from_bytes(*hasher.finalize().as_bytes())
}

fn range_digest(range: &RangeDescriptor, rows: &[(Key, Value)]) -> Digest {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"range");
    hash_range_params(&mut hasher, range);
    for (key, value) in rows {
        hasher.update(&(key.len() as u64).to_le_bytes());
        hasher.update(key);
        hasher.update(&(value.len() as u64).to_le_bytes());
        hasher.update(value);
    }
    Digest::from_bytes(*hasher.finalize().as_bytes())
}

impl TreeEngine for MemoryEngine {
    fn create(&self) -> EngineResult<SnapshotId> {
        self.store(&BTreeMap::new())
    }

    fn mutate(&self, snapshot: &SnapshotId, batch: &MutationBatch) -> EngineResult<SnapshotId> {
        for (key, _) in &batch.set {
            if key.is_empty() {
                return Err(EngineError::InvalidOperation("empty key in batch".into()));
            }
        }
        for key in &batch.del {
            if key.is_empty() {
                return Err(EngineError::InvalidOperation("empty key in batch".into()));
            }
        }

        let mut map = self.load(snapshot)?;
        for (key, value) in &batch.set {
            map.insert(key.clone(), value.clone());
        }
        for key in &batch.del {
            map.remove(key);
        }
        self.store(&map)
    }

    fn get(&self, snapshot: &SnapshotId, key: &[u8]) -> EngineResult<Option<Value>> {
        Ok(self.load(snapshot)?.get(key).cloned())
    }

    fn scan(
        &self,
        snapshot: &SnapshotId,
        range: &RangeDescriptor,
    ) -> EngineResult<Vec<(Key, Value)>> {
        check_bounds(range)?;
        Ok(select_rows(&self.load(snapshot)?, range))
    }

    fn count(&self, snapshot: &SnapshotId, range: &RangeDescriptor) -> EngineResult<u64> {
        if range.has_pagination() {
            return Err(EngineError::InvalidOperation(
                "count does not accept offset or limit".into(),
            ));
        }
        check_bounds(range)?;
        Ok(bounded_rows(&self.load(snapshot)?, range).len() as u64)
    }

    fn diff(
        &self,
        left: &SnapshotId,
        right: &SnapshotId,
        range: &RangeDescriptor,
    ) -> EngineResult<Vec<DiffEntry>> {
        check_bounds(range)?;
        let left_map = self.load(left)?;
        let right_map = self.load(right)?;

        let keys: BTreeSet<Key> = left_map
            .keys()
            .chain(right_map.keys())
            .filter(|key| key_in_bounds(key, range))
            .cloned()
            .collect();

        let mut entries: Vec<DiffEntry> = keys
            .into_iter()
            .filter_map(|key| {
                let l = left_map.get(&key).cloned();
                let r = right_map.get(&key).cloned();
                if l == r {
                    None
                } else {
                    Some(DiffEntry { key, left: l, right: r })
                }
            })
            .collect();

        if range.reverse {
            entries.reverse();
        }
        let mut entries: Vec<_> = entries.into_iter().skip(range.offset).collect();
        if let Some(limit) = range.limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    fn fingerprint_get(&self, snapshot: &SnapshotId, key: &[u8]) -> EngineResult<Digest> {
        let map = self.load(snapshot)?;
        Ok(leaf_digest(key, map.get(key).map(|v| v.as_slice())))
    }

    fn fingerprint_scan(
        &self,
        snapshot: &SnapshotId,
        range: &RangeDescriptor,
    ) -> EngineResult<Digest> {
        check_bounds(range)?;
        let rows = select_rows(&self.load(snapshot)?, range);
        Ok(range_digest(range, &rows))
    }

    fn get_with_fingerprint(
        &self,
        snapshot: &SnapshotId,
        key: &[u8],
    ) -> EngineResult<(Option<Value>, Digest)> {
        let map = self.load(snapshot)?;
        let value = map.get(key).cloned();
        let digest = leaf_digest(key, value.as_deref());
        Ok((value, digest))
    }

    fn scan_with_fingerprint(
        &self,
        snapshot: &SnapshotId,
        range: &RangeDescriptor,
    ) -> EngineResult<(Vec<(Key, Value)>, Digest)> {
        check_bounds(range)?;
        let rows = select_rows(&self.load(snapshot)?, range);
        let digest = range_digest(range, &rows);
        Ok((rows, digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with(entries: &[(&[u8], &[u8])]) -> (MemoryEngine, SnapshotId) {
        let engine = MemoryEngine::new();
        let base = engine.create().unwrap();
        let mut batch = MutationBatch::new();
        for (k, v) in entries {
            batch = batch.set(k.to_vec(), v.to_vec());
        }
        let snap = engine.mutate(&base, &batch).unwrap();
        (engine, snap)
    }

    #[test]
    fn identical_content_shares_one_id() {
        let engine = MemoryEngine::new();
        let base = engine.create().unwrap();

        let a = engine
            .mutate(&base, &MutationBatch::new().set(*b"k", *b"v"))
            .unwrap();
        let b = engine
            .mutate(&base, &MutationBatch::new().set(*b"k", *b"v"))
            .unwrap();
        assert_eq!(a, b);

        // Removing the key again round-trips to the empty snapshot's id.
        let emptied = engine.mutate(&a, &MutationBatch::new().del(*b"k")).unwrap();
        assert_eq!(emptied, base);
    }

    #[test]
    fn mutate_applies_sets_then_deletes() {
        let (engine, snap) = engine_with(&[(b"a", b"1"), (b"b", b"2")]);
        let next = engine
            .mutate(&snap, &MutationBatch::new().set(*b"c", *b"3").del(*b"a"))
            .unwrap();

        assert_eq!(engine.get(&next, b"a").unwrap(), None);
        assert_eq!(engine.get(&next, b"c").unwrap(), Some(b"3".to_vec()));
        // Base snapshot is untouched.
        assert_eq!(engine.get(&snap, b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn mutate_rejects_empty_keys() {
        let engine = MemoryEngine::new();
        let base = engine.create().unwrap();
        let err = engine
            .mutate(&base, &MutationBatch::new().set(Vec::new(), *b"v"))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidOperation(_)));
    }

    #[test]
    fn unknown_snapshot_is_an_error() {
        let engine = MemoryEngine::new();
        let bogus = SnapshotId::from_bytes(*b"nope");
        assert!(matches!(
            engine.get(&bogus, b"k"),
            Err(EngineError::UnknownSnapshot(_))
        ));
    }

    #[test]
    fn scan_honors_bounds_and_inclusivity() {
        let (engine, snap) = engine_with(&[(b"a", b"1"), (b"b", b"2"), (b"c", b"3"), (b"d", b"4")]);

        let rows = engine
            .scan(&snap, &RangeDescriptor::between(*b"b", *b"d"))
            .unwrap();
        assert_eq!(
            rows.iter().map(|(k, _)| k.as_slice()).collect::<Vec<_>>(),
            vec![b"b".as_slice(), b"c".as_slice()]
        );

        let rows = engine
            .scan(
                &snap,
                &RangeDescriptor::between(*b"b", *b"d")
                    .start_inclusive(false)
                    .end_inclusive(true),
            )
            .unwrap();
        assert_eq!(
            rows.iter().map(|(k, _)| k.as_slice()).collect::<Vec<_>>(),
            vec![b"c".as_slice(), b"d".as_slice()]
        );
    }

    #[test]
    fn scan_applies_direction_then_pagination() {
        let (engine, snap) = engine_with(&[(b"a", b"1"), (b"b", b"2"), (b"c", b"3"), (b"d", b"4")]);

        let rows = engine
            .scan(
                &snap,
                &RangeDescriptor::all().reversed(true).with_offset(1).with_limit(2),
            )
            .unwrap();
        assert_eq!(
            rows.iter().map(|(k, _)| k.as_slice()).collect::<Vec<_>>(),
            vec![b"c".as_slice(), b"b".as_slice()]
        );

        // Offset past the end clips to empty.
        let rows = engine
            .scan(&snap, &RangeDescriptor::all().with_offset(10))
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn scan_with_equal_bounds_degenerates_cleanly() {
        let (engine, snap) = engine_with(&[(b"b", b"2")]);

        // End-exclusive by default: empty, not a panic.
        let rows = engine
            .scan(&snap, &RangeDescriptor::between(*b"b", *b"b"))
            .unwrap();
        assert!(rows.is_empty());

        let rows = engine
            .scan(
                &snap,
                &RangeDescriptor::between(*b"b", *b"b").end_inclusive(true),
            )
            .unwrap();
        assert_eq!(rows.len(), 1);

        let rows = engine
            .scan(
                &snap,
                &RangeDescriptor::between(*b"b", *b"b")
                    .start_inclusive(false)
                    .end_inclusive(true),
            )
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn scan_rejects_inverted_bounds() {
        let (engine, snap) = engine_with(&[(b"a", b"1")]);
        let err = engine
            .scan(&snap, &RangeDescriptor::between(*b"z", *b"a"))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRange(_)));
    }

    #[test]
    fn count_rejects_pagination() {
        let (engine, snap) = engine_with(&[(b"a", b"1"), (b"b", b"2")]);

        assert_eq!(engine.count(&snap, &RangeDescriptor::all()).unwrap(), 2);

        let err = engine
            .count(&snap, &RangeDescriptor::all().with_limit(1))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidOperation(_)));
        let err = engine
            .count(&snap, &RangeDescriptor::all().with_offset(1))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidOperation(_)));
    }

    #[test]
    fn diff_reports_changes_between_snapshots() {
        let (engine, left) = engine_with(&[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")]);
        let right = engine
            .mutate(
                &left,
                &MutationBatch::new().set(*b"b", *b"20").set(*b"d", *b"4").del(*b"a"),
            )
            .unwrap();

        let entries = engine.diff(&left, &right, &RangeDescriptor::all()).unwrap();
        assert_eq!(
            entries,
            vec![
                DiffEntry { key: b"a".to_vec(), left: Some(b"1".to_vec()), right: None },
                DiffEntry {
                    key: b"b".to_vec(),
                    left: Some(b"2".to_vec()),
                    right: Some(b"20".to_vec()),
                },
                DiffEntry { key: b"d".to_vec(), left: None, right: Some(b"4".to_vec()) },
            ]
        );

        // Unchanged keys never appear.
        assert!(entries.iter().all(|e| e.key != b"c".to_vec()));
    }

    #[test]
    fn fingerprint_distinguishes_absent_from_empty_value() {
        let engine = MemoryEngine::new();
        let base = engine.create().unwrap();
        let with_empty = engine
            .mutate(&base, &MutationBatch::new().set(*b"k", Vec::new()))
            .unwrap();

        let absent = engine.fingerprint_get(&base, b"k").unwrap();
        let empty = engine.fingerprint_get(&with_empty, b"k").unwrap();
        assert_ne!(absent, empty);
    }

    #[test]
    fn fingerprint_tracks_enumeration_not_just_content() {
        let (engine, snap) = engine_with(&[(b"a", b"1"), (b"b", b"2")]);

        let forward = engine
            .fingerprint_scan(&snap, &RangeDescriptor::all())
            .unwrap();
        let reverse = engine
            .fingerprint_scan(&snap, &RangeDescriptor::all().reversed(true))
            .unwrap();
        assert_ne!(forward, reverse);

        // Same descriptor, same snapshot: deterministic.
        let again = engine
            .fingerprint_scan(&snap, &RangeDescriptor::all())
            .unwrap();
        assert_eq!(forward, again);
    }

    #[test]
    fn fingerprint_is_stable_across_equal_content() {
        let (engine, a) = engine_with(&[(b"k", b"v")]);
        let (other, b) = engine_with(&[(b"k", b"v")]);
        assert_eq!(a, b);
        assert_eq!(
            engine.fingerprint_scan(&a, &RangeDescriptor::all()).unwrap(),
            other.fingerprint_scan(&b, &RangeDescriptor::all()).unwrap()
        );
    }

    #[test]
    fn combined_forms_match_their_parts() {
        let (engine, snap) = engine_with(&[(b"a", b"1")]);

        let (value, digest) = engine.get_with_fingerprint(&snap, b"a").unwrap();
        assert_eq!(value, Some(b"1".to_vec()));
        assert_eq!(digest, engine.fingerprint_get(&snap, b"a").unwrap());

        let range = RangeDescriptor::all();
        let (rows, digest) = engine.scan_with_fingerprint(&snap, &range).unwrap();
        assert_eq!(rows, engine.scan(&snap, &range).unwrap());
        assert_eq!(digest, engine.fingerprint_scan(&snap, &range).unwrap());
    }

    #[test]
    fn chunk_store_mark_and_sweep() {
        let store = MemoryChunkStore::new();
        let keep = store.put(b"keep").unwrap();
        let stale = store.put(b"stale").unwrap();
        assert!(store.has(&keep) && store.has(&stale));

        // Marking outside a cycle is rejected.
        assert!(store.mark_reachable(&keep).is_err());

        store.begin_gc_cycle().unwrap();
        store.mark_reachable(&keep).unwrap();
        let report = store.sweep().unwrap();
        assert_eq!(report, SweepReport { swept: 1, retained: 1 });

        assert!(store.has(&keep));
        assert!(!store.has(&stale));
        assert_eq!(store.stats().chunks, 1);
    }

    #[test]
    fn chunk_store_put_is_idempotent() {
        let store = MemoryChunkStore::new();
        let a = store.put(b"bytes").unwrap();
        let b = store.put(b"bytes").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.stats().chunks, 1);
        assert_eq!(store.get(&a).unwrap(), Some(b"bytes".to_vec()));
    }
}
