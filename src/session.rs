//! The coordinator tying timeline, write serialization, persistence and
//! live queries together behind one session.
//!
//! A session is an explicitly constructed, exclusively owned instance:
//! independent sessions never share timeline state. All commit-producing
//! operations flow through the write serializer; undo and redo are
//! synchronous pointer moves, atomic with respect to in-flight commits;
//! reads capture the current snapshot once, up front, so a concurrent
//! write cannot change the semantics of an in-flight read.

use crate::engine::TreeEngine;
use crate::error::{Result, SessionError};
use crate::live::{LiveHandle, LiveId, LiveQueryManager};
use crate::persist::{MetaStore, Persister};
use crate::timeline::Timeline;
use crate::types::{
    DiffEntry, Digest, HistoryDirection, HistoryPage, Key, MutationBatch, RangeDescriptor,
    ReadDescriptor, SnapshotId, Value,
};
use crate::writer::{self, MutationTicket, PendingWrite, WriteCommand};
use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// State shared between the session front end and its worker threads.
pub(crate) struct Shared {
    pub(crate) engine: Arc<dyn TreeEngine>,
    pub(crate) timeline: Mutex<Timeline>,
    pub(crate) persister: Persister,
    pub(crate) live: LiveQueryManager,
}

impl Shared {
    /// Append a snapshot, mirror the new metadata, and wake live queries.
    /// The timeline lock is held only for the pointer mutation itself.
    pub(crate) fn commit(&self, id: SnapshotId) {
        let (meta, current) = {
            let mut timeline = self.timeline.lock();
            timeline.commit(id);
            (timeline.meta(), timeline.current().clone())
        };
        self.persister.persist(meta);
        self.live.notify(current);
    }
}

/// Point-in-time counters for a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionStats {
    pub timeline_len: usize,
    pub current_index: usize,
    pub history_offset: usize,
    pub live_queries: usize,
}

/// One logical session over an engine and a metadata store.
pub struct Session {
    shared: Arc<Shared>,
    write_tx: Mutex<Option<Sender<PendingWrite>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Open a session: adopt persisted `{timeline, index}` metadata when it
    /// is well-formed, otherwise seed a fresh timeline with a new empty
    /// snapshot. Load failures degrade to fresh initialization, never to an
    /// open error.
    pub fn open(engine: Arc<dyn TreeEngine>, meta_store: Box<dyn MetaStore>) -> Result<Self> {
        let timeline = match meta_store.load() {
            Ok(Some(meta)) => match Timeline::from_meta(meta) {
                Some(timeline) => {
                    debug!(
                        entries = timeline.len(),
                        index = timeline.current_index(),
                        "adopted persisted timeline"
                    );
                    timeline
                }
                None => {
                    warn!("persisted timeline metadata is malformed; starting fresh");
                    Timeline::seed(engine.create()?)
                }
            },
            Ok(None) => Timeline::seed(engine.create()?),
            Err(err) => {
                warn!(error = %err, "failed to load timeline metadata; starting fresh");
                Timeline::seed(engine.create()?)
            }
        };

        let persister = Persister::spawn(meta_store);
        persister.persist(timeline.meta());

        let live = LiveQueryManager::spawn(Arc::clone(&engine));
        let shared = Arc::new(Shared {
            engine,
            timeline: Mutex::new(timeline),
            persister,
            live,
        });

        let (write_tx, write_rx) = unbounded();
        let worker = {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || writer::run(shared, write_rx))
        };

        Ok(Self {
            shared,
            write_tx: Mutex::new(Some(write_tx)),
            writer: Mutex::new(Some(worker)),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.write_tx.lock().is_some() {
            Ok(())
        } else {
            Err(SessionError::NotReady)
        }
    }

    fn enqueue(&self, command: WriteCommand) -> Result<MutationTicket> {
        let guard = self.write_tx.lock();
        let tx = guard.as_ref().ok_or(SessionError::NotReady)?;
        let (done, ticket) = writer::ticket();
        tx.send(PendingWrite { command, done })
            .map_err(|_| SessionError::NotReady)?;
        Ok(ticket)
    }

    // --- Write path ---

    /// Queue a mutation batch. Batches apply one at a time, in submission
    /// order, each against the snapshot that is current when it is
    /// dequeued.
    pub fn submit(&self, batch: MutationBatch) -> Result<MutationTicket> {
        self.enqueue(WriteCommand::Mutate(batch))
    }

    /// Submit and wait for the commit.
    pub fn mutate(&self, batch: MutationBatch) -> Result<SnapshotId> {
        self.submit(batch)?.wait()
    }

    /// Commit an externally supplied snapshot id. Serialized with ordinary
    /// mutations and undoable exactly like any other commit.
    pub fn checkout(&self, id: SnapshotId) -> Result<SnapshotId> {
        if id.is_empty() {
            return Err(SessionError::InvalidCheckout);
        }
        self.enqueue(WriteCommand::Checkout(id))?.wait()
    }

    /// Create an empty snapshot. Delegated verbatim; does not touch the
    /// timeline.
    pub fn create_snapshot(&self) -> Result<SnapshotId> {
        self.ensure_open()?;
        Ok(self.shared.engine.create()?)
    }

    // --- Timeline pointer ---

    /// Step back one entry. Returns `false` at the first entry.
    pub fn undo(&self) -> Result<bool> {
        self.pointer_move(Timeline::undo)
    }

    /// Step forward one entry. Returns `false` at the tip.
    pub fn redo(&self) -> Result<bool> {
        self.pointer_move(Timeline::redo)
    }

    fn pointer_move(&self, op: fn(&mut Timeline) -> bool) -> Result<bool> {
        self.ensure_open()?;
        let (meta, current) = {
            let mut timeline = self.shared.timeline.lock();
            if !op(&mut timeline) {
                return Ok(false);
            }
            (timeline.meta(), timeline.current().clone())
        };
        self.shared.persister.persist(meta);
        self.shared.live.notify(current);
        Ok(true)
    }

    /// Page through history on either side of the pointer.
    pub fn history_scan(
        &self,
        offset: usize,
        limit: usize,
        direction: HistoryDirection,
    ) -> Result<HistoryPage> {
        self.ensure_open()?;
        Ok(self.shared.timeline.lock().scan(offset, limit, direction))
    }

    pub fn current_snapshot(&self) -> Result<SnapshotId> {
        self.ensure_open()?;
        Ok(self.shared.timeline.lock().current().clone())
    }

    /// The most recent commit ever made, regardless of pointer position.
    pub fn head(&self) -> Result<SnapshotId> {
        self.ensure_open()?;
        Ok(self.shared.timeline.lock().head().clone())
    }

    pub fn undo_available(&self) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.shared.timeline.lock().undo_available())
    }

    pub fn redo_available(&self) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.shared.timeline.lock().redo_available())
    }

    /// Distance of the pointer from the head; zero at the tip.
    pub fn history_offset(&self) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.shared.timeline.lock().offset_from_head())
    }

    // --- Read path ---
    //
    // Each read captures the snapshot id once, at the moment it starts.

    pub fn get(&self, key: &[u8]) -> Result<Option<Value>> {
        let snapshot = self.current_snapshot()?;
        Ok(self.shared.engine.get(&snapshot, key)?)
    }

    pub fn scan(&self, range: &RangeDescriptor) -> Result<Vec<(Key, Value)>> {
        let snapshot = self.current_snapshot()?;
        Ok(self.shared.engine.scan(&snapshot, range)?)
    }

    pub fn count(&self, range: &RangeDescriptor) -> Result<u64> {
        let snapshot = self.current_snapshot()?;
        Ok(self.shared.engine.count(&snapshot, range)?)
    }

    /// Key-wise difference between two snapshots, current or historical.
    pub fn diff(
        &self,
        left: &SnapshotId,
        right: &SnapshotId,
        range: &RangeDescriptor,
    ) -> Result<Vec<DiffEntry>> {
        self.ensure_open()?;
        Ok(self.shared.engine.diff(left, right, range)?)
    }

    pub fn fingerprint_get(&self, key: &[u8]) -> Result<Digest> {
        let snapshot = self.current_snapshot()?;
        Ok(self.shared.engine.fingerprint_get(&snapshot, key)?)
    }

    pub fn fingerprint_scan(&self, range: &RangeDescriptor) -> Result<Digest> {
        let snapshot = self.current_snapshot()?;
        Ok(self.shared.engine.fingerprint_scan(&snapshot, range)?)
    }

    pub fn get_with_fingerprint(&self, key: &[u8]) -> Result<(Option<Value>, Digest)> {
        let snapshot = self.current_snapshot()?;
        Ok(self.shared.engine.get_with_fingerprint(&snapshot, key)?)
    }

    pub fn scan_with_fingerprint(
        &self,
        range: &RangeDescriptor,
    ) -> Result<(Vec<(Key, Value)>, Digest)> {
        let snapshot = self.current_snapshot()?;
        Ok(self.shared.engine.scan_with_fingerprint(&snapshot, range)?)
    }

    // --- Live queries ---

    /// Observe a descriptor. The first evaluation runs against the current
    /// snapshot; afterwards the subscription re-evaluates once per snapshot
    /// transition and delivers an event only when the fingerprint changes.
    pub fn watch(&self, descriptor: ReadDescriptor) -> Result<LiveHandle> {
        let snapshot = self.current_snapshot()?;
        Ok(self.shared.live.watch(descriptor, snapshot))
    }

    /// Stop observing. Future evaluations stop immediately; an in-flight
    /// fetch, if any, completes and is discarded.
    pub fn unwatch(&self, id: LiveId) -> Result<()> {
        self.ensure_open()?;
        self.shared.live.unwatch(id);
        Ok(())
    }

    // --- Lifecycle ---

    pub fn stats(&self) -> Result<SessionStats> {
        self.ensure_open()?;
        let timeline = self.shared.timeline.lock();
        Ok(SessionStats {
            timeline_len: timeline.len(),
            current_index: timeline.current_index(),
            history_offset: timeline.offset_from_head(),
            live_queries: self.shared.live.count(),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.write_tx.lock().is_none()
    }

    /// Shut the session down. Already-queued writes are drained (they were
    /// never cancellable), then the worker threads are joined. Afterwards
    /// every operation fails with `NotReady`. Idempotent.
    pub fn close(&self) {
        self.write_tx.lock().take();
        if let Some(worker) = self.writer.lock().take() {
            let _ = worker.join();
        }
        self.shared.live.shutdown();
        self.shared.persister.shutdown();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
