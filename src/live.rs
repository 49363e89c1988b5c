//! Live read subscriptions driven by content fingerprints.
//!
//! Each subscription caches `{descriptor, last fingerprint, last value}`.
//! When the current snapshot changes, the subscription is re-evaluated on a
//! dedicated thread: first a cheap fingerprint, then a full fetch only if
//! the fingerprint differs. Every evaluation is tagged with the snapshot it
//! targets; a completion whose tag no longer matches the latest requested
//! snapshot for that subscription is discarded, so a slow evaluation of an
//! older snapshot can never overwrite a newer result.

use crate::engine::{EngineResult, TreeEngine};
use crate::types::{Digest, Key, ReadDescriptor, SnapshotId, Value};
use crossbeam_channel::{unbounded, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::warn;

pub type LiveId = u64;

/// What a live query yields: a point lookup or a range enumeration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryValue {
    Entry(Option<Value>),
    Rows(Vec<(Key, Value)>),
}

/// Delivered only when the observed data actually changed. An evaluation
/// that finds an unchanged fingerprint produces no event and keeps the
/// cached value's identity.
#[derive(Clone, Debug)]
pub enum LiveEvent {
    Changed {
        snapshot: SnapshotId,
        value: Arc<QueryValue>,
    },
}

/// Evaluation counters for one subscription.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LiveStats {
    /// Evaluations that ran to the fingerprint-comparison point.
    pub evaluations: u64,
    /// Evaluations that found an unchanged fingerprint.
    pub unchanged: u64,
    /// Evaluations that replaced the cached value.
    pub changed: u64,
}

struct SubInner {
    /// The newest snapshot requested for this subscription. Evaluations
    /// carrying any other tag are stale and discarded.
    latest_target: SnapshotId,
    last_digest: Option<Digest>,
    cached: Option<Arc<QueryValue>>,
    stats: LiveStats,
}

struct SubState {
    descriptor: ReadDescriptor,
    tx: Sender<LiveEvent>,
    inner: Mutex<SubInner>,
}

/// Receiving side of a subscription.
pub struct LiveHandle {
    id: LiveId,
    rx: Receiver<LiveEvent>,
    sub: Arc<SubState>,
}

impl LiveHandle {
    pub fn id(&self) -> LiveId {
        self.id
    }

    pub fn descriptor(&self) -> &ReadDescriptor {
        &self.sub.descriptor
    }

    /// The currently cached value, if an evaluation has completed. Returns
    /// the same `Arc` until a changed fingerprint replaces the cache.
    pub fn value(&self) -> Option<Arc<QueryValue>> {
        self.sub.inner.lock().cached.clone()
    }

    pub fn stats(&self) -> LiveStats {
        self.sub.inner.lock().stats
    }

    pub fn recv(&self) -> Result<LiveEvent, RecvError> {
        self.rx.recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<LiveEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Result<LiveEvent, TryRecvError> {
        self.rx.try_recv()
    }
}

struct EvalJob {
    id: LiveId,
    snapshot: SnapshotId,
}

#[derive(Default)]
struct Registry {
    subs: Mutex<HashMap<LiveId, Arc<SubState>>>,
}

/// Owns the subscription registry and the evaluation worker.
pub(crate) struct LiveQueryManager {
    registry: Arc<Registry>,
    next_id: AtomicU64,
    eval_tx: Mutex<Option<Sender<EvalJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LiveQueryManager {
    pub(crate) fn spawn(engine: Arc<dyn TreeEngine>) -> Self {
        let registry = Arc::new(Registry::default());
        let (tx, rx) = unbounded::<EvalJob>();
        let worker = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || run_evaluations(registry, engine, rx))
        };

        Self {
            registry,
            next_id: AtomicU64::new(1),
            eval_tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Register a descriptor and schedule its first evaluation against
    /// `current`.
    pub(crate) fn watch(&self, descriptor: ReadDescriptor, current: SnapshotId) -> LiveHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = unbounded();
        let sub = Arc::new(SubState {
            descriptor,
            tx,
            inner: Mutex::new(SubInner {
                latest_target: current.clone(),
                last_digest: None,
                cached: None,
                stats: LiveStats::default(),
            }),
        });

        self.registry.subs.lock().insert(id, Arc::clone(&sub));
        self.enqueue(EvalJob { id, snapshot: current });

        LiveHandle { id, rx, sub }
    }

    /// Remove a subscription. Future evaluations stop immediately; an
    /// already in-flight evaluation completes and is discarded.
    pub(crate) fn unwatch(&self, id: LiveId) {
        self.registry.subs.lock().remove(&id);
    }

    /// Stamp every active subscription with the new snapshot and schedule
    /// one evaluation each.
    pub(crate) fn notify(&self, snapshot: SnapshotId) {
        let jobs: Vec<EvalJob> = {
            let subs = self.registry.subs.lock();
            subs.iter()
                .map(|(&id, sub)| {
                    sub.inner.lock().latest_target = snapshot.clone();
                    EvalJob { id, snapshot: snapshot.clone() }
                })
                .collect()
        };
        for job in jobs {
            self.enqueue(job);
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.registry.subs.lock().len()
    }

    pub(crate) fn shutdown(&self) {
        self.eval_tx.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
        self.registry.subs.lock().clear();
    }

    fn enqueue(&self, job: EvalJob) {
        if let Some(tx) = self.eval_tx.lock().as_ref() {
            let _ = tx.send(job);
        }
    }
}

impl Drop for LiveQueryManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn fingerprint(
    engine: &Arc<dyn TreeEngine>,
    descriptor: &ReadDescriptor,
    snapshot: &SnapshotId,
) -> EngineResult<Digest> {
    match descriptor {
        ReadDescriptor::Key(key) => engine.fingerprint_get(snapshot, key),
        ReadDescriptor::Range(range) => engine.fingerprint_scan(snapshot, range),
    }
}

fn fetch(
    engine: &Arc<dyn TreeEngine>,
    descriptor: &ReadDescriptor,
    snapshot: &SnapshotId,
) -> EngineResult<QueryValue> {
    match descriptor {
        ReadDescriptor::Key(key) => Ok(QueryValue::Entry(engine.get(snapshot, key)?)),
        ReadDescriptor::Range(range) => Ok(QueryValue::Rows(engine.scan(snapshot, range)?)),
    }
}

fn run_evaluations(registry: Arc<Registry>, engine: Arc<dyn TreeEngine>, rx: Receiver<EvalJob>) {
    for job in rx.iter() {
        let Some(sub) = registry.subs.lock().get(&job.id).cloned() else {
            continue; // unsubscribed
        };

        // Skip outright if a newer transition already superseded this job.
        if sub.inner.lock().latest_target != job.snapshot {
            continue;
        }

        let digest = match fingerprint(&engine, &sub.descriptor, &job.snapshot) {
            Ok(digest) => digest,
            Err(err) => {
                warn!(error = %err, "live query fingerprint failed");
                continue;
            }
        };

        {
            let mut inner = sub.inner.lock();
            if inner.latest_target != job.snapshot {
                continue;
            }
            inner.stats.evaluations += 1;
            if inner.last_digest == Some(digest) {
                // Unchanged: keep the cached value and its identity.
                inner.stats.unchanged += 1;
                continue;
            }
        }

        // Changed: fetch the full result outside the lock.
        let value = match fetch(&engine, &sub.descriptor, &job.snapshot) {
            Ok(value) => Arc::new(value),
            Err(err) => {
                warn!(error = %err, "live query fetch failed");
                continue;
            }
        };

        {
            let mut inner = sub.inner.lock();
            if inner.latest_target != job.snapshot {
                // A newer evaluation was requested while we fetched;
                // discard rather than overwrite.
                continue;
            }
            inner.last_digest = Some(digest);
            inner.cached = Some(Arc::clone(&value));
            inner.stats.changed += 1;
        }

        let event = LiveEvent::Changed {
            snapshot: job.snapshot.clone(),
            value,
        };
        if sub.tx.send(event).is_err() {
            // Receiver is gone; drop the subscription.
            registry.subs.lock().remove(&job.id);
        }
    }
}
