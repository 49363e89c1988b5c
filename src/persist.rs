//! Best-effort durable mirror of `{timeline, index}` metadata.
//!
//! Only the small pointer metadata is persisted here; snapshot data lives
//! in the chunk store behind the engine. Saves are fire-and-forget on a
//! background thread: a failed save is logged and never surfaced to the
//! timeline operation that triggered it. A failed or malformed load at
//! startup falls back to fresh initialization.

use crate::types::SnapshotId;
use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use tracing::warn;

/// Magic bytes for the metadata file.
const META_MAGIC: &[u8; 4] = b"ALM\0";

/// Current metadata format version.
const META_VERSION: u8 = 1;

pub type PersistResult<T> = std::result::Result<T, PersistError>;

#[derive(thiserror::Error, Debug)]
pub enum PersistError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("invalid format: {0}")]
    InvalidFormat(String),
}

/// The persisted pair. Timeline and index are always written together so a
/// torn read at startup cannot reference an index outside the saved
/// timeline's bounds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineMeta {
    pub timeline: Vec<SnapshotId>,
    pub index: usize,
}

impl TimelineMeta {
    pub fn is_well_formed(&self) -> bool {
        !self.timeline.is_empty()
            && self.index < self.timeline.len()
            && self.timeline.iter().all(|id| !id.is_empty())
    }
}

/// Durable storage for timeline metadata.
pub trait MetaStore: Send {
    fn save(&self, meta: &TimelineMeta) -> PersistResult<()>;

    /// `Ok(None)` means nothing has been persisted yet.
    fn load(&self) -> PersistResult<Option<TimelineMeta>>;
}

/// One metadata file per store name: `<dir>/<name>.meta`.
pub struct FileMetaStore {
    path: PathBuf,
}

impl FileMetaStore {
    pub fn new(dir: impl AsRef<Path>, store_name: &str) -> PersistResult<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join(format!("{store_name}.meta")),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetaStore for FileMetaStore {
    fn save(&self, meta: &TimelineMeta) -> PersistResult<()> {
        let encoded =
            rmp_serde::to_vec(meta).map_err(|e| PersistError::Encode(e.to_string()))?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;

        file.write_all(META_MAGIC)?;
        file.write_all(&[META_VERSION])?;
        file.write_all(&(encoded.len() as u64).to_le_bytes())?;
        file.write_all(&encoded)?;
        file.sync_all()?;
        Ok(())
    }

    fn load(&self) -> PersistResult<Option<TimelineMeta>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&self.path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != META_MAGIC {
            return Err(PersistError::InvalidFormat("bad metadata magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != META_VERSION {
            return Err(PersistError::InvalidFormat(format!(
                "unsupported metadata version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes) as usize;

        let mut encoded = vec![0u8; len];
        file.read_exact(&mut encoded)?;

        let meta =
            rmp_serde::from_slice(&encoded).map_err(|e| PersistError::Decode(e.to_string()))?;
        Ok(Some(meta))
    }
}

/// Background writer. Feeds every timeline mutation to the meta store
/// without blocking the caller; bursts coalesce to the newest pending
/// metadata.
pub(crate) struct Persister {
    tx: Mutex<Option<Sender<TimelineMeta>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Persister {
    pub(crate) fn spawn(store: Box<dyn MetaStore>) -> Self {
        let (tx, rx) = unbounded::<TimelineMeta>();
        let worker = std::thread::spawn(move || {
            while let Ok(mut meta) = rx.recv() {
                while let Ok(newer) = rx.try_recv() {
                    meta = newer;
                }
                if let Err(err) = store.save(&meta) {
                    warn!(error = %err, "timeline metadata save failed");
                }
            }
        });

        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue a save. Never blocks and never reports failure to the caller.
    pub(crate) fn persist(&self, meta: TimelineMeta) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(meta);
        }
    }

    /// Drain pending saves and stop the worker. Idempotent.
    pub(crate) fn shutdown(&self) {
        self.tx.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Persister {
    fn drop(&mut self) {
        self.shutdown();
    }
}
