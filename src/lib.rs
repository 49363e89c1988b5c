//! Client-side coordinator for an immutable, content-addressed key-value
//! index.
//!
//! A [`Session`] sits between an application and an external snapshot
//! engine and owns three things:
//!
//! - **Write serialization**: mutation batches are queued and applied one
//!   at a time against the latest committed snapshot, so concurrent
//!   writers never race or lose updates.
//! - **A linear timeline**: an append-only log of snapshot ids with an
//!   undo/redo pointer, explicit checkout to arbitrary snapshots, and
//!   bidirectional history paging. Commits issued while off the tip
//!   truncate the redo tail.
//! - **Live queries**: per-descriptor subscriptions that re-evaluate on
//!   snapshot transitions using cheap content fingerprints, fetching full
//!   results only when the observed data actually changed.
//!
//! The tree index itself and the chunk store beneath it are external
//! collaborators, reached through the [`TreeEngine`] and [`ChunkStore`]
//! traits. [`MemoryEngine`] provides an in-memory implementation of both
//! contracts for tests and default flows.
//!
//! ```no_run
//! use almanac::{FileMetaStore, MemoryEngine, MutationBatch, Session};
//! use std::sync::Arc;
//!
//! # fn main() -> almanac::Result<()> {
//! let engine = Arc::new(MemoryEngine::new());
//! let meta = FileMetaStore::new("./data", "primary").expect("meta store");
//! let session = Session::open(engine, Box::new(meta))?;
//!
//! session.mutate(MutationBatch::new().set(*b"greeting", *b"hello"))?;
//! assert_eq!(session.get(b"greeting")?, Some(b"hello".to_vec()));
//!
//! session.undo()?;
//! assert_eq!(session.get(b"greeting")?, None);
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod error;
pub mod live;
pub mod memory;
pub mod persist;
pub mod session;
pub mod timeline;
pub mod types;
mod writer;

pub use engine::{ChunkStore, ChunkStoreStats, EngineError, EngineResult, SweepReport, TreeEngine};
pub use error::{Result, SessionError};
pub use live::{LiveEvent, LiveHandle, LiveId, LiveStats, QueryValue};
pub use memory::{MemoryChunkStore, MemoryEngine};
pub use persist::{FileMetaStore, MetaStore, PersistError, PersistResult, TimelineMeta};
pub use session::{Session, SessionStats};
pub use timeline::Timeline;
pub use types::{
    DiffEntry, Digest, HistoryDirection, HistoryPage, Key, MutationBatch, RangeDescriptor,
    ReadDescriptor, SnapshotId, Value,
};
pub use writer::MutationTicket;
