//! Write serialization: a FIFO queue feeding one dedicated worker that
//! owns exclusive access to the engine's mutate path.
//!
//! At most one mutate call is outstanding at any time, and submissions
//! complete in submission order. Each command reads the timeline's current
//! snapshot at the moment it is dequeued, not at submission time, so
//! concurrent submitters never both apply against the same stale base.

use crate::error::{Result, SessionError};
use crate::session::Shared;
use crate::types::{MutationBatch, SnapshotId};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::Arc;
use tracing::debug;

/// A commit-producing command. Checkout rides the same queue as ordinary
/// mutations so all commits share one total order.
pub(crate) enum WriteCommand {
    Mutate(MutationBatch),
    Checkout(SnapshotId),
}

/// A queued command plus its completion slot, owned exclusively by the
/// worker for its lifetime.
pub(crate) struct PendingWrite {
    pub(crate) command: WriteCommand,
    pub(crate) done: Sender<Result<SnapshotId>>,
}

/// Completion handle for a submitted write. Once enqueued a write cannot
/// be cancelled; dropping the ticket only discards the result.
pub struct MutationTicket {
    rx: Receiver<Result<SnapshotId>>,
}

impl MutationTicket {
    /// Block until the write commits or fails. Completion is observed
    /// strictly after the corresponding timeline commit.
    pub fn wait(self) -> Result<SnapshotId> {
        self.rx.recv().unwrap_or(Err(SessionError::NotReady))
    }
}

pub(crate) fn ticket() -> (Sender<Result<SnapshotId>>, MutationTicket) {
    let (tx, rx) = bounded(1);
    (tx, MutationTicket { rx })
}

/// Worker loop. Exits when every queue sender is gone, after draining
/// already-enqueued writes.
pub(crate) fn run(shared: Arc<Shared>, rx: Receiver<PendingWrite>) {
    debug!("write serializer started");
    for pending in rx.iter() {
        let result = apply(&shared, pending.command);
        let _ = pending.done.send(result);
    }
    debug!("write serializer stopped");
}

fn apply(shared: &Shared, command: WriteCommand) -> Result<SnapshotId> {
    match command {
        WriteCommand::Mutate(batch) => {
            // The base is read here, at dequeue time.
            let base = shared.timeline.lock().current().clone();
            let next = shared.engine.mutate(&base, &batch)?;
            shared.commit(next.clone());
            Ok(next)
        }
        WriteCommand::Checkout(id) => {
            shared.commit(id.clone());
            Ok(id)
        }
    }
}
