//! Linear commit timeline with an undo/redo pointer.
//!
//! The timeline is an append-ordered log of snapshot ids plus a current
//! position. Entries are only ever removed by truncation when a commit is
//! issued while the pointer is not at the tip; the underlying snapshots
//! themselves are never deleted here, only unreferenced.

use crate::persist::TimelineMeta;
use crate::types::{HistoryDirection, HistoryPage, SnapshotId};

#[derive(Clone, Debug)]
pub struct Timeline {
    entries: Vec<SnapshotId>,
    current: usize,
}

impl Timeline {
    /// Start a fresh timeline containing a single seed snapshot.
    pub fn seed(id: SnapshotId) -> Self {
        Self {
            entries: vec![id],
            current: 0,
        }
    }

    /// Adopt persisted metadata. Returns `None` if the metadata is not
    /// well-formed (empty timeline, pointer out of range, or an empty id).
    pub fn from_meta(meta: TimelineMeta) -> Option<Self> {
        if !meta.is_well_formed() {
            return None;
        }
        Some(Self {
            entries: meta.timeline,
            current: meta.index,
        })
    }

    /// Export `{timeline, index}` for persistence. Always a consistent
    /// pair: the index is in range of the exported entries.
    pub fn meta(&self) -> TimelineMeta {
        TimelineMeta {
            timeline: self.entries.clone(),
            index: self.current,
        }
    }

    /// Append a snapshot after the current position and move the pointer
    /// to it. Any entries past the prior position are discarded, so redo
    /// is never available immediately after a commit.
    pub fn commit(&mut self, id: SnapshotId) {
        self.entries.truncate(self.current + 1);
        self.entries.push(id);
        self.current = self.entries.len() - 1;
    }

    /// Move the pointer one entry back. Returns `false` at the first
    /// entry.
    pub fn undo(&mut self) -> bool {
        if self.current == 0 {
            return false;
        }
        self.current -= 1;
        true
    }

    /// Move the pointer one entry forward. Returns `false` at the tip.
    pub fn redo(&mut self) -> bool {
        if self.current == self.entries.len() - 1 {
            return false;
        }
        self.current += 1;
        true
    }

    pub fn current(&self) -> &SnapshotId {
        &self.entries[self.current]
    }

    /// The most recent commit ever made, regardless of pointer position.
    pub fn head(&self) -> &SnapshotId {
        &self.entries[self.entries.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn undo_available(&self) -> bool {
        self.current > 0
    }

    pub fn redo_available(&self) -> bool {
        self.current < self.entries.len() - 1
    }

    /// Distance of the pointer from the head; zero at the tip.
    pub fn offset_from_head(&self) -> usize {
        self.entries.len() - 1 - self.current
    }

    /// Enumerate history on one side of the pointer, nearest entry first.
    ///
    /// Offset and limit are applied after ordering and clip silently; an
    /// out-of-range offset yields an empty page, never an error.
    pub fn scan(&self, offset: usize, limit: usize, direction: HistoryDirection) -> HistoryPage {
        match direction {
            HistoryDirection::Undo => {
                let total = self.current;
                let entries = (0..self.current)
                    .rev()
                    .skip(offset)
                    .take(limit)
                    .map(|i| self.entries[i].clone())
                    .collect();
                HistoryPage { total, entries }
            }
            HistoryDirection::Redo => {
                let total = self.entries.len() - 1 - self.current;
                let entries = (self.current + 1..self.entries.len())
                    .skip(offset)
                    .take(limit)
                    .map(|i| self.entries[i].clone())
                    .collect();
                HistoryPage { total, entries }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> SnapshotId {
        SnapshotId::from_bytes(vec![n; 4])
    }

    #[test]
    fn commits_grow_the_log_and_track_the_tip() {
        let mut tl = Timeline::seed(id(0));
        for n in 1..=5u8 {
            tl.commit(id(n));
            assert_eq!(tl.len(), n as usize + 1);
            assert_eq!(tl.current_index(), tl.len() - 1);
            assert_eq!(tl.current(), &id(n));
            assert!(!tl.redo_available());
        }
        assert_eq!(tl.head(), &id(5));
    }

    #[test]
    fn undo_then_redo_restores_the_snapshot() {
        let mut tl = Timeline::seed(id(0));
        tl.commit(id(1));
        tl.commit(id(2));

        let before = tl.current().clone();
        assert!(tl.undo_available());
        assert!(tl.undo());
        assert_eq!(tl.current(), &id(1));
        assert!(tl.redo());
        assert_eq!(tl.current(), &before);
    }

    #[test]
    fn boundary_moves_are_no_ops() {
        let mut tl = Timeline::seed(id(0));
        assert!(!tl.undo());
        assert!(!tl.redo());
        assert_eq!(tl.current(), &id(0));

        tl.commit(id(1));
        assert!(!tl.redo());
        assert!(tl.undo());
        assert!(!tl.undo());
        assert_eq!(tl.current_index(), 0);
    }

    #[test]
    fn commit_off_the_tip_discards_the_redo_tail() {
        let mut tl = Timeline::seed(id(0));
        tl.commit(id(1));
        tl.commit(id(2));
        tl.undo();
        assert!(tl.offset_from_head() > 0);

        tl.commit(id(9));
        assert_eq!(tl.len(), 3);
        assert_eq!(tl.current(), &id(9));
        assert!(!tl.redo_available());
        // The dropped entry is gone from every view.
        let page = tl.scan(0, usize::MAX, HistoryDirection::Undo);
        assert_eq!(page.entries, vec![id(1), id(0)]);
    }

    #[test]
    fn scan_totals_match_the_pointer_in_any_state() {
        let mut tl = Timeline::seed(id(0));
        for n in 1..=4u8 {
            tl.commit(id(n));
        }
        tl.undo();
        tl.undo();

        let undo = tl.scan(0, usize::MAX, HistoryDirection::Undo);
        let redo = tl.scan(0, usize::MAX, HistoryDirection::Redo);
        assert_eq!(undo.total, tl.current_index());
        assert_eq!(redo.total, tl.len() - 1 - tl.current_index());
        assert_eq!(undo.entries, vec![id(1), id(0)]);
        assert_eq!(redo.entries, vec![id(3), id(4)]);
    }

    #[test]
    fn scan_clips_offset_and_limit_silently() {
        let mut tl = Timeline::seed(id(0));
        for n in 1..=3u8 {
            tl.commit(id(n));
        }

        let page = tl.scan(1, 1, HistoryDirection::Undo);
        assert_eq!(page.total, 3);
        assert_eq!(page.entries, vec![id(1)]);

        let page = tl.scan(10, 5, HistoryDirection::Undo);
        assert_eq!(page.total, 3);
        assert!(page.entries.is_empty());

        let page = tl.scan(0, 0, HistoryDirection::Redo);
        assert_eq!(page.total, 0);
        assert!(page.entries.is_empty());
    }

    #[test]
    fn checkout_shaped_commit_is_undoable() {
        // The full scenario: commits, an undo, a checkout-style commit of
        // an external id, then paging on both sides.
        let mut tl = Timeline::seed(id(0));
        tl.commit(id(1));
        tl.commit(id(2));
        assert_eq!(tl.current_index(), 2);

        tl.undo();
        assert_eq!(tl.current(), &id(1));
        let redo = tl.scan(0, usize::MAX, HistoryDirection::Redo);
        assert_eq!(redo.total, 1);
        assert_eq!(redo.entries, vec![id(2)]);

        tl.commit(id(7)); // checkout of an externally supplied snapshot
        assert_eq!(tl.len(), 3);
        assert_eq!(tl.current_index(), 2);
        assert_eq!(tl.current(), &id(7));

        tl.undo();
        assert_eq!(tl.current(), &id(1));
        let redo = tl.scan(0, usize::MAX, HistoryDirection::Redo);
        assert_eq!(redo.total, 1);
        assert_eq!(redo.entries, vec![id(7)]);
    }

    #[test]
    fn meta_round_trips_and_validates() {
        let mut tl = Timeline::seed(id(0));
        tl.commit(id(1));
        tl.undo();

        let adopted = Timeline::from_meta(tl.meta()).unwrap();
        assert_eq!(adopted.current(), tl.current());
        assert_eq!(adopted.len(), tl.len());

        assert!(Timeline::from_meta(TimelineMeta { timeline: vec![], index: 0 }).is_none());
        assert!(Timeline::from_meta(TimelineMeta { timeline: vec![id(0)], index: 1 }).is_none());
        assert!(Timeline::from_meta(TimelineMeta {
            timeline: vec![SnapshotId::from_bytes(Vec::new())],
            index: 0,
        })
        .is_none());
    }
}
