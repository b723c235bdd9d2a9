use std::fmt;

use crate::{
    cache::grow_for,
    errs::Error,
    index::GlobalIndex,
};

/// Physical row locator, the storage-level tuple address. Mutations target a
/// row only through locator equality, which is what turns a concurrent change
/// into a detectable stale row instead of a lost update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Locator {
    pub block: u32,
    pub offset: u16,
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.block, self.offset)
    }
}

/// Caller-visible row state. Mutually exclusive and consumed when reported
/// back through a scroll status array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublicStatus {
    #[default]
    None,
    Added,
    Updated,
    Deleted,
}

/// A mutation made by this cursor inside the still-open transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfOp {
    Adding,
    Updating,
    Deleting,
}

/// Structured row status. Keeping the public part, the pending op and the
/// committed flags apart makes the illegal combinations (two pending ops at
/// once) unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowStatus {
    pub public: PublicStatus,
    pub pending: Option<SelfOp>,
    pub committed_add: bool,
    pub committed_update: bool,
    pub committed_delete: bool,
    pub needs_reread: bool,
    pub in_rowset: bool,
    /// Deleted by someone else, discovered on reload.
    pub other_deleted: bool,
}

impl RowStatus {
    /// Fold the pending op into its committed counterpart. Never sets a
    /// committed flag for an op that did not happen.
    pub fn fold_commit(&mut self) {
        match self.pending.take() {
            | Some(SelfOp::Adding) => self.committed_add = true,
            | Some(SelfOp::Updating) => self.committed_update = true,
            | Some(SelfOp::Deleting) => self.committed_delete = true,
            | None => {},
        }
    }

    /// Rows that must be skipped while scrolling.
    pub fn is_deleted(&self) -> bool {
        self.pending == Some(SelfOp::Deleting) || self.committed_delete || self.other_deleted
    }

    /// Report and reset the public part; a status is delivered to the
    /// caller once, not on every subsequent fetch of the same row.
    pub fn take_public(&mut self) -> PublicStatus {
        let p = self.public;
        self.public = PublicStatus::None;
        p
    }
}

/// One directory record: where the row lives and what we did to it.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeysetEntry {
    pub status: RowStatus,
    pub locator: Locator,
    /// Driver-assigned identity column (oid), 0 when absent. Used to match
    /// reloaded rows back to their entries and to find rows whose locator
    /// has moved.
    pub secondary: u32,
}

/// The row identity directory. Ordered by first-seen global index; rows are
/// marked deleted rather than removed so the order stays monotonic. The one
/// exception is undoing an Add, which pops the tail entry that the insert
/// appended.
#[derive(Debug, Default)]
pub struct Keyset {
    entries: Vec<KeysetEntry>,
    num_total_read: usize,
    once_reached_eof: bool,
}

impl Keyset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rows read from the base query, not counting rows this cursor added.
    pub fn num_total_read(&self) -> usize {
        self.num_total_read
    }

    pub fn once_reached_eof(&self) -> bool {
        self.once_reached_eof
    }

    pub fn set_reached_eof(&mut self) {
        self.once_reached_eof = true;
    }

    /// Resolve a global index to a directory position. Negative indices are
    /// added rows, looked up from the tail: `-n` lives at
    /// `num_total_read + n - 1`. Returns `None` for anything out of bounds,
    /// including hostile negative or huge input.
    pub fn index_of(&self, global: GlobalIndex) -> Option<usize> {
        let idx = if global >= 0 {
            usize::try_from(global).ok()?
        } else {
            let back = usize::try_from(global.checked_neg()?).ok()?;
            self.num_total_read.checked_add(back)? - 1
        };
        (idx < self.entries.len()).then_some(idx)
    }

    pub fn lookup(&self, global: GlobalIndex) -> Option<&KeysetEntry> {
        self.index_of(global).map(|i| &self.entries[i])
    }

    pub fn lookup_mut(&mut self, global: GlobalIndex) -> Option<&mut KeysetEntry> {
        self.index_of(global).map(|i| &mut self.entries[i])
    }

    pub fn entry(&self, idx: usize) -> Option<&KeysetEntry> {
        self.entries.get(idx)
    }

    pub fn entry_mut(&mut self, idx: usize) -> Option<&mut KeysetEntry> {
        self.entries.get_mut(idx)
    }

    /// Append an identity read from the base query.
    pub fn push_read(&mut self, entry: KeysetEntry) -> Result<(), Error> {
        let want = self.entries.len() + 1;
        grow_for(&mut self.entries, want)?;
        self.entries.push(entry);
        self.num_total_read += 1;
        Ok(())
    }

    /// Append the identity of a row this cursor inserted.
    pub fn push_added(&mut self, entry: KeysetEntry) -> Result<(), Error> {
        let want = self.entries.len() + 1;
        grow_for(&mut self.entries, want)?;
        self.entries.push(entry);
        Ok(())
    }

    /// Undo of an Add removes the tail entry it appended.
    pub fn pop_added(&mut self) -> Option<KeysetEntry> {
        if self.entries.len() > self.num_total_read {
            self.entries.pop()
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeysetEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(block: u32) -> KeysetEntry {
        KeysetEntry {
            locator: Locator { block, offset: 1 },
            secondary: block,
            ..Default::default()
        }
    }

    #[test]
    fn test_negative_index_resolves_from_tail() {
        let mut ks = Keyset::new();
        for i in 0..5 {
            ks.push_read(entry(i)).unwrap();
        }
        ks.push_added(entry(100)).unwrap();
        ks.push_added(entry(101)).unwrap();

        // -1 is the first added row, -2 the second
        assert_eq!(ks.index_of(-1), Some(5));
        assert_eq!(ks.index_of(-2), Some(6));
        assert_eq!(ks.lookup(-1).unwrap().secondary, 100);
        assert_eq!(ks.lookup(3).unwrap().secondary, 3);
    }

    #[test]
    fn test_hostile_input_never_panics() {
        let mut ks = Keyset::new();
        ks.push_read(entry(0)).unwrap();
        assert!(ks.lookup(i64::MAX).is_none());
        assert!(ks.lookup(i64::MIN).is_none());
        assert!(ks.lookup(-7).is_none());
        assert!(ks.lookup(1).is_none());
    }

    #[test]
    fn test_fold_commit_only_folds_what_happened() {
        let mut st = RowStatus {
            pending: Some(SelfOp::Updating),
            ..Default::default()
        };
        st.fold_commit();
        assert!(st.committed_update);
        assert!(!st.committed_add);
        assert!(!st.committed_delete);
        assert!(st.pending.is_none());

        // second fold is a no-op
        st.fold_commit();
        assert!(st.committed_update);
        assert!(!st.committed_add);
    }

    #[test]
    fn test_pop_added_never_touches_read_rows() {
        let mut ks = Keyset::new();
        ks.push_read(entry(0)).unwrap();
        assert!(ks.pop_added().is_none());
        ks.push_added(entry(9)).unwrap();
        assert_eq!(ks.pop_added().unwrap().secondary, 9);
        assert!(ks.pop_added().is_none());
        assert_eq!(ks.len(), 1);
    }
}
