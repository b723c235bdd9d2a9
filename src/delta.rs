//! The three side-tables recording rows this cursor changed since the last
//! successful commit. Each carries its own copy of the row's identity (and,
//! where the cursor materializes content eagerly, a private tuple snapshot)
//! so rollback can restore what the directory held before.

use tracing::debug;

use crate::{
    cache::{
        grow_for,
        TupleField,
    },
    errs::Error,
    index::{
        both_spellings,
        resolve_positive,
        GlobalIndex,
    },
    keyset::{
        KeysetEntry,
        PublicStatus,
        SelfOp,
    },
};

#[derive(Debug)]
pub struct AddedEntry {
    pub entry: KeysetEntry,
    pub tuple: Option<Vec<TupleField>>,
}

/// Rows inserted through this cursor, dense-indexed in insertion order. The
/// nth entry is global index `-(n+1)` until it is folded into the positive
/// space.
#[derive(Debug, Default)]
pub struct AddedTable {
    entries: Vec<AddedEntry>,
}

impl AddedTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn push(&mut self, entry: KeysetEntry, tuple: Option<Vec<TupleField>>) -> Result<(), Error> {
        let want = self.entries.len() + 1;
        grow_for(&mut self.entries, want)?;
        self.entries.push(AddedEntry { entry, tuple });
        Ok(())
    }

    fn slot_of(&self, global: GlobalIndex, num_total_read: usize) -> Option<usize> {
        let idx = if global < 0 {
            usize::try_from(global.checked_neg()?).ok()? - 1
        } else {
            usize::try_from(global).ok()?.checked_sub(num_total_read)?
        };
        (idx < self.entries.len()).then_some(idx)
    }

    pub fn get(&self, global: GlobalIndex, num_total_read: usize) -> Option<&AddedEntry> {
        self.slot_of(global, num_total_read).map(|i| &self.entries[i])
    }

    /// Unwind one insert. Later entries shift down, which is safe because
    /// removal only ever happens during rollback, newest first.
    pub fn remove(&mut self, global: GlobalIndex, num_total_read: usize) {
        if let Some(idx) = self.slot_of(global, num_total_read) {
            debug!(global, idx, "removing added entry");
            self.entries.remove(idx);
        }
    }

    pub fn commit(&mut self) {
        for e in &mut self.entries {
            e.entry.status.fold_commit();
        }
    }
}

#[derive(Debug)]
pub struct UpdatedEntry {
    pub global: GlobalIndex,
    pub entry: KeysetEntry,
    pub tuple: Option<Vec<TupleField>>,
}

/// Rows updated through this cursor, in update order. A row updated twice
/// appears twice; lookups scan from the tail so the latest version wins.
#[derive(Debug, Default)]
pub struct UpdatedTable {
    entries: Vec<UpdatedEntry>,
}

impl UpdatedTable {
    pub fn record(
        &mut self,
        global: GlobalIndex,
        entry: KeysetEntry,
        tuple: Option<Vec<TupleField>>,
    ) -> Result<(), Error> {
        let want = self.entries.len() + 1;
        grow_for(&mut self.entries, want)?;
        self.entries.push(UpdatedEntry {
            global,
            entry,
            tuple,
        });
        Ok(())
    }

    pub fn latest(&self, global: GlobalIndex, num_total_read: usize) -> Option<&UpdatedEntry> {
        let (pidx, midx) = both_spellings(global, num_total_read);
        self.entries
            .iter()
            .rev()
            .find(|e| e.global == pidx || e.global == midx)
    }

    pub fn remove(&mut self, global: GlobalIndex, num_total_read: usize) {
        self.remove_after_key(global, num_total_read, None)
    }

    /// Drop this row's update records newest-first, stopping at the record
    /// whose identity matches `keep`: that one predates the mutation being
    /// unwound and must survive.
    pub fn remove_after_key(
        &mut self,
        global: GlobalIndex,
        num_total_read: usize,
        keep: Option<&KeysetEntry>,
    ) {
        let (pidx, midx) = both_spellings(global, num_total_read);
        let mut removed = 0usize;
        let mut i = self.entries.len();
        while i > 0 {
            i -= 1;
            let e = &self.entries[i];
            if e.global != pidx && e.global != midx {
                continue;
            }
            if let Some(k) = keep {
                if e.entry.locator == k.locator {
                    break;
                }
            }
            self.entries.remove(i);
            removed += 1;
        }
        if removed > 0 {
            debug!(global, removed, "removed updated entries");
        }
    }

    pub fn commit(&mut self) {
        for e in &mut self.entries {
            e.entry.status.fold_commit();
        }
    }
}

/// Rows deleted through this cursor, kept sorted ascending by the positive
/// spelling of their global index. Doubles as the skip list for scrolling
/// and as the prefix-count source for cache-index translation.
#[derive(Debug, Default)]
pub struct DeletedTable {
    indices: Vec<GlobalIndex>,
    entries: Vec<KeysetEntry>,
}

impl DeletedTable {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Sorted positive-spelling indices, for the translator and Nth-Valid.
    pub fn indices(&self) -> &[GlobalIndex] {
        &self.indices
    }

    pub fn is_deleted(&self, global: GlobalIndex, num_total_read: usize) -> bool {
        match resolve_positive(global, num_total_read) {
            | Some(pos) => self.indices.binary_search(&pos).is_ok(),
            | None => false,
        }
    }

    /// Record a deletion, preserving ascending order and stamping the saved
    /// identity with the deleted status.
    pub fn insert(
        &mut self,
        global: GlobalIndex,
        mut entry: KeysetEntry,
        num_total_read: usize,
        in_txn: bool,
    ) -> Result<(), Error> {
        let pos = resolve_positive(global, num_total_read).ok_or(Error::OutOfRange)?;
        let want = self.indices.len() + 1;
        grow_for(&mut self.indices, want)?;
        grow_for(&mut self.entries, want)?;

        entry.status.public = PublicStatus::Deleted;
        if in_txn {
            entry.status.pending = Some(SelfOp::Deleting);
        } else {
            entry.status.pending = None;
            entry.status.committed_delete = true;
        }

        let at = self.indices.partition_point(|&d| d < pos);
        self.indices.insert(at, pos);
        self.entries.insert(at, entry);
        Ok(())
    }

    /// Remove every record matching either spelling of `global`. Stored
    /// indices are always the positive spelling, so only `pidx` can hit,
    /// but callers pass whichever spelling they journaled under.
    pub fn remove(&mut self, global: GlobalIndex, num_total_read: usize) {
        let (pidx, _midx) = both_spellings(global, num_total_read);
        let mut i = 0;
        while i < self.indices.len() {
            if self.indices[i] == pidx {
                self.indices.remove(i);
                self.entries.remove(i);
                continue;
            }
            i += 1;
        }
    }

    pub fn commit(&mut self) {
        for e in &mut self.entries {
            e.status.fold_commit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyset::Locator;

    fn entry(block: u32) -> KeysetEntry {
        KeysetEntry {
            locator: Locator { block, offset: 1 },
            secondary: block,
            ..Default::default()
        }
    }

    #[test]
    fn test_deleted_stays_sorted() {
        let mut dl = DeletedTable::default();
        dl.insert(3, entry(3), 5, true).unwrap();
        dl.insert(1, entry(1), 5, true).unwrap();
        dl.insert(4, entry(4), 5, true).unwrap();
        assert_eq!(dl.indices(), &[1, 3, 4]);
        assert!(dl.is_deleted(3, 5));
        assert!(!dl.is_deleted(2, 5));
    }

    #[test]
    fn test_deleted_negative_spelling_resolves() {
        let mut dl = DeletedTable::default();
        // -1 with 5 base rows is position 5
        dl.insert(-1, entry(9), 5, true).unwrap();
        assert_eq!(dl.indices(), &[5]);
        assert!(dl.is_deleted(-1, 5));
        assert!(dl.is_deleted(5, 5));
        dl.remove(-1, 5);
        assert!(dl.is_empty());
    }

    #[test]
    fn test_deleted_commit_folds_pending() {
        let mut dl = DeletedTable::default();
        dl.insert(0, entry(0), 5, true).unwrap();
        assert_eq!(dl.entries[0].status.pending, Some(SelfOp::Deleting));
        dl.commit();
        let st = dl.entries[0].status;
        assert!(st.pending.is_none());
        assert!(st.committed_delete);
    }

    #[test]
    fn test_added_slots_by_both_spellings() {
        let mut ad = AddedTable::default();
        ad.push(entry(100), None).unwrap();
        ad.push(entry(101), None).unwrap();
        assert_eq!(ad.get(-1, 5).unwrap().entry.secondary, 100);
        assert_eq!(ad.get(5, 5).unwrap().entry.secondary, 100);
        assert_eq!(ad.get(-2, 5).unwrap().entry.secondary, 101);
        assert_eq!(ad.get(6, 5).unwrap().entry.secondary, 101);
        assert!(ad.get(7, 5).is_none());
        ad.remove(-2, 5);
        assert_eq!(ad.len(), 1);
    }

    #[test]
    fn test_updated_latest_wins_and_remove_after_key() {
        let mut up = UpdatedTable::default();
        let first = entry(10);
        let second = entry(11);
        up.record(2, first, None).unwrap();
        up.record(2, second, None).unwrap();
        assert_eq!(up.latest(2, 5).unwrap().entry.secondary, 11);

        // unwind the second update only: stop at the record carrying the
        // first update's identity
        up.remove_after_key(2, 5, Some(&first));
        assert_eq!(up.entries.len(), 1);
        assert_eq!(up.latest(2, 5).unwrap().entry.secondary, 10);

        // a longer chain sheds every record newer than the kept one
        up.record(2, second, None).unwrap();
        up.record(2, entry(12), None).unwrap();
        up.remove_after_key(2, 5, Some(&first));
        assert_eq!(up.entries.len(), 1);
        assert_eq!(up.latest(2, 5).unwrap().entry.secondary, 10);

        up.remove(2, 5);
        assert!(up.entries.is_empty());
    }
}
