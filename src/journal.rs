// Copyright (c) Sienna Satterwhite, RowCache Contributors
// SPDX-License-Identifier: GPL-3.0-only WITH Classpath-exception-2.0

//! Per-cursor rollback journal and the transaction-boundary reconciliation
//! that consumes it. Every positioned mutation made while a transaction is
//! open appends one entry here; commit folds the pending marks into their
//! committed forms, rollback replays the journal backwards to restore the
//! pre-transaction view.

use std::sync::{
    atomic::Ordering::Relaxed,
    Arc,
    Weak,
};

use parking_lot::Mutex;
use tracing::{
    debug,
    instrument,
    warn,
};

use crate::{
    cache::grow_for,
    cursor::ResultCache,
    errs::Error,
    index::GlobalIndex,
    keyset::{
        Locator,
        PublicStatus,
        SelfOp,
    },
    stats::STATS,
};

/// What a journal entry undoes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmlOp {
    Add,
    Update,
    Delete,
    /// A reload that observed the row inside the transaction. Nothing to
    /// undo, but it anchors the partial-rollback scan.
    Refresh,
}

/// One journaled mutation: which row, what was done, and the locator the row
/// had before (meaningless for `Add`).
#[derive(Debug, Clone, Copy)]
pub struct RollbackEntry {
    pub global: GlobalIndex,
    pub op: DmlOp,
    pub prior: Locator,
}

#[derive(Debug, Default)]
pub struct Journal {
    entries: Vec<RollbackEntry>,
}

impl Journal {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[RollbackEntry] {
        &self.entries
    }

    pub fn record(
        &mut self,
        global: GlobalIndex,
        op: DmlOp,
        prior: Locator,
    ) -> Result<(), Error> {
        let want = self.entries.len() + 1;
        grow_for(&mut self.entries, want)?;
        self.entries.push(RollbackEntry { global, op, prior });
        Ok(())
    }

    fn truncate(&mut self, keep: usize) {
        self.entries.truncate(keep);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl ResultCache {
    /// The surrounding transaction committed: every pending mark becomes its
    /// committed counterpart and the journal is discarded. Idempotent, a
    /// second call finds nothing pending and changes nothing.
    #[instrument(level = "debug", skip(self), fields(journal = self.journal.len()))]
    pub fn on_transaction_commit(&mut self) {
        for i in 0..self.journal.len() {
            let global = self.journal.entries()[i].global;
            if let Some(entry) = self.keyset.lookup_mut(global) {
                entry.status.fold_commit();
            }
        }
        self.added.commit();
        self.updated.commit();
        self.deleted.commit();
        self.journal.clear();
    }

    /// The surrounding transaction rolled back: replay the journal backwards
    /// so the cursor shows the pre-transaction rows again. A mutation still
    /// suspended for data dies with the transaction.
    #[instrument(level = "debug", skip(self), fields(journal = self.journal.len()))]
    pub fn on_transaction_rollback(&mut self) {
        self.pending = None;
        self.undo_journal_from(0);
    }

    /// A savepoint rollback undid only part of the transaction's work. The
    /// server does not say which part, so probe: walk the journal forward
    /// checking each entry's effect against the live table, and undo from
    /// the first entry whose effect is gone. Probe failures count as "effect
    /// still present", which keeps rows visible rather than silently
    /// dropping them.
    #[instrument(level = "debug", skip(self), fields(journal = self.journal.len()))]
    pub fn on_partial_rollback(&mut self) {
        let mut doubtp = 0usize;
        for i in 0..self.journal.len() {
            let e = self.journal.entries()[i];
            match e.op {
                | DmlOp::Refresh => {
                    if doubtp == i {
                        doubtp = i + 1;
                    }
                },
                | DmlOp::Add => {
                    let loc = self
                        .keyset
                        .lookup(e.global)
                        .map(|k| k.locator)
                        .unwrap_or_default();
                    if self.probe_exists(loc) {
                        doubtp = i + 1;
                    } else {
                        break;
                    }
                },
                | DmlOp::Update | DmlOp::Delete => {
                    // the prior version reappearing means the server undid
                    // this entry
                    if self.probe_exists(e.prior) {
                        break;
                    }
                    doubtp = i + 1;
                },
            }
        }
        debug!(doubtp, "partial rollback probe settled");
        self.undo_journal_from(doubtp);
    }

    fn probe_exists(&self, locator: Locator) -> bool {
        match self.exec.row_exists(locator) {
            | Ok(present) => present,
            | Err(e) => {
                warn!(%locator, error = %e, "existence probe failed, assuming present");
                true
            },
        }
    }

    fn undo_journal_from(&mut self, from: usize) {
        while self.journal.len() > from {
            let e = self.journal.entries()[self.journal.len() - 1];
            self.undo_one(e);
            self.journal.truncate(self.journal.len() - 1);
            STATS.journal_undos.fetch_add(1, Relaxed);
        }
    }

    fn undo_one(&mut self, e: RollbackEntry) {
        let ntr = self.keyset.num_total_read();
        match e.op {
            | DmlOp::Refresh => {},
            | DmlOp::Add => {
                debug!(global = e.global, "undo add");
                // an added row may since have been updated or deleted; those
                // records go with it
                self.deleted.remove(e.global, ntr);
                self.updated.remove(e.global, ntr);
                self.added.remove(e.global, ntr);
                if let Some(ci) = self.cache_slot(e.global) {
                    if ci + 1 == self.cache.num_rows() {
                        self.cache.pop_row();
                    }
                }
                self.keyset.pop_added();
            },
            | DmlOp::Update => {
                debug!(global = e.global, prior = %e.prior, "undo update");
                let snapshot = self
                    .updated
                    .latest(e.global, ntr)
                    .and_then(|rec| rec.tuple.clone());
                if let Some(entry) = self.keyset.lookup_mut(e.global) {
                    entry.locator = e.prior;
                    if entry.status.pending == Some(SelfOp::Updating) {
                        entry.status.pending = None;
                    }
                    entry.status.committed_update = false;
                    if entry.status.public == PublicStatus::Updated {
                        entry.status.public = PublicStatus::None;
                    }
                    entry.status.needs_reread = true;
                    let restored = *entry;
                    self.updated.remove_after_key(e.global, ntr, Some(&restored));
                    // warm the slot with the pre-update snapshot, then try
                    // to re-read the restored version; a failed re-read
                    // leaves the reread mark set
                    if let (Some(row), Some(ci)) = (snapshot, self.cache_slot(e.global)) {
                        let _ = self.cache.replace_row(ci, row);
                    }
                    if self.cache_slot(e.global).is_some() {
                        let _ = self.reload_row_with(e.global, false);
                    }
                }
            },
            | DmlOp::Delete => {
                debug!(global = e.global, prior = %e.prior, "undo delete");
                self.deleted.remove(e.global, ntr);
                if let Some(entry) = self.keyset.lookup_mut(e.global) {
                    entry.locator = e.prior;
                    if entry.status.pending == Some(SelfOp::Deleting) {
                        entry.status.pending = None;
                    }
                    entry.status.committed_delete = false;
                    if entry.status.public == PublicStatus::Deleted {
                        entry.status.public = PublicStatus::None;
                    }
                    entry.status.needs_reread = true;
                }
                // the slot removed at delete time comes back, then gets an
                // immediate re-read; failure leaves it unset and marked
                if let Some(ci) = self.cache_slot(e.global) {
                    let _ = self.cache.insert_unset_row(ci);
                    let _ = self.reload_row_with(e.global, false);
                }
            },
        }
    }
}

/// Connection-level fan-out: every cursor open on a connection registers
/// here, and the transaction boundary is broadcast to all of them. Dead
/// cursors are swept out as they are encountered.
#[derive(Default)]
pub struct TxnRegistry {
    cursors: Mutex<Vec<Weak<Mutex<ResultCache>>>>,
}

impl TxnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, cursor: &Arc<Mutex<ResultCache>>) {
        self.cursors.lock().push(Arc::downgrade(cursor));
    }

    pub fn broadcast_commit(&self) {
        self.for_each_live(|c| c.on_transaction_commit());
    }

    pub fn broadcast_rollback(&self) {
        self.for_each_live(|c| c.on_transaction_rollback());
    }

    pub fn broadcast_partial_rollback(&self) {
        self.for_each_live(|c| c.on_partial_rollback());
    }

    fn for_each_live(&self, mut f: impl FnMut(&mut ResultCache)) {
        let mut cursors = self.cursors.lock();
        cursors.retain(|weak| match weak.upgrade() {
            | Some(strong) => {
                f(&mut strong.lock());
                true
            },
            | None => false,
        });
    }
}
