// Copyright (c) Sienna Satterwhite, RowCache Contributors
// SPDX-License-Identifier: GPL-3.0-only WITH Classpath-exception-2.0

//! Positioned mutations: update, delete, insert and refresh against rows of
//! the current rowset. Each one journals enough to undo itself, keeps the
//! delta tables current, and detects rows that changed under us by locator
//! mismatch rather than by guessing.

use bytes::Bytes;
use tracing::{
    debug,
    instrument,
};

use crate::{
    cursor::ResultCache,
    errs::Error,
    executor::{
        affected_from_tag,
        inserted_oid_from_tag,
        DmlReply,
        DmlSpec,
        LoadSpec,
    },
    fetch::ReloadOutcome,
    index::GlobalIndex,
    journal::DmlOp,
    keyset::{
        KeysetEntry,
        PublicStatus,
        SelfOp,
    },
};

/// Opaque receipt for a suspended mutation. The caller must hand it back
/// through [`ResultCache::resume`] with the missing column data before the
/// cursor will do anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingToken {
    op: PendingOp,
    global: GlobalIndex,
    rowset_idx: usize,
    handle: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingOp {
    Update,
    Delete,
    Insert,
}

/// Outcome of a positioned mutation.
#[derive(Debug)]
pub enum Dml {
    Done { affected: u64 },
    /// The executor wants streamed column data; the cursor is suspended.
    NeedData(PendingToken),
    /// The target row changed or vanished under us. Nothing was mutated;
    /// the row is marked for reread.
    StaleRow,
}

impl ResultCache {
    fn rowset_global(&self, rowset_idx: usize) -> Result<GlobalIndex, Error> {
        self.pos
            .rowset
            .get(rowset_idx)
            .copied()
            .ok_or(Error::OutOfRange)
    }

    fn guard_pending(&self) -> Result<(), Error> {
        if self.pending.is_some() {
            return Err(Error::PendingDml);
        }
        Ok(())
    }

    /// Positioned UPDATE of one rowset row.
    #[instrument(level = "debug", skip(self))]
    pub fn update_row(&mut self, rowset_idx: usize) -> Result<Dml, Error> {
        self.guard_pending()?;
        let global = self.rowset_global(rowset_idx)?;
        let entry = *self.keyset.lookup(global).ok_or(Error::OutOfRange)?;
        if entry.status.other_deleted || entry.status.is_deleted() {
            return Ok(Dml::StaleRow);
        }

        let reply = self.exec.execute_dml(DmlSpec::Update {
            locator: entry.locator,
            secondary: entry.secondary,
            rowset_idx,
        })?;
        match reply {
            | DmlReply::NeedData { handle } => Ok(self.suspend(PendingOp::Update, global, rowset_idx, handle)),
            | DmlReply::Done { command_tag } => self.finish_update(global, &command_tag),
        }
    }

    fn finish_update(&mut self, global: GlobalIndex, tag: &str) -> Result<Dml, Error> {
        let affected = affected_from_tag(tag).unwrap_or(0);
        if affected == 0 {
            // someone got to the row first; chase its current identity so
            // a retry can land
            if let Some(e) = self.keyset.lookup_mut(global) {
                e.status.needs_reread = true;
            }
            if self.config.keyset_driven() {
                self.reload_row_with(global, false)?;
            }
            return Ok(Dml::StaleRow);
        }
        if affected > 1 {
            return Err(Error::Inconsistent("positioned update touched more than one row"));
        }

        let prior = self
            .keyset
            .lookup(global)
            .map(|e| e.locator)
            .ok_or(Error::OutOfRange)?;
        let in_txn = self.txn.is_open();
        if in_txn {
            self.journal.record(global, DmlOp::Update, prior)?;
        }
        if let Some(e) = self.keyset.lookup_mut(global) {
            e.status.public = PublicStatus::Updated;
            if in_txn {
                e.status.pending = Some(SelfOp::Updating);
            } else {
                e.status.committed_update = true;
            }
        }
        let snapshot = self.materialized(global).map(<[_]>::to_vec);
        // pick up the new locator and content
        self.reload_row_with(global, false)?;
        let post = *self.keyset.lookup(global).ok_or(Error::OutOfRange)?;
        self.updated.record(global, post, snapshot)?;
        Ok(Dml::Done { affected })
    }

    /// Positioned DELETE of one rowset row.
    #[instrument(level = "debug", skip(self))]
    pub fn delete_row(&mut self, rowset_idx: usize) -> Result<Dml, Error> {
        self.guard_pending()?;
        let global = self.rowset_global(rowset_idx)?;
        let entry = *self.keyset.lookup(global).ok_or(Error::OutOfRange)?;
        if entry.status.other_deleted || entry.status.is_deleted() {
            return Ok(Dml::StaleRow);
        }

        let reply = self.exec.execute_dml(DmlSpec::Delete {
            locator: entry.locator,
            secondary: entry.secondary,
        })?;
        match reply {
            | DmlReply::NeedData { handle } => Ok(self.suspend(PendingOp::Delete, global, rowset_idx, handle)),
            | DmlReply::Done { command_tag } => self.finish_delete(global, &command_tag),
        }
    }

    fn finish_delete(&mut self, global: GlobalIndex, tag: &str) -> Result<Dml, Error> {
        let affected = affected_from_tag(tag).unwrap_or(0);
        if affected == 0 {
            if let Some(e) = self.keyset.lookup_mut(global) {
                e.status.needs_reread = true;
            }
            if self.config.keyset_driven() {
                self.reload_row_with(global, false)?;
            }
            return Ok(Dml::StaleRow);
        }
        if affected > 1 {
            return Err(Error::Inconsistent("positioned delete touched more than one row"));
        }

        let entry = *self.keyset.lookup(global).ok_or(Error::OutOfRange)?;
        let in_txn = self.txn.is_open();
        if in_txn {
            self.journal.record(global, DmlOp::Delete, entry.locator)?;
        }
        // release the cached content before the slot disappears from the
        // translation
        if let Some(ci) = self.cache_slot(global) {
            self.cache.remove_row(ci);
        }
        let ntr = self.keyset.num_total_read();
        self.deleted.insert(global, entry, ntr, in_txn)?;
        if let Some(e) = self.keyset.lookup_mut(global) {
            e.status.public = PublicStatus::Deleted;
            if in_txn {
                e.status.pending = Some(SelfOp::Deleting);
            } else {
                e.status.committed_delete = true;
            }
        }
        Ok(Dml::Done { affected })
    }

    /// INSERT a new row drawn from the rowset's bound buffers. On success
    /// the row's identity is fetched back and appended to the directory so
    /// the cursor can scroll to it.
    #[instrument(level = "debug", skip(self))]
    pub fn insert_row(&mut self, rowset_idx: usize) -> Result<Dml, Error> {
        self.guard_pending()?;
        let reply = self.exec.execute_dml(DmlSpec::Insert { rowset_idx })?;
        match reply {
            | DmlReply::NeedData { handle } => Ok(self.suspend(PendingOp::Insert, 0, rowset_idx, handle)),
            | DmlReply::Done { command_tag } => self.finish_insert(&command_tag),
        }
    }

    fn finish_insert(&mut self, tag: &str) -> Result<Dml, Error> {
        let affected = affected_from_tag(tag).unwrap_or(0);
        if affected == 0 {
            return Ok(Dml::StaleRow);
        }

        // find what we just inserted: ask for the transaction's latest
        // insert, then fall back to the identity the command tag carries
        let mut loaded = self.exec.load(LoadSpec::LastInserted)?;
        if loaded.is_empty() {
            if let Some(oid) = inserted_oid_from_tag(tag).filter(|&o| o != 0) {
                loaded = self.exec.load(LoadSpec::BySecondaryKey(oid))?;
            }
        }
        if loaded.is_empty() {
            // the insert happened but the row cannot be located; the
            // directory simply does not learn about it
            debug!("inserted row not identifiable");
            return Ok(Dml::Done { affected });
        }

        let key = loaded.keys[0];
        let row = loaded.rows.into_iter().next().unwrap_or_default();
        let in_txn = self.txn.is_open();
        let mut entry = KeysetEntry {
            locator: key.locator,
            secondary: key.secondary,
            ..Default::default()
        };
        entry.status.public = PublicStatus::Added;
        if in_txn {
            entry.status.pending = Some(SelfOp::Adding);
        } else {
            entry.status.committed_add = true;
        }

        self.keyset.push_added(entry)?;
        let snapshot = self.config.retrieve_data().then(|| row.clone());
        self.added.push(entry, snapshot)?;
        if self.config.retrieve_data() {
            self.cache.push_row(row)?;
        }

        let ntr = self.keyset.num_total_read();
        let global = if self.config.fetch_driver() {
            -(self.added.len() as i64)
        } else {
            ntr as i64 + self.added.len() as i64 - 1
        };
        if in_txn {
            self.journal.record(global, DmlOp::Add, entry.locator)?;
        }
        debug!(global, %entry.locator, "row added");
        Ok(Dml::Done { affected })
    }

    /// Refetch one rowset row from the server, chasing concurrent updates.
    pub fn refresh_row(&mut self, rowset_idx: usize) -> Result<ReloadOutcome, Error> {
        self.guard_pending()?;
        let global = self.rowset_global(rowset_idx)?;
        self.reload_row(global)
    }

    /// Resume a suspended mutation with the column data it was waiting for.
    #[instrument(level = "debug", skip(self, data))]
    pub fn resume(&mut self, token: PendingToken, data: Bytes) -> Result<Dml, Error> {
        let pending = self.pending.ok_or(Error::NoPendingDml)?;
        if pending != token {
            return Err(Error::TokenMismatch);
        }
        self.pending = None;

        match self.exec.resume_dml(token.handle, data)? {
            | DmlReply::NeedData { handle } => {
                Ok(self.suspend(token.op, token.global, token.rowset_idx, handle))
            },
            | DmlReply::Done { command_tag } => match token.op {
                | PendingOp::Update => self.finish_update(token.global, &command_tag),
                | PendingOp::Delete => self.finish_delete(token.global, &command_tag),
                | PendingOp::Insert => self.finish_insert(&command_tag),
            },
        }
    }

    /// Apply a positioned UPDATE to every row of the current rowset,
    /// stopping if one of them suspends for data.
    pub fn update_rowset(&mut self) -> Result<Vec<Dml>, Error> {
        self.for_whole_rowset(Self::update_row)
    }

    /// Apply a positioned DELETE to every row of the current rowset.
    pub fn delete_rowset(&mut self) -> Result<Vec<Dml>, Error> {
        self.for_whole_rowset(Self::delete_row)
    }

    fn for_whole_rowset(
        &mut self,
        op: fn(&mut Self, usize) -> Result<Dml, Error>,
    ) -> Result<Vec<Dml>, Error> {
        self.guard_pending()?;
        let mut out = Vec::with_capacity(self.pos.rowset.len());
        for idx in 0..self.pos.rowset.len() {
            let r = op(self, idx)?;
            let suspended = matches!(r, Dml::NeedData(_));
            out.push(r);
            if suspended {
                break;
            }
        }
        Ok(out)
    }

    fn suspend(
        &mut self,
        op: PendingOp,
        global: GlobalIndex,
        rowset_idx: usize,
        handle: u64,
    ) -> Dml {
        let token = PendingToken {
            op,
            global,
            rowset_idx,
            handle,
        };
        self.pending = Some(token);
        Dml::NeedData(token)
    }
}
