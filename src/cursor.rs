// Copyright (c) Sienna Satterwhite, RowCache Contributors
// SPDX-License-Identifier: GPL-3.0-only WITH Classpath-exception-2.0

//! The cursor-side result cache itself: one directory of row identities, one
//! tuple cache, the delta tables and the journal, glued to the caller's
//! query executor. Single-threaded per cursor; sharing across threads goes
//! through the owner's lock, as [`crate::journal::TxnRegistry`] does.

use std::sync::Arc;

use bytes::Bytes;

use crate::{
    bookmark,
    cache::{
        TupleCache,
        TupleField,
    },
    config::CursorConfig,
    delta::{
        AddedTable,
        DeletedTable,
        UpdatedTable,
    },
    dml::PendingToken,
    errs::Error,
    executor::{
        QueryExecutor,
        RowKey,
        TxnState,
    },
    index::GlobalIndex,
    journal::Journal,
    keyset::{
        Keyset,
        KeysetEntry,
    },
};

/// Scroll position state. `rowset_start` and the delivered window are only
/// meaningful after the first successful fetch.
#[derive(Debug, Default)]
pub(crate) struct Position {
    pub delivered: bool,
    pub rowset_start: GlobalIndex,
    /// Global slots the last fetch consumed, counting skipped deleted rows,
    /// so the next forward fetch starts after the whole span.
    pub last_count_with_omitted: i64,
    /// Globals of the rows actually delivered, in rowset order.
    pub rowset: Vec<GlobalIndex>,
}

pub struct ResultCache {
    pub(crate) config: CursorConfig,
    pub(crate) keyset: Keyset,
    pub(crate) cache: TupleCache,
    pub(crate) added: AddedTable,
    pub(crate) updated: UpdatedTable,
    pub(crate) deleted: DeletedTable,
    pub(crate) journal: Journal,
    pub(crate) pos: Position,
    pub(crate) pending: Option<PendingToken>,
    pub(crate) nonce: u32,
    pub(crate) exec: Arc<dyn QueryExecutor>,
    pub(crate) txn: Arc<dyn TxnState>,
}

impl ResultCache {
    pub fn new(
        config: CursorConfig,
        exec: Arc<dyn QueryExecutor>,
        txn: Arc<dyn TxnState>,
    ) -> Self {
        Self {
            cache: TupleCache::new(config.num_fields()),
            config,
            keyset: Keyset::new(),
            added: AddedTable::default(),
            updated: UpdatedTable::default(),
            deleted: DeletedTable::default(),
            journal: Journal::default(),
            pos: Position::default(),
            pending: None,
            nonce: rand::random(),
            exec,
            txn,
        }
    }

    /// Seed one base-query row, identity and content together.
    pub fn push_row(&mut self, key: RowKey, fields: Vec<TupleField>) -> Result<(), Error> {
        self.keyset.push_read(KeysetEntry {
            locator: key.locator,
            secondary: key.secondary,
            ..Default::default()
        })?;
        if self.config.retrieve_data() {
            self.cache.push_row(fields)?;
        }
        Ok(())
    }

    /// Seed identity only; content is reloaded through the keyset on the
    /// first scroll that needs it.
    pub fn push_key(&mut self, key: RowKey) -> Result<(), Error> {
        let n = self.config.num_fields();
        self.push_row(key, vec![TupleField::unset(); n])
    }

    /// The base query has been read to the end; boundary orientations may
    /// now trust the directory size.
    pub fn finish_base_read(&mut self) {
        self.keyset.set_reached_eof();
    }

    /// Every row the directory knows, including rows this cursor added and
    /// rows since deleted.
    pub fn total_rows(&self) -> usize {
        self.keyset.len()
    }

    /// Rows a scroll can still land on.
    pub fn row_count(&self) -> usize {
        self.total_rows() - self.deleted.len()
    }

    pub fn is_suspended(&self) -> bool {
        self.pending.is_some()
    }

    /// An opaque anchor for the given rowset row, valid for this cursor
    /// only.
    pub fn issue_bookmark(&self, rowset_idx: usize) -> Result<Bytes, Error> {
        let global = self
            .pos
            .rowset
            .get(rowset_idx)
            .copied()
            .ok_or(Error::OutOfRange)?;
        Ok(bookmark::issue(self.nonce, global))
    }

    /// Validate a token and return the row it anchors.
    pub fn resolve_bookmark(&self, token: &[u8]) -> Result<GlobalIndex, Error> {
        bookmark::resolve(self.nonce, token)
    }
}
