// Copyright (c) Sienna Satterwhite, RowCache Contributors
// SPDX-License-Identifier: GPL-3.0-only WITH Classpath-exception-2.0

//! Scrolling and row delivery. Every fetch resolves an orientation to a
//! starting global index, skips rows this cursor deleted, reloads stale
//! content through the keyset in locator batches, and hands back a rowset of
//! materialized rows with per-row statuses.

use std::sync::atomic::Ordering::Relaxed;

use bytes::Bytes;
use tracing::{
    debug,
    instrument,
    trace,
};

use crate::{
    bookmark,
    cache::TupleField,
    cursor::ResultCache,
    errs::Error,
    index::{
        cache_index,
        resolve_positive,
        GlobalIndex,
    },
    journal::DmlOp,
    keyset::{
        PublicStatus,
        SelfOp,
    },
    stats::STATS,
};

/// Where to scroll to, relative to the current rowset.
#[derive(Debug, Clone)]
pub enum Orientation {
    Next,
    Prior,
    First,
    Last,
    /// 1-based from the front; negative counts from the back; 0 is before
    /// the first row.
    Absolute(i64),
    /// Valid-row offset from the current rowset start; 0 refetches it.
    Relative(i64),
    /// A token from [`ResultCache::issue_bookmark`], plus a row offset.
    Bookmark { token: Bytes, offset: i64 },
}

/// Per-row delivery status, mirroring the driver-level row status array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSlotStatus {
    Ok,
    Added,
    Updated,
    /// Deleted behind the cursor's back; the slot carries no content.
    Deleted,
}

#[derive(Debug)]
pub struct FetchedRow {
    pub global: GlobalIndex,
    pub status: RowSlotStatus,
    /// `None` when content retrieval is off or the row is gone.
    pub fields: Option<Vec<TupleField>>,
}

#[derive(Debug)]
pub struct ScrollOutcome {
    pub rowset_start: GlobalIndex,
    pub rows: Vec<FetchedRow>,
}

/// What a scroll produced. Running off either end is an outcome, not an
/// error; the position still moves so the opposite orientation recovers.
#[derive(Debug)]
pub enum ScrollResult {
    Rows(ScrollOutcome),
    BeginningOfData,
    EndOfData,
}

/// Nth-Valid search result. `Short` reports how many valid rows there were
/// and the furthest one reached, which the boundary orientations use to
/// deliver a partial rowset instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NthValid {
    Found(GlobalIndex),
    Short {
        available: usize,
        nearest: GlobalIndex,
    },
}

/// Outcome of reloading a single row by locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    Current,
    /// The row moved to a new locator since we last saw it.
    Updated,
    /// No version of the row exists any more.
    Gone,
}

impl ResultCache {
    /// Count `nth` valid rows from `start` inclusive, forward or backward.
    /// Valid means not deleted through this cursor. When nothing is deleted
    /// this collapses to arithmetic; otherwise it walks the directory.
    pub(crate) fn nth_valid(&self, start: GlobalIndex, forward: bool, nth: usize) -> NthValid {
        debug_assert!(nth >= 1);
        let limit = self.total_rows() as i64;
        let step: i64 = if forward { 1 } else { -1 };

        if self.deleted.is_empty() {
            let idx = start + step * (nth as i64 - 1);
            if idx >= 0 && idx < limit && start >= 0 && start < limit {
                return NthValid::Found(idx);
            }
            let available = if forward {
                (limit - start).clamp(0, nth as i64) as usize
            } else {
                (start + 1).clamp(0, nth as i64) as usize
            };
            let nearest = if forward { limit - 1 } else { 0 };
            return NthValid::Short { available, nearest };
        }

        let ntr = self.keyset.num_total_read();
        let mut count = 0usize;
        let mut nearest = start;
        let mut idx = start;
        while idx >= 0 && idx < limit {
            if !self.deleted.is_deleted(idx, ntr) {
                count += 1;
                nearest = idx;
                if count == nth {
                    return NthValid::Found(idx);
                }
            }
            idx += step;
        }
        NthValid::Short {
            available: count,
            nearest,
        }
    }

    /// Move the cursor and deliver up to `rowset_size` rows.
    #[instrument(level = "debug", skip(self))]
    pub fn scroll(
        &mut self,
        orientation: Orientation,
        rowset_size: usize,
    ) -> Result<ScrollResult, Error> {
        if self.pending.is_some() {
            return Err(Error::PendingDml);
        }
        if rowset_size == 0 {
            return Err(Error::OutOfRange);
        }

        let total = self.total_rows() as i64;
        let start = match self.resolve_orientation(&orientation, rowset_size)? {
            | Ok(start) => start,
            | Err(boundary) => return Ok(self.settle_boundary(boundary, total)),
        };

        self.deliver_window(start, rowset_size)
    }

    /// Turn an orientation into the global index of the first row to
    /// deliver, or a boundary verdict.
    fn resolve_orientation(
        &mut self,
        orientation: &Orientation,
        rowset_size: usize,
    ) -> Result<Result<GlobalIndex, Boundary>, Error> {
        let total = self.total_rows() as i64;
        let res = match orientation {
            | Orientation::Next => {
                let from = if self.pos.delivered {
                    self.pos.rowset_start + self.pos.last_count_with_omitted
                } else {
                    0
                };
                match self.nth_valid(from, true, 1) {
                    | NthValid::Found(g) => Ok(g),
                    | NthValid::Short { .. } => Err(Boundary::End),
                }
            },
            | Orientation::Prior => {
                if !self.pos.delivered {
                    return Ok(Err(Boundary::Beginning));
                }
                match self.nth_valid(self.pos.rowset_start - 1, false, rowset_size) {
                    | NthValid::Found(g) => Ok(g),
                    | NthValid::Short { available: 0, .. } => Err(Boundary::Beginning),
                    // fewer than a full rowset above: deliver from the top
                    | NthValid::Short { .. } => match self.nth_valid(0, true, 1) {
                        | NthValid::Found(g) => Ok(g),
                        | NthValid::Short { .. } => Err(Boundary::Beginning),
                    },
                }
            },
            | Orientation::First => match self.nth_valid(0, true, 1) {
                | NthValid::Found(g) => Ok(g),
                | NthValid::Short { .. } => Err(Boundary::End),
            },
            | Orientation::Last => match self.nth_valid(total - 1, false, rowset_size) {
                | NthValid::Found(g) => Ok(g),
                | NthValid::Short { available: 0, .. } => Err(Boundary::End),
                | NthValid::Short { .. } => match self.nth_valid(0, true, 1) {
                    | NthValid::Found(g) => Ok(g),
                    | NthValid::Short { .. } => Err(Boundary::End),
                },
            },
            | Orientation::Absolute(0) => Err(Boundary::Beginning),
            | Orientation::Absolute(n) if *n > 0 => match self.nth_valid(0, true, *n as usize) {
                | NthValid::Found(g) => Ok(g),
                | NthValid::Short { .. } => Err(Boundary::End),
            },
            | Orientation::Absolute(n) => {
                match self.nth_valid(total - 1, false, n.unsigned_abs() as usize) {
                    | NthValid::Found(g) => Ok(g),
                    | NthValid::Short { .. } => Err(Boundary::Beginning),
                }
            },
            | Orientation::Relative(0) => {
                if self.pos.delivered {
                    Ok(self.pos.rowset_start)
                } else {
                    Err(Boundary::Beginning)
                }
            },
            | Orientation::Relative(n) => {
                let anchor = if self.pos.delivered {
                    self.pos.rowset_start
                } else if *n > 0 {
                    -1
                } else {
                    total
                };
                let (from, forward) = if *n > 0 {
                    (anchor + 1, true)
                } else {
                    (anchor - 1, false)
                };
                match self.nth_valid(from, forward, n.unsigned_abs() as usize) {
                    | NthValid::Found(g) => Ok(g),
                    | NthValid::Short { .. } if *n > 0 => Err(Boundary::End),
                    | NthValid::Short { .. } => Err(Boundary::Beginning),
                }
            },
            | Orientation::Bookmark { token, offset } => {
                let anchored = bookmark::resolve(self.nonce, token)?;
                let pos = resolve_positive(anchored, self.keyset.num_total_read())
                    .ok_or(Error::InvalidBookmark)?;
                // the offset counts valid rows from the anchor, like
                // Relative does from a delivered position
                let (forward, nth) = if *offset >= 0 {
                    (true, (*offset as usize).saturating_add(1))
                } else {
                    (false, (offset.unsigned_abs() as usize).saturating_add(1))
                };
                match self.nth_valid(pos, forward, nth) {
                    | NthValid::Found(g) => Ok(g),
                    | NthValid::Short { .. } if *offset >= 0 => Err(Boundary::End),
                    | NthValid::Short { .. } => Err(Boundary::Beginning),
                }
            },
        };
        Ok(res)
    }

    fn settle_boundary(&mut self, boundary: Boundary, total: i64) -> ScrollResult {
        self.pos.rowset.clear();
        self.pos.last_count_with_omitted = 0;
        match boundary {
            | Boundary::Beginning => {
                self.pos.delivered = false;
                self.pos.rowset_start = 0;
                ScrollResult::BeginningOfData
            },
            | Boundary::End => {
                // park one past the end so Prior recovers the last rowset
                self.pos.delivered = true;
                self.pos.rowset_start = total;
                ScrollResult::EndOfData
            },
        }
    }

    /// Deliver the rowset starting at `start`, skipping rows this cursor
    /// deleted and reloading stale content first.
    fn deliver_window(
        &mut self,
        start: GlobalIndex,
        rowset_size: usize,
    ) -> Result<ScrollResult, Error> {
        let total = self.total_rows() as i64;
        let ntr = self.keyset.num_total_read();

        let mut window = Vec::with_capacity(rowset_size);
        let mut g = start;
        while window.len() < rowset_size && g < total {
            if self.deleted.is_deleted(g, ntr) {
                STATS.rows_skipped.fetch_add(1, Relaxed);
                g += 1;
                continue;
            }
            window.push(g);
            g += 1;
        }
        if window.is_empty() {
            return Ok(self.settle_boundary(Boundary::End, total));
        }
        let consumed = g - start;

        // only keyset-driven cursors go back through the directory for
        // content; static and forward-only results serve what they hold
        if self.config.retrieve_data() && self.config.keyset_driven() {
            let stale: Vec<GlobalIndex> = window
                .iter()
                .copied()
                .filter(|&g| self.row_needs_load(g))
                .collect();
            if !stale.is_empty() {
                self.reload_rows(&stale)?;
            }
        }

        // shift the in-rowset marks to the new window
        for idx in 0..self.keyset.len() {
            if let Some(e) = self.keyset.entry_mut(idx) {
                e.status.in_rowset = false;
            }
        }
        let mut rows = Vec::with_capacity(window.len());
        for &g in &window {
            let entry = self
                .keyset
                .lookup_mut(g)
                .ok_or(Error::Inconsistent("rowset member missing from keyset"))?;
            entry.status.in_rowset = true;
            // the public mark is reported once; holes stay holes
            let status = match entry.status.take_public() {
                | _ if entry.status.other_deleted => RowSlotStatus::Deleted,
                | PublicStatus::Added => RowSlotStatus::Added,
                | PublicStatus::Updated => RowSlotStatus::Updated,
                | PublicStatus::Deleted => RowSlotStatus::Deleted,
                | PublicStatus::None => RowSlotStatus::Ok,
            };
            let fields = if self.config.retrieve_data() && status != RowSlotStatus::Deleted {
                self.materialized(g).map(<[TupleField]>::to_vec)
            } else {
                None
            };
            rows.push(FetchedRow { global: g, status, fields });
        }

        self.pos.delivered = true;
        self.pos.rowset_start = start;
        self.pos.last_count_with_omitted = consumed;
        self.pos.rowset = window;
        trace!(start, count = rows.len(), "rowset delivered");
        Ok(ScrollResult::Rows(ScrollOutcome {
            rowset_start: start,
            rows,
        }))
    }

    fn row_needs_load(&self, global: GlobalIndex) -> bool {
        match self.keyset.lookup(global) {
            | Some(e) if e.status.other_deleted => false,
            | Some(e) if e.status.needs_reread => true,
            | Some(_) => self.materialized(global).is_none(),
            | None => false,
        }
    }

    /// The cached content of a row, if loaded. Rows this cursor inserted
    /// fall back to their insertion-time snapshot.
    pub fn materialized(&self, global: GlobalIndex) -> Option<&[TupleField]> {
        match self
            .cache_slot(global)
            .and_then(|ci| self.cache.materialize(ci))
        {
            | Some(row) => Some(row),
            | None => self
                .added
                .get(global, self.keyset.num_total_read())
                .and_then(|e| e.tuple.as_deref()),
        }
    }

    /// Cache slot for a global index, `None` for deleted or unslotted rows.
    pub(crate) fn cache_slot(&self, global: GlobalIndex) -> Option<usize> {
        cache_index(
            global,
            self.keyset.num_total_read(),
            self.deleted.indices(),
            self.cache.row_start(),
        )
    }

    /// Reload these rows through the keyset, batching locators into prepared
    /// rounds of `reload_batch`. Rows the server no longer returns are
    /// marked deleted behind our back.
    #[instrument(level = "debug", skip(self, globals), fields(rows = globals.len()))]
    pub(crate) fn reload_rows(&mut self, globals: &[GlobalIndex]) -> Result<(), Error> {
        for chunk in globals.chunks(self.config.reload_batch()) {
            let locators: Vec<_> = chunk
                .iter()
                .filter_map(|&g| self.keyset.lookup(g).map(|e| e.locator))
                .collect();
            STATS.reloads_issued.fetch_add(1, Relaxed);
            let loaded = self
                .exec
                .load(crate::executor::LoadSpec::ByLocators(&locators))?;

            for &g in chunk {
                let locator = match self.keyset.lookup(g) {
                    | Some(e) => e.locator,
                    | None => continue,
                };
                let hit = loaded
                    .keys
                    .iter()
                    .position(|k| k.locator == locator);
                match hit {
                    | Some(i) => {
                        self.store_row(g, loaded.rows[i].clone())?;
                        if let Some(e) = self.keyset.lookup_mut(g) {
                            e.status.needs_reread = false;
                        }
                        STATS.rows_reloaded.fetch_add(1, Relaxed);
                    },
                    | None => {
                        debug!(global = g, %locator, "row vanished during reload");
                        if let Some(e) = self.keyset.lookup_mut(g) {
                            e.status.other_deleted = true;
                            e.status.public = PublicStatus::Deleted;
                            e.status.needs_reread = false;
                        }
                    },
                }
            }
        }
        Ok(())
    }

    /// Refetch one row by chasing its locator to the current version. This
    /// is how positioned DML notices concurrent updates and deletes.
    pub fn reload_row(&mut self, global: GlobalIndex) -> Result<ReloadOutcome, Error> {
        self.reload_row_with(global, true)
    }

    #[instrument(level = "debug", skip(self))]
    pub(crate) fn reload_row_with(
        &mut self,
        global: GlobalIndex,
        journal: bool,
    ) -> Result<ReloadOutcome, Error> {
        let entry = *self.keyset.lookup(global).ok_or(Error::OutOfRange)?;
        STATS.reloads_issued.fetch_add(1, Relaxed);
        let loaded = self
            .exec
            .load(crate::executor::LoadSpec::Current(entry.locator))?;
        if loaded.is_empty() {
            if let Some(e) = self.keyset.lookup_mut(global) {
                e.status.other_deleted = true;
                e.status.public = PublicStatus::Deleted;
            }
            return Ok(ReloadOutcome::Gone);
        }

        let key = loaded.keys[0];
        let moved = key.locator != entry.locator;
        // only a row we are still adding needs a journal anchor; the undo
        // scan leans on it to place the doubt point
        if journal && self.txn.is_open() && entry.status.pending == Some(SelfOp::Adding) {
            self.journal.record(global, DmlOp::Refresh, entry.locator)?;
        }
        if let Some(e) = self.keyset.lookup_mut(global) {
            e.locator = key.locator;
            if key.secondary != 0 {
                e.secondary = key.secondary;
            }
            e.status.needs_reread = false;
            if moved {
                e.status.public = PublicStatus::Updated;
            }
        }
        if self.config.retrieve_data() {
            self.store_row(global, loaded.rows.into_iter().next().unwrap_or_default())?;
        }
        STATS.rows_reloaded.fetch_add(1, Relaxed);
        Ok(if moved {
            ReloadOutcome::Updated
        } else {
            ReloadOutcome::Current
        })
    }

    /// Throw away every cached row and mark the whole directory stale. The
    /// next scroll rebuilds its window from the server.
    pub fn invalidate_all(&mut self) -> Result<(), Error> {
        // one slot per non-deleted row, matching the cache translation
        let rows = self.total_rows() - self.deleted.len();
        self.cache.reset(rows, 0)?;
        for idx in 0..self.keyset.len() {
            if let Some(e) = self.keyset.entry_mut(idx) {
                if !e.status.other_deleted {
                    e.status.needs_reread = true;
                }
            }
        }
        Ok(())
    }

    fn store_row(&mut self, global: GlobalIndex, row: Vec<TupleField>) -> Result<(), Error> {
        let ci = cache_index(
            global,
            self.keyset.num_total_read(),
            self.deleted.indices(),
            self.cache.row_start(),
        )
        .ok_or(Error::Inconsistent("reloaded row has no cache slot"))?;
        self.cache.replace_row(ci, row)
    }
}

#[derive(Debug, Clone, Copy)]
enum Boundary {
    Beginning,
    End,
}
