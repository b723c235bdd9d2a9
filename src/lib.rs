// Copyright (c) Sienna Satterwhite, RowCache Contributors
// SPDX-License-Identifier: GPL-3.0-only WITH Classpath-exception-2.0

//! A client-side result-set cache for scrollable database cursors.
//!
//! The cache keeps a directory of row identities (the keyset) next to a
//! growable tuple cache, so a cursor can scroll in every direction, notice
//! rows that were updated or deleted behind its back, apply positioned
//! UPDATE/DELETE/INSERT through locator equality, and reconcile it all at
//! transaction boundaries with a rollback journal.
//!
//! ```
//! use std::sync::Arc;
//!
//! use rowcache::{
//!     CursorConfigBuilder,
//!     Orientation,
//!     ResultCache,
//!     ScrollResult,
//! };
//! # use rowcache::{QueryExecutor, TxnState};
//! # fn demo(exec: Arc<dyn QueryExecutor>, txn: Arc<dyn TxnState>) -> Result<(), rowcache::Error> {
//! let config = CursorConfigBuilder::new(4).build();
//! let mut cursor = ResultCache::new(config, exec, txn);
//! // seed rows from the base query, then:
//! match cursor.scroll(Orientation::Next, 10)? {
//!     ScrollResult::Rows(rowset) => drop(rowset.rows),
//!     ScrollResult::BeginningOfData | ScrollResult::EndOfData => {},
//! }
//! # Ok(())
//! # }
//! ```

mod bookmark;
mod cache;
mod config;
mod cursor;
mod delta;
mod dml;
mod errs;
mod executor;
mod fetch;
mod index;
mod journal;
mod keyset;
mod stats;

pub use cache::{
    TupleCache,
    TupleField,
};
pub use config::{
    CursorConfig,
    CursorConfigBuilder,
    CursorKind,
    DEFAULT_RELOAD_BATCH,
};
pub use cursor::ResultCache;
pub use dml::{
    Dml,
    PendingToken,
};
pub use errs::Error;
pub use executor::{
    affected_from_tag,
    inserted_oid_from_tag,
    DmlReply,
    DmlSpec,
    ExecError,
    LoadSpec,
    LoadedRows,
    QueryExecutor,
    RowKey,
    TxnState,
};
pub use fetch::{
    FetchedRow,
    Orientation,
    ReloadOutcome,
    RowSlotStatus,
    ScrollOutcome,
    ScrollResult,
};
pub use index::{
    both_spellings,
    cache_index,
    deleted_below,
    global_from_cache,
    global_to_rowset,
    resolve_positive,
    rowset_to_global,
    GlobalIndex,
};
pub use journal::{
    DmlOp,
    Journal,
    RollbackEntry,
    TxnRegistry,
};
pub use keyset::{
    Keyset,
    KeysetEntry,
    Locator,
    PublicStatus,
    RowStatus,
    SelfOp,
};
