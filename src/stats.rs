// Copyright (c) Sienna Satterwhite, RowCache Contributors
// SPDX-License-Identifier: GPL-3.0-only WITH Classpath-exception-2.0

use std::sync::{
    atomic::AtomicUsize,
    LazyLock,
};

pub(crate) static STATS: LazyLock<Stats> = LazyLock::new(|| Stats::default());

#[derive(Debug, Default)]
pub(crate) struct Stats {
    pub(crate) reloads_issued: AtomicUsize,
    pub(crate) rows_reloaded: AtomicUsize,
    pub(crate) rows_skipped: AtomicUsize,
    pub(crate) journal_undos: AtomicUsize,
}
