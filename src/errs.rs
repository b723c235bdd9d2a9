// Copyright (c) Sienna Satterwhite, RowCache Contributors
// SPDX-License-Identifier: GPL-3.0-only WITH Classpath-exception-2.0

use std::collections::TryReserveError;

use thiserror::Error;

use crate::executor::ExecError;

/// Failures that stay inside the cursor boundary. Beginning/end-of-data and
/// stale rows are not errors, they are reported through scroll and DML
/// outcomes instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("row or rowset index out of range")]
    OutOfRange,
    #[error("cache allocation failed")]
    CacheAlloc(#[from] TryReserveError),
    #[error("executor failure")]
    Executor(#[from] ExecError),
    #[error("a positioned operation is suspended and must be resumed first")]
    PendingDml,
    #[error("no suspended positioned operation to resume")]
    NoPendingDml,
    #[error("the supplied token does not match the suspended operation")]
    TokenMismatch,
    #[error("bookmark is not valid for this cursor")]
    InvalidBookmark,
    #[error("cache inconsistency: {0}")]
    Inconsistent(&'static str),
}
