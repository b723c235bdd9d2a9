use bytes::Bytes;
use thiserror::Error;

use crate::{
    cache::TupleField,
    keyset::Locator,
};

/// Transport or server failure reported by the query executor. The cache
/// does not interpret it beyond propagating, except for the reconciliation
/// existence check, which treats failure as inconclusive.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct ExecError(pub String);

/// Row identity as the executor reports it alongside row content.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowKey {
    pub locator: Locator,
    pub secondary: u32,
}

/// Rows returned by a load request, content and identity in parallel.
#[derive(Debug, Default)]
pub struct LoadedRows {
    pub rows: Vec<Vec<TupleField>>,
    pub keys: Vec<RowKey>,
}

impl LoadedRows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// What to load. The executor owns turning these into statement text; this
/// crate only ever hands over locators and keys.
#[derive(Debug)]
pub enum LoadSpec<'a> {
    /// Batched reload of exactly these rows, the prepared-statement path.
    ByLocators(&'a [Locator]),
    /// The current version of the row that used to live at this locator,
    /// chasing the update chain.
    Current(Locator),
    /// The latest row this transaction inserted.
    LastInserted,
    /// Locator-independent lookup by the driver-assigned identity column.
    BySecondaryKey(u32),
}

/// A positioned mutation. Column payloads are bound out-of-band by the
/// caller's binding layer; `rowset_idx` tells that layer which bound row to
/// draw parameters from.
#[derive(Debug, Clone, Copy)]
pub enum DmlSpec {
    Update {
        locator: Locator,
        secondary: u32,
        rowset_idx: usize,
    },
    Delete {
        locator: Locator,
        secondary: u32,
    },
    Insert {
        rowset_idx: usize,
    },
}

/// Outcome of submitting a mutation. `NeedData` suspends the operation; the
/// handle must be passed back through `resume_dml` with the missing column
/// data before anything else happens on the cursor.
#[derive(Debug)]
pub enum DmlReply {
    Done { command_tag: String },
    NeedData { handle: u64 },
}

/// The external query-execution collaborator. All calls are synchronous and
/// run inside the caller's current transaction.
pub trait QueryExecutor {
    fn load(&self, spec: LoadSpec<'_>) -> Result<LoadedRows, ExecError>;
    fn execute_dml(&self, spec: DmlSpec) -> Result<DmlReply, ExecError>;
    fn resume_dml(&self, handle: u64, data: Bytes) -> Result<DmlReply, ExecError>;
    /// Does this locator still denote a live row? Used only by partial
    /// rollback's doubt scan.
    fn row_exists(&self, locator: Locator) -> Result<bool, ExecError>;
}

/// Connection-level transaction predicate: mutations are journaled only
/// while a transaction is open.
pub trait TxnState {
    fn is_open(&self) -> bool;
}

/// Affected-row count out of a command tag, e.g. "UPDATE 1", "DELETE 0",
/// "INSERT 0 1".
pub fn affected_from_tag(tag: &str) -> Option<u64> {
    let mut it = tag.split_ascii_whitespace();
    match it.next()? {
        | "INSERT" => {
            let _oid = it.next()?;
            it.next()?.parse().ok()
        },
        | "UPDATE" | "DELETE" => it.next()?.parse().ok(),
        | _ => None,
    }
}

/// The oid a PostgreSQL-style INSERT tag carries, 0 when absent.
pub fn inserted_oid_from_tag(tag: &str) -> Option<u32> {
    let mut it = tag.split_ascii_whitespace();
    if it.next()? != "INSERT" {
        return None;
    }
    it.next()?.parse().ok()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affected_from_tag() {
        assert_eq!(affected_from_tag("UPDATE 1"), Some(1));
        assert_eq!(affected_from_tag("DELETE 0"), Some(0));
        assert_eq!(affected_from_tag("INSERT 16427 1"), Some(1));
        assert_eq!(affected_from_tag("SELECT 5"), None);
        assert_eq!(affected_from_tag(""), None);
    }

    #[test]
    fn test_inserted_oid_from_tag() {
        assert_eq!(inserted_oid_from_tag("INSERT 16427 1"), Some(16427));
        assert_eq!(inserted_oid_from_tag("INSERT 0 1"), Some(0));
        assert_eq!(inserted_oid_from_tag("UPDATE 1"), None);
    }
}
