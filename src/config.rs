use getset::CopyGetters;

/// Batch size for keyset reloads. The prepared reload statement is built for
/// this many locators and padded with NULLs on the last round.
pub const DEFAULT_RELOAD_BATCH: usize = 32;

/// Minimum slot allocation for the directory, the cache and the delta tables.
pub const MIN_TABLE_ALLOC: usize = 10;

/// How the cursor tracks rows between fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKind {
    /// Scroll forward only, no identity directory beyond the cache itself.
    ForwardOnly,
    /// Fully materialized result, directory kept for positioned DML.
    Static,
    /// Identity directory decoupled from row content; content is re-read
    /// through the directory on demand.
    KeysetDriven,
}

#[derive(Debug, Clone, Copy, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct CursorConfig {
    /// Cursor tracking mode.
    kind: CursorKind,
    /// Number of columns in the result shape.
    num_fields: usize,
    /// Locator batch size for keyset reloads.
    reload_batch: usize,
    /// When off, scrolling maintains positions and identities but loads no
    /// row content.
    retrieve_data: bool,
    /// Rows arrive through a server-side cursor window rather than a fully
    /// read result. Added rows get negative global indices in this mode.
    fetch_driver: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct CursorConfigBuilder {
    kind: CursorKind,
    num_fields: usize,
    reload_batch: usize,
    retrieve_data: bool,
    fetch_driver: bool,
}

impl CursorConfigBuilder {
    pub fn new(num_fields: usize) -> Self {
        Self {
            kind: CursorKind::KeysetDriven,
            num_fields,
            reload_batch: DEFAULT_RELOAD_BATCH,
            retrieve_data: true,
            fetch_driver: false,
        }
    }

    pub fn kind(mut self, kind: CursorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn reload_batch(mut self, batch: usize) -> Self {
        self.reload_batch = batch.max(2);
        self
    }

    pub fn retrieve_data(mut self, on: bool) -> Self {
        self.retrieve_data = on;
        self
    }

    pub fn fetch_driver(mut self, on: bool) -> Self {
        self.fetch_driver = on;
        self
    }

    pub fn build(self) -> CursorConfig {
        CursorConfig {
            kind: self.kind,
            num_fields: self.num_fields,
            reload_batch: self.reload_batch,
            retrieve_data: self.retrieve_data,
            fetch_driver: self.fetch_driver,
        }
    }
}

impl CursorConfig {
    pub fn keyset_driven(&self) -> bool {
        self.kind == CursorKind::KeysetDriven
    }
}
