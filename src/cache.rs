use bytes::Bytes;
use tracing::trace;

use crate::{
    config::MIN_TABLE_ALLOC,
    errs::Error,
    index::GlobalIndex,
};

/// Grow `buf` so it can hold `want` elements, doubling from a floor of
/// [`MIN_TABLE_ALLOC`]. Allocation failure is reported, the buffer is left
/// untouched.
pub(crate) fn grow_for<T>(buf: &mut Vec<T>, want: usize) -> Result<(), Error> {
    if want <= buf.capacity() {
        return Ok(());
    }
    let mut cap = buf.capacity().max(MIN_TABLE_ALLOC);
    while cap < want {
        cap *= 2;
    }
    buf.try_reserve_exact(cap - buf.len())?;
    Ok(())
}

/// One column value. `len == -1` means freed/unset, mirroring how the cache
/// marks slots it has released; a set field always carries its byte length.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TupleField {
    pub len: i64,
    pub value: Option<Bytes>,
}

impl TupleField {
    pub fn unset() -> Self {
        Self {
            len: -1,
            value: None,
        }
    }

    pub fn null() -> Self {
        Self { len: 0, value: None }
    }

    pub fn set(value: Bytes) -> Self {
        Self {
            len: value.len() as i64,
            value: Some(value),
        }
    }

    pub fn is_set(&self) -> bool {
        self.len >= 0
    }

    pub fn clear(&mut self) {
        self.value = None;
        self.len = -1;
    }
}

/// Materialized column values for a contiguous run of rows, stored flat as
/// `num_fields` fields per row. `row_start` is the global index of cache
/// slot 0 and shifts as the window scrolls.
#[derive(Debug, Default)]
pub struct TupleCache {
    fields: Vec<TupleField>,
    num_fields: usize,
    num_rows: usize,
    row_start: GlobalIndex,
}

impl TupleCache {
    pub fn new(num_fields: usize) -> Self {
        Self {
            fields: Vec::new(),
            num_fields,
            num_rows: 0,
            row_start: 0,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_fields(&self) -> usize {
        self.num_fields
    }

    pub fn row_start(&self) -> GlobalIndex {
        self.row_start
    }

    pub fn set_row_start(&mut self, start: GlobalIndex) {
        self.row_start = start;
    }

    /// Returns the slot if it has been loaded. A row whose every field is
    /// unset has been freed and counts as not loaded.
    pub fn materialize(&self, cache_idx: usize) -> Option<&[TupleField]> {
        if cache_idx >= self.num_rows {
            return None;
        }
        let row = &self.fields[cache_idx * self.num_fields..(cache_idx + 1) * self.num_fields];
        row.iter().any(TupleField::is_set).then_some(row)
    }

    pub fn row_mut(&mut self, cache_idx: usize) -> Option<&mut [TupleField]> {
        if cache_idx >= self.num_rows {
            return None;
        }
        Some(&mut self.fields[cache_idx * self.num_fields..(cache_idx + 1) * self.num_fields])
    }

    /// Append one row at the tail of the cached run.
    pub fn push_row(&mut self, row: Vec<TupleField>) -> Result<(), Error> {
        debug_assert_eq!(row.len(), self.num_fields);
        let want = self.fields.len() + self.num_fields;
        grow_for(&mut self.fields, want)?;
        self.fields.extend(row);
        self.num_rows += 1;
        Ok(())
    }

    /// Release the owned content of `count` rows starting at `cache_idx`,
    /// leaving the slots unset.
    pub fn clear_rows(&mut self, cache_idx: usize, count: usize) {
        let from = cache_idx * self.num_fields;
        let to = ((cache_idx + count) * self.num_fields).min(self.fields.len());
        for f in &mut self.fields[from..to] {
            f.clear();
        }
    }

    /// Replace a slot with a fresh row. The previous content is released
    /// first; the slot is either fully replaced or untouched, never half
    /// written.
    pub fn replace_row(&mut self, cache_idx: usize, row: Vec<TupleField>) -> Result<(), Error> {
        if cache_idx >= self.num_rows || row.len() != self.num_fields {
            return Err(Error::OutOfRange);
        }
        let base = cache_idx * self.num_fields;
        for (old, new) in self.fields[base..base + self.num_fields].iter_mut().zip(row) {
            old.clear();
            *old = new;
        }
        Ok(())
    }

    /// Drop every slot and rebuild the cache as `rows` unset slots starting
    /// at `row_start`. This is the from-scratch reload path and the only
    /// place capacity bookkeeping resets.
    pub fn reset(&mut self, rows: usize, row_start: GlobalIndex) -> Result<(), Error> {
        trace!(rows, row_start, "cache reset");
        let want = rows * self.num_fields;
        let mut fresh = Vec::new();
        fresh.try_reserve_exact(want.max(MIN_TABLE_ALLOC * self.num_fields))?;
        fresh.resize_with(want, TupleField::unset);
        self.fields = fresh;
        self.num_rows = rows;
        self.row_start = row_start;
        Ok(())
    }

    /// Remove a slot entirely, shifting later rows down. Paired with the
    /// deleted-index list: once a row is listed there its slot must go, or
    /// the global-to-cache translation drifts.
    pub fn remove_row(&mut self, cache_idx: usize) {
        if cache_idx >= self.num_rows {
            return;
        }
        let from = cache_idx * self.num_fields;
        self.fields.drain(from..from + self.num_fields);
        self.num_rows -= 1;
    }

    /// Reopen a slot as unset content, the inverse of [`Self::remove_row`]
    /// for rollback of a delete.
    pub fn insert_unset_row(&mut self, cache_idx: usize) -> Result<(), Error> {
        if cache_idx > self.num_rows {
            return Err(Error::OutOfRange);
        }
        let want = self.fields.len() + self.num_fields;
        grow_for(&mut self.fields, want)?;
        let at = cache_idx * self.num_fields;
        self.fields
            .splice(at..at, (0..self.num_fields).map(|_| TupleField::unset()));
        self.num_rows += 1;
        Ok(())
    }

    /// Remove the tail row, used only to unwind an insert that appended one.
    pub fn pop_row(&mut self) {
        if self.num_rows == 0 {
            return;
        }
        self.num_rows -= 1;
        self.fields.truncate(self.num_rows * self.num_fields);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(tag: &str, n: usize) -> Vec<TupleField> {
        (0..n)
            .map(|i| TupleField::set(Bytes::from(format!("{tag}-{i}"))))
            .collect()
    }

    #[test]
    fn test_materialize_unloaded_is_none() {
        let mut cache = TupleCache::new(3);
        cache.reset(4, 0).unwrap();
        assert!(cache.materialize(0).is_none());
        cache.replace_row(2, row("r2", 3)).unwrap();
        assert!(cache.materialize(2).is_some());
        assert!(cache.materialize(3).is_none());
        assert!(cache.materialize(9).is_none());
    }

    #[test]
    fn test_clear_releases_content() {
        let mut cache = TupleCache::new(2);
        cache.push_row(row("a", 2)).unwrap();
        cache.push_row(row("b", 2)).unwrap();
        cache.clear_rows(0, 1);
        assert!(cache.materialize(0).is_none());
        assert!(cache.materialize(1).is_some());
    }

    #[test]
    fn test_replace_out_of_range_leaves_cache_intact() {
        let mut cache = TupleCache::new(2);
        cache.push_row(row("a", 2)).unwrap();
        assert!(cache.replace_row(5, row("x", 2)).is_err());
        assert!(cache.replace_row(0, row("x", 1)).is_err());
        assert_eq!(
            cache.materialize(0).unwrap()[0].value.as_ref().unwrap(),
            &Bytes::from("a-0")
        );
    }

    #[test]
    fn test_remove_and_reinsert_slot() {
        let mut cache = TupleCache::new(2);
        cache.push_row(row("a", 2)).unwrap();
        cache.push_row(row("b", 2)).unwrap();
        cache.push_row(row("c", 2)).unwrap();
        cache.remove_row(1);
        assert_eq!(cache.num_rows(), 2);
        assert_eq!(
            cache.materialize(1).unwrap()[0].value.as_ref().unwrap(),
            &Bytes::from("c-0")
        );
        cache.insert_unset_row(1).unwrap();
        assert_eq!(cache.num_rows(), 3);
        assert!(cache.materialize(1).is_none());
        assert_eq!(
            cache.materialize(2).unwrap()[0].value.as_ref().unwrap(),
            &Bytes::from("c-0")
        );
    }

    #[test]
    fn test_grow_for_doubles_from_floor() {
        let mut v: Vec<u8> = Vec::new();
        grow_for(&mut v, 1).unwrap();
        assert_eq!(v.capacity(), MIN_TABLE_ALLOC);
        grow_for(&mut v, MIN_TABLE_ALLOC + 1).unwrap();
        assert_eq!(v.capacity(), MIN_TABLE_ALLOC * 2);
        grow_for(&mut v, 55).unwrap();
        assert_eq!(v.capacity(), MIN_TABLE_ALLOC * 8);
    }
}
