//! Pure conversions among the four row-indexing spaces: global (logical row
//! number for the life of the cursor, negative for rows this cursor added),
//! keyset (directory position), cache (slot in the tuple buffer) and rowset
//! (position in the caller's bound window). No state lives here; everything
//! takes the sorted deleted-index list and offsets it needs as arguments.

/// Logical row number since the cursor began. Non-negative indices are rows
/// read from the base query in arrival order; `-1, -2, ...` are rows this
/// cursor inserted, in insertion order.
pub type GlobalIndex = i64;

/// Map an added row's negative index onto the positive position it aliases
/// once the base row count is known: `-n` becomes `num_total_read + n - 1`.
/// Non-negative indices pass through. `None` on overflow.
pub fn resolve_positive(global: GlobalIndex, num_total_read: usize) -> Option<GlobalIndex> {
    if global >= 0 {
        return Some(global);
    }
    let back = global.checked_neg()?;
    (num_total_read as i64).checked_add(back - 1)
}

/// Both spellings of a row index: the positive one and the negative alias,
/// in that order. Rows that never had a negative alias return their own
/// index twice. Mutation bookkeeping matches against either spelling
/// because an added row can be journaled under one and deleted under the
/// other.
pub fn both_spellings(global: GlobalIndex, num_total_read: usize) -> (GlobalIndex, GlobalIndex) {
    let num_read = num_total_read as i64;
    if global < 0 {
        (num_read - global - 1, global)
    } else if global >= num_read {
        (global, num_read - global - 1)
    } else {
        (global, global)
    }
}

/// Count of deleted indices strictly below `global` in a sorted ascending
/// list.
pub fn deleted_below(deleted: &[GlobalIndex], global: GlobalIndex) -> usize {
    deleted.partition_point(|&d| d < global)
}

fn deleted_at_or_below(deleted: &[GlobalIndex], global: GlobalIndex) -> usize {
    deleted.partition_point(|&d| d <= global)
}

/// Global to cache: shift by the deleted rows below and by the cache base.
/// Undefined (`None`) for deleted rows, rows before the cached run, and
/// unresolvable negative input.
pub fn cache_index(
    global: GlobalIndex,
    num_total_read: usize,
    deleted: &[GlobalIndex],
    row_start: GlobalIndex,
) -> Option<usize> {
    let pos = resolve_positive(global, num_total_read)?;
    if deleted.binary_search(&pos).is_ok() {
        return None;
    }
    let idx = pos - deleted_below(deleted, pos) as i64 - row_start;
    usize::try_from(idx).ok()
}

/// Cache to global, the inverse of [`cache_index`]. Fixpoint iteration over
/// the prefix count; converges because the count is monotone.
pub fn global_from_cache(
    cache_idx: usize,
    deleted: &[GlobalIndex],
    row_start: GlobalIndex,
) -> GlobalIndex {
    let base = cache_idx as i64 + row_start;
    let mut g = base;
    loop {
        let next = base + deleted_at_or_below(deleted, g) as i64;
        if next == g {
            return g;
        }
        g = next;
    }
}

/// Rowset to global for non-keyset-driven cursors. Keyset-driven cursors
/// route through the Nth-Valid walk instead so deleted rows are skipped.
pub fn rowset_to_global(rowset_start: GlobalIndex, rowset_idx: usize) -> GlobalIndex {
    rowset_start + rowset_idx as i64
}

pub fn global_to_rowset(global: GlobalIndex, rowset_start: GlobalIndex) -> Option<usize> {
    usize::try_from(global - rowset_start).ok()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_resolve_positive() {
        assert_eq!(resolve_positive(3, 5), Some(3));
        assert_eq!(resolve_positive(-1, 5), Some(5));
        assert_eq!(resolve_positive(-2, 5), Some(6));
        assert_eq!(resolve_positive(i64::MIN, 5), None);
    }

    #[test]
    fn test_both_spellings() {
        assert_eq!(both_spellings(2, 5), (2, 2));
        assert_eq!(both_spellings(-1, 5), (5, -1));
        assert_eq!(both_spellings(6, 5), (6, -2));
    }

    #[test]
    fn test_cache_index_skips_deleted() {
        let deleted = vec![1, 3];
        assert_eq!(cache_index(0, 5, &deleted, 0), Some(0));
        assert_eq!(cache_index(1, 5, &deleted, 0), None);
        assert_eq!(cache_index(2, 5, &deleted, 0), Some(1));
        assert_eq!(cache_index(4, 5, &deleted, 0), Some(2));
        // rows before the cached run have no cache slot
        assert_eq!(cache_index(0, 5, &[], 2), None);
        assert_eq!(cache_index(2, 5, &[], 2), Some(0));
    }

    proptest! {
        #[test]
        fn prop_cache_round_trip(
            dels in proptest::collection::btree_set(0i64..200, 0..20),
            g in 0i64..200,
            row_start in 0i64..10,
        ) {
            let deleted: Vec<i64> = dels.iter().copied().collect();
            prop_assume!(!dels.contains(&g));
            prop_assume!(g >= row_start);
            if let Some(idx) = cache_index(g, 200, &deleted, row_start) {
                prop_assert_eq!(global_from_cache(idx, &deleted, row_start), g);
            }
        }

        #[test]
        fn prop_rowset_round_trip(start in -1i64..100, idx in 0usize..64) {
            let g = rowset_to_global(start, idx);
            prop_assert_eq!(global_to_rowset(g, start), Some(idx));
        }
    }
}
