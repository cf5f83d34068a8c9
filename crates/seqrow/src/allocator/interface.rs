use crate::{allocator::IdRange, error::Result};

/// A minimal interface for handing out ids per logical name.
///
/// Implemented by [`BatchAllocator`] (one generator) and by [`Registry`]
/// (which first resolves the generator for a name).
///
/// [`BatchAllocator`]: crate::BatchAllocator
/// [`Registry`]: crate::Registry
pub trait IdAllocator {
    /// Returns `count` ids for `name` as one contiguous range.
    ///
    /// The range is disjoint from every range ever returned for `name` by any
    /// allocator sharing the same sequence row.
    ///
    /// # Errors
    ///
    /// Fails on an empty name, a zero count, an unresolvable name, or any
    /// store failure while refilling.
    fn allocate(&self, name: &str, count: u64) -> Result<IdRange>;

    /// Returns the next id for `name`.
    ///
    /// # Errors
    ///
    /// See [`IdAllocator::allocate`].
    fn next_id(&self, name: &str) -> Result<i64> {
        self.allocate(name, 1).map(|range| range.start())
    }

    /// Returns `count` ids for `name`, not necessarily contiguous.
    ///
    /// # Errors
    ///
    /// See [`IdAllocator::allocate`].
    fn next_ids(&self, name: &str, count: u64) -> Result<Vec<i64>> {
        self.allocate(name, count)
            .map(|range| range.into_iter().collect())
    }
}
