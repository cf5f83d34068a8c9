use core::iter::FusedIterator;

use crate::{error::StoreError, store::SequenceRow};

/// A contiguous run of `count` ids, `step` apart, starting at `start`.
///
/// Ranges are only handed out by allocators, so `step` is never zero.
///
/// # Example
/// ```
/// use seqrow::{BatchAllocator, Dialect, GeneratorConfig, IdAllocator, MemoryStore};
///
/// let allocator = BatchAllocator::new(
///     GeneratorConfig::new(Dialect::Postgres)
///         .with_initial_value(100)
///         .with_step_size(10),
///     MemoryStore::new(),
/// );
/// let range = allocator.allocate("orders", 3)?;
/// assert_eq!(range.end(), 130);
/// assert!(range.contains(110));
/// assert_eq!(range.into_iter().collect::<Vec<_>>(), [100, 110, 120]);
/// # Ok::<(), seqrow::Error>(())
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IdRange {
    start: i64,
    count: u64,
    step: u32,
}

impl IdRange {
    /// `step` must be positive; windows take it from a validated row.
    pub(crate) fn new(start: i64, count: u64, step: u32) -> Self {
        debug_assert!(step > 0, "step must be positive");
        Self { start, count, step }
    }

    /// The first id.
    pub const fn start(&self) -> i64 {
        self.start
    }

    pub const fn count(&self) -> u64 {
        self.count
    }

    pub const fn step(&self) -> u32 {
        self.step
    }

    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The exclusive upper bound, `start + count * step`.
    pub fn end(&self) -> i64 {
        self.start + self.span()
    }

    /// The `index`-th id, if the range is long enough.
    pub fn get(&self, index: u64) -> Option<i64> {
        (index < self.count).then(|| self.start + offset(index, self.step))
    }

    pub fn contains(&self, id: i64) -> bool {
        id >= self.start && id < self.end() && (id - self.start) % i64::from(self.step) == 0
    }

    /// Whether the spans of the two ranges do not overlap.
    pub fn is_disjoint(&self, other: &IdRange) -> bool {
        self.is_empty() || other.is_empty() || self.end() <= other.start || other.end() <= self.start
    }

    fn span(&self) -> i64 {
        offset(self.count, self.step)
    }
}

// Ranges are only built inside a window whose bounds fit in an `i64`.
#[allow(clippy::cast_possible_wrap)]
fn offset(units: u64, step: u32) -> i64 {
    units as i64 * i64::from(step)
}

impl IntoIterator for IdRange {
    type Item = i64;
    type IntoIter = IdRangeIter;

    fn into_iter(self) -> Self::IntoIter {
        IdRangeIter { range: self }
    }
}

/// Iterator over the ids of an [`IdRange`].
#[derive(Clone, Debug)]
pub struct IdRangeIter {
    range: IdRange,
}

impl Iterator for IdRangeIter {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        let id = self.range.get(0)?;
        self.range.start += i64::from(self.range.step);
        self.range.count -= 1;
        Some(id)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = usize::try_from(self.range.count).unwrap_or(usize::MAX);
        (len, usize::try_from(self.range.count).ok())
    }
}

impl ExactSizeIterator for IdRangeIter {}

impl FusedIterator for IdRangeIter {}

/// The ids one process holds for one name: `[next, limit)`, `step` apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct BatchWindow {
    next: i64,
    limit: i64,
    step: u32,
}

impl BatchWindow {
    /// The window obtained by advancing `row` far enough for `count` units,
    /// or for the row's fetch size when that is larger.
    ///
    /// The returned window's `limit` is the new `prev_value` to store.
    pub(crate) fn reserve(row: &SequenceRow, count: u64) -> Result<Self, StoreError> {
        if row.step_size == 0 || row.fetch_size == 0 {
            return Err(StoreError::InvalidRow(format!(
                "`{}` has step size {} and fetch size {}",
                row.name, row.step_size, row.fetch_size
            )));
        }
        let need = count.max(u64::from(row.fetch_size));
        let limit = i64::try_from(need)
            .ok()
            .and_then(|need| need.checked_mul(i64::from(row.step_size)))
            .and_then(|span| row.prev_value.checked_add(span))
            .ok_or_else(|| StoreError::Exhausted(row.name.clone()))?;

        Ok(Self {
            next: row.prev_value,
            limit,
            step: row.step_size,
        })
    }

    pub(crate) const fn limit(&self) -> i64 {
        self.limit
    }

    /// Units left before the window is exhausted.
    #[allow(clippy::cast_sign_loss)]
    pub(crate) fn remaining(&self) -> u64 {
        ((self.limit - self.next) / i64::from(self.step)) as u64
    }

    /// Cuts the first `count` units off the window.
    pub(crate) fn take(&mut self, count: u64) -> IdRange {
        debug_assert!(count <= self.remaining());
        let range = IdRange::new(self.next, count, self.step);
        self.next = range.end();
        range
    }

    /// Everything not yet handed out.
    pub(crate) fn unconsumed(&self) -> IdRange {
        IdRange::new(self.next, self.remaining(), self.step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(prev_value: i64, step_size: u32, fetch_size: u32) -> SequenceRow {
        SequenceRow {
            name: "orders".into(),
            prev_value,
            step_size,
            fetch_size,
        }
    }

    #[test]
    fn window_covers_fetch_size_or_request() {
        let window = BatchWindow::reserve(&row(40, 1, 10), 3).unwrap();
        assert_eq!(window.unconsumed(), IdRange::new(40, 10, 1));
        assert_eq!(window.limit(), 50);

        let window = BatchWindow::reserve(&row(40, 1, 10), 25).unwrap();
        assert_eq!(window.limit(), 65);
        assert_eq!(window.remaining(), 25);
    }

    #[test]
    fn step_size_scales_the_window() {
        let mut window = BatchWindow::reserve(&row(0, 5, 4), 1).unwrap();
        assert_eq!(window.limit(), 20);
        assert_eq!(window.remaining(), 4);

        let first = window.take(3);
        assert_eq!(first.into_iter().collect::<Vec<_>>(), [0, 5, 10]);
        assert_eq!(window.remaining(), 1);
        assert_eq!(window.take(1).start(), 15);
        assert_eq!(window.remaining(), 0);
    }

    #[test]
    fn overflow_is_exhaustion() {
        let err = BatchWindow::reserve(&row(i64::MAX - 5, 1, 10), 1).unwrap_err();
        assert!(matches!(err, StoreError::Exhausted(name) if name == "orders"));

        let err = BatchWindow::reserve(&row(0, 1, 1), u64::MAX).unwrap_err();
        assert!(matches!(err, StoreError::Exhausted(_)));
    }

    #[test]
    fn zero_sizes_are_invalid_rows() {
        assert!(matches!(
            BatchWindow::reserve(&row(0, 0, 10), 1),
            Err(StoreError::InvalidRow(_))
        ));
        assert!(matches!(
            BatchWindow::reserve(&row(0, 1, 0), 1),
            Err(StoreError::InvalidRow(_))
        ));
    }

    #[test]
    fn range_queries() {
        let range = IdRange::new(10, 4, 3);
        assert_eq!(range.end(), 22);
        assert_eq!(range.get(3), Some(19));
        assert_eq!(range.get(4), None);
        assert!(range.contains(13));
        assert!(!range.contains(14));
        assert!(!range.contains(22));
        assert_eq!(range.into_iter().len(), 4);

        assert!(range.is_disjoint(&IdRange::new(22, 1, 1)));
        assert!(!range.is_disjoint(&IdRange::new(21, 1, 1)));
        assert!(range.is_disjoint(&IdRange::new(0, 0, 1)));
    }
}
