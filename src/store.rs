//! Ordered, sparse, write-once result storage.
//!
//! Results are keyed by a non-negative index. Every index can be written at
//! most once; a second write is rejected and leaves the stored value alone.
//!
//! # Filter mode
//!
//! Producers that complete work out of order (a parallel map, say) still
//! want consumers to see a dense sequence. In filter mode a result is held
//! back as *pending* until every lower index is either filled or marked
//! canceled. Canceled slots are elided and later results are renumbered
//! downward, so a result reported at raw index `k` becomes visible at
//! `k - (canceled indices below k)`:
//!
//! ```text
//!   raw:      0   1   2   3   4   5   6
//!             a   C   b   c   C   C   d        (C = canceled)
//!   visible:  0       1   2           3
//! ```
//!
//! Outside filter mode every stored index is visible immediately, and
//! [`ResultStore::count`] reports the length of the gap-free prefix.

use std::collections::BTreeMap;
use std::ops::{Add, Bound, Range, Sub};

/// A slot held back in filter mode.
#[derive(Debug)]
enum Pending<T> {
    Value(T),
    Canceled,
}

/// Sparse write-once result buffer.
#[derive(Debug)]
pub struct ResultStore<T> {
    /// Visible results keyed by visible index.
    results: BTreeMap<usize, T>,
    /// Filter mode only: slots keyed by raw index waiting for a gap to close.
    pending: BTreeMap<usize, Pending<T>>,
    filter_mode: bool,
    /// Next raw index handed out for `None`.
    insert_index: usize,
    /// Filter mode only: every raw index below this one has been resolved.
    resolved_raw: usize,
    /// Length of the gap-free visible prefix.
    visible_count: usize,
}

impl<T> Default for ResultStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ResultStore<T> {
    /// Creates an empty store in normal (non-filter) mode.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            results: BTreeMap::new(),
            pending: BTreeMap::new(),
            filter_mode: false,
            insert_index: 0,
            resolved_raw: 0,
            visible_count: 0,
        }
    }

    /// Switches filter mode on or off.
    ///
    /// Intended to be called before the first result is stored.
    pub fn set_filter_mode(&mut self, enable: bool) {
        self.filter_mode = enable;
    }

    /// Returns true if filter mode is on.
    #[must_use]
    pub const fn filter_mode(&self) -> bool {
        self.filter_mode
    }

    /// Stores `value` at `index`, or at the next sequential index for `None`.
    ///
    /// Returns false, without mutating anything, if the index is occupied.
    pub fn add_result(&mut self, index: Option<usize>, value: T) -> bool {
        self.insert_one(index, value).is_some()
    }

    /// Stores `values` at contiguous indices starting at `index` (or at the
    /// next sequential index for `None`).
    ///
    /// The batch is rejected as a whole if any target index is occupied or
    /// if it is empty.
    pub fn add_results(&mut self, index: Option<usize>, values: Vec<T>) -> bool {
        self.insert_batch(index, values).is_some()
    }

    /// Marks `index` as permanently absent. Filter mode only.
    pub fn add_canceled(&mut self, index: usize) -> bool {
        self.add_canceled_range(index, 1)
    }

    /// Marks `count` indices starting at `index` as permanently absent.
    ///
    /// Returns false outside filter mode, for an empty range, or when any
    /// index in the range is already occupied.
    pub fn add_canceled_range(&mut self, index: usize, count: usize) -> bool {
        self.insert_canceled(index, count).is_some()
    }

    /// Returns true if a result is visible at `index`.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        self.results.contains_key(&index)
    }

    /// Returns the visible result at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.results.get(&index)
    }

    /// Returns a cursor positioned on `index`, if a result is visible there.
    #[must_use]
    pub fn result_at(&self, index: usize) -> Option<ResultCursor<'_, T>> {
        self.contains(index).then_some(ResultCursor {
            store: self,
            position: Some(index),
        })
    }

    /// Number of contiguous visible results starting at index 0.
    #[must_use]
    pub const fn count(&self) -> usize {
        self.visible_count
    }

    /// Returns true if no result is visible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Returns true if results are held back waiting for a gap to close.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending
            .values()
            .any(|slot| matches!(slot, Pending::Value(_)))
    }

    /// Cursor on the first visible result, or the end sentinel.
    #[must_use]
    pub fn begin(&self) -> ResultCursor<'_, T> {
        ResultCursor {
            store: self,
            position: self.first_key(),
        }
    }

    /// The end sentinel.
    #[must_use]
    pub const fn end(&self) -> ResultCursor<'_, T> {
        ResultCursor {
            store: self,
            position: None,
        }
    }

    /// Iterates visible `(index, value)` pairs in index order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (usize, &T)> + '_ {
        self.results.iter().map(|(index, value)| (*index, value))
    }

    /// Removes and returns every visible result in index order.
    ///
    /// Pending results are discarded; the store is left empty.
    pub fn take_all(&mut self) -> Vec<T> {
        let results = std::mem::take(&mut self.results);
        self.clear();
        results.into_values().collect()
    }

    /// Drops every result and resets the indices. Filter mode is kept.
    pub fn clear(&mut self) {
        self.results.clear();
        self.pending.clear();
        self.insert_index = 0;
        self.resolved_raw = 0;
        self.visible_count = 0;
    }

    /// Inserts one value; returns the visible range it exposed.
    pub(crate) fn insert_one(&mut self, index: Option<usize>, value: T) -> Option<Range<usize>> {
        let index = index.unwrap_or(self.insert_index);
        let end = index.checked_add(1)?;
        if self.is_occupied(index..end) {
            return None;
        }
        self.insert_index = self.insert_index.max(end);
        if self.filter_mode {
            self.pending.insert(index, Pending::Value(value));
            Some(self.sync_pending())
        } else {
            self.results.insert(index, value);
            self.extend_visible_prefix();
            Some(index..end)
        }
    }

    /// Inserts a contiguous batch; returns the visible range it exposed.
    pub(crate) fn insert_batch(
        &mut self,
        index: Option<usize>,
        values: Vec<T>,
    ) -> Option<Range<usize>> {
        if values.is_empty() {
            return None;
        }
        let index = index.unwrap_or(self.insert_index);
        let end = index.checked_add(values.len())?;
        if self.is_occupied(index..end) {
            return None;
        }
        self.insert_index = self.insert_index.max(end);
        if self.filter_mode {
            for (raw, value) in (index..end).zip(values) {
                self.pending.insert(raw, Pending::Value(value));
            }
            Some(self.sync_pending())
        } else {
            for (slot, value) in (index..end).zip(values) {
                self.results.insert(slot, value);
            }
            self.extend_visible_prefix();
            Some(index..end)
        }
    }

    /// Marks a canceled range; returns the visible range it exposed.
    pub(crate) fn insert_canceled(&mut self, index: usize, count: usize) -> Option<Range<usize>> {
        if !self.filter_mode || count == 0 {
            return None;
        }
        let end = index.checked_add(count)?;
        if self.is_occupied(index..end) {
            return None;
        }
        self.insert_index = self.insert_index.max(end);
        for raw in index..end {
            self.pending.insert(raw, Pending::Canceled);
        }
        Some(self.sync_pending())
    }

    fn is_occupied(&self, range: Range<usize>) -> bool {
        if self.filter_mode {
            range.start < self.resolved_raw || self.pending.range(range).next().is_some()
        } else {
            self.results.range(range).next().is_some()
        }
    }

    /// Moves every pending slot that no longer sits behind a gap into the
    /// visible map, eliding canceled slots.
    fn sync_pending(&mut self) -> Range<usize> {
        let begin = self.results.len();
        while let Some(slot) = self.pending.remove(&self.resolved_raw) {
            if let Pending::Value(value) = slot {
                let visible = self.results.len();
                self.results.insert(visible, value);
            }
            self.resolved_raw += 1;
        }
        self.visible_count = self.results.len();
        begin..self.visible_count
    }

    fn extend_visible_prefix(&mut self) {
        while self.results.contains_key(&self.visible_count) {
            self.visible_count += 1;
        }
    }

    fn first_key(&self) -> Option<usize> {
        self.results.keys().next().copied()
    }

    fn last_key(&self) -> Option<usize> {
        self.results.keys().next_back().copied()
    }

    fn key_after(&self, index: usize) -> Option<usize> {
        self.results
            .range((Bound::Excluded(index), Bound::Unbounded))
            .next()
            .map(|(k, _)| *k)
    }

    fn key_before(&self, index: usize) -> Option<usize> {
        self.results.range(..index).next_back().map(|(k, _)| *k)
    }
}

/// Bidirectional cursor over the visible results of a [`ResultStore`].
///
/// Moving past either end lands on the end sentinel, which compares equal
/// to [`ResultStore::end`]. Stepping backwards from the end sentinel lands
/// on the last visible result.
#[derive(Debug)]
pub struct ResultCursor<'a, T> {
    store: &'a ResultStore<T>,
    position: Option<usize>,
}

impl<T> Clone for ResultCursor<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ResultCursor<'_, T> {}

impl<'a, T> ResultCursor<'a, T> {
    /// Visible index of the current result, or `None` at the end sentinel.
    #[must_use]
    pub const fn index(&self) -> Option<usize> {
        self.position
    }

    /// The current result, or `None` at the end sentinel.
    #[must_use]
    pub fn value(&self) -> Option<&'a T> {
        self.position.and_then(|index| self.store.get(index))
    }

    /// Returns true at the end sentinel.
    #[must_use]
    pub const fn is_end(&self) -> bool {
        self.position.is_none()
    }

    /// Moves forward one result.
    pub fn step_forward(&mut self) {
        self.position = self.position.and_then(|index| self.store.key_after(index));
    }

    /// Moves back one result.
    pub fn step_back(&mut self) {
        self.position = match self.position {
            Some(index) => self.store.key_before(index),
            None => self.store.last_key(),
        };
    }

    /// Moves by `offset` results (negative moves backwards).
    #[must_use]
    pub fn offset(mut self, offset: isize) -> Self {
        if offset >= 0 {
            for _ in 0..offset {
                if self.is_end() {
                    break;
                }
                self.step_forward();
            }
        } else {
            let mut remaining = offset.unsigned_abs();
            // Stepping back from the end sentinel is the first step.
            if self.is_end() && remaining > 0 {
                self.step_back();
                remaining -= 1;
            }
            for _ in 0..remaining {
                if self.is_end() {
                    break;
                }
                self.step_back();
            }
        }
        self
    }
}

impl<T> PartialEq for ResultCursor<'_, T> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.store, other.store) && self.position == other.position
    }
}

impl<T> Eq for ResultCursor<'_, T> {}

impl<T> Add<isize> for ResultCursor<'_, T> {
    type Output = Self;

    fn add(self, rhs: isize) -> Self {
        self.offset(rhs)
    }
}

impl<T> Sub<isize> for ResultCursor<'_, T> {
    type Output = Self;

    fn sub(self, rhs: isize) -> Self {
        self.offset(-rhs)
    }
}

#[allow(clippy::copy_iterator)]
impl<'a, T> Iterator for ResultCursor<'a, T> {
    type Item = (usize, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.position?;
        let value = self.store.get(index)?;
        self.step_forward();
        Some((index, value))
    }
}
