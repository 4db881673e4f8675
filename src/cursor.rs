//! Bidirectional cursor over a filter list.

use crate::filter::FilterHandle;

/// Outcome of advancing a [`FilterCursor`] to the next filter implementing a
/// requested capability.
#[derive(Debug, PartialEq, Eq)]
pub enum CursorStep {
    /// The filter at the new position implements the synchronous variant.
    Sync(usize),
    /// The filter at the new position implements the asynchronous variant,
    /// which takes priority over the sync variant when both are present.
    Async(usize),
    /// The scan reached the relevant end of the list without a match.
    NotFound,
}

/// A single mutable index into an immutable filter slice, with helpers that
/// skip filters not implementing the capability being asked for.
pub struct FilterCursor<'a> {
    filters: &'a [FilterHandle],
    index: isize,
}

impl<'a> FilterCursor<'a> {
    pub fn new(filters: &'a [FilterHandle]) -> Self {
        Self { filters, index: -1 }
    }

    /// Resets the cursor to "before the first filter".
    pub fn reset(&mut self) {
        self.index = -1;
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn current(&self) -> Option<&'a FilterHandle> {
        if self.index < 0 {
            return None;
        }
        self.filters.get(self.index as usize)
    }

    /// Advances forward from the current position until a filter
    /// implementing either the sync or async variant of capability `S`/`A`
    /// is found, preferring async. `has_async`/`has_sync` test a candidate
    /// filter for each variant.
    pub fn next_matching(
        &mut self,
        has_async: impl Fn(&FilterHandle) -> bool,
        has_sync: impl Fn(&FilterHandle) -> bool,
    ) -> CursorStep {
        let mut i = self.index + 1;
        while (i as usize) < self.filters.len() {
            let handle = &self.filters[i as usize];
            if has_async(handle) {
                self.index = i;
                return CursorStep::Async(i as usize);
            }
            if has_sync(handle) {
                self.index = i;
                return CursorStep::Sync(i as usize);
            }
            i += 1;
        }
        self.index = self.filters.len() as isize;
        CursorStep::NotFound
    }

    /// Walks strictly backward from the current position (exclusive),
    /// used by the cancellation short-circuit to invoke `on_performed` on
    /// every filter whose `on_performing` already ran.
    pub fn prev_matching(
        &mut self,
        has_async: impl Fn(&FilterHandle) -> bool,
        has_sync: impl Fn(&FilterHandle) -> bool,
    ) -> CursorStep {
        let mut i = self.index - 1;
        while i >= 0 {
            let handle = &self.filters[i as usize];
            if has_async(handle) {
                self.index = i;
                return CursorStep::Async(i as usize);
            }
            if has_sync(handle) {
                self.index = i;
                return CursorStep::Sync(i as usize);
            }
            i -= 1;
        }
        self.index = -1;
        CursorStep::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Filter, FilterHandle};
    use std::sync::Arc;

    struct Plain;
    impl Filter for Plain {}

    fn handles(n: usize) -> Vec<FilterHandle> {
        (0..n)
            .map(|_| FilterHandle::new(Arc::new(Plain) as Arc<dyn Filter>))
            .collect()
    }

    #[test]
    fn next_matching_finds_first_match_forward() {
        let list = handles(3);
        let mut cursor = FilterCursor::new(&list);
        // match only index 1 and 2, via a predicate indexed by position
        let step = cursor.next_matching(|_| false, |h| std::ptr::eq(h, &list[1]));
        assert_eq!(step, CursorStep::Sync(1));
        let step = cursor.next_matching(|_| false, |h| std::ptr::eq(h, &list[2]));
        assert_eq!(step, CursorStep::Sync(2));
        let step = cursor.next_matching(|_| false, |_| false);
        assert_eq!(step, CursorStep::NotFound);
    }

    #[test]
    fn prefers_async_over_sync() {
        let list = handles(1);
        let mut cursor = FilterCursor::new(&list);
        let step = cursor.next_matching(|_| true, |_| true);
        assert_eq!(step, CursorStep::Async(0));
    }

    #[test]
    fn prev_matching_walks_strictly_before_current() {
        let list = handles(4);
        let mut cursor = FilterCursor::new(&list);
        cursor.next_matching(|_| false, |_| true); // index 0
        cursor.next_matching(|_| false, |_| true); // index 1
        cursor.next_matching(|_| false, |_| true); // index 2
        // now walk backward from index 2, exclusive: should hit 1 then 0
        let step = cursor.prev_matching(|_| false, |_| true);
        assert_eq!(step, CursorStep::Sync(1));
        let step = cursor.prev_matching(|_| false, |_| true);
        assert_eq!(step, CursorStep::Sync(0));
        let step = cursor.prev_matching(|_| false, |_| true);
        assert_eq!(step, CursorStep::NotFound);
    }

    #[test]
    fn empty_list_is_not_found_immediately() {
        let list: Vec<FilterHandle> = Vec::new();
        let mut cursor = FilterCursor::new(&list);
        assert_eq!(cursor.next_matching(|_| false, |_| true), CursorStep::NotFound);
    }
}
