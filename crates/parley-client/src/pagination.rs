//! History paging state for one conversation.

/// Result of a request for older history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A page was fetched; `added` excludes messages already cached.
    Loaded { fetched: usize, added: usize },
    /// The oldest message is already cached; no request was made.
    Exhausted,
    /// Another fetch for the same conversation is still running.
    Busy,
}

/// Tracks which page of history to request next.
///
/// Pages are numbered from the newest end: page `n` covers rows
/// `n * size ..= (n + 1) * size - 1` of the conversation ordered newest
/// first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Paginator {
    next_page: usize,
    exhausted: bool,
    in_flight: bool,
}

impl Paginator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Inclusive row window for `page`.
    pub fn window(page: usize, page_size: usize) -> (usize, usize) {
        let from = page * page_size;
        (from, from + page_size - 1)
    }

    /// Claim the next page for a fetch. `None` when history is exhausted or
    /// a fetch is already running.
    pub fn begin(&mut self) -> Option<usize> {
        if self.exhausted || self.in_flight {
            return None;
        }
        self.in_flight = true;
        Some(self.next_page)
    }

    /// Record a successful fetch of `fetched` rows for a claimed `page`.
    /// Returns `false`, changing nothing, when the claim is stale (the
    /// paginator was reset while the fetch ran).
    pub fn complete(&mut self, page: usize, fetched: usize, page_size: usize) -> bool {
        if !self.owns(page) {
            return false;
        }
        self.in_flight = false;
        self.next_page += 1;
        if fetched < page_size {
            self.exhausted = true;
        }
        true
    }

    /// Release the claim after a failed fetch; the same page is retried next.
    pub fn abort(&mut self, page: usize) {
        if self.owns(page) {
            self.in_flight = false;
        }
    }

    fn owns(&self, page: usize) -> bool {
        self.in_flight && self.next_page == page
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_follow_page_numbers() {
        assert_eq!(Paginator::window(0, 50), (0, 49));
        assert_eq!(Paginator::window(2, 50), (100, 149));
    }

    #[test]
    fn full_pages_advance_and_short_pages_exhaust() {
        let mut p = Paginator::new();
        assert_eq!(p.begin(), Some(0));
        assert_eq!(p.begin(), None, "second claim while in flight");
        assert!(p.complete(0, 50, 50));

        assert_eq!(p.begin(), Some(1));
        assert!(p.complete(1, 12, 50));
        assert!(p.is_exhausted());
        assert_eq!(p.begin(), None);
    }

    #[test]
    fn failed_fetch_retries_the_same_page() {
        let mut p = Paginator::new();
        assert_eq!(p.begin(), Some(0));
        p.abort(0);
        assert_eq!(p.begin(), Some(0));
    }

    #[test]
    fn completion_after_reset_is_ignored() {
        let mut p = Paginator::new();
        assert_eq!(p.begin(), Some(0));
        p = Paginator::new();
        assert!(!p.complete(0, 3, 50));
        assert!(!p.is_exhausted());
        assert_eq!(p.begin(), Some(0));
    }
}
