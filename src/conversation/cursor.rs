//! History pagination state machine.
//!
//! ```text
//! Idle ──start──> Loading(0) ──complete──> Loaded(p, has_more)
//!                     ▲                        │ next_page (has_more)
//!                     │ refresh (any state)    ▼
//!                     └──────────────────  Loading(p + 1)
//! ```
//!
//! A failed fetch falls back to the last `Loaded` state so pagination
//! progress survives and the same page can be retried.

/// Result of the last successful page fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Loaded {
    pub page: u32,
    pub total_pages: u32,
    pub has_more: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Idle,
    Loading {
        page: u32,
        /// State to fall back to if this fetch fails
        fallback: Option<Loaded>,
    },
    Loaded(Loaded),
}

#[derive(Debug, Clone)]
pub struct PaginationCursor {
    state: CursorState,
}

impl Default for PaginationCursor {
    fn default() -> Self {
        Self {
            state: CursorState::Idle,
        }
    }
}

impl PaginationCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, CursorState::Loading { .. })
    }

    /// Whether older pages can be requested. False while a refresh is pending.
    pub fn has_more(&self) -> bool {
        match self.state {
            CursorState::Loaded(loaded) => loaded.has_more,
            CursorState::Loading {
                fallback: Some(loaded),
                ..
            } => loaded.has_more,
            _ => false,
        }
    }

    /// Highest page index merged so far.
    pub fn loaded_page(&self) -> Option<u32> {
        match self.state {
            CursorState::Loaded(loaded) => Some(loaded.page),
            CursorState::Loading { fallback, .. } => fallback.map(|l| l.page),
            CursorState::Idle => None,
        }
    }

    /// `Idle -> Loading(0)`. Returns the page to fetch, or `None` if the
    /// cursor already left `Idle`.
    pub fn start(&mut self) -> Option<u32> {
        match self.state {
            CursorState::Idle => {
                self.state = CursorState::Loading {
                    page: 0,
                    fallback: None,
                };
                Some(0)
            }
            _ => None,
        }
    }

    /// `Loaded(p, has_more) -> Loading(p + 1)`. Returns the page to fetch.
    pub fn next_page(&mut self) -> Option<u32> {
        match self.state {
            CursorState::Loaded(loaded) if loaded.has_more => {
                let page = loaded.page + 1;
                self.state = CursorState::Loading {
                    page,
                    fallback: Some(loaded),
                };
                Some(page)
            }
            _ => None,
        }
    }

    /// Reset to page 0 from any state. Always returns 0.
    pub fn refresh(&mut self) -> u32 {
        self.state = CursorState::Idle;
        self.start().unwrap_or(0)
    }

    /// Record a successful fetch of `page`.
    ///
    /// Returns the new state, or `None` if the cursor was not waiting for
    /// that page (a stale response).
    pub fn complete(&mut self, page: u32, total_pages: u32, received: usize) -> Option<Loaded> {
        match self.state {
            CursorState::Loading { page: expected, .. } if expected == page => {
                let has_more = received > 0 && page.saturating_add(1) < total_pages;
                let loaded = Loaded {
                    page,
                    total_pages,
                    has_more,
                };
                self.state = CursorState::Loaded(loaded);
                Some(loaded)
            }
            _ => None,
        }
    }

    /// Record a failed fetch of `page`, falling back to the previous state.
    ///
    /// Returns false if the cursor was not waiting for that page.
    pub fn fail(&mut self, page: u32) -> bool {
        match self.state {
            CursorState::Loading {
                page: expected,
                fallback,
            } if expected == page => {
                self.state = match fallback {
                    Some(loaded) => CursorState::Loaded(loaded),
                    None => CursorState::Idle,
                };
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_page_with_more() {
        let mut cursor = PaginationCursor::new();
        assert_eq!(cursor.start(), Some(0));
        assert!(cursor.is_loading());
        assert_eq!(cursor.start(), None);

        let loaded = cursor.complete(0, 2, 2).unwrap();
        assert!(loaded.has_more);
        assert_eq!(cursor.next_page(), Some(1));

        let loaded = cursor.complete(1, 2, 2).unwrap();
        assert!(!loaded.has_more);
        assert_eq!(cursor.next_page(), None);
        assert_eq!(cursor.loaded_page(), Some(1));
    }

    #[test]
    fn test_empty_page_ends_pagination() {
        let mut cursor = PaginationCursor::new();
        cursor.start();
        // Server claims more pages but sent nothing.
        let loaded = cursor.complete(0, 5, 0).unwrap();
        assert!(!loaded.has_more);
        assert_eq!(cursor.next_page(), None);
    }

    #[test]
    fn test_no_concurrent_page_loads() {
        let mut cursor = PaginationCursor::new();
        cursor.start();
        cursor.complete(0, 3, 50);
        assert_eq!(cursor.next_page(), Some(1));
        assert_eq!(cursor.next_page(), None);
    }

    #[test]
    fn test_failure_returns_to_previous_loaded() {
        let mut cursor = PaginationCursor::new();
        cursor.start();
        cursor.complete(0, 3, 50);
        cursor.next_page();

        assert!(cursor.fail(1));
        assert!(!cursor.is_loading());
        assert_eq!(cursor.loaded_page(), Some(0));
        assert!(cursor.has_more());
        // Retry asks for the same page again.
        assert_eq!(cursor.next_page(), Some(1));
    }

    #[test]
    fn test_initial_failure_returns_to_idle() {
        let mut cursor = PaginationCursor::new();
        cursor.start();
        assert!(cursor.fail(0));
        assert!(!cursor.is_loading());
        assert_eq!(cursor.loaded_page(), None);
        assert_eq!(cursor.start(), Some(0));
    }

    #[test]
    fn test_refresh_discards_has_more_until_response() {
        let mut cursor = PaginationCursor::new();
        cursor.start();
        cursor.complete(0, 4, 50);
        cursor.next_page();
        cursor.complete(1, 4, 50);
        assert!(cursor.has_more());

        assert_eq!(cursor.refresh(), 0);
        assert!(!cursor.has_more());
        assert_eq!(cursor.loaded_page(), None);

        // The page-2 response of the old cycle is stale now.
        assert_eq!(cursor.complete(2, 4, 50), None);
        assert!(!cursor.fail(2));

        cursor.complete(0, 4, 50);
        assert!(cursor.has_more());
        assert_eq!(cursor.next_page(), Some(1));
    }
}
