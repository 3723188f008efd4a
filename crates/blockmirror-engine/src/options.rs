use std::time::Duration;

/// Tunables for one sync session
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    /// Spaces per nesting level in the text form
    pub indent_width: usize,
    /// Lines at the top of the text (title and spacing) that never hold blocks
    pub header_lines: usize,
    /// Deepest level fetched when pulling a page
    pub fetch_depth: usize,
    pub page_size: usize,
    /// Remote calls in flight at once during a run
    pub max_in_flight: usize,
    /// Attempts per remote call when the error is retryable
    pub max_attempts: usize,
    pub debounce: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            indent_width: 2,
            header_lines: 2,
            fetch_depth: 8,
            page_size: 100,
            max_in_flight: 4,
            max_attempts: 3,
            debounce: Duration::from_millis(300),
        }
    }
}
