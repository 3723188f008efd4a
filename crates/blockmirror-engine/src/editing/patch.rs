use std::ops::Range;

/// Result of applying a command
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    /// Byte ranges of the new text touched by the edit; deletions appear as empty ranges
    pub changed: Vec<Range<usize>>,
    /// Lines of the new text touched by the edit
    pub changed_lines: Vec<Range<usize>>,
    pub version: u64,
}
