//! Editing core: the page text and the anchors that keep blocks attached to it.
//!
//! The text lives in one rope-backed [`Document`]. Every edit is a [`Cmd`]
//! compiled to a delta; the delta is applied to the buffer and pushed through
//! the [`AnchorSet`](anchors::AnchorSet), so a block's line range is always a
//! function of the edits made since it was rendered.
//!
//! The sync layer only talks to the text through [`TextHost`], which keeps a
//! host editor's own buffer and mark facilities usable in place of
//! [`Document`].

use std::ops::Range;

pub mod anchors;
pub mod commands;
pub mod debounce;
pub mod document;
pub mod mapping;
pub mod patch;

pub use anchors::{Anchor, AnchorId};
pub use commands::Cmd;
pub use debounce::Debouncer;
pub use document::Document;
pub use mapping::{RangeMapping, RefreshReport};
pub use patch::Patch;

/// A line-oriented text buffer with position-tracking anchors.
///
/// Anchors cover whole lines when created. Afterwards the host keeps them
/// attached to the same text as edits happen around and inside them; an
/// anchor whose text was entirely deleted resolves to `None`.
pub trait TextHost {
    fn line_count(&self) -> usize;

    fn line(&self, index: usize) -> Option<String>;

    fn lines(&self, range: Range<usize>) -> Vec<String> {
        range.filter_map(|i| self.line(i)).collect()
    }

    /// Replace the whole text, dropping every anchor
    fn reset(&mut self, text: &str);

    fn create_anchor(&mut self, lines: Range<usize>) -> AnchorId;

    fn anchor_lines(&self, id: AnchorId) -> Option<Range<usize>>;

    fn clear_anchor(&mut self, id: AnchorId);

    /// Changes on every edit; used to tell whether the text moved under a sync
    fn version(&self) -> u64;
}
