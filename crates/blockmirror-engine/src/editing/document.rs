use std::borrow::Cow;
use std::ops::Range;

use xi_rope::delta::DeltaElement;
use xi_rope::{Delta, LinesMetric, Rope, RopeInfo};

use crate::editing::anchors::{AnchorId, AnchorSet};
use crate::editing::{Cmd, Patch, TextHost};

/// The page text, held in one xi-rope buffer.
///
/// All changes go through [`Cmd`], which compiles to a `Delta`; the same
/// delta updates the buffer and transforms every anchor, so block ranges
/// follow edits without the text ever being rescanned.
///
/// ```rust
/// # use blockmirror_engine::editing::{Cmd, Document, TextHost};
/// let mut doc = Document::from_text("# Title\nbody\n");
/// let anchor = doc.create_anchor(1..2);
///
/// doc.apply(Cmd::InsertLines { before: 0, lines: vec!["new".into()] });
///
/// assert_eq!(doc.anchor_lines(anchor), Some(2..3));
/// assert_eq!(doc.line(2).as_deref(), Some("body"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub(crate) buffer: Rope,
    /// Incremented on every edit, including full resets
    pub(crate) version: u64,
    pub(crate) anchors: AnchorSet,
}

impl Document {
    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        let text = std::str::from_utf8(bytes)?;
        Ok(Self::from_text(text))
    }

    pub fn from_text(text: &str) -> Self {
        Self {
            buffer: Rope::from(text),
            version: 0,
            anchors: AnchorSet::default(),
        }
    }

    /// Apply a command, transforming anchors through the resulting delta.
    pub fn apply(&mut self, cmd: Cmd) -> Patch {
        let delta = self.compile_command(&cmd);
        let changed = changed_ranges(&delta);

        self.buffer = delta.apply(&self.buffer);
        self.anchors.transform(&delta, self.buffer.len());
        self.version += 1;

        let changed_lines = changed
            .iter()
            .map(|range| {
                let first = self.line_of_offset(range.start);
                let last = self.line_of_offset(range.end.max(range.start));
                first..last + 1
            })
            .collect();
        Patch {
            changed,
            changed_lines,
            version: self.version,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn text(&self) -> String {
        self.buffer.to_string()
    }

    pub fn anchors(&self) -> &AnchorSet {
        &self.anchors
    }

    pub(crate) fn len(&self) -> usize {
        self.buffer.len()
    }

    pub(crate) fn ends_with_newline(&self) -> bool {
        let len = self.len();
        len > 0 && self.slice(len - 1..len) == "\n"
    }

    pub(crate) fn slice(&self, range: Range<usize>) -> Cow<'_, str> {
        let len = self.len();
        let start = range.start.min(len);
        let end = range.end.min(len).max(start);
        self.buffer.slice_to_cow(start..end)
    }

    /// Byte offset where `line` starts; the buffer length past the last line
    pub(crate) fn line_start(&self, line: usize) -> usize {
        if line >= self.line_count() {
            return self.len();
        }
        self.buffer.offset_of_line(line)
    }

    fn line_of_offset(&self, offset: usize) -> usize {
        self.buffer.line_of_offset(offset.min(self.len()))
    }

    pub(crate) fn compile_command(&self, cmd: &Cmd) -> Delta<RopeInfo> {
        crate::editing::commands::compile_command(self, cmd)
    }
}

/// Inserted ranges in new-text coordinates, plus an empty range at each deletion.
fn changed_ranges(delta: &Delta<RopeInfo>) -> Vec<Range<usize>> {
    let mut changed = Vec::new();
    let mut old_pos = 0;
    let mut new_pos = 0;
    for op in &delta.els {
        match op {
            DeltaElement::Copy(from, to) => {
                if old_pos < *from {
                    changed.push(new_pos..new_pos);
                }
                new_pos += to - from;
                old_pos = *to;
            }
            DeltaElement::Insert(inserted) => {
                changed.push(new_pos..new_pos + inserted.len());
                new_pos += inserted.len();
            }
        }
    }
    if old_pos < delta.base_len {
        changed.push(new_pos..new_pos);
    }
    changed
}

impl TextHost for Document {
    fn line_count(&self) -> usize {
        let breaks = self.buffer.measure::<LinesMetric>();
        if self.len() > 0 && !self.ends_with_newline() {
            breaks + 1
        } else {
            breaks
        }
    }

    fn line(&self, index: usize) -> Option<String> {
        if index >= self.line_count() {
            return None;
        }
        let start = self.buffer.offset_of_line(index);
        let end = self.line_start(index + 1);
        let text = self.slice(start..end);
        Some(text.strip_suffix('\n').unwrap_or(&text).to_string())
    }

    fn reset(&mut self, text: &str) {
        self.buffer = Rope::from(text);
        self.anchors.clear_all();
        self.version += 1;
    }

    fn create_anchor(&mut self, lines: Range<usize>) -> AnchorId {
        let start = self.line_start(lines.start);
        let end = self.line_start(lines.end);
        self.anchors.create(start..end)
    }

    fn anchor_lines(&self, id: AnchorId) -> Option<Range<usize>> {
        let range = self.anchors.range(id)?;
        let first = self.line_of_offset(range.start);
        let last = self.line_of_offset(range.end - 1);
        Some(first..last + 1)
    }

    fn clear_anchor(&mut self, id: AnchorId) {
        self.anchors.clear(id);
    }

    fn version(&self) -> u64 {
        self.version
    }
}
