use std::ops::Range;

use xi_rope::delta::Builder;
use xi_rope::{Delta, Rope, RopeInfo};

use crate::editing::Document;

/// Edits a user (or a test) can make to the page text
#[derive(Debug, Clone, PartialEq)]
pub enum Cmd {
    InsertText {
        at: usize,
        text: String,
    },
    DeleteRange {
        range: Range<usize>,
    },
    ReplaceRange {
        range: Range<usize>,
        text: String,
    },
    /// Insert whole lines so that the first one lands on line `before`
    InsertLines {
        before: usize,
        lines: Vec<String>,
    },
    /// Remove whole lines including their line breaks
    DeleteLines {
        lines: Range<usize>,
    },
    /// Replace the content of one line, keeping its line break
    ReplaceLine {
        line: usize,
        text: String,
    },
}

/// Compile a command into a delta
pub(crate) fn compile_command(doc: &Document, cmd: &Cmd) -> Delta<RopeInfo> {
    let len = doc.len();
    let mut builder = Builder::new(len);
    match cmd {
        Cmd::InsertText { at, text } => {
            let at = (*at).min(len);
            builder.replace(at..at, Rope::from(text));
        }
        Cmd::DeleteRange { range } => {
            builder.delete(clamp(range, len));
        }
        Cmd::ReplaceRange { range, text } => {
            builder.replace(clamp(range, len), Rope::from(text));
        }
        Cmd::InsertLines { before, lines } => {
            let at = doc.line_start(*before);
            let body = lines.join("\n");
            let text = if at == len && len > 0 && !doc.ends_with_newline() {
                format!("\n{body}")
            } else {
                format!("{body}\n")
            };
            builder.replace(at..at, Rope::from(text));
        }
        Cmd::DeleteLines { lines } => {
            let mut start = doc.line_start(lines.start);
            let end = doc.line_start(lines.end);
            // The final line has no break of its own; take the one before it.
            if end == len && start > 0 && start < end && !doc.ends_with_newline() {
                start -= 1;
            }
            builder.delete(start..end);
        }
        Cmd::ReplaceLine { line, text } => {
            let start = doc.line_start(*line);
            let mut end = doc.line_start(line + 1);
            if end > start && doc.slice(end - 1..end) == "\n" {
                end -= 1;
            }
            builder.replace(start..end, Rope::from(text));
        }
    }
    builder.build()
}

fn clamp(range: &Range<usize>, len: usize) -> Range<usize> {
    let start = range.start.min(len);
    start..range.end.clamp(start, len)
}
