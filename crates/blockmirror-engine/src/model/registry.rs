//! Type registry and the local text form.
//!
//! The registry is a static dispatch table keyed by wire type tag. The same
//! module owns the prefix table used to render blocks into text and, in
//! reverse, to infer the kind of a freshly typed line. Keeping both
//! directions here guarantees that a marker the renderer emits is always the
//! marker the classifier recognises.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

use crate::model::kind::{BlockKind, ListKind};

/// Static facts about one block type
#[derive(Debug, PartialEq, Eq)]
pub struct TypeSpec {
    pub tag: &'static str,
    /// Local edits may be sent back to the remote service
    pub editable: bool,
    /// The remote service accepts children under this type
    pub supports_children: bool,
    /// New blocks of this type may be created from text
    pub creatable: bool,
}

const fn spec(tag: &'static str, editable: bool, supports_children: bool) -> TypeSpec {
    TypeSpec {
        tag,
        editable,
        supports_children,
        creatable: editable,
    }
}

pub static TYPES: &[TypeSpec] = &[
    spec("paragraph", true, true),
    spec("heading_1", true, false),
    spec("heading_2", true, false),
    spec("heading_3", true, false),
    spec("quote", true, true),
    spec("toggle", true, true),
    spec("bulleted_list_item", true, true),
    spec("numbered_list_item", true, true),
    spec("to_do", true, true),
    spec("code", true, false),
    spec("divider", true, false),
    spec("callout", true, true),
    spec("child_page", false, false),
];

pub static UNSUPPORTED: TypeSpec = spec("unsupported", false, false);

pub fn lookup(tag: &str) -> Option<&'static TypeSpec> {
    TYPES.iter().find(|spec| spec.tag == tag)
}

pub const HEADING_MARKERS: [&str; 3] = ["# ", "## ", "### "];
pub const BULLET: &str = "- ";
pub const QUOTE: &str = "> ";
pub const TOGGLE: &str = "▸ ";
pub const CALLOUT: &str = "!>";
pub const TODO_OPEN: &str = "[ ] ";
pub const TODO_DONE: &str = "[x] ";
pub const DIVIDER: &str = "---";
pub const FENCE: &str = "```";
pub const PAGE_OPEN: &str = "[[";
pub const PAGE_CLOSE: &str = "]]";
pub const UNSUPPORTED_OPEN: &str = "[unsupported: ";
/// Leading character that makes the rest of a line's content literal
pub const ESCAPE: char = '\\';

static NUMBERED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,9})\.(?: |$)").expect("numbered list pattern is valid")
});

/// First-line prefix for a kind. Code blocks are fenced and handled by the caller.
pub fn marker(kind: &BlockKind) -> String {
    match kind {
        BlockKind::Paragraph => String::new(),
        BlockKind::Heading { level } => {
            let idx = usize::from((*level).clamp(1, 3) - 1);
            HEADING_MARKERS[idx].to_string()
        }
        BlockKind::Quote => QUOTE.to_string(),
        BlockKind::Toggle => TOGGLE.to_string(),
        BlockKind::ListItem {
            kind: ListKind::Bulleted,
            ..
        } => BULLET.to_string(),
        BlockKind::ListItem {
            kind: ListKind::Numbered,
            number,
        } => format!("{}. ", number.unwrap_or(1)),
        BlockKind::Todo { checked: false } => TODO_OPEN.to_string(),
        BlockKind::Todo { checked: true } => TODO_DONE.to_string(),
        BlockKind::Code { language } => {
            format!("{FENCE}{}", language.as_deref().unwrap_or_default())
        }
        BlockKind::Divider => DIVIDER.to_string(),
        BlockKind::Callout { icon: Some(icon) } => format!("{CALLOUT}{icon} "),
        BlockKind::Callout { icon: None } => format!("{CALLOUT} "),
        BlockKind::PageReference { .. } => PAGE_OPEN.to_string(),
        BlockKind::Unsupported { .. } => UNSUPPORTED_OPEN.to_string(),
    }
}

/// Result of reading the prefix of one (already de-indented) line
#[derive(Debug, Clone, PartialEq)]
pub struct Classified<'a> {
    pub kind: BlockKind,
    pub content: &'a str,
}

fn strip_marker<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.strip_prefix(marker)
        .or_else(|| (line == marker.trim_end()).then_some(""))
}

/// Infer a block kind from the leading marker of a line.
///
/// Markers are checked most specific first; anything unrecognised is plain text.
/// One [`ESCAPE`] at the start of the content is dropped.
pub fn classify(line: &str) -> Classified<'_> {
    let mut classified = classify_marker(line);
    if carries_text(&classified.kind) {
        classified.content = classified
            .content
            .strip_prefix(ESCAPE)
            .unwrap_or(classified.content);
    }
    classified
}

/// Content as it must be written after `kind`'s marker to read back unchanged.
///
/// Paragraphs have no marker, so text that looks like one (or that starts
/// with whitespace) is escaped; any kind escapes text that starts with the
/// escape character itself.
pub fn escape_content<'a>(kind: &BlockKind, text: &'a str) -> Cow<'a, str> {
    let needs_escape = text.starts_with(ESCAPE)
        || (*kind == BlockKind::Paragraph
            && (text.starts_with([' ', '\t'])
                || classify_marker(text).kind != BlockKind::Paragraph));
    if needs_escape {
        Cow::Owned(format!("{ESCAPE}{text}"))
    } else {
        Cow::Borrowed(text)
    }
}

fn carries_text(kind: &BlockKind) -> bool {
    !matches!(
        kind,
        BlockKind::Code { .. }
            | BlockKind::Divider
            | BlockKind::PageReference { .. }
            | BlockKind::Unsupported { .. }
    )
}

fn classify_marker(line: &str) -> Classified<'_> {
    if let Some(rest) = line.strip_prefix(FENCE) {
        let language = rest.trim();
        return Classified {
            kind: BlockKind::Code {
                language: (!language.is_empty()).then(|| language.to_string()),
            },
            content: "",
        };
    }
    if line.trim_end() == DIVIDER {
        return Classified {
            kind: BlockKind::Divider,
            content: "",
        };
    }
    for (idx, heading) in HEADING_MARKERS.iter().enumerate().rev() {
        if let Some(content) = strip_marker(line, heading) {
            return Classified {
                kind: BlockKind::Heading {
                    level: idx as u8 + 1,
                },
                content,
            };
        }
    }
    if let Some(content) = strip_marker(line, TODO_OPEN) {
        return Classified {
            kind: BlockKind::Todo { checked: false },
            content,
        };
    }
    if let Some(content) = strip_marker(line, TODO_DONE).or_else(|| strip_marker(line, "[X] ")) {
        return Classified {
            kind: BlockKind::Todo { checked: true },
            content,
        };
    }
    if let Some(inner) = line
        .strip_prefix(UNSUPPORTED_OPEN)
        .and_then(|rest| rest.strip_suffix(']'))
    {
        return Classified {
            kind: BlockKind::Unsupported {
                type_name: inner.trim().to_string(),
            },
            content: "",
        };
    }
    if let Some(title) = line
        .strip_prefix(PAGE_OPEN)
        .and_then(|rest| rest.strip_suffix(PAGE_CLOSE))
    {
        return Classified {
            kind: BlockKind::PageReference {
                title: title.to_string(),
            },
            content: title,
        };
    }
    if let Some(rest) = line.strip_prefix(CALLOUT) {
        let (icon, content) = match rest.strip_prefix(' ') {
            Some(content) => (None, content),
            None if rest.is_empty() => (None, ""),
            None => match rest.split_once(' ') {
                Some((icon, content)) => (Some(icon.to_string()), content),
                None => (Some(rest.to_string()), ""),
            },
        };
        return Classified {
            kind: BlockKind::Callout { icon },
            content,
        };
    }
    if let Some(content) = strip_marker(line, QUOTE) {
        return Classified {
            kind: BlockKind::Quote,
            content,
        };
    }
    if let Some(content) = strip_marker(line, TOGGLE) {
        return Classified {
            kind: BlockKind::Toggle,
            content,
        };
    }
    if let Some(content) = strip_marker(line, BULLET) {
        return Classified {
            kind: BlockKind::bulleted(),
            content,
        };
    }
    if let Some(caps) = NUMBERED.captures(line) {
        let whole = caps.get(0).map_or(0, |m| m.end());
        let number = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(1);
        return Classified {
            kind: BlockKind::numbered(number),
            content: &line[whole..],
        };
    }
    Classified {
        kind: BlockKind::Paragraph,
        content: line,
    }
}

/// Strip one quote marker from a continuation line, if present.
pub fn strip_quote(line: &str) -> &str {
    strip_marker(line, QUOTE).unwrap_or(line)
}

pub fn is_fence(line: &str) -> bool {
    line.trim_start().starts_with(FENCE)
}

/// Leading whitespace width, counting a tab as one full indent unit.
pub fn indent_width(line: &str, unit: usize) -> usize {
    line.chars()
        .take_while(|c| *c == ' ' || *c == '\t')
        .map(|c| if c == '\t' { unit.max(1) } else { 1 })
        .sum()
}

/// Nesting level of a line: `floor(leading whitespace / indent unit)`.
pub fn indent_level(line: &str, unit: usize) -> usize {
    indent_width(line, unit) / unit.max(1)
}

/// Remove up to `width` columns of leading whitespace.
pub fn dedent(line: &str, width: usize, unit: usize) -> &str {
    let mut consumed = 0;
    for (idx, c) in line.char_indices() {
        let w = match c {
            ' ' => 1,
            '\t' => unit.max(1),
            _ => return &line[idx..],
        };
        if consumed + w > width {
            return &line[idx..];
        }
        consumed += w;
    }
    ""
}
