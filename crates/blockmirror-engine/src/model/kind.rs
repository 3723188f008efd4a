use serde::{Deserialize, Serialize};

use crate::model::registry::{self, TypeSpec};

/// Bullet style of a list item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListKind {
    Bulleted,
    Numbered,
}

/// The closed set of block variants the engine understands.
///
/// Anything the remote service sends that is not listed here becomes
/// [`BlockKind::Unsupported`], which renders as a read-only placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockKind {
    Paragraph,
    Heading {
        level: u8,
    },
    Quote,
    Toggle,
    ListItem {
        kind: ListKind,
        /// Display ordinal for numbered items; never sent to the remote
        number: Option<u32>,
    },
    Todo {
        checked: bool,
    },
    Code {
        language: Option<String>,
    },
    Divider,
    Callout {
        icon: Option<String>,
    },
    PageReference {
        title: String,
    },
    Unsupported {
        type_name: String,
    },
}

impl BlockKind {
    pub fn bulleted() -> Self {
        BlockKind::ListItem {
            kind: ListKind::Bulleted,
            number: None,
        }
    }

    pub fn numbered(number: u32) -> Self {
        BlockKind::ListItem {
            kind: ListKind::Numbered,
            number: Some(number),
        }
    }

    /// Wire type tag (`heading_2`, `to_do`, ...)
    pub fn tag(&self) -> &str {
        match self {
            BlockKind::Paragraph => "paragraph",
            BlockKind::Heading { level: 1 } => "heading_1",
            BlockKind::Heading { level: 2 } => "heading_2",
            BlockKind::Heading { .. } => "heading_3",
            BlockKind::Quote => "quote",
            BlockKind::Toggle => "toggle",
            BlockKind::ListItem {
                kind: ListKind::Bulleted,
                ..
            } => "bulleted_list_item",
            BlockKind::ListItem {
                kind: ListKind::Numbered,
                ..
            } => "numbered_list_item",
            BlockKind::Todo { .. } => "to_do",
            BlockKind::Code { .. } => "code",
            BlockKind::Divider => "divider",
            BlockKind::Callout { .. } => "callout",
            BlockKind::PageReference { .. } => "child_page",
            BlockKind::Unsupported { type_name } => type_name,
        }
    }

    /// Registry entry for this kind
    pub fn spec(&self) -> &'static TypeSpec {
        match self {
            BlockKind::Unsupported { .. } => &registry::UNSUPPORTED,
            other => registry::lookup(other.tag()).unwrap_or(&registry::UNSUPPORTED),
        }
    }

    pub fn is_editable(&self) -> bool {
        self.spec().editable
    }

    pub fn supports_children(&self) -> bool {
        self.spec().supports_children
    }

    pub fn is_creatable(&self) -> bool {
        self.spec().creatable
    }

    /// Whether continuation lines at the same level keep extending a region of this kind.
    pub fn is_multi_line(&self) -> bool {
        matches!(
            self,
            BlockKind::Paragraph | BlockKind::Quote | BlockKind::Code { .. }
        )
    }

    /// Structural equality ignoring display-only data (list numbering).
    pub fn same_shape(&self, other: &BlockKind) -> bool {
        match (self, other) {
            (BlockKind::ListItem { kind: a, .. }, BlockKind::ListItem { kind: b, .. }) => a == b,
            (a, b) => a == b,
        }
    }
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}
