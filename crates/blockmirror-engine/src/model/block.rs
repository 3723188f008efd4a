use serde::{Serialize, Serializer};
use serde_json::{Map, Value, json};

use crate::error::ModelError;
use crate::model::kind::BlockKind;
use crate::model::record::{RemoteRecord, plain_runs, plain_text};
use crate::model::registry::{self, classify, dedent, strip_quote};

/// Identifier of a block: the remote id once known, a local placeholder before that.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockId {
    Remote(String),
    Temp(u64),
}

impl BlockId {
    pub fn is_temp(&self) -> bool {
        matches!(self, BlockId::Temp(_))
    }

    pub fn remote(&self) -> Option<&str> {
        match self {
            BlockId::Remote(id) => Some(id),
            BlockId::Temp(_) => None,
        }
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockId::Remote(id) => f.write_str(id),
            BlockId::Temp(n) => write!(f, "tmp-{n}"),
        }
    }
}

impl From<&str> for BlockId {
    fn from(id: &str) -> Self {
        BlockId::Remote(id.to_string())
    }
}

impl Serialize for BlockId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One typed node of the content tree.
///
/// Hierarchy fields (`parent`, `children`, `depth`) are owned by
/// [`BlockTree`](crate::model::BlockTree); a block on its own only knows its
/// content and the state last acknowledged by the remote service.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub(crate) id: BlockId,
    pub(crate) kind: BlockKind,
    pub(crate) text: String,
    /// Kind as last acknowledged remotely; also the type-change reference
    pub(crate) synced_kind: BlockKind,
    pub(crate) synced_text: String,
    pub(crate) dirty: bool,
    /// The record this block was loaded from, kept for lossless serialization
    pub(crate) origin: Option<RemoteRecord>,
    pub(crate) parent: Option<BlockId>,
    pub(crate) children: Vec<BlockId>,
    pub(crate) depth: usize,
}

impl Block {
    /// Build a block from a remote record without losing any of its fields.
    pub fn from_remote(record: RemoteRecord) -> Result<Self, ModelError> {
        let id = record
            .id
            .clone()
            .ok_or_else(|| ModelError::MissingId(record.block_type.clone()))?;
        let (kind, text) = decode_kind(&record);
        Ok(Self {
            id: BlockId::Remote(id),
            synced_kind: kind.clone(),
            synced_text: text.clone(),
            kind,
            text,
            dirty: false,
            origin: Some(record),
            parent: None,
            children: Vec::new(),
            depth: 0,
        })
    }

    /// A block materialised from local text, not yet known remotely
    pub fn new_local(id: BlockId, kind: BlockKind, text: impl Into<String>) -> Self {
        Self {
            id,
            synced_kind: kind.clone(),
            kind,
            text: text.into(),
            synced_text: String::new(),
            dirty: true,
            origin: None,
            parent: None,
            children: Vec::new(),
            depth: 0,
        }
    }

    pub fn id(&self) -> &BlockId {
        &self.id
    }

    pub fn kind(&self) -> &BlockKind {
        &self.kind
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn parent(&self) -> Option<&BlockId> {
        self.parent.as_ref()
    }

    pub fn children(&self) -> &[BlockId] {
        &self.children
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn origin(&self) -> Option<&RemoteRecord> {
        self.origin.as_ref()
    }

    /// Tag of the type the remote service currently holds
    pub fn synced_type(&self) -> &str {
        self.synced_kind.tag()
    }

    pub fn is_editable(&self) -> bool {
        self.synced_kind.is_editable()
    }

    pub fn supports_children(&self) -> bool {
        self.kind.supports_children()
    }

    /// Structural marker differs from the load-time snapshot, independent of text edits
    pub fn type_changed(&self) -> bool {
        self.kind.tag() != self.synced_kind.tag()
    }

    /// Render this block's own lines (never its children's) at `depth`.
    pub fn render(&self, depth: usize, indent_width: usize) -> Vec<String> {
        let pad = " ".repeat(depth * indent_width);
        let marker = registry::marker(&self.kind);
        match &self.kind {
            BlockKind::Code { .. } => {
                let mut lines = vec![format!("{pad}{marker}")];
                if !self.text.is_empty() {
                    lines.extend(self.text.split('\n').map(|l| format!("{pad}{l}")));
                }
                lines.push(format!("{pad}{}", registry::FENCE));
                lines
            }
            BlockKind::Divider => vec![format!("{pad}{}", registry::DIVIDER)],
            BlockKind::PageReference { title } => vec![format!(
                "{pad}{}{title}{}",
                registry::PAGE_OPEN,
                registry::PAGE_CLOSE
            )],
            BlockKind::Unsupported { type_name } => {
                vec![format!("{pad}{}{type_name}]", registry::UNSUPPORTED_OPEN)]
            }
            kind => {
                let mut parts = self.text.split('\n');
                let first = parts.next().unwrap_or_default();
                let mut lines = vec![if first.is_empty() {
                    format!("{pad}{}", marker.trim_end())
                } else {
                    format!("{pad}{marker}{}", registry::escape_content(kind, first))
                }];
                let continuation = if matches!(kind, BlockKind::Quote) {
                    registry::QUOTE
                } else {
                    ""
                };
                lines.extend(parts.map(|l| format!("{pad}{continuation}{l}")));
                lines
            }
        }
    }

    /// Re-read content from the block's current lines.
    ///
    /// Returns true when text or kind changed. Read-only blocks ignore edits
    /// and never become dirty.
    pub fn parse<S: AsRef<str>>(&mut self, lines: &[S], depth: usize, indent_width: usize) -> bool {
        if !self.is_editable() || lines.is_empty() {
            return false;
        }
        let width = depth * indent_width;
        let local: Vec<&str> = lines
            .iter()
            .map(|l| dedent(l.as_ref(), width, indent_width))
            .collect();
        let first = classify(local[0]);
        let text = match &first.kind {
            BlockKind::Code { .. } => {
                let mut body = &local[1..];
                if let Some((last, rest)) = body.split_last()
                    && registry::is_fence(last)
                {
                    body = rest;
                }
                body.join("\n")
            }
            BlockKind::Quote => std::iter::once(first.content)
                .chain(local[1..].iter().map(|l| strip_quote(l)))
                .collect::<Vec<_>>()
                .join("\n"),
            _ => std::iter::once(first.content)
                .chain(local[1..].iter().copied())
                .collect::<Vec<_>>()
                .join("\n"),
        };
        let changed = text != self.text || first.kind != self.kind;
        self.kind = first.kind;
        self.text = text;
        self.recompute_dirty();
        changed
    }

    pub(crate) fn recompute_dirty(&mut self) {
        self.dirty = self.id.is_temp()
            || (self.is_editable()
                && (self.text != self.synced_text || !self.kind.same_shape(&self.synced_kind)));
    }

    /// Current state merged with the preserved original record.
    pub fn serialize(&self) -> RemoteRecord {
        let same_type = !self.type_changed();
        let mut record = match (&self.origin, same_type) {
            (Some(origin), true) => origin.clone(),
            _ => RemoteRecord::new(self.kind.tag(), Value::Object(Map::new())),
        };
        if !self.is_editable() || !self.kind.is_editable() {
            return record;
        }

        let mut payload = record.payload().cloned().unwrap_or_default();
        if !same_type
            && let Some(color) = self
                .origin
                .as_ref()
                .and_then(|o| o.payload())
                .and_then(|p| p.get("color"))
        {
            payload.insert("color".into(), color.clone());
        }
        if !matches!(self.kind, BlockKind::Divider) {
            let keep_runs = same_type
                && self.text == self.synced_text
                && payload.contains_key("rich_text");
            if !keep_runs {
                payload.insert("rich_text".into(), plain_runs(&self.text));
            }
        }
        match &self.kind {
            BlockKind::Todo { checked } => {
                payload.insert("checked".into(), Value::Bool(*checked));
            }
            BlockKind::Code { language } => {
                let language = language.as_deref().unwrap_or("plain text");
                payload.insert("language".into(), Value::String(language.to_string()));
            }
            BlockKind::Callout { icon: Some(icon) } => {
                payload.insert("icon".into(), json!({ "type": "emoji", "emoji": icon }));
            }
            // An absent key would leave the remote icon in place.
            BlockKind::Callout { icon: None }
                if payload.get("icon").is_some_and(|icon| !icon.is_null()) =>
            {
                payload.insert("icon".into(), Value::Null);
            }
            _ => {}
        }
        record.set_payload(payload);
        record
    }

    /// Record that the remote service now holds `kind`/`text`.
    ///
    /// Edits made after the call was issued keep the block dirty.
    pub(crate) fn acknowledge(&mut self, kind: BlockKind, text: String, record: RemoteRecord) {
        self.synced_kind = kind;
        self.synced_text = text;
        self.origin = Some(record);
        self.recompute_dirty();
    }
}

fn decode_kind(record: &RemoteRecord) -> (BlockKind, String) {
    let payload = record.payload();
    let field = |key: &str| payload.and_then(|p| p.get(key));
    let text = || plain_text(field("rich_text"));
    match record.block_type.as_str() {
        "paragraph" => (BlockKind::Paragraph, text()),
        "heading_1" => (BlockKind::Heading { level: 1 }, text()),
        "heading_2" => (BlockKind::Heading { level: 2 }, text()),
        "heading_3" => (BlockKind::Heading { level: 3 }, text()),
        "quote" => (BlockKind::Quote, text()),
        "toggle" => (BlockKind::Toggle, text()),
        "bulleted_list_item" => (BlockKind::bulleted(), text()),
        "numbered_list_item" => (BlockKind::numbered(1), text()),
        "to_do" => {
            let checked = field("checked").and_then(Value::as_bool).unwrap_or(false);
            (BlockKind::Todo { checked }, text())
        }
        "code" => {
            let language = field("language")
                .and_then(Value::as_str)
                .map(str::to_string);
            (BlockKind::Code { language }, text())
        }
        "divider" => (BlockKind::Divider, String::new()),
        "callout" => {
            let icon = field("icon")
                .and_then(|icon| icon.get("emoji"))
                .and_then(Value::as_str)
                .map(str::to_string);
            (BlockKind::Callout { icon }, text())
        }
        "child_page" => {
            let title = field("title")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            (BlockKind::PageReference { title: title.clone() }, title)
        }
        other => (
            BlockKind::Unsupported {
                type_name: other.to_string(),
            },
            String::new(),
        ),
    }
}
