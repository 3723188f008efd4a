use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Maximum characters the remote service accepts in one rich-text run
pub const MAX_RUN_CHARS: usize = 2000;

/// A block as the remote service sends and receives it.
///
/// Only `id`, `type` and `has_children` are interpreted directly; every other
/// key (the variant payload keyed by the type tag, timestamps, colours...) is
/// kept verbatim in `fields` so serialization never loses data the local text
/// form cannot express.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default)]
    pub has_children: bool,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RemoteRecord {
    /// A record for a block that does not exist remotely yet
    pub fn new(block_type: impl Into<String>, payload: Value) -> Self {
        let block_type = block_type.into();
        let mut fields = Map::new();
        fields.insert(block_type.clone(), payload);
        Self {
            id: None,
            block_type,
            has_children: false,
            fields,
        }
    }

    /// The variant payload (`record[record.type]`)
    pub fn payload(&self) -> Option<&Map<String, Value>> {
        self.fields.get(&self.block_type).and_then(Value::as_object)
    }

    pub fn set_payload(&mut self, payload: Map<String, Value>) {
        self.fields
            .insert(self.block_type.clone(), Value::Object(payload));
    }
}

/// A record together with its fetched descendants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordNode {
    pub record: RemoteRecord,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RecordNode>,
}

impl RecordNode {
    pub fn leaf(record: RemoteRecord) -> Self {
        Self {
            record,
            children: Vec::new(),
        }
    }
}

/// Concatenated plain text of a `rich_text` array.
pub fn plain_text(runs: Option<&Value>) -> String {
    let Some(Value::Array(runs)) = runs else {
        return String::new();
    };
    runs.iter()
        .filter_map(|run| {
            run.get("plain_text")
                .and_then(Value::as_str)
                .or_else(|| run.pointer("/text/content").and_then(Value::as_str))
        })
        .collect()
}

/// Plain, unannotated runs for `text`, split to respect [`MAX_RUN_CHARS`].
pub fn plain_runs(text: &str) -> Value {
    if text.is_empty() {
        return Value::Array(Vec::new());
    }
    let chars: Vec<char> = text.chars().collect();
    let runs = chars
        .chunks(MAX_RUN_CHARS)
        .map(|chunk| {
            let content: String = chunk.iter().collect();
            json!({ "type": "text", "text": { "content": content } })
        })
        .collect();
    Value::Array(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn record_keeps_unknown_fields() {
        let raw = json!({
            "id": "b1",
            "type": "paragraph",
            "has_children": false,
            "created_time": "2024-01-01T00:00:00Z",
            "paragraph": { "rich_text": [], "color": "blue" }
        });
        let record: RemoteRecord = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(record.id.as_deref(), Some("b1"));
        assert_eq!(record.payload().unwrap()["color"], "blue");
        assert_eq!(serde_json::to_value(&record).unwrap(), raw);
    }

    #[test]
    fn plain_text_reads_both_run_shapes() {
        let runs = json!([
            { "type": "text", "plain_text": "Hello ", "text": { "content": "Hello " } },
            { "type": "text", "text": { "content": "world" } }
        ]);
        assert_eq!(plain_text(Some(&runs)), "Hello world");
        assert_eq!(plain_text(None), "");
    }

    #[test]
    fn long_text_is_split_into_runs() {
        let text = "a".repeat(MAX_RUN_CHARS + 5);
        let runs = plain_runs(&text);
        let runs = runs.as_array().unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(plain_text(Some(&Value::Array(runs.clone()))), text);
    }
}
