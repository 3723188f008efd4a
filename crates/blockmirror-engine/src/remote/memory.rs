use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Map;
use uuid::Uuid;

use crate::model::registry;
use crate::model::{RecordNode, RemoteRecord};
use crate::remote::{ChildrenPage, PageMeta, Position, RemoteError, RemoteService, Result};

/// Which remote operation a call or an injected failure refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    FetchMetadata,
    FetchChildren,
    Append,
    Update,
    Delete,
}

/// One recorded call, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub kind: CallKind,
    /// Page or block the call addressed (the parent for appends)
    pub target: String,
    pub after: Option<String>,
    pub count: usize,
}

#[derive(Debug, Default)]
struct State {
    pages: HashMap<String, PageMeta>,
    records: HashMap<String, RemoteRecord>,
    /// Ordered children of every page and block
    children: HashMap<String, Vec<String>>,
    parents: HashMap<String, String>,
    failures: HashMap<(CallKind, String), VecDeque<RemoteError>>,
    calls: Vec<RemoteCall>,
    revision: u64,
}

/// In-process remote service with the same observable rules as the real one:
/// fresh ids on append, `after` must be a direct child, deletes cascade, and
/// block types cannot change through an update.
#[derive(Debug, Default)]
pub struct InMemoryRemote {
    state: Mutex<State>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a page holding `nodes`. Records without ids get fresh ones.
    pub fn add_page(&self, page_id: &str, title: &str, nodes: Vec<RecordNode>) {
        let mut state = self.state();
        state.pages.insert(
            page_id.to_string(),
            PageMeta {
                id: page_id.to_string(),
                title: title.to_string(),
                last_edited_time: None,
                extra: Map::new(),
            },
        );
        state.children.entry(page_id.to_string()).or_default();
        for node in nodes {
            state.insert_node(page_id, node);
        }
        state.touch(page_id);
    }

    /// Queue `error` as the answer to the next `kind` call on `target`
    pub fn fail_next(&self, kind: CallKind, target: &str, error: RemoteError) {
        self.state()
            .failures
            .entry((kind, target.to_string()))
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn record(&self, id: &str) -> Option<RemoteRecord> {
        self.state().records.get(id).cloned()
    }

    pub fn children_of(&self, id: &str) -> Vec<String> {
        self.state().children.get(id).cloned().unwrap_or_default()
    }

    /// Full current content of a page
    pub fn tree(&self, page_id: &str) -> Vec<RecordNode> {
        let state = self.state();
        state.nodes_under(page_id)
    }
}

impl State {
    fn begin(&mut self, kind: CallKind, target: &str, after: Option<&str>, count: usize) -> Result<()> {
        self.calls.push(RemoteCall {
            kind,
            target: target.to_string(),
            after: after.map(str::to_string),
            count,
        });
        match self
            .failures
            .get_mut(&(kind, target.to_string()))
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn exists(&self, id: &str) -> bool {
        self.pages.contains_key(id) || self.records.contains_key(id)
    }

    fn insert_node(&mut self, parent: &str, node: RecordNode) {
        let mut record = node.record;
        let id = record
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        record.id = Some(id.clone());
        record.has_children = !node.children.is_empty();
        self.attach(parent, None, record);
        for child in node.children {
            self.insert_node(&id, child);
        }
    }

    fn attach(&mut self, parent: &str, index: Option<usize>, record: RemoteRecord) {
        let Some(id) = record.id.clone() else {
            return;
        };
        let siblings = self.children.entry(parent.to_string()).or_default();
        let index = index.unwrap_or(siblings.len()).min(siblings.len());
        siblings.insert(index, id.clone());
        if let Some(parent_record) = self.records.get_mut(parent) {
            parent_record.has_children = true;
        }
        self.parents.insert(id.clone(), parent.to_string());
        self.children.entry(id.clone()).or_default();
        self.records.insert(id, record);
    }

    fn page_of(&self, id: &str) -> Option<String> {
        let mut current = id.to_string();
        loop {
            if self.pages.contains_key(&current) {
                return Some(current);
            }
            current = self.parents.get(&current)?.clone();
        }
    }

    fn touch(&mut self, id: &str) {
        self.revision += 1;
        let stamp = format!("rev-{}", self.revision);
        if let Some(page) = self.page_of(id).and_then(|p| self.pages.get_mut(&p)) {
            page.last_edited_time = Some(stamp);
        }
    }

    fn remove(&mut self, id: &str) {
        if let Some(parent) = self.parents.remove(id) {
            let now_empty = match self.children.get_mut(&parent) {
                Some(siblings) => {
                    siblings.retain(|c| c != id);
                    siblings.is_empty()
                }
                None => true,
            };
            if let Some(parent_record) = self.records.get_mut(&parent) {
                parent_record.has_children = !now_empty;
            }
        }
        let mut stack = vec![id.to_string()];
        while let Some(next) = stack.pop() {
            self.records.remove(&next);
            self.parents.remove(&next);
            if let Some(children) = self.children.remove(&next) {
                stack.extend(children);
            }
        }
    }

    fn nodes_under(&self, id: &str) -> Vec<RecordNode> {
        self.children
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|child| {
                self.records.get(child).map(|record| RecordNode {
                    record: record.clone(),
                    children: self.nodes_under(child),
                })
            })
            .collect()
    }
}

#[async_trait]
impl RemoteService for InMemoryRemote {
    async fn fetch_metadata(&self, page_id: &str) -> Result<PageMeta> {
        let mut state = self.state();
        state.begin(CallKind::FetchMetadata, page_id, None, 0)?;
        state
            .pages
            .get(page_id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(page_id.to_string()))
    }

    async fn fetch_children(
        &self,
        id: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<ChildrenPage> {
        let mut state = self.state();
        state.begin(CallKind::FetchChildren, id, cursor, page_size)?;
        let children = state
            .children
            .get(id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        let start = match cursor {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| RemoteError::Rejected(format!("bad cursor {cursor}")))?,
            None => 0,
        };
        let end = (start + page_size.max(1)).min(children.len());
        let records = children[start.min(end)..end]
            .iter()
            .filter_map(|c| state.records.get(c).cloned())
            .collect();
        let next_cursor = (end < children.len()).then(|| end.to_string());
        Ok(ChildrenPage {
            records,
            next_cursor,
        })
    }

    async fn append_children(
        &self,
        parent: &str,
        position: Position<'_>,
        records: Vec<RemoteRecord>,
    ) -> Result<Vec<RemoteRecord>> {
        let mut state = self.state();
        state.begin(CallKind::Append, parent, position.after(), records.len())?;
        if !state.exists(parent) {
            return Err(RemoteError::NotFound(parent.to_string()));
        }
        if let Some(parent_record) = state.records.get(parent) {
            let accepts = registry::lookup(&parent_record.block_type)
                .is_some_and(|spec| spec.supports_children);
            if !accepts {
                return Err(RemoteError::Rejected(format!(
                    "{} blocks cannot have children",
                    parent_record.block_type
                )));
            }
        }
        let siblings = state.children.get(parent);
        let mut index = match position {
            Position::Start => 0,
            Position::After(after) => {
                siblings
                    .and_then(|siblings| siblings.iter().position(|c| c == after))
                    .ok_or_else(|| {
                        RemoteError::Rejected(format!("{after} is not a child of {parent}"))
                    })?
                    + 1
            }
            Position::End => siblings.map_or(0, Vec::len),
        };
        let mut created = Vec::with_capacity(records.len());
        for mut record in records {
            if registry::lookup(&record.block_type).is_none_or(|spec| !spec.creatable) {
                return Err(RemoteError::Rejected(format!(
                    "cannot create {} blocks",
                    record.block_type
                )));
            }
            record.id = Some(Uuid::new_v4().to_string());
            record.has_children = false;
            state.attach(parent, Some(index), record.clone());
            index += 1;
            created.push(record);
        }
        state.touch(parent);
        Ok(created)
    }

    async fn update_block(&self, id: &str, mut record: RemoteRecord) -> Result<RemoteRecord> {
        let mut state = self.state();
        state.begin(CallKind::Update, id, None, 1)?;
        let existing = state
            .records
            .get(id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        if existing.block_type != record.block_type {
            return Err(RemoteError::Rejected(format!(
                "cannot change {} into {}",
                existing.block_type, record.block_type
            )));
        }
        record.id = Some(id.to_string());
        record.has_children = existing.has_children;
        state.records.insert(id.to_string(), record.clone());
        state.touch(id);
        Ok(record)
    }

    async fn delete_block(&self, id: &str) -> Result<()> {
        let mut state = self.state();
        state.begin(CallKind::Delete, id, None, 1)?;
        if !state.records.contains_key(id) {
            return Err(RemoteError::NotFound(id.to_string()));
        }
        state.touch(id);
        state.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn paragraph(text: &str) -> RemoteRecord {
        RemoteRecord::new(
            "paragraph",
            json!({ "rich_text": [{ "type": "text", "text": { "content": text } }] }),
        )
    }

    fn remote() -> InMemoryRemote {
        let remote = InMemoryRemote::new();
        let mut toggle = RemoteRecord::new("toggle", json!({ "rich_text": [] }));
        toggle.id = Some("t".into());
        remote.add_page(
            "page",
            "Page",
            vec![
                RecordNode {
                    record: toggle,
                    children: vec![RecordNode::leaf(paragraph("inner"))],
                },
                RecordNode::leaf(paragraph("tail")),
            ],
        );
        remote
    }

    #[tokio::test]
    async fn append_after_inserts_in_place() {
        let remote = remote();
        let tail = remote.children_of("page")[1].clone();
        let created = remote
            .append_children("page", Position::After("t"), vec![paragraph("a"), paragraph("b")])
            .await
            .unwrap();

        let ids: Vec<String> = created.iter().filter_map(|r| r.id.clone()).collect();
        assert_eq!(
            remote.children_of("page"),
            vec!["t".to_string(), ids[0].clone(), ids[1].clone(), tail]
        );
    }

    #[tokio::test]
    async fn append_at_start_goes_first() {
        let remote = remote();
        let created = remote
            .append_children("t", Position::Start, vec![paragraph("first")])
            .await
            .unwrap();
        assert_eq!(remote.children_of("t")[0], created[0].id.clone().unwrap());
        assert_eq!(remote.children_of("t").len(), 2);
    }

    #[tokio::test]
    async fn append_at_end_goes_last() {
        let remote = remote();
        let created = remote
            .append_children("page", Position::End, vec![paragraph("last")])
            .await
            .unwrap();
        let page = remote.children_of("page");
        assert_eq!(page.len(), 3);
        assert_eq!(page.last(), created[0].id.as_ref());
    }

    #[test]
    fn position_follows_the_preceding_sibling() {
        assert_eq!(Position::following(None), Position::Start);
        assert_eq!(Position::following(Some("a")), Position::After("a"));
        assert_eq!(Position::End.after(), None);
    }

    #[tokio::test]
    async fn after_must_be_a_direct_child() {
        let remote = remote();
        let inner = remote.children_of("t")[0].clone();
        let err = remote
            .append_children("page", Position::After(&inner), vec![paragraph("x")])
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Rejected(_)));
    }

    #[tokio::test]
    async fn delete_cascades() {
        let remote = remote();
        let inner = remote.children_of("t")[0].clone();
        remote.delete_block("t").await.unwrap();
        assert!(remote.record(&inner).is_none());
        assert_eq!(remote.children_of("page").len(), 1);
    }

    #[tokio::test]
    async fn update_cannot_change_type() {
        let remote = remote();
        let err = remote
            .update_block("t", RemoteRecord::new("quote", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Rejected(_)));
    }

    #[tokio::test]
    async fn injected_failures_fire_once() {
        let remote = remote();
        remote.fail_next(
            CallKind::Delete,
            "t",
            RemoteError::RateLimited { retry_after: None },
        );
        assert!(remote.delete_block("t").await.unwrap_err().is_retryable());
        remote.delete_block("t").await.unwrap();
        assert_eq!(remote.calls().len(), 2);
    }

    #[tokio::test]
    async fn children_are_paginated() {
        let remote = remote();
        let first = remote.fetch_children("page", None, 1).await.unwrap();
        assert_eq!(first.records.len(), 1);
        let cursor = first.next_cursor.unwrap();
        let second = remote
            .fetch_children("page", Some(&cursor), 1)
            .await
            .unwrap();
        assert_eq!(second.records.len(), 1);
        assert_eq!(second.next_cursor, None);
    }
}
