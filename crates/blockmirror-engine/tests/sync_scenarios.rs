//! End-to-end runs against the in-memory remote service

use std::sync::Mutex;

use async_trait::async_trait;
use blockmirror_engine::editing::Cmd;
use blockmirror_engine::model::record::plain_text;
use blockmirror_engine::remote::{CallKind, ChildrenPage, PageMeta, Position, RemoteCall};
use blockmirror_engine::sync::{OperationKind, SyncHandle, open_page};
use blockmirror_engine::{
    BlockId, Document, FileCache, InMemoryRemote, RecordNode, RemoteError, RemoteRecord,
    RemoteService, SyncError, SyncOptions,
};
use futures::channel::oneshot;
use pretty_assertions::assert_eq;
use serde_json::json;

fn record(id: &str, tag: &str, text: &str) -> RemoteRecord {
    let mut record = RemoteRecord::new(
        tag,
        json!({ "rich_text": [{ "type": "text", "plain_text": text, "text": { "content": text } }] }),
    );
    record.id = Some(id.to_string());
    record
}

fn leaf(id: &str, tag: &str, text: &str) -> RecordNode {
    RecordNode::leaf(record(id, tag, text))
}

fn with_children(id: &str, tag: &str, text: &str, children: Vec<RecordNode>) -> RecordNode {
    RecordNode {
        record: record(id, tag, text),
        children,
    }
}

async fn open(nodes: Vec<RecordNode>) -> (InMemoryRemote, SyncHandle) {
    let remote = InMemoryRemote::new();
    remote.add_page("page", "Test page", nodes);
    let session = open_page(
        &remote,
        None::<&FileCache>,
        "page",
        Document::default(),
        SyncOptions::default(),
    )
    .await
    .unwrap();
    remote.clear_calls();
    (remote, SyncHandle::new(session))
}

fn text_of(remote: &InMemoryRemote, id: &str) -> String {
    let record = remote.record(id).unwrap();
    plain_text(record.payload().and_then(|p| p.get("rich_text")))
}

fn appends(remote: &InMemoryRemote) -> Vec<RemoteCall> {
    remote
        .calls()
        .into_iter()
        .filter(|c| c.kind == CallKind::Append)
        .collect()
}

#[tokio::test]
async fn unchanged_page_plans_nothing_repeatedly() {
    let (remote, handle) = open(vec![
        leaf("h1", "heading_1", "Title"),
        leaf("p", "paragraph", "body"),
    ])
    .await;

    for _ in 0..3 {
        let plan = handle.preview().await;
        assert!(!plan.has_changes());
        assert_eq!(plan.operation_count(), 0);
    }
    let report = handle.sync(&remote, |_| true).await.unwrap();
    assert_eq!(report.applied(), 0);
    assert!(remote.calls().is_empty());
}

#[tokio::test]
async fn paragraphs_that_look_like_markers_stay_paragraphs() {
    let texts = [
        "- milk and eggs",
        "1. first thing",
        "# not a heading",
        "---",
        "> not a quote",
        "[x] not a task",
        "!> not a callout",
    ];
    let nodes = texts
        .iter()
        .enumerate()
        .map(|(i, text)| leaf(&format!("p{i}"), "paragraph", text))
        .collect();
    let (remote, handle) = open(nodes).await;

    let plan = handle.preview().await;
    assert!(!plan.has_changes(), "{plan:?}");
    let report = handle.sync(&remote, |_| true).await.unwrap();
    assert_eq!(report.applied(), 0);
    assert!(remote.calls().is_empty());

    let plan = {
        let mut session = handle.lock().await;
        assert_eq!(session.lines()[2], "\\- milk and eggs");
        session.apply(Cmd::ReplaceLine {
            line: 2,
            text: "\\- milk and bread".into(),
        });
        session.preview()
    };
    assert!(plan.type_changes.is_empty());
    assert_eq!(plan.updates.len(), 1);
    assert_eq!(plan.updates[0].content, "- milk and bread");
}

#[tokio::test]
async fn inserted_lines_shift_ranges_without_touching_blocks() {
    let (remote, handle) = open(vec![
        leaf("a", "paragraph", "alpha"),
        leaf("b", "paragraph", "beta"),
    ])
    .await;

    let plan = {
        let mut session = handle.lock().await;
        session.apply(Cmd::InsertLines {
            before: 2,
            lines: vec!["- one".into(), "- two".into(), "- three".into()],
        });
        session.refresh();
        assert_eq!(session.mapping().range(&"a".into()), Some(5..6));
        assert_eq!(session.mapping().range(&"b".into()), Some(6..7));
        let a = session.tree().get(&"a".into()).unwrap();
        assert_eq!(a.text(), "alpha");
        assert!(!a.is_dirty());
        session.preview()
    };
    assert!(plan.updates.is_empty());
    assert!(plan.deletes.is_empty());
    assert_eq!(plan.creates.len(), 3);

    let report = handle.sync(&remote, |_| true).await.unwrap();
    assert_eq!(report.created, 3);
    let page = remote.children_of("page");
    let texts: Vec<String> = page.iter().map(|id| text_of(&remote, id)).collect();
    assert_eq!(texts, ["one", "two", "three", "alpha", "beta"]);
}

#[tokio::test]
async fn deleted_lines_plan_a_delete_not_an_update() {
    let (remote, handle) = open(vec![
        leaf("a", "paragraph", "alpha"),
        leaf("b", "paragraph", "beta"),
        leaf("c", "paragraph", "gamma"),
    ])
    .await;
    handle.lock().await.apply(Cmd::DeleteLines { lines: 3..4 });

    let plan = handle.preview().await;
    let deleted: Vec<_> = plan.deletes.iter().map(|d| d.block_id.clone()).collect();
    assert_eq!(deleted, [BlockId::from("b")]);
    assert!(plan.updates.is_empty());
    assert!(plan.needs_confirmation);

    let report = handle.sync(&remote, |_| true).await.unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(remote.children_of("page"), ["a", "c"]);
    assert!(!handle.lock().await.tree().contains(&"b".into()));
}

#[tokio::test]
async fn declined_confirmation_sends_nothing() {
    let (remote, handle) = open(vec![
        leaf("a", "paragraph", "alpha"),
        leaf("b", "paragraph", "beta"),
    ])
    .await;
    handle.lock().await.apply(Cmd::DeleteLines { lines: 3..4 });

    let report = handle.sync(&remote, |plan| plan.deletes.is_empty()).await.unwrap();
    assert!(report.declined);
    assert!(remote.calls().is_empty());
    assert!(handle.lock().await.tree().contains(&"b".into()));
    assert_eq!(handle.preview().await.deletes.len(), 1);
}

#[tokio::test]
async fn heading_level_change_is_one_type_change() {
    let (remote, handle) = open(vec![
        leaf("h1", "heading_1", "Title"),
        leaf("p", "paragraph", "body"),
    ])
    .await;
    handle.lock().await.apply(Cmd::ReplaceLine {
        line: 2,
        text: "## Title".into(),
    });

    let plan = handle.preview().await;
    let summary = plan.summary();
    assert_eq!((summary.type_changes, summary.updates), (1, 0));
    assert_eq!(plan.operation_count(), 2);
    let change = &plan.type_changes[0];
    assert_eq!(
        (change.old_type.as_str(), change.new_type.as_str(), change.content.as_str()),
        ("heading_1", "heading_2", "Title")
    );
    assert!(!plan.needs_confirmation);

    let report = handle.sync(&remote, |_| false).await.unwrap();
    assert!(!report.declined);
    assert_eq!(report.type_changed, 1);

    let page = remote.children_of("page");
    assert_eq!(page.len(), 2);
    assert_ne!(page[0], "h1");
    assert_eq!(remote.record(&page[0]).unwrap().block_type, "heading_2");
    assert_eq!(text_of(&remote, &page[0]), "Title");
    assert_eq!(page[1], "p");

    let session = handle.lock().await;
    assert_eq!(session.tree().roots()[0], BlockId::Remote(page[0].clone()));
    drop(session);
    assert!(!handle.preview().await.has_changes());
}

#[tokio::test]
async fn toggle_gains_indented_children() {
    let (remote, handle) = open(vec![
        leaf("p1", "toggle", "Details"),
        leaf("tail", "paragraph", "tail"),
    ])
    .await;
    handle.lock().await.apply(Cmd::InsertLines {
        before: 3,
        lines: vec!["  one".into(), "  two".into()],
    });

    let plan = handle.preview().await;
    assert_eq!(plan.creates.len(), 2);
    assert!(
        plan.creates
            .iter()
            .all(|c| c.parent_block_id == Some(BlockId::from("p1")))
    );

    let report = handle.sync(&remote, |_| true).await.unwrap();
    assert_eq!(report.created, 2);
    let calls = appends(&remote);
    assert_eq!(calls.len(), 1);
    assert_eq!((calls[0].target.as_str(), calls[0].count), ("p1", 2));

    let remote_children = remote.children_of("p1");
    let texts: Vec<String> = remote_children.iter().map(|id| text_of(&remote, id)).collect();
    assert_eq!(texts, ["one", "two"]);

    let session = handle.lock().await;
    let local_children: Vec<BlockId> = remote_children.iter().map(|id| BlockId::Remote(id.clone())).collect();
    assert_eq!(session.tree().get(&"p1".into()).unwrap().children(), local_children);
    assert_eq!(session.tree().roots(), [BlockId::from("p1"), BlockId::from("tail")]);
    assert!(session.detect().is_empty());
}

#[tokio::test]
async fn new_parent_is_created_before_its_child() {
    let (remote, handle) = open(vec![leaf("a", "paragraph", "alpha")]).await;
    handle.lock().await.apply(Cmd::InsertLines {
        before: 3,
        lines: vec!["▸ group".into(), "  inside".into()],
    });

    let plan = handle.preview().await;
    assert_eq!(plan.creates.len(), 2);
    assert_eq!(plan.creates[0].after_block_id, Some("a".into()));
    assert_eq!(plan.creates[1].parent_block_id, Some(plan.creates[0].temp_id.clone()));

    let report = handle.sync(&remote, |_| true).await.unwrap();
    assert_eq!(report.created, 2);
    let page = remote.children_of("page");
    assert_eq!(page.len(), 2);
    let group = page[1].clone();
    let calls = appends(&remote);
    assert_eq!(calls[0].target, "page");
    assert_eq!(calls[0].after.as_deref(), Some("a"));
    assert_eq!(calls[1].target, group);
    assert_eq!(remote.children_of(&group).len(), 1);

    // Nothing is detected twice.
    assert!(!handle.preview().await.has_changes());
    assert!(handle.lock().await.detect().is_empty());
}

#[tokio::test]
async fn failed_update_is_reported_and_stays_dirty() {
    let (remote, handle) = open(vec![
        leaf("a", "paragraph", "alpha"),
        leaf("b", "paragraph", "beta"),
    ])
    .await;
    {
        let mut session = handle.lock().await;
        session.apply(Cmd::ReplaceLine {
            line: 2,
            text: "alpha!".into(),
        });
        session.apply(Cmd::ReplaceLine {
            line: 3,
            text: "beta!".into(),
        });
    }
    for _ in 0..SyncOptions::default().max_attempts {
        remote.fail_next(CallKind::Update, "b", RemoteError::Network("reset".into()));
    }

    let report = handle.sync(&remote, |_| true).await.unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.failed.len(), 1);
    let failed = &report.failed[0];
    assert_eq!(failed.block_id, BlockId::from("b"));
    assert_eq!(failed.operation, OperationKind::Update);
    assert!(failed.retryable);
    assert_eq!(text_of(&remote, "a"), "alpha!");
    assert_eq!(text_of(&remote, "b"), "beta");
    assert!(handle.lock().await.tree().get(&"b".into()).unwrap().is_dirty());

    let retry = handle.sync(&remote, |_| true).await.unwrap();
    assert_eq!((retry.updated, retry.failed.len()), (1, 0));
    assert_eq!(text_of(&remote, "b"), "beta!");
}

#[tokio::test]
async fn removed_callout_icon_is_cleared_remotely() {
    let mut callout = record("c", "callout", "note");
    if let Some(payload) = callout.fields.get_mut("callout") {
        payload["icon"] = json!({ "type": "emoji", "emoji": "💡" });
    }
    let (remote, handle) = open(vec![RecordNode::leaf(callout)]).await;
    {
        let mut session = handle.lock().await;
        assert_eq!(session.lines()[2], "!>💡 note");
        session.apply(Cmd::ReplaceLine {
            line: 2,
            text: "!> note".into(),
        });
    }

    let report = handle.sync(&remote, |_| true).await.unwrap();
    assert_eq!(report.updated, 1);
    let icon = remote
        .record("c")
        .and_then(|r| r.payload().and_then(|p| p.get("icon")).cloned());
    assert!(icon.as_ref().is_none_or(|icon| icon.is_null()), "{icon:?}");
    assert!(!handle.preview().await.has_changes());
}

#[tokio::test]
async fn failed_parent_create_fails_children_by_dependency() {
    let (remote, handle) = open(vec![leaf("a", "paragraph", "alpha")]).await;
    handle.lock().await.apply(Cmd::InsertLines {
        before: 3,
        lines: vec!["▸ group".into(), "  inside".into()],
    });
    remote.fail_next(CallKind::Append, "page", RemoteError::Rejected("validation".into()));

    let report = handle.sync(&remote, |_| true).await.unwrap();
    assert_eq!(report.created, 0);
    let flags: Vec<(OperationKind, bool)> = report
        .failed
        .iter()
        .map(|f| (f.operation, f.dependency_failed))
        .collect();
    assert_eq!(flags, [(OperationKind::Create, false), (OperationKind::Create, true)]);
    assert_eq!(remote.children_of("page"), ["a"]);

    // The placeholders stay in the tree and go out on the next run.
    let retry = handle.sync(&remote, |_| true).await.unwrap();
    assert_eq!(retry.created, 2);
    let page = remote.children_of("page");
    assert_eq!(page.len(), 2);
    assert_eq!(remote.children_of(&page[1]).len(), 1);
    assert!(!handle.preview().await.has_changes());
}

#[tokio::test]
async fn failed_create_whose_lines_are_deleted_is_dropped() {
    let (remote, handle) = open(vec![leaf("a", "paragraph", "alpha")]).await;
    handle.lock().await.apply(Cmd::InsertLines {
        before: 3,
        lines: vec!["▸ group".into(), "  inside".into()],
    });
    remote.fail_next(CallKind::Append, "page", RemoteError::Rejected("validation".into()));
    let report = handle.sync(&remote, |_| true).await.unwrap();
    assert_eq!(report.failed.len(), 2);

    {
        let mut session = handle.lock().await;
        assert_eq!(session.tree().len(), 3);
        session.apply(Cmd::DeleteLines { lines: 3..5 });
    }
    remote.clear_calls();
    let report = handle.sync(&remote, |_| true).await.unwrap();
    assert_eq!(report.applied(), 0);
    assert!(report.failed.is_empty());
    assert!(remote.calls().is_empty());

    let session = handle.lock().await;
    assert_eq!(session.tree().walk(), [BlockId::from("a")]);
    assert_eq!(session.tree().len(), 1);
}

#[tokio::test]
async fn type_change_recreates_children_under_new_block() {
    let (remote, handle) = open(vec![
        with_children("t", "toggle", "Details", vec![leaf("c", "paragraph", "inside")]),
        leaf("tail", "paragraph", "tail"),
    ])
    .await;
    handle.lock().await.apply(Cmd::ReplaceLine {
        line: 2,
        text: "- Details".into(),
    });

    let plan = handle.preview().await;
    assert_eq!(plan.type_changes.len(), 1);
    assert!(plan.type_changes[0].has_children);
    assert!(plan.needs_confirmation);

    let report = handle.sync(&remote, |_| true).await.unwrap();
    assert_eq!((report.type_changed, report.created), (1, 1));
    assert!(report.failed.is_empty());

    let page = remote.children_of("page");
    assert_eq!(page.len(), 2);
    assert_eq!(page[1], "tail");
    assert_eq!(remote.record(&page[0]).unwrap().block_type, "bulleted_list_item");
    let children = remote.children_of(&page[0]);
    assert_eq!(children.len(), 1);
    assert_eq!(text_of(&remote, &children[0]), "inside");
    assert!(remote.record("t").is_none());
    assert!(remote.record("c").is_none());

    assert!(!handle.preview().await.has_changes());
}

#[tokio::test]
async fn read_only_blocks_ignore_edits() {
    let mut table = RemoteRecord::new("table", json!({ "table_width": 2 }));
    table.id = Some("tbl".into());
    let (remote, handle) = open(vec![RecordNode::leaf(table), leaf("p", "paragraph", "body")]).await;

    {
        let mut session = handle.lock().await;
        assert_eq!(session.editability().read_only, 1);
        assert_eq!(session.editability().unsupported_types.get("table"), Some(&1));
        session.apply(Cmd::ReplaceLine {
            line: 2,
            text: "[unsupported: table] edited".into(),
        });
    }
    assert!(!handle.preview().await.has_changes());
    let report = handle.sync(&remote, |_| true).await.unwrap();
    assert_eq!(report.applied(), 0);
    assert_eq!(remote.record("tbl").unwrap().fields.get("table").cloned(), Some(json!({ "table_width": 2 })));
}

#[tokio::test]
async fn rendered_text_form() {
    let mut code = RemoteRecord::new(
        "code",
        json!({
            "rich_text": [{ "type": "text", "plain_text": "fn main() {}", "text": { "content": "fn main() {}" } }],
            "language": "rust"
        }),
    );
    code.id = Some("code".into());
    let (_remote, handle) = open(vec![
        leaf("h", "heading_1", "Title"),
        with_children("t", "toggle", "Details", vec![leaf("c", "paragraph", "inside")]),
        RecordNode::leaf(code),
        leaf("todo", "to_do", "ship it"),
    ])
    .await;

    let lines = handle.lock().await.lines();
    insta::assert_snapshot!(lines[2..].join("\n"), @r#"
    # Title
    ▸ Details
      inside
    ```rust
    fn main() {}
    ```
    [ ] ship it
    "#);
}

/// Holds the first update until released, to observe a run in flight.
struct Stalled {
    inner: InMemoryRemote,
    release: Mutex<Option<oneshot::Receiver<()>>>,
}

#[async_trait]
impl RemoteService for Stalled {
    async fn fetch_metadata(&self, page_id: &str) -> blockmirror_engine::remote::Result<PageMeta> {
        self.inner.fetch_metadata(page_id).await
    }

    async fn fetch_children(
        &self,
        id: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> blockmirror_engine::remote::Result<ChildrenPage> {
        self.inner.fetch_children(id, cursor, page_size).await
    }

    async fn append_children(
        &self,
        parent: &str,
        position: Position<'_>,
        records: Vec<RemoteRecord>,
    ) -> blockmirror_engine::remote::Result<Vec<RemoteRecord>> {
        self.inner.append_children(parent, position, records).await
    }

    async fn update_block(
        &self,
        id: &str,
        record: RemoteRecord,
    ) -> blockmirror_engine::remote::Result<RemoteRecord> {
        let release = self.release.lock().unwrap().take();
        if let Some(release) = release {
            let _ = release.await;
        }
        self.inner.update_block(id, record).await
    }

    async fn delete_block(&self, id: &str) -> blockmirror_engine::remote::Result<()> {
        self.inner.delete_block(id).await
    }
}

#[tokio::test]
async fn edits_during_a_run_are_kept_and_second_run_is_refused() {
    let (remote, handle) = open(vec![leaf("a", "paragraph", "alpha")]).await;
    handle.lock().await.apply(Cmd::ReplaceLine {
        line: 2,
        text: "alpha v1".into(),
    });
    let (release, gate) = oneshot::channel();
    let stalled = Stalled {
        inner: remote,
        release: Mutex::new(Some(gate)),
    };

    let first = handle.sync(&stalled, |_| true);
    let meanwhile = async {
        let busy = handle.try_sync(&stalled, |_| true).await;
        assert!(matches!(busy, Err(SyncError::Busy)));
        // The session is not locked while the update is in flight.
        handle.lock().await.apply(Cmd::ReplaceLine {
            line: 2,
            text: "alpha v2".into(),
        });
        release.send(()).unwrap();
    };
    let (report, ()) = futures::join!(first, meanwhile);
    let report = report.unwrap();

    assert_eq!(report.updated, 1);
    assert!(report.document_changed);
    assert_eq!(text_of(&stalled.inner, "a"), "alpha v1");
    let plan = handle.preview().await;
    assert_eq!(plan.updates.len(), 1);
    assert_eq!(plan.updates[0].content, "alpha v2");
}
