use futures::FutureExt;
use futures::future::BoxFuture;
use log::{debug, warn};

use crate::model::{RecordNode, RemoteRecord};
use crate::remote::{RemoteService, Result};

/// Fetch the content of `root` recursively, following pagination.
///
/// Blocks deeper than `max_depth` are returned without their children.
pub async fn pull_tree<R: RemoteService + ?Sized>(
    remote: &R,
    root: &str,
    max_depth: usize,
    page_size: usize,
) -> Result<Vec<RecordNode>> {
    let nodes = pull_level(remote, root, 0, max_depth, page_size).await?;
    debug!("pulled {} top-level blocks of {root}", nodes.len());
    Ok(nodes)
}

fn pull_level<'a, R: RemoteService + ?Sized>(
    remote: &'a R,
    id: &'a str,
    depth: usize,
    max_depth: usize,
    page_size: usize,
) -> BoxFuture<'a, Result<Vec<RecordNode>>> {
    async move {
        let records = fetch_all(remote, id, page_size).await?;
        let mut nodes = Vec::with_capacity(records.len());
        for record in records {
            let children = match record.id.as_deref() {
                Some(child) if record.has_children && depth + 1 < max_depth => {
                    pull_level(remote, child, depth + 1, max_depth, page_size).await?
                }
                Some(child) if record.has_children => {
                    warn!("not fetching children of {child}: deeper than {max_depth} levels");
                    Vec::new()
                }
                _ => Vec::new(),
            };
            nodes.push(RecordNode { record, children });
        }
        Ok(nodes)
    }
    .boxed()
}

async fn fetch_all<R: RemoteService + ?Sized>(
    remote: &R,
    id: &str,
    page_size: usize,
) -> Result<Vec<RemoteRecord>> {
    let mut records = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = remote
            .fetch_children(id, cursor.as_deref(), page_size)
            .await?;
        records.extend(page.records);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => return Ok(records),
        }
    }
}
