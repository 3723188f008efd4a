use log::{debug, info, warn};

use crate::cache::{CachedSnapshot, SnapshotCache};
use crate::editing::TextHost;
use crate::error::Result;
use crate::model::RecordNode;
use crate::options::SyncOptions;
use crate::remote::{PageMeta, RemoteService, pull_tree};
use crate::sync::session::SyncSession;

/// A page's content ready to be opened
#[derive(Debug, Clone, PartialEq)]
pub struct Bootstrap {
    pub meta: PageMeta,
    pub records: Vec<RecordNode>,
    pub from_cache: bool,
}

/// Fetch a page's content, from the cache when it is still current.
///
/// The cache is only trusted when its stored hash is intact and its edit
/// time matches the metadata the service reports now. Cache failures are
/// logged and fall back to a full pull.
pub async fn bootstrap<R, C>(
    remote: &R,
    cache: Option<&C>,
    page_id: &str,
    options: &SyncOptions,
) -> Result<Bootstrap>
where
    R: RemoteService + ?Sized,
    C: SnapshotCache + ?Sized,
{
    let meta = remote.fetch_metadata(page_id).await?;

    if let Some(cache) = cache {
        match cache.load(page_id) {
            Ok(Some(snapshot))
                if meta.last_edited_time.is_some()
                    && snapshot.last_edited_time == meta.last_edited_time
                    && snapshot.is_intact() =>
            {
                debug!("using cached snapshot of {page_id}");
                return Ok(Bootstrap {
                    meta,
                    records: snapshot.records,
                    from_cache: true,
                });
            }
            Ok(Some(_)) => debug!("cached snapshot of {page_id} is stale"),
            Ok(None) => {}
            Err(err) => warn!("ignoring unreadable cache entry for {page_id}: {err}"),
        }
    }

    let records = pull_tree(remote, page_id, options.fetch_depth, options.page_size).await?;
    if let Some(cache) = cache {
        let stored = CachedSnapshot::new(
            page_id,
            meta.title.clone(),
            meta.last_edited_time.clone(),
            records.clone(),
        )
        .and_then(|snapshot| cache.store(&snapshot));
        if let Err(err) = stored {
            warn!("could not cache {page_id}: {err}");
        }
    }
    Ok(Bootstrap {
        meta,
        records,
        from_cache: false,
    })
}

/// Bootstrap a page and open a session on it with `host` as the text buffer.
pub async fn open_page<R, C, H>(
    remote: &R,
    cache: Option<&C>,
    page_id: &str,
    host: H,
    options: SyncOptions,
) -> Result<SyncSession<H>>
where
    R: RemoteService + ?Sized,
    C: SnapshotCache + ?Sized,
    H: TextHost,
{
    let loaded = bootstrap(remote, cache, page_id, &options).await?;
    let session = SyncSession::open(page_id, loaded.meta.title, &loaded.records, host, options)?;
    info!(
        "opened {page_id} ({}{})",
        session.editability().describe(),
        if loaded.from_cache { ", from cache" } else { "" }
    );
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FileCache;
    use crate::editing::Document;
    use crate::model::RemoteRecord;
    use crate::remote::InMemoryRemote;
    use serde_json::json;
    use tempfile::TempDir;

    fn paragraph(text: &str) -> RecordNode {
        RecordNode::leaf(RemoteRecord::new(
            "paragraph",
            json!({ "rich_text": [{ "type": "text", "plain_text": text, "text": { "content": text } }] }),
        ))
    }

    #[tokio::test]
    async fn second_open_comes_from_cache() {
        let remote = InMemoryRemote::new();
        remote.add_page("page", "Notes", vec![paragraph("hello")]);
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new(dir.path());
        let options = SyncOptions::default();

        let first = bootstrap(&remote, Some(&cache), "page", &options).await.unwrap();
        assert!(!first.from_cache);
        let second = bootstrap(&remote, Some(&cache), "page", &options).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.records, first.records);
    }

    #[tokio::test]
    async fn open_page_without_cache_renders_title() {
        let remote = InMemoryRemote::new();
        remote.add_page("page", "Notes", vec![paragraph("hello")]);

        let session = open_page(
            &remote,
            None::<&FileCache>,
            "page",
            Document::default(),
            SyncOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(session.text(), "Notes\n\nhello\n");
    }
}
