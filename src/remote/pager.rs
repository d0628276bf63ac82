use super::{FetchError, RawItem, RemoteSource};
use futures::future::join_all;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const DEFAULT_RESULT_CAP: usize = 100;

/// Bounds for one retrieval call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub page_size: usize,
    /// Hard upper bound on returned items
    pub result_cap: usize,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            result_cap: DEFAULT_RESULT_CAP,
        }
    }
}

/// Walk a listing page by page and fetch every referenced item.
///
/// Pages are requested strictly one after another. Within a page the detail
/// calls run concurrently and are all joined before the next page is
/// requested, so at most one page worth of calls is in flight. Returned
/// items keep listing order.
///
/// The loop stops on an empty page, on a page without a continuation cursor,
/// or once `result_cap` items have been collected. Detail calls are only
/// issued for as many references as are still needed, so the result never
/// exceeds the cap.
///
/// # Errors
///
/// A failed listing call aborts and is returned. A failed detail call only
/// drops that item.
pub async fn fetch_pages(
    source: &dyn RemoteSource,
    access_token: &str,
    query: &str,
    limits: PageLimits,
    with_body: bool,
) -> Result<Vec<RawItem>, FetchError> {
    let mut items: Vec<RawItem> = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0usize;
    let mut dropped = 0usize;

    while items.len() < limits.result_cap {
        let page = source
            .list_page(access_token, query, limits.page_size, cursor.as_deref())
            .await?;
        pages += 1;

        if page.items.is_empty() {
            break;
        }

        let wanted = limits.result_cap - items.len();
        let refs = &page.items[..page.items.len().min(wanted)];
        let details = join_all(
            refs.iter()
                .map(|item| source.fetch_item(access_token, item, with_body)),
        )
        .await;

        for (item, detail) in refs.iter().zip(details) {
            match detail {
                Ok(raw) => items.push(raw),
                Err(e) => {
                    dropped += 1;
                    tracing::warn!(
                        platform = %source.platform(),
                        item = %item.id,
                        error = %e,
                        "Dropping item whose detail fetch failed"
                    );
                }
            }
        }

        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    tracing::debug!(
        platform = %source.platform(),
        pages = pages,
        items = items.len(),
        dropped = dropped,
        "Paginated fetch complete"
    );

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Platform;
    use crate::remote::{ItemRef, MailMessage, Page};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory listing: `pages[i]` holds the ids of page `i`.
    struct ScriptedSource {
        pages: Vec<Vec<String>>,
        failing_items: HashSet<String>,
        failing_page: Option<usize>,
        list_calls: AtomicUsize,
        detail_calls: AtomicUsize,
        body_flags: Mutex<Vec<bool>>,
    }

    impl ScriptedSource {
        fn new(page_sizes: &[usize]) -> Self {
            let mut n = 0;
            let pages = page_sizes
                .iter()
                .map(|&size| {
                    (0..size)
                        .map(|_| {
                            n += 1;
                            format!("m{n}")
                        })
                        .collect()
                })
                .collect();
            Self {
                pages,
                failing_items: HashSet::new(),
                failing_page: None,
                list_calls: AtomicUsize::new(0),
                detail_calls: AtomicUsize::new(0),
                body_flags: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RemoteSource for ScriptedSource {
        fn platform(&self) -> Platform {
            Platform::Gmail
        }

        fn keyword_filter(&self, raw_query: &str) -> String {
            raw_query.to_string()
        }

        fn incremental_filter(&self, watermark_ms: i64) -> String {
            watermark_ms.to_string()
        }

        async fn list_page(
            &self,
            _access_token: &str,
            _query: &str,
            _page_size: usize,
            cursor: Option<&str>,
        ) -> Result<Page, FetchError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            let index: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
            if self.failing_page == Some(index) {
                return Err(FetchError::HttpStatus(500));
            }
            let ids = self.pages.get(index).cloned().unwrap_or_default();
            let next_cursor = (index + 1 < self.pages.len()).then(|| (index + 1).to_string());
            Ok(Page {
                items: ids.into_iter().map(|id| ItemRef { id }).collect(),
                next_cursor,
            })
        }

        async fn fetch_item(
            &self,
            _access_token: &str,
            item: &ItemRef,
            with_body: bool,
        ) -> Result<RawItem, FetchError> {
            self.detail_calls.fetch_add(1, Ordering::SeqCst);
            self.body_flags.lock().unwrap().push(with_body);
            if self.failing_items.contains(&item.id) {
                return Err(FetchError::Timeout);
            }
            Ok(RawItem::Mail(MailMessage {
                id: item.id.clone(),
                ..MailMessage::default()
            }))
        }
    }

    fn ids(items: &[RawItem]) -> Vec<&str> {
        items.iter().map(|i| i.id()).collect()
    }

    #[tokio::test]
    async fn test_cap_stops_before_third_page() {
        let source = ScriptedSource::new(&[50, 50, 50]);
        let items = fetch_pages(&source, "tok", "", PageLimits::default(), false)
            .await
            .unwrap();
        assert_eq!(items.len(), 100);
        assert_eq!(source.list_calls.load(Ordering::SeqCst), 2);
        assert_eq!(source.detail_calls.load(Ordering::SeqCst), 100);
    }

    #[tokio::test]
    async fn test_cap_truncates_mid_page() {
        let source = ScriptedSource::new(&[50, 50, 50]);
        let limits = PageLimits {
            page_size: 50,
            result_cap: 70,
        };
        let items = fetch_pages(&source, "tok", "", limits, false).await.unwrap();
        assert_eq!(items.len(), 70);
        assert_eq!(items.last().unwrap().id(), "m70");
        // Only the references still needed get a detail call
        assert_eq!(source.detail_calls.load(Ordering::SeqCst), 70);
    }

    #[tokio::test]
    async fn test_stops_when_cursor_missing() {
        let source = ScriptedSource::new(&[3, 2]);
        let items = fetch_pages(&source, "tok", "", PageLimits::default(), true)
            .await
            .unwrap();
        assert_eq!(ids(&items), vec!["m1", "m2", "m3", "m4", "m5"]);
        assert_eq!(source.list_calls.load(Ordering::SeqCst), 2);
        assert!(source.body_flags.lock().unwrap().iter().all(|&b| b));
    }

    #[tokio::test]
    async fn test_empty_page_ends_loop() {
        let source = ScriptedSource::new(&[2, 0, 5]);
        let items = fetch_pages(&source, "tok", "", PageLimits::default(), false)
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(source.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_detail_drops_item_only() {
        let mut source = ScriptedSource::new(&[4]);
        source.failing_items.insert("m2".into());
        let items = fetch_pages(&source, "tok", "", PageLimits::default(), false)
            .await
            .unwrap();
        assert_eq!(ids(&items), vec!["m1", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_failed_listing_aborts() {
        let mut source = ScriptedSource::new(&[10, 10]);
        source.failing_page = Some(1);
        match fetch_pages(&source, "tok", "", PageLimits::default(), false).await {
            Err(FetchError::HttpStatus(500)) => {}
            other => panic!("Expected HttpStatus(500), got {:?}", other.map(|v| v.len())),
        }
    }

    #[tokio::test]
    async fn test_listing_order_preserved_across_pages() {
        let source = ScriptedSource::new(&[2, 2, 1]);
        let items = fetch_pages(&source, "tok", "", PageLimits::default(), false)
            .await
            .unwrap();
        assert_eq!(ids(&items), vec!["m1", "m2", "m3", "m4", "m5"]);
    }

    proptest::proptest! {
        #[test]
        fn prop_never_exceeds_cap(
            page_sizes in proptest::collection::vec(0usize..60, 1..6),
            cap in 1usize..150,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let (len, total) = rt.block_on(async {
                let source = ScriptedSource::new(&page_sizes);
                let limits = PageLimits { page_size: 60, result_cap: cap };
                let items = fetch_pages(&source, "tok", "", limits, false).await.unwrap();
                // Items reachable before the first empty page
                let reachable: usize = page_sizes.iter().take_while(|&&s| s > 0).sum();
                (items.len(), reachable)
            });
            proptest::prop_assert_eq!(len, total.min(cap));
        }
    }
}
