// tests/pagination.rs
//
// Paginated fetcher against a scripted page source.
//
// Covered:
// - stop as soon as min_items qualifying items are gathered
// - stop when the provider runs out of cursors
// - later-page failure keeps the partial result
// - first-page failure is an error
// - max_pages guard on a provider that never stops paging
// - items with neither text nor images are dropped

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use grocery_portraits::info::FetchOptions;
use grocery_portraits::paginate::{
    ContentItem, Page, PageCursor, PageLimits, PageSource, PaginatedFetcher, StopReason,
};

/// Serves `script` in order; the cursor of page `n` points at page `n + 1`.
struct Scripted {
    script: Vec<Result<Vec<ContentItem>, String>>,
    calls: AtomicUsize,
    limits_seen: Mutex<Vec<usize>>,
    endless: bool,
}

impl Scripted {
    fn new(script: Vec<Result<Vec<ContentItem>, String>>) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            limits_seen: Mutex::new(Vec::new()),
            endless: false,
        }
    }

    fn endless() -> Self {
        Self {
            endless: true,
            ..Self::new(Vec::new())
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageSource for Scripted {
    async fn list_page(
        &self,
        _options: &FetchOptions,
        cursor: Option<&PageCursor>,
        limit: usize,
    ) -> Result<Page> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.limits_seen.lock().unwrap().push(limit);

        let idx = match cursor {
            None => 0,
            Some(PageCursor::Offset(o)) => *o,
            Some(other) => return Err(anyhow!("unexpected cursor {other:?}")),
        };

        if self.endless {
            return Ok(Page {
                items: vec![ContentItem::text(format!("Post {idx}."))],
                next: Some(PageCursor::Offset(idx + 1)),
            });
        }

        match self.script.get(idx) {
            Some(Ok(items)) => Ok(Page {
                items: items.clone(),
                next: (idx + 1 < self.script.len()).then_some(PageCursor::Offset(idx + 1)),
            }),
            Some(Err(msg)) => Err(anyhow!(msg.clone())),
            None => Err(anyhow!("no page {idx}")),
        }
    }
}

fn posts(n: usize) -> Vec<ContentItem> {
    (0..n).map(|i| ContentItem::text(format!("Post {i}."))).collect()
}

#[tokio::test]
async fn stops_once_enough_items_are_gathered() {
    let source = Scripted::new(vec![Ok(posts(3)), Ok(posts(3)), Ok(posts(3))]);
    let fetcher = PaginatedFetcher::new("Mock", PageLimits::new(5, 3));

    let got = fetcher.fetch(&source, &FetchOptions::default()).await.unwrap();
    assert_eq!(got.stop, StopReason::Satisfied);
    assert_eq!(got.pages, 2);
    assert_eq!(got.items.len(), 6);
    assert_eq!(source.calls(), 2);
    assert_eq!(*source.limits_seen.lock().unwrap(), vec![3, 3]);
}

#[tokio::test]
async fn exhausted_history_returns_everything() {
    let source = Scripted::new(vec![Ok(posts(2)), Ok(posts(1))]);
    let fetcher = PaginatedFetcher::new("Mock", PageLimits::new(100, 2));

    let got = fetcher.fetch(&source, &FetchOptions::default()).await.unwrap();
    assert_eq!(got.stop, StopReason::Exhausted);
    assert_eq!(got.pages, 2);

    let (sentences, images) = got.into_content();
    assert_eq!(sentences, vec!["Post 0.", "Post 1.", "Post 0."]);
    assert!(images.is_empty());
}

#[tokio::test]
async fn later_page_error_keeps_partial_result() {
    let source = Scripted::new(vec![
        Ok(posts(2)),
        Err("Graph API returned HTTP 500".into()),
        Ok(posts(2)),
    ]);
    let fetcher = PaginatedFetcher::new("Mock", PageLimits::new(100, 2));

    let got = fetcher.fetch(&source, &FetchOptions::default()).await.unwrap();
    assert_eq!(got.stop, StopReason::PageError);
    assert_eq!(got.pages, 1);
    assert_eq!(got.items.len(), 2);
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn first_page_error_is_a_failure() {
    let source = Scripted::new(vec![Err("Can't get messages".into())]);
    let fetcher = PaginatedFetcher::new("Mock", PageLimits::new(100, 2));

    let err = fetcher
        .fetch(&source, &FetchOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Can't get messages");
}

#[tokio::test]
async fn page_guard_stops_endless_cursors() {
    let source = Scripted::endless();
    let limits = PageLimits::new(usize::MAX, 1).with_max_pages(4);
    let fetcher = PaginatedFetcher::new("Mock", limits);

    let got = fetcher.fetch(&source, &FetchOptions::default()).await.unwrap();
    assert_eq!(got.stop, StopReason::PageLimit);
    assert_eq!(got.pages, 4);
    assert_eq!(source.calls(), 4);
}

#[tokio::test]
async fn empty_items_do_not_count_towards_minimum() {
    let empty = ContentItem {
        headlines: vec!["   ".into()],
        bodies: vec![String::new()],
        images: vec![],
    };
    let photo = ContentItem::default().with_image("https://img.example/1.jpg");
    let source = Scripted::new(vec![
        Ok(vec![empty.clone(), empty.clone(), photo]),
        Ok(vec![empty, ContentItem::text("Apples are in season. Pears too")]),
    ]);
    let fetcher = PaginatedFetcher::new("Mock", PageLimits::new(2, 3));

    let got = fetcher.fetch(&source, &FetchOptions::default()).await.unwrap();
    assert_eq!(got.pages, 2);
    assert_eq!(got.dropped, 3);
    assert_eq!(got.items.len(), 2);

    let (sentences, images) = got.into_content();
    assert_eq!(sentences, vec!["Apples are in season.", "Pears too"]);
    assert_eq!(images, vec!["https://img.example/1.jpg"]);
}
