// src/paginate.rs
//! Generic paginated content fetcher.
//!
//! Pages are requested in cursor order until enough qualifying items have
//! been gathered, the provider runs out of cursors, or the page guard trips.
//! An error on a later page ends the loop with what was gathered so far.

use anyhow::Result;
use async_trait::async_trait;
use metrics::{counter, histogram};
use tracing::{debug, warn};

use crate::info::FetchOptions;
use crate::text::split_sentences;

/// Provider continuation token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    /// Full URL of the next page (Graph API `paging.next`).
    Url(String),
    /// Opaque page token (Gmail `nextPageToken`, Twitter `next_token`).
    Token(String),
    /// Search offset (mailbox gateway).
    Offset(usize),
}

/// One post/message/tweet before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentItem {
    /// Kept verbatim (mail subjects).
    pub headlines: Vec<String>,
    /// Free text, split into sentences on output.
    pub bodies: Vec<String>,
    /// Image URLs or `data:` URIs.
    pub images: Vec<String>,
}

impl ContentItem {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            bodies: vec![body.into()],
            ..Default::default()
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.images.push(image.into());
        self
    }

    /// Non-empty text and/or at least one image.
    pub fn is_qualifying(&self) -> bool {
        self.headlines
            .iter()
            .chain(self.bodies.iter())
            .any(|t| !t.trim().is_empty())
            || self.images.iter().any(|i| !i.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<ContentItem>,
    pub next: Option<PageCursor>,
}

/// Per-provider page transport.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// First page when `cursor` is `None`, otherwise the page it points at.
    async fn list_page(
        &self,
        options: &FetchOptions,
        cursor: Option<&PageCursor>,
        limit: usize,
    ) -> Result<Page>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    /// Stop following cursors once this many qualifying items are in hand.
    pub min_items: usize,
    /// Page size requested from the provider.
    pub max_page_size: usize,
    /// Hard cap on pages per fetch.
    pub max_pages: usize,
}

impl PageLimits {
    pub fn new(min_items: usize, max_page_size: usize) -> Self {
        Self {
            min_items,
            max_page_size: max_page_size.max(1),
            max_pages: 20,
        }
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Satisfied,
    Exhausted,
    PageError,
    PageLimit,
}

#[derive(Debug, Clone)]
pub struct Gathered {
    pub items: Vec<ContentItem>,
    pub pages: usize,
    pub dropped: usize,
    pub stop: StopReason,
}

impl Gathered {
    /// Flatten into `(sentences, images)` preserving source order.
    pub fn into_content(self) -> (Vec<String>, Vec<String>) {
        normalize(&self.items)
    }
}

pub fn normalize(items: &[ContentItem]) -> (Vec<String>, Vec<String>) {
    let mut sentences = Vec::new();
    let mut images = Vec::new();
    for item in items {
        for h in &item.headlines {
            let h = h.trim();
            if !h.is_empty() {
                sentences.push(h.to_string());
            }
        }
        for b in &item.bodies {
            sentences.extend(split_sentences(b));
        }
        images.extend(
            item.images
                .iter()
                .filter(|i| !i.trim().is_empty())
                .cloned(),
        );
    }
    (sentences, images)
}

#[derive(Debug, Clone)]
pub struct PaginatedFetcher {
    provider: String,
    limits: PageLimits,
}

impl PaginatedFetcher {
    pub fn new(provider: impl Into<String>, limits: PageLimits) -> Self {
        Self {
            provider: provider.into(),
            limits,
        }
    }

    pub fn limits(&self) -> PageLimits {
        self.limits
    }

    /// Errors only when the very first page fails.
    pub async fn fetch<S>(&self, source: &S, options: &FetchOptions) -> Result<Gathered>
    where
        S: PageSource + ?Sized,
    {
        let mut items: Vec<ContentItem> = Vec::new();
        let mut cursor: Option<PageCursor> = None;
        let mut pages = 0usize;
        let mut dropped = 0usize;

        let stop = loop {
            if pages >= self.limits.max_pages {
                warn!(target: "paginate", provider = %self.provider, pages, kept = items.len(), "page limit reached");
                break StopReason::PageLimit;
            }

            let t0 = std::time::Instant::now();
            let res = source
                .list_page(options, cursor.as_ref(), self.limits.max_page_size)
                .await;
            histogram!("scrape_page_ms", "provider" => self.provider.clone())
                .record(t0.elapsed().as_secs_f64() * 1_000.0);

            let page = match res {
                Ok(p) => p,
                Err(e) if pages == 0 => {
                    counter!("scrape_page_errors_total", "provider" => self.provider.clone()).increment(1);
                    return Err(e);
                }
                Err(e) => {
                    counter!("scrape_page_errors_total", "provider" => self.provider.clone()).increment(1);
                    warn!(target: "paginate", provider = %self.provider, pages, kept = items.len(), error = ?e, "page failed, keeping partial result");
                    break StopReason::PageError;
                }
            };
            pages += 1;
            counter!("scrape_pages_total", "provider" => self.provider.clone()).increment(1);

            let total = page.items.len();
            let before = items.len();
            items.extend(page.items.into_iter().filter(ContentItem::is_qualifying));
            dropped += total - (items.len() - before);
            debug!(target: "paginate", provider = %self.provider, page = pages, total, kept = items.len(), "page processed");

            match page.next {
                Some(next) if items.len() < self.limits.min_items => cursor = Some(next),
                Some(_) => break StopReason::Satisfied,
                None => break StopReason::Exhausted,
            }
        };

        counter!("scrape_items_dropped_total", "provider" => self.provider.clone()).increment(dropped as u64);
        Ok(Gathered {
            items,
            pages,
            dropped,
            stop,
        })
    }
}
