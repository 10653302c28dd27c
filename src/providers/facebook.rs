// src/providers/facebook.rs
//! Facebook Graph API: profile + timeline posts.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use super::{limits_for, VendorHttp};
use crate::config::ProviderConfig;
use crate::info::{FetchOptions, ScrapeInfo};
use crate::paginate::{ContentItem, Page, PageCursor, PageLimits, PageSource, PaginatedFetcher};
use crate::provider::ProviderAdapter;
use crate::resolve::{ExistenceProbe, MinDateResolver};
use crate::session::{SessionExpired, StoredSession};
use crate::timeutil::timestamp;

pub const NAME: &str = "Facebook";

#[derive(Debug, Deserialize)]
pub(crate) struct Profile {
    id: String,
    #[serde(default)]
    name: String,
    link: Option<String>,
    picture: Option<Picture>,
    friends: Option<Friends>,
}

#[derive(Debug, Deserialize)]
struct Picture {
    data: Option<PictureData>,
}
#[derive(Debug, Deserialize)]
struct PictureData {
    url: Option<String>,
}
#[derive(Debug, Deserialize)]
struct Friends {
    summary: Option<FriendSummary>,
}
#[derive(Debug, Deserialize)]
struct FriendSummary {
    total_count: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PostsPage {
    #[serde(default)]
    data: Vec<Post>,
    paging: Option<Paging>,
}
#[derive(Debug, Deserialize)]
struct Post {
    message: Option<String>,
    full_picture: Option<String>,
}
#[derive(Debug, Deserialize)]
struct Paging {
    next: Option<String>,
}

pub(crate) fn posts_page(raw: PostsPage) -> Page {
    let items = raw
        .data
        .into_iter()
        .map(|p| ContentItem {
            headlines: Vec::new(),
            bodies: p.message.into_iter().collect(),
            images: p.full_picture.into_iter().collect(),
        })
        .collect();
    Page {
        items,
        next: raw.paging.and_then(|p| p.next).map(PageCursor::Url),
    }
}

pub(crate) fn profile_info(p: &Profile) -> ScrapeInfo {
    let friends = p
        .friends
        .as_ref()
        .and_then(|f| f.summary.as_ref())
        .map(|s| s.total_count)
        .unwrap_or(0);
    ScrapeInfo {
        id: p.id.clone(),
        url: p
            .link
            .clone()
            .unwrap_or_else(|| format!("https://www.facebook.com/{}", p.id)),
        label: p.name.clone(),
        title: p.name.clone(),
        vendor: "facebook.com".to_string(),
        price: friends.to_string(),
        sentences: Vec::new(),
        images: p
            .picture
            .as_ref()
            .and_then(|pic| pic.data.as_ref())
            .and_then(|d| d.url.clone())
            .into_iter()
            .collect(),
    }
}

#[derive(Debug)]
pub struct FacebookAdapter {
    http: VendorHttp,
    api_base: String,
    limits: PageLimits,
    resolver: MinDateResolver,
}

impl FacebookAdapter {
    pub fn new(http: VendorHttp, cfg: &ProviderConfig, max_pages: usize) -> Self {
        Self {
            http,
            api_base: cfg.api_base.clone(),
            limits: limits_for(cfg, max_pages),
            resolver: MinDateResolver::new(cfg.epoch_year),
        }
    }

    async fn profile(&self, session: &StoredSession) -> Result<Profile> {
        let url = format!("{}/me", self.api_base);
        let fields = "id,name,link,picture.type(large),friends.limit(0)".to_string();
        self.http.get_json(&url, session, &[("fields", fields)]).await
    }
}

/// The profile only decorates the result. A failed request leaves the card
/// empty, unless the session itself was rejected.
fn profile_card(profile: Result<Profile>) -> Result<ScrapeInfo> {
    match profile {
        Ok(p) => Ok(profile_info(&p)),
        Err(e) if e.chain().any(|c| c.is::<SessionExpired>()) => Err(e),
        Err(e) => {
            warn!(target: "providers", provider = NAME, error = ?e, "profile request failed");
            Ok(ScrapeInfo {
                vendor: "facebook.com".to_string(),
                ..Default::default()
            })
        }
    }
}

/// Timeline posts of the session owner.
struct Timeline<'a> {
    adapter: &'a FacebookAdapter,
    session: &'a StoredSession,
}

impl Timeline<'_> {
    fn posts_url(&self) -> String {
        format!("{}/me/posts", self.adapter.api_base)
    }
}

#[async_trait]
impl<'a> PageSource for Timeline<'a> {
    async fn list_page(
        &self,
        options: &FetchOptions,
        cursor: Option<&PageCursor>,
        limit: usize,
    ) -> Result<Page> {
        let raw: PostsPage = match cursor {
            None => {
                let mut query = vec![
                    ("fields", "message,full_picture".to_string()),
                    ("limit", limit.to_string()),
                ];
                if let Some(since) = options.since {
                    query.push(("since", timestamp(since).to_string()));
                }
                if let Some(until) = options.until {
                    query.push(("until", timestamp(until).to_string()));
                }
                self.adapter
                    .http
                    .get_json(&self.posts_url(), self.session, &query)
                    .await?
            }
            // `paging.next` already carries every parameter.
            Some(PageCursor::Url(next)) => self.adapter.http.get_json(next, self.session, &[]).await?,
            Some(other) => bail!("unexpected Facebook cursor {other:?}"),
        };
        Ok(posts_page(raw))
    }
}

#[async_trait]
impl<'a> ExistenceProbe for Timeline<'a> {
    fn name(&self) -> &str {
        NAME
    }

    async fn probe_exists(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Result<bool> {
        let query = [
            ("fields", "id".to_string()),
            ("limit", "1".to_string()),
            ("since", timestamp(since).to_string()),
            ("until", timestamp(until).to_string()),
        ];
        let raw: PostsPage = self
            .adapter
            .http
            .get_json(&self.posts_url(), self.session, &query)
            .await?;
        Ok(!raw.data.is_empty())
    }
}

#[async_trait]
impl ProviderAdapter for FacebookAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn has_date(&self) -> bool {
        true
    }

    async fn resolve_min_date(
        &self,
        session: &StoredSession,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let timeline = Timeline {
            adapter: self,
            session,
        };
        Ok(self.resolver.resolve(&timeline, now).await)
    }

    async fn fetch(&self, session: &StoredSession, options: &FetchOptions) -> Result<ScrapeInfo> {
        let timeline = Timeline {
            adapter: self,
            session,
        };
        let fetcher = PaginatedFetcher::new(NAME, self.limits);
        let (profile, gathered) = tokio::join!(self.profile(session), fetcher.fetch(&timeline, options));

        let mut info = profile_card(profile)?;
        let (sentences, images) = gathered?.into_content();
        info.sentences = sentences;
        info.images.extend(images);
        Ok(info)
    }
}
