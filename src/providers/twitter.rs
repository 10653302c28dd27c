// src/providers/twitter.rs
//! Twitter API v2: account card and the user's own timeline.

use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;

use super::{limits_for, VendorHttp};
use crate::config::ProviderConfig;
use crate::info::{FetchOptions, ScrapeInfo};
use crate::paginate::{ContentItem, Page, PageCursor, PageLimits, PageSource, PaginatedFetcher};
use crate::provider::ProviderAdapter;
use crate::resolve::{ExistenceProbe, MinDateResolver};
use crate::session::StoredSession;

pub const NAME: &str = "Twitter";

/// The timeline endpoint rejects pages smaller than this.
const MIN_PAGE: usize = 5;
const MAX_PAGE: usize = 100;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
pub(crate) struct User {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    username: String,
    profile_image_url: Option<String>,
    public_metrics: Option<PublicMetrics>,
}

#[derive(Debug, Deserialize)]
struct PublicMetrics {
    #[serde(default)]
    followers_count: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TimelinePage {
    #[serde(default)]
    data: Vec<Tweet>,
    includes: Option<Includes>,
    meta: Option<Meta>,
}

#[derive(Debug, Deserialize)]
struct Tweet {
    #[serde(default)]
    text: String,
    attachments: Option<Attachments>,
}

#[derive(Debug, Deserialize)]
struct Attachments {
    #[serde(default)]
    media_keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Includes {
    #[serde(default)]
    media: Vec<Media>,
}

#[derive(Debug, Deserialize)]
struct Media {
    media_key: String,
    url: Option<String>,
    preview_image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    next_token: Option<String>,
}

pub(crate) fn timeline_page(raw: TimelinePage) -> Page {
    let media: HashMap<String, String> = raw
        .includes
        .map(|i| i.media)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|m| m.url.or(m.preview_image_url).map(|u| (m.media_key, u)))
        .collect();

    let items = raw
        .data
        .into_iter()
        .map(|t| ContentItem {
            headlines: Vec::new(),
            bodies: vec![html_escape::decode_html_entities(&t.text).into_owned()],
            images: t
                .attachments
                .map(|a| a.media_keys)
                .unwrap_or_default()
                .iter()
                .filter_map(|k| media.get(k).cloned())
                .collect(),
        })
        .collect();

    Page {
        items,
        next: raw.meta.and_then(|m| m.next_token).map(PageCursor::Token),
    }
}

pub(crate) fn user_info(u: &User) -> ScrapeInfo {
    let followers = u.public_metrics.as_ref().map_or(0, |m| m.followers_count);
    ScrapeInfo {
        id: u.id.clone(),
        url: format!("https://twitter.com/{}", u.username),
        label: u.name.clone(),
        title: u.name.clone(),
        vendor: format!("@{}", u.username),
        price: followers.to_string(),
        sentences: Vec::new(),
        images: u.profile_image_url.clone().into_iter().collect(),
    }
}

fn rfc3339(d: DateTime<Utc>) -> String {
    d.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Debug)]
pub struct TwitterAdapter {
    http: VendorHttp,
    api_base: String,
    limits: PageLimits,
    resolver: MinDateResolver,
}

impl TwitterAdapter {
    pub fn new(http: VendorHttp, cfg: &ProviderConfig, max_pages: usize) -> Self {
        let mut limits = limits_for(cfg, max_pages);
        limits.max_page_size = limits.max_page_size.clamp(MIN_PAGE, MAX_PAGE);
        Self {
            http,
            api_base: cfg.api_base.clone(),
            limits,
            resolver: MinDateResolver::new(cfg.epoch_year),
        }
    }

    async fn me(&self, session: &StoredSession) -> Result<User> {
        let url = format!("{}/users/me", self.api_base);
        let query = [("user.fields", "profile_image_url,public_metrics".to_string())];
        let env: Envelope<User> = self.http.get_json(&url, session, &query).await?;
        Ok(env.data)
    }
}

struct Timeline<'a> {
    adapter: &'a TwitterAdapter,
    session: &'a StoredSession,
    user_id: &'a str,
}

impl Timeline<'_> {
    async fn page(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        token: Option<&str>,
        limit: usize,
    ) -> Result<TimelinePage> {
        let url = format!("{}/users/{}/tweets", self.adapter.api_base, self.user_id);
        let mut query = vec![
            ("max_results", limit.clamp(MIN_PAGE, MAX_PAGE).to_string()),
            ("expansions", "attachments.media_keys".to_string()),
            ("media.fields", "url,preview_image_url".to_string()),
        ];
        if let Some(s) = since {
            query.push(("start_time", rfc3339(s)));
        }
        if let Some(u) = until {
            query.push(("end_time", rfc3339(u)));
        }
        if let Some(t) = token {
            query.push(("pagination_token", t.to_string()));
        }
        self.adapter.http.get_json(&url, self.session, &query).await
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
        let token = match cursor {
            None => None,
            Some(PageCursor::Token(t)) => Some(t.as_str()),
            Some(other) => bail!("unexpected Twitter cursor {other:?}"),
        };
        let raw = self.page(options.since, options.until, token, limit).await?;
        Ok(timeline_page(raw))
    }
}

#[async_trait]
impl<'a> ExistenceProbe for Timeline<'a> {
    fn name(&self) -> &str {
        NAME
    }

    async fn probe_exists(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Result<bool> {
        let raw = self.page(Some(since), Some(until), None, MIN_PAGE).await?;
        Ok(!raw.data.is_empty())
    }
}

#[async_trait]
impl ProviderAdapter for TwitterAdapter {
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
        let me = self.me(session).await?;
        let timeline = Timeline {
            adapter: self,
            session,
            user_id: &me.id,
        };
        Ok(self.resolver.resolve(&timeline, now).await)
    }

    async fn fetch(&self, session: &StoredSession, options: &FetchOptions) -> Result<ScrapeInfo> {
        // Timeline URLs need the numeric user id.
        let me = self.me(session).await?;
        let timeline = Timeline {
            adapter: self,
            session,
            user_id: &me.id,
        };
        let gathered = PaginatedFetcher::new(NAME, self.limits)
            .fetch(&timeline, options)
            .await?;

        let mut info = user_info(&me);
        let (sentences, images) = gathered.into_content();
        info.sentences = sentences;
        info.images.extend(images);
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paginate::normalize;

    #[test]
    fn timeline_decodes_entities_and_media() {
        let raw: TimelinePage = serde_json::from_str(
            r#"{
                "data": [
                    {"id": "1", "text": "Milk &amp; eggs &gt; cereal. Obviously", "attachments": {"media_keys": ["3_1"]}},
                    {"id": "2", "text": "Plain tweet"}
                ],
                "includes": {"media": [
                    {"media_key": "3_1", "type": "photo", "url": "https://pbs.twimg.example/1.jpg"}
                ]},
                "meta": {"result_count": 2, "next_token": "7140dibdnow9c7btw3w29grvxfcgvpb9n9coehpk7xz5i"}
            }"#,
        )
        .unwrap();
        let page = timeline_page(raw);
        assert_eq!(
            page.next,
            Some(PageCursor::Token("7140dibdnow9c7btw3w29grvxfcgvpb9n9coehpk7xz5i".into()))
        );
        let (sentences, images) = normalize(&page.items);
        assert_eq!(sentences, vec!["Milk & eggs > cereal.", "Obviously", "Plain tweet"]);
        assert_eq!(images, vec!["https://pbs.twimg.example/1.jpg"]);
    }

    #[test]
    fn last_page_has_no_cursor() {
        let raw: TimelinePage = serde_json::from_str(r#"{"meta": {"result_count": 0}}"#).unwrap();
        let page = timeline_page(raw);
        assert!(page.items.is_empty());
        assert_eq!(page.next, None);
    }

    #[test]
    fn user_card() {
        let env: Envelope<User> = serde_json::from_str(
            r#"{"data": {"id": "12", "name": "Ada", "username": "ada_shops",
                "profile_image_url": "https://pbs.twimg.example/ada.jpg",
                "public_metrics": {"followers_count": 77, "following_count": 3}}}"#,
        )
        .unwrap();
        let info = user_info(&env.data);
        assert_eq!(info.vendor, "@ada_shops");
        assert_eq!(info.price, "77");
        assert_eq!(info.url, "https://twitter.com/ada_shops");
    }
}
