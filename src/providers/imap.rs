// src/providers/imap.rs
//! IMAP mailbox, reached through the HTTP mailbox gateway.
//!
//! The gateway is a separate service (`[providers.imap] api_base`). Its
//! login page, `GET /imap/login?redirect_uri&state`, signs the user in and
//! redirects back with `state`, `user`, `host` and `session`.
//!
//! Data endpoints (authenticated with the gateway session as bearer):
//! - `GET /imap/search?since&until` → UID list, used as the existence probe
//! - `GET /imap/messages?since&until&offset&limit` →
//!   `{messages: [{subject, parts: [{mimeType, data}]}], next_offset}`

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{limits_for, VendorHttp};
use crate::config::ProviderConfig;
use crate::info::{FetchOptions, ScrapeInfo};
use crate::paginate::{ContentItem, Page, PageCursor, PageLimits, PageSource, PaginatedFetcher};
use crate::provider::ProviderAdapter;
use crate::resolve::{ExistenceProbe, MinDateResolver};
use crate::session::{SessionToken, StoredSession};
use crate::text::{image_data_uri, is_image_mime, message_paragraphs};
use crate::timeutil::timestamp;

pub const NAME: &str = "IMAP";

#[derive(Debug, Deserialize)]
pub(crate) struct MessagesPage {
    #[serde(default)]
    messages: Vec<GatewayMessage>,
    next_offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct GatewayMessage {
    subject: Option<String>,
    #[serde(default)]
    parts: Vec<GatewayPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GatewayPart {
    mime_type: String,
    #[serde(default)]
    data: String,
}

pub(crate) fn messages_page(raw: MessagesPage) -> Page {
    let items = raw
        .messages
        .into_iter()
        .map(|m| {
            let mut item = ContentItem::default();
            item.headlines.extend(m.subject);
            for part in m.parts {
                let mime = part.mime_type.to_ascii_lowercase();
                if mime == "text/plain" {
                    // Gateway sends text parts already decoded.
                    item.bodies.extend(message_paragraphs(&part.data));
                } else if is_image_mime(&mime) && !part.data.is_empty() {
                    item.images.push(image_data_uri(&mime, &part.data));
                }
            }
            item
        })
        .collect();
    Page {
        items,
        next: raw.next_offset.map(PageCursor::Offset),
    }
}

/// `title = username`, `vendor = host`, `price = message count`.
pub(crate) fn mailbox_info(token: &SessionToken, messages: usize) -> ScrapeInfo {
    let (user, host) = match token {
        SessionToken::Mailbox { user, host, .. } => (user.as_str(), host.as_str()),
        _ => ("", ""),
    };
    let url = format!("imaps://{user}@{host}/");
    ScrapeInfo {
        id: url.clone(),
        url,
        label: user.to_string(),
        title: user.to_string(),
        vendor: host.to_string(),
        price: messages.to_string(),
        sentences: Vec::new(),
        images: Vec::new(),
    }
}

fn range_query(since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if let Some(s) = since {
        query.push(("since", timestamp(s).to_string()));
    }
    if let Some(u) = until {
        query.push(("until", timestamp(u).to_string()));
    }
    query
}

#[derive(Debug)]
pub struct ImapAdapter {
    http: VendorHttp,
    gateway: String,
    limits: PageLimits,
    resolver: MinDateResolver,
}

impl ImapAdapter {
    pub fn new(http: VendorHttp, cfg: &ProviderConfig, max_pages: usize) -> Self {
        Self {
            http,
            gateway: cfg.api_base.clone(),
            limits: limits_for(cfg, max_pages),
            resolver: MinDateResolver::new(cfg.epoch_year),
        }
    }
}

struct Inbox<'a> {
    adapter: &'a ImapAdapter,
    session: &'a StoredSession,
}

#[async_trait]
impl<'a> PageSource for Inbox<'a> {
    async fn list_page(
        &self,
        options: &FetchOptions,
        cursor: Option<&PageCursor>,
        limit: usize,
    ) -> Result<Page> {
        let offset = match cursor {
            None => 0,
            Some(PageCursor::Offset(o)) => *o,
            Some(other) => bail!("unexpected IMAP cursor {other:?}"),
        };
        let mut query = range_query(options.since, options.until);
        query.push(("offset", offset.to_string()));
        query.push(("limit", limit.to_string()));

        let url = format!("{}/imap/messages", self.adapter.gateway);
        let raw: MessagesPage = self.adapter.http.get_json(&url, self.session, &query).await?;
        Ok(messages_page(raw))
    }
}

#[async_trait]
impl<'a> ExistenceProbe for Inbox<'a> {
    fn name(&self) -> &str {
        NAME
    }

    async fn probe_exists(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Result<bool> {
        let url = format!("{}/imap/search", self.adapter.gateway);
        let query = range_query(Some(since), Some(until));
        let uids: Vec<u64> = self.adapter.http.get_json(&url, self.session, &query).await?;
        Ok(!uids.is_empty())
    }
}

#[async_trait]
impl ProviderAdapter for ImapAdapter {
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
        let inbox = Inbox {
            adapter: self,
            session,
        };
        Ok(self.resolver.resolve(&inbox, now).await)
    }

    async fn fetch(&self, session: &StoredSession, options: &FetchOptions) -> Result<ScrapeInfo> {
        let inbox = Inbox {
            adapter: self,
            session,
        };
        let gathered = PaginatedFetcher::new(NAME, self.limits)
            .fetch(&inbox, options)
            .await?;

        let mut info = mailbox_info(&session.token, gathered.items.len());
        let (sentences, images) = gathered.into_content();
        info.sentences = sentences;
        info.images = images;
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paginate::normalize;

    #[test]
    fn gateway_page_to_content() {
        let raw: MessagesPage = serde_json::from_str(
            r#"{
                "messages": [
                    {"subject": "Receipt #42", "parts": [
                        {"mimeType": "text/plain", "data": "Thanks for shopping!\n> quoted\n\nSee you soon."},
                        {"mimeType": "image/jpeg", "data": "/9j/4AAQ"}
                    ]},
                    {"subject": "", "parts": []}
                ],
                "next_offset": 100
            }"#,
        )
        .unwrap();
        let page = messages_page(raw);
        assert_eq!(page.next, Some(PageCursor::Offset(100)));
        assert!(page.items[0].is_qualifying());
        assert!(!page.items[1].is_qualifying());

        let (sentences, images) = normalize(&page.items[..1]);
        assert_eq!(sentences, vec!["Receipt #42", "Thanks for shopping!", "See you soon."]);
        assert_eq!(images, vec!["data:image/jpeg;base64,/9j/4AAQ"]);
    }

    #[test]
    fn mailbox_fields() {
        let token = SessionToken::Mailbox {
            user: "ada".into(),
            host: "mail.example.test:993".into(),
            session: "s".into(),
        };
        let info = mailbox_info(&token, 12);
        assert_eq!(info.title, "ada");
        assert_eq!(info.vendor, "mail.example.test:993");
        assert_eq!(info.price, "12");
        assert_eq!(info.url, "imaps://ada@mail.example.test:993/");
    }
}
