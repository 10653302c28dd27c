// src/providers/gmail.rs
//! Gmail REST API: profile, People API card, messages with their plain-text
//! bodies and image attachments.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{limits_for, VendorHttp};
use crate::config::ProviderConfig;
use crate::info::{FetchOptions, ScrapeInfo};
use crate::paginate::{ContentItem, Page, PageCursor, PageLimits, PageSource, PaginatedFetcher};
use crate::provider::ProviderAdapter;
use crate::resolve::{ExistenceProbe, MinDateResolver};
use crate::session::{SessionExpired, StoredSession};
use crate::text::{decode_base64url_text, image_data_uri, is_image_mime, message_paragraphs};
use crate::timeutil::timestamp;

pub const NAME: &str = "Gmail";
const PEOPLE_BASE: &str = "https://people.googleapis.com/v1";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Profile {
    #[serde(default)]
    email_address: String,
    #[serde(default)]
    messages_total: u64,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Person {
    #[serde(default)]
    names: Vec<PersonName>,
    #[serde(default)]
    photos: Vec<PersonPhoto>,
}
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersonName {
    display_name: Option<String>,
}
#[derive(Debug, Deserialize)]
struct PersonPhoto {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}
#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Message {
    id: String,
    payload: Option<MessagePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    body: Option<PartBody>,
    #[serde(default)]
    parts: Vec<MessagePart>,
}
#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartBody {
    #[serde(default)]
    size: u64,
    data: Option<String>,
    attachment_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Attachment {
    data: String,
}

/// Image part that has to be fetched separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingImage {
    pub attachment_id: String,
    pub mime_type: String,
}

/// Subject, plain-text paragraphs and inline images of one message, plus
/// the image attachments still to download.
pub(crate) fn message_content(msg: &Message) -> (ContentItem, Vec<PendingImage>) {
    let mut item = ContentItem::default();
    let mut pending = Vec::new();
    let Some(payload) = msg.payload.as_ref() else {
        return (item, pending);
    };

    if let Some(subject) = payload
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("subject"))
    {
        item.headlines.push(subject.value.clone());
    }
    collect_part(&msg.id, payload, &mut item, &mut pending);
    (item, pending)
}

fn collect_part(msg_id: &str, part: &MessagePart, item: &mut ContentItem, pending: &mut Vec<PendingImage>) {
    let mime = part.mime_type.to_ascii_lowercase();
    if let Some(body) = part.body.as_ref() {
        if mime == "text/plain" {
            if let Some(data) = body.data.as_deref().filter(|_| body.size > 0) {
                match decode_base64url_text(data) {
                    Ok(text) => item.bodies.extend(message_paragraphs(&text)),
                    Err(e) => debug!(target: "providers", provider = NAME, message = msg_id, error = ?e, "undecodable body"),
                }
            }
        } else if is_image_mime(&mime) {
            if let Some(data) = body.data.as_deref() {
                item.images.push(image_data_uri(&mime, data));
            } else if let Some(id) = body.attachment_id.as_ref() {
                pending.push(PendingImage {
                    attachment_id: id.clone(),
                    mime_type: mime.clone(),
                });
            }
        }
        // text/html is skipped: messages carry a text/plain alternative.
    }
    for child in &part.parts {
        collect_part(msg_id, child, item, pending);
    }
}

pub(crate) fn profile_info(profile: &Profile, person: &Person) -> ScrapeInfo {
    let name = person
        .names
        .iter()
        .find_map(|n| n.display_name.clone())
        .unwrap_or_default();
    ScrapeInfo {
        id: profile.email_address.clone(),
        url: format!("mailto:{}", profile.email_address),
        label: name.clone(),
        title: name,
        vendor: profile.email_address.clone(),
        price: profile.messages_total.to_string(),
        sentences: Vec::new(),
        images: person.photos.iter().find_map(|p| p.url.clone()).into_iter().collect(),
    }
}

/// Gmail search query for `[since, until)`.
pub(crate) fn search_query(since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Option<String> {
    let mut terms = Vec::new();
    if let Some(s) = since {
        terms.push(format!("after:{}", timestamp(s)));
    }
    if let Some(u) = until {
        terms.push(format!("before:{}", timestamp(u)));
    }
    (!terms.is_empty()).then(|| terms.join(" "))
}

#[derive(Debug)]
pub struct GmailAdapter {
    http: VendorHttp,
    api_base: String,
    people_base: String,
    limits: PageLimits,
    resolver: MinDateResolver,
}

impl GmailAdapter {
    pub fn new(http: VendorHttp, cfg: &ProviderConfig, max_pages: usize) -> Self {
        Self {
            http,
            api_base: cfg.api_base.clone(),
            people_base: cfg.aux_base.clone().unwrap_or_else(|| PEOPLE_BASE.to_string()),
            limits: limits_for(cfg, max_pages),
            resolver: MinDateResolver::new(cfg.epoch_year),
        }
    }

    async fn profile(&self, session: &StoredSession) -> Result<Profile> {
        let url = format!("{}/users/me/profile", self.api_base);
        self.http.get_json(&url, session, &[]).await
    }

    /// The People card is decoration only; failures leave it empty.
    async fn person(&self, session: &StoredSession) -> Person {
        let url = format!("{}/people/me", self.people_base);
        let query = [("personFields", "names,photos".to_string())];
        match self.http.get_json(&url, session, &query).await {
            Ok(p) => p,
            Err(e) => {
                warn!(target: "providers", provider = NAME, error = ?e, "people api failed");
                Person::default()
            }
        }
    }

    async fn list(
        &self,
        session: &StoredSession,
        q: Option<String>,
        page_token: Option<&str>,
        limit: usize,
    ) -> Result<MessageList> {
        let url = format!("{}/users/me/messages", self.api_base);
        let mut query = vec![("maxResults", limit.to_string())];
        if let Some(q) = q {
            query.push(("q", q));
        }
        if let Some(t) = page_token {
            query.push(("pageToken", t.to_string()));
        }
        self.http.get_json(&url, session, &query).await
    }

    async fn message(&self, session: &StoredSession, id: &str) -> Result<Message> {
        let url = format!("{}/users/me/messages/{}", self.api_base, id);
        self.http
            .get_json(&url, session, &[("format", "full".to_string())])
            .await
    }

    async fn attachment(&self, session: &StoredSession, msg_id: &str, att: &PendingImage) -> Result<String> {
        let url = format!(
            "{}/users/me/messages/{}/attachments/{}",
            self.api_base, msg_id, att.attachment_id
        );
        let a: Attachment = self.http.get_json(&url, session, &[]).await?;
        Ok(image_data_uri(&att.mime_type, &a.data))
    }

    /// Fetch one message and its image attachments. Failed attachments are
    /// skipped; the rest of the message is still useful.
    async fn message_item(&self, session: &StoredSession, id: &str) -> Result<ContentItem> {
        let msg = self.message(session, id).await?;
        let (mut item, pending) = message_content(&msg);
        let images = join_all(pending.iter().map(|p| self.attachment(session, &msg.id, p))).await;
        for res in images {
            match res {
                Ok(uri) => item.images.push(uri),
                Err(e) => debug!(target: "providers", provider = NAME, message = %msg.id, error = ?e, "attachment skipped"),
            }
        }
        Ok(item)
    }
}

struct Mailbox<'a> {
    adapter: &'a GmailAdapter,
    session: &'a StoredSession,
}

#[async_trait]
impl<'a> PageSource for Mailbox<'a> {
    async fn list_page(
        &self,
        options: &FetchOptions,
        cursor: Option<&PageCursor>,
        limit: usize,
    ) -> Result<Page> {
        let token = match cursor {
            None => None,
            Some(PageCursor::Token(t)) => Some(t.as_str()),
            Some(other) => bail!("unexpected Gmail cursor {other:?}"),
        };
        let q = search_query(options.since, options.until);
        let list = self.adapter.list(self.session, q, token, limit).await?;

        let fetched = join_all(
            list.messages
                .iter()
                .map(|m| self.adapter.message_item(self.session, &m.id)),
        )
        .await;
        let mut items = Vec::with_capacity(fetched.len());
        for res in fetched {
            match res {
                Ok(item) => items.push(item),
                Err(e) => warn!(target: "providers", provider = NAME, error = ?e, "message skipped"),
            }
        }

        Ok(Page {
            items,
            next: list.next_page_token.map(PageCursor::Token),
        })
    }
}

#[async_trait]
impl<'a> ExistenceProbe for Mailbox<'a> {
    fn name(&self) -> &str {
        NAME
    }

    async fn probe_exists(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Result<bool> {
        let q = search_query(Some(since), Some(until));
        let list = self.adapter.list(self.session, q, None, 1).await?;
        Ok(!list.messages.is_empty())
    }
}

#[async_trait]
impl ProviderAdapter for GmailAdapter {
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
        let mailbox = Mailbox {
            adapter: self,
            session,
        };
        Ok(self.resolver.resolve(&mailbox, now).await)
    }

    async fn fetch(&self, session: &StoredSession, options: &FetchOptions) -> Result<ScrapeInfo> {
        let mailbox = Mailbox {
            adapter: self,
            session,
        };
        let fetcher = PaginatedFetcher::new(NAME, self.limits);
        let (profile, person, gathered) = tokio::join!(
            self.profile(session),
            self.person(session),
            fetcher.fetch(&mailbox, options)
        );

        let mut info = profile_info(&profile?, &person);
        let gathered = match gathered {
            Ok(g) => g,
            Err(e) if e.chain().any(|c| c.is::<SessionExpired>()) => return Err(e),
            Err(e) => return Err(e.context("Can't get messages")),
        };
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

    const MESSAGE: &str = r#"{
        "id": "m1",
        "payload": {
            "mimeType": "multipart/mixed",
            "headers": [
                {"name": "From", "value": "bob@example.test"},
                {"name": "Subject", "value": "Groceries? Yes!"}
            ],
            "body": {"size": 0},
            "parts": [
                {
                    "mimeType": "text/plain",
                    "body": {"size": 66, "data": "THVuY2ggYXQgbm9vbj8gQnJpbmcgYXBwbGVzLg0KDQo-IG9sZCBxdW90ZWQgdGV4dA0KU2VlIHlvdTsgYnllLg"}
                },
                {"mimeType": "text/html", "body": {"size": 10, "data": "PGI-aGk8L2I-"}},
                {"mimeType": "image/png", "body": {"size": 10, "attachmentId": "att-1"}},
                {"mimeType": "image/gif", "body": {"size": 10, "data": "iVBORw0KGgr__g"}}
            ]
        }
    }"#;

    #[test]
    fn message_parts_become_content() {
        let msg: Message = serde_json::from_str(MESSAGE).unwrap();
        let (item, pending) = message_content(&msg);
        assert_eq!(item.headlines, vec!["Groceries? Yes!"]);
        assert_eq!(item.bodies, vec!["Lunch at noon? Bring apples.", "See you; bye."]);
        assert_eq!(item.images, vec!["data:image/gif;base64,iVBORw0KGgr//g"]);
        assert_eq!(
            pending,
            vec![PendingImage {
                attachment_id: "att-1".into(),
                mime_type: "image/png".into()
            }]
        );

        // Subjects stay verbatim, bodies are sentence-split.
        let (sentences, _) = normalize(&[item]);
        assert_eq!(
            sentences,
            vec!["Groceries? Yes!", "Lunch at noon.", "Bring apples.", "See you", "bye."]
        );
    }

    #[test]
    fn profile_uses_people_card() {
        let profile: Profile =
            serde_json::from_str(r#"{"emailAddress":"ada@example.test","messagesTotal":1234}"#).unwrap();
        let person: Person = serde_json::from_str(
            r#"{"names":[{"displayName":"Ada Example"}],"photos":[{"url":"https://lh3.example/ada.jpg"}]}"#,
        )
        .unwrap();
        let info = profile_info(&profile, &person);
        assert_eq!(info.url, "mailto:ada@example.test");
        assert_eq!(info.title, "Ada Example");
        assert_eq!(info.price, "1234");
        assert_eq!(info.images, vec!["https://lh3.example/ada.jpg"]);
    }

    #[test]
    fn search_query_uses_unix_seconds() {
        let since = DateTime::<Utc>::from_timestamp(1_072_915_200, 0).unwrap();
        assert_eq!(search_query(Some(since), None).as_deref(), Some("after:1072915200"));
        assert_eq!(search_query(None, None), None);
    }
}
