// src/providers/linkedin.rs
//! LinkedIn profile. No date dimension: one request, no pagination.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::VendorHttp;
use crate::config::ProviderConfig;
use crate::info::{FetchOptions, ScrapeInfo};
use crate::provider::ProviderAdapter;
use crate::session::StoredSession;
use crate::text::split_sentences;

pub const NAME: &str = "LinkedIn";

const PROFILE_FIELDS: &str = "id,public-profile-url,formatted-name,headline,num-connections,\
num-connections-capped,location,industry,summary,specialties,positions,picture-urls::(original)";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Profile {
    #[serde(default)]
    id: String,
    public_profile_url: Option<String>,
    #[serde(default)]
    formatted_name: String,
    headline: Option<String>,
    #[serde(default)]
    num_connections: u64,
    #[serde(default)]
    num_connections_capped: bool,
    location: Option<Named>,
    industry: Option<String>,
    summary: Option<String>,
    specialties: Option<String>,
    positions: Option<Values<Position>>,
    picture_urls: Option<Values<String>>,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Values<T> {
    #[serde(default = "Vec::new")]
    values: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Position {
    title: Option<String>,
    summary: Option<String>,
    company: Option<Company>,
    location: Option<Named>,
}

#[derive(Debug, Deserialize)]
struct Company {
    name: Option<String>,
    industry: Option<String>,
}

/// "500+" when LinkedIn caps the count.
pub(crate) fn connections_label(count: u64, capped: bool) -> String {
    if capped {
        format!("{count}+")
    } else {
        count.to_string()
    }
}

fn push_line(out: &mut Vec<String>, line: Option<&str>) {
    if let Some(l) = line.map(str::trim).filter(|l| !l.is_empty()) {
        out.push(l.to_string());
    }
}

pub(crate) fn profile_info(p: &Profile) -> ScrapeInfo {
    let connections = connections_label(p.num_connections, p.num_connections_capped);

    let mut sentences = Vec::new();
    push_line(&mut sentences, Some(&p.formatted_name));
    push_line(&mut sentences, p.headline.as_deref());
    sentences.push(connections.clone());
    push_line(&mut sentences, p.location.as_ref().and_then(|l| l.name.as_deref()));
    push_line(&mut sentences, p.industry.as_deref());
    if let Some(summary) = p.summary.as_deref() {
        sentences.extend(split_sentences(summary));
    }
    push_line(&mut sentences, p.specialties.as_deref());
    for pos in p.positions.iter().flat_map(|v| v.values.iter()) {
        push_line(&mut sentences, pos.title.as_deref());
        if let Some(summary) = pos.summary.as_deref() {
            sentences.extend(split_sentences(summary));
        }
        if let Some(c) = pos.company.as_ref() {
            push_line(&mut sentences, c.name.as_deref());
            push_line(&mut sentences, c.industry.as_deref());
        }
        push_line(&mut sentences, pos.location.as_ref().and_then(|l| l.name.as_deref()));
    }

    ScrapeInfo {
        id: p.id.clone(),
        url: p.public_profile_url.clone().unwrap_or_default(),
        label: p.formatted_name.clone(),
        title: p.formatted_name.clone(),
        vendor: p.headline.clone().unwrap_or_default(),
        price: connections,
        sentences,
        images: p
            .picture_urls
            .as_ref()
            .map(|v| v.values.clone())
            .unwrap_or_default(),
    }
}

#[derive(Debug)]
pub struct LinkedInAdapter {
    http: VendorHttp,
    api_base: String,
}

impl LinkedInAdapter {
    pub fn new(http: VendorHttp, cfg: &ProviderConfig) -> Self {
        Self {
            http,
            api_base: cfg.api_base.clone(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for LinkedInAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn has_date(&self) -> bool {
        false
    }

    async fn resolve_min_date(
        &self,
        _session: &StoredSession,
        _now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(None)
    }

    async fn fetch(&self, session: &StoredSession, _options: &FetchOptions) -> Result<ScrapeInfo> {
        let url = format!("{}/people/~:({PROFILE_FIELDS})", self.api_base);
        let profile: Profile = self
            .http
            .get_json(&url, session, &[("format", "json".to_string())])
            .await?;
        Ok(profile_info(&profile))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capped_connections_get_plus() {
        assert_eq!(connections_label(500, true), "500+");
        assert_eq!(connections_label(42, false), "42");
    }

    #[test]
    fn profile_fields_in_order() {
        let p: Profile = serde_json::from_str(
            r#"{
                "id": "abc",
                "publicProfileUrl": "https://www.linkedin.com/in/ada",
                "formattedName": "Ada Example",
                "headline": "Grocer",
                "numConnections": 500,
                "numConnectionsCapped": true,
                "location": {"name": "Lyon Area, France"},
                "industry": "Retail",
                "summary": "Fresh produce! Every day",
                "positions": {"_total": 1, "values": [
                    {"title": "Owner", "company": {"name": "Corner Shop", "industry": "Retail"}}
                ]},
                "pictureUrls": {"_total": 1, "values": ["https://media.example/ada.jpg"]}
            }"#,
        )
        .unwrap();
        let info = profile_info(&p);
        assert_eq!(info.price, "500+");
        assert_eq!(info.vendor, "Grocer");
        assert_eq!(
            info.sentences,
            vec![
                "Ada Example",
                "Grocer",
                "500+",
                "Lyon Area, France",
                "Retail",
                "Fresh produce.",
                "Every day",
                "Owner",
                "Corner Shop",
                "Retail"
            ]
        );
        assert_eq!(info.images, vec!["https://media.example/ada.jpg"]);
    }
}
