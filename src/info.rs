// src/info.rs
//! Request/result types exchanged with the UI driver.

use chrono::{DateTime, Utc};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Date bounds for one fetch. Serialized as Unix seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchOptions {
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub since: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub until: Option<DateTime<Utc>>,
}

impl FetchOptions {
    pub fn between(since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            since: Some(since),
            until: Some(until),
        }
    }
}

/// Normalized scrape payload consumed by the renderer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScrapeInfo {
    pub id: String,
    pub url: String,
    pub label: String,
    pub title: String,
    pub vendor: String,
    pub price: String,
    pub sentences: Vec<String>,
    pub images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    Success(ScrapeInfo),
    Failure { error: String },
}

impl FetchResult {
    pub fn failure(error: impl Into<String>) -> Self {
        FetchResult::Failure {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success(_))
    }

    pub fn info(&self) -> Option<&ScrapeInfo> {
        match self {
            FetchResult::Success(info) => Some(info),
            FetchResult::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            FetchResult::Success(_) => None,
            FetchResult::Failure { error } => Some(error),
        }
    }
}

// Wire shape expected by the UI: `{success: true, ...info}` / `{success: false, error}`.
#[derive(Serialize)]
#[serde(untagged)]
enum Wire<'a> {
    Ok {
        success: bool,
        #[serde(flatten)]
        info: &'a ScrapeInfo,
    },
    Err {
        success: bool,
        error: &'a str,
    },
}

impl Serialize for FetchResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FetchResult::Success(info) => Wire::Ok {
                success: true,
                info,
            },
            FetchResult::Failure { error } => Wire::Err {
                success: false,
                error,
            },
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_serializes_flat_with_arrays() {
        let r = FetchResult::Success(ScrapeInfo {
            id: "me@example.test".into(),
            ..Default::default()
        });
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["success"], true);
        assert_eq!(v["id"], "me@example.test");
        assert!(v["sentences"].as_array().unwrap().is_empty());
        assert!(v["images"].is_array());
        assert!(v.get("error").is_none());
    }

    #[test]
    fn failure_serializes_error_only() {
        let v = serde_json::to_value(FetchResult::failure("Authorization denied")).unwrap();
        assert_eq!(v, serde_json::json!({"success": false, "error": "Authorization denied"}));
    }

    #[test]
    fn options_use_unix_seconds() {
        let o = FetchOptions {
            since: DateTime::<Utc>::from_timestamp(1_600_000_000, 0),
            until: None,
        };
        let v = serde_json::to_value(o).unwrap();
        assert_eq!(v["since"], 1_600_000_000);
        assert!(v["until"].is_null());
    }
}
