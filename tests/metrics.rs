// tests/metrics.rs
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use grocery_portraits::config::AppConfig;

// Full in-process app with the default vendor providers (no network is
// touched). The mailbox gateway stays off until configured.
fn build_app() -> Router {
    grocery_portraits::app_from_config(&AppConfig::default())
        .expect("app_from_config should build Router in tests")
}

async fn get_text(app: &Router, uri: &str) -> (StatusCode, String) {
    let resp = app
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    // axum::body::to_bytes requires an explicit limit
    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn metrics_endpoint_exposes_registry_gauge() {
    let app = build_app();

    let (status, text) = get_text(&app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    let value = text
        .lines()
        .find_map(|l| l.strip_prefix("providers_registered "))
        .and_then(|v| v.trim().parse::<f64>().ok());
    assert_eq!(value, Some(4.0), "metrics exposition missing provider gauge\n{text}");
    assert!(text.contains("# HELP providers_registered"), "{text}");
}

#[tokio::test]
async fn every_vendor_is_listed() {
    let app = build_app();

    let (status, text) = get_text(&app, "/providers").await;
    assert_eq!(status, StatusCode::OK);
    let rows: serde_json::Value = serde_json::from_str(&text).unwrap();
    let names: Vec<&str> = rows
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|r| r["name"].as_str())
        .collect();
    assert_eq!(names, vec!["Facebook", "Gmail", "LinkedIn", "Twitter"]);
    assert!(rows.as_array().unwrap().iter().all(|r| r["authorized"] == false));

    let linkedin = &rows[2];
    assert_eq!(linkedin["has_date"], false);
}
