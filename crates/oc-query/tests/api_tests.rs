//! HTTP surface over an in-memory cache store.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::Value;
use tower::ServiceExt;

use oc_cache::{CacheStore, CachedRecord, MemoryCacheStore};
use oc_common::DirectoryEntry;
use oc_query::api::create_router;
use oc_query::QueryService;

async fn app() -> Router {
    let store = MemoryCacheStore::new();
    for (id, path, tags) in [
        ("111", vec!["r", "ou-a"], vec![("env", "prod"), ("team", "core")]),
        ("222", vec!["r", "ou-a", "ou-b"], vec![("env", "prod")]),
        ("333", vec!["r"], vec![("owner", "")]),
    ] {
        let entry = DirectoryEntry {
            id: id.to_string(),
            name: format!("account {}", id),
            status: "ACTIVE".to_string(),
            email_address: format!("{}@example.com", id),
            ou_path: path.into_iter().map(String::from).collect(),
            tags: tags.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        };
        store
            .upsert(CachedRecord::from_entry(&entry, Utc::now()).unwrap())
            .await
            .unwrap();
    }
    create_router(QueryService::new(Arc::new(store)))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn get(uri: &str) -> (StatusCode, Value) {
    send(app().await, Request::get(uri).body(Body::empty()).unwrap()).await
}

fn ids(body: &Value) -> Vec<String> {
    let mut ids: Vec<String> = body["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_str().unwrap().to_string())
        .collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn test_lookup_by_ids() {
    let (status, body) = get("/accounts?ids=111,999,333").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "FOUND");
    assert_eq!(ids(&body), vec!["111", "333"]);
}

#[tokio::test]
async fn test_entries_use_camel_case_and_decoded_tags() {
    let (_, body) = get("/accounts?ids=111").await;
    let entry = &body["entries"][0];
    assert_eq!(entry["emailAddress"], "111@example.com");
    assert_eq!(entry["ouPath"], serde_json::json!(["r", "ou-a"]));
    assert_eq!(entry["tags"]["team"], "core");
}

#[tokio::test]
async fn test_no_results_shape() {
    let (status, body) = get("/accounts/status/CLOSED").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({"result": "NO_RESULTS", "entries": []}));
}

#[tokio::test]
async fn test_ou_subtree() {
    let (_, body) = get("/accounts/ous?ous=ou-a").await;
    assert_eq!(ids(&body), vec!["111", "222"]);
}

#[tokio::test]
async fn test_email_and_single_tag() {
    let (_, body) = get("/accounts/emails?emails=222@example.com").await;
    assert_eq!(ids(&body), vec!["222"]);

    let (_, body) = get("/accounts/tag?name=env&value=prod").await;
    assert_eq!(ids(&body), vec!["111", "222"]);
}

#[tokio::test]
async fn test_empty_tag_value_matches_only_empty_values() {
    let (status, body) = get("/accounts/tag?name=owner&value=").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), vec!["333"]);

    let (_, body) = get("/accounts/tag?name=owner&value=alice").await;
    assert_eq!(body["result"], "NO_RESULTS");

    // A tag that is absent is not the same as one with an empty value
    let (_, body) = get("/accounts/tag?name=env&value=").await;
    assert_eq!(body["result"], "NO_RESULTS");
}

#[tokio::test]
async fn test_multi_tag_post() {
    let request = Request::post("/accounts/tags")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"tags":{"env":"prod","team":"core"}}"#))
        .unwrap();
    let (status, body) = send(app().await, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), vec!["111"]);
}

#[tokio::test]
async fn test_invalid_query_is_bad_request() {
    let (status, body) = get("/accounts").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid query");

    let (status, _) = get("/accounts/tag?name=env").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_checks_and_openapi() {
    let (status, body) = get("/health/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "READY");

    let (status, body) = get("/health/live").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "LIVE");

    let (status, body) = get("/api-doc/openapi.json").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/accounts/ous"].is_object());
}
