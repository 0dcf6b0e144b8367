//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use alertrelay::app::App;
use alertrelay::config::{Config, ProviderConfig};
use alertrelay::core::ProviderKind;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tower::ServiceExt;

/// Backoff unit used by tests so exhausted retries finish quickly.
pub const TEST_BACKOFF: Duration = Duration::from_millis(10);

pub const FEISHU_TEMPLATE: &str = r#"{% macro feishu_message(alerts, status) %}[
{%- for alert in alerts %}{"msg_type":"interactive","card":{"index":{{ loop.index }},"status":{{ alert.status | json_encode }},"pod":{{ alert.labels.pod | default(value="") | json_encode }}}}{% if not loop.last %},{% endif %}{% endfor -%}
]{% endmacro %}"#;

pub const WEIXIN_TEMPLATE: &str = r#"{% macro weixin_message(alerts, status) %}{"msgtype":"text","text":{"content":{{ status | json_encode }}}}{% endmacro %}"#;

/// Writes `content` to `dir/name` and returns the path.
pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    write!(file, "{}", content).unwrap();
    path
}

/// An enabled provider pointing at `webhook_url`.
pub fn provider(webhook_url: String, template: PathBuf) -> ProviderConfig {
    ProviderConfig {
        enable: true,
        webhook_url,
        timeout: Duration::from_secs(2),
        retry_count: 3,
        template,
        ..Default::default()
    }
}

/// The default configuration with exactly one provider enabled.
pub fn config_with(kind: ProviderKind, provider: ProviderConfig) -> Config {
    let mut config = Config::default();
    config.template.timezone = "UTC".to_string();
    match kind {
        ProviderKind::Feishu => config.webhooks.feishu = provider,
        ProviderKind::Dingding => config.webhooks.dingding = provider,
        ProviderKind::Weixin => config.webhooks.weixin = provider,
    }
    config
}

/// Builds the application router with the test backoff.
pub fn router(config: Config) -> Router {
    router_with_backoff(config, TEST_BACKOFF)
}

pub fn router_with_backoff(config: Config, backoff_unit: Duration) -> Router {
    App::builder(config)
        .backoff_unit(backoff_unit)
        .router()
        .unwrap()
}

/// A single firing alert for pod `p1`.
pub fn sample_payload() -> Value {
    json!({
        "alerts": [{
            "status": "firing",
            "labels": {"pod": "p1"},
            "annotations": {},
            "startsAt": "2024-01-01T00:00:00Z"
        }]
    })
}

/// Sends `body` to `path` and returns the status and decoded JSON response.
pub async fn post(router: Router, path: &str, body: impl Into<Body>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap();
    send(router, request).await
}

pub async fn get(router: Router, path: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(path).body(Body::empty()).unwrap();
    send(router, request).await
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}
