//! Shared wiremock fixtures

#![allow(dead_code)]

use bitable_client::{BitableClient, Config, ExecutorConfig, RetryConfig};
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TOKEN_PATH: &str = "/auth/v3/tenant_access_token/internal";

pub fn config(server: &MockServer) -> Config {
    Config::new(server.uri())
        .with_credentials("cli_test", "s3cret")
        .with_read_quota(ExecutorConfig::new(100, 4))
        .with_write_quota(ExecutorConfig::new(100, 2))
        .with_retry(RetryConfig {
            max_retries: 3,
            retry_delay: Duration::from_millis(10),
        })
}

pub fn client(server: &MockServer) -> BitableClient {
    BitableClient::new(config(server)).unwrap()
}

/// Envelope with `code: 0`
pub fn ok(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "msg": "success", "data": data }))
}

/// Envelope with a non-zero code
pub fn api_error(code: i64, msg: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "code": code, "msg": msg }))
}

/// Token endpoint answering `token`, expected to be hit exactly once
pub async fn mount_token(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "msg": "ok",
            "tenant_access_token": token,
            "expire": 7200
        })))
        .expect(1)
        .mount(server)
        .await;
}

/// Value of a text field in a raw multipart body
pub fn form_field(body: &[u8], name: &str) -> Option<String> {
    let text = String::from_utf8_lossy(body);
    let marker = format!("name=\"{}\"\r\n\r\n", name);
    let start = text.find(&marker)? + marker.len();
    let end = text[start..].find("\r\n")? + start;
    Some(text[start..end].to_string())
}
