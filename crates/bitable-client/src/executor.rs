//! Rate-limited, concurrency-bounded request execution
//!
//! An [`Executor`] is one quota group: a shared [`RateLimiter`], a pool of
//! `max_workers` slots and a [`Transport`] that actually moves bytes. Every
//! request first takes a slot, then waits for rate admission, then goes out
//! with the group's per-request timeout. Responses are decoded from the
//! `{code, msg, data}` envelope; a non-zero `code` becomes
//! [`ClientError::Api`].

use crate::{config::ExecutorConfig, rate_limit::RateLimiter, ClientError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use reqwest::{header, multipart, Client};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, instrument};

/// HTTP method
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Post => f.write_str("POST"),
        }
    }
}

/// Binary part of a multipart body
#[derive(Clone, Debug)]
pub struct FilePart {
    /// Form field name
    pub field: String,
    /// File name reported to the server
    pub file_name: String,
    /// Payload
    pub data: Bytes,
}

/// Multipart form: text fields followed by one file part
#[derive(Clone, Debug)]
pub struct MultipartBody {
    pub fields: Vec<(String, String)>,
    pub file: FilePart,
}

impl MultipartBody {
    /// Look up a text field
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn into_form(self) -> Result<multipart::Form> {
        let mut form = multipart::Form::new();
        for (name, value) in self.fields {
            form = form.text(name, value);
        }
        let part = multipart::Part::bytes(self.file.data.to_vec())
            .file_name(self.file.file_name)
            .mime_str("application/octet-stream")?;
        Ok(form.part(self.file.field, part))
    }
}

/// Request body
#[derive(Clone, Debug)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Multipart(MultipartBody),
}

/// A unit of work submitted to an executor
#[derive(Clone, Debug)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub bearer: Option<String>,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            bearer: None,
            body: RequestBody::Empty,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    /// Append a query parameter
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Authenticate with a bearer token
    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn multipart(mut self, body: MultipartBody) -> Self {
        self.body = RequestBody::Multipart(body);
        self
    }
}

/// Raw response handed back by a transport
#[derive(Clone, Debug)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
}

/// Moves a request over the wire
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request and return the raw status and body
    async fn send(&self, request: ApiRequest) -> Result<TransportResponse>;
}

/// reqwest-backed transport
#[derive(Clone, Debug)]
pub struct HttpTransport {
    http: Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            user_agent
                .parse()
                .map_err(|_| ClientError::Config(format!("invalid user agent: {}", user_agent)))?,
        );

        let http = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(ClientError::Http)?;

        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<TransportResponse> {
        let mut req = match request.method {
            Method::Get => self.http.get(&request.url),
            Method::Post => self.http.post(&request.url),
        };

        if !request.query.is_empty() {
            req = req.query(&request.query);
        }

        if let Some(token) = &request.bearer {
            req = req.bearer_auth(token);
        }

        req = match request.body {
            RequestBody::Empty => req,
            RequestBody::Json(body) => req.json(&body),
            RequestBody::Multipart(body) => req.multipart(body.into_form()?),
        };

        let response = req.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;

        Ok(TransportResponse { status, body })
    }
}

/// One quota group: rate limiter, worker slots and transport
#[derive(Clone)]
pub struct Executor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    name: &'static str,
    config: ExecutorConfig,
    limiter: RateLimiter,
    slots: Semaphore,
    transport: Arc<dyn Transport>,
}

impl Executor {
    /// Create an executor for a named quota group
    pub fn new(name: &'static str, config: ExecutorConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let limiter = RateLimiter::new(config.qps_limit)?;
        let slots = Semaphore::new(config.max_workers);

        Ok(Self {
            inner: Arc::new(ExecutorInner {
                name,
                config,
                limiter,
                slots,
                transport,
            }),
        })
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    /// Requests currently holding a worker slot
    pub fn in_flight(&self) -> usize {
        self.inner.config.max_workers - self.inner.slots.available_permits()
    }

    /// Execute one request and return the decoded JSON body
    #[instrument(skip_all, fields(group = self.inner.name, method = %request.method, url = %request.url))]
    pub async fn execute(&self, request: ApiRequest) -> Result<Value> {
        let _permit = self
            .inner
            .slots
            .acquire()
            .await
            .map_err(|_| ClientError::Task("worker pool closed".to_string()))?;
        self.inner.limiter.admit().await;

        debug!("Sending {} request to {}", request.method, request.url);
        let timeout = self.inner.config.timeout;
        let response = tokio::time::timeout(timeout, self.inner.transport.send(request))
            .await
            .map_err(|_| ClientError::Timeout(timeout))??;

        decode_response(response)
    }

    /// Execute a batch; results come back in input order, failures stay per item
    pub async fn execute_many(&self, requests: Vec<ApiRequest>) -> Vec<Result<Value>> {
        let handles: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let executor = self.clone();
                tokio::spawn(async move { executor.execute(request).await })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap_or_else(|e| Err(ClientError::Task(e.to_string()))))
            .collect()
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Check status and envelope code, returning the whole body
pub fn decode_response(response: TransportResponse) -> Result<Value> {
    if !(200..300).contains(&response.status) {
        return Err(ClientError::from_status(response.status, &response.body));
    }

    if response.body.is_empty() {
        return Ok(Value::Object(Map::new()));
    }

    let value: Value = serde_json::from_slice(&response.body)?;
    let code = value.get("code").and_then(Value::as_i64).unwrap_or(0);
    if code != 0 {
        let msg = value
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(ClientError::Api { code, msg });
    }

    Ok(value)
}

/// Deserialize the `data` member of a decoded body
pub fn decode_data<T: DeserializeOwned>(mut body: Value) -> Result<T> {
    let data = body
        .get_mut("data")
        .map(Value::take)
        .unwrap_or(Value::Null);
    Ok(serde_json::from_value(data)?)
}
