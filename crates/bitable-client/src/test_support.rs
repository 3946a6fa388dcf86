//! In-memory transport for unit tests

use crate::executor::{ApiRequest, Transport, TransportResponse};
use crate::{ClientError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type Handler = Box<dyn Fn(&ApiRequest) -> Result<TransportResponse> + Send + Sync>;

/// Records every request and answers through a handler closure
pub(crate) struct FakeTransport {
    handler: Handler,
    delay: Duration,
    requests: Mutex<Vec<ApiRequest>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeTransport {
    pub(crate) fn new(
        handler: impl Fn(&ApiRequest) -> Result<TransportResponse> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests whose URL ends with `suffix`
    pub(crate) fn requests_to(&self, suffix: &str) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.ends_with(suffix))
            .collect()
    }

    /// Highest number of overlapping `send` calls seen
    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: ApiRequest) -> Result<TransportResponse> {
        self.requests.lock().unwrap().push(request.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        (self.handler)(&request)
    }
}

fn respond(body: Value) -> Result<TransportResponse> {
    Ok(TransportResponse {
        status: 200,
        body: Bytes::from(serde_json::to_vec(&body)?),
    })
}

/// Successful envelope around `data`
pub(crate) fn ok(data: Value) -> Result<TransportResponse> {
    respond(json!({ "code": 0, "msg": "success", "data": data }))
}

/// Application-level failure envelope
pub(crate) fn api_error(code: i64, msg: &str) -> Result<TransportResponse> {
    respond(json!({ "code": code, "msg": msg }))
}

/// Token endpoint answer
pub(crate) fn token(value: &str) -> Result<TransportResponse> {
    respond(json!({ "code": 0, "msg": "ok", "tenant_access_token": value, "expire": 7200 }))
}

/// A transport-class failure
pub(crate) fn unavailable() -> Result<TransportResponse> {
    Err(ClientError::Status {
        status: 503,
        message: "service unavailable".to_string(),
    })
}
