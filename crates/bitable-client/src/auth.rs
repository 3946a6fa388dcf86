//! Tenant access token acquisition

use crate::executor::{ApiRequest, Executor};
use crate::{Config, Result};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

const TOKEN_PATH: &str = "/auth/v3/tenant_access_token/internal";

#[derive(Deserialize)]
struct TokenResponse {
    tenant_access_token: String,
    #[serde(default)]
    expire: u64,
}

/// Lazily fetched, process-lifetime tenant token
///
/// The first successful fetch is kept for good; there is no refresh on
/// expiry. Concurrent first callers wait on the same fetch. A failed fetch
/// is not cached, so the next caller tries again.
pub struct TokenCache {
    url: String,
    app_id: String,
    app_secret: String,
    executor: Executor,
    token: OnceCell<String>,
}

impl TokenCache {
    pub fn new(config: &Config, executor: Executor) -> Self {
        Self {
            url: config.url(TOKEN_PATH),
            app_id: config.app_id.clone(),
            app_secret: config.app_secret.clone(),
            executor,
            token: OnceCell::new(),
        }
    }

    /// Return the cached token, fetching it on first use
    pub async fn tenant_token(&self) -> Result<String> {
        self.token.get_or_try_init(|| self.fetch()).await.cloned()
    }

    /// The token, if one has been fetched
    pub fn cached(&self) -> Option<&str> {
        self.token.get().map(String::as_str)
    }

    #[instrument(skip(self), fields(app_id = %self.app_id))]
    async fn fetch(&self) -> Result<String> {
        let request = ApiRequest::post(&self.url).json(json!({
            "app_id": self.app_id,
            "app_secret": self.app_secret,
        }));

        let body = self.executor.execute(request).await?;
        let response: TokenResponse = serde_json::from_value(body)?;
        debug!(expire = response.expire, "tenant access token acquired");

        Ok(response.tenant_access_token)
    }
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("app_id", &self.app_id)
            .field("cached", &self.token.initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{api_error, token, FakeTransport};
    use crate::ExecutorConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn cache(transport: Arc<FakeTransport>) -> TokenCache {
        let config = Config::new("http://fake").with_credentials("cli_app", "s3cret");
        let executor = Executor::new("read", ExecutorConfig::new(1000, 8), transport).unwrap();
        TokenCache::new(&config, executor)
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let transport = Arc::new(
            FakeTransport::new(|_| token("t-abc")).with_delay(Duration::from_millis(30)),
        );
        let cache = Arc::new(cache(Arc::clone(&transport)));

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.tenant_token().await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), "t-abc");
        }

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].url.ends_with(TOKEN_PATH));
        assert!(requests[0].bearer.is_none());
        assert_eq!(cache.cached(), Some("t-abc"));
    }

    #[tokio::test]
    async fn test_failed_fetch_not_cached() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&attempts);
        let transport = Arc::new(FakeTransport::new(move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                api_error(10014, "app secret invalid")
            } else {
                token("t-second")
            }
        }));
        let cache = cache(transport);

        let err = cache.tenant_token().await.unwrap_err();
        assert_eq!(err.api_code(), Some(10014));
        assert!(cache.cached().is_none());

        assert_eq!(cache.tenant_token().await.unwrap(), "t-second");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
