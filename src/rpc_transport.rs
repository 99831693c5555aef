// Tracked transport - JsonRpcClient wrapper that feeds endpoint health.
//
// Every request passes through `TrackedHttp::request`, which records the
// "about to send" and "received" events on the endpoint's rolling counters
// before handing the result back to the provider unchanged.

use crate::metrics;
use crate::rpc_pool::EndpointHealth;
use crate::settings::TransportOptions;
use async_trait::async_trait;
use ethers::providers::{Http, HttpClientError, JsonRpcClient};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

type DefaultDirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub struct TrackedHttp {
    inner: Http,
    health: Arc<EndpointHealth>,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl TrackedHttp {
    /// Builds the HTTP transport for one endpoint with its own timeout and
    /// optional QPS cap.
    pub fn new(
        url: Url,
        health: Arc<EndpointHealth>,
        options: &TransportOptions,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(options.timeout_ms))
            .build()?;

        let limiter = options
            .qps_limit
            .and_then(NonZeroU32::new)
            .map(|qps| Arc::new(RateLimiter::direct(Quota::per_second(qps))));

        Ok(Self {
            inner: Http::new_with_client(url, client),
            health,
            limiter,
        })
    }

    pub fn health(&self) -> &Arc<EndpointHealth> {
        &self.health
    }
}

impl fmt::Debug for TrackedHttp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedHttp")
            .field("url", &self.health.url())
            .field("rate_limited", &self.limiter.is_some())
            .finish()
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl JsonRpcClient for TrackedHttp {
    type Error = HttpClientError;

    async fn request<T, R>(&self, method: &str, params: T) -> Result<R, Self::Error>
    where
        T: fmt::Debug + Serialize + Send + Sync,
        R: DeserializeOwned + Send,
    {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        self.health.record_request();
        let start = Instant::now();
        let result = self.inner.request(method, params).await;
        let duration = start.elapsed();

        match &result {
            Ok(_) => self.health.record_success(),
            Err(e) => {
                self.health.record_failure();
                log::debug!(
                    "[RPC_TRACE] {} -> {} failed after {:?}: {}",
                    self.health.url(),
                    method,
                    duration,
                    e
                );
            }
        }
        metrics::record_endpoint_request(self.health.url(), result.is_ok(), duration);

        result
    }
}
