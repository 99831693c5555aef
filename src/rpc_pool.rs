// src/rpc_pool.rs

use crate::metrics;
use crate::rpc_transport::TrackedHttp;
use crate::settings::{default_track_size, EndpointConfig, Settings};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use ethers::prelude::Provider;
use log::{debug, info, warn};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::Rng;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// Full scale of a success rate: 10000 means every tracked request succeeded.
pub const RATE_SCALE: u64 = 10_000;

/// Minimum band width in a weighted draw (1% of one endpoint's share), so an
/// endpoint at zero keeps a chance to be picked and recover.
pub const RATE_FLOOR: u64 = 100;

pub type TrackedProvider = Provider<TrackedHttp>;

#[derive(Debug, thiserror::Error)]
pub enum RpcPoolError {
    #[error("invalid endpoint configuration: {0}")]
    Configuration(String),
    #[error("no endpoint could be selected within {timeout:?} after {attempts} attempts")]
    SelectionTimeout { timeout: Duration, attempts: u32 },
}

/// Appends a trailing slash, collapsing any run of trailing slashes to one.
pub fn normalize_url(url: &str) -> String {
    format!("{}/", url.trim().trim_end_matches('/'))
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    req: u64,
    success: u64,
    /// Success owed to eviction, in units of 1/req.
    eviction: u64,
}

/// Rolling health record for one endpoint.
///
/// `req` and `success` saturate at `track_size`. Once the request window is
/// full, each further request evicts `success / req` of a unit of success
/// instead of growing `req`; whole units leave as the fractions accrue. The
/// window is an exponentially aged estimator with memory O(1): a past
/// outcome's weight shrinks by `1 - 1/track_size` per request, so a zero
/// window is back to ~63% after `track_size` good requests and above 99%
/// after `5 * track_size`.
#[derive(Debug)]
pub struct EndpointHealth {
    url: String,
    track_size: u64,
    weight: f64,
    counters: Mutex<Counters>,
    failures: AtomicU64,
}

impl EndpointHealth {
    pub fn new(url: impl Into<String>, track_size: u64, weight: f64) -> Self {
        Self {
            url: url.into(),
            track_size: track_size.max(1),
            weight,
            counters: Mutex::new(Counters::default()),
            failures: AtomicU64::new(0),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn track_size(&self) -> u64 {
        self.track_size
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn record_request(&self) {
        let mut c = self.counters.lock();
        if c.req < self.track_size {
            c.req += 1;
            return;
        }
        c.eviction += c.success;
        if c.eviction >= c.req {
            c.eviction -= c.req;
            c.success = c.success.saturating_sub(1);
        }
    }

    pub fn record_success(&self) {
        let mut c = self.counters.lock();
        // never above req, which is itself capped at track_size
        c.success = (c.success + 1).min(c.req);
    }

    /// Bookkeeping only; the rate drops because `success` did not grow.
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// (req, success)
    pub fn counters(&self) -> (u64, u64) {
        let c = self.counters.lock();
        (c.req, c.success)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// ceil(success / req * 10000), or the full scale for an untested endpoint.
    pub fn success_rate(&self) -> u64 {
        let (req, success) = self.counters();
        if req == 0 {
            RATE_SCALE
        } else {
            (success * RATE_SCALE + req - 1) / req
        }
    }

    /// ceil(success_rate * weight)
    pub fn selection_rate(&self) -> u64 {
        let rate = (self.success_rate() as f64 * self.weight).ceil();
        if rate.is_finite() && rate > 0.0 {
            rate as u64
        } else {
            0
        }
    }
}

/// Source of uniform integers for the weighted draw.
pub trait RandomSource: Send {
    /// Uniform integer in `[low, high]`.
    fn draw_inclusive(&mut self, low: u64, high: u64) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn draw_inclusive(&mut self, low: u64, high: u64) -> u64 {
        rand::thread_rng().gen_range(low..=high)
    }
}

impl RandomSource for StdRng {
    fn draw_inclusive(&mut self, low: u64, high: u64) -> u64 {
        self.gen_range(low..=high)
    }
}

/// Time source and suspension point for the selection retry loop.
#[async_trait]
pub trait SelectionClock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl SelectionClock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Weighted random pick over `rates`.
///
/// The range `[1, RATE_SCALE * N]` is split into contiguous bands, one per
/// endpoint, each `max(rate, RATE_FLOOR)` wide. Returns the index whose band
/// contains the draw, or `None` when the draw lands past the last band.
pub fn select_random(rates: &[u64], random: &mut dyn RandomSource) -> Option<usize> {
    if rates.is_empty() {
        return None;
    }
    let upper = RATE_SCALE * rates.len() as u64;
    let draw = random.draw_inclusive(1, upper);

    let mut band_end = 0u64;
    for (index, rate) in rates.iter().enumerate() {
        band_end = band_end.saturating_add((*rate).max(RATE_FLOOR));
        if draw <= band_end {
            return Some(index);
        }
    }
    None
}

/// Point-in-time view of one endpoint's health.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EndpointStats {
    pub url: String,
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: u64,
    pub selection_rate: u64,
}

struct PoolEndpoint {
    health: Arc<EndpointHealth>,
    provider: Arc<TrackedProvider>,
}

/// Pool of redundant RPC endpoints with success-weighted random routing.
///
/// ## Usage
///
/// ```rust,ignore
/// let pool = RpcPool::from_settings(&settings)?;
/// let provider = pool.acquire().await?;
/// let block = provider.get_block_number().await?;
/// ```
///
/// Health is driven by the [`TrackedHttp`] transport behind each provider,
/// so callers only pick and call; retrying a failed call means acquiring again.
pub struct RpcPool {
    endpoints: Vec<PoolEndpoint>,
    last_used: ArcSwapOption<String>,
    clock: Arc<dyn SelectionClock>,
    random: Mutex<Box<dyn RandomSource>>,
    selection_timeout: Duration,
    polling_interval: Duration,
}

impl RpcPool {
    /// Builds one health record and one tracked provider per endpoint.
    pub fn new(configs: &[EndpointConfig]) -> Result<Self, RpcPoolError> {
        if configs.is_empty() {
            return Err(RpcPoolError::Configuration(
                "expected at least one rpc endpoint".to_string(),
            ));
        }

        let mut endpoints = Vec::with_capacity(configs.len());
        for config in configs {
            let normalized = normalize_url(&config.url);
            let url = Url::parse(&normalized).map_err(|e| {
                RpcPoolError::Configuration(format!("{}: {}", config.url, e))
            })?;

            let weight = config.selection_weight.unwrap_or(1.0);
            if !weight.is_finite() || weight < 0.0 {
                return Err(RpcPoolError::Configuration(format!(
                    "{}: selection weight must be a non-negative number, got {}",
                    normalized, weight
                )));
            }

            let health = Arc::new(EndpointHealth::new(
                normalized.clone(),
                config.track_size.unwrap_or_else(default_track_size),
                weight,
            ));
            let transport = TrackedHttp::new(url, health.clone(), &config.transport)
                .map_err(|e| RpcPoolError::Configuration(format!("{}: {}", normalized, e)))?;

            debug!(
                "Endpoint registered: {} (track_size={}, weight={})",
                normalized,
                health.track_size(),
                weight
            );
            endpoints.push(PoolEndpoint {
                health,
                provider: Arc::new(Provider::new(transport)),
            });
        }

        info!("RPC pool created with {} endpoints", endpoints.len());

        Ok(Self {
            endpoints,
            last_used: ArcSwapOption::empty(),
            clock: Arc::new(TokioClock),
            random: Mutex::new(Box::new(ThreadRandom)),
            selection_timeout: Duration::from_millis(5_000),
            polling_interval: Duration::from_millis(30),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, RpcPoolError> {
        Ok(Self::new(&settings.rpc.endpoints)?
            .with_selection_policy(settings.rpc.selection_timeout(), settings.rpc.polling_interval()))
    }

    /// Defaults used by [`RpcPool::acquire`].
    pub fn with_selection_policy(mut self, timeout: Duration, polling_interval: Duration) -> Self {
        self.selection_timeout = timeout;
        self.polling_interval = polling_interval;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn SelectionClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_random(mut self, random: Box<dyn RandomSource>) -> Self {
        self.random = Mutex::new(random);
        self
    }

    /// Selects an endpoint with the pool's configured timeout and polling interval.
    pub async fn acquire(&self) -> Result<Arc<TrackedProvider>, RpcPoolError> {
        self.select_endpoint(self.selection_timeout, self.polling_interval)
            .await
    }

    /// Picks an endpoint by weighted random draw, retrying the draw every
    /// `polling_interval` until one lands or `timeout` has elapsed.
    ///
    /// Dropping the returned future cancels the selection.
    pub async fn select_endpoint(
        &self,
        timeout: Duration,
        polling_interval: Duration,
    ) -> Result<Arc<TrackedProvider>, RpcPoolError> {
        let deadline = self.clock.now() + timeout;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let rates = self.selection_rates();
            let pick = {
                let mut random = self.random.lock();
                select_random(&rates, &mut **random)
            };

            if let Some(index) = pick {
                let endpoint = &self.endpoints[index];
                let url = endpoint.health.url().to_string();
                debug!(
                    "Endpoint selected: {} (rate={}, attempt={})",
                    url, rates[index], attempts
                );
                metrics::increment_endpoint_selected(&url);
                self.last_used.store(Some(Arc::new(url)));
                return Ok(endpoint.provider.clone());
            }

            metrics::increment_endpoint_selection_miss();
            let now = self.clock.now();
            if now >= deadline {
                warn!(
                    "No RPC endpoint selected within {:?} ({} attempts, rates={:?})",
                    timeout, attempts, rates
                );
                metrics::increment_endpoint_selection_timeout();
                return Err(RpcPoolError::SelectionTimeout { timeout, attempts });
            }
            self.clock
                .sleep(polling_interval.min(deadline - now))
                .await;
        }
    }

    pub fn selection_rates(&self) -> Vec<u64> {
        self.endpoints
            .iter()
            .map(|e| e.health.selection_rate())
            .collect()
    }

    /// Url of the endpoint handed out most recently. Advisory only.
    pub fn last_used(&self) -> Option<String> {
        self.last_used.load_full().map(|url| url.as_ref().clone())
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.endpoints
            .iter()
            .map(|e| e.health.url().to_string())
            .collect()
    }

    pub fn health(&self, url: &str) -> Option<Arc<EndpointHealth>> {
        let normalized = normalize_url(url);
        self.endpoints
            .iter()
            .find(|e| e.health.url() == normalized)
            .map(|e| e.health.clone())
    }

    /// Snapshot of every endpoint's counters; also refreshes the rate gauges.
    pub fn endpoint_stats(&self) -> Vec<EndpointStats> {
        self.endpoints
            .iter()
            .map(|e| {
                let (requests, successes) = e.health.counters();
                let success_rate = e.health.success_rate();
                metrics::set_endpoint_success_rate(e.health.url(), success_rate);
                EndpointStats {
                    url: e.health.url().to_string(),
                    requests,
                    successes,
                    failures: e.health.failures(),
                    success_rate,
                    selection_rate: e.health.selection_rate(),
                }
            })
            .collect()
    }
}
