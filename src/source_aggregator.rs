//! # Source Aggregator
//!
//! Probes redundant indexing sources, then queries only the ones that passed
//! the probe and concatenates what they return.
//!
//! Partial failure is not an error: failing sources are recorded with a
//! reason and a severity and the round continues. Only when every source
//! fails does the round fail, with one error naming each source.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let aggregator = SourceAggregator::from_settings(Arc::new(client), &settings.sources);
//! let health = aggregator.probe_health(&settings.sources.urls).await?;
//! let outcome = aggregator.query(&health.available, &OrderQuery::all()).await?;
//! ```

use crate::metrics;
use crate::settings::Sources;
use crate::subgraph::{parse_orders, parse_status, IndexingSource, OrderQuery, SourceError};
use crate::types::OrderRecord;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Low,
}

/// Why one source was left out of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Status answered but reports indexing errors.
    Degraded,
    /// Status query rejected.
    Unreachable,
    /// Status answered with an unexpected shape.
    Invalid,
    /// Data query rejected.
    Rejected,
    /// Data query answered with an unexpected shape.
    Malformed,
}

impl FailureKind {
    pub fn severity(&self) -> Severity {
        match self {
            FailureKind::Degraded | FailureKind::Invalid | FailureKind::Malformed => Severity::High,
            FailureKind::Unreachable | FailureKind::Rejected => Severity::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Degraded => "degraded",
            FailureKind::Unreachable => "unreachable",
            FailureKind::Invalid => "invalid",
            FailureKind::Rejected => "rejected",
            FailureKind::Malformed => "malformed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl SourceFailure {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.reason)
    }
}

/// Failure reasons keyed by source, in the order sources were given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SourceFailures(IndexMap<String, SourceFailure>);

impl SourceFailures {
    pub fn insert(&mut self, source: impl Into<String>, failure: SourceFailure) {
        self.0.insert(source.into(), failure);
    }

    pub fn get(&self, source: &str) -> Option<&SourceFailure> {
        self.0.get(source)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SourceFailure)> {
        self.0.iter()
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    fn describe(&self, state: &str) -> String {
        match (self.0.len(), self.0.iter().next()) {
            (1, Some((source, failure))) => {
                format!("indexing source {} is {} ({})", source, state, failure)
            }
            (0, _) | (_, None) => format!("no indexing source is {}", state),
            (n, _) => {
                let reasons: Vec<String> = self
                    .0
                    .iter()
                    .map(|(source, failure)| format!("{} ({})", source, failure))
                    .collect();
                format!("all {} indexing sources are {}: {}", n, state, reasons.join("; "))
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("{}", .0.describe("unavailable"))]
    AllSourcesUnavailable(SourceFailures),
    #[error("{}", .0.describe("failing"))]
    AllSourcesFailed(SourceFailures),
    #[error("no indexing sources given")]
    NoSources,
}

impl AggregatorError {
    pub fn failures(&self) -> Option<&SourceFailures> {
        match self {
            AggregatorError::AllSourcesUnavailable(f) | AggregatorError::AllSourcesFailed(f) => Some(f),
            AggregatorError::NoSources => None,
        }
    }
}

/// Result of one health-probe round.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub round_id: Uuid,
    pub probed_at: DateTime<Utc>,
    pub available: Vec<String>,
    pub unavailable: SourceFailures,
}

/// Result of one query round.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub round_id: Uuid,
    pub queried_at: DateTime<Utc>,
    /// Concatenated in source order, duplicates across sources kept.
    pub records: Vec<OrderRecord>,
    /// Soft failures of this round.
    pub failures: SourceFailures,
    /// Records contributed by each successful source.
    pub per_source: IndexMap<String, usize>,
}

impl QueryOutcome {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Probe and query of one hydration round.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub health: HealthReport,
    pub outcome: QueryOutcome,
}

pub struct SourceAggregator<S: IndexingSource> {
    source: Arc<S>,
    tolerant: bool,
    page_size: usize,
}

impl<S: IndexingSource> SourceAggregator<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            tolerant: false,
            page_size: crate::settings::default_page_size(),
        }
    }

    pub fn from_settings(source: Arc<S>, settings: &Sources) -> Self {
        Self::new(source)
            .with_tolerant(settings.tolerant)
            .with_page_size(settings.page_size)
    }

    /// Tolerant mode returns an empty probe result instead of failing when
    /// every source is unhealthy.
    pub fn with_tolerant(mut self, tolerant: bool) -> Self {
        self.tolerant = tolerant;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn is_tolerant(&self) -> bool {
        self.tolerant
    }

    pub async fn probe_health(&self, sources: &[String]) -> Result<HealthReport, AggregatorError> {
        self.probe_round(Uuid::new_v4(), sources).await
    }

    pub async fn query(
        &self,
        available: &[String],
        query: &OrderQuery,
    ) -> Result<QueryOutcome, AggregatorError> {
        self.query_round(Uuid::new_v4(), available, query).await
    }

    /// Probe then query under one round id.
    pub async fn fetch_snapshot(
        &self,
        sources: &[String],
        query: &OrderQuery,
    ) -> Result<Snapshot, AggregatorError> {
        let round_id = Uuid::new_v4();
        let health = self.probe_round(round_id, sources).await?;
        if health.available.is_empty() {
            // Only reachable in tolerant mode.
            let outcome = QueryOutcome {
                round_id,
                queried_at: Utc::now(),
                records: Vec::new(),
                failures: health.unavailable.clone(),
                per_source: IndexMap::new(),
            };
            return Ok(Snapshot { health, outcome });
        }
        let outcome = self.query_round(round_id, &health.available, query).await?;
        Ok(Snapshot { health, outcome })
    }

    async fn probe_round(
        &self,
        round_id: Uuid,
        sources: &[String],
    ) -> Result<HealthReport, AggregatorError> {
        let sources = dedup(sources);
        if sources.is_empty() {
            return Err(AggregatorError::NoSources);
        }

        let probes = sources
            .iter()
            .map(|source| async move { (source, self.source.status(source).await) });
        let results = join_all(probes).await;

        let mut available = Vec::with_capacity(sources.len());
        let mut unavailable = SourceFailures::default();
        for (source, result) in results {
            match classify_status(result) {
                Ok(block) => {
                    debug!(round = %round_id, source = %source, block = ?block, "source healthy");
                    available.push(source.clone());
                }
                Err(failure) => {
                    warn!(
                        round = %round_id,
                        source = %source,
                        kind = failure.kind.as_str(),
                        severity = ?failure.severity(),
                        "⚠️ [SourceAggregator] probe failed: {}",
                        failure.reason
                    );
                    metrics::increment_source_failure(source, "probe", failure.kind.as_str());
                    unavailable.insert(source.clone(), failure);
                }
            }
        }
        metrics::set_available_sources(available.len());

        if available.is_empty() && !self.tolerant {
            return Err(AggregatorError::AllSourcesUnavailable(unavailable));
        }
        info!(
            round = %round_id,
            available = available.len(),
            unavailable = unavailable.len(),
            "🔎 [SourceAggregator] probe finished"
        );
        Ok(HealthReport {
            round_id,
            probed_at: Utc::now(),
            available,
            unavailable,
        })
    }

    async fn query_round(
        &self,
        round_id: Uuid,
        available: &[String],
        query: &OrderQuery,
    ) -> Result<QueryOutcome, AggregatorError> {
        let sources = dedup(available);
        if sources.is_empty() {
            return Err(AggregatorError::NoSources);
        }

        let fetches = sources
            .iter()
            .map(|source| async move { (source, self.fetch_all_pages(source, query).await) });
        let results = join_all(fetches).await;

        let mut records = Vec::new();
        let mut failures = SourceFailures::default();
        let mut per_source = IndexMap::new();
        for (source, result) in results {
            match result {
                Ok(batch) => {
                    metrics::increment_source_records(source, batch.len() as u64);
                    per_source.insert(source.clone(), batch.len());
                    records.extend(batch);
                }
                Err(failure) => {
                    warn!(
                        round = %round_id,
                        source = %source,
                        kind = failure.kind.as_str(),
                        severity = ?failure.severity(),
                        "⚠️ [SourceAggregator] query failed: {}",
                        failure.reason
                    );
                    metrics::increment_source_failure(source, "query", failure.kind.as_str());
                    failures.insert(source.clone(), failure);
                }
            }
        }

        if failures.len() == sources.len() {
            return Err(AggregatorError::AllSourcesFailed(failures));
        }
        info!(
            round = %round_id,
            records = records.len(),
            sources = per_source.len(),
            failed = failures.len(),
            "📥 [SourceAggregator] query finished"
        );
        Ok(QueryOutcome {
            round_id,
            queried_at: Utc::now(),
            records,
            failures,
            per_source,
        })
    }

    /// Pages through one source until a short page.
    async fn fetch_all_pages(
        &self,
        source: &str,
        query: &OrderQuery,
    ) -> Result<Vec<OrderRecord>, SourceFailure> {
        let mut records = Vec::new();
        let mut skip = 0;
        loop {
            let page = self
                .source
                .orders_page(source, query, skip, self.page_size)
                .await
                .map_err(|e| query_failure(&e))?;
            let batch = parse_orders(page)
                .map_err(|e| SourceFailure::new(FailureKind::Malformed, e.to_string()))?;
            let fetched = batch.len();
            records.extend(batch);
            if fetched < self.page_size {
                return Ok(records);
            }
            skip += fetched;
        }
    }
}

fn classify_status(
    result: Result<serde_json::Value, SourceError>,
) -> Result<Option<u64>, SourceFailure> {
    let data = result.map_err(|e| {
        let kind = if e.is_malformed() {
            FailureKind::Invalid
        } else {
            FailureKind::Unreachable
        };
        SourceFailure::new(kind, e.to_string())
    })?;
    let status =
        parse_status(&data).map_err(|e| SourceFailure::new(FailureKind::Invalid, e.to_string()))?;
    if status.has_indexing_errors {
        return Err(SourceFailure::new(
            FailureKind::Degraded,
            "deployment reports indexing errors",
        ));
    }
    Ok(status.block)
}

fn query_failure(error: &SourceError) -> SourceFailure {
    let kind = if error.is_malformed() {
        FailureKind::Malformed
    } else {
        FailureKind::Rejected
    };
    SourceFailure::new(kind, error.to_string())
}

fn dedup(sources: &[String]) -> Vec<String> {
    sources
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect::<IndexSet<_>>()
        .into_iter()
        .collect()
}
