//! # Order Sync
//!
//! Drives one [`OrderbooksOwnersProfileMap`] from its two inputs: periodic
//! snapshots through a [`SourceAggregator`] and add/remove events that a log
//! watcher pushes into the shared [`EventBuffers`].
//!
//! Re-hydration folds each snapshot into the live map instead of replacing
//! it, so removals and consumed pairs applied between rounds survive.

use crate::events::EventBuffers;
use crate::order_state::{AppliedLogs, OrderbooksOwnersProfileMap};
use crate::source_aggregator::{AggregatorError, SourceAggregator};
use crate::subgraph::{IndexingSource, OrderQuery};
use log::{info, warn};
use std::future::Future;
use std::sync::Arc;
use tokio::time::{interval, interval_at, Duration, Instant, MissedTickBehavior};
use uuid::Uuid;

/// Outcome of one hydration round folded into the map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HydrationRound {
    pub round_id: Uuid,
    /// Profiles created by this round.
    pub created: usize,
    /// Sources that were skipped this round.
    pub failed_sources: usize,
}

pub struct OrderSync<S: IndexingSource> {
    aggregator: SourceAggregator<S>,
    sources: Vec<String>,
    query: OrderQuery,
    store: OrderbooksOwnersProfileMap,
    buffers: Arc<EventBuffers>,
}

impl<S: IndexingSource> OrderSync<S> {
    pub fn new(
        aggregator: SourceAggregator<S>,
        sources: Vec<String>,
        query: OrderQuery,
        store: OrderbooksOwnersProfileMap,
    ) -> Self {
        Self {
            aggregator,
            sources,
            query,
            store,
            buffers: Arc::new(EventBuffers::new()),
        }
    }

    /// Handle a log watcher pushes decoded events into. Events are applied on
    /// the next [`flush`](Self::flush).
    pub fn event_buffers(&self) -> Arc<EventBuffers> {
        self.buffers.clone()
    }

    pub fn store(&self) -> &OrderbooksOwnersProfileMap {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut OrderbooksOwnersProfileMap {
        &mut self.store
    }

    pub fn into_store(self) -> OrderbooksOwnersProfileMap {
        self.store
    }

    /// Fetches a snapshot and folds it into the live map. On error the map
    /// is left untouched.
    pub async fn hydrate(&mut self) -> Result<HydrationRound, AggregatorError> {
        let snapshot = self
            .aggregator
            .fetch_snapshot(&self.sources, &self.query)
            .await?;
        for (source, failure) in snapshot.outcome.failures.iter() {
            warn!("⚠️ Source {} skipped this round: {}", source, failure);
        }
        let round = HydrationRound {
            round_id: snapshot.outcome.round_id,
            created: self.store.hydrate(snapshot.outcome.records),
            failed_sources: snapshot.outcome.failures.len(),
        };
        let counts = self.store.counts();
        info!(
            "✅ Hydrated round {}: {} new, {} orders known, {} active, {} pairs tradable",
            round.round_id,
            round.created,
            counts.known,
            counts.active,
            self.store.active_trade_pairs().len()
        );
        Ok(round)
    }

    /// Applies every buffered event to the map.
    pub fn flush(&mut self) -> AppliedLogs {
        let applied = self.store.handle_new_logs(&self.buffers);
        if applied.orderbooks > 0 {
            info!(
                "🔄 Applied events for {} orderbooks: {} new, {} removed",
                applied.orderbooks, applied.added, applied.removed
            );
        }
        applied
    }

    /// Re-hydrates every `hydration_interval` and flushes every
    /// `flush_interval` until `shutdown` resolves. The first re-hydration
    /// happens one interval from now. A round still in flight when
    /// `shutdown` resolves is dropped.
    pub async fn run(
        &mut self,
        hydration_interval: Duration,
        flush_interval: Duration,
        shutdown: impl Future<Output = ()>,
    ) {
        tokio::pin!(shutdown);

        let mut hydration = interval_at(Instant::now() + hydration_interval, hydration_interval);
        hydration.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut flush = interval(flush_interval);
        flush.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = hydration.tick() => {
                    tokio::select! {
                        _ = &mut shutdown => break,
                        result = self.hydrate() => {
                            if let Err(e) = result {
                                warn!("⚠️ Re-hydration failed, keeping current map: {}", e);
                            }
                        }
                    }
                }
                _ = flush.tick() => {
                    self.flush();
                }
            }
        }

        // Events pushed before shutdown still land.
        self.flush();
        info!("🛑 Order sync stopped");
    }
}
