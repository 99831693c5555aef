//! # Order State
//!
//! Owner-scoped, orderbook-scoped map of order profiles.
//!
//! The map is seeded from an indexer snapshot and then kept current by
//! folding in buffered add/remove events. Profiles are never dropped: a
//! removed order stays queryable with `active = false`.
//!
//! Every key is a parsed [`Address`] / [`H256`], so mixed-case hex from
//! different producers lands on the same entry.
//!
//! A map has a single logical owner; mutation takes `&mut self` and callers
//! sharing one map across workers must serialize access themselves.

use crate::events::{EventBuffers, OrderEvent};
use crate::metrics;
use crate::settings::{default_owner_limit, Settings};
use crate::types::{Order, OrderRecord, TradePair};
use ethers::types::{Address, H256};
use indexmap::map::Entry;
use indexmap::IndexMap;
use log::{debug, info};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderProfile {
    pub active: bool,
    pub order: Order,
    pub active_pairs: Vec<TradePair>,
    pub consumed_pairs: Vec<TradePair>,
}

impl OrderProfile {
    fn new(order: Order) -> Self {
        let active_pairs = order.trade_pairs();
        Self {
            active: true,
            order,
            active_pairs,
            consumed_pairs: Vec::new(),
        }
    }

    /// Active plus consumed; fixed once derived.
    pub fn pair_count(&self) -> usize {
        self.active_pairs.len() + self.consumed_pairs.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerProfile {
    /// Informational capacity; the map does not enforce it.
    pub limit: usize,
    pub orders: IndexMap<H256, OrderProfile>,
}

impl OwnerProfile {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            orders: IndexMap::new(),
        }
    }

    pub fn active_orders(&self) -> impl Iterator<Item = (&H256, &OrderProfile)> {
        self.orders.iter().filter(|(_, profile)| profile.active)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerLimits {
    pub default: usize,
    pub overrides: HashMap<Address, usize>,
}

impl Default for OwnerLimits {
    fn default() -> Self {
        Self {
            default: default_owner_limit(),
            overrides: HashMap::new(),
        }
    }
}

impl OwnerLimits {
    pub fn limit_for(&self, owner: &Address) -> usize {
        self.overrides.get(owner).copied().unwrap_or(self.default)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderCounts {
    pub known: usize,
    pub active: usize,
    pub inactive: usize,
}

/// What one `handle_new_logs` pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppliedLogs {
    pub orderbooks: usize,
    pub added: usize,
    pub removed: usize,
}

/// An active pair as seen by the trading logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivePair<'a> {
    pub orderbook: Address,
    pub owner: Address,
    pub order_hash: H256,
    pub order: &'a Order,
    pub pair: &'a TradePair,
}

#[derive(Debug, Clone, Default)]
pub struct OrderbooksOwnersProfileMap {
    orderbooks: IndexMap<Address, IndexMap<Address, OwnerProfile>>,
    limits: OwnerLimits,
}

impl OrderbooksOwnersProfileMap {
    pub fn new(limits: OwnerLimits) -> Self {
        Self {
            orderbooks: IndexMap::new(),
            limits,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(OwnerLimits {
            default: settings.orders.default_owner_limit,
            overrides: settings.owner_limits(),
        })
    }

    /// Builds a fresh map from snapshot records.
    pub fn from_snapshot(
        records: impl IntoIterator<Item = OrderRecord>,
        limits: OwnerLimits,
    ) -> Self {
        let mut map = Self::new(limits);
        map.hydrate(records);
        map
    }

    pub fn limits(&self) -> &OwnerLimits {
        &self.limits
    }

    /// Folds snapshot records in. Inactive records are skipped and profiles
    /// already known are left as they are, so re-hydrating a live map keeps
    /// removals and consumed-pair history applied since the last round.
    /// Returns how many profiles were created.
    pub fn hydrate(&mut self, records: impl IntoIterator<Item = OrderRecord>) -> usize {
        let mut created = 0;
        let mut skipped = 0;
        for record in records {
            if !record.active {
                skipped += 1;
                continue;
            }
            if self.upsert(record.orderbook, record.order_hash, &record.order, false) {
                created += 1;
            }
        }
        let counts = self.counts();
        info!(
            "💧 [OrderState] Hydrated {} new orders ({} inactive skipped), {} known / {} active",
            created, skipped, counts.known, counts.active
        );
        metrics::set_order_counts(counts.known, counts.active);
        created
    }

    /// Applies add-events for one orderbook in order. Returns how many
    /// profiles were created.
    pub fn add_orders(&mut self, orderbook: Address, events: &[OrderEvent]) -> usize {
        let mut created = 0;
        for event in events {
            if self.upsert(orderbook, event.order_hash, &event.order, true) {
                created += 1;
            }
        }
        metrics::increment_events_applied("add", events.len() as u64);
        created
    }

    /// Applies remove-events for one orderbook in order. Returns how many
    /// active profiles were deactivated.
    pub fn remove_orders(&mut self, orderbook: Address, events: &[OrderEvent]) -> usize {
        let mut deactivated = 0;
        for event in events {
            let profile = self
                .orderbooks
                .get_mut(&orderbook)
                .and_then(|owners| owners.get_mut(&event.order.owner))
                .and_then(|owner| owner.orders.get_mut(&event.order_hash));
            let Some(profile) = profile else {
                debug!("[OrderState] Remove of unknown order {:?}", event.order_hash);
                continue;
            };
            if !profile.active {
                continue;
            }
            profile.active = false;
            let consumed = std::mem::take(&mut profile.consumed_pairs);
            profile.active_pairs.extend(consumed);
            deactivated += 1;
        }
        metrics::increment_events_applied("remove", events.len() as u64);
        deactivated
    }

    /// Drains every orderbook's pending buffers, applying adds before
    /// removes, so an add and a remove of one hash in the same batch end
    /// removed.
    pub fn handle_new_logs(&mut self, buffers: &EventBuffers) -> AppliedLogs {
        let mut applied = AppliedLogs::default();
        for orderbook in buffers.pending_orderbooks() {
            let Some(logs) = buffers.take(&orderbook) else {
                continue;
            };
            applied.orderbooks += 1;
            applied.added += self.add_orders(orderbook, &logs.added);
            applied.removed += self.remove_orders(orderbook, &logs.removed);
        }
        if applied.orderbooks > 0 {
            let counts = self.counts();
            debug!(
                "[OrderState] Applied logs for {} orderbooks: +{} -{} ({} active)",
                applied.orderbooks, applied.added, applied.removed, counts.active
            );
            metrics::set_order_counts(counts.known, counts.active);
        }
        applied
    }

    pub fn orderbooks(&self) -> impl Iterator<Item = &Address> {
        self.orderbooks.keys()
    }

    pub fn owners(&self, orderbook: &Address) -> Option<&IndexMap<Address, OwnerProfile>> {
        self.orderbooks.get(orderbook)
    }

    pub fn owner(&self, orderbook: &Address, owner: &Address) -> Option<&OwnerProfile> {
        self.orderbooks.get(orderbook)?.get(owner)
    }

    pub fn get(&self, orderbook: &Address, owner: &Address, order_hash: &H256) -> Option<&OrderProfile> {
        self.owner(orderbook, owner)?.orders.get(order_hash)
    }

    pub fn active_trade_pairs(&self) -> Vec<ActivePair<'_>> {
        let mut pairs = Vec::new();
        for (orderbook, owners) in &self.orderbooks {
            for (owner, profile) in owners {
                for (order_hash, order) in profile.active_orders() {
                    pairs.extend(order.active_pairs.iter().map(|pair| ActivePair {
                        orderbook: *orderbook,
                        owner: *owner,
                        order_hash: *order_hash,
                        order: &order.order,
                        pair,
                    }));
                }
            }
        }
        pairs
    }

    /// Moves a pair of an active order from active to consumed. Returns
    /// false if the order or the pair is not active.
    pub fn consume_pair(
        &mut self,
        orderbook: &Address,
        owner: &Address,
        order_hash: &H256,
        pair: &TradePair,
    ) -> bool {
        let Some(profile) = self
            .orderbooks
            .get_mut(orderbook)
            .and_then(|owners| owners.get_mut(owner))
            .and_then(|owner| owner.orders.get_mut(order_hash))
        else {
            return false;
        };
        if !profile.active {
            return false;
        }
        match profile.active_pairs.iter().position(|p| p == pair) {
            Some(index) => {
                let consumed = profile.active_pairs.remove(index);
                profile.consumed_pairs.push(consumed);
                true
            }
            None => false,
        }
    }

    pub fn counts(&self) -> OrderCounts {
        let mut counts = OrderCounts::default();
        for profile in self
            .orderbooks
            .values()
            .flat_map(|owners| owners.values())
            .flat_map(|owner| owner.orders.values())
        {
            counts.known += 1;
            if profile.active {
                counts.active += 1;
            } else {
                counts.inactive += 1;
            }
        }
        counts
    }

    /// Adds or reactivates one order. Pairs are only derived on creation.
    fn upsert(
        &mut self,
        orderbook: Address,
        order_hash: H256,
        order: &Order,
        reactivate: bool,
    ) -> bool {
        let limit = self.limits.limit_for(&order.owner);
        let owner = self
            .orderbooks
            .entry(orderbook)
            .or_default()
            .entry(order.owner)
            .or_insert_with(|| OwnerProfile::new(limit));
        match owner.orders.entry(order_hash) {
            Entry::Occupied(mut entry) => {
                if reactivate {
                    entry.get_mut().active = true;
                }
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(OrderProfile::new(order.clone()));
                true
            }
        }
    }
}
