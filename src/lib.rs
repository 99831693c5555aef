//! # Orderbook Resilience SDK
//!
//! The resilience and consistency layer of an on-chain order-taking agent. It keeps the agent
//! supplied with a live view of tradable orders and a live channel to the chain, while individual
//! RPC nodes and indexing services are slow, rate-limited, partially broken, or down.
//!
//! ## Overview
//!
//! - **RPC routing**: weighted random selection over RPC endpoints, biased by a per-endpoint
//!   success rate tracked with bounded memory
//! - **Source aggregation**: probe redundant indexing services, query the healthy ones in
//!   parallel, and only fail when every source fails
//! - **Order reconciliation**: an owner-scoped order map seeded from a snapshot and kept current
//!   by add/remove events, keeping the history of consumed trade pairs
//!
//! ## Architecture
//!
//! ### Transport Layer
//! `RpcPool` owns one tracked HTTP transport per endpoint. Every request through a transport
//! updates that endpoint's health counters, which feed the next selection.
//!
//! ### Source Layer
//! `SourceAggregator` runs a probe round and a query round against `IndexingSource`
//! implementations (`SubgraphClient` over GraphQL) and reports partial failures as metadata.
//!
//! ### State Layer
//! `OrderbooksOwnersProfileMap` holds order profiles per orderbook and owner. Events pushed into
//! `EventBuffers` by a log watcher are folded in through `handle_new_logs`. `OrderSync` runs the
//! re-hydration and flush loop around one map and hands out the buffer handle watchers push into.

// Core Types
/// Orders, vault descriptors and trade pairs
pub mod types;
/// Decoded order events and per-orderbook event buffers
pub mod events;

// Transport Layer
/// Adaptive weighted RPC endpoint pool
pub mod rpc_pool;
/// Health-tracking HTTP transport
pub mod rpc_transport;

// Source Layer
/// Indexing-service client
pub mod subgraph;
/// Probe-then-query aggregation across redundant sources
pub mod source_aggregator;

// State Layer
/// Order profile map and event reconciliation
pub mod order_state;
/// Hydration and event-flush loop around one order map
pub mod order_sync;

// Infrastructure
pub mod metrics;
/// Configuration management
pub mod settings;

// Re-exports for convenience
pub use events::{EventBuffers, OrderEvent, OrderLog};
pub use order_state::{OrderProfile, OrderbooksOwnersProfileMap, OwnerProfile};
pub use order_sync::{HydrationRound, OrderSync};
pub use rpc_pool::{RpcPool, RpcPoolError};
pub use settings::Settings;
pub use source_aggregator::{AggregatorError, SourceAggregator};
pub use subgraph::{IndexingSource, OrderQuery, SubgraphClient};
pub use types::{Order, OrderRecord, TradePair};
