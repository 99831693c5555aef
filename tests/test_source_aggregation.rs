//! Aggregation against scripted indexing sources feeding the order map.

use async_trait::async_trait;
use orderbook_resilience_sdk::order_state::OwnerLimits;
use orderbook_resilience_sdk::source_aggregator::FailureKind;
use orderbook_resilience_sdk::subgraph::SourceError;
use orderbook_resilience_sdk::{
    AggregatorError, IndexingSource, OrderQuery, OrderbooksOwnersProfileMap, SourceAggregator,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

fn sg_order(hash: u64) -> Value {
    json!({
        "orderHash": format!("0x{:064x}", hash),
        "owner": "0x000000000000000000000000000000000000000A",
        "active": true,
        "orderBytes": "0x",
        "orderbook": { "id": "0x000000000000000000000000000000000000000b" },
        "inputs": [
            { "vaultId": "1", "token": { "address": "0x0000000000000000000000000000000000000001", "decimals": "18" } }
        ],
        "outputs": [
            { "vaultId": "1", "token": { "address": "0x0000000000000000000000000000000000000002", "decimals": 6 } }
        ]
    })
}

/// Source that answers from a fixed per-url table; unknown urls are down.
#[derive(Default)]
struct TableSource {
    orders: HashMap<String, Vec<Value>>,
    broken_query: Vec<String>,
}

#[async_trait]
impl IndexingSource for TableSource {
    async fn status(&self, source: &str) -> Result<Value, SourceError> {
        if self.orders.contains_key(source) || self.broken_query.iter().any(|s| s == source) {
            Ok(json!({ "_meta": { "hasIndexingErrors": false, "block": { "number": 1 } } }))
        } else {
            Err(SourceError::Status(502))
        }
    }

    async fn orders_page(
        &self,
        source: &str,
        _query: &OrderQuery,
        skip: usize,
        first: usize,
    ) -> Result<Value, SourceError> {
        match self.orders.get(source) {
            Some(orders) => Ok(json!({
                "orders": orders.iter().skip(skip).take(first).cloned().collect::<Vec<_>>()
            })),
            None => Ok(json!({ "unexpected": true })),
        }
    }
}

fn urls(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_snapshot_from_partial_sources_hydrates_store() {
    let mut orders = HashMap::new();
    orders.insert("https://good/".to_string(), vec![sg_order(1), sg_order(2)]);
    let source = TableSource {
        orders,
        broken_query: vec!["https://broken/".to_string()],
    };
    let aggregator = SourceAggregator::new(Arc::new(source));

    let snapshot = aggregator
        .fetch_snapshot(
            &urls(&["https://down/", "https://good/", "https://broken/"]),
            &OrderQuery::all(),
        )
        .await
        .unwrap();

    assert_eq!(snapshot.health.available.len(), 2);
    assert_eq!(
        snapshot.health.unavailable.get("https://down/").unwrap().kind,
        FailureKind::Unreachable
    );
    assert_eq!(
        snapshot.outcome.failures.get("https://broken/").unwrap().kind,
        FailureKind::Malformed
    );

    let store = OrderbooksOwnersProfileMap::from_snapshot(snapshot.outcome.records, OwnerLimits::default());
    let counts = store.counts();
    assert_eq!(counts.known, 2);
    assert_eq!(counts.active, 2);
    assert_eq!(store.active_trade_pairs().len(), 2);
}

#[tokio::test]
async fn test_every_source_down_is_one_error() {
    let aggregator = SourceAggregator::new(Arc::new(TableSource::default()));

    let err = aggregator
        .fetch_snapshot(&urls(&["https://a/", "https://b/"]), &OrderQuery::all())
        .await
        .unwrap_err();

    match &err {
        AggregatorError::AllSourcesUnavailable(failures) => {
            let sources: Vec<&str> = failures.sources().collect();
            assert_eq!(sources, vec!["https://a/", "https://b/"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().starts_with("all 2 indexing sources are unavailable"));
}
