//! Hydration and flush loop over a scripted indexing source.

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use orderbook_resilience_sdk::order_state::OwnerLimits;
use orderbook_resilience_sdk::subgraph::SourceError;
use orderbook_resilience_sdk::types::Io;
use orderbook_resilience_sdk::{
    IndexingSource, Order, OrderEvent, OrderQuery, OrderSync, OrderbooksOwnersProfileMap,
    SourceAggregator,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const SOURCE: &str = "https://sg/";

fn sg_order(hash: u64) -> Value {
    json!({
        "orderHash": format!("0x{:064x}", hash),
        "owner": "0x000000000000000000000000000000000000000a",
        "active": true,
        "orderBytes": "0x",
        "orderbook": { "id": "0x000000000000000000000000000000000000000B" },
        "inputs": [
            { "vaultId": "1", "token": { "address": "0x0000000000000000000000000000000000000001", "decimals": "18" } }
        ],
        "outputs": [
            { "vaultId": "1", "token": { "address": "0x0000000000000000000000000000000000000002", "decimals": 18 } },
            { "vaultId": "2", "token": { "address": "0x0000000000000000000000000000000000000003", "decimals": 18 } }
        ]
    })
}

/// One source whose order list can be swapped between rounds.
#[derive(Default)]
struct LiveSource {
    orders: Mutex<Vec<Value>>,
    stalled: bool,
}

#[async_trait]
impl IndexingSource for LiveSource {
    async fn status(&self, _source: &str) -> Result<Value, SourceError> {
        if self.stalled {
            std::future::pending::<()>().await;
        }
        Ok(json!({ "_meta": { "hasIndexingErrors": false, "block": { "number": 1 } } }))
    }

    async fn orders_page(
        &self,
        _source: &str,
        _query: &OrderQuery,
        skip: usize,
        first: usize,
    ) -> Result<Value, SourceError> {
        let orders = self.orders.lock();
        Ok(json!({
            "orders": orders.iter().skip(skip).take(first).cloned().collect::<Vec<_>>()
        }))
    }
}

fn sync_over(source: Arc<LiveSource>) -> OrderSync<LiveSource> {
    OrderSync::new(
        SourceAggregator::new(source),
        vec![SOURCE.to_string()],
        OrderQuery::all(),
        OrderbooksOwnersProfileMap::new(OwnerLimits::default()),
    )
}

fn orderbook() -> Address {
    Address::from_low_u64_be(0xb)
}

fn owner() -> Address {
    Address::from_low_u64_be(0xa)
}

fn io(token: u64, vault: u64) -> Io {
    Io {
        token: Address::from_low_u64_be(token),
        decimals: 18,
        vault_id: U256::from(vault),
    }
}

fn event(hash: u64) -> OrderEvent {
    OrderEvent {
        sender: owner(),
        order_hash: H256::from_low_u64_be(hash),
        order: Order {
            owner: owner(),
            evaluable: Bytes::default(),
            valid_inputs: vec![io(1, 1)],
            valid_outputs: vec![io(2, 1), io(3, 2)],
        },
    }
}

#[tokio::test]
async fn test_rehydration_keeps_removals_and_consumed_pairs() {
    let source = Arc::new(LiveSource::default());
    *source.orders.lock() = vec![sg_order(1), sg_order(2)];
    let mut sync = sync_over(source.clone());

    let first = sync.hydrate().await.unwrap();
    assert_eq!(first.created, 2);
    assert_eq!(first.failed_sources, 0);

    let hash1 = H256::from_low_u64_be(1);
    let pair = sync
        .store()
        .get(&orderbook(), &owner(), &hash1)
        .unwrap()
        .active_pairs[0]
        .clone();
    assert!(sync
        .store_mut()
        .consume_pair(&orderbook(), &owner(), &hash1, &pair));
    sync.event_buffers().push_remove(orderbook(), event(2));
    sync.flush();

    // the index has not caught up with the removal yet
    *source.orders.lock() = vec![sg_order(1), sg_order(2), sg_order(3)];
    let second = sync.hydrate().await.unwrap();
    assert_eq!(second.created, 1);
    assert_ne!(second.round_id, first.round_id);

    let store = sync.store();
    let kept = store.get(&orderbook(), &owner(), &hash1).unwrap();
    assert_eq!(kept.consumed_pairs, vec![pair]);
    assert_eq!(kept.active_pairs.len(), 1);
    assert!(!store.get(&orderbook(), &owner(), &H256::from_low_u64_be(2)).unwrap().active);
    let counts = store.counts();
    assert_eq!((counts.known, counts.active, counts.inactive), (3, 2, 1));
}

#[tokio::test]
async fn test_watcher_events_land_on_flush() {
    let mut sync = sync_over(Arc::new(LiveSource::default()));
    let buffers = sync.event_buffers();

    let watcher = tokio::spawn(async move {
        buffers.push_add(orderbook(), event(7));
        buffers.push_add(orderbook(), event(8));
    });
    watcher.await.unwrap();
    assert_eq!(sync.store().counts().known, 0);

    let applied = sync.flush();
    assert_eq!((applied.orderbooks, applied.added, applied.removed), (1, 2, 0));
    assert_eq!(sync.store().counts().active, 2);
    assert!(sync.event_buffers().is_empty());
}

#[tokio::test]
async fn test_shutdown_interrupts_stalled_rehydration() {
    let source = Arc::new(LiveSource {
        stalled: true,
        ..LiveSource::default()
    });
    let mut sync = sync_over(source);
    let buffers = sync.event_buffers();
    buffers.push_add(orderbook(), event(1));

    let run = sync.run(
        Duration::from_millis(5),
        Duration::from_secs(3_600),
        tokio::time::sleep(Duration::from_millis(100)),
    );
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("shutdown must not wait for a stalled round");

    // the buffered event is applied on the way out
    assert_eq!(sync.store().counts().active, 1);
    assert!(buffers.is_empty());
}
