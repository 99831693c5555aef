//! Indexing-service client.
//!
//! Sources are GraphQL endpoints of redundant subgraph deployments. The
//! [`IndexingSource`] trait is the seam the aggregator talks through, so tests
//! can swap the HTTP client for scripted responses.

use crate::settings::Sources;
use crate::types::conversions::{
    address_to_string, string_to_address, string_to_bytes, string_to_h256, string_to_u256,
    NumberOrString,
};
use crate::types::{DecodeError, Io, Order, OrderRecord};
use async_trait::async_trait;
use ethers::types::Address;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const STATUS_QUERY: &str = "{ _meta { hasIndexingErrors block { number } } }";

const ORDERS_QUERY: &str = "query Orders($first: Int!, $skip: Int!) {
  orders(first: $first, skip: $skip, orderBy: timestampAdded, orderDirection: asc) {
    orderHash owner active orderBytes
    orderbook { id }
    inputs { vaultId token { address decimals } }
    outputs { vaultId token { address decimals } }
  }
}";

const ORDERS_BY_ORDERBOOK_QUERY: &str =
    "query Orders($first: Int!, $skip: Int!, $orderbooks: [String!]) {
  orders(first: $first, skip: $skip, orderBy: timestampAdded, orderDirection: asc, where: { orderbook_in: $orderbooks }) {
    orderHash owner active orderBytes
    orderbook { id }
    inputs { vaultId token { address decimals } }
    outputs { vaultId token { address decimals } }
  }
}";

/// Failure of a single call against one source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("graphql errors: {0}")]
    GraphQl(String),
    #[error("undecodable response body: {0}")]
    Body(String),
}

impl SourceError {
    /// The source answered, but not with something we can read.
    pub fn is_malformed(&self) -> bool {
        matches!(self, SourceError::Body(_))
    }
}

/// Filter for the orders query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderQuery {
    /// Empty means every orderbook the source indexes.
    pub orderbooks: Vec<Address>,
}

impl OrderQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_orderbooks(orderbooks: Vec<Address>) -> Self {
        Self { orderbooks }
    }

    fn document(&self, skip: usize, first: usize) -> Value {
        if self.orderbooks.is_empty() {
            json!({
                "query": ORDERS_QUERY,
                "variables": { "first": first, "skip": skip },
            })
        } else {
            let orderbooks: Vec<String> = self
                .orderbooks
                .iter()
                .map(|a| address_to_string(*a))
                .collect();
            json!({
                "query": ORDERS_BY_ORDERBOOK_QUERY,
                "variables": { "first": first, "skip": skip, "orderbooks": orderbooks },
            })
        }
    }
}

#[async_trait]
pub trait IndexingSource: Send + Sync {
    /// Status document (`data` of the `_meta` query).
    async fn status(&self, source: &str) -> Result<Value, SourceError>;

    /// One page of the orders query (`data` of the response).
    async fn orders_page(
        &self,
        source: &str,
        query: &OrderQuery,
        skip: usize,
        first: usize,
    ) -> Result<Value, SourceError>;
}

/// GraphQL-over-HTTP client shared by every source URL.
#[derive(Debug, Clone)]
pub struct SubgraphClient {
    client: reqwest::Client,
}

impl SubgraphClient {
    pub fn new(timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn from_settings(sources: &Sources) -> Result<Self, SourceError> {
        Self::new(Duration::from_millis(sources.request_timeout_ms))
    }

    async fn post(&self, source: &str, body: &Value) -> Result<Value, SourceError> {
        let response = self.client.post(source).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }
        let mut payload: Value = response
            .json()
            .await
            .map_err(|e| SourceError::Body(e.to_string()))?;

        match payload.get("errors") {
            Some(Value::Null) | None => {}
            Some(Value::Array(errors)) if errors.is_empty() => {}
            Some(errors) => return Err(SourceError::GraphQl(errors.to_string())),
        }
        Ok(payload
            .get_mut("data")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }
}

#[async_trait]
impl IndexingSource for SubgraphClient {
    async fn status(&self, source: &str) -> Result<Value, SourceError> {
        self.post(source, &json!({ "query": STATUS_QUERY })).await
    }

    async fn orders_page(
        &self,
        source: &str,
        query: &OrderQuery,
        skip: usize,
        first: usize,
    ) -> Result<Value, SourceError> {
        self.post(source, &query.document(skip, first)).await
    }
}

/// What a status document says about the deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexingStatus {
    pub has_indexing_errors: bool,
    pub block: Option<u64>,
}

pub fn parse_status(data: &Value) -> Result<IndexingStatus, DecodeError> {
    let meta = data
        .get("_meta")
        .ok_or_else(|| DecodeError::Shape("missing `_meta`".to_string()))?;
    let has_indexing_errors = meta
        .get("hasIndexingErrors")
        .and_then(Value::as_bool)
        .ok_or_else(|| DecodeError::Shape("missing `_meta.hasIndexingErrors`".to_string()))?;
    let block = meta
        .get("block")
        .and_then(|b| b.get("number"))
        .and_then(Value::as_u64);
    Ok(IndexingStatus {
        has_indexing_errors,
        block,
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct SgToken {
    pub address: String,
    pub decimals: NumberOrString,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SgIo {
    pub vault_id: String,
    pub token: SgToken,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SgOrderbook {
    pub id: String,
}

/// Order entity as the subgraph returns it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SgOrder {
    pub order_hash: String,
    pub owner: String,
    pub active: bool,
    #[serde(default)]
    pub order_bytes: String,
    pub orderbook: SgOrderbook,
    pub inputs: Vec<SgIo>,
    pub outputs: Vec<SgIo>,
}

impl TryFrom<&SgIo> for Io {
    type Error = DecodeError;

    fn try_from(io: &SgIo) -> Result<Self, Self::Error> {
        Ok(Io {
            token: string_to_address(&io.token.address).map_err(DecodeError::field("token"))?,
            decimals: io
                .token
                .decimals
                .to_decimals()
                .map_err(DecodeError::field("decimals"))?,
            vault_id: string_to_u256(&io.vault_id).map_err(DecodeError::field("vaultId"))?,
        })
    }
}

impl TryFrom<SgOrder> for OrderRecord {
    type Error = DecodeError;

    fn try_from(sg: SgOrder) -> Result<Self, Self::Error> {
        let evaluable = if sg.order_bytes.trim().is_empty() {
            Default::default()
        } else {
            string_to_bytes(&sg.order_bytes).map_err(DecodeError::field("orderBytes"))?
        };
        let order = Order {
            owner: string_to_address(&sg.owner).map_err(DecodeError::field("owner"))?,
            evaluable,
            valid_inputs: sg.inputs.iter().map(Io::try_from).collect::<Result<_, _>>()?,
            valid_outputs: sg.outputs.iter().map(Io::try_from).collect::<Result<_, _>>()?,
        };
        order.validate()?;
        Ok(OrderRecord {
            order_hash: string_to_h256(&sg.order_hash).map_err(DecodeError::field("orderHash"))?,
            orderbook: string_to_address(&sg.orderbook.id).map_err(DecodeError::field("orderbook"))?,
            active: sg.active,
            order,
        })
    }
}

/// Decodes the `orders` list of one page, keeping source order.
pub fn parse_orders(mut data: Value) -> Result<Vec<OrderRecord>, DecodeError> {
    let orders = match data.get_mut("orders").map(Value::take) {
        Some(orders @ Value::Array(_)) => orders,
        _ => return Err(DecodeError::Shape("missing `orders` array".to_string())),
    };
    let orders: Vec<SgOrder> =
        serde_json::from_value(orders).map_err(|e| DecodeError::Shape(e.to_string()))?;
    orders.into_iter().map(OrderRecord::try_from).collect()
}


#[cfg(test)]
mod tests {
    use super::fixtures::sg_order;
    use super::*;
    use ethers::types::H256;

    #[test]
    fn test_parse_status() {
        let healthy = json!({ "_meta": { "hasIndexingErrors": false, "block": { "number": 123 } } });
        assert_eq!(
            parse_status(&healthy).unwrap(),
            IndexingStatus {
                has_indexing_errors: false,
                block: Some(123)
            }
        );

        let degraded = json!({ "_meta": { "hasIndexingErrors": true } });
        assert!(parse_status(&degraded).unwrap().has_indexing_errors);

        assert!(parse_status(&json!({ "meta": {} })).is_err());
        assert!(parse_status(&Value::Null).is_err());
    }

    #[test]
    fn test_parse_orders_keeps_order_and_normalizes() {
        let data = json!({ "orders": [
            sg_order(1, 0xa, 0xb, &[1, 2], &[3, 4]),
            sg_order(2, 0xa, 0xb, &[1], &[3]),
        ]});
        let records = parse_orders(data).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].order_hash, H256::from_low_u64_be(1));
        assert_eq!(records[1].order_hash, H256::from_low_u64_be(2));
        assert_eq!(records[0].order.owner, Address::from_low_u64_be(0xa));
        assert_eq!(records[0].orderbook, Address::from_low_u64_be(0xb));
        assert_eq!(records[0].order.valid_inputs.len(), 2);
        assert!(records[0].active);
    }

    #[test]
    fn test_parse_orders_rejects_bad_shape() {
        assert!(matches!(
            parse_orders(json!({ "pools": [] })),
            Err(DecodeError::Shape(_))
        ));
        assert!(matches!(
            parse_orders(json!({ "orders": [{ "orderHash": "0x01" }] })),
            Err(DecodeError::Shape(_))
        ));
        assert_eq!(
            parse_orders(json!({ "orders": [sg_order(1, 0xa, 0xb, &[], &[3])] })),
            Err(DecodeError::EmptyIo("inputs"))
        );
    }

    #[test]
    fn test_query_document_filter() {
        let all = OrderQuery::all().document(0, 100);
        assert_eq!(all["variables"]["first"], 100);
        assert!(all["variables"].get("orderbooks").is_none());

        let filtered =
            OrderQuery::for_orderbooks(vec![Address::from_low_u64_be(0xb)]).document(200, 100);
        assert_eq!(filtered["variables"]["skip"], 200);
        assert_eq!(
            filtered["variables"]["orderbooks"][0],
            "0x000000000000000000000000000000000000000b"
        );
    }
}
