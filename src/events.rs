//! # Order Events
//!
//! Validated add/remove order events and the per-orderbook buffers the
//! log-watching collaborator pushes them into.
//!
//! Raw payloads arrive loosely typed (hex strings, numbers as strings); they
//! are decoded into [`OrderEvent`] here so the order store only ever sees the
//! validated shape.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let buffers = EventBuffers::new();
//! buffers.push(orderbook, OrderLog::Add(OrderEvent::try_from(raw_log)?));
//! store.handle_new_logs(&buffers);
//! ```

use crate::types::conversions::{
    string_to_address, string_to_bytes, string_to_h256, string_to_u256, NumberOrString,
};
use crate::types::{DecodeError, Io, Order};
use dashmap::DashMap;
use ethers::types::{Address, H256};
use serde::Deserialize;

/// Decoded AddOrder / RemoveOrder payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderEvent {
    pub sender: Address,
    pub order_hash: H256,
    pub order: Order,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderLog {
    Add(OrderEvent),
    Remove(OrderEvent),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawIo {
    pub token: String,
    pub decimals: NumberOrString,
    pub vault_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOrder {
    pub owner: String,
    #[serde(default)]
    pub evaluable: String,
    pub valid_inputs: Vec<RawIo>,
    pub valid_outputs: Vec<RawIo>,
}

/// Log payload as handed over by the log decoder.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOrderLog {
    pub sender: String,
    pub order_hash: String,
    pub order: RawOrder,
}

impl TryFrom<&RawIo> for Io {
    type Error = DecodeError;

    fn try_from(raw: &RawIo) -> Result<Self, Self::Error> {
        Ok(Io {
            token: string_to_address(&raw.token).map_err(DecodeError::field("token"))?,
            decimals: raw.decimals.to_decimals().map_err(DecodeError::field("decimals"))?,
            vault_id: string_to_u256(&raw.vault_id).map_err(DecodeError::field("vaultId"))?,
        })
    }
}

impl TryFrom<RawOrder> for Order {
    type Error = DecodeError;

    fn try_from(raw: RawOrder) -> Result<Self, Self::Error> {
        let evaluable = if raw.evaluable.trim().is_empty() {
            Default::default()
        } else {
            string_to_bytes(&raw.evaluable).map_err(DecodeError::field("evaluable"))?
        };
        let order = Order {
            owner: string_to_address(&raw.owner).map_err(DecodeError::field("owner"))?,
            evaluable,
            valid_inputs: raw
                .valid_inputs
                .iter()
                .map(Io::try_from)
                .collect::<Result<_, _>>()?,
            valid_outputs: raw
                .valid_outputs
                .iter()
                .map(Io::try_from)
                .collect::<Result<_, _>>()?,
        };
        order.validate()?;
        Ok(order)
    }
}

impl TryFrom<RawOrderLog> for OrderEvent {
    type Error = DecodeError;

    fn try_from(raw: RawOrderLog) -> Result<Self, Self::Error> {
        Ok(OrderEvent {
            sender: string_to_address(&raw.sender).map_err(DecodeError::field("sender"))?,
            order_hash: string_to_h256(&raw.order_hash).map_err(DecodeError::field("orderHash"))?,
            order: Order::try_from(raw.order)?,
        })
    }
}

impl OrderEvent {
    /// Decodes a JSON log payload.
    pub fn from_json(value: serde_json::Value) -> Result<Self, DecodeError> {
        let raw: RawOrderLog =
            serde_json::from_value(value).map_err(|e| DecodeError::Shape(e.to_string()))?;
        Self::try_from(raw)
    }
}

/// Events buffered for one orderbook, in arrival order per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingLogs {
    pub added: Vec<OrderEvent>,
    pub removed: Vec<OrderEvent>,
}

impl PendingLogs {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len()
    }
}

/// Per-orderbook add/remove buffers, safe to push into from watcher tasks
/// while the owner of the store drains them.
#[derive(Debug, Default)]
pub struct EventBuffers {
    pending: DashMap<Address, PendingLogs>,
}

impl EventBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, orderbook: Address, log: OrderLog) {
        let mut entry = self.pending.entry(orderbook).or_default();
        match log {
            OrderLog::Add(event) => entry.added.push(event),
            OrderLog::Remove(event) => entry.removed.push(event),
        }
    }

    pub fn push_add(&self, orderbook: Address, event: OrderEvent) {
        self.push(orderbook, OrderLog::Add(event));
    }

    pub fn push_remove(&self, orderbook: Address, event: OrderEvent) {
        self.push(orderbook, OrderLog::Remove(event));
    }

    /// Takes and clears one orderbook's buffers in a single step.
    pub fn take(&self, orderbook: &Address) -> Option<PendingLogs> {
        self.pending
            .remove(orderbook)
            .map(|(_, logs)| logs)
            .filter(|logs| !logs.is_empty())
    }

    pub fn pending_orderbooks(&self) -> Vec<Address> {
        self.pending
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| *entry.key())
            .collect()
    }

    /// Total buffered events across all orderbooks.
    pub fn len(&self) -> usize {
        self.pending.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::U256;
    use serde_json::json;

    fn raw_log_json() -> serde_json::Value {
        json!({
            "sender": "0x00000000000000000000000000000000000000AA",
            "orderHash": "0x00000000000000000000000000000000000000000000000000000000000000FF",
            "order": {
                "owner": "0x00000000000000000000000000000000000000AA",
                "evaluable": "0xdeadbeef",
                "validInputs": [
                    { "token": "0x0000000000000000000000000000000000000001", "decimals": 18, "vaultId": "0x1" }
                ],
                "validOutputs": [
                    { "token": "0x0000000000000000000000000000000000000002", "decimals": "6", "vaultId": "42" }
                ]
            }
        })
    }

    #[test]
    fn test_decode_raw_log() {
        let event = OrderEvent::from_json(raw_log_json()).unwrap();
        assert_eq!(event.sender, Address::from_low_u64_be(0xaa));
        assert_eq!(event.order_hash, H256::from_low_u64_be(0xff));
        assert_eq!(event.order.valid_inputs[0].vault_id, U256::from(1));
        assert_eq!(event.order.valid_outputs[0].decimals, 6);
        assert_eq!(event.order.valid_outputs[0].vault_id, U256::from(42));
        assert_eq!(event.order.evaluable.as_ref(), &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_decode_rejects_bad_fields() {
        let mut value = raw_log_json();
        value["order"]["owner"] = json!("0xnot-an-address");
        assert!(matches!(
            OrderEvent::from_json(value),
            Err(DecodeError::Field { field: "owner", .. })
        ));

        let mut value = raw_log_json();
        value["order"]["validOutputs"] = json!([]);
        assert_eq!(
            OrderEvent::from_json(value),
            Err(DecodeError::EmptyIo("outputs"))
        );

        let mut value = raw_log_json();
        value.as_object_mut().unwrap().remove("orderHash");
        assert!(matches!(OrderEvent::from_json(value), Err(DecodeError::Shape(_))));
    }

    #[test]
    fn test_buffers_take_clears() {
        let buffers = EventBuffers::new();
        let orderbook = Address::from_low_u64_be(0xb);
        let event = OrderEvent::from_json(raw_log_json()).unwrap();

        buffers.push_add(orderbook, event.clone());
        buffers.push_remove(orderbook, event.clone());
        buffers.push_add(orderbook, event);
        assert_eq!(buffers.len(), 3);
        assert_eq!(buffers.pending_orderbooks(), vec![orderbook]);

        let taken = buffers.take(&orderbook).unwrap();
        assert_eq!(taken.added.len(), 2);
        assert_eq!(taken.removed.len(), 1);
        assert!(buffers.is_empty());
        assert!(buffers.take(&orderbook).is_none());
    }
}
