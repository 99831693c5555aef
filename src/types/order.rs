use crate::types::conversions::ConversionError;
use ethers::types::{Address, Bytes, H256, U256};

/// One input or output vault of an order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Io {
    pub token: Address,
    pub decimals: u8,
    pub vault_id: U256,
}

/// Decoded order as the store sees it.
///
/// `evaluable` is opaque here; it is only carried along for the
/// collaborators that build take-order calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub owner: Address,
    pub evaluable: Bytes,
    pub valid_inputs: Vec<Io>,
    pub valid_outputs: Vec<Io>,
}

/// One order record from an indexing source snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRecord {
    pub order_hash: H256,
    pub orderbook: Address,
    pub active: bool,
    pub order: Order,
}

/// A concrete (output vault, input vault) combination of an order.
///
/// The taker buys the order's output (`sell_*`) and pays with the order's
/// input (`buy_*`), so naming follows the order owner's side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TradePair {
    pub input_io_index: usize,
    pub output_io_index: usize,
    pub buy_token: Address,
    pub buy_token_decimals: u8,
    pub buy_vault_id: U256,
    pub sell_token: Address,
    pub sell_token_decimals: u8,
    pub sell_vault_id: U256,
}

impl Order {
    /// Cross product of outputs and inputs, skipping same-token combinations.
    pub fn trade_pairs(&self) -> Vec<TradePair> {
        let mut pairs = Vec::with_capacity(self.valid_outputs.len() * self.valid_inputs.len());
        for (output_io_index, output) in self.valid_outputs.iter().enumerate() {
            for (input_io_index, input) in self.valid_inputs.iter().enumerate() {
                if input.token == output.token {
                    continue;
                }
                pairs.push(TradePair {
                    input_io_index,
                    output_io_index,
                    buy_token: input.token,
                    buy_token_decimals: input.decimals,
                    buy_vault_id: input.vault_id,
                    sell_token: output.token,
                    sell_token_decimals: output.decimals,
                    sell_vault_id: output.vault_id,
                });
            }
        }
        pairs
    }

    pub(crate) fn validate(&self) -> Result<(), DecodeError> {
        if self.valid_inputs.is_empty() {
            return Err(DecodeError::EmptyIo("inputs"));
        }
        if self.valid_outputs.is_empty() {
            return Err(DecodeError::EmptyIo("outputs"));
        }
        Ok(())
    }
}

/// Rejection of an order payload at the decoding boundary.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DecodeError {
    #[error("field `{field}`: {source}")]
    Field {
        field: &'static str,
        #[source]
        source: ConversionError,
    },
    #[error("order has no {0}")]
    EmptyIo(&'static str),
    #[error("unexpected payload shape: {0}")]
    Shape(String),
}

impl DecodeError {
    pub(crate) fn field(field: &'static str) -> impl FnOnce(ConversionError) -> DecodeError {
        move |source| DecodeError::Field { field, source }
    }
}
