use ethers::types::{Address, Bytes, H256, U256};
use serde::Deserialize;
use std::str::FromStr;

/// Lower-cases a hex string and makes sure it carries the `0x` prefix.
pub fn normalize_hex(value: &str) -> String {
    let trimmed = value.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    format!("0x{}", body.to_lowercase())
}

// Addresses
pub fn address_to_string(addr: Address) -> String {
    format!("{:?}", addr).to_lowercase()
}

pub fn string_to_address(s: &str) -> Result<Address, ConversionError> {
    Address::from_str(&normalize_hex(s)).map_err(|e| ConversionError::InvalidAddress(e.to_string()))
}

pub fn string_to_h256(s: &str) -> Result<H256, ConversionError> {
    H256::from_str(&normalize_hex(s)).map_err(|e| ConversionError::InvalidHash(e.to_string()))
}

pub fn string_to_bytes(s: &str) -> Result<Bytes, ConversionError> {
    Bytes::from_str(&normalize_hex(s)).map_err(|e| ConversionError::InvalidBytes(e.to_string()))
}

/// Accepts `0x`-prefixed hex or plain decimal, which is how indexers and
/// log decoders disagree on vault ids.
pub fn string_to_u256(s: &str) -> Result<U256, ConversionError> {
    let trimmed = s.trim();
    if trimmed.starts_with("0x") || trimmed.starts_with("0X") {
        U256::from_str(&trimmed[2..]).map_err(|e| ConversionError::InvalidNumber(e.to_string()))
    } else {
        U256::from_dec_str(trimmed).map_err(|e| ConversionError::InvalidNumber(e.to_string()))
    }
}

/// JSON number that some producers send as a string.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum NumberOrString {
    Number(u64),
    String(String),
}

impl NumberOrString {
    pub fn to_decimals(&self) -> Result<u8, ConversionError> {
        let value = match self {
            NumberOrString::Number(n) => *n,
            NumberOrString::String(s) => s
                .trim()
                .parse::<u64>()
                .map_err(|e| ConversionError::InvalidNumber(e.to_string()))?,
        };
        u8::try_from(value).map_err(|_| ConversionError::Overflow)
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConversionError {
    #[error("Invalid number: {0}")]
    InvalidNumber(String),
    #[error("Overflow in conversion")]
    Overflow,
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Invalid hash: {0}")]
    InvalidHash(String),
    #[error("Invalid bytes: {0}")]
    InvalidBytes(String),
}
