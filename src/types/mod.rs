pub mod conversions;
pub mod order;

pub use order::{DecodeError, Io, Order, OrderRecord, TradePair};
