//! Data Structures Module
//!
//! Holds the per-symbol order book of resting limit orders.

pub mod orderbook;

pub use orderbook::{BookDepth, OrderBook};
