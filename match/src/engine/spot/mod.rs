//! Spot Market Module
//!
//! This module provides functionality for spot market trading:
//! - `order_processor`: Service facade for submitting, canceling and querying orders
//! - `symbol_serializer`: Per-symbol admission of matching and cancel operations

pub mod order_processor;
pub mod symbol_serializer;

pub use order_processor::{Execution, OrderProcessor};
pub use symbol_serializer::SymbolSerializer;
