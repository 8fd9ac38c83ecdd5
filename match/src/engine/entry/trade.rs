//! Trade Types and Structures
//!
//! A trade is one match event between a buy order and a sell order.
//! Trades are append-only: created once, never mutated or deleted.

use crate::engine::entry::order::now_millis;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Represents a completed trade in the system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Unique identifier, issued in creation order
    pub id: u64,
    /// Trading symbol for the trade
    pub symbol: String,
    /// ID of the buyer's order
    pub buy_order_id: u64,
    /// ID of the seller's order
    pub sell_order_id: u64,
    /// Execution price, always the resting order's limit price
    pub price: Decimal,
    /// Quantity shared by both legs
    pub quantity: Decimal,
    /// Unix milliseconds when the trade was created
    pub created_at: u64,
}

impl Trade {
    /// Creates a new trade with the specified parameters
    ///
    /// # Arguments
    /// * `id` - Unique identifier for the trade
    /// * `symbol` - Trading symbol
    /// * `price` - Execution price
    /// * `quantity` - Trade quantity
    /// * `buy_order_id` - ID of the buyer's order
    /// * `sell_order_id` - ID of the seller's order
    pub fn new(
        id: u64,
        symbol: String,
        price: Decimal,
        quantity: Decimal,
        buy_order_id: u64,
        sell_order_id: u64,
    ) -> Self {
        Self {
            id,
            symbol,
            buy_order_id,
            sell_order_id,
            price,
            quantity,
            created_at: now_millis(),
        }
    }

    /// Whether `order_id` is one of the two legs
    #[cfg(test)]
    pub fn involves(&self, order_id: u64) -> bool {
        self.buy_order_id == order_id || self.sell_order_id == order_id
    }

    /// Calculates the total amount of the trade
    ///
    /// # Returns
    /// The product of price and quantity
    pub fn total_amount(&self) -> Decimal {
        self.price * self.quantity
    }
}
