use crate::engine::error::{EngineError, EngineResult, ValidationError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Filled,
    Canceled,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "limit",
            OrderType::Market => "market",
        }
    }
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Open => "open",
            OrderStatus::Filled => "filled",
            OrderStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderSide {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            other => Err(ValidationError::Malformed(format!("unknown side {:?}", other))),
        }
    }
}

impl FromStr for OrderType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "limit" => Ok(OrderType::Limit),
            "market" => Ok(OrderType::Market),
            other => Err(ValidationError::Malformed(format!(
                "unknown order type {:?}",
                other
            ))),
        }
    }
}

impl FromStr for OrderStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(OrderStatus::Open),
            "filled" => Ok(OrderStatus::Filled),
            "canceled" => Ok(OrderStatus::Canceled),
            other => Err(ValidationError::Malformed(format!(
                "unknown order status {:?}",
                other
            ))),
        }
    }
}

/// Unix time in milliseconds. Audit only, never used for priority.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A submission before admission: no id, no sequence, no status yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
}

impl OrderRequest {
    pub fn limit(symbol: &str, side: OrderSide, price: Decimal, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Limit,
            price: Some(price),
            quantity,
        }
    }

    pub fn market(symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            price: None,
            quantity,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.symbol.trim().is_empty() {
            return Err(ValidationError::EmptySymbol);
        }
        if self.quantity <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveQuantity(self.quantity));
        }
        if self.order_type == OrderType::Limit {
            match self.price {
                None => return Err(ValidationError::MissingPrice),
                Some(price) if price <= Decimal::ZERO => {
                    return Err(ValidationError::NonPositivePrice(price))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    /// Limit price. Always `None` for market orders.
    pub price: Option<Decimal>,
    pub initial_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub status: OrderStatus,
    /// Arrival sequence, the time component of price-time priority
    pub sequence: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Order {
    /// Admits a validated request: remaining = initial, tentatively open
    pub fn admit(id: u64, sequence: u64, request: &OrderRequest) -> Self {
        let now = now_millis();
        let price = match request.order_type {
            OrderType::Limit => request.price,
            OrderType::Market => None,
        };
        Self {
            id,
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            price,
            initial_quantity: request.quantity,
            remaining_quantity: request.quantity,
            status: OrderStatus::Open,
            sequence,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == OrderStatus::Open
    }

    pub fn is_filled(&self) -> bool {
        self.remaining_quantity.is_zero()
    }

    #[cfg(test)]
    pub fn filled_quantity(&self) -> Decimal {
        self.initial_quantity - self.remaining_quantity
    }

    /// Consumes `quantity` from the remaining amount, marking the order
    /// filled when nothing is left.
    pub fn fill(&mut self, quantity: Decimal, now: u64) -> EngineResult<()> {
        if quantity <= Decimal::ZERO || quantity > self.remaining_quantity {
            return Err(EngineError::invariant(format!(
                "fill of {} against order {} with remaining {}",
                quantity, self.id, self.remaining_quantity
            )));
        }
        self.remaining_quantity -= quantity;
        if self.remaining_quantity.is_zero() {
            self.status = OrderStatus::Filled;
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn cancel(&mut self, now: u64) {
        self.status = OrderStatus::Canceled;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_validate_rejects_bad_requests() {
        let empty = OrderRequest::limit(" ", OrderSide::Buy, dec!(1), dec!(1));
        assert_eq!(empty.validate(), Err(ValidationError::EmptySymbol));

        let zero_qty = OrderRequest::limit("BTC", OrderSide::Buy, dec!(1), dec!(0));
        assert_eq!(
            zero_qty.validate(),
            Err(ValidationError::NonPositiveQuantity(dec!(0)))
        );

        let bad_price = OrderRequest::limit("BTC", OrderSide::Sell, dec!(-1), dec!(1));
        assert_eq!(
            bad_price.validate(),
            Err(ValidationError::NonPositivePrice(dec!(-1)))
        );

        let mut no_price = OrderRequest::limit("BTC", OrderSide::Sell, dec!(1), dec!(1));
        no_price.price = None;
        assert_eq!(no_price.validate(), Err(ValidationError::MissingPrice));
    }

    #[test]
    fn test_market_request_ignores_price() {
        let mut req = OrderRequest::market("BTC", OrderSide::Buy, dec!(2));
        req.price = Some(dec!(-5));
        assert!(req.validate().is_ok());
        let order = Order::admit(1, 1, &req);
        assert_eq!(order.price, None);
        assert_eq!(order.remaining_quantity, dec!(2));
        assert!(order.is_open());
    }

    #[test]
    fn test_fill_to_zero_marks_filled() {
        let req = OrderRequest::limit("BTC", OrderSide::Buy, dec!(100), dec!(3));
        let mut order = Order::admit(7, 7, &req);
        order.fill(dec!(1), 1).unwrap();
        assert_eq!(order.status, OrderStatus::Open);
        order.fill(dec!(2), 2).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_quantity(), dec!(3));
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("BUY".parse::<OrderSide>().unwrap(), OrderSide::Buy);
        assert_eq!("market".parse::<OrderType>().unwrap(), OrderType::Market);
        assert_eq!("canceled".parse::<OrderStatus>().unwrap(), OrderStatus::Canceled);
        assert!("hold".parse::<OrderSide>().is_err());
    }
}
