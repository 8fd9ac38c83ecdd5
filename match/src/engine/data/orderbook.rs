use crate::engine::entry::{Order, OrderSide, OrderType};
use crate::engine::error::{EngineError, EngineResult};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Aggregated view of one price level
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepthLevel {
    pub price: Decimal,
    pub quantity: Decimal,
    pub order_count: usize,
}

/// Depth snapshot, both sides sorted best to worst
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookDepth {
    pub symbol: String,
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
}

/// Resting limit orders of one symbol.
///
/// Each side maps price -> FIFO queue ordered by arrival sequence. Bids are
/// walked from the highest key, asks from the lowest, so the first order
/// yielded by [`OrderBook::iter_side`] is always the one with priority.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    pub symbol: String,
    bids: BTreeMap<Decimal, VecDeque<Order>>, // price -> orders
    asks: BTreeMap<Decimal, VecDeque<Order>>, // price -> orders
    orders_by_id: HashMap<u64, (OrderSide, Decimal)>,
}

impl OrderBook {
    pub fn new(symbol: String) -> Self {
        Self {
            symbol,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            orders_by_id: HashMap::new(),
        }
    }

    /// Rebuilds a book from persisted open orders, in any order
    pub fn restore(symbol: String, mut orders: Vec<Order>) -> EngineResult<Self> {
        let mut book = Self::new(symbol);
        orders.sort_by_key(|o| o.sequence);
        for order in orders {
            book.insert(order)?;
        }
        Ok(book)
    }

    fn side(&self, side: OrderSide) -> &BTreeMap<Decimal, VecDeque<Order>> {
        match side {
            OrderSide::Buy => &self.bids,
            OrderSide::Sell => &self.asks,
        }
    }

    fn side_mut(&mut self, side: OrderSide) -> &mut BTreeMap<Decimal, VecDeque<Order>> {
        match side {
            OrderSide::Buy => &mut self.bids,
            OrderSide::Sell => &mut self.asks,
        }
    }

    /// Adds a resting limit order behind every order of equal or earlier arrival
    pub fn insert(&mut self, order: Order) -> EngineResult<()> {
        let price = match (order.order_type, order.price) {
            (OrderType::Limit, Some(price)) if price > Decimal::ZERO => price,
            _ => {
                return Err(EngineError::invariant(format!(
                    "order {} ({} {:?}) cannot rest in a book",
                    order.id, order.order_type, order.price
                )))
            }
        };
        if !order.is_open() || order.remaining_quantity <= Decimal::ZERO {
            return Err(EngineError::invariant(format!(
                "order {} is {} with remaining {}",
                order.id, order.status, order.remaining_quantity
            )));
        }
        if order.symbol != self.symbol {
            return Err(EngineError::invariant(format!(
                "order {} for {} inserted into book {}",
                order.id, order.symbol, self.symbol
            )));
        }
        if self.orders_by_id.contains_key(&order.id) {
            return Err(EngineError::invariant(format!(
                "order {} already rests in book {}",
                order.id, self.symbol
            )));
        }

        self.orders_by_id.insert(order.id, (order.side, price));
        let queue = self.side_mut(order.side).entry(price).or_default();
        // Normally lands at the back; restore may feed slightly out of order.
        let pos = queue.partition_point(|o| o.sequence < order.sequence);
        queue.insert(pos, order);
        Ok(())
    }

    pub fn get(&self, order_id: u64) -> Option<&Order> {
        let (side, price) = self.orders_by_id.get(&order_id)?;
        self.side(*side)
            .get(price)?
            .iter()
            .find(|o| o.id == order_id)
    }

    #[cfg(test)]
    pub fn contains(&self, order_id: u64) -> bool {
        self.orders_by_id.contains_key(&order_id)
    }

    /// Best resting order on `side`
    #[cfg(test)]
    pub fn best(&self, side: OrderSide) -> Option<&Order> {
        self.iter_side(side).next()
    }

    #[cfg(test)]
    pub fn best_price(&self, side: OrderSide) -> Option<Decimal> {
        match side {
            OrderSide::Buy => self.bids.keys().next_back().copied(),
            OrderSide::Sell => self.asks.keys().next().copied(),
        }
    }

    /// All resting orders on `side` in priority order
    pub fn iter_side(&self, side: OrderSide) -> Box<dyn Iterator<Item = &Order> + '_> {
        match side {
            OrderSide::Buy => Box::new(self.bids.values().rev().flat_map(|q| q.iter())),
            OrderSide::Sell => Box::new(self.asks.values().flat_map(|q| q.iter())),
        }
    }

    /// Reduces a resting order in place. The order keeps its queue position
    /// while anything remains and leaves the book once filled.
    ///
    /// Returns the order as it stands after the fill.
    pub fn reduce(&mut self, order_id: u64, quantity: Decimal, now: u64) -> EngineResult<Order> {
        let (side, price) = *self.orders_by_id.get(&order_id).ok_or_else(|| {
            EngineError::invariant(format!("order {} not resting in {}", order_id, self.symbol))
        })?;
        let levels = self.side_mut(side);
        let queue = levels.get_mut(&price).ok_or_else(|| {
            EngineError::invariant(format!("missing price level {} for order {}", price, order_id))
        })?;
        let pos = queue.iter().position(|o| o.id == order_id).ok_or_else(|| {
            EngineError::invariant(format!("order {} missing from level {}", order_id, price))
        })?;

        queue[pos].fill(quantity, now)?;
        let updated = queue[pos].clone();
        if updated.is_filled() {
            queue.remove(pos);
            if queue.is_empty() {
                levels.remove(&price);
            }
            self.orders_by_id.remove(&order_id);
        }
        Ok(updated)
    }

    pub fn remove(&mut self, order_id: u64) -> Option<Order> {
        let (side, price) = self.orders_by_id.remove(&order_id)?;
        let levels = self.side_mut(side);
        let queue = levels.get_mut(&price)?;
        let pos = queue.iter().position(|o| o.id == order_id)?;
        let order = queue.remove(pos);
        if queue.is_empty() {
            levels.remove(&price);
        }
        order
    }

    /// Aggregates the top `levels` price levels of each side
    pub fn depth(&self, levels: usize) -> BookDepth {
        fn aggregate<'a>(
            iter: impl Iterator<Item = (&'a Decimal, &'a VecDeque<Order>)>,
            levels: usize,
        ) -> Vec<DepthLevel> {
            iter.take(levels)
                .map(|(price, queue)| DepthLevel {
                    price: *price,
                    quantity: queue.iter().map(|o| o.remaining_quantity).sum(),
                    order_count: queue.len(),
                })
                .collect()
        }

        BookDepth {
            symbol: self.symbol.clone(),
            bids: aggregate(self.bids.iter().rev(), levels),
            asks: aggregate(self.asks.iter(), levels),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.orders_by_id.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.orders_by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::entry::{OrderRequest, OrderStatus};
    use rust_decimal_macros::dec;

    fn limit(id: u64, side: OrderSide, price: Decimal, qty: Decimal) -> Order {
        Order::admit(id, id, &OrderRequest::limit("BTC", side, price, qty))
    }

    #[test]
    fn test_priority_order() {
        let mut book = OrderBook::new("BTC".to_string());
        book.insert(limit(1, OrderSide::Buy, dec!(100), dec!(1))).unwrap();
        book.insert(limit(2, OrderSide::Buy, dec!(101), dec!(1))).unwrap();
        book.insert(limit(3, OrderSide::Buy, dec!(101), dec!(1))).unwrap();
        book.insert(limit(4, OrderSide::Sell, dec!(105), dec!(1))).unwrap();
        book.insert(limit(5, OrderSide::Sell, dec!(103), dec!(1))).unwrap();

        let bids: Vec<u64> = book.iter_side(OrderSide::Buy).map(|o| o.id).collect();
        assert_eq!(bids, vec![2, 3, 1]);
        let asks: Vec<u64> = book.iter_side(OrderSide::Sell).map(|o| o.id).collect();
        assert_eq!(asks, vec![5, 4]);
        assert_eq!(book.best(OrderSide::Buy).map(|o| o.id), Some(2));
        assert_eq!(book.best_price(OrderSide::Sell), Some(dec!(103)));
    }

    #[test]
    fn test_partial_reduce_keeps_time_priority() {
        let mut book = OrderBook::new("BTC".to_string());
        book.insert(limit(1, OrderSide::Sell, dec!(10), dec!(5))).unwrap();
        book.insert(limit(2, OrderSide::Sell, dec!(10), dec!(5))).unwrap();

        let updated = book.reduce(1, dec!(2), 0).unwrap();
        assert_eq!(updated.remaining_quantity, dec!(3));
        assert_eq!(updated.status, OrderStatus::Open);
        assert_eq!(book.best(OrderSide::Sell).map(|o| o.id), Some(1));

        let filled = book.reduce(1, dec!(3), 0).unwrap();
        assert_eq!(filled.status, OrderStatus::Filled);
        assert!(!book.contains(1));
        assert_eq!(book.best(OrderSide::Sell).map(|o| o.id), Some(2));
    }

    #[test]
    fn test_depth_aggregates_levels() {
        let mut book = OrderBook::new("BTC".to_string());
        book.insert(limit(1, OrderSide::Buy, dec!(99), dec!(1))).unwrap();
        book.insert(limit(2, OrderSide::Buy, dec!(100), dec!(2))).unwrap();
        book.insert(limit(3, OrderSide::Buy, dec!(100), dec!(3))).unwrap();
        book.insert(limit(4, OrderSide::Sell, dec!(101), dec!(4))).unwrap();
        book.insert(limit(5, OrderSide::Sell, dec!(102), dec!(1))).unwrap();

        let depth = book.depth(1);
        assert_eq!(
            depth.bids,
            vec![DepthLevel { price: dec!(100), quantity: dec!(5), order_count: 2 }]
        );
        assert_eq!(
            depth.asks,
            vec![DepthLevel { price: dec!(101), quantity: dec!(4), order_count: 1 }]
        );
        assert_eq!(book.depth(10).bids.len(), 2);
    }

    #[test]
    fn test_remove_drops_empty_level() {
        let mut book = OrderBook::new("BTC".to_string());
        book.insert(limit(1, OrderSide::Buy, dec!(100), dec!(1))).unwrap();
        let removed = book.remove(1).unwrap();
        assert_eq!(removed.id, 1);
        assert!(book.is_empty());
        assert!(book.depth(10).bids.is_empty());
        assert!(book.remove(1).is_none());
    }

    #[test]
    fn test_restore_orders_by_sequence() {
        let orders = vec![
            limit(9, OrderSide::Buy, dec!(100), dec!(1)),
            limit(3, OrderSide::Buy, dec!(100), dec!(1)),
            limit(5, OrderSide::Buy, dec!(100), dec!(1)),
        ];
        let book = OrderBook::restore("BTC".to_string(), orders).unwrap();
        let ids: Vec<u64> = book.iter_side(OrderSide::Buy).map(|o| o.id).collect();
        assert_eq!(ids, vec![3, 5, 9]);
    }

    #[test]
    #[should_panic(expected = "invariant violation")]
    fn test_market_order_cannot_rest() {
        let mut book = OrderBook::new("BTC".to_string());
        let order = Order::admit(1, 1, &OrderRequest::market("BTC", OrderSide::Buy, dec!(1)));
        let _ = book.insert(order);
    }
}
