use super::{OrderChange, PersistError, PersistResult, PersistenceGateway, UnitOfWork, Watermarks};
use crate::engine::entry::{Order, OrderSide, Trade};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

/// Orders and trades held in process memory.
///
/// Shared by the in-memory gateway and the journal, which replays its file
/// into one of these on open.
#[derive(Debug, Default)]
pub struct MemoryState {
    orders: BTreeMap<u64, Order>,
    trades: BTreeMap<u64, Trade>,
}

impl MemoryState {
    /// Rejects a unit of work that could only be applied partially
    pub fn check(&self, work: &UnitOfWork) -> PersistResult<()> {
        let mut created = BTreeSet::new();
        for change in &work.orders {
            match change {
                OrderChange::Created(order) => {
                    if self.orders.contains_key(&order.id) || !created.insert(order.id) {
                        return Err(PersistError::Rejected(format!(
                            "order {} already exists",
                            order.id
                        )));
                    }
                }
                OrderChange::Updated { id, .. } => {
                    if !self.orders.contains_key(id) && !created.contains(id) {
                        return Err(PersistError::Rejected(format!("order {} does not exist", id)));
                    }
                }
            }
        }
        for trade in &work.trades {
            if self.trades.contains_key(&trade.id) {
                return Err(PersistError::Rejected(format!(
                    "trade {} already exists",
                    trade.id
                )));
            }
        }
        Ok(())
    }

    /// Applies a unit of work that passed [`MemoryState::check`]
    pub fn apply(&mut self, work: &UnitOfWork) {
        for change in &work.orders {
            match change {
                OrderChange::Created(order) => {
                    self.orders.insert(order.id, order.clone());
                }
                OrderChange::Updated {
                    id,
                    status,
                    remaining_quantity,
                    updated_at,
                } => {
                    if let Some(order) = self.orders.get_mut(id) {
                        order.status = *status;
                        order.remaining_quantity = *remaining_quantity;
                        order.updated_at = *updated_at;
                    }
                }
            }
        }
        for trade in &work.trades {
            self.trades.insert(trade.id, trade.clone());
        }
    }

    pub fn get_order(&self, id: u64) -> Option<Order> {
        self.orders.get(&id).cloned()
    }

    pub fn list_trades(&self, symbol: Option<&str>) -> Vec<Trade> {
        self.trades
            .values()
            .rev()
            .filter(|t| symbol.map_or(true, |s| t.symbol == s))
            .cloned()
            .collect()
    }

    pub fn open_orders(&self, symbol: &str, side: OrderSide) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .values()
            .filter(|o| o.is_open() && o.symbol == symbol && o.side == side)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.sequence);
        orders
    }

    pub fn open_symbols(&self) -> Vec<String> {
        self.orders
            .values()
            .filter(|o| o.is_open())
            .map(|o| o.symbol.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn watermarks(&self) -> Watermarks {
        Watermarks {
            last_order_id: self.orders.keys().next_back().copied().unwrap_or_default(),
            last_order_sequence: self.orders.values().map(|o| o.sequence).max().unwrap_or_default(),
            last_trade_id: self.trades.keys().next_back().copied().unwrap_or_default(),
        }
    }
}

/// Non-durable gateway. Everything is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    state: Mutex<MemoryState>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> PersistResult<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| PersistError::Unavailable("memory state lock poisoned".to_string()))?;
        Ok(f(&mut state))
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn commit(&self, work: &UnitOfWork) -> PersistResult<()> {
        self.with_state(|state| -> PersistResult<()> {
            state.check(work)?;
            state.apply(work);
            Ok(())
        })?
    }

    async fn get_order(&self, id: u64) -> PersistResult<Option<Order>> {
        self.with_state(|state| state.get_order(id))
    }

    async fn list_trades(&self, symbol: Option<&str>) -> PersistResult<Vec<Trade>> {
        self.with_state(|state| state.list_trades(symbol))
    }

    async fn open_orders(&self, symbol: &str, side: OrderSide) -> PersistResult<Vec<Order>> {
        self.with_state(|state| state.open_orders(symbol, side))
    }

    async fn open_symbols(&self) -> PersistResult<Vec<String>> {
        self.with_state(|state| state.open_symbols())
    }

    async fn watermarks(&self) -> PersistResult<Watermarks> {
        self.with_state(|state| state.watermarks())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::entry::{OrderRequest, OrderStatus};
    use rust_decimal_macros::dec;

    fn order(id: u64, symbol: &str, side: OrderSide) -> Order {
        Order::admit(id, id, &OrderRequest::limit(symbol, side, dec!(10), dec!(1)))
    }

    #[tokio::test]
    async fn test_commit_is_all_or_nothing() {
        let gateway = MemoryGateway::new();
        let work = UnitOfWork {
            orders: vec![OrderChange::Created(order(1, "BTC", OrderSide::Buy))],
            trades: vec![],
        };
        gateway.commit(&work).await.unwrap();

        let bad = UnitOfWork {
            orders: vec![
                OrderChange::Created(order(2, "BTC", OrderSide::Buy)),
                OrderChange::Updated {
                    id: 42,
                    status: OrderStatus::Filled,
                    remaining_quantity: dec!(0),
                    updated_at: 0,
                },
            ],
            trades: vec![],
        };
        assert!(matches!(gateway.commit(&bad).await, Err(PersistError::Rejected(_))));
        assert!(gateway.get_order(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_queries() {
        let gateway = MemoryGateway::new();
        let mut filled = order(3, "ETH", OrderSide::Sell);
        filled.status = OrderStatus::Filled;
        let work = UnitOfWork {
            orders: vec![
                OrderChange::Created(order(2, "BTC", OrderSide::Buy)),
                OrderChange::Created(order(1, "BTC", OrderSide::Buy)),
                OrderChange::Created(filled),
            ],
            trades: vec![],
        };
        gateway.commit(&work).await.unwrap();

        let bids = gateway.open_orders("BTC", OrderSide::Buy).await.unwrap();
        assert_eq!(bids.iter().map(|o| o.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(gateway.open_symbols().await.unwrap(), vec!["BTC".to_string()]);
        let marks = gateway.watermarks().await.unwrap();
        assert_eq!(marks.last_order_id, 3);
        assert_eq!(marks.last_trade_id, 0);
    }
}
