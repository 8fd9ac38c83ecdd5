use crate::engine::data::OrderBook;
use crate::engine::entry::order::now_millis;
use crate::engine::entry::{Order, OrderSide, OrderType, Sequence, Trade};
use crate::engine::error::{EngineError, EngineResult};
use crate::persist::UnitOfWork;
use rust_decimal::Decimal;

/// Everything one matching pass decided, computed without touching the book.
///
/// `trades[i]` was executed against `makers[i]`; `makers[i]` is that resting
/// order's state after the trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPlan {
    pub order: Order,
    pub trades: Vec<Trade>,
    pub makers: Vec<Order>,
}

impl MatchPlan {
    pub fn unit_of_work(&self) -> UnitOfWork {
        UnitOfWork::from_plan(self)
    }
}

/// Matching state of one symbol: its book plus the price-time algorithm
#[derive(Debug, Clone)]
pub struct Matcher {
    orderbook: OrderBook,
}

impl Matcher {
    pub fn new(symbol: String) -> Self {
        Self {
            orderbook: OrderBook::new(symbol),
        }
    }

    pub fn with_book(orderbook: OrderBook) -> Self {
        Self { orderbook }
    }

    pub fn orderbook(&self) -> &OrderBook {
        &self.orderbook
    }

    /// Runs the matching pass for an admitted order against a read-only view
    /// of the book. Trade ids are drawn from `trade_ids`.
    pub fn plan(&self, mut incoming: Order, trade_ids: &Sequence) -> EngineResult<MatchPlan> {
        if incoming.symbol != self.orderbook.symbol || !incoming.is_open() {
            return Err(EngineError::invariant(format!(
                "order {} ({}, {}) submitted to matcher for {}",
                incoming.id, incoming.symbol, incoming.status, self.orderbook.symbol
            )));
        }

        let now = now_millis();
        let mut trades = Vec::new();
        let mut makers = Vec::new();

        for resting in self.orderbook.iter_side(incoming.side.opposite()) {
            if incoming.remaining_quantity.is_zero() {
                break;
            }
            // Resting orders are limit orders by construction, so the
            // market-vs-market pricing case cannot arise here.
            let price = resting.price.ok_or_else(|| {
                EngineError::invariant(format!("resting order {} has no price", resting.id))
            })?;
            // Sorted book: the first ineligible order ends the pass.
            if !Self::crosses(&incoming, price) {
                break;
            }

            let quantity = incoming.remaining_quantity.min(resting.remaining_quantity);
            if quantity <= Decimal::ZERO {
                return Err(EngineError::invariant(format!(
                    "zero quantity trade between {} and {}",
                    incoming.id, resting.id
                )));
            }

            let (buy_order_id, sell_order_id) = match incoming.side {
                OrderSide::Buy => (incoming.id, resting.id),
                OrderSide::Sell => (resting.id, incoming.id),
            };
            let trade = Trade::new(
                trade_ids.next(),
                incoming.symbol.clone(),
                price,
                quantity,
                buy_order_id,
                sell_order_id,
            );
            log::debug!(
                "trade {} {} {}@{} ({}) buy={} sell={}",
                trade.id,
                trade.symbol,
                trade.quantity,
                trade.price,
                trade.total_amount(),
                buy_order_id,
                sell_order_id
            );

            incoming.fill(quantity, now)?;
            let mut maker = resting.clone();
            maker.fill(quantity, now)?;
            trades.push(trade);
            makers.push(maker);
        }

        if !incoming.is_filled() && incoming.order_type == OrderType::Market {
            // Market orders never rest: the unfilled remainder is dropped.
            incoming.remaining_quantity = Decimal::ZERO;
            incoming.cancel(now);
        }

        Ok(MatchPlan {
            order: incoming,
            trades,
            makers,
        })
    }

    /// Applies a plan produced by [`Matcher::plan`] on this same book state
    pub fn commit(&mut self, plan: &MatchPlan) -> EngineResult<()> {
        for (trade, maker) in plan.trades.iter().zip(&plan.makers) {
            let updated = self
                .orderbook
                .reduce(maker.id, trade.quantity, maker.updated_at)?;
            if updated.remaining_quantity != maker.remaining_quantity {
                return Err(EngineError::invariant(format!(
                    "order {} diverged from plan: {} != {}",
                    maker.id, updated.remaining_quantity, maker.remaining_quantity
                )));
            }
        }
        if plan.order.is_open() {
            self.orderbook.insert(plan.order.clone())?;
        }
        Ok(())
    }

    /// Plan and commit in one step
    #[cfg(test)]
    pub fn place_order(&mut self, order: Order, trade_ids: &Sequence) -> EngineResult<MatchPlan> {
        let plan = self.plan(order, trade_ids)?;
        self.commit(&plan)?;
        Ok(plan)
    }

    pub fn cancel_order(&mut self, order_id: u64) -> Option<Order> {
        self.orderbook.remove(order_id)
    }

    fn crosses(incoming: &Order, resting_price: Decimal) -> bool {
        match (incoming.order_type, incoming.price) {
            (OrderType::Market, _) => true,
            (OrderType::Limit, Some(limit)) => match incoming.side {
                OrderSide::Buy => limit >= resting_price,
                OrderSide::Sell => limit <= resting_price,
            },
            (OrderType::Limit, None) => false,
        }
    }
}
