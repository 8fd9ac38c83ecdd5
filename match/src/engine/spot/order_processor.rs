//! Order Processing Module
//!
//! This module provides the service facade for the spot market. It admits
//! orders per symbol, runs the matcher, hands the outcome to the persistence
//! gateway and only then applies it to the in-memory book.

use crate::engine::data::{BookDepth, OrderBook};
use crate::engine::entry::order::now_millis;
use crate::engine::entry::{Order, OrderRequest, OrderSide, Sequence, Trade};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::matchlogic::Matcher;
use crate::engine::spot::SymbolSerializer;
use crate::metrics;
use crate::persist::{PersistenceGateway, UnitOfWork};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// Outcome of a submission: the order in its final state and its trades
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub order: Order,
    pub trades: Vec<Trade>,
}

/// Main processor for handling spot market orders
pub struct OrderProcessor {
    serializer: SymbolSerializer,
    gateway: Arc<dyn PersistenceGateway>,
    order_ids: Sequence,
    arrivals: Sequence,
    trade_ids: Sequence,
}

impl OrderProcessor {
    /// Creates a processor with empty books over `gateway`
    pub fn new(gateway: Arc<dyn PersistenceGateway>) -> Self {
        Self {
            serializer: SymbolSerializer::new(),
            gateway,
            order_ids: Sequence::new(),
            arrivals: Sequence::new(),
            trade_ids: Sequence::new(),
        }
    }

    /// Rebuilds every book and id generator from the gateway's open orders
    pub async fn recover(gateway: Arc<dyn PersistenceGateway>) -> EngineResult<Self> {
        let marks = gateway.watermarks().await?;
        let processor = Self {
            serializer: SymbolSerializer::new(),
            order_ids: Sequence::starting_after(marks.last_order_id),
            arrivals: Sequence::starting_after(marks.last_order_sequence),
            trade_ids: Sequence::starting_after(marks.last_trade_id),
            gateway,
        };

        let mut restored = 0;
        for symbol in processor.gateway.open_symbols().await? {
            let mut orders = processor.gateway.open_orders(&symbol, OrderSide::Buy).await?;
            orders.extend(processor.gateway.open_orders(&symbol, OrderSide::Sell).await?);
            restored += orders.len();
            let book = OrderBook::restore(symbol, orders)?;
            processor.serializer.install(Matcher::with_book(book)).await;
        }
        log::info!(
            "recovered {} open orders in {} books from {} (last order {}, last trade {})",
            restored,
            processor.serializer.symbols().await.len(),
            processor.gateway.name(),
            marks.last_order_id,
            marks.last_trade_id
        );
        Ok(processor)
    }

    /// Places a new order in the market
    ///
    /// # Arguments
    /// * `request` - The submission to validate and match
    ///
    /// # Returns
    /// * `Ok(Execution)` - The final order and the trades it produced
    /// * `Err(EngineError)` - Validation or persistence failure; nothing was applied
    pub async fn submit_order(&self, request: OrderRequest) -> EngineResult<Execution> {
        if let Err(e) = request.validate() {
            log::warn!("rejected order for {:?}: {}", request.symbol, e);
            return Err(e.into());
        }

        let matcher = self.serializer.admit(&request.symbol).await;
        // Ids are drawn under the slot so arrival order matches book order.
        let order = Order::admit(self.order_ids.next(), self.arrivals.next(), &request);
        let plan = matcher.plan(order, &self.trade_ids)?;

        let work = plan.unit_of_work();
        let (id, symbol) = (plan.order.id, plan.order.symbol.clone());
        let plan = match self
            .settle(matcher, work, move |matcher| {
                matcher.commit(&plan)?;
                Ok(plan)
            })
            .await
        {
            Ok(plan) => plan,
            Err(e) => {
                log::warn!("order {} for {} discarded: {}", id, symbol, e);
                return Err(e);
            }
        };

        log::debug!(
            "order {} {} {} {} -> {} with {} trades, remaining {}",
            plan.order.id,
            plan.order.symbol,
            plan.order.side,
            plan.order.order_type,
            plan.order.status,
            plan.trades.len(),
            plan.order.remaining_quantity
        );
        metrics::record_trades(&plan.order.symbol, plan.trades.len());
        metrics::record_order_status(plan.order.status.as_str());

        Ok(Execution {
            order: plan.order,
            trades: plan.trades,
        })
    }

    /// Cancels an open order
    ///
    /// # Arguments
    /// * `order_id` - ID of the order to cancel
    ///
    /// # Returns
    /// * `Ok(Order)` - The canceled order, remaining quantity preserved
    /// * `Err(EngineError::NotFound)` - No such order
    /// * `Err(EngineError::Conflict)` - The order is no longer open
    pub async fn cancel_order(&self, order_id: u64) -> EngineResult<Order> {
        let stored = self
            .gateway
            .get_order(order_id)
            .await?
            .ok_or(EngineError::NotFound(order_id))?;
        if !stored.is_open() {
            return Err(EngineError::Conflict {
                id: order_id,
                status: stored.status,
            });
        }

        let matcher = self
            .serializer
            .admit_existing(&stored.symbol)
            .await
            .ok_or_else(|| {
                EngineError::invariant(format!(
                    "open order {} has no book for {}",
                    order_id, stored.symbol
                ))
            })?;

        // Re-check under the slot: a match may have filled it meanwhile.
        let mut order = match matcher.orderbook().get(order_id) {
            Some(order) => order.clone(),
            None => {
                let current = self
                    .gateway
                    .get_order(order_id)
                    .await?
                    .ok_or(EngineError::NotFound(order_id))?;
                if current.is_open() {
                    return Err(EngineError::invariant(format!(
                        "open order {} missing from book {}",
                        order_id, current.symbol
                    )));
                }
                return Err(EngineError::Conflict {
                    id: order_id,
                    status: current.status,
                });
            }
        };

        order.cancel(now_millis());
        let work = UnitOfWork::cancel(&order);
        let settled = self
            .settle(matcher, work, move |matcher| {
                matcher.cancel_order(order_id).map(|_| ()).ok_or_else(|| {
                    EngineError::invariant(format!(
                        "order {} vanished from book during cancel",
                        order_id
                    ))
                })
            })
            .await;
        if let Err(e) = settled {
            log::warn!("cancel of order {} discarded: {}", order_id, e);
            return Err(e);
        }

        log::debug!("order {} {} canceled", order.id, order.symbol);
        metrics::record_order_status(order.status.as_str());
        Ok(order)
    }

    /// Persists `work`, then runs `apply` on the admitted book.
    ///
    /// Both steps run on a spawned task that owns the slot guard, so once the
    /// write starts the book update follows it even if the caller goes away.
    async fn settle<T, F>(
        &self,
        matcher: OwnedMutexGuard<Matcher>,
        work: UnitOfWork,
        apply: F,
    ) -> EngineResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Matcher) -> EngineResult<T> + Send + 'static,
    {
        let gateway = self.gateway.clone();
        let task = tokio::spawn(async move {
            let mut matcher = matcher;
            gateway.commit(&work).await?;
            apply(&mut matcher)
        });
        task.await
            .map_err(|e| EngineError::invariant(format!("settlement task failed: {}", e)))?
    }

    /// Highest order id issued so far
    pub fn last_order_id(&self) -> u64 {
        self.order_ids.last()
    }

    pub async fn get_order(&self, order_id: u64) -> EngineResult<Order> {
        self.gateway
            .get_order(order_id)
            .await?
            .ok_or(EngineError::NotFound(order_id))
    }

    /// Top `depth` levels of a symbol's book. Unknown symbols have empty books.
    pub async fn get_order_book(&self, symbol: &str, depth: usize) -> BookDepth {
        match self.serializer.admit_existing(symbol).await {
            Some(matcher) => matcher.orderbook().depth(depth),
            None => OrderBook::new(symbol.to_string()).depth(depth),
        }
    }

    /// Trades newest first, optionally for one symbol
    pub async fn list_trades(&self, symbol: Option<&str>) -> EngineResult<Vec<Trade>> {
        Ok(self.gateway.list_trades(symbol).await?)
    }
}
