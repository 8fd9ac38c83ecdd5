//! Persistence gateway
//!
//! Durable record of orders and trades. The matching engine hands each
//! operation's outcome over as one [`UnitOfWork`], which a gateway must apply
//! atomically or not at all, and reads the open orders back on startup to
//! rebuild its books.

pub mod journal;
pub mod memory;
pub mod mysql;
mod segment;

use crate::config::{StorageBackend, StorageConfig};
use crate::engine::entry::{Order, OrderSide, OrderStatus, Trade};
use crate::engine::matchlogic::MatchPlan;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub use journal::JournalGateway;
pub use memory::MemoryGateway;
pub use mysql::MySqlGateway;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding failure: {0}")]
    Codec(#[from] bincode::Error),

    #[error("database failure: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("unit of work rejected: {0}")]
    Rejected(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type PersistResult<T> = Result<T, PersistError>;

/// One write applied to the orders table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderChange {
    Created(Order),
    Updated {
        id: u64,
        status: OrderStatus,
        remaining_quantity: Decimal,
        updated_at: u64,
    },
}

/// Writes that commit together or not at all
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOfWork {
    pub orders: Vec<OrderChange>,
    pub trades: Vec<Trade>,
}

impl UnitOfWork {
    /// The incoming order in its final state, every touched resting order and
    /// every trade of the pass
    pub fn from_plan(plan: &MatchPlan) -> Self {
        let mut orders = Vec::with_capacity(plan.makers.len() + 1);
        orders.push(OrderChange::Created(plan.order.clone()));
        orders.extend(plan.makers.iter().map(OrderChange::updated));
        Self {
            orders,
            trades: plan.trades.clone(),
        }
    }

    pub fn cancel(order: &Order) -> Self {
        Self {
            orders: vec![OrderChange::updated(order)],
            trades: Vec::new(),
        }
    }
}

impl OrderChange {
    pub fn updated(order: &Order) -> Self {
        OrderChange::Updated {
            id: order.id,
            status: order.status,
            remaining_quantity: order.remaining_quantity,
            updated_at: order.updated_at,
        }
    }
}

/// Highest ids handed out so far, used to resume the id sequences
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Watermarks {
    pub last_order_id: u64,
    pub last_order_sequence: u64,
    pub last_trade_id: u64,
}

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Applies every change in `work` in one transaction
    async fn commit(&self, work: &UnitOfWork) -> PersistResult<()>;

    async fn get_order(&self, id: u64) -> PersistResult<Option<Order>>;

    /// Trades newest first, optionally restricted to one symbol
    async fn list_trades(&self, symbol: Option<&str>) -> PersistResult<Vec<Trade>>;

    /// Open orders of one book side, in arrival order
    async fn open_orders(&self, symbol: &str, side: OrderSide) -> PersistResult<Vec<Order>>;

    /// Symbols with at least one open order
    async fn open_symbols(&self) -> PersistResult<Vec<String>>;

    async fn watermarks(&self) -> PersistResult<Watermarks>;

    fn name(&self) -> &'static str;
}

/// Opens the gateway selected by the storage configuration
pub async fn open(config: &StorageConfig) -> PersistResult<Arc<dyn PersistenceGateway>> {
    let gateway: Arc<dyn PersistenceGateway> = match config.backend {
        StorageBackend::Memory => Arc::new(MemoryGateway::new()),
        StorageBackend::Journal => Arc::new(JournalGateway::open(&config.journal_path)?),
        StorageBackend::Mysql => {
            let url = config.database_url.as_deref().ok_or_else(|| {
                PersistError::Unavailable("storage.database_url is required for mysql".to_string())
            })?;
            Arc::new(MySqlGateway::connect(url, config.max_connections).await?)
        }
    };
    log::info!("persistence backend: {}", gateway.name());
    Ok(gateway)
}
