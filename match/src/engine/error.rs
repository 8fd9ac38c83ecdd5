//! Error taxonomy for the matching engine

use crate::engine::entry::OrderStatus;
use crate::persist::PersistError;
use rust_decimal::Decimal;
use thiserror::Error;

/// Malformed submission, rejected before any state is touched
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("symbol must not be empty")]
    EmptySymbol,
    #[error("quantity must be greater than 0, got {0}")]
    NonPositiveQuantity(Decimal),
    #[error("price is required for limit orders")]
    MissingPrice,
    #[error("price must be greater than 0 for limit orders, got {0}")]
    NonPositivePrice(Decimal),
    #[error("{0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("order {0} not found")]
    NotFound(u64),

    #[error("order {id} is {status} and cannot be canceled")]
    Conflict { id: u64, status: OrderStatus },

    /// The durable write failed; nothing was applied and the caller must resubmit
    #[error("persistence failure: {0}")]
    Persistence(#[from] PersistError),

    /// A logic defect. Never a recoverable runtime condition.
    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

impl EngineError {
    pub fn invariant(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        log::error!("invariant violation: {}", msg);
        debug_assert!(false, "invariant violation: {}", msg);
        EngineError::Invariant(msg)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
