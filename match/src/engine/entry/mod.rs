pub mod order;
pub mod sequence;
pub mod trade;

pub use order::{Order, OrderRequest, OrderSide, OrderStatus, OrderType};
pub use sequence::Sequence;
pub use trade::Trade;
