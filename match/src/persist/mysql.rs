use super::{OrderChange, PersistError, PersistResult, PersistenceGateway, UnitOfWork, Watermarks};
use crate::engine::entry::{Order, OrderSide, OrderStatus, OrderType, Trade};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::Row;
use std::str::FromStr;

const CREATE_ORDERS: &str = r#"
CREATE TABLE IF NOT EXISTS orders (
    id BIGINT UNSIGNED NOT NULL PRIMARY KEY,
    symbol VARCHAR(64) NOT NULL,
    side VARCHAR(8) NOT NULL,
    order_type VARCHAR(8) NOT NULL,
    price DECIMAL(28, 10) NULL,
    initial_quantity DECIMAL(28, 10) NOT NULL,
    remaining_quantity DECIMAL(28, 10) NOT NULL,
    status VARCHAR(16) NOT NULL,
    sequence BIGINT UNSIGNED NOT NULL,
    created_at BIGINT UNSIGNED NOT NULL,
    updated_at BIGINT UNSIGNED NOT NULL,
    INDEX idx_orders_book (symbol, status, side, sequence)
)
"#;

const CREATE_TRADES: &str = r#"
CREATE TABLE IF NOT EXISTS trades (
    id BIGINT UNSIGNED NOT NULL PRIMARY KEY,
    symbol VARCHAR(64) NOT NULL,
    buy_order_id BIGINT UNSIGNED NOT NULL,
    sell_order_id BIGINT UNSIGNED NOT NULL,
    price DECIMAL(28, 10) NOT NULL,
    quantity DECIMAL(28, 10) NOT NULL,
    created_at BIGINT UNSIGNED NOT NULL,
    INDEX idx_trades_symbol (symbol, id)
)
"#;

/// Fractional digits of every DECIMAL column
const DECIMAL_SCALE: u32 = 10;
/// Integer digits of every DECIMAL column
const DECIMAL_INTEGER_DIGITS: u32 = 18;

const ORDER_COLUMNS: &str = "id, symbol, side, order_type, price, initial_quantity, \
    remaining_quantity, status, sequence, created_at, updated_at";

const TRADE_COLUMNS: &str =
    "id, symbol, buy_order_id, sell_order_id, price, quantity, created_at";

/// Gateway over a MySQL database, one transaction per unit of work
pub struct MySqlGateway {
    pool: MySqlPool,
}

impl MySqlGateway {
    pub async fn connect(database_url: &str, max_connections: u32) -> PersistResult<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let gateway = Self { pool };
        gateway.migrate().await?;
        Ok(gateway)
    }

    async fn migrate(&self) -> PersistResult<()> {
        sqlx::query(CREATE_ORDERS).execute(&self.pool).await?;
        sqlx::query(CREATE_TRADES).execute(&self.pool).await?;
        Ok(())
    }
}

/// Passes `value` through if the column stores it exactly. MySQL would
/// otherwise round extra fractional digits away.
fn exact(value: Decimal, column: &str) -> PersistResult<Decimal> {
    let limit = Decimal::from(10u64.pow(DECIMAL_INTEGER_DIGITS));
    if value.normalize().scale() > DECIMAL_SCALE || value.abs() >= limit {
        return Err(PersistError::Rejected(format!(
            "{} {} does not fit DECIMAL(28, {})",
            column, value, DECIMAL_SCALE
        )));
    }
    Ok(value)
}

fn parse_enum<T: FromStr>(row: &MySqlRow, column: &str) -> PersistResult<T> {
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|_| PersistError::Corrupt(format!("unexpected {} value {:?}", column, raw)))
}

fn order_from_row(row: &MySqlRow) -> PersistResult<Order> {
    Ok(Order {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        side: parse_enum::<OrderSide>(row, "side")?,
        order_type: parse_enum::<OrderType>(row, "order_type")?,
        price: row.try_get::<Option<Decimal>, _>("price")?,
        initial_quantity: row.try_get("initial_quantity")?,
        remaining_quantity: row.try_get("remaining_quantity")?,
        status: parse_enum::<OrderStatus>(row, "status")?,
        sequence: row.try_get("sequence")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn trade_from_row(row: &MySqlRow) -> PersistResult<Trade> {
    Ok(Trade {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        buy_order_id: row.try_get("buy_order_id")?,
        sell_order_id: row.try_get("sell_order_id")?,
        price: row.try_get("price")?,
        quantity: row.try_get("quantity")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl PersistenceGateway for MySqlGateway {
    async fn commit(&self, work: &UnitOfWork) -> PersistResult<()> {
        let mut tx = self.pool.begin().await?;

        for change in &work.orders {
            match change {
                OrderChange::Created(order) => {
                    sqlx::query(&format!(
                        "INSERT INTO orders ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                        ORDER_COLUMNS
                    ))
                    .bind(order.id)
                    .bind(&order.symbol)
                    .bind(order.side.as_str())
                    .bind(order.order_type.as_str())
                    .bind(order.price.map(|p| exact(p, "price")).transpose()?)
                    .bind(exact(order.initial_quantity, "initial_quantity")?)
                    .bind(exact(order.remaining_quantity, "remaining_quantity")?)
                    .bind(order.status.as_str())
                    .bind(order.sequence)
                    .bind(order.created_at)
                    .bind(order.updated_at)
                    .execute(&mut *tx)
                    .await?;
                }
                OrderChange::Updated {
                    id,
                    status,
                    remaining_quantity,
                    updated_at,
                } => {
                    let result = sqlx::query(
                        "UPDATE orders SET status = ?, remaining_quantity = ?, updated_at = ? \
                         WHERE id = ?",
                    )
                    .bind(status.as_str())
                    .bind(exact(*remaining_quantity, "remaining_quantity")?)
                    .bind(*updated_at)
                    .bind(*id)
                    .execute(&mut *tx)
                    .await?;
                    if result.rows_affected() != 1 {
                        // dropping tx rolls back
                        return Err(PersistError::Rejected(format!("order {} does not exist", id)));
                    }
                }
            }
        }

        for trade in &work.trades {
            sqlx::query(&format!(
                "INSERT INTO trades ({}) VALUES (?, ?, ?, ?, ?, ?, ?)",
                TRADE_COLUMNS
            ))
            .bind(trade.id)
            .bind(&trade.symbol)
            .bind(trade.buy_order_id)
            .bind(trade.sell_order_id)
            .bind(exact(trade.price, "price")?)
            .bind(exact(trade.quantity, "quantity")?)
            .bind(trade.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_order(&self, id: u64) -> PersistResult<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {} FROM orders WHERE id = ?", ORDER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn list_trades(&self, symbol: Option<&str>) -> PersistResult<Vec<Trade>> {
        let rows = match symbol {
            Some(symbol) => {
                sqlx::query(&format!(
                    "SELECT {} FROM trades WHERE symbol = ? ORDER BY id DESC",
                    TRADE_COLUMNS
                ))
                .bind(symbol)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!("SELECT {} FROM trades ORDER BY id DESC", TRADE_COLUMNS))
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(trade_from_row).collect()
    }

    async fn open_orders(&self, symbol: &str, side: OrderSide) -> PersistResult<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM orders WHERE symbol = ? AND side = ? AND status = ? ORDER BY sequence",
            ORDER_COLUMNS
        ))
        .bind(symbol)
        .bind(side.as_str())
        .bind(OrderStatus::Open.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(order_from_row).collect()
    }

    async fn open_symbols(&self) -> PersistResult<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT symbol FROM orders WHERE status = ? ORDER BY symbol")
            .bind(OrderStatus::Open.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("symbol").map_err(PersistError::from))
            .collect()
    }

    async fn watermarks(&self) -> PersistResult<Watermarks> {
        let row = sqlx::query(
            "SELECT CAST(COALESCE(MAX(id), 0) AS UNSIGNED) AS last_id, \
             CAST(COALESCE(MAX(sequence), 0) AS UNSIGNED) AS last_sequence FROM orders",
        )
        .fetch_one(&self.pool)
        .await?;
        let trade_row =
            sqlx::query("SELECT CAST(COALESCE(MAX(id), 0) AS UNSIGNED) AS last_id FROM trades")
                .fetch_one(&self.pool)
                .await?;
        Ok(Watermarks {
            last_order_id: row.try_get("last_id")?,
            last_order_sequence: row.try_get("last_sequence")?,
            last_trade_id: trade_row.try_get("last_id")?,
        })
    }

    fn name(&self) -> &'static str {
        "mysql"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::entry::OrderRequest;
    use rust_decimal_macros::dec;

    #[test]
    fn test_exact_rejects_values_the_column_would_round() {
        assert_eq!(exact(dec!(0.0000000001), "price").unwrap(), dec!(0.0000000001));
        assert_eq!(exact(dec!(1.50000000000000), "price").unwrap(), dec!(1.5));
        assert!(exact(dec!(999999999999999999.9999999999), "price").is_ok());
        assert!(matches!(
            exact(dec!(0.00000000001), "price"),
            Err(PersistError::Rejected(_))
        ));
        assert!(exact(dec!(1000000000000000000), "quantity").is_err());
    }

    fn created(id: u64, price: Decimal, quantity: Decimal) -> Order {
        Order::admit(
            id,
            id,
            &OrderRequest::limit("BTC", OrderSide::Sell, price, quantity),
        )
    }

    /// Needs a scratch MySQL database in `DATABASE_URL`; wipes its
    /// `orders` and `trades` tables.
    #[tokio::test]
    #[ignore]
    async fn test_mysql_gateway() {
        let url = match std::env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) => return,
        };
        let gateway = MySqlGateway::connect(&url, 2).await.unwrap();
        sqlx::query("DELETE FROM trades").execute(&gateway.pool).await.unwrap();
        sqlx::query("DELETE FROM orders").execute(&gateway.pool).await.unwrap();
        assert_eq!(gateway.watermarks().await.unwrap(), Watermarks::default());

        let ask = created(1, dec!(123456789012345678.5), dec!(0.0000000001));
        let mut bid = created(2, dec!(99.25), dec!(3));
        bid.side = OrderSide::Buy;
        let trade = Trade::new(7, "BTC".to_string(), dec!(99.25), dec!(1), 2, 1);
        let work = UnitOfWork {
            orders: vec![OrderChange::Created(ask.clone()), OrderChange::Created(bid.clone())],
            trades: vec![trade.clone()],
        };
        gateway.commit(&work).await.unwrap();

        assert_eq!(gateway.get_order(1).await.unwrap(), Some(ask));
        assert_eq!(gateway.list_trades(Some("BTC")).await.unwrap(), vec![trade]);
        assert_eq!(gateway.open_symbols().await.unwrap(), vec!["BTC".to_string()]);
        let bids = gateway.open_orders("BTC", OrderSide::Buy).await.unwrap();
        assert_eq!(bids, vec![bid]);
        let marks = gateway.watermarks().await.unwrap();
        assert_eq!(marks.last_order_id, 2);
        assert_eq!(marks.last_order_sequence, 2);
        assert_eq!(marks.last_trade_id, 7);

        // the unknown update must take the insert before it down too
        let bad = UnitOfWork {
            orders: vec![
                OrderChange::Created(created(3, dec!(10), dec!(1))),
                OrderChange::Updated {
                    id: 42,
                    status: OrderStatus::Filled,
                    remaining_quantity: dec!(0),
                    updated_at: 9,
                },
            ],
            trades: vec![],
        };
        assert!(matches!(gateway.commit(&bad).await, Err(PersistError::Rejected(_))));
        assert!(gateway.get_order(3).await.unwrap().is_none());
        assert_eq!(gateway.watermarks().await.unwrap().last_order_id, 2);
    }
}
