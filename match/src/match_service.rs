//! Match service implementation
//!
//! This module implements the JSON over HTTP surface of the order processor.
//!
//! | Route                          | Operation      |
//! |--------------------------------|----------------|
//! | `POST /orders`                 | place order    |
//! | `DELETE /orders/{id}`          | cancel order   |
//! | `GET /orders/{id}`             | query order    |
//! | `GET /orderbook?symbol=&depth=`| order book     |
//! | `GET /trades?symbol=`          | list trades    |

use crate::config;
use crate::engine::entry::{Order, OrderRequest, Trade};
use crate::engine::error::{EngineError, ValidationError};
use crate::engine::spot::OrderProcessor;
use crate::metrics;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// A decimal given either as a JSON string or a JSON number
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DecimalInput {
    Text(String),
    Number(serde_json::Number),
}

impl DecimalInput {
    fn parse(&self, field: &str) -> Result<Decimal, ValidationError> {
        let raw = match self {
            DecimalInput::Text(s) => s.trim().to_string(),
            DecimalInput::Number(n) => n.to_string(),
        };
        Decimal::from_str(&raw)
            .or_else(|_| Decimal::from_scientific(&raw))
            .map_err(|_| ValidationError::Malformed(format!("{} is not a decimal: {:?}", field, raw)))
    }
}

#[derive(Debug, Deserialize)]
struct PlaceOrderBody {
    symbol: String,
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    price: Option<DecimalInput>,
    quantity: DecimalInput,
}

impl PlaceOrderBody {
    fn into_request(self) -> Result<OrderRequest, ValidationError> {
        let price = match &self.price {
            Some(price) => Some(price.parse("price")?),
            None => None,
        };
        Ok(OrderRequest {
            side: self.side.parse()?,
            order_type: self.order_type.parse()?,
            price,
            quantity: self.quantity.parse("quantity")?,
            symbol: self.symbol,
        })
    }
}

#[derive(Debug, Deserialize)]
struct BookQuery {
    symbol: Option<String>,
    depth: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct TradesQuery {
    symbol: Option<String>,
}

#[derive(Debug, Serialize)]
struct PlaceOrderResponse {
    #[serde(flatten)]
    order: Order,
    trades: Vec<Trade>,
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Failure of one request, already mapped to a status code
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status = match &e {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Conflict { .. } => StatusCode::CONFLICT,
            EngineError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Invariant(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        EngineError::from(e).into()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let status = match rejection.status() {
            StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            message: format!("invalid order body: {}", rejection.body_text()),
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::bad_request(format!("invalid order id: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(format!("invalid query: {}", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            log::error!("request failed: {}", self.message);
        } else {
            log::warn!("request rejected: {}", self.message);
        }
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

type Processor = State<Arc<OrderProcessor>>;

/// Routes of the match service over `processor`. Request bodies larger than
/// `max_body_bytes` are refused with 413.
pub fn router(processor: Arc<OrderProcessor>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/orders", post(place_order))
        .route("/orders/:id", get(query_order).delete(cancel_order))
        .route("/orderbook", get(order_book))
        .route("/trades", get(list_trades))
        .fallback(no_route)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(processor)
}

async fn no_route(method: Method, uri: Uri) -> ApiError {
    ApiError::not_found(format!("no route for {} {}", method, uri.path()))
}

async fn place_order(
    State(processor): Processor,
    body: Result<Json<PlaceOrderBody>, JsonRejection>,
) -> ApiResult {
    metrics::record_metrics("place_order", move || async move {
        let Json(body) = body?;
        let request = body.into_request()?;
        log::info!(
            "place order {} {} {} {:?} {}",
            request.symbol,
            request.side,
            request.order_type,
            request.price,
            request.quantity
        );

        let execution = processor.submit_order(request).await?;
        let response = PlaceOrderResponse {
            order: execution.order,
            trades: execution.trades,
        };
        Ok::<_, ApiError>((StatusCode::CREATED, Json(response)).into_response())
    })
    .await
}

async fn cancel_order(
    State(processor): Processor,
    id: Result<Path<u64>, PathRejection>,
) -> ApiResult {
    metrics::record_metrics("cancel_order", move || async move {
        let Path(id) = id?;
        log::info!("cancel order {}", id);
        processor.cancel_order(id).await?;
        let message = MessageResponse {
            message: format!("order {} canceled", id),
        };
        Ok::<_, ApiError>(Json(message).into_response())
    })
    .await
}

async fn query_order(
    State(processor): Processor,
    id: Result<Path<u64>, PathRejection>,
) -> ApiResult {
    metrics::record_metrics("query_order", move || async move {
        let Path(id) = id?;
        let order = processor.get_order(id).await?;
        Ok::<_, ApiError>(Json(order).into_response())
    })
    .await
}

async fn order_book(
    State(processor): Processor,
    query: Result<Query<BookQuery>, QueryRejection>,
) -> ApiResult {
    metrics::record_metrics("order_book", move || async move {
        let Query(query) = query?;
        let symbol = query
            .symbol
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ApiError::bad_request("symbol is required"))?;
        let depth = config::instance().clamp_depth(query.depth);
        let snapshot = processor.get_order_book(symbol, depth).await;
        Ok::<_, ApiError>(Json(snapshot).into_response())
    })
    .await
}

async fn list_trades(
    State(processor): Processor,
    query: Result<Query<TradesQuery>, QueryRejection>,
) -> ApiResult {
    metrics::record_metrics("list_trades", move || async move {
        let Query(query) = query?;
        let symbol = query.symbol.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let trades = processor.list_trades(symbol).await?;
        Ok::<_, ApiError>(Json(trades).into_response())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryGateway;
    use axum::http::{header, Request};
    use hyper::Body;
    use serde_json::{json as j, Value};
    use tower::ServiceExt;

    fn app_with_limit(max_body_bytes: usize) -> Router {
        let processor = Arc::new(OrderProcessor::new(Arc::new(MemoryGateway::new())));
        router(processor, max_body_bytes)
    }

    fn app() -> Router {
        app_with_limit(64 * 1024)
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<String>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(body) => {
                req = req.header(header::CONTENT_TYPE, "application/json");
                Body::from(body)
            }
            None => Body::empty(),
        };
        let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        send(app, method, uri, body.map(|b| b.to_string())).await
    }

    #[tokio::test]
    async fn test_place_and_query_order() {
        let app = app();
        let (status, order) = call(
            &app,
            Method::POST,
            "/orders",
            Some(j!({"symbol": "BTC", "side": "buy", "type": "limit", "price": 100, "quantity": "10"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(order["status"], "open");
        assert_eq!(order["type"], "limit");
        assert_eq!(order["remaining_quantity"], "10");
        assert_eq!(order["trades"], j!([]));

        let (status, fetched) = call(&app, Method::GET, "/orders/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["id"], 1);
        assert_eq!(fetched["price"], "100");

        let (status, book) = call(&app, Method::GET, "/orderbook?symbol=BTC&depth=5", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(book["bids"], j!([{"price": "100", "quantity": "10", "order_count": 1}]));
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let app = app();
        let (status, body) = call(
            &app,
            Method::POST,
            "/orders",
            Some(j!({"symbol": "BTC", "side": "buy", "type": "limit", "quantity": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("price"));

        let (status, _) = call(
            &app,
            Method::POST,
            "/orders",
            Some(j!({"symbol": "BTC", "side": "hold", "type": "limit", "price": 1, "quantity": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, Method::POST, "/orders", Some("{not json".to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("invalid order body"));

        let (status, _) = call(&app, Method::GET, "/orders/77", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, body) = call(&app, Method::DELETE, "/orders/abc", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("invalid order id"));
        let (status, _) = call(&app, Method::GET, "/orderbook", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = call(&app, Method::GET, "/orderbook?symbol=BTC&depth=deep", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, body) = call(&app, Method::GET, "/positions", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "no route for GET /positions");
        let (status, _) = call(&app, Method::PUT, "/orders", None).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_cancel_and_trades() {
        let app = app();
        let place = |side: &str, qty: u32| {
            j!({"symbol": "ETH", "side": side, "type": "limit", "price": "2000.5", "quantity": qty})
        };
        call(&app, Method::POST, "/orders", Some(place("sell", 3))).await;
        let (_, taker) = call(&app, Method::POST, "/orders", Some(place("buy", 1))).await;
        assert_eq!(taker["status"], "filled");
        assert_eq!(taker["trades"][0]["price"], "2000.5");

        let (status, body) = call(&app, Method::DELETE, "/orders/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "order 1 canceled");
        let (status, _) = call(&app, Method::DELETE, "/orders/1", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, _) = call(&app, Method::DELETE, "/orders/2", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, trades) = call(&app, Method::GET, "/trades?symbol=ETH", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(trades.as_array().unwrap().len(), 1);
        let (_, none) = call(&app, Method::GET, "/trades?symbol=BTC", None).await;
        assert_eq!(none, j!([]));
    }

    #[tokio::test]
    async fn test_query_symbols_are_percent_decoded() {
        let app = app();
        call(
            &app,
            Method::POST,
            "/orders",
            Some(j!({"symbol": "BTC/USD", "side": "sell", "type": "limit", "price": 1, "quantity": 1})),
        )
        .await;
        let (_, book) = call(&app, Method::GET, "/orderbook?symbol=BTC%2FUSD", None).await;
        assert_eq!(book["symbol"], "BTC/USD");
        assert_eq!(book["asks"][0]["order_count"], 1);

        // a malformed escape stays literal instead of turning into a control byte
        let (status, book) = call(&app, Method::GET, "/orderbook?symbol=%+F", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(book["symbol"], "% F");
    }

    #[tokio::test]
    async fn test_oversized_body_is_refused() {
        let app = app_with_limit(64);
        let order = j!({
            "symbol": "X".repeat(200),
            "side": "buy",
            "type": "limit",
            "price": 1,
            "quantity": 1,
        });
        let (status, body) = call(&app, Method::POST, "/orders", Some(order)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(body["error"].as_str().is_some());

        let (status, _) = call(&app, Method::GET, "/orders/1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
