//! Metrics collection module for the order match service
//!
//! This module provides functionality for collecting and exposing service metrics
//! using Prometheus.

use lazy_static::lazy_static;
use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};
use std::time::Instant;

lazy_static! {
    /// Global Prometheus registry instance
    pub static ref REGISTRY_INSTANCE: Registry = Registry::new();

    /// Counter for tracking request counts by method
    pub static ref REQ_COUNTER_VEC: CounterVec =
        CounterVec::new(Opts::new("request_counter", "request counter"), &["method"]).unwrap();

    /// Histogram for tracking method execution times
    pub static ref METHOD_HISTOGRAM_VEC: HistogramVec = HistogramVec::new(
        HistogramOpts::new("method_cost", "method cost"),
        &["method"]
    )
    .unwrap();

    /// Trades executed, by symbol
    pub static ref TRADE_COUNTER_VEC: CounterVec =
        CounterVec::new(Opts::new("trade_counter", "trades executed"), &["symbol"]).unwrap();

    /// Final status of accepted orders and cancellations
    pub static ref ORDER_COUNTER_VEC: CounterVec =
        CounterVec::new(Opts::new("order_counter", "order outcomes"), &["status"]).unwrap();
}

/// Initializes the metrics registry
///
/// Registers all metric collectors with the global registry
pub fn init_registry() {
    let _ = REGISTRY_INSTANCE.register(Box::new(REQ_COUNTER_VEC.clone()));
    let _ = REGISTRY_INSTANCE.register(Box::new(METHOD_HISTOGRAM_VEC.clone()));
    let _ = REGISTRY_INSTANCE.register(Box::new(TRADE_COUNTER_VEC.clone()));
    let _ = REGISTRY_INSTANCE.register(Box::new(ORDER_COUNTER_VEC.clone()));
}

pub fn record_trades(symbol: &str, count: usize) {
    if count > 0 {
        TRADE_COUNTER_VEC
            .with_label_values(&[symbol])
            .inc_by(count as f64);
    }
}

pub fn record_order_status(status: &str) {
    ORDER_COUNTER_VEC.with_label_values(&[status]).inc();
}

/// Records metrics for an async operation
///
/// Counts the call under `method_name` and observes how long `handler` took.
pub async fn record_metrics<F, Fut, T>(method_name: &'static str, handler: F) -> T
where
    F: FnOnce() -> Fut + Send,
    Fut: std::future::Future<Output = T> + Send,
{
    let start = Instant::now();
    REQ_COUNTER_VEC.with_label_values(&[method_name]).inc();
    let result = handler().await;

    let elapsed = start.elapsed();
    METHOD_HISTOGRAM_VEC
        .with_label_values(&[method_name])
        .observe(elapsed.as_secs_f64());

    result
}
