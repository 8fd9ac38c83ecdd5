use anyhow::Context;
use clap::Parser;
use hdrhistogram::Histogram;
use hyper::{Body, Client, Method, Request, StatusCode};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of concurrent clients
    #[arg(short, long, default_value = "1")]
    concurrency: usize,

    /// INTERVAL ms
    #[arg(short, long, default_value = "100")]
    interval: u64,

    /// Duration of the benchmark in seconds
    #[arg(short, long, default_value = "30")]
    duration: u64,

    /// Server address
    #[arg(short, long, default_value = "http://127.0.0.1:4000")]
    server: String,

    /// Symbol to trade
    #[arg(long, default_value = "BTCUSDT")]
    symbol: String,

    /// Share of market orders, 0.0 to 1.0
    #[arg(long, default_value = "0.1")]
    market_ratio: f64,
}

/// Random order around a mid price so both sides keep crossing
fn random_order(symbol: &str, market_ratio: f64) -> serde_json::Value {
    let mut rng = rand::thread_rng();
    let side = if rng.gen_bool(0.5) { "buy" } else { "sell" };
    let quantity = format!("0.{:03}", rng.gen_range(1..1000));
    if rng.gen_bool(market_ratio.clamp(0.0, 1.0)) {
        serde_json::json!({
            "symbol": symbol,
            "side": side,
            "type": "market",
            "quantity": quantity,
        })
    } else {
        let price = format!("{}.{}", rng.gen_range(49_900..50_100), rng.gen_range(0..10));
        serde_json::json!({
            "symbol": symbol,
            "side": side,
            "type": "limit",
            "price": price,
            "quantity": quantity,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let url = format!("{}/orders", args.server.trim_end_matches('/'));
    let histogram = Arc::new(Mutex::new(
        Histogram::<u64>::new(3).context("failed to create histogram")?,
    ));
    let total_requests = Arc::new(Mutex::new(0u64));
    let failed_requests = Arc::new(Mutex::new(0u64));

    println!(
        "Starting benchmark with {} concurrent clients, target INTERVAL: {}",
        args.concurrency, args.interval
    );

    // Spawn client tasks
    let mut handles = vec![];
    for _ in 0..args.concurrency {
        let url = url.clone();
        let symbol = args.symbol.clone();
        let market_ratio = args.market_ratio;
        let interval = args.interval;
        let histogram = histogram.clone();
        let total_requests = total_requests.clone();
        let failed_requests = failed_requests.clone();

        let handle = tokio::spawn(async move {
            let client = Client::new();

            loop {
                let body = random_order(&symbol, market_ratio).to_string();
                let request = match Request::builder()
                    .method(Method::POST)
                    .uri(url.as_str())
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                {
                    Ok(request) => request,
                    Err(e) => {
                        eprintln!("Invalid request: {}", e);
                        return;
                    }
                };

                let start = Instant::now();
                let outcome = match client.request(request).await {
                    // drain the body so the pooled connection is reused
                    Ok(response) => {
                        let status = response.status();
                        hyper::body::to_bytes(response.into_body())
                            .await
                            .map(|_| status)
                    }
                    Err(e) => Err(e),
                };
                match outcome {
                    Ok(status) if status == StatusCode::CREATED => {
                        let duration = start.elapsed();
                        let mut hist = histogram.lock().await;
                        let _ = hist.record(duration.as_micros() as u64);
                        let mut total = total_requests.lock().await;
                        *total += 1;
                    }
                    Ok(status) => {
                        eprintln!("Request rejected: {}", status);
                        *failed_requests.lock().await += 1;
                    }
                    Err(e) => {
                        eprintln!("Request failed: {}", e);
                        *failed_requests.lock().await += 1;
                    }
                }

                tokio::time::sleep(Duration::from_millis(interval)).await;
            }
        });

        handles.push(handle);
    }

    // Run for specified duration
    sleep(Duration::from_secs(args.duration)).await;

    // Cancel all tasks
    for handle in handles {
        handle.abort();
    }

    // Print statistics
    let total = *total_requests.lock().await;
    let failed = *failed_requests.lock().await;
    let hist = histogram.lock().await;

    println!("\nBenchmark Results:");
    println!("Total Requests: {}", total);
    println!("Failed Requests: {}", failed);
    println!("Average TPS: {:.2}", total as f64 / args.duration as f64);
    println!("\nLatency Distribution (microseconds):");
    println!("p50: {}", hist.value_at_percentile(50.0));
    println!("p90: {}", hist.value_at_percentile(90.0));
    println!("p95: {}", hist.value_at_percentile(95.0));
    println!("p99: {}", hist.value_at_percentile(99.0));
    println!("p99.9: {}", hist.value_at_percentile(99.9));

    Ok(())
}
