use crate::config::RuntimeConfig;
use crate::engine::spot::OrderProcessor;
use crate::match_service;
use crate::metrics;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, StatusCode};
use prometheus::{Encoder, TextEncoder};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct Server {
    processor: Arc<OrderProcessor>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Server {
    pub fn new(processor: Arc<OrderProcessor>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Server {
            processor,
            shutdown,
            tasks: Vec::new(),
        }
    }

    pub fn start(&mut self, config: &RuntimeConfig) -> anyhow::Result<()> {
        let api_addr: SocketAddr = config.addr.parse()?;
        let metrics_addr: SocketAddr = config.metrics_addr.parse()?;
        self.start_api_server(api_addr, config.max_body_bytes)?;
        self.start_metrics_server(metrics_addr)?;
        Ok(())
    }

    /// Stops accepting connections and waits for in-flight requests
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        log::info!(
            "server stop, last order id {}",
            self.processor.last_order_id()
        );
    }

    fn shutdown_signal(&self) -> impl std::future::Future<Output = ()> {
        let mut rx = self.shutdown.subscribe();
        async move {
            while !*rx.borrow() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
    }

    fn start_api_server(&mut self, addr: SocketAddr, max_body_bytes: usize) -> anyhow::Result<()> {
        let app = match_service::router(self.processor.clone(), max_body_bytes);
        let server = axum::Server::try_bind(&addr)?
            .serve(app.into_make_service())
            .with_graceful_shutdown(self.shutdown_signal());
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = server.await {
                log::error!("api server error: {}", e);
            }
        }));
        log::info!("api server started on {}", addr);
        Ok(())
    }

    fn start_metrics_server(&mut self, addr: SocketAddr) -> anyhow::Result<()> {
        let make_svc = make_service_fn(move |_| {
            let registry = metrics::REGISTRY_INSTANCE.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |_: Request<Body>| {
                    let registry = registry.clone();
                    async move {
                        let encoder = TextEncoder::new();
                        let metric_families = registry.gather();
                        let mut buffer = Vec::new();
                        let response = match encoder.encode(&metric_families, &mut buffer) {
                            Ok(()) => Response::new(Body::from(buffer)),
                            Err(e) => {
                                log::error!("failed to encode metrics: {}", e);
                                let mut response = Response::new(Body::empty());
                                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                                response
                            }
                        };
                        Ok::<_, Infallible>(response)
                    }
                }))
            }
        });
        metrics::init_registry();
        let server = hyper::Server::try_bind(&addr)?
            .serve(make_svc)
            .with_graceful_shutdown(self.shutdown_signal());
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = server.await {
                log::error!("metrics server error: {}", e);
            }
        }));
        log::info!("metrics server started on {}", addr);
        Ok(())
    }
}
