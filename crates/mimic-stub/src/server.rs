//! HTTP/1 accept loop with graceful shutdown.

use crate::engine::StubEngine;
use crate::http::{HttpRequest, HttpResponse};
use crate::pipeline::handle_request;
use anyhow::Context;
use futures::FutureExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use serde_json::json;
use std::any::Any;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

pub struct StubServer {
    listener: TcpListener,
    engine: Arc<StubEngine>,
    shutdown_tx: broadcast::Sender<()>,
}

impl StubServer {
    pub async fn bind(addr: SocketAddr, engine: Arc<StubEngine>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            listener,
            engine,
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Sending on the handle stops the accept loop and starts the drain.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Serve until shutdown is signalled.
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.local_addr()?;
        info!("Mimic listening on http://{}", addr);

        let graceful = GracefulShutdown::new();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let engine = Arc::clone(&self.engine);
                            let service = service_fn(move |req| {
                                let engine = Arc::clone(&engine);
                                async move { Ok::<_, Infallible>(serve(req, engine).await.into_hyper()) }
                            });
                            let connection = http1::Builder::new()
                                .serve_connection(TokioIo::new(stream), service);
                            let connection = graceful.watch(connection);
                            tokio::spawn(async move {
                                if let Err(e) = connection.await {
                                    debug!("Connection error from {}: {}", peer, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error on {}: {}", addr, e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Mimic on {} shutting down", addr);
                    break;
                }
            }
        }

        drop(self.listener);
        // Open event streams only end once the buffer is closed
        self.engine.events().close();

        let grace = Duration::from_millis(self.engine.config().shutdown_grace_ms);
        tokio::select! {
            _ = graceful.shutdown() => {
                info!("All connections closed");
            }
            _ = tokio::time::sleep(grace) => {
                warn!(grace_ms = grace.as_millis() as u64, "Grace period elapsed, dropping open connections");
            }
        }
        Ok(())
    }
}

/// Decode the request and run the pipeline, turning panics into a 500.
async fn serve(req: Request<Incoming>, engine: Arc<StubEngine>) -> HttpResponse {
    let request = match HttpRequest::from_hyper(req).await {
        Ok(request) => request,
        Err(e) => {
            warn!(method = %e.method, path = %e.path, "{}", e);
            return HttpResponse::error(400, &format!("could not parse: {}", e.reason));
        }
    };

    let request_line = format!("{} {}", request.method, request.path);
    match AssertUnwindSafe(handle_request(request, engine))
        .catch_unwind()
        .await
    {
        Ok(response) => response,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(request = %request_line, "Request handler panicked: {}", message);
            HttpResponse::json(
                500,
                &json!({
                    "errors": [{"code": "500", "message": message}],
                    "trace": [request_line],
                }),
            )
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
