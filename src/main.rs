//! `relay-http` demo server.
//!
//! Serves `/health` and echoes request bodies on every other path, behind the
//! request logging middleware.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::{Method, StatusCode};
use clap::Parser;

use relay_http::config::{load_config, ServerConfig};
use relay_http::http::middleware::{construct_responder, middleware_fn, responder_fn, LogRequests};
use relay_http::http::{Middleware, Request, RequestBody, Responder, Response, ResponseBody};
use relay_http::lifecycle::{shutdown_signal, Shutdown};
use relay_http::net::Listener;
use relay_http::observability::{logging, metrics};
use relay_http::HttpServer;

#[derive(Debug, Parser)]
#[command(name = "relay-http", version, about = "Streaming HTTP server")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability);
    tracing::info!("relay-http v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        max_upload_size = config.limits.max_upload_size,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let listener = Listener::bind(&config.listener).await?;
    let server = HttpServer::new(config, demo_responder());

    let shutdown = Shutdown::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.trigger();
        });
    }

    server.run(listener, shutdown).await?;
    tracing::info!("Shutdown complete");
    Ok(())
}

fn demo_responder() -> Arc<dyn Responder> {
    let health: Arc<dyn Middleware> = middleware_fn(|request: Request, next| async move {
        if *request.method() == Method::GET && request.path() == "/health" {
            return Ok(Response::text(StatusCode::OK, "ok"));
        }
        next.run(request).await
    });

    let echo = responder_fn(|mut request: Request| async move {
        let mut response = Response::new(StatusCode::OK);
        if let Some(content_type) = request.headers().get(axum::http::header::CONTENT_TYPE) {
            response
                .headers_mut()
                .insert(axum::http::header::CONTENT_TYPE, content_type.clone());
        }
        response.body = match request.take_body() {
            RequestBody::Stream(body) => ResponseBody::Stream(body),
            other => ResponseBody::Buffer(other.collect(usize::MAX).await?),
        };
        Ok(response)
    });

    construct_responder(echo, vec![Arc::new(LogRequests), health])
}
