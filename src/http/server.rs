//! HTTP server setup and connection serving.
//!
//! # Responsibilities
//! - Accept connections from the bounded listener
//! - Serve HTTP/1.1 and HTTP/2 on each connection through hyper
//! - Close idle and aged connections gracefully
//! - Bridge hyper bodies into `StreamedBody` so responders see backpressure
//! - Run the responder chain and render uncaught errors
//! - Drain in-flight connections on shutdown
//!
//! # Design Decisions
//! - One spawned task per connection owns its idle, max-age and close timers
//! - A connection is idle while no request handler is running on it
//! - One feeder task per request body; it stops when the reader goes away
//! - The drain timeout bounds shutdown even if a peer never finishes

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use futures_util::StreamExt;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::body::{BodyError, BodyLimits, BodyWriter, StreamedBody};
use crate::config::{Http2Config, ServerConfig};
use crate::h2::{ManagerConfig, Timer};
use crate::http::middleware::{self, Responder};
use crate::http::request::{Request, RequestBody, RequestHead};
use crate::lifecycle::Shutdown;
use crate::net::{ConnectionId, ConnectionTracker, Listener, ListenerError};

/// Error type for the serve loop.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// State shared by every request on every connection.
struct ServerState {
    responder: Arc<dyn Responder>,
    limits: BodyLimits,
    timeouts: ManagerConfig,
}

/// HTTP server driving a responder chain.
pub struct HttpServer {
    config: ServerConfig,
    responder: Arc<dyn Responder>,
    tracker: ConnectionTracker,
}

impl HttpServer {
    pub fn new(config: ServerConfig, responder: Arc<dyn Responder>) -> Self {
        Self {
            config,
            responder,
            tracker: ConnectionTracker::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handle on the active connection count.
    pub fn connections(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Accept and serve connections until `shutdown` is triggered, then wait
    /// up to the configured drain timeout for open connections.
    pub async fn run(self, listener: Listener, shutdown: Shutdown) -> Result<(), ServeError> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let state = Arc::new(ServerState {
            responder: Arc::clone(&self.responder),
            limits: self.config.limits.body_limits(),
            timeouts: self.config.http2.manager_config(),
        });
        let builder = connection_builder(&self.config.http2);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer_addr, permit) = match accepted {
                        Ok(accepted) => accepted,
                        Err(ListenerError::Accept(e)) => {
                            tracing::warn!(error = %e, "Accept failed");
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    };

                    let guard = self.tracker.track();
                    let builder = builder.clone();
                    let state = Arc::clone(&state);
                    let shutdown = shutdown.subscribe();

                    tokio::spawn(async move {
                        let _permit = permit;
                        serve_connection(builder, stream, peer_addr, state, guard.id(), shutdown).await;
                        drop(guard);
                    });
                }
                () = shutdown.triggered() => {
                    tracing::info!("Shutdown triggered, no longer accepting connections");
                    break;
                }
            }
        }

        drop(listener);

        let drain_timeout = Duration::from_secs(self.config.shutdown.drain_timeout_secs);
        tracing::info!(
            active_connections = self.tracker.active_count(),
            drain_timeout_secs = drain_timeout.as_secs(),
            "Draining connections"
        );
        if self.tracker.wait_for_drain_timeout(drain_timeout).await {
            tracing::info!("All connections drained");
        } else {
            tracing::warn!(
                active_connections = self.tracker.active_count(),
                "Drain timeout expired, abandoning open connections"
            );
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

fn connection_builder(http2: &Http2Config) -> Builder<TokioExecutor> {
    let mut builder = Builder::new(TokioExecutor::new());
    builder.http1().timer(TokioTimer::new());
    builder
        .http2()
        .timer(TokioTimer::new())
        .keep_alive_interval(http2.keepalive_interval_secs.map(Duration::from_secs))
        .keep_alive_timeout(Duration::from_secs(http2.keepalive_timeout_secs));
    builder
}

/// Counts request handlers running on one connection.
///
/// Entering bumps the count and dropping the guard lowers it, so the
/// connection task can watch for the idle edge.
struct InFlight(Arc<watch::Sender<usize>>);

impl InFlight {
    fn enter(requests: &Arc<watch::Sender<usize>>) -> Self {
        requests.send_modify(|count| *count += 1);
        Self(Arc::clone(requests))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.send_modify(|count| *count -= 1);
    }
}

/// Serve one accepted socket until it closes.
///
/// Idle timeout, max age and server shutdown each start hyper's graceful
/// shutdown once; the graceful close timeout then bounds how long the peer
/// gets before the socket is dropped.
async fn serve_connection(
    builder: Builder<TokioExecutor>,
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: Arc<ServerState>,
    connection_id: ConnectionId,
    mut shutdown: broadcast::Receiver<()>,
) {
    tracing::debug!(connection_id = %connection_id, peer_addr = %peer_addr, "Serving connection");

    let timeouts = state.timeouts;
    let (requests, mut in_flight) = watch::channel(0usize);
    let requests = Arc::new(requests);

    let service = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .service(tower::service_fn(move |request: hyper::Request<Incoming>| {
            let state = Arc::clone(&state);
            let guard = InFlight::enter(&requests);
            async move {
                let response = handle(state, request).await;
                drop(guard);
                Ok::<_, Infallible>(response)
            }
        }));
    let conn = builder.serve_connection(TokioIo::new(stream), TowerToHyperService::new(service));
    tokio::pin!(conn);

    let mut idle = Timer::new();
    let mut max_age = Timer::new();
    let mut graceful_close = Timer::new();
    if let Some(timeout) = timeouts.idle_timeout {
        idle.schedule(timeout);
    }
    if let Some(age) = timeouts.max_age {
        max_age.schedule(age);
    }

    let mut closing = false;
    let mut watching_requests = true;
    let mut watching_shutdown = true;

    let result = loop {
        let reason = tokio::select! {
            result = conn.as_mut() => break result,
            changed = in_flight.changed(), if watching_requests => {
                match changed {
                    Ok(()) => {
                        let running = *in_flight.borrow_and_update();
                        if running > 0 {
                            idle.cancel();
                        } else if let (false, Some(timeout)) = (closing, timeouts.idle_timeout) {
                            idle.schedule(timeout);
                        }
                    }
                    Err(_) => watching_requests = false,
                }
                continue;
            }
            received = shutdown.recv(), if watching_shutdown => match received {
                Err(broadcast::error::RecvError::Closed) => {
                    watching_shutdown = false;
                    continue;
                }
                _ => "server_shutdown",
            },
            () = idle.fired() => "idle_timeout",
            () = max_age.fired() => "max_age",
            () = graceful_close.fired() => {
                tracing::warn!(connection_id = %connection_id, "Graceful close timed out, dropping connection");
                break Ok(());
            }
        };

        if closing {
            continue;
        }
        closing = true;
        watching_shutdown = false;
        idle.cancel();
        max_age.cancel();
        if let Some(timeout) = timeouts.graceful_close_timeout {
            graceful_close.schedule(timeout);
        }
        tracing::debug!(connection_id = %connection_id, reason, "Closing connection gracefully");
        conn.as_mut().graceful_shutdown();
    };

    if let Err(e) = result {
        tracing::debug!(connection_id = %connection_id, error = %e, "Connection ended with error");
    }
}

async fn handle(state: Arc<ServerState>, request: hyper::Request<Incoming>) -> axum::http::Response<Body> {
    let (parts, incoming) = request.into_parts();
    let head = RequestHead {
        method: parts.method,
        uri: parts.uri,
        version: parts.version,
        headers: parts.headers,
    };

    let (writer, body) = StreamedBody::channel(state.limits);
    tokio::spawn(feed_incoming(Body::new(incoming), writer));

    let request = Request::new(head, RequestBody::Stream(body));
    middleware::respond(state.responder.as_ref(), request)
        .await
        .into_http()
}

/// Copy a hyper request body into a `BodyWriter`.
async fn feed_incoming(body: Body, writer: BodyWriter) {
    let mut frames = body.into_data_stream();
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(chunk) => {
                writer.feed_chunk(chunk).await;
                if writer.is_finished() {
                    // The reader discarded the body or it failed.
                    return;
                }
            }
            Err(e) => {
                writer.fail(BodyError::Transport(e.to_string()));
                return;
            }
        }
    }
    writer.finish();
}
