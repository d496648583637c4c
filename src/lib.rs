//! HTTP server framework with streamed bodies, a middleware chain and
//! HTTP/2 connection management.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ net::Listener ──▶ http::server (hyper, HTTP/1.1 + HTTP/2)
//!                                       │
//!                                       ▼
//!                      body::StreamedBody (limits, backpressure)
//!                                       │
//!                                       ▼
//!                      http::middleware (responder chain)
//!                                       │
//!     Client ◀───────────────── http::response
//!
//!     Part-level transports: http::pipeline + http::cancellation
//!     HTTP/2 frame-level transports: h2::ConnectionManager
//!     Cross-cutting: config, lifecycle, observability
//! ```

// Core subsystems
pub mod body;
pub mod h2;
pub mod http;
pub mod net;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use body::{BodyError, BodyLimits, BodyWriter, StreamedBody};
pub use config::ServerConfig;
pub use http::{HttpServer, Middleware, Next, Request, Responder, Response};
pub use lifecycle::Shutdown;
