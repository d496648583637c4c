//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → resolve shutdown_signal()
//!
//! Shutdown (shutdown.rs):
//!     trigger() → listener stops accepting
//!               → each socket connection starts hyper's graceful shutdown
//!                 (a single GOAWAY on HTTP/2, keep-alive off on HTTP/1.1)
//!               → subscribed h2::ConnectionManagers send the double GOAWAY
//!               → connections drain (bounded by drain timeout)
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
