//! HTTP/2 connection management.
//!
//! # Data Flow
//! ```text
//! transport events (streams, PING, GOAWAY, input closed)
//!     → manager.rs (async driver, owns timers)
//!     → state.rs (Active → Closing → Closed, returns actions)
//!         ├─ streams.rs (open stream set, last stream ID)
//!         └─ keepalive.rs (ping strike counting)
//!     → OutboundFrame (GOAWAY, PING, Close) back to the transport
//! ```
//!
//! # Graceful Shutdown
//! ```text
//! Active ──trigger──▶ Closing: GOAWAY(last=MAX) + PING(payload)
//! Closing ──PING ACK(payload)──▶ GOAWAY(last=actual)
//!         └─ closes once the second GOAWAY is out and no stream is open
//! ```
//!
//! # Design Decisions
//! - The state machine is synchronous and side-effect free; it only returns actions
//! - All state for one connection lives on the task driving it, no locking
//! - Outbound write failures during shutdown are ignored; the connection closes anyway

pub mod frames;
pub mod keepalive;
pub mod manager;
pub mod state;
pub mod streams;
pub mod timer;

pub use frames::{ConnectionEvent, GoAwayCode, OutboundFrame, PingData, StreamId};
pub use keepalive::{KeepalivePolicy, KeepaliveTracker};
pub use manager::{ConnectionManager, ManagerConfig};
pub use state::ConnectionStateMachine;
pub use streams::OpenStreams;
pub use timer::Timer;
