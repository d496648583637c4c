//! Async driver for the HTTP/2 connection state machine.
//!
//! # Responsibilities
//! - Apply transport events to the state machine
//! - Write the resulting GOAWAY / PING frames in order
//! - Own the idle, max-age and graceful-close timers
//! - Close the connection exactly once
//!
//! # Design Decisions
//! - One manager per connection, driven by a single task
//! - A closed event channel counts as the input side closing
//! - Frame write failures are logged and otherwise ignored

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use crate::h2::frames::{ConnectionEvent, GoAwayCode, OutboundFrame, StreamId};
use crate::h2::keepalive::KeepalivePolicy;
use crate::h2::state::{
    ConnectionStateMachine, InputClosedAction, PingAckAction, PingAction, ShutdownAction,
    StreamClosedAction, StreamOpenedAction,
};
use crate::h2::timer::Timer;
use crate::net::connection::ConnectionId;
use crate::observability::metrics;

/// Timeouts and keepalive policy of a managed connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Start a graceful shutdown after this long without open streams.
    pub idle_timeout: Option<Duration>,
    /// Force the connection closed this long after a graceful shutdown started.
    pub graceful_close_timeout: Option<Duration>,
    /// Start a graceful shutdown once the connection is this old.
    pub max_age: Option<Duration>,
    pub keepalive: KeepalivePolicy,
}

/// Drives one HTTP/2 connection from establishment to close.
pub struct ConnectionManager {
    id: ConnectionId,
    config: ManagerConfig,
    machine: ConnectionStateMachine,
    frames: mpsc::Sender<OutboundFrame>,
    idle: Timer,
    max_age: Timer,
    graceful_close: Timer,
}

impl ConnectionManager {
    pub fn new(id: ConnectionId, config: ManagerConfig, frames: mpsc::Sender<OutboundFrame>) -> Self {
        Self {
            id,
            config,
            machine: ConnectionStateMachine::new(config.keepalive),
            frames,
            idle: Timer::new(),
            max_age: Timer::new(),
            graceful_close: Timer::new(),
        }
    }

    /// Process events until the connection is closed, then emit `Close`.
    ///
    /// A message on `shutdown` starts a graceful shutdown.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<ConnectionEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        if let Some(timeout) = self.config.idle_timeout {
            self.idle.schedule(timeout);
        }
        if let Some(max_age) = self.config.max_age {
            self.max_age.schedule(max_age);
        }

        tracing::debug!(connection_id = %self.id, "HTTP/2 connection manager started");
        let mut shutdown_open = true;

        while !self.machine.is_closed() {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => self.input_closed().await,
                },
                () = self.idle.fired() => {
                    tracing::debug!(connection_id = %self.id, "Idle timeout reached");
                    self.begin_graceful_shutdown("idle").await;
                }
                () = self.max_age.fired() => {
                    tracing::debug!(connection_id = %self.id, "Maximum connection age reached");
                    self.begin_graceful_shutdown("max_age").await;
                }
                () = self.graceful_close.fired() => {
                    tracing::warn!(
                        connection_id = %self.id,
                        open_streams = self.machine.open_streams(),
                        "Graceful close timed out, closing connection"
                    );
                    self.machine.force_close();
                }
                received = shutdown.recv(), if shutdown_open => match received {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        self.begin_graceful_shutdown("server_shutdown").await;
                    }
                    Err(broadcast::error::RecvError::Closed) => shutdown_open = false,
                },
            }
        }

        self.idle.cancel();
        self.max_age.cancel();
        self.graceful_close.cancel();
        self.send(OutboundFrame::Close).await;
        tracing::debug!(connection_id = %self.id, "HTTP/2 connection closed");
    }

    async fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::StreamCreated(id) => match self.machine.stream_opened(id) {
                StreamOpenedAction::CancelIdleTimer => self.idle.cancel(),
                StreamOpenedAction::None => {}
            },
            ConnectionEvent::StreamClosed(id) => match self.machine.stream_closed(id) {
                StreamClosedAction::StartIdleTimer => {
                    if let Some(timeout) = self.config.idle_timeout {
                        self.idle.schedule(timeout);
                    }
                }
                StreamClosedAction::Close => {
                    tracing::debug!(connection_id = %self.id, "Last stream drained");
                }
                StreamClosedAction::None => {}
            },
            ConnectionEvent::Ping { data, ack: false } => {
                match self.machine.received_ping(Instant::now(), data) {
                    PingAction::SendAck(data) => {
                        self.send(OutboundFrame::Ping { data, ack: true }).await;
                    }
                    PingAction::GoAwayAndClose {
                        last_stream_id,
                        code,
                    } => {
                        tracing::warn!(connection_id = %self.id, "Peer sent too many pings");
                        self.go_away(last_stream_id, code).await;
                    }
                    PingAction::None => {}
                }
            }
            ConnectionEvent::Ping { data, ack: true } => {
                match self.machine.received_ping_ack(data) {
                    PingAckAction::SendGoAway {
                        last_stream_id,
                        close,
                    } => {
                        tracing::debug!(
                            connection_id = %self.id,
                            last_stream_id = %last_stream_id,
                            close,
                            "Shutdown PING acknowledged"
                        );
                        self.go_away(last_stream_id, GoAwayCode::NoError).await;
                    }
                    PingAckAction::None => {}
                }
            }
            ConnectionEvent::GoAway {
                last_stream_id,
                code,
            } => {
                tracing::debug!(
                    connection_id = %self.id,
                    last_stream_id = %last_stream_id,
                    code,
                    "Peer sent GOAWAY"
                );
                self.begin_graceful_shutdown("peer_goaway").await;
            }
            ConnectionEvent::InputClosed => self.input_closed().await,
            ConnectionEvent::ShouldQuiesce => self.begin_graceful_shutdown("quiesce").await,
            ConnectionEvent::StreamDataWritten => self.machine.stream_data_written(),
        }
    }

    async fn begin_graceful_shutdown(&mut self, reason: &'static str) {
        match self.machine.trigger_graceful_shutdown() {
            ShutdownAction::SendGoAwayAndPing { ping } => {
                tracing::debug!(connection_id = %self.id, reason, "Starting graceful shutdown");
                self.idle.cancel();
                self.max_age.cancel();
                if let Some(timeout) = self.config.graceful_close_timeout {
                    self.graceful_close.schedule(timeout);
                }
                self.go_away(StreamId::MAX, GoAwayCode::NoError).await;
                self.send(OutboundFrame::Ping {
                    data: ping,
                    ack: false,
                })
                .await;
            }
            ShutdownAction::None => {}
        }
    }

    async fn input_closed(&mut self) {
        match self.machine.input_closed() {
            InputClosedAction::SendGoAwayAndClose {
                last_stream_id,
                code,
            } => self.go_away(last_stream_id, code).await,
            InputClosedAction::Close | InputClosedAction::None => {}
        }
    }

    async fn go_away(&mut self, last_stream_id: StreamId, code: GoAwayCode) {
        metrics::record_goaway(code.as_str());
        self.send(OutboundFrame::go_away(last_stream_id, code)).await;
    }

    async fn send(&mut self, frame: OutboundFrame) {
        if self.frames.send(frame).await.is_err() {
            tracing::debug!(connection_id = %self.id, "Outbound frame dropped, transport gone");
        }
    }
}
