//! HTTP/2 connection state machine.
//!
//! # States
//! - Active: serving streams normally
//! - Closing: first GOAWAY and shutdown PING sent, draining streams
//! - Closed: the socket should be (or has been) closed
//!
//! # State Transitions
//! ```text
//! Active  → Closing: graceful shutdown triggered (idle, max age, quiesce)
//! Closing → Closed:  PING ACK seen, second GOAWAY sent and no stream open
//! Active  → Closed:  input closed, or too many pings
//! Closing → Closed:  input closed, or too many pings
//! ```
//!
//! Every method returns the action the caller must perform; the machine
//! itself never touches the network.

use tokio::time::Instant;

use crate::h2::frames::{GoAwayCode, PingData, StreamId};
use crate::h2::keepalive::{KeepalivePolicy, KeepaliveTracker};
use crate::h2::streams::OpenStreams;

#[derive(Debug)]
struct ActiveState {
    streams: OpenStreams,
    keepalive: KeepaliveTracker,
}

#[derive(Debug)]
struct ClosingState {
    streams: OpenStreams,
    keepalive: KeepaliveTracker,
    sent_second_goaway: bool,
    goaway_ping: PingData,
}

#[derive(Debug)]
enum State {
    Active(ActiveState),
    Closing(ClosingState),
    Closed,
}

/// Result of a stream opening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOpenedAction {
    CancelIdleTimer,
    None,
}

/// Result of a stream closing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamClosedAction {
    /// The connection has no streams left and may be reclaimed when idle.
    StartIdleTimer,
    /// Shutdown finished draining; close the socket.
    Close,
    None,
}

/// Result of a non-ACK PING.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingAction {
    SendAck(PingData),
    /// The peer pinged too often: GOAWAY then close.
    GoAwayAndClose {
        last_stream_id: StreamId,
        code: GoAwayCode,
    },
    None,
}

/// Result of a PING ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingAckAction {
    /// Send the second GOAWAY, then close if `close` is set.
    SendGoAway { last_stream_id: StreamId, close: bool },
    None,
}

/// Result of triggering graceful shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownAction {
    /// Send GOAWAY(`StreamId::MAX`, NO_ERROR) followed by PING(`ping`).
    SendGoAwayAndPing { ping: PingData },
    None,
}

/// Result of the inbound side closing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputClosedAction {
    SendGoAwayAndClose {
        last_stream_id: StreamId,
        code: GoAwayCode,
    },
    Close,
    None,
}

/// Lifecycle of one HTTP/2 server connection.
#[derive(Debug)]
pub struct ConnectionStateMachine {
    state: State,
}

impl ConnectionStateMachine {
    /// Create a machine in the `Active` state with no open streams.
    pub fn new(policy: KeepalivePolicy) -> Self {
        Self {
            state: State::Active(ActiveState {
                streams: OpenStreams::new(),
                keepalive: KeepaliveTracker::new(policy),
            }),
        }
    }

    /// Whether the connection should be closed.
    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    /// Whether a graceful shutdown is in progress.
    pub fn is_closing(&self) -> bool {
        matches!(self.state, State::Closing(_))
    }

    /// Get the number of open streams.
    pub fn open_streams(&self) -> usize {
        match &self.state {
            State::Active(s) => s.streams.len(),
            State::Closing(s) => s.streams.len(),
            State::Closed => 0,
        }
    }

    /// Get the highest stream ID opened so far.
    pub fn last_stream_id(&self) -> StreamId {
        match &self.state {
            State::Active(s) => s.streams.last_stream_id(),
            State::Closing(s) => s.streams.last_stream_id(),
            State::Closed => StreamId::ZERO,
        }
    }

    /// A stream was opened by the peer.
    pub fn stream_opened(&mut self, id: StreamId) -> StreamOpenedAction {
        match &mut self.state {
            State::Active(s) => {
                s.streams.opened(id);
                StreamOpenedAction::CancelIdleTimer
            }
            State::Closing(s) => {
                s.streams.opened(id);
                StreamOpenedAction::CancelIdleTimer
            }
            State::Closed => StreamOpenedAction::None,
        }
    }

    /// A stream finished.
    pub fn stream_closed(&mut self, id: StreamId) -> StreamClosedAction {
        match &mut self.state {
            State::Active(s) => {
                if s.streams.closed(id) {
                    StreamClosedAction::StartIdleTimer
                } else {
                    StreamClosedAction::None
                }
            }
            State::Closing(s) => {
                if s.streams.closed(id) && s.sent_second_goaway {
                    self.state = State::Closed;
                    StreamClosedAction::Close
                } else {
                    StreamClosedAction::None
                }
            }
            State::Closed => StreamClosedAction::None,
        }
    }

    /// A non-ACK PING arrived at `now`.
    pub fn received_ping(&mut self, now: Instant, data: PingData) -> PingAction {
        let (streams, keepalive) = match &mut self.state {
            State::Active(s) => (&s.streams, &mut s.keepalive),
            State::Closing(s) => (&s.streams, &mut s.keepalive),
            State::Closed => return PingAction::None,
        };

        if keepalive.received_ping(now, !streams.is_empty()) {
            let last_stream_id = streams.last_stream_id();
            self.state = State::Closed;
            PingAction::GoAwayAndClose {
                last_stream_id,
                code: GoAwayCode::EnhanceYourCalm,
            }
        } else {
            PingAction::SendAck(data)
        }
    }

    /// A PING ACK arrived.
    pub fn received_ping_ack(&mut self, data: PingData) -> PingAckAction {
        match &mut self.state {
            State::Closing(s) if s.goaway_ping == data && !s.sent_second_goaway => {
                s.sent_second_goaway = true;
                let last_stream_id = s.streams.last_stream_id();
                let close = s.streams.is_empty();
                if close {
                    self.state = State::Closed;
                }
                PingAckAction::SendGoAway {
                    last_stream_id,
                    close,
                }
            }
            State::Active(_) | State::Closing(_) | State::Closed => PingAckAction::None,
        }
    }

    /// Start a graceful shutdown with a random PING payload.
    pub fn trigger_graceful_shutdown(&mut self) -> ShutdownAction {
        self.trigger_graceful_shutdown_with(PingData::random())
    }

    /// Start a graceful shutdown; `ping` is the payload whose ACK ends phase one.
    pub fn trigger_graceful_shutdown_with(&mut self, ping: PingData) -> ShutdownAction {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Active(s) => {
                self.state = State::Closing(ClosingState {
                    streams: s.streams,
                    keepalive: s.keepalive,
                    sent_second_goaway: false,
                    goaway_ping: ping,
                });
                ShutdownAction::SendGoAwayAndPing { ping }
            }
            other @ (State::Closing(_) | State::Closed) => {
                self.state = other;
                ShutdownAction::None
            }
        }
    }

    /// The inbound half of the connection closed.
    pub fn input_closed(&mut self) -> InputClosedAction {
        let action = match &self.state {
            State::Active(s) => InputClosedAction::SendGoAwayAndClose {
                last_stream_id: s.streams.last_stream_id(),
                code: GoAwayCode::ConnectError,
            },
            State::Closing(s) if s.sent_second_goaway => InputClosedAction::Close,
            State::Closing(s) => InputClosedAction::SendGoAwayAndClose {
                last_stream_id: s.streams.last_stream_id(),
                code: GoAwayCode::ConnectError,
            },
            State::Closed => return InputClosedAction::None,
        };
        self.state = State::Closed;
        action
    }

    /// Outbound HEADERS or DATA were written; pings are expected again.
    pub fn stream_data_written(&mut self) {
        match &mut self.state {
            State::Active(s) => s.keepalive.reset(),
            State::Closing(s) => s.keepalive.reset(),
            State::Closed => {}
        }
    }

    /// Close regardless of state. Returns `false` if already closed.
    pub fn force_close(&mut self) -> bool {
        !matches!(std::mem::replace(&mut self.state, State::Closed), State::Closed)
    }
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new(KeepalivePolicy::default())
    }
}
