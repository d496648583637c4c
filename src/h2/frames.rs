//! Frame-level vocabulary shared with the transport.

use bytes::Bytes;

/// An HTTP/2 stream identifier (31 bits).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u32);

impl StreamId {
    /// Connection-level stream.
    pub const ZERO: StreamId = StreamId(0);
    /// Largest valid stream ID, announced by the first GOAWAY of a graceful shutdown.
    pub const MAX: StreamId = StreamId(0x7fff_ffff);

    /// Create a stream ID, dropping the reserved high bit.
    pub fn new(id: u32) -> Self {
        Self(id & 0x7fff_ffff)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl From<u32> for StreamId {
    fn from(id: u32) -> Self {
        Self::new(id)
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque 8-byte PING payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PingData(pub [u8; 8]);

impl PingData {
    /// Random payload, used to recognise the ACK of our own shutdown PING.
    pub fn random() -> Self {
        Self(rand::random())
    }
}

/// GOAWAY error codes used by the server (RFC 9113 §7).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoAwayCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
}

impl GoAwayCode {
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// Label used for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            GoAwayCode::NoError => "no_error",
            GoAwayCode::ProtocolError => "protocol_error",
            GoAwayCode::ConnectError => "connect_error",
            GoAwayCode::EnhanceYourCalm => "enhance_your_calm",
        }
    }
}

/// Event reported by the transport about one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The peer opened a stream.
    StreamCreated(StreamId),
    /// A stream finished, in either direction.
    StreamClosed(StreamId),
    /// A PING frame arrived.
    Ping { data: PingData, ack: bool },
    /// The peer sent GOAWAY.
    GoAway { last_stream_id: StreamId, code: u32 },
    /// The inbound half of the connection closed.
    InputClosed,
    /// The server wants this connection to wind down.
    ShouldQuiesce,
    /// HEADERS or DATA were written for some stream.
    StreamDataWritten,
}

/// Frame or instruction handed back to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    GoAway {
        last_stream_id: StreamId,
        code: GoAwayCode,
        debug_data: Bytes,
    },
    Ping {
        data: PingData,
        ack: bool,
    },
    /// Close the underlying socket. Always the last frame.
    Close,
}

impl OutboundFrame {
    pub fn go_away(last_stream_id: StreamId, code: GoAwayCode) -> Self {
        OutboundFrame::GoAway {
            last_stream_id,
            code,
            debug_data: Bytes::new(),
        }
    }
}
