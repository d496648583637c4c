//! Streaming request/response bodies.
//!
//! # Data Flow
//! ```text
//! transport frames
//!     → BodyWriter::feed (producer, awaits backpressure gate)
//!     → shared queue { chunks, waiters, terminal }
//!     → StreamedBody::consume / collect / into_stream (application)
//! ```
//!
//! # Design Decisions
//! - One mutex-guarded queue shared by exactly one writer and one reader
//! - Chunks are delivered FIFO, either from the queue or straight to a waiter
//! - The writer blocks while more than `max_streaming_buffer_size` bytes are queued
//! - Terminal errors are sticky and replayed to every later consume

pub mod streamed;

pub use streamed::{BodyPart, BodyWriter, StreamedBody};

use axum::http::StatusCode;
use thiserror::Error;

use crate::http::error::StatusError;

/// Size limits applied to a single streamed body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyLimits {
    /// Total number of bytes the body may carry.
    pub max_size: usize,
    /// Bytes that may sit in the queue before the writer is paused.
    pub max_streaming_buffer_size: usize,
}

impl Default for BodyLimits {
    fn default() -> Self {
        Self {
            max_size: 2 * 1024 * 1024,
            max_streaming_buffer_size: 64 * 1024,
        }
    }
}

/// Errors surfaced while reading a body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BodyError {
    /// More bytes were fed (or collected) than the limit allows.
    #[error("payload too large")]
    PayloadTooLarge,

    /// The inbound stream closed while the request was still being processed.
    #[error("request cancelled: inbound stream closed")]
    Cancelled,

    /// The transport failed while the body was streaming.
    #[error("transport error: {0}")]
    Transport(String),
}

impl StatusError for BodyError {
    fn status(&self) -> StatusCode {
        match self {
            BodyError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            BodyError::Cancelled | BodyError::Transport(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn message(&self) -> String {
        self.to_string()
    }
}
