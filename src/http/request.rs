//! Request model.
//!
//! # Responsibilities
//! - Hold the immutable request head (method, URI, version, headers)
//! - Hold the body, either buffered or still streaming from the connection
//! - Assign every accepted request a process-unique ID for tracing

use std::sync::atomic::{AtomicU64, Ordering};

use axum::http::{HeaderMap, Method, Uri, Version};
use bytes::Bytes;

use crate::body::{BodyError, StreamedBody};

/// Global counter for request IDs.
/// Relaxed ordering is enough, the IDs only need to be unique.
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    /// Generate a new unique request ID.
    pub fn next() -> Self {
        Self(REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Request line and headers.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
}

impl RequestHead {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
        }
    }
}

/// Request body.
#[derive(Debug, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    /// Fully materialized body.
    Buffer(Bytes),
    /// Body still arriving from the connection.
    Stream(StreamedBody),
}

impl RequestBody {
    /// Materialize the body, failing if it is larger than `limit`.
    pub async fn collect(self, limit: usize) -> Result<Bytes, BodyError> {
        match self {
            RequestBody::Empty => Ok(Bytes::new()),
            RequestBody::Buffer(bytes) if bytes.len() > limit => Err(BodyError::PayloadTooLarge),
            RequestBody::Buffer(bytes) => Ok(bytes),
            RequestBody::Stream(stream) => stream.collect(limit).await,
        }
    }
}

/// An accepted request.
#[derive(Debug)]
pub struct Request {
    id: RequestId,
    pub head: RequestHead,
    pub body: RequestBody,
}

impl Request {
    pub fn new(head: RequestHead, body: RequestBody) -> Self {
        Self {
            id: RequestId::next(),
            head,
            body,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn method(&self) -> &Method {
        &self.head.method
    }

    pub fn path(&self) -> &str {
        self.head.uri.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    /// Take the body out, leaving `Empty` behind.
    pub fn take_body(&mut self) -> RequestBody {
        std::mem::take(&mut self.body)
    }
}
