//! Response model.
//!
//! # Responsibilities
//! - Status, headers and a buffered, streamed or empty body
//! - Conversion into the hyper response written by the server
//!
//! Middleware mutate the response on the way back through the chain; the
//! transport consumes it exactly once.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use bytes::Bytes;

use crate::body::StreamedBody;

/// Status line and headers.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// Response body.
#[derive(Debug, Default)]
pub enum ResponseBody {
    #[default]
    Empty,
    Buffer(Bytes),
    Stream(StreamedBody),
}

#[derive(Debug)]
pub struct Response {
    pub head: ResponseHead,
    pub body: ResponseBody,
}

impl Response {
    /// Empty response with the given status.
    pub fn new(status: StatusCode) -> Self {
        Self {
            head: ResponseHead {
                status,
                headers: HeaderMap::new(),
            },
            body: ResponseBody::Empty,
        }
    }

    /// Plain text response.
    pub fn text(status: StatusCode, text: impl Into<String>) -> Self {
        let mut response = Self::new(status);
        response.head.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response.body = ResponseBody::Buffer(Bytes::from(text.into()));
        response
    }

    /// Response streaming the given body.
    pub fn stream(status: StatusCode, body: StreamedBody) -> Self {
        let mut response = Self::new(status);
        response.body = ResponseBody::Stream(body);
        response
    }

    pub fn status(&self) -> StatusCode {
        self.head.status
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.head.headers
    }

    /// Convert into the hyper response type used by the server.
    pub fn into_http(self) -> axum::http::Response<Body> {
        let body = match self.body {
            ResponseBody::Empty => Body::empty(),
            ResponseBody::Buffer(bytes) => Body::from(bytes),
            ResponseBody::Stream(stream) => Body::from_stream(stream.into_stream()),
        };

        let mut response = axum::http::Response::new(body);
        *response.status_mut() = self.head.status;
        *response.headers_mut() = self.head.headers;
        response
    }
}
