//! Handler errors and their rendering at the outermost responder.

use axum::http::{header, HeaderValue, StatusCode};
use bytes::Bytes;
use thiserror::Error;

use crate::body::BodyError;
use crate::http::response::{Response, ResponseBody};

/// An error that knows which status it should be rendered with.
pub trait StatusError: std::error::Error + Send + Sync + 'static {
    fn status(&self) -> StatusCode;

    fn message(&self) -> String {
        self.to_string()
    }
}

/// Error returned by responders and middleware.
#[derive(Debug, Error)]
pub enum HttpError {
    /// An error with an explicit status and message.
    #[error("{message}")]
    Status { status: StatusCode, message: String },

    /// Reading the request body failed.
    #[error(transparent)]
    Body(#[from] BodyError),

    /// An application error that carries its own status.
    #[error("{0}")]
    Custom(Box<dyn StatusError>),

    /// Anything else. Rendered as a plain 500.
    #[error("{0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        HttpError::Status {
            status,
            message: message.into(),
        }
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "Not Found")
    }

    /// Wrap an error that knows its own status; it is rendered with that
    /// status and its `message()`.
    pub fn from_status_error<E: StatusError>(error: E) -> Self {
        HttpError::Custom(Box::new(error))
    }

    /// Wrap an opaque error. It is logged and rendered as a 500.
    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        HttpError::Other(Box::new(error))
    }

    /// Convert the error into the response written to the client.
    pub fn into_response(self) -> Response {
        match self {
            HttpError::Status { status, message } => error_response(status, &message),
            HttpError::Body(e) => error_response(e.status(), &e.message()),
            HttpError::Custom(e) => error_response(e.status(), &e.message()),
            HttpError::Other(e) => {
                tracing::error!(error = %e, "Unhandled handler error");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        }
    }
}

impl StatusError for HttpError {
    fn status(&self) -> StatusCode {
        match self {
            HttpError::Status { status, .. } => *status,
            HttpError::Body(e) => e.status(),
            HttpError::Custom(e) => e.status(),
            HttpError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Build the `{"error":{"message":...}}` response for a status.
pub fn error_response(status: StatusCode, message: &str) -> Response {
    let payload = serde_json::json!({ "error": { "message": message } });
    let mut response = Response::new(status);
    response.head.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    response.body = ResponseBody::Buffer(Bytes::from(payload.to_string()));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_text(response: &Response) -> String {
        match &response.body {
            ResponseBody::Buffer(b) => String::from_utf8(b.to_vec()).unwrap(),
            _ => panic!("expected buffered body"),
        }
    }

    #[test]
    fn status_error_keeps_its_status_and_message() {
        let response = HttpError::new(StatusCode::FORBIDDEN, "nope").into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_text(&response), r#"{"error":{"message":"nope"}}"#);
    }

    #[test]
    fn body_errors_render_with_their_status() {
        let response = HttpError::from(BodyError::PayloadTooLarge).into_response();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[derive(Debug, Error)]
    #[error("short and stout")]
    struct Teapot;

    impl StatusError for Teapot {
        fn status(&self) -> StatusCode {
            StatusCode::IM_A_TEAPOT
        }

        fn message(&self) -> String {
            "I'm a teapot".to_string()
        }
    }

    #[test]
    fn custom_errors_render_with_their_own_status_and_message() {
        let error = HttpError::from_status_error(Teapot);
        assert_eq!(StatusError::status(&error), StatusCode::IM_A_TEAPOT);

        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(body_text(&response), r#"{"error":{"message":"I'm a teapot"}}"#);
    }

    #[test]
    fn unknown_errors_become_internal_server_error() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let response = HttpError::other(io).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body_text(&response).contains("disk on fire"));
    }
}
