//! HTTP request handling subsystem.
//!
//! # Data Flow
//! ```text
//! transport (hyper connection, or a RequestPart stream)
//!     → server.rs / pipeline.rs (head + StreamedBody per request)
//!     → middleware.rs (responder chain, short-circuit or delegate)
//!     → terminal responder (routing, application)
//!     → error.rs (uncaught errors rendered as responses)
//!     → response.rs (head, buffered or streamed body)
//!     → transport
//! ```
//!
//! cancellation.rs keeps watching the inbound side while a handler runs so
//! long-lived requests are cancelled when the peer disconnects.

pub mod cancellation;
pub mod error;
pub mod middleware;
pub mod parts;
pub mod pipeline;
pub mod request;
pub mod response;
pub mod server;

pub use error::{HttpError, StatusError};
pub use middleware::{construct_responder, Middleware, Next, Responder};
pub use request::{Request, RequestBody, RequestHead, RequestId};
pub use response::{Response, ResponseBody, ResponseHead};
pub use server::{HttpServer, ServeError};
