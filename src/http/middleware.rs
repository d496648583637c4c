//! Responder chain.
//!
//! # Responsibilities
//! - Define the responder and middleware contracts
//! - Fold an ordered middleware list and a final responder into one responder
//! - Render uncaught errors at the outermost boundary
//!
//! # Design Decisions
//! - Middleware run in list order; the first one sees the request first
//! - A middleware that never calls `next` short-circuits the rest of the chain
//! - No state travels between middleware except through request and response

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::{BoxFuture, FutureExt};

use crate::http::error::HttpError;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::observability::metrics;

/// Outcome of a responder.
pub type HandlerResult = Result<Response, HttpError>;

/// Turns a request into a response.
pub trait Responder: Send + Sync + 'static {
    fn respond(&self, request: Request) -> BoxFuture<'static, HandlerResult>;
}

/// Sits in front of the rest of the chain.
pub trait Middleware: Send + Sync + 'static {
    fn handle(&self, request: Request, next: Next) -> BoxFuture<'static, HandlerResult>;
}

/// Remainder of the chain, handed to a middleware.
#[derive(Clone)]
pub struct Next {
    inner: Arc<dyn Responder>,
}

impl Next {
    /// Run the rest of the chain.
    pub async fn run(self, request: Request) -> HandlerResult {
        self.inner.respond(request).await
    }
}

/// A middleware bound to the responder it delegates to.
struct Chained {
    middleware: Arc<dyn Middleware>,
    next: Arc<dyn Responder>,
}

impl Responder for Chained {
    fn respond(&self, request: Request) -> BoxFuture<'static, HandlerResult> {
        let next = Next {
            inner: Arc::clone(&self.next),
        };
        self.middleware.handle(request, next)
    }
}

/// Compose `middleware` in front of `responder`.
///
/// `middleware[0]` runs first and `responder` runs last.
pub fn construct_responder(
    responder: Arc<dyn Responder>,
    middleware: Vec<Arc<dyn Middleware>>,
) -> Arc<dyn Responder> {
    middleware.into_iter().rev().fold(responder, |next, middleware| {
        Arc::new(Chained { middleware, next }) as Arc<dyn Responder>
    })
}

/// Run a responder and render any error it returns.
pub async fn respond(responder: &dyn Responder, request: Request) -> Response {
    match responder.respond(request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

struct FnResponder<F>(F);

impl<F, Fut> Responder for FnResponder<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn respond(&self, request: Request) -> BoxFuture<'static, HandlerResult> {
        (self.0)(request).boxed()
    }
}

/// Responder from an async closure.
pub fn responder_fn<F, Fut>(f: F) -> Arc<dyn Responder>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnResponder(f))
}

struct FnMiddleware<F>(F);

impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn handle(&self, request: Request, next: Next) -> BoxFuture<'static, HandlerResult> {
        (self.0)(request, next).boxed()
    }
}

/// Middleware from an async closure.
pub fn middleware_fn<F, Fut>(f: F) -> Arc<dyn Middleware>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnMiddleware(f))
}

/// Logs every request and records request metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRequests;

impl Middleware for LogRequests {
    fn handle(&self, request: Request, next: Next) -> BoxFuture<'static, HandlerResult> {
        let start = Instant::now();
        let request_id = request.id();
        let method = request.method().clone();
        let path = request.path().to_string();

        async move {
            let result = next.run(request).await;
            let status = match &result {
                Ok(response) => response.status(),
                Err(e) => crate::http::error::StatusError::status(e),
            };
            tracing::debug!(
                request_id = %request_id,
                method = %method,
                path = %path,
                status = status.as_u16(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Request completed"
            );
            metrics::record_request(status.as_u16(), start);
            result
        }
        .boxed()
    }
}
