//! Request pipeline over a part-level transport.
//!
//! # Responsibilities
//! - Turn an inbound `RequestPart` stream into requests, one at a time
//! - Feed each request body while its handler runs, honoring backpressure
//! - Run handlers that outlive their body under inbound-close cancellation
//! - Write responses (or rendered errors) as `ResponsePart`s
//!
//! # Design Decisions
//! - Requests are answered strictly in order; pipelined heads wait their turn
//! - A handler that finishes before reading its body gets the rest discarded
//! - An inbound close ends the connection; there is nobody left to answer

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::body::{BodyLimits, BodyWriter, StreamedBody};
use crate::http::cancellation::InboundConnection;
use crate::http::middleware::{HandlerResult, Responder};
use crate::http::parts::{InboundItem, RequestPart, ResponsePart};
use crate::http::request::{Request, RequestBody, RequestId};
use crate::http::response::ResponseBody;

/// How feeding a request body ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyOutcome {
    /// `End` was received.
    Complete,
    /// The inbound stream ended or failed mid-body.
    Closed,
}

enum First {
    Handler(HandlerResult),
    Body(BodyOutcome),
}

/// Serve every request arriving on `parts` until the inbound side closes or
/// the response sink goes away.
pub async fn serve_pipeline<S>(
    parts: S,
    sink: mpsc::Sender<ResponsePart>,
    responder: Arc<dyn Responder>,
    limits: BodyLimits,
) where
    S: futures_util::Stream<Item = InboundItem> + Unpin + Send + 'static,
{
    let inbound = InboundConnection::new(parts);

    while let Some(head) = inbound.next_head().await {
        let (writer, body) = StreamedBody::channel(limits);
        let request = Request::new(head, RequestBody::Stream(body));
        let request_id = request.id();
        tracing::trace!(request_id = %request_id, path = %request.path(), "Request received");

        let mut handler = responder.respond(request);

        let first = tokio::select! {
            result = &mut handler => First::Handler(result),
            outcome = feed_body(&inbound, &writer) => First::Body(outcome),
        };

        match first {
            First::Handler(result) => {
                // The response may stream the request body back, so keep
                // feeding while it is written.
                let (outcome, written) = tokio::join!(
                    feed_body(&inbound, &writer),
                    write_response(&sink, result, request_id),
                );
                if !written || outcome == BodyOutcome::Closed {
                    break;
                }
            }
            First::Body(BodyOutcome::Complete) => {
                match inbound.run_cancellable(&mut handler).await {
                    Ok(result) => {
                        if !write_response(&sink, result, request_id).await {
                            break;
                        }
                    }
                    Err(_) => {
                        tracing::debug!(request_id = %request_id, "Request cancelled, inbound closed");
                        writer.cancel();
                        break;
                    }
                }
            }
            First::Body(BodyOutcome::Closed) => {
                tracing::debug!(request_id = %request_id, "Inbound closed while reading request body");
                break;
            }
        }
    }

    tracing::trace!("Pipeline finished");
}

/// Feed the current request body until its `End`.
async fn feed_body<S>(inbound: &InboundConnection<S>, writer: &BodyWriter) -> BodyOutcome
where
    S: futures_util::Stream<Item = InboundItem> + Unpin + Send + 'static,
{
    loop {
        match inbound.next_part().await {
            Some(Ok(RequestPart::Body(chunk))) => writer.feed_chunk(chunk).await,
            Some(Ok(RequestPart::End)) => {
                writer.finish();
                return BodyOutcome::Complete;
            }
            Some(Ok(RequestPart::Head(_))) => {
                tracing::warn!("Request head received before the previous body ended");
                writer.fail(crate::body::BodyError::Transport(
                    "unexpected request head".to_string(),
                ));
                return BodyOutcome::Closed;
            }
            Some(Err(e)) => {
                writer.fail(e);
                return BodyOutcome::Closed;
            }
            None => {
                writer.cancel();
                return BodyOutcome::Closed;
            }
        }
    }
}

/// Write a handler result to the sink. Returns `false` once the sink is gone.
async fn write_response(
    sink: &mpsc::Sender<ResponsePart>,
    result: HandlerResult,
    request_id: RequestId,
) -> bool {
    let response = result.unwrap_or_else(|e| e.into_response());

    if sink.send(ResponsePart::Head(response.head)).await.is_err() {
        return false;
    }

    match response.body {
        ResponseBody::Empty => {}
        ResponseBody::Buffer(bytes) => {
            if !bytes.is_empty() && sink.send(ResponsePart::Body(bytes)).await.is_err() {
                return false;
            }
        }
        ResponseBody::Stream(mut stream) => loop {
            match stream.consume().await {
                Ok(Some(chunk)) => {
                    if sink.send(ResponsePart::Body(chunk)).await.is_err() {
                        return false;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    // The head is already out; all we can do is end the response.
                    tracing::warn!(request_id = %request_id, error = %e, "Response body failed mid-stream");
                    break;
                }
            }
        },
    }

    sink.send(ResponsePart::End).await.is_ok()
}
