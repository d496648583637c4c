//! Cancelling long-running requests when the peer disconnects.
//!
//! # Responsibilities
//! - Own the inbound part stream of one connection
//! - Hand out request heads and body parts to the request pipeline
//! - While a handler runs after its body was read, keep draining the inbound
//!   side and cancel the handler if the stream ends or fails
//!
//! # States
//! ```text
//! Idle ──run_cancellable──▶ Processing ──handler done──▶ Idle
//!                               │
//!                               ├──new head seen──▶ NextHead (handler keeps running)
//!                               └──stream ended───▶ Closed  (handler cancelled)
//! ```
//!
//! Only one race runs at a time; a second `run_cancellable` while one is in
//! progress runs its operation without racing.

use std::future::Future;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::sync::Mutex;

use crate::body::BodyError;
use crate::http::parts::{InboundItem, RequestPart};
use crate::http::request::RequestHead;

enum InboundState<S> {
    /// Nobody is racing; the stream is available.
    Idle(S),
    /// A race owns the stream.
    Processing,
    /// A race found the next pipelined request head.
    NextHead(RequestHead, S),
    /// The inbound stream ended or failed.
    Closed,
}

/// How draining the inbound side finished.
enum Drained {
    Head(RequestHead),
    Closed,
}

enum Raced<T> {
    Done(T),
    Drained(Drained),
}

/// Inbound side of a connection, shared between the pipeline and handlers.
pub struct InboundConnection<S> {
    state: Arc<Mutex<InboundState<S>>>,
}

impl<S> Clone for InboundConnection<S> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<S> InboundConnection<S>
where
    S: Stream<Item = InboundItem> + Unpin + Send + 'static,
{
    pub fn new(parts: S) -> Self {
        Self {
            state: Arc::new(Mutex::new(InboundState::Idle(parts))),
        }
    }

    /// Whether the inbound stream has ended.
    pub async fn is_closed(&self) -> bool {
        matches!(*self.state.lock().await, InboundState::Closed)
    }

    /// Wait for the next request head, skipping stray body parts.
    ///
    /// Returns `None` once the inbound stream is closed.
    pub async fn next_head(&self) -> Option<RequestHead> {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, InboundState::Closed) {
            InboundState::NextHead(head, parts) => {
                *state = InboundState::Idle(parts);
                Some(head)
            }
            InboundState::Idle(mut parts) => loop {
                match parts.next().await {
                    Some(Ok(RequestPart::Head(head))) => {
                        *state = InboundState::Idle(parts);
                        return Some(head);
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(_)) | None => return None,
                }
            },
            InboundState::Processing => {
                tracing::warn!("next_head called while a request is being processed");
                *state = InboundState::Processing;
                None
            }
            InboundState::Closed => None,
        }
    }

    /// Next part of the current request, `None` once nothing more can arrive.
    pub async fn next_part(&self) -> Option<InboundItem> {
        let mut state = self.state.lock().await;
        let InboundState::Idle(parts) = &mut *state else {
            return None;
        };
        let item = parts.next().await;
        if matches!(item, None | Some(Err(_))) {
            *state = InboundState::Closed;
        }
        item
    }

    /// Run `operation`, cancelling it if the inbound stream closes first.
    ///
    /// While the operation runs, inbound parts are drained until either a new
    /// request head shows up (the head is kept for [`next_head`] and the
    /// operation continues undisturbed) or the stream ends, in which case the
    /// operation is dropped and `BodyError::Cancelled` is returned.
    ///
    /// [`next_head`]: InboundConnection::next_head
    pub async fn run_cancellable<F, T>(&self, operation: F) -> Result<T, BodyError>
    where
        F: Future<Output = T>,
    {
        let parts = {
            let mut state = self.state.lock().await;
            match std::mem::replace(&mut *state, InboundState::Processing) {
                InboundState::Idle(parts) => Some(parts),
                InboundState::Closed => {
                    *state = InboundState::Closed;
                    return Err(BodyError::Cancelled);
                }
                other => {
                    *state = other;
                    None
                }
            }
        };

        let Some(mut parts) = parts else {
            return Ok(operation.await);
        };

        tokio::pin!(operation);
        let raced = tokio::select! {
            output = &mut operation => Raced::Done(output),
            drained = drain_until_head(&mut parts) => Raced::Drained(drained),
        };

        match raced {
            Raced::Done(output) => {
                *self.state.lock().await = InboundState::Idle(parts);
                Ok(output)
            }
            Raced::Drained(Drained::Head(head)) => {
                *self.state.lock().await = InboundState::NextHead(head, parts);
                Ok(operation.await)
            }
            Raced::Drained(Drained::Closed) => {
                *self.state.lock().await = InboundState::Closed;
                tracing::debug!("Inbound stream closed, cancelling request");
                Err(BodyError::Cancelled)
            }
        }
    }
}

async fn drain_until_head<S>(parts: &mut S) -> Drained
where
    S: Stream<Item = InboundItem> + Unpin,
{
    loop {
        match parts.next().await {
            Some(Ok(RequestPart::Head(head))) => return Drained::Head(head),
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return Drained::Closed,
        }
    }
}
