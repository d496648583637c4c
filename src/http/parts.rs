//! Protocol parts exchanged with a transport.

use bytes::Bytes;

use crate::body::BodyError;
use crate::http::request::RequestHead;
use crate::http::response::ResponseHead;

/// One inbound part of a request.
#[derive(Debug, Clone)]
pub enum RequestPart {
    Head(RequestHead),
    Body(Bytes),
    End,
}

/// One outbound part of a response.
#[derive(Debug, Clone)]
pub enum ResponsePart {
    Head(ResponseHead),
    Body(Bytes),
    End,
}

/// Item type of an inbound part stream. An error means the transport failed.
pub type InboundItem = Result<RequestPart, BodyError>;

/// Boxed inbound part stream.
pub type PartStream = futures_util::stream::BoxStream<'static, InboundItem>;

/// A bounded channel whose receiving half is an inbound part stream.
///
/// Transports push parts into the sender; the pipeline reads the stream.
pub fn part_channel(capacity: usize) -> (tokio::sync::mpsc::Sender<InboundItem>, PartStream) {
    use futures_util::StreamExt;

    let (tx, rx) = tokio::sync::mpsc::channel(capacity);
    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    (tx, stream.boxed())
}
