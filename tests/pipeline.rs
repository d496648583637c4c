//! Request pipeline tests over an in-memory part transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::{Method, StatusCode};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use relay_http::body::BodyLimits;
use relay_http::http::middleware::responder_fn;
use relay_http::http::parts::{part_channel, InboundItem, RequestPart, ResponsePart};
use relay_http::http::pipeline::serve_pipeline;
use relay_http::http::{RequestBody, Responder, Response, ResponseBody};

mod common;

use common::head;

struct Pipeline {
    parts: mpsc::Sender<InboundItem>,
    responses: mpsc::Receiver<ResponsePart>,
    task: JoinHandle<()>,
}

fn start(responder: Arc<dyn Responder>, limits: BodyLimits) -> Pipeline {
    let (parts, stream) = part_channel(16);
    let (sink, responses) = mpsc::channel(16);
    let task = tokio::spawn(serve_pipeline(stream, sink, responder, limits));
    Pipeline {
        parts,
        responses,
        task,
    }
}

impl Pipeline {
    async fn send(&self, part: RequestPart) {
        self.parts.send(Ok(part)).await.unwrap();
    }

    /// Read one full response: status and concatenated body.
    async fn response(&mut self) -> Option<(StatusCode, Vec<u8>)> {
        let status = match self.responses.recv().await? {
            ResponsePart::Head(head) => head.status,
            other => panic!("expected head, got {other:?}"),
        };
        let mut body = Vec::new();
        loop {
            match self.responses.recv().await? {
                ResponsePart::Body(chunk) => body.extend_from_slice(&chunk),
                ResponsePart::End => return Some((status, body)),
                ResponsePart::Head(_) => panic!("head before end"),
            }
        }
    }
}

fn path_responder() -> Arc<dyn Responder> {
    responder_fn(|request| async move {
        Ok(Response::text(StatusCode::OK, request.path().to_string()))
    })
}

#[tokio::test]
async fn test_pipelined_requests_answered_in_order() {
    let mut pipeline = start(path_responder(), BodyLimits::default());

    pipeline.send(head(Method::GET, "/a")).await;
    pipeline.send(RequestPart::End).await;
    pipeline.send(head(Method::GET, "/b")).await;
    pipeline.send(RequestPart::End).await;

    assert_eq!(pipeline.response().await, Some((StatusCode::OK, b"/a".to_vec())));
    assert_eq!(pipeline.response().await, Some((StatusCode::OK, b"/b".to_vec())));

    drop(pipeline.parts);
    assert_eq!(pipeline.responses.recv().await.map(|_| ()), None);
    pipeline.task.await.unwrap();
}

#[tokio::test]
async fn test_unread_body_is_skipped_before_next_request() {
    let accepted = responder_fn(|_request| async { Ok(Response::new(StatusCode::ACCEPTED)) });
    let mut pipeline = start(accepted, BodyLimits::default());

    pipeline.send(head(Method::POST, "/upload")).await;
    for _ in 0..3 {
        pipeline.send(RequestPart::Body(Bytes::from_static(b"ignored"))).await;
    }
    pipeline.send(RequestPart::End).await;
    pipeline.send(head(Method::POST, "/upload")).await;
    pipeline.send(RequestPart::End).await;

    assert_eq!(pipeline.response().await, Some((StatusCode::ACCEPTED, Vec::new())));
    assert_eq!(pipeline.response().await, Some((StatusCode::ACCEPTED, Vec::new())));
}

#[tokio::test]
async fn test_streamed_echo() {
    let echo = responder_fn(|mut request| async move {
        let mut response = Response::new(StatusCode::OK);
        if let RequestBody::Stream(body) = request.take_body() {
            response.body = ResponseBody::Stream(body);
        }
        Ok(response)
    });
    let mut pipeline = start(echo, BodyLimits::default());

    pipeline.send(head(Method::POST, "/echo")).await;
    pipeline.send(RequestPart::Body(Bytes::from_static(b"hello "))).await;
    pipeline.send(RequestPart::Body(Bytes::from_static(b"world"))).await;
    pipeline.send(RequestPart::End).await;

    assert_eq!(
        pipeline.response().await,
        Some((StatusCode::OK, b"hello world".to_vec()))
    );
}

#[tokio::test]
async fn test_oversized_body_is_rendered_as_413() {
    let collect = responder_fn(|mut request| async move {
        let body = request.take_body().collect(usize::MAX).await?;
        Ok(Response::text(StatusCode::OK, format!("{}", body.len())))
    });
    let limits = BodyLimits {
        max_size: 8,
        max_streaming_buffer_size: 8,
    };
    let mut pipeline = start(collect, limits);

    pipeline.send(head(Method::POST, "/upload")).await;
    pipeline.send(RequestPart::Body(Bytes::from_static(b"0123456789abcdef"))).await;
    pipeline.send(RequestPart::End).await;

    let (status, _) = pipeline.response().await.unwrap();
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

/// Sets its flag when dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_inbound_close_cancels_running_handler() {
    let dropped = Arc::new(AtomicBool::new(false));
    let slow = {
        let dropped = Arc::clone(&dropped);
        responder_fn(move |mut request| {
            let flag = DropFlag(Arc::clone(&dropped));
            async move {
                let _flag = flag;
                request.take_body().collect(usize::MAX).await?;
                std::future::pending::<()>().await;
                Ok(Response::new(StatusCode::OK))
            }
        })
    };
    let mut pipeline = start(slow, BodyLimits::default());

    pipeline.send(head(Method::POST, "/slow")).await;
    pipeline.send(RequestPart::Body(Bytes::from_static(b"payload"))).await;
    pipeline.send(RequestPart::End).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!dropped.load(Ordering::SeqCst));

    drop(pipeline.parts);
    tokio::time::timeout(Duration::from_secs(1), pipeline.task)
        .await
        .expect("pipeline should stop")
        .unwrap();

    assert!(dropped.load(Ordering::SeqCst));
    assert!(pipeline.responses.recv().await.is_none());
}
