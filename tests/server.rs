//! End-to-end tests over real sockets.

use std::time::Duration;

use axum::http::StatusCode;

use relay_http::config::ServerConfig;
use relay_http::http::middleware::{construct_responder, middleware_fn, responder_fn};
use relay_http::http::{HttpError, RequestBody, Response, ResponseBody};

mod common;

fn no_content() -> std::sync::Arc<dyn relay_http::Responder> {
    responder_fn(|_request| async { Ok(Response::new(StatusCode::NO_CONTENT)) })
}

fn echo() -> std::sync::Arc<dyn relay_http::Responder> {
    responder_fn(|mut request| async move {
        let mut response = Response::new(StatusCode::OK);
        response.body = match request.take_body() {
            RequestBody::Stream(body) => ResponseBody::Stream(body),
            other => ResponseBody::Buffer(other.collect(usize::MAX).await?),
        };
        Ok(response)
    })
}

#[tokio::test]
async fn test_streams_request_body_back() {
    let server = common::start_server(ServerConfig::default(), echo()).await;

    let payload = vec![b'x'; 20_000];
    let response = common::client()
        .post(server.url("/echo"))
        .body(payload.clone())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.bytes().await.unwrap().as_ref(), payload.as_slice());

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_oversized_upload_is_rejected() {
    let mut config = ServerConfig::default();
    config.limits.max_upload_size = 64;
    config.limits.max_streaming_buffer_size = 64;

    let collect = responder_fn(|mut request| async move {
        let body = request.take_body().collect(usize::MAX).await?;
        Ok(Response::text(StatusCode::OK, format!("{} bytes", body.len())))
    });
    let server = common::start_server(config, collect).await;

    let response = common::client()
        .post(server.url("/upload"))
        .body(vec![0u8; 100])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::PAYLOAD_TOO_LARGE);
    server.shutdown.trigger();
}

#[tokio::test]
async fn test_uncaught_errors_render_as_json() {
    let missing = responder_fn(|_request| async { Err(HttpError::not_found()) });
    let tag = middleware_fn(|request, next| async move {
        let mut response = next.run(request).await?;
        response
            .headers_mut()
            .insert("x-chain", axum::http::HeaderValue::from_static("tagged"));
        Ok(response)
    });
    let server = common::start_server(ServerConfig::default(), construct_responder(missing, vec![tag])).await;

    let response = common::client().get(server.url("/nope")).send().await.unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    // The error skipped the tagging step on its way out.
    assert!(response.headers().get("x-chain").is_none());
    let content_type = response.headers().get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.starts_with("application/json"));
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"]["message"].is_string());

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_shutdown_stops_the_server() {
    let server = common::start_server(ServerConfig::default(), echo()).await;

    let response = common::client().get(server.url("/")).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    server.shutdown.trigger();
    let result = tokio::time::timeout(Duration::from_secs(5), server.handle)
        .await
        .expect("server should stop")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_idle_connections_are_closed_after_the_idle_timeout() {
    let mut config = ServerConfig::default();
    config.http2.idle_timeout_secs = Some(1);
    let server = common::start_server(config, no_content()).await;

    let mut stream = common::keep_alive_request(server.addr).await;
    assert!(common::closed_within(&mut stream, Duration::from_secs(5)).await);
    assert!(!server.handle.is_finished());

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_connections_stay_open_without_an_idle_timeout() {
    let server = common::start_server(ServerConfig::default(), no_content()).await;

    let mut stream = common::keep_alive_request(server.addr).await;
    assert!(!common::closed_within(&mut stream, Duration::from_millis(1500)).await);

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_connections_are_closed_at_max_age() {
    let mut config = ServerConfig::default();
    config.http2.max_age_secs = Some(1);
    let server = common::start_server(config, no_content()).await;

    let mut stream = common::keep_alive_request(server.addr).await;
    assert!(common::closed_within(&mut stream, Duration::from_secs(5)).await);

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_shutdown_closes_idle_keep_alive_connections() {
    let server = common::start_server(ServerConfig::default(), no_content()).await;
    let mut stream = common::keep_alive_request(server.addr).await;

    server.shutdown.trigger();
    assert!(common::closed_within(&mut stream, Duration::from_secs(5)).await);

    // The drain finishes well before the 30 second default timeout.
    let result = tokio::time::timeout(Duration::from_secs(5), server.handle)
        .await
        .expect("server should drain")
        .unwrap();
    assert!(result.is_ok());
}
