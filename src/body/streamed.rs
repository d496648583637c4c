//! Backpressure-aware body queue.
//!
//! # Responsibilities
//! - Carry byte chunks from the transport to application code in order
//! - Pause the feeding side while too many bytes are buffered
//! - Enforce the total size limit of a body
//! - Signal end of stream or a terminal error to every reader

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use tokio::sync::oneshot;

use crate::body::{BodyError, BodyLimits};
use crate::observability::metrics;

/// A single item fed into a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyPart {
    /// A chunk of body bytes.
    Chunk(Bytes),
    /// The body ended normally.
    End,
    /// The body ended with an error.
    Error(BodyError),
}

/// What a consume call resolves to: a chunk, end of body (`None`) or an error.
type Delivery = Result<Option<Bytes>, BodyError>;

/// How a finished body terminates once its queue is drained.
#[derive(Debug, Clone)]
enum Terminal {
    End,
    Error(BodyError),
}

impl Terminal {
    fn delivery(&self) -> Delivery {
        match self {
            Terminal::End => Ok(None),
            Terminal::Error(e) => Err(e.clone()),
        }
    }
}

/// State shared by the writer and the reader.
#[derive(Debug)]
struct Shared {
    limits: BodyLimits,
    /// Chunks fed while nobody was waiting.
    queue: VecDeque<Bytes>,
    /// Readers waiting for the next delivery, oldest first.
    waiters: VecDeque<oneshot::Sender<Delivery>>,
    /// Set once `End` or an error was fed, or the body was discarded.
    terminal: Option<Terminal>,
    /// Total bytes fed so far. Never decreases.
    size_fed: usize,
    /// Bytes queued but not yet consumed.
    current_size: usize,
    /// Held while `current_size > max_streaming_buffer_size`.
    gate: Option<oneshot::Sender<()>>,
}

impl Shared {
    fn new(limits: BodyLimits) -> Self {
        Self {
            limits,
            queue: VecDeque::new(),
            waiters: VecDeque::new(),
            terminal: None,
            size_fed: 0,
            current_size: 0,
            gate: None,
        }
    }

    fn is_finished(&self) -> bool {
        self.terminal.is_some()
    }

    /// Apply one fed part. Returns a gate receiver when the writer must wait.
    fn feed(&mut self, part: BodyPart) -> Option<oneshot::Receiver<()>> {
        if self.is_finished() {
            return None;
        }

        match part {
            BodyPart::Chunk(chunk) => self.feed_chunk(chunk),
            BodyPart::End => {
                self.terminate(Terminal::End);
                None
            }
            BodyPart::Error(e) => {
                self.terminate(Terminal::Error(e));
                None
            }
        }
    }

    fn feed_chunk(&mut self, chunk: Bytes) -> Option<oneshot::Receiver<()>> {
        self.size_fed = self.size_fed.saturating_add(chunk.len());
        if self.size_fed > self.limits.max_size {
            tracing::debug!(
                size_fed = self.size_fed,
                max_size = self.limits.max_size,
                "Body exceeded maximum size"
            );
            metrics::record_payload_too_large();
            // Nothing fed so far is useful to the reader any more.
            self.current_size = 0;
            self.queue.clear();
            self.terminate(Terminal::Error(BodyError::PayloadTooLarge));
            return None;
        }

        let mut chunk = chunk;
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.send(Ok(Some(chunk))) {
                Ok(()) => return None,
                // The reader gave up waiting; hand the chunk to the next one.
                Err(returned) => {
                    chunk = match returned {
                        Ok(Some(c)) => c,
                        _ => return None,
                    }
                }
            }
        }

        self.current_size += chunk.len();
        self.queue.push_back(chunk);

        if self.current_size > self.limits.max_streaming_buffer_size {
            let (tx, rx) = oneshot::channel();
            self.gate = Some(tx);
            Some(rx)
        } else {
            None
        }
    }

    /// Mark the body finished and wake everybody that could otherwise hang.
    fn terminate(&mut self, terminal: Terminal) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(terminal.delivery());
        }
        self.terminal = Some(terminal);
        self.release_gate();
    }

    fn release_gate(&mut self) {
        if let Some(gate) = self.gate.take() {
            let _ = gate.send(());
        }
    }

    /// Take the next delivery if one is ready without waiting.
    fn try_consume(&mut self) -> Option<Delivery> {
        if let Some(chunk) = self.queue.pop_front() {
            self.current_size -= chunk.len();
            if self.current_size <= self.limits.max_streaming_buffer_size {
                self.release_gate();
            }
            return Some(Ok(Some(chunk)));
        }
        self.terminal.as_ref().map(Terminal::delivery)
    }

    /// Put back a chunk that was handed to a reader who stopped waiting.
    fn requeue(&mut self, chunk: Bytes) {
        self.current_size += chunk.len();
        self.queue.push_front(chunk);
    }

    fn discard(&mut self) {
        self.queue.clear();
        self.current_size = 0;
        if !self.is_finished() {
            self.terminate(Terminal::End);
        }
        self.release_gate();
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().expect("body queue mutex poisoned")
}

/// Producer side of a streamed body, owned by the transport.
#[derive(Debug)]
pub struct BodyWriter {
    shared: Arc<Mutex<Shared>>,
}

impl BodyWriter {
    /// Feed one part into the body.
    ///
    /// Parts fed after the body finished are ignored. Feeding a chunk that
    /// pushes the queue over `max_streaming_buffer_size` waits until the
    /// reader drains it back under the threshold or the body finishes.
    pub async fn feed(&self, part: BodyPart) {
        let gate = lock(&self.shared).feed(part);
        if let Some(gate) = gate {
            // A dropped sender means the body finished; either way we may continue.
            let _ = gate.await;
        }
    }

    /// Feed a chunk of bytes.
    pub async fn feed_chunk(&self, chunk: Bytes) {
        self.feed(BodyPart::Chunk(chunk)).await;
    }

    /// End the body normally.
    pub fn finish(&self) {
        lock(&self.shared).feed(BodyPart::End);
    }

    /// End the body with an error.
    pub fn fail(&self, error: BodyError) {
        lock(&self.shared).feed(BodyPart::Error(error));
    }

    /// Fail the body because the inbound stream closed.
    pub fn cancel(&self) {
        self.fail(BodyError::Cancelled);
    }

    /// Whether the body has ended, failed or been discarded by the reader.
    pub fn is_finished(&self) -> bool {
        lock(&self.shared).is_finished()
    }

    /// Total bytes fed so far.
    pub fn size_fed(&self) -> usize {
        lock(&self.shared).size_fed
    }
}

impl Drop for BodyWriter {
    fn drop(&mut self) {
        let mut shared = lock(&self.shared);
        if !shared.is_finished() {
            shared.terminate(Terminal::Error(BodyError::Transport(
                "body ended unexpectedly".to_string(),
            )));
        }
    }
}

/// Consumer side of a streamed body.
///
/// Dropping it discards whatever is left, so an unread body never stalls the
/// connection feeding it.
#[derive(Debug)]
pub struct StreamedBody {
    shared: Arc<Mutex<Shared>>,
}

impl StreamedBody {
    /// Create a connected writer/body pair.
    pub fn channel(limits: BodyLimits) -> (BodyWriter, StreamedBody) {
        let shared = Arc::new(Mutex::new(Shared::new(limits)));
        (
            BodyWriter {
                shared: Arc::clone(&shared),
            },
            StreamedBody { shared },
        )
    }

    /// Next chunk of the body, or `None` at the end.
    ///
    /// Cancel safe: a chunk delivered to a consume that is dropped before it
    /// completes is returned to the front of the queue.
    pub async fn consume(&mut self) -> Result<Option<Bytes>, BodyError> {
        let rx = {
            let mut shared = lock(&self.shared);
            if let Some(delivery) = shared.try_consume() {
                return delivery;
            }
            let (tx, rx) = oneshot::channel();
            shared.waiters.push_back(tx);
            rx
        };

        let mut pending = PendingConsume {
            shared: &self.shared,
            rx,
            done: false,
        };
        let delivery = (&mut pending.rx).await;
        pending.done = true;
        delivery.unwrap_or_else(|_| Err(BodyError::Transport("body writer went away".to_string())))
    }

    /// Read the whole body into one buffer, failing once it grows past `limit`.
    pub async fn collect(mut self, limit: usize) -> Result<Bytes, BodyError> {
        let mut first: Option<Bytes> = None;
        let mut buffer = BytesMut::new();

        while let Some(chunk) = self.consume().await? {
            let collected = first.as_ref().map_or(0, Bytes::len) + buffer.len();
            if collected + chunk.len() > limit {
                return Err(BodyError::PayloadTooLarge);
            }
            match first.take() {
                None if buffer.is_empty() => first = Some(chunk),
                Some(prev) => {
                    buffer.extend_from_slice(&prev);
                    buffer.extend_from_slice(&chunk);
                }
                None => buffer.extend_from_slice(&chunk),
            }
        }

        Ok(first.unwrap_or_else(|| buffer.freeze()))
    }

    /// Abandon the body: queued and future chunks are thrown away and the
    /// reader observes a normal end.
    pub fn discard(&self) {
        lock(&self.shared).discard();
    }

    /// Bytes currently buffered and not yet consumed.
    pub fn current_size(&self) -> usize {
        lock(&self.shared).current_size
    }

    /// Total bytes fed so far.
    pub fn size_fed(&self) -> usize {
        lock(&self.shared).size_fed
    }

    /// Adapt the body into a `Stream` of chunks that ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, BodyError>> + Send + 'static {
        futures_util::stream::unfold(Some(self), |body| async move {
            let mut body = body?;
            match body.consume().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(body))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

/// A registered waiter whose consume call has not completed yet.
struct PendingConsume<'a> {
    shared: &'a Mutex<Shared>,
    rx: oneshot::Receiver<Delivery>,
    done: bool,
}

impl Drop for PendingConsume<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        // Later feeds skip this waiter; anything already sent is recovered.
        self.rx.close();
        if let Ok(Ok(Some(chunk))) = self.rx.try_recv() {
            lock(self.shared).requeue(chunk);
        }
    }
}

impl Drop for StreamedBody {
    fn drop(&mut self) {
        lock(&self.shared).discard();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::time::Duration;

    fn limits(max_size: usize, max_streaming_buffer_size: usize) -> BodyLimits {
        BodyLimits {
            max_size,
            max_streaming_buffer_size,
        }
    }

    #[tokio::test]
    async fn chunks_are_delivered_in_order() {
        let (writer, mut body) = StreamedBody::channel(BodyLimits::default());
        writer.feed_chunk(Bytes::from_static(b"a")).await;
        writer.feed_chunk(Bytes::from_static(b"b")).await;
        writer.finish();

        assert_eq!(body.consume().await.unwrap(), Some(Bytes::from_static(b"a")));
        assert_eq!(body.consume().await.unwrap(), Some(Bytes::from_static(b"b")));
        assert_eq!(body.consume().await.unwrap(), None);
        assert_eq!(body.consume().await.unwrap(), None);
    }

    #[tokio::test]
    async fn waiting_consumer_is_resolved_by_feed() {
        let (writer, mut body) = StreamedBody::channel(BodyLimits::default());
        let reader = tokio::spawn(async move { body.consume().await });

        tokio::task::yield_now().await;
        writer.feed_chunk(Bytes::from_static(b"hello")).await;

        let chunk = reader.await.unwrap().unwrap();
        assert_eq!(chunk, Some(Bytes::from_static(b"hello")));
    }

    #[tokio::test]
    async fn abandoned_consume_keeps_its_chunk() {
        let (writer, mut body) = StreamedBody::channel(BodyLimits::default());
        {
            let consume = body.consume();
            tokio::pin!(consume);
            assert!(futures_util::poll!(consume.as_mut()).is_pending());
            writer.feed_chunk(Bytes::from_static(b"kept")).await;
        }
        writer.feed_chunk(Bytes::from_static(b"next")).await;
        writer.finish();

        assert_eq!(body.current_size(), 8);
        assert_eq!(body.consume().await, Ok(Some(Bytes::from_static(b"kept"))));
        assert_eq!(body.consume().await, Ok(Some(Bytes::from_static(b"next"))));
        assert_eq!(body.consume().await, Ok(None));
    }

    #[tokio::test]
    async fn timed_out_consume_does_not_swallow_later_chunks() {
        let (writer, mut body) = StreamedBody::channel(BodyLimits::default());
        let waited = tokio::time::timeout(Duration::from_millis(5), body.consume()).await;
        assert!(waited.is_err());

        writer.feed_chunk(Bytes::from_static(b"late")).await;
        assert_eq!(body.consume().await, Ok(Some(Bytes::from_static(b"late"))));
    }

    #[tokio::test]
    async fn third_feed_waits_for_a_consume() {
        let (writer, mut body) = StreamedBody::channel(limits(1024, 10));
        let writer = Arc::new(writer);

        writer.feed_chunk(Bytes::from(vec![0u8; 5])).await;
        writer.feed_chunk(Bytes::from(vec![1u8; 5])).await;
        assert_eq!(body.current_size(), 10);

        let feeder = {
            let writer = Arc::clone(&writer);
            tokio::spawn(async move { writer.feed_chunk(Bytes::from(vec![2u8; 5])).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!feeder.is_finished(), "feed must be gated while over the threshold");
        assert_eq!(body.current_size(), 15);

        body.consume().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), feeder)
            .await
            .expect("feed released after consume")
            .unwrap();
        assert_eq!(body.current_size(), 10);
    }

    #[tokio::test]
    async fn oversized_body_fails_once_and_ignores_later_chunks() {
        let (writer, mut body) = StreamedBody::channel(limits(100, 1024));
        writer.feed_chunk(Bytes::from(vec![0u8; 60])).await;
        writer.feed_chunk(Bytes::from(vec![0u8; 41])).await;
        writer.feed_chunk(Bytes::from(vec![0u8; 10])).await;

        assert!(writer.is_finished());
        assert_eq!(body.consume().await, Err(BodyError::PayloadTooLarge));
        assert_eq!(body.current_size(), 0);
        assert_eq!(writer.size_fed(), 101);
    }

    #[tokio::test]
    async fn error_is_replayed_to_every_waiter() {
        let (writer, body) = StreamedBody::channel(BodyLimits::default());
        let body = Arc::new(tokio::sync::Mutex::new(body));

        let first = {
            let body = Arc::clone(&body);
            tokio::spawn(async move { body.lock().await.consume().await })
        };
        tokio::task::yield_now().await;
        writer.fail(BodyError::Transport("reset".into()));

        let expected = Err(BodyError::Transport("reset".into()));
        assert_eq!(first.await.unwrap(), expected);
        assert_eq!(body.lock().await.consume().await, expected);
    }

    #[tokio::test]
    async fn discard_before_data_looks_like_a_normal_end() {
        let (writer, mut body) = StreamedBody::channel(BodyLimits::default());
        body.discard();
        body.discard();

        writer.feed_chunk(Bytes::from_static(b"late")).await;
        writer.feed_chunk(Bytes::from_static(b"frames")).await;

        assert_eq!(body.current_size(), 0);
        assert_eq!(body.consume().await, Ok(None));
    }

    #[tokio::test]
    async fn dropping_the_reader_releases_a_blocked_writer() {
        let (writer, body) = StreamedBody::channel(limits(1024, 4));
        let feeder = tokio::spawn(async move {
            writer.feed_chunk(Bytes::from(vec![0u8; 8])).await;
            writer
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(body);

        let writer = tokio::time::timeout(Duration::from_secs(1), feeder)
            .await
            .expect("writer released")
            .unwrap();
        assert!(writer.is_finished());
    }

    #[tokio::test]
    async fn cancel_releases_the_gate() {
        let (writer, mut body) = StreamedBody::channel(limits(1024, 4));
        let writer = Arc::new(writer);
        let feeder = {
            let writer = Arc::clone(&writer);
            tokio::spawn(async move { writer.feed_chunk(Bytes::from(vec![0u8; 8])).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        writer.cancel();
        tokio::time::timeout(Duration::from_secs(1), feeder)
            .await
            .expect("gate released on cancel")
            .unwrap();

        // The chunk fed before cancellation is still readable, then the error.
        assert_eq!(body.consume().await.unwrap().map(|c| c.len()), Some(8));
        assert_eq!(body.consume().await, Err(BodyError::Cancelled));
    }

    #[tokio::test]
    async fn collect_enforces_a_tighter_limit() {
        let (writer, body) = StreamedBody::channel(limits(1024, 1024));
        writer.feed_chunk(Bytes::from(vec![0u8; 30])).await;
        writer.feed_chunk(Bytes::from(vec![0u8; 30])).await;
        writer.finish();

        assert_eq!(body.collect(50).await, Err(BodyError::PayloadTooLarge));
    }

    #[tokio::test]
    async fn collect_concatenates_chunks() {
        let (writer, body) = StreamedBody::channel(BodyLimits::default());
        writer.feed_chunk(Bytes::from_static(b"hello ")).await;
        writer.feed_chunk(Bytes::from_static(b"world")).await;
        writer.finish();

        assert_eq!(body.collect(64).await.unwrap(), Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn dropped_writer_fails_the_body() {
        let (writer, mut body) = StreamedBody::channel(BodyLimits::default());
        drop(writer);
        assert!(matches!(body.consume().await, Err(BodyError::Transport(_))));
    }

    #[tokio::test]
    async fn stream_adapter_stops_after_error() {
        let (writer, body) = StreamedBody::channel(BodyLimits::default());
        writer.feed_chunk(Bytes::from_static(b"x")).await;
        writer.fail(BodyError::Cancelled);

        let items: Vec<_> = body.into_stream().collect().await;
        assert_eq!(items, vec![Ok(Bytes::from_static(b"x")), Err(BodyError::Cancelled)]);
    }
}
