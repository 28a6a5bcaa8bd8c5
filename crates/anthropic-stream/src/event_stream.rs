//! The public chunk stream.
//!
//! An [`EventStream`] does nothing until it is first polled. The first poll
//! spawns a producer task that sends the request, frames and decodes the
//! body, and pushes chunks into a bounded channel the consumer reads from.
//!
//! When the channel is full the producer waits and stops reading the body,
//! so the server is throttled by TCP flow control instead of chunks being
//! dropped or the queue growing.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::StreamExt as _;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument as _, debug, warn};

use crate::chunk::Chunk;
use crate::decode::decode_frame;
use crate::errors::ClientError;
use crate::sse::FrameExtractor;
use crate::transport::{ByteStream, HttpRequest, Transport};

/// Upper bound on the error body read after a non-success status.
const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

type Item = Result<Chunk, ClientError>;

/// Lifecycle of one stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    /// Built but never polled.
    NotStarted,
    /// Request sent, waiting for the status line.
    Connecting,
    /// Success status received; frames are flowing.
    Streaming,
    /// The body ended without a transport error.
    Completed,
    /// Non-success status, transport failure or cancellation.
    Failed,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Handle used to cancel a stream from another task.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// Chunks already queued are still delivered, then the stream yields
    /// `ClientError::Cancelled` and ends.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }
}

struct Launch {
    transport: Arc<dyn Transport>,
    request: HttpRequest,
    state_tx: watch::Sender<StreamState>,
    abort_rx: watch::Receiver<bool>,
    capacity: usize,
}

/// Single-pass, cancellable stream of decoded [`Chunk`]s.
///
/// Items are `Ok(chunk)` for every decoded event, including recoverable
/// [`Chunk::Error`] values. An `Err` item is terminal: it reports a
/// non-success status, a transport failure or a cancellation, and nothing
/// follows it. Dropping the stream aborts the request.
pub struct EventStream {
    request_id: uuid::Uuid,
    launch: Option<Launch>,
    rx: Option<mpsc::Receiver<Item>>,
    state_rx: watch::Receiver<StreamState>,
    abort_handle: AbortHandle,
    task: Option<JoinHandle<()>>,
}

impl EventStream {
    /// Wraps a prepared request. The request is sent on the first poll.
    ///
    /// `buffer_capacity` bounds the chunk queue; zero is treated as one.
    pub fn new(transport: Arc<dyn Transport>, request: HttpRequest, buffer_capacity: usize) -> Self {
        let (state_tx, state_rx) = watch::channel(StreamState::NotStarted);
        let (abort_tx, abort_rx) = watch::channel(false);
        Self {
            request_id: uuid::Uuid::new_v4(),
            launch: Some(Launch {
                transport,
                request,
                state_tx,
                abort_rx,
                capacity: buffer_capacity.max(1),
            }),
            rx: None,
            state_rx,
            abort_handle: AbortHandle { tx: abort_tx },
            task: None,
        }
    }

    /// Id attached to this stream's log records.
    pub fn request_id(&self) -> uuid::Uuid {
        self.request_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StreamState {
        *self.state_rx.borrow()
    }

    /// Returns a handle that can cancel the stream.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    /// Waits for the next item. Returns `None` once the stream has ended.
    pub async fn next_chunk(&mut self) -> Option<Item> {
        self.next().await
    }

    fn start(&mut self, launch: Launch) {
        let (tx, rx) = mpsc::channel(launch.capacity);
        let span = tracing::debug_span!("event_stream", request_id = %self.request_id);
        self.task = Some(tokio::spawn(produce(launch, tx).instrument(span)));
        self.rx = Some(rx);
    }
}

impl futures::Stream for EventStream {
    type Item = Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(launch) = this.launch.take() {
            this.start(launch);
        }
        match this.rx.as_mut() {
            Some(rx) => rx.poll_recv(cx),
            None => Poll::Ready(None),
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Producer {
    tx: mpsc::Sender<Item>,
    state_tx: watch::Sender<StreamState>,
}

enum Finish {
    Completed,
    ConsumerGone,
}

impl Producer {
    fn transition(&self, next: StreamState) {
        self.state_tx.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

async fn produce(launch: Launch, tx: mpsc::Sender<Item>) {
    let Launch {
        transport,
        request,
        state_tx,
        mut abort_rx,
        ..
    } = launch;
    let producer = Producer { tx, state_tx };

    let outcome = tokio::select! {
        biased;
        _ = aborted(&mut abort_rx) => Err(ClientError::Cancelled),
        result = pump(transport.as_ref(), request, &producer) => result,
    };

    match outcome {
        Ok(Finish::Completed) => producer.transition(StreamState::Completed),
        Ok(Finish::ConsumerGone) => {
            debug!("consumer dropped the stream");
            producer.transition(StreamState::Failed);
        }
        Err(err) => {
            debug!(error = %err, "stream failed");
            producer.transition(StreamState::Failed);
            let _ = producer.tx.send(Err(err)).await;
        }
    }
}

async fn aborted(rx: &mut watch::Receiver<bool>) {
    let closed = rx.wait_for(|aborted| *aborted).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

async fn pump(
    transport: &dyn Transport,
    request: HttpRequest,
    producer: &Producer,
) -> Result<Finish, ClientError> {
    producer.transition(StreamState::Connecting);
    debug!(url = %request.url, "opening stream");
    let response = transport.send(request).await?;
    if !response.is_success() {
        return Err(status_error(response.status, response.body).await);
    }
    producer.transition(StreamState::Streaming);

    let mut body = response.body;
    let mut extractor = FrameExtractor::default();
    let mut delivered = 0_u64;
    while let Some(next) = body.next().await {
        let bytes = next?;
        extractor.push(&bytes);
        while let Some(frame) = extractor.next_frame() {
            let Some(chunk) = decode_frame(&frame) else {
                continue;
            };
            if let Chunk::Error(err) = &chunk {
                warn!(kind = %err.kind, message = %err.message, "recoverable stream error");
            }
            if producer.tx.send(Ok(chunk)).await.is_err() {
                return Ok(Finish::ConsumerGone);
            }
            delivered = delivered.saturating_add(1);
        }
    }
    if extractor.buffered_len() > 0 {
        debug!(
            bytes = extractor.buffered_len(),
            "discarding unterminated trailing frame"
        );
    }
    debug!(chunks = delivered, "stream completed");
    Ok(Finish::Completed)
}

#[derive(serde::Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(serde::Deserialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

async fn status_error(status: u16, mut body: ByteStream) -> ClientError {
    let mut raw = Vec::new();
    while raw.len() < MAX_ERROR_BODY_BYTES {
        match body.next().await {
            Some(Ok(bytes)) => raw.extend_from_slice(&bytes),
            Some(Err(e)) => {
                debug!(error = %e, "failed to read error body");
                break;
            }
            None => break,
        }
    }
    raw.truncate(MAX_ERROR_BODY_BYTES);
    let text = String::from_utf8_lossy(&raw);

    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&text) {
        return ClientError::Status {
            status,
            error_type: Some(envelope.error.error_type),
            message: envelope.error.message,
        };
    }
    let trimmed = text.trim();
    let message = if trimmed.is_empty() {
        format!("HTTP {status}")
    } else {
        trimmed.chars().take(500).collect()
    };
    ClientError::Status {
        status,
        error_type: None,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ErrorKind;
    use crate::errors::TransportError;
    use crate::transport::TransportResponse;
    use futures::stream;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    const SCENARIO: [&str; 7] = [
        r#"{"type":"message_start","message":{"id":"msg_1","type":"message","role":"assistant","content":[],"model":"claude-test","stop_reason":null,"stop_sequence":null,"usage":{"input_tokens":10,"output_tokens":1}}}"#,
        r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
        r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#,
        r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":" world"}}"#,
        r#"{"type":"message_delta","delta":{"stop_reason":"end_turn","stop_sequence":null},"usage":{"output_tokens":2}}"#,
        r#"{"type":"content_block_stop","index":0}"#,
        r#"{"type":"message_stop"}"#,
    ];

    fn sse_body(payloads: &[&str], delimiter: &str) -> Vec<u8> {
        let mut out = String::new();
        for payload in payloads {
            let name = serde_json::from_str::<serde_json::Value>(payload)
                .ok()
                .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(str::to_owned))
                .unwrap_or_else(|| "message".to_string());
            let line_end = &delimiter[..delimiter.len() / 2];
            out.push_str(&format!("event: {name}{line_end}data: {payload}{delimiter}"));
        }
        out.into_bytes()
    }

    #[derive(Default, Clone)]
    struct Probe {
        calls: Arc<AtomicUsize>,
        pulled: Arc<AtomicUsize>,
        cancelled: Arc<AtomicBool>,
    }

    struct MockTransport {
        status: u16,
        pieces: Vec<Result<Vec<u8>, TransportError>>,
        hold_open: bool,
        send_error: Option<TransportError>,
        probe: Probe,
    }

    impl MockTransport {
        fn ok(pieces: Vec<Result<Vec<u8>, TransportError>>) -> Self {
            Self {
                status: 200,
                pieces,
                hold_open: false,
                send_error: None,
                probe: Probe::default(),
            }
        }
    }

    /// Body stream that records whether it was dropped before finishing.
    struct RecordingBody {
        inner: ByteStream,
        probe: Probe,
        finished: bool,
    }

    impl futures::Stream for RecordingBody {
        type Item = Result<bytes::Bytes, TransportError>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            let polled = self.inner.poll_next_unpin(cx);
            match &polled {
                Poll::Ready(Some(_)) => {
                    self.probe.pulled.fetch_add(1, Ordering::SeqCst);
                }
                Poll::Ready(None) => self.finished = true,
                Poll::Pending => {}
            }
            polled
        }
    }

    impl Drop for RecordingBody {
        fn drop(&mut self) {
            if !self.finished {
                self.probe.cancelled.store(true, Ordering::SeqCst);
            }
        }
    }

    #[async_trait::async_trait]
    impl Transport for MockTransport {
        async fn send(&self, _request: HttpRequest) -> Result<TransportResponse, TransportError> {
            self.probe.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = &self.send_error {
                return Err(err.clone());
            }
            let pieces = self
                .pieces
                .clone()
                .into_iter()
                .map(|piece| piece.map(bytes::Bytes::from));
            let inner: ByteStream = if self.hold_open {
                Box::pin(stream::iter(pieces).chain(stream::pending()))
            } else {
                Box::pin(stream::iter(pieces))
            };
            Ok(TransportResponse {
                status: self.status,
                body: Box::pin(RecordingBody {
                    inner,
                    probe: self.probe.clone(),
                    finished: false,
                }),
            })
        }
    }

    fn request() -> HttpRequest {
        HttpRequest::post_json("http://mock/v1/messages", &serde_json::json!({"stream": true}))
            .expect("request")
    }

    fn event_stream(transport: MockTransport, capacity: usize) -> (EventStream, Probe) {
        let probe = transport.probe.clone();
        (EventStream::new(Arc::new(transport), request(), capacity), probe)
    }

    async fn collect(mut stream: EventStream) -> (Vec<Chunk>, Option<ClientError>) {
        let mut chunks = Vec::new();
        let mut error = None;
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => chunks.push(chunk),
                Err(err) => {
                    error = Some(err);
                    assert!(stream.next().await.is_none(), "nothing may follow an error");
                    break;
                }
            }
        }
        (chunks, error)
    }

    async fn wait_until(flag: &AtomicBool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !flag.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("flag was not set in time");
    }

    #[tokio::test]
    async fn end_to_end_scenario_yields_seven_chunks_in_order() {
        let body = sse_body(&SCENARIO, "\n\n");
        let (mut stream, _) = event_stream(MockTransport::ok(vec![Ok(body)]), 10);

        let mut chunks = Vec::new();
        while let Some(item) = stream.next().await {
            chunks.push(item.expect("no transport error"));
        }
        let names: Vec<_> = chunks.iter().map(Chunk::type_name).collect();
        assert_eq!(
            names,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "message_delta",
                "content_block_stop",
                "message_stop",
            ]
        );
        let text: String = chunks.iter().filter_map(Chunk::text_delta).collect();
        assert_eq!(text, "Hello world");
        assert_eq!(stream.state(), StreamState::Completed);
    }

    #[tokio::test]
    async fn byte_level_splits_and_crlf_framing_give_identical_chunks() {
        let (expected, _) = collect(event_stream(
            MockTransport::ok(vec![Ok(sse_body(&SCENARIO, "\n\n"))]),
            10,
        )
        .0)
        .await;

        let crlf = sse_body(&SCENARIO, "\r\n\r\n");
        let pieces = crlf.chunks(5).map(|piece| Ok(piece.to_vec())).collect();
        let (split, error) = collect(event_stream(MockTransport::ok(pieces), 10).0).await;

        assert!(error.is_none());
        assert_eq!(split, expected);
        assert_eq!(split.len(), 7);
    }

    #[tokio::test]
    async fn request_is_not_sent_before_first_poll() {
        let mut transport = MockTransport::ok(vec![Ok(sse_body(&SCENARIO[..1], "\n\n"))]);
        transport.hold_open = true;
        let (mut stream, probe) = event_stream(transport, 10);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
        assert_eq!(stream.state(), StreamState::NotStarted);

        let first = stream.next().await.expect("item").expect("chunk");
        assert_eq!(first.type_name(), "message_start");
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert_eq!(stream.state(), StreamState::Streaming);
    }

    #[tokio::test]
    async fn non_success_status_yields_no_chunks() {
        for status in [429_u16, 500] {
            let mut transport = MockTransport::ok(vec![Ok(sse_body(&SCENARIO, "\n\n"))]);
            transport.status = status;
            let (stream, _) = event_stream(transport, 10);
            let (chunks, error) = collect(stream).await;
            assert!(chunks.is_empty(), "status {status} must not yield chunks");
            assert_eq!(error.and_then(|e| e.status()), Some(status));
        }
    }

    #[tokio::test]
    async fn status_error_surfaces_server_error_envelope() {
        let mut transport = MockTransport::ok(vec![Ok(br#"{"type":"error","error":{"type":"rate_limit_error","message":"Number of requests has exceeded your rate limit"}}"#.to_vec())]);
        transport.status = 429;
        let (mut stream, _) = event_stream(transport, 10);
        let err = stream.next().await.expect("item").expect_err("status error");
        assert_eq!(
            err,
            ClientError::Status {
                status: 429,
                error_type: Some("rate_limit_error".into()),
                message: "Number of requests has exceeded your rate limit".into(),
            }
        );
        assert_eq!(stream.state(), StreamState::Failed);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn connect_failure_yields_single_transport_error() {
        let mut transport = MockTransport::ok(vec![Ok(sse_body(&SCENARIO, "\n\n"))]);
        transport.send_error = Some(TransportError::connect("connection refused"));
        let (mut stream, probe) = event_stream(transport, 10);

        let err = stream.next().await.expect("item").expect_err("connect error");
        assert_eq!(
            err,
            ClientError::Transport(TransportError::connect("connection refused"))
        );
        assert!(matches!(
            err,
            ClientError::Transport(TransportError::Connect { .. })
        ));
        assert!(stream.next().await.is_none());
        assert_eq!(stream.state(), StreamState::Failed);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert_eq!(probe.pulled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transport_error_arrives_after_buffered_chunks() {
        let body = sse_body(&SCENARIO[..3], "\n\n");
        let (stream, _) = event_stream(
            MockTransport::ok(vec![
                Ok(body),
                Err(TransportError::read("connection reset by peer")),
            ]),
            10,
        );
        let (chunks, error) = collect(stream).await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].text_delta(), Some("Hello"));
        assert_eq!(
            error,
            Some(ClientError::Transport(TransportError::read(
                "connection reset by peer"
            )))
        );
    }

    #[tokio::test]
    async fn malformed_and_unknown_events_do_not_stop_the_stream() {
        let body = [
            "event: message_start\ndata: ".to_string() + SCENARIO[0] + "\n\n",
            "event: ping\n\n".to_string(),
            "data: {\"type\":\"some_future_type\",\"foo\":1}\n\n".to_string(),
            "data: {\"type\":\"content_block_stop\"}\n\n".to_string(),
            "\n\n".to_string(),
            "data: {\"type\":\"message_stop\"}\n\n".to_string(),
        ]
        .concat();
        let (stream, _) = event_stream(MockTransport::ok(vec![Ok(body.into_bytes())]), 10);
        let (chunks, error) = collect(stream).await;

        assert!(error.is_none());
        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[1], Chunk::Ping);
        assert!(matches!(&chunks[2], Chunk::Error(e) if e.kind == ErrorKind::UnknownChunkType));
        assert!(matches!(&chunks[3], Chunk::Error(e) if e.kind == ErrorKind::Parsing));
        assert_eq!(chunks[4], Chunk::MessageStop);
    }

    #[tokio::test]
    async fn dropping_after_first_chunk_cancels_transport() {
        let mut transport = MockTransport::ok(vec![Ok(sse_body(&SCENARIO[..2], "\n\n"))]);
        transport.hold_open = true;
        let (mut stream, probe) = event_stream(transport, 10);

        let first = stream.next().await.expect("item").expect("chunk");
        assert_eq!(first.type_name(), "message_start");
        assert!(!probe.cancelled.load(Ordering::SeqCst));
        drop(stream);

        wait_until(&probe.cancelled).await;
    }

    #[tokio::test]
    async fn abort_handle_ends_stream_with_cancelled() {
        let mut transport = MockTransport::ok(vec![Ok(sse_body(&SCENARIO[..1], "\n\n"))]);
        transport.hold_open = true;
        let (mut stream, probe) = event_stream(transport, 10);
        let abort = stream.abort_handle();

        assert!(stream.next().await.expect("item").is_ok());
        abort.abort();

        let err = stream.next().await.expect("item").expect_err("cancelled");
        assert_eq!(err, ClientError::Cancelled);
        assert!(stream.next().await.is_none());
        assert_eq!(stream.state(), StreamState::Failed);
        wait_until(&probe.cancelled).await;
    }

    #[tokio::test]
    async fn abort_before_first_poll_never_yields_chunks() {
        let (mut stream, _) = event_stream(
            MockTransport::ok(vec![Ok(sse_body(&SCENARIO, "\n\n"))]),
            10,
        );
        stream.abort_handle().abort();
        let err = stream.next().await.expect("item").expect_err("cancelled");
        assert_eq!(err, ClientError::Cancelled);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn full_buffer_pauses_body_reads() {
        let pieces: Vec<_> = SCENARIO[..6]
            .iter()
            .map(|payload| Ok(sse_body(&[*payload], "\n\n")))
            .collect();
        let mut transport = MockTransport::ok(pieces);
        transport.hold_open = true;
        let (mut stream, probe) = event_stream(transport, 1);

        let first = stream.next().await.expect("item").expect("chunk");
        assert_eq!(first.type_name(), "message_start");
        tokio::time::sleep(Duration::from_millis(50)).await;
        let pulled = probe.pulled.load(Ordering::SeqCst);
        assert!(pulled <= 3, "producer read {pulled} pieces past a full buffer");

        let mut rest = Vec::new();
        for _ in 0..5 {
            rest.push(stream.next().await.expect("item").expect("chunk"));
        }
        let names: Vec<_> = rest.iter().map(Chunk::type_name).collect();
        assert_eq!(
            names,
            vec![
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "message_delta",
                "content_block_stop",
            ]
        );
    }

    #[tokio::test]
    async fn unterminated_trailing_frame_is_discarded() {
        let mut body = sse_body(&SCENARIO[..1], "\n\n");
        body.extend_from_slice(b"data: {\"type\":\"message_st");
        let (stream, _) = event_stream(MockTransport::ok(vec![Ok(body)]), 10);
        let (chunks, error) = collect(stream).await;
        assert_eq!(chunks.len(), 1);
        assert!(error.is_none());
    }
}
