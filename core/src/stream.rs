//! Consumer for the line-oriented event stream that carries assistant
//! replies.
//!
//! The reply body is a sequence of lines. Lines starting with `data: ` are
//! events; everything else (blank separators, keep-alives) is ignored. An
//! event payload of `[DONE]` ends the reply, a payload starting with
//! `[ERROR]` aborts it, and any other payload is one token of reply text.

use std::fmt::Display;
use std::sync::Arc;

use bytes::BytesMut;
use futures::Stream;
use futures::StreamExt;
use ragchat_backend_client::RagBackend;
use ragchat_protocol::ChatId;
use ragchat_protocol::SendMessageRequest;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use crate::error::RagChatErr;

pub const EVENT_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";
pub const ERROR_SENTINEL: &str = "[ERROR]";

/// Why a reply stream ended without completing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFailure {
    /// The request could not be made or the connection broke.
    Transport(String),
    /// The backend sent an `[ERROR]` event; holds the full payload.
    Protocol(String),
}

impl StreamFailure {
    pub fn reason(&self) -> &str {
        match self {
            StreamFailure::Transport(reason) | StreamFailure::Protocol(reason) => reason,
        }
    }
}

impl Display for StreamFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}

impl From<StreamFailure> for RagChatErr {
    fn from(failure: StreamFailure) -> Self {
        match failure {
            StreamFailure::Transport(reason) => RagChatErr::Transport(reason),
            StreamFailure::Protocol(payload) => RagChatErr::Protocol(payload),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Token(String),
    Completed,
    Failed(StreamFailure),
}

/// Receives the events of one reply stream.
///
/// For every stream, `on_token` is called once per token in arrival order,
/// followed by at most one of `on_complete` / `on_failure`. Nothing is
/// delivered once the stream has been cancelled.
pub trait StreamObserver: Send {
    fn on_token(&mut self, token: String);
    fn on_complete(&mut self);
    fn on_failure(&mut self, failure: StreamFailure);
}

impl StreamObserver for mpsc::UnboundedSender<StreamEvent> {
    fn on_token(&mut self, token: String) {
        let _ = self.send(StreamEvent::Token(token));
    }

    fn on_complete(&mut self) {
        let _ = self.send(StreamEvent::Completed);
    }

    fn on_failure(&mut self, failure: StreamFailure) {
        let _ = self.send(StreamEvent::Failed(failure));
    }
}

/// Classify one complete line. Returns `None` for lines that are not events.
pub fn parse_event_line(line: &str) -> Option<StreamEvent> {
    let payload = line.strip_prefix(EVENT_PREFIX)?;
    let event = if payload == DONE_SENTINEL {
        StreamEvent::Completed
    } else if payload.starts_with(ERROR_SENTINEL) {
        StreamEvent::Failed(StreamFailure::Protocol(payload.to_string()))
    } else {
        StreamEvent::Token(payload.to_string())
    };
    Some(event)
}

/// Accumulates raw body bytes and hands out complete lines.
///
/// Splitting happens on the `\n` byte before any UTF-8 decoding. That byte
/// never occurs inside a multi-byte sequence, so a character split across
/// two chunks is always reassembled before its line is decoded.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: BytesMut,
    /// Bytes at the front of `buf` already known not to contain `\n`.
    scanned: usize,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    pub fn next_line(&mut self) -> Option<String> {
        match self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            Some(offset) => {
                let end = self.scanned + offset;
                let line = self.buf.split_to(end + 1);
                self.scanned = 0;
                Some(decode_line(&line[..end]))
            }
            None => {
                self.scanned = self.buf.len();
                None
            }
        }
    }

    /// Take whatever is left once the body has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        self.scanned = 0;
        let rest = self.buf.split();
        Some(decode_line(&rest))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Enforces the delivery rules of [`StreamObserver`] in one place.
struct Delivery<O> {
    observer: O,
    cancel: CancellationToken,
    finished: bool,
}

impl<O: StreamObserver> Delivery<O> {
    fn new(observer: O, cancel: CancellationToken) -> Self {
        Self {
            observer,
            cancel,
            finished: false,
        }
    }

    /// Returns `false` once nothing more may be delivered.
    fn deliver(&mut self, event: StreamEvent) -> bool {
        if self.finished || self.cancel.is_cancelled() {
            self.finished = true;
            return false;
        }
        match event {
            StreamEvent::Token(token) => {
                self.observer.on_token(token);
                return true;
            }
            StreamEvent::Completed => self.observer.on_complete(),
            StreamEvent::Failed(failure) => self.observer.on_failure(failure),
        }
        self.finished = true;
        false
    }

    fn line(&mut self, line: &str) -> bool {
        trace!("stream line: {line}");
        match parse_event_line(line) {
            Some(event) => self.deliver(event),
            None => !self.finished,
        }
    }
}

/// Drive `observer` from a reply body until a terminal event, the end of the
/// body, a transport error, or cancellation.
pub async fn process_event_stream<S, B, E, O>(mut stream: S, observer: O, cancel: CancellationToken)
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
    O: StreamObserver,
{
    let mut delivery = Delivery::new(observer, cancel.clone());
    let mut lines = LineBuffer::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                trace!("reply stream cancelled");
                return;
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                lines.push(chunk.as_ref());
                while let Some(line) = lines.next_line() {
                    if !delivery.line(&line) {
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                debug!("reply stream error: {e}");
                delivery.deliver(StreamEvent::Failed(StreamFailure::Transport(e.to_string())));
                return;
            }
            None => {
                // A body may end without a final newline; its last line still counts.
                if let Some(line) = lines.finish()
                    && !delivery.line(&line)
                {
                    return;
                }
                delivery.deliver(StreamEvent::Completed);
                return;
            }
        }
    }
}

/// Handle to a reply stream started with [`start_stream`].
///
/// Dropping the handle leaves the stream running; only [`StreamHandle::cancel`]
/// stops it.
#[derive(Debug)]
pub struct StreamHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl StreamHandle {
    /// Abort the request and suppress every callback not yet delivered.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait until the stream task has exited.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Post `request` to `chat_id` and feed the reply into `observer` on a
/// background task.
pub fn start_stream<O>(
    backend: Arc<dyn RagBackend>,
    chat_id: ChatId,
    request: SendMessageRequest,
    observer: O,
) -> StreamHandle
where
    O: StreamObserver + 'static,
{
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    trace!(%chat_id, "reply request cancelled before response");
                    return;
                }
                response = backend.send_message(&chat_id, request) => response,
            };
            match response {
                Ok(body) => process_event_stream(body, observer, cancel).await,
                Err(err) => {
                    debug!(%chat_id, "failed to start reply stream: {err}");
                    let failure = StreamFailure::Transport(err.user_message());
                    Delivery::new(observer, cancel).deliver(StreamEvent::Failed(failure));
                }
            }
        }
    });
    StreamHandle { cancel, task }
}
