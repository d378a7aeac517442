//! Server-Sent Events decoding of streamed chat completions.
//!
//! SSE format:
//! ```text
//! : keep-alive comment
//!
//! data: {"id": "gen-1", "choices": [...]}
//!
//! data: [DONE]
//! ```
//!
//! [`decode_chunks`] turns a response body into a lazy stream of
//! [`StreamChunk`]s. The body is only polled when the consumer asks for the
//! next chunk, and it is dropped as soon as a terminal chunk, the `[DONE]`
//! sentinel, a transport error or the end of input is reached.

use std::pin::Pin;

use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::error::ClientError;
use crate::model::StreamChunk;

/// Parse an SSE line to extract the data portion.
///
/// # Example
/// ```
/// use assist_client::sse::parse_sse_line;
///
/// assert_eq!(parse_sse_line("data: {\"key\": 1}"), Some("{\"key\": 1}"));
/// assert_eq!(parse_sse_line("data:[DONE]"), Some("[DONE]"));
/// assert_eq!(parse_sse_line("event: ping"), None);
/// ```
pub fn parse_sse_line(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(|s| s.trim())
}

/// Check if an SSE data line indicates the stream is done.
///
/// # Example
/// ```
/// use assist_client::sse::is_done_marker;
///
/// assert!(is_done_marker("[DONE]"));
/// assert!(!is_done_marker("{\"data\": \"value\"}"));
/// ```
pub fn is_done_marker(data: &str) -> bool {
    data == "[DONE]"
}

/// What a single complete line of the event stream amounts to.
#[derive(Debug)]
pub enum Frame {
    /// Blank line, comment, or a non-data field.
    Ignore,
    /// The `[DONE]` sentinel.
    Done,
    Chunk(StreamChunk),
    /// Provider error reported inside the stream.
    Error(ClientError),
    /// Data that could not be decoded; carries the decode error.
    Malformed(String),
}

#[derive(Deserialize)]
struct StreamErrorBody {
    message: String,
    #[serde(default)]
    code: Option<Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DataFrame {
    Error { error: StreamErrorBody },
    Chunk(StreamChunk),
}

/// Classify one complete line.
pub fn parse_frame(line: &str) -> Frame {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return Frame::Ignore;
    }
    let Some(data) = parse_sse_line(line) else {
        return Frame::Ignore;
    };
    if is_done_marker(data) {
        return Frame::Done;
    }

    match serde_json::from_str::<DataFrame>(data) {
        Ok(DataFrame::Chunk(chunk)) => Frame::Chunk(chunk),
        Ok(DataFrame::Error { error }) => Frame::Error(stream_error(error)),
        Err(e) => Frame::Malformed(e.to_string()),
    }
}

fn stream_error(body: StreamErrorBody) -> ClientError {
    // Mid-stream errors arrive with a 200 response; a numeric code is the
    // real HTTP status.
    let status = body
        .code
        .as_ref()
        .and_then(Value::as_u64)
        .and_then(|c| u16::try_from(c).ok())
        .filter(|c| (400..600).contains(c))
        .unwrap_or(502);
    let code = body.code.map(|c| match c {
        Value::String(s) => s,
        other => other.to_string(),
    });
    ClientError::api(status, body.message, code)
}

/// Reassembles lines from arbitrarily split byte chunks.
///
/// Splitting happens on raw bytes, so a multi-byte character cut across two
/// reads is decoded intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
    closed: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Mark end of input; the held-back fragment becomes the final line.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn next_line(&mut self) -> Option<String> {
        if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            return Some(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        if self.closed && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            return Some(String::from_utf8_lossy(&line).into_owned());
        }
        None
    }
}

struct DecoderState<S> {
    body: Option<Pin<Box<S>>>,
    lines: LineBuffer,
}

impl<S> DecoderState<S> {
    /// Drop the body and any buffered text.
    fn release(&mut self) {
        self.body = None;
        self.lines = LineBuffer::new();
    }
}

/// Decode an SSE byte stream into chat chunks.
///
/// Malformed frames are logged and skipped. The stream ends after the first
/// terminal chunk, on `[DONE]`, or at end of input; a transport error or an
/// in-band provider error is yielded once and ends the stream.
pub fn decode_chunks<S, B, E>(body: S) -> impl Stream<Item = Result<StreamChunk, ClientError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<ClientError> + Send,
{
    let state = DecoderState {
        body: Some(Box::pin(body)),
        lines: LineBuffer::new(),
    };

    stream::unfold(state, |mut state| async move {
        loop {
            while let Some(line) = state.lines.next_line() {
                match parse_frame(&line) {
                    Frame::Ignore => continue,
                    Frame::Malformed(error) => {
                        warn!(error = %error, frame = %line.trim(), "Skipping malformed stream frame");
                        continue;
                    }
                    Frame::Done => {
                        state.release();
                        return None;
                    }
                    Frame::Error(error) => {
                        state.release();
                        return Some((Err(error), state));
                    }
                    Frame::Chunk(chunk) => {
                        if chunk.is_terminal() {
                            state.release();
                        }
                        return Some((Ok(chunk), state));
                    }
                }
            }

            let body = state.body.as_mut()?;
            match body.next().await {
                Some(Ok(bytes)) => state.lines.push(bytes.as_ref()),
                Some(Err(error)) => {
                    state.release();
                    return Some((Err(error.into()), state));
                }
                None => {
                    state.body = None;
                    state.lines.close();
                }
            }
        }
    })
}
