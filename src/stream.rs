//! Streaming response handle and chunk aggregation.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ClientError;
use crate::model::{
    ChatMessage, Choice, CompletionResponse, FinishReason, MessageContent, Role, StreamChunk, ToolCall,
    Usage,
};
use crate::registry::Registration;

struct LiveStream {
    chunks: BoxStream<'static, Result<StreamChunk, ClientError>>,
    cancel: CancellationToken,
    registration: Registration,
}

enum Step {
    Cancelled,
    Next(Option<Result<StreamChunk, ClientError>>),
}

/// Incremental chat response returned by [`crate::AssistClient::stream_chat`].
///
/// Chunks are yielded in arrival order. Cancellation is checked before every
/// item; once it fires the stream yields a single `Aborted` error and ends.
/// Dropping the stream early closes the underlying connection and
/// unregisters the request.
pub struct ChatStream {
    request_id: String,
    inner: BoxStream<'static, Result<StreamChunk, ClientError>>,
}

impl ChatStream {
    pub(crate) fn new<S>(chunks: S, cancel: CancellationToken, registration: Registration) -> Self
    where
        S: Stream<Item = Result<StreamChunk, ClientError>> + Send + 'static,
    {
        let request_id = registration.id().to_string();
        let live = LiveStream {
            chunks: chunks.boxed(),
            cancel,
            registration,
        };

        let inner = stream::unfold(Some(live), |state| async move {
            let mut live = state?;
            let step = if live.cancel.is_cancelled() {
                Step::Cancelled
            } else {
                tokio::select! {
                    biased;
                    _ = live.cancel.cancelled() => Step::Cancelled,
                    next = live.chunks.next() => Step::Next(next),
                }
            };

            match step {
                Step::Next(Some(Ok(chunk))) if !live.cancel.is_cancelled() => Some((Ok(chunk), Some(live))),
                Step::Next(Some(Ok(_))) | Step::Cancelled => {
                    debug!(request_id = live.registration.id(), "Stream aborted");
                    Some((Err(ClientError::aborted("stream cancelled")), None))
                }
                Step::Next(Some(Err(error))) => Some((Err(error), None)),
                Step::Next(None) => None,
            }
        })
        .boxed();

        Self { request_id, inner }
    }

    /// Identifier to pass to [`crate::AssistClient::cancel_request`].
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Drain the stream and fold it into a single response.
    pub async fn collect_response(mut self) -> Result<CompletionResponse, ClientError> {
        let mut accumulator = ChunkAccumulator::new();
        while let Some(chunk) = self.next().await {
            accumulator.push(&chunk?);
        }
        Ok(accumulator.finish())
    }
}

impl Stream for ChatStream {
    type Item = Result<StreamChunk, ClientError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for ChatStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStream")
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct ChoiceState {
    role: Option<Role>,
    content: String,
    tool_calls: BTreeMap<u32, ToolCall>,
    finish_reason: Option<FinishReason>,
}

/// Folds stream chunks into a [`CompletionResponse`].
///
/// Content is concatenated per choice. Tool-call fragments are joined by
/// their index: id and name are taken from the first fragment that has
/// them, arguments are appended in order.
#[derive(Debug, Default)]
pub struct ChunkAccumulator {
    id: String,
    created: u64,
    model: String,
    choices: BTreeMap<u32, ChoiceState>,
    usage: Option<Usage>,
}

impl ChunkAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &StreamChunk) {
        if self.id.is_empty() {
            self.id = chunk.id.clone();
            self.created = chunk.created;
        }
        if self.model.is_empty() {
            self.model = chunk.model.clone();
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }

        for choice in &chunk.choices {
            let state = self.choices.entry(choice.index).or_default();
            if state.role.is_none() {
                state.role = choice.delta.role;
            }
            if let Some(content) = &choice.delta.content {
                state.content.push_str(content);
            }
            for fragment in choice.delta.tool_calls.iter().flatten() {
                let call = state
                    .tool_calls
                    .entry(fragment.index)
                    .or_insert_with(|| ToolCall::new("", "", ""));
                if let Some(id) = fragment.id.as_ref().filter(|_| call.id.is_empty()) {
                    call.id = id.clone();
                }
                if let Some(function) = &fragment.function {
                    if let Some(name) = function.name.as_ref().filter(|_| call.function.name.is_empty()) {
                        call.function.name = name.clone();
                    }
                    if let Some(arguments) = &function.arguments {
                        call.function.arguments.push_str(arguments);
                    }
                }
            }
            if choice.finish_reason.is_some() {
                state.finish_reason = choice.finish_reason.clone();
            }
        }
    }

    pub fn finish(self) -> CompletionResponse {
        let choices = self
            .choices
            .into_iter()
            .map(|(index, state)| {
                let tool_calls: Vec<ToolCall> = state.tool_calls.into_values().collect();
                Choice {
                    index,
                    message: ChatMessage {
                        role: state.role.unwrap_or(Role::Assistant),
                        content: MessageContent::Text(state.content),
                        name: None,
                        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                        tool_call_id: None,
                    },
                    finish_reason: state.finish_reason,
                }
            })
            .collect();

        CompletionResponse {
            id: self.id,
            created: self.created,
            model: self.model,
            choices,
            usage: self.usage.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RequestRegistry;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn chunk(value: serde_json::Value) -> StreamChunk {
        serde_json::from_value(value).unwrap()
    }

    fn text_chunk(content: &str, finish: Option<&str>) -> StreamChunk {
        chunk(json!({
            "id": "gen-1",
            "model": "m",
            "choices": [{"index": 0, "delta": {"content": content}, "finish_reason": finish}]
        }))
    }

    fn handle(
        chunks: Vec<Result<StreamChunk, ClientError>>,
        registry: &Arc<RequestRegistry>,
        cancel: CancellationToken,
    ) -> ChatStream {
        let registration = Registration::new(registry.clone(), "req-1".into(), cancel.clone());
        ChatStream::new(stream::iter(chunks), cancel, registration)
    }

    #[tokio::test]
    async fn test_stream_passes_chunks_and_cleans_up() {
        let registry = Arc::new(RequestRegistry::new());
        let mut stream = handle(
            vec![Ok(text_chunk("a", None)), Ok(text_chunk("b", Some("stop")))],
            &registry,
            CancellationToken::new(),
        );
        assert_eq!(stream.request_id(), "req-1");
        assert_eq!(registry.count(), 1);

        assert_eq!(stream.next().await.unwrap().unwrap().content(), Some("a"));
        assert_eq!(stream.next().await.unwrap().unwrap().content(), Some("b"));
        assert!(stream.next().await.is_none());
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_yields_aborted_once() {
        let registry = Arc::new(RequestRegistry::new());
        let cancel = CancellationToken::new();
        let mut stream = handle(
            vec![Ok(text_chunk("a", None)), Ok(text_chunk("b", None))],
            &registry,
            cancel.clone(),
        );

        assert!(stream.next().await.unwrap().is_ok());
        cancel.cancel();
        let error = stream.next().await.unwrap().unwrap_err();
        assert!(error.is_aborted());
        assert!(stream.next().await.is_none());
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_dropping_stream_unregisters() {
        let registry = Arc::new(RequestRegistry::new());
        let stream = handle(vec![Ok(text_chunk("a", None))], &registry, CancellationToken::new());
        assert_eq!(registry.count(), 1);
        drop(stream);
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_error_ends_stream() {
        let registry = Arc::new(RequestRegistry::new());
        let mut stream = handle(
            vec![
                Err(ClientError::Transport("reset".into())),
                Ok(text_chunk("never", None)),
            ],
            &registry,
            CancellationToken::new(),
        );
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_accumulate_text() {
        let mut acc = ChunkAccumulator::new();
        acc.push(&chunk(json!({
            "id": "gen-1", "created": 7, "model": "m",
            "choices": [{"index": 0, "delta": {"role": "assistant", "content": "Hel"}, "finish_reason": null}]
        })));
        acc.push(&text_chunk("lo", None));
        acc.push(&chunk(json!({
            "id": "gen-1", "model": "m",
            "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
        })));

        let response = acc.finish();
        assert_eq!(response.id, "gen-1");
        assert_eq!(response.created, 7);
        assert_eq!(response.text().as_deref(), Some("Hello"));
        assert_eq!(response.choices[0].finish_reason, Some(FinishReason::Stop));
        assert_eq!(response.usage.total_tokens, 5);
    }

    #[test]
    fn test_accumulate_tool_calls() {
        let mut acc = ChunkAccumulator::new();
        acc.push(&chunk(json!({
            "id": "gen-2", "model": "m",
            "choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "id": "call_1", "type": "function", "function": {"name": "search", "arguments": "{\"q\":"}}
            ]}}]
        })));
        acc.push(&chunk(json!({
            "id": "gen-2", "model": "m",
            "choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "\"rust\"}"}}
            ]}, "finish_reason": "tool_calls"}]
        })));

        let response = acc.finish();
        assert_eq!(response.tool_calls(), &[ToolCall::new("call_1", "search", "{\"q\":\"rust\"}")]);
        assert_eq!(response.usage, Usage::default());
    }
}
