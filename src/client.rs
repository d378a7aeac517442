//! The chat client facade.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Response;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{fingerprint, ResponseCache};
use crate::error::ClientError;
use crate::http::{apply_headers, build_http_client, ensure_success};
use crate::model::{ChatMessage, CompletionResponse, ModelInfo};
use crate::options::{ClientOptions, EffectiveConfig, RequestConfig, SecretString};
use crate::pricing;
use crate::registry::{Registration, RequestRegistry};
use crate::retry::execute_with_retry;
use crate::sse::decode_chunks;
use crate::stream::ChatStream;

/// Where the models of a [`ModelCatalog`] came from.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogSource {
    /// Fetched from the provider's models endpoint.
    Remote,
    /// The endpoint failed; the built-in list was used instead.
    Fallback { reason: String },
}

#[derive(Debug, Clone)]
pub struct ModelCatalog {
    pub models: Vec<ModelInfo>,
    pub source: CatalogSource,
}

impl ModelCatalog {
    pub fn is_fallback(&self) -> bool {
        matches!(self.source, CatalogSource::Fallback { .. })
    }
}

#[derive(Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
    stream: bool,
}

impl<'a> ChatRequestBody<'a> {
    fn new(messages: &'a [ChatMessage], config: &'a EffectiveConfig, stream: bool) -> Self {
        Self {
            model: &config.model,
            messages,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            top_p: config.top_p,
            frequency_penalty: config.frequency_penalty,
            presence_penalty: config.presence_penalty,
            tools: config.tools.iter().map(|t| t.to_wire()).collect(),
            tool_choice: config.tool_choice.as_ref().map(|c| c.to_wire()),
            stream,
        }
    }
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelInfo>,
}

/// Client for a chat-completions endpoint speaking JSON and SSE.
///
/// Cloning is cheap; clones share the response cache and the registry of
/// active streams.
///
/// # Example
/// ```no_run
/// use assist_client::{AssistClient, ChatMessage, ClientOptions, RequestConfig};
///
/// # async fn run() -> Result<(), assist_client::ClientError> {
/// let client = AssistClient::new(ClientOptions::new("sk-..."))?;
/// let response = client
///     .chat(&[ChatMessage::user("Hello!")], &RequestConfig::default())
///     .await?;
/// println!("{}", response.text().unwrap_or_default());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AssistClient {
    http: reqwest::Client,
    options: Arc<ClientOptions>,
    cache: Arc<ResponseCache<CompletionResponse>>,
    registry: Arc<RequestRegistry>,
}

impl AssistClient {
    pub fn new(options: ClientOptions) -> Result<Self, ClientError> {
        let http = build_http_client(&options.transport)?;
        let cache = ResponseCache::new(options.cache.capacity, options.cache.ttl);
        Ok(Self {
            http,
            options: Arc::new(options),
            cache: Arc::new(cache),
            registry: Arc::new(RequestRegistry::new()),
        })
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Send a chat request and return the aggregated response.
    ///
    /// Identical requests are served from the cache while their entry is
    /// live. Transport failures, 429 and 5xx responses are retried with
    /// exponential backoff; the whole call is bounded by the transport
    /// timeout and by `config.cancel`.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        config: &RequestConfig,
    ) -> Result<CompletionResponse, ClientError> {
        let api_key = self.api_key()?;
        validate_messages(messages)?;
        let effective = config.resolve(&self.options.defaults);

        let cache_key = (self.options.cache.enabled && !effective.stream)
            .then(|| fingerprint(messages, &effective));
        if let Some(key) = &cache_key {
            if let Some(hit) = self.cache.get(key) {
                debug!(model = %effective.model, "Serving chat response from cache");
                return Ok(hit);
            }
        }

        let body = ChatRequestBody::new(messages, &effective, false);
        let cancel = merged_token(config.cancel.as_ref());
        debug!(model = %effective.model, messages = messages.len(), "Dispatching chat request");

        let body = &body;
        let response = with_cancellation(
            &cancel,
            self.options.transport.timeout,
            execute_with_retry(&self.options.retry, || async move {
                let response = self.post_chat(api_key, body).await?;
                let bytes = response.bytes().await?;
                Ok(serde_json::from_slice::<CompletionResponse>(&bytes)?)
            }),
        )
        .await?;

        if let Some(key) = cache_key {
            self.cache.set(key, response.clone(), None);
        }
        Ok(response)
    }

    /// Send a streaming chat request.
    ///
    /// Resolves once the provider has accepted the request; a non-2xx answer
    /// is returned as an error without decoding anything. The request is
    /// registered under [`ChatStream::request_id`] until the stream ends or
    /// is dropped.
    pub async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        config: &RequestConfig,
    ) -> Result<ChatStream, ClientError> {
        let api_key = self.api_key()?;
        validate_messages(messages)?;
        let effective = config.resolve(&self.options.defaults);

        let request_id = Uuid::new_v4().to_string();
        let cancel = merged_token(config.cancel.as_ref());
        let registration = Registration::new(self.registry.clone(), request_id.clone(), cancel.clone());

        let body = ChatRequestBody::new(messages, &effective, true);
        debug!(request_id = %request_id, model = %effective.model, "Dispatching streaming chat request");

        let body = &body;
        let response = with_cancellation(
            &cancel,
            self.options.transport.timeout,
            execute_with_retry(&self.options.retry, || async move { self.post_chat(api_key, body).await }),
        )
        .await?;

        Ok(ChatStream::new(
            decode_chunks(response.bytes_stream()),
            cancel,
            registration,
        ))
    }

    /// Cancel one active stream. Returns false if the id is unknown.
    pub fn cancel_request(&self, request_id: &str) -> bool {
        self.registry.cancel(request_id)
    }

    /// Cancel every active stream; returns how many were cancelled.
    pub fn cancel_all_requests(&self) -> usize {
        let count = self.registry.cancel_all();
        if count > 0 {
            info!(count, "Cancelled all active requests");
        }
        count
    }

    pub fn active_requests(&self) -> usize {
        self.registry.count()
    }

    /// Estimated USD cost of a call; zero for unknown models.
    pub fn estimate_cost(&self, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        pricing::estimate_cost(model, input_tokens, output_tokens)
    }

    /// Fetch the provider's model list.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, ClientError> {
        let api_key = self.options.api_key.as_ref();
        let url = self.endpoint("models");
        let url = &url;

        with_cancellation(
            &CancellationToken::new(),
            self.options.transport.timeout,
            execute_with_retry(&self.options.retry, || async move {
                let request = apply_headers(self.http.get(url), api_key, &self.options.transport, false);
                let response = ensure_success(request.send().await?).await?;
                let bytes = response.bytes().await?;
                Ok(serde_json::from_slice::<ModelList>(&bytes)?.data)
            }),
        )
        .await
    }

    /// Model list that never fails.
    ///
    /// When the models endpoint cannot be reached or decoded, the built-in
    /// list is returned and the catalog is marked as a fallback carrying the
    /// reason, so degraded data is never mistaken for a live answer.
    pub async fn models_catalog(&self) -> ModelCatalog {
        match self.list_models().await {
            Ok(models) => ModelCatalog {
                models,
                source: CatalogSource::Remote,
            },
            Err(error) => {
                warn!(error = %error, "Model list unavailable, using built-in catalog");
                ModelCatalog {
                    models: pricing::builtin_models(),
                    source: CatalogSource::Fallback {
                        reason: error.to_string(),
                    },
                }
            }
        }
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cached_responses(&self) -> usize {
        self.cache.len()
    }

    fn api_key(&self) -> Result<&SecretString, ClientError> {
        self.options
            .api_key
            .as_ref()
            .filter(|key| !key.expose_secret().is_empty())
            .ok_or_else(|| ClientError::Configuration("API key is required".to_string()))
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.options.transport.base_url.trim_end_matches('/'), path)
    }

    async fn post_chat(&self, api_key: &SecretString, body: &ChatRequestBody<'_>) -> Result<Response, ClientError> {
        let request = apply_headers(
            self.http.post(self.endpoint("chat/completions")),
            Some(api_key),
            &self.options.transport,
            body.stream,
        );
        let response = request.json(body).send().await?;
        ensure_success(response).await
    }
}

impl std::fmt::Debug for AssistClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssistClient")
            .field("options", &self.options)
            .field("active_requests", &self.registry.count())
            .finish_non_exhaustive()
    }
}

fn validate_messages(messages: &[ChatMessage]) -> Result<(), ClientError> {
    if messages.is_empty() {
        return Err(ClientError::InvalidRequest("at least one message is required".to_string()));
    }
    messages.iter().try_for_each(ChatMessage::validate)
}

/// A token that fires when the caller's token fires, but can also be
/// cancelled on its own without touching the caller's.
fn merged_token(caller: Option<&CancellationToken>) -> CancellationToken {
    caller.map(CancellationToken::child_token).unwrap_or_default()
}

/// Run `operation` until it completes, `cancel` fires, or `timeout` elapses.
/// Both interruptions drop the operation and surface as `Aborted`.
async fn with_cancellation<T, F>(
    cancel: &CancellationToken,
    timeout: Option<Duration>,
    operation: F,
) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    let bounded = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, operation).await.unwrap_or_else(|_| {
                Err(ClientError::aborted(format!(
                    "request timed out after {}ms",
                    limit.as_millis()
                )))
            }),
            None => operation.await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ClientError::aborted("request cancelled")),
        result = bounded => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::{ToolChoice, ToolDefinition};
    use crate::options::ModelDefaults;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_request_body() {
        let messages = vec![ChatMessage::user("hi")];
        let config = RequestConfig::new()
            .with_temperature(0.5)
            .with_tools(
                vec![ToolDefinition::new("noop", "Does nothing", json!({"type": "object"}))],
                ToolChoice::Auto,
            )
            .resolve(&ModelDefaults::default());

        let body = serde_json::to_value(ChatRequestBody::new(&messages, &config, true)).unwrap();
        assert_eq!(
            body,
            json!({
                "model": "openai/gpt-4o-mini",
                "messages": [{"role": "user", "content": "hi"}],
                "temperature": 0.5,
                "max_tokens": 4096,
                "top_p": 1.0,
                "frequency_penalty": 0.0,
                "presence_penalty": 0.0,
                "tools": [{"type": "function", "function": {"name": "noop", "description": "Does nothing", "parameters": {"type": "object"}}}],
                "tool_choice": "auto",
                "stream": true
            })
        );
    }

    #[test]
    fn test_request_body_omits_empty_tools() {
        let messages = vec![ChatMessage::user("hi")];
        let config = RequestConfig::new().resolve(&ModelDefaults::default());
        let body = serde_json::to_value(ChatRequestBody::new(&messages, &config, false)).unwrap();
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
        assert_eq!(body["stream"], json!(false));
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let client = AssistClient::new(ClientOptions::default()).unwrap();
        let err = client
            .chat(&[ChatMessage::user("hi")], &RequestConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err = client
            .stream_chat(&[ChatMessage::user("hi")], &RequestConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(client.active_requests(), 0);
    }

    #[tokio::test]
    async fn test_invalid_messages_rejected() {
        let client = AssistClient::new(ClientOptions::new("sk-test")).unwrap();
        let err = client.chat(&[], &RequestConfig::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);

        let err = client
            .chat(&[ChatMessage::user("")], &RequestConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_cancellation_timeout() {
        let err = with_cancellation(
            &CancellationToken::new(),
            Some(Duration::from_millis(50)),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, ClientError>(())
            },
        )
        .await
        .unwrap_err();
        assert!(err.is_aborted());
        assert!(err.message().contains("timed out"));
    }

    #[tokio::test]
    async fn test_with_cancellation_caller_token() {
        let caller = CancellationToken::new();
        let merged = merged_token(Some(&caller));
        caller.cancel();

        let err = with_cancellation(&merged, None, std::future::pending::<Result<(), ClientError>>())
            .await
            .unwrap_err();
        assert!(err.is_aborted());

        // Cancelling the merged token leaves the caller's token alone.
        let caller = CancellationToken::new();
        merged_token(Some(&caller)).cancel();
        assert!(!caller.is_cancelled());
    }

    #[test]
    fn test_estimate_cost_delegates() {
        let client = AssistClient::new(ClientOptions::default()).unwrap();
        assert_eq!(client.estimate_cost("unknown/model", 10, 10), 0.0);
        assert!(client.estimate_cost("openai/gpt-4o-mini", 1000, 1000) > 0.0);
    }
}
