//! Client configuration and per-request options.
//!
//! [`ClientOptions`] holds everything fixed for the lifetime of a client:
//! credentials, transport settings, retry and cache policy, and the
//! [`ModelDefaults`] that fill any gap left by a [`RequestConfig`].
//! [`RequestConfig::resolve`] merges the two into an [`EffectiveConfig`].

use std::collections::HashMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::model::{ToolChoice, ToolDefinition};
use crate::retry::RetryPolicy;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

/// A secret string type for sensitive data like API keys.
/// Prevents accidental logging or display of secrets.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
    /// Create a new secret string.
    pub fn new(s: String) -> Self {
        Self(s)
    }

    /// Get the underlying secret value.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

/// Client-level sampling defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDefaults {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
}

impl Default for ModelDefaults {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 4096,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        }
    }
}

/// HTTP transport settings.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Base URL; `/chat/completions` and `/models` are appended.
    pub base_url: String,

    /// Overall deadline for an aggregated call, retries included. For
    /// streaming calls it bounds connection establishment only.
    pub timeout: Option<Duration>,

    pub connect_timeout: Option<Duration>,

    /// HTTP proxy URL
    pub proxy: Option<String>,

    /// Additional HTTP headers to include in requests
    pub extra_headers: Option<HashMap<String, String>>,

    /// Sent as `HTTP-Referer` for provider attribution.
    pub referer: Option<String>,

    /// Sent as `X-Title` for provider attribution.
    pub title: Option<String>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Some(Duration::from_secs(60)),
            connect_timeout: Some(Duration::from_secs(10)),
            proxy: None,
            extra_headers: None,
            referer: None,
            title: None,
        }
    }
}

impl TransportOptions {
    /// Set the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the proxy URL.
    pub fn with_proxy(mut self, proxy: String) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Add a single extra header.
    pub fn with_header(mut self, key: String, value: String) -> Self {
        self.extra_headers
            .get_or_insert_with(HashMap::new)
            .insert(key, value);
        self
    }

    /// Set the attribution headers.
    pub fn with_attribution(mut self, referer: impl Into<String>, title: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self.title = Some(title.into());
        self
    }
}

/// Response cache settings for aggregated calls.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheOptions {
    pub enabled: bool,
    pub capacity: usize,
    pub ttl: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 100,
            ttl: Duration::from_secs(5 * 60),
        }
    }
}

/// Everything needed to construct a [`crate::AssistClient`].
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// API key; a missing key is reported on the first call.
    pub api_key: Option<SecretString>,
    pub defaults: ModelDefaults,
    pub transport: TransportOptions,
    pub retry: RetryPolicy,
    pub cache: CacheOptions,
}

impl ClientOptions {
    /// Create options with an API key and everything else defaulted.
    pub fn new(api_key: impl Into<SecretString>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::default()
        }
    }

    /// Read `ASSIST_API_KEY`, `ASSIST_BASE_URL` and `ASSIST_MODEL`.
    /// Unset variables keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut options = Self::default();
        if let Some(key) = lookup("ASSIST_API_KEY").filter(|k| !k.is_empty()) {
            options.api_key = Some(key.into());
        }
        if let Some(base_url) = lookup("ASSIST_BASE_URL") {
            options.transport.base_url = base_url;
        }
        if let Some(model) = lookup("ASSIST_MODEL") {
            options.defaults.model = model;
        }
        options
    }

    pub fn with_defaults(mut self, defaults: ModelDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_transport(mut self, transport: TransportOptions) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cache(mut self, cache: CacheOptions) -> Self {
        self.cache = cache;
        self
    }

    /// Shorthand for `transport.with_base_url`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.transport.base_url = base_url.into();
        self
    }
}

/// Per-call options. Every unset field falls back to [`ModelDefaults`].
#[derive(Debug, Clone, Default)]
pub struct RequestConfig {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub tools: Option<Vec<ToolDefinition>>,
    pub tool_choice: Option<ToolChoice>,
    pub stream: Option<bool>,
    /// Caller-owned cancellation signal.
    pub cancel: Option<CancellationToken>,
}

impl RequestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the model identifier.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set maximum tokens to generate.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set top-p sampling parameter.
    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_penalties(mut self, frequency: f32, presence: f32) -> Self {
        self.frequency_penalty = Some(frequency);
        self.presence_penalty = Some(presence);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>, choice: ToolChoice) -> Self {
        self.tools = Some(tools);
        self.tool_choice = Some(choice);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Merge with client defaults into a fully populated config.
    pub fn resolve(&self, defaults: &ModelDefaults) -> EffectiveConfig {
        EffectiveConfig {
            model: self.model.clone().unwrap_or_else(|| defaults.model.clone()),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
            top_p: self.top_p.unwrap_or(defaults.top_p),
            frequency_penalty: self.frequency_penalty.unwrap_or(defaults.frequency_penalty),
            presence_penalty: self.presence_penalty.unwrap_or(defaults.presence_penalty),
            tools: self.tools.clone().unwrap_or_default(),
            tool_choice: self.tool_choice.clone(),
            stream: self.stream.unwrap_or(false),
        }
    }
}

/// Fully resolved request parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<ToolChoice>,
    pub stream: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_resolve_uses_defaults() {
        let effective = RequestConfig::new().resolve(&ModelDefaults::default());
        assert_eq!(effective.model, DEFAULT_MODEL);
        assert_eq!(effective.temperature, 0.7);
        assert_eq!(effective.max_tokens, 4096);
        assert_eq!(effective.top_p, 1.0);
        assert!(effective.tools.is_empty());
        assert!(effective.tool_choice.is_none());
        assert!(!effective.stream);
    }

    #[test]
    fn test_resolve_overrides() {
        let config = RequestConfig::new()
            .with_model("anthropic/claude-3.5-sonnet")
            .with_temperature(0.1)
            .with_max_tokens(256)
            .with_penalties(0.5, 0.25);
        let effective = config.resolve(&ModelDefaults::default());

        assert_eq!(effective.model, "anthropic/claude-3.5-sonnet");
        assert_eq!(effective.temperature, 0.1);
        assert_eq!(effective.max_tokens, 256);
        assert_eq!(effective.top_p, 1.0);
        assert_eq!(effective.frequency_penalty, 0.5);
        assert_eq!(effective.presence_penalty, 0.25);
    }

    #[test]
    fn test_from_lookup() {
        let options = ClientOptions::from_lookup(|name| match name {
            "ASSIST_API_KEY" => Some("sk-test".to_string()),
            "ASSIST_MODEL" => Some("meta-llama/llama-3-8b".to_string()),
            _ => None,
        });
        assert_eq!(options.api_key.unwrap().expose_secret(), "sk-test");
        assert_eq!(options.defaults.model, "meta-llama/llama-3-8b");
        assert_eq!(options.transport.base_url, DEFAULT_BASE_URL);

        let options = ClientOptions::from_lookup(|_| Some(String::new()));
        assert!(options.api_key.is_none());
    }

    #[test]
    fn test_secret_is_redacted() {
        let secret = SecretString::from("sk-live-123");
        assert_eq!(format!("{:?}", secret), "SecretString([REDACTED])");
    }
}
