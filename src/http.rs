//! HTTP client utilities.
//!
//! This module provides client construction, header handling and provider
//! error decoding shared by the aggregated and streaming calls.

use std::collections::HashMap;

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;

use crate::error::ClientError;
use crate::options::{SecretString, TransportOptions};

/// Build a configured HTTP client from transport options.
///
/// Only the connect timeout is set on the client; the overall deadline is
/// enforced per call so that long-lived streams are not cut off.
pub fn build_http_client(transport: &TransportOptions) -> Result<Client, ClientError> {
    let mut builder = Client::builder();

    if let Some(timeout) = transport.connect_timeout {
        builder = builder.connect_timeout(timeout);
    }

    if let Some(proxy_url) = &transport.proxy {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| ClientError::Configuration(format!("invalid proxy {proxy_url}: {e}")))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| ClientError::Configuration(format!("failed to build HTTP client: {e}")))
}

/// Add extra headers to a request if specified in transport options.
pub fn add_extra_headers(
    mut request: RequestBuilder,
    extra_headers: &Option<HashMap<String, String>>,
) -> RequestBuilder {
    if let Some(headers) = extra_headers {
        for (key, value) in headers {
            request = request.header(key, value);
        }
    }
    request
}

/// Apply authorization, content negotiation and attribution headers.
pub fn apply_headers(
    mut request: RequestBuilder,
    api_key: Option<&SecretString>,
    transport: &TransportOptions,
    streaming: bool,
) -> RequestBuilder {
    if let Some(api_key) = api_key {
        request = request.header(AUTHORIZATION, format!("Bearer {}", api_key.expose_secret()));
    }
    let accept = if streaming { "text/event-stream" } else { "application/json" };
    request = request
        .header(CONTENT_TYPE, "application/json")
        .header(ACCEPT, accept);

    if let Some(referer) = &transport.referer {
        request = request.header("HTTP-Referer", referer);
    }
    if let Some(title) = &transport.title {
        request = request.header("X-Title", title);
    }

    add_extra_headers(request, &transport.extra_headers)
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<Value>,
}

/// Decode a non-2xx response body into a [`ClientError`].
///
/// Uses `{"error": {"message", "code"}}` when present, otherwise the raw body.
pub fn parse_api_error(status: u16, body: &str) -> ClientError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            let message = envelope
                .error
                .message
                .unwrap_or_else(|| format!("HTTP {status}"));
            let code = envelope.error.code.map(|c| match c {
                Value::String(s) => s,
                other => other.to_string(),
            });
            ClientError::api(status, message, code)
        }
        Err(_) if body.trim().is_empty() => ClientError::api(status, format!("HTTP {status}"), None),
        Err(_) => ClientError::api(status, body.trim().to_string(), None),
    }
}

/// Pass 2xx responses through; turn anything else into a [`ClientError`].
pub async fn ensure_success(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(parse_api_error(status.as_u16(), &body))
}
