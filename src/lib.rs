//! # assist-client - streaming chat-completion client
//!
//! An async client for chat-completion APIs that speak JSON over HTTP and
//! stream partial results as Server-Sent Events.
//!
//! ## Features
//! - Async-first, tokio compatible
//! - Aggregated (`chat`) and incremental (`stream_chat`) calls
//! - LRU response cache with per-entry TTL for aggregated calls
//! - Exponential-backoff retries for transport failures, 429 and 5xx
//! - Cooperative cancellation of single or all in-flight streams
//! - Structured errors carrying kind, status, provider code and retryability
//!
//! ## Architecture
//!
//! - **[`options`]**: client configuration and per-request overrides
//! - **[`cache`]**: bounded, time-expiring response cache
//! - **[`retry`]**: retry engine with exponential backoff
//! - **[`sse`]**: incremental decoding of the event stream
//! - **[`registry`]**: active streaming requests, for external cancellation
//! - **[`client`]**: the [`AssistClient`] facade composing all of the above
//!
//! ## Example
//! ```no_run
//! use futures::StreamExt;
//! use assist_client::{AssistClient, ChatMessage, ClientOptions, RequestConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = AssistClient::new(ClientOptions::new("your-api-key"))?;
//!
//!     let messages = vec![ChatMessage::user("Hello!")];
//!     let mut stream = client.stream_chat(&messages, &RequestConfig::default()).await?;
//!
//!     while let Some(chunk) = stream.next().await {
//!         print!("{}", chunk?.content().unwrap_or_default());
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
pub mod error;
pub mod http;
pub mod model;
pub mod options;
pub mod pricing;
pub mod registry;
pub mod retry;
pub mod sse;
pub mod stream;

// Re-exports for convenience
pub use client::{AssistClient, CatalogSource, ModelCatalog};
pub use error::{ClientError, ErrorKind};
pub use model::{ChatMessage, CompletionResponse, MessageContent, Role, StreamChunk, ToolCall, ToolChoice, ToolDefinition};
pub use options::{ClientOptions, RequestConfig};
pub use retry::RetryPolicy;
pub use stream::{ChatStream, ChunkAccumulator};
pub use tokio_util::sync::CancellationToken;
