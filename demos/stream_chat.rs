//! Streaming chat example with Ctrl-C cancellation.
//!
//! Run with:
//! ```bash
//! export ASSIST_API_KEY="your-api-key"
//! cargo run --example stream_chat
//! ```

use std::io::Write;

use assist_client::{AssistClient, CancellationToken, ChatMessage, ClientOptions, RequestConfig};
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let client = AssistClient::new(ClientOptions::from_env())?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let messages = vec![ChatMessage::user("Write a haiku about Rust programming.")];
    let config = RequestConfig::new().with_temperature(0.9).with_cancel(cancel);

    let mut stream = client.stream_chat(&messages, &config).await?;
    println!("Streaming request {}...\n", stream.request_id());

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => {
                if let Some(content) = chunk.content() {
                    print!("{content}");
                    std::io::stdout().flush()?;
                }
                if let Some(usage) = chunk.usage {
                    println!("\n\n=== Usage ===");
                    println!("Prompt tokens: {}", usage.prompt_tokens);
                    println!("Completion tokens: {}", usage.completion_tokens);
                }
                if chunk.is_terminal() {
                    println!("\n\n=== Stream complete ===");
                }
            }
            Err(e) if e.is_aborted() => {
                eprintln!("\nCancelled.");
                break;
            }
            Err(e) => {
                eprintln!("\nError in stream: {e}");
                return Err(e.into());
            }
        }
    }

    Ok(())
}
