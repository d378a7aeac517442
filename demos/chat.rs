//! Aggregated chat example.
//!
//! Run with:
//! ```bash
//! export ASSIST_API_KEY="your-api-key"
//! cargo run --example chat
//! ```

use assist_client::{AssistClient, ChatMessage, ClientOptions, RequestConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Picks up ASSIST_API_KEY, ASSIST_BASE_URL and ASSIST_MODEL
    let client = AssistClient::new(ClientOptions::from_env())?;

    let messages = vec![
        ChatMessage::system("You are a concise assistant."),
        ChatMessage::user("Name three uses of the Rust borrow checker."),
    ];
    let config = RequestConfig::new().with_temperature(0.3).with_max_tokens(200);

    let response = client.chat(&messages, &config).await?;
    println!("{}", response.text().unwrap_or_default());

    // Same request again is answered from the cache
    let again = client.chat(&messages, &config).await?;
    assert_eq!(again.id, response.id);

    let cost = client.estimate_cost(
        &response.model,
        response.usage.prompt_tokens,
        response.usage.completion_tokens,
    );
    println!("\n=== Usage ===");
    println!("Prompt tokens: {}", response.usage.prompt_tokens);
    println!("Completion tokens: {}", response.usage.completion_tokens);
    println!("Estimated cost: ${cost:.6}");

    Ok(())
}
