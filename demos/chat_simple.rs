//! Simple chat completion.
//!
//! Run with:
//! ```bash
//! export OPENAI_API_KEY="your-api-key"
//! cargo run --example chat_simple
//! ```

use aiclient::model::{ChatMessage, ChatQuery};
use aiclient::{Configuration, OpenAiClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let client = OpenAiClient::new(Configuration::from_env()?)?;

    let query = ChatQuery::new(
        "gpt-4o-mini",
        vec![
            ChatMessage::system("Answer in one word."),
            ChatMessage::user("What is the capital of France?"),
        ],
    )
    .with_max_tokens(16);

    println!("Sending request...");

    match client.chats(query).await {
        Ok(result) => {
            println!("\n=== Response ===");
            for choice in &result.choices {
                println!("{}", choice.message.content.as_deref().unwrap_or_default());
            }
            if let Some(usage) = result.usage {
                println!(
                    "\nTokens: {} prompt, {} completion",
                    usage.prompt_tokens, usage.completion_tokens
                );
            }
        }
        Err(e) => eprintln!("Error: {}", e),
    }

    Ok(())
}
