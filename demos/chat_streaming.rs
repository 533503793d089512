//! Streaming chat completion, once with callbacks and once as a `Stream`.
//!
//! Run with:
//! ```bash
//! export OPENAI_API_KEY="your-api-key"
//! RUST_LOG=aiclient=debug cargo run --example chat_streaming
//! ```

use std::io::Write;

use aiclient::model::{ChatMessage, ChatQuery};
use aiclient::{Configuration, OpenAiClient};
use futures::StreamExt;
use tokio::sync::oneshot;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let client = OpenAiClient::new(Configuration::from_env()?)?;
    let query = ChatQuery::new(
        "gpt-4o-mini",
        vec![ChatMessage::user("Write a haiku about Rust programming.")],
    );

    println!("=== Callbacks ===");
    let (done_tx, done_rx) = oneshot::channel();
    client.chats_stream(
        query.clone(),
        |result| match result {
            Ok(chunk) => {
                print!("{}", chunk.delta_text());
                let _ = std::io::stdout().flush();
            }
            Err(e) => eprintln!("\n[event error] {}", e),
        },
        move |error| {
            let _ = done_tx.send(error);
        },
    );
    if let Some(error) = done_rx.await? {
        eprintln!("\n[stream failed] {}", error);
    }

    println!("\n\n=== Stream ===");
    let stream = client.chats_stream_events(query).await?;
    futures::pin_mut!(stream);
    while let Some(result) = stream.next().await {
        match result {
            Ok(chunk) => {
                print!("{}", chunk.delta_text());
                let _ = std::io::stdout().flush();
            }
            Err(e) => eprintln!("\n[event error] {}", e),
        }
    }
    println!();

    Ok(())
}
