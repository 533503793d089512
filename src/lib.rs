//! # aiclient - OpenAI-compatible API client
//!
//! A typed async client for OpenAI-style HTTP APIs: chat, embeddings,
//! images, audio, moderations and model listing, plus server-streamed chat
//! completions.
//!
//! ## Features
//! - Async-first, tokio compatible
//! - Incremental Server-Sent Events decoding that survives payloads split
//!   across network chunks
//! - Callback-driven or `Stream`-based streaming
//! - Pluggable [`Transport`](http::Transport) for custom connection handling
//!
//! ## Architecture
//!
//! - **`OpenAiClient`**: one method per endpoint
//! - **`Configuration`**: token, organization, host/port/scheme, base path,
//!   API version and timeout
//! - **`StreamDecoder`**: per-connection SSE state machine
//! - **`StreamingSession`** / **`SessionRegistry`**: running streamed
//!   requests and their bookkeeping
//!
//! ## Example
//! ```no_run
//! use aiclient::client::OpenAiClient;
//! use aiclient::model::{ChatMessage, ChatQuery};
//! use aiclient::options::Configuration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = OpenAiClient::new(Configuration::new("your-api-key"))?;
//!     let query = ChatQuery::new("gpt-4o", vec![ChatMessage::user("Hello!")]);
//!
//!     let (done_tx, done_rx) = tokio::sync::oneshot::channel();
//!     client.chats_stream(
//!         query,
//!         |result| match result {
//!             Ok(chunk) => print!("{}", chunk.delta_text()),
//!             Err(error) => eprintln!("\n[error] {}", error),
//!         },
//!         move |error| {
//!             let _ = done_tx.send(error);
//!         },
//!     );
//!
//!     if let Some(error) = done_rx.await? {
//!         eprintln!("\n[stream failed] {}", error);
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod http;
pub mod model;
pub mod options;
pub mod sse;
pub mod stream;

// Re-exports for convenience
pub use client::{ClientError, OpenAiClient};
pub use model::{ApiErrorResponse, ChatQuery, ChatStreamResult};
pub use options::Configuration;
pub use sse::StreamDecoder;
pub use stream::{SessionRegistry, StreamHandle, StreamingSession};
