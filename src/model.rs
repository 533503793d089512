//! Request and response types for every API endpoint.
//!
//! Optional request fields are omitted from the JSON body when unset so the
//! server applies its own defaults.

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Role of the message author.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Body of a chat completion request.
///
/// # Example
/// ```rust
/// use aiclient::model::{ChatMessage, ChatQuery};
///
/// let query = ChatQuery::new("gpt-4o", vec![ChatMessage::user("Hello!")])
///     .with_temperature(0.2)
///     .with_max_tokens(64);
///
/// assert_eq!(query.stream, None);
/// assert_eq!(query.make_streamable().stream, Some(true));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatQuery {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

impl ChatQuery {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Default::default()
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Same query with server-side streaming switched on.
    pub fn make_streamable(mut self) -> Self {
        self.stream = Some(true);
        self
    }
}

/// Token usage reported by the server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: Option<String>,
}

/// Complete (non-streamed) chat completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatResult {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Incremental message content carried by one streamed chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChatDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatStreamChoice {
    pub index: u32,
    pub delta: ChatDelta,
    pub finish_reason: Option<String>,
}

/// One `chat.completion.chunk` event of a streamed chat completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatStreamResult {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatStreamChoice>,
}

impl ChatStreamResult {
    /// Concatenated delta text of all choices in this chunk.
    pub fn delta_text(&self) -> String {
        self.choices
            .iter()
            .filter_map(|choice| choice.delta.content.as_deref())
            .collect()
    }
}

/// Embedding input: a single string or a batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum EmbeddingInput {
    Text(String),
    Batch(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsQuery {
    pub model: String,
    pub input: EmbeddingInput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Embedding {
    pub object: String,
    pub embedding: Vec<f64>,
    pub index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingsResult {
    pub data: Vec<Embedding>,
    pub model: String,
    pub usage: Usage,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ImagesQuery {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageData {
    pub url: Option<String>,
    pub b64_json: Option<String>,
    pub revised_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImagesResult {
    pub created: u64,
    pub data: Vec<ImageData>,
}

/// Edit an existing image. Sent as multipart form data.
#[derive(Debug, Clone, Default)]
pub struct ImageEditsQuery {
    pub image: Vec<u8>,
    pub file_name: String,
    pub mask: Option<Vec<u8>>,
    pub prompt: String,
    pub model: Option<String>,
    pub n: Option<u32>,
    pub size: Option<String>,
}

/// Generate variations of an image. Sent as multipart form data.
#[derive(Debug, Clone, Default)]
pub struct ImageVariationsQuery {
    pub image: Vec<u8>,
    pub file_name: String,
    pub model: Option<String>,
    pub n: Option<u32>,
    pub size: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelQuery {
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelResult {
    pub id: String,
    pub object: String,
    #[serde(default)]
    pub created: Option<u64>,
    pub owned_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelsResult {
    pub object: String,
    pub data: Vec<ModelResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationsQuery {
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Moderation {
    pub flagged: bool,
    pub categories: HashMap<String, bool>,
    pub category_scores: HashMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModerationsResult {
    pub id: String,
    pub model: String,
    pub results: Vec<Moderation>,
}

/// Speech-to-text in the spoken language. Sent as multipart form data.
#[derive(Debug, Clone, Default)]
pub struct AudioTranscriptionQuery {
    pub file: Vec<u8>,
    pub file_name: String,
    pub model: String,
    pub prompt: Option<String>,
    pub response_format: Option<String>,
    pub temperature: Option<f32>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioTranscriptionResult {
    pub text: String,
}

/// Speech-to-English-text. Sent as multipart form data.
#[derive(Debug, Clone, Default)]
pub struct AudioTranslationQuery {
    pub file: Vec<u8>,
    pub file_name: String,
    pub model: String,
    pub prompt: Option<String>,
    pub response_format: Option<String>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioTranslationResult {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSpeechQuery {
    pub model: String,
    pub input: String,
    pub voice: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
}

/// Raw audio returned by the speech endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSpeechResult {
    pub audio: Bytes,
}

/// Error payload the server returns instead of a normal body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiErrorResponse {
    pub error: ApiError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiError {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub param: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub code: Option<String>,
}

// Some compatible servers send numeric codes, e.g. `"code": 429`.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    }))
}

impl std::fmt::Display for ApiErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.error.message, self.error.error_type)
    }
}

// --- Multipart bodies ---

fn file_part(bytes: Vec<u8>, file_name: String) -> Part {
    Part::bytes(bytes).file_name(file_name)
}

fn optional_text(form: Form, name: &'static str, value: Option<String>) -> Form {
    match value {
        Some(value) => form.text(name, value),
        None => form,
    }
}

impl From<ImageEditsQuery> for Form {
    fn from(query: ImageEditsQuery) -> Self {
        let mut form = Form::new()
            .part("image", file_part(query.image, query.file_name.clone()))
            .text("prompt", query.prompt);
        if let Some(mask) = query.mask {
            form = form.part("mask", file_part(mask, format!("mask-{}", query.file_name)));
        }
        let form = optional_text(form, "model", query.model);
        let form = optional_text(form, "n", query.n.map(|n| n.to_string()));
        optional_text(form, "size", query.size)
    }
}

impl From<ImageVariationsQuery> for Form {
    fn from(query: ImageVariationsQuery) -> Self {
        let form = Form::new().part("image", file_part(query.image, query.file_name));
        let form = optional_text(form, "model", query.model);
        let form = optional_text(form, "n", query.n.map(|n| n.to_string()));
        optional_text(form, "size", query.size)
    }
}

impl From<AudioTranscriptionQuery> for Form {
    fn from(query: AudioTranscriptionQuery) -> Self {
        let form = Form::new()
            .part("file", file_part(query.file, query.file_name))
            .text("model", query.model);
        let form = optional_text(form, "prompt", query.prompt);
        let form = optional_text(form, "response_format", query.response_format);
        let form = optional_text(form, "temperature", query.temperature.map(|t| t.to_string()));
        optional_text(form, "language", query.language)
    }
}

impl From<AudioTranslationQuery> for Form {
    fn from(query: AudioTranslationQuery) -> Self {
        let form = Form::new()
            .part("file", file_part(query.file, query.file_name))
            .text("model", query.model);
        let form = optional_text(form, "prompt", query.prompt);
        let form = optional_text(form, "response_format", query.response_format);
        optional_text(form, "temperature", query.temperature.map(|t| t.to_string()))
    }
}
