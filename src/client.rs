//! The API client and its error type.

use std::sync::{Arc, Mutex, PoisonError};

use futures::Stream;
use reqwest::multipart::Form;
use reqwest::{Method, Request, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::http::{
    build_http_client, build_url, with_path, HttpTransport, RequestBuilderExt, Transport,
    AUDIO_SPEECH_PATH, AUDIO_TRANSCRIPTIONS_PATH, AUDIO_TRANSLATIONS_PATH, CHATS_PATH,
    EMBEDDINGS_PATH, IMAGES_PATH, IMAGE_EDITS_PATH, IMAGE_VARIATIONS_PATH, MODELS_PATH,
    MODERATIONS_PATH,
};
use crate::model::{
    ApiErrorResponse, AudioSpeechQuery, AudioSpeechResult, AudioTranscriptionQuery,
    AudioTranscriptionResult, AudioTranslationQuery, AudioTranslationResult, ChatQuery,
    ChatResult, ChatStreamResult, EmbeddingsQuery, EmbeddingsResult, ImageEditsQuery,
    ImageVariationsQuery, ImagesQuery, ImagesResult, ModelQuery, ModelResult, ModelsResult,
    ModerationsQuery, ModerationsResult,
};
use crate::options::Configuration;
use crate::sse::SseStreamExt;
use crate::stream::{SessionRegistry, StreamHandle, StreamingSession};

/// Errors that can occur during client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("API error: {0}")]
    Api(ApiErrorResponse),

    #[error("Response contained no data")]
    EmptyData,

    #[error("Stream chunk is not valid UTF-8")]
    UnknownContent,

    #[error("Stream cancelled")]
    StreamCancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Client for an OpenAI-compatible HTTP API.
///
/// Every endpoint method builds one request from the stored
/// [`Configuration`] and sends it through the client's [`Transport`].
///
/// # Example
/// ```no_run
/// use aiclient::client::OpenAiClient;
/// use aiclient::model::{ChatMessage, ChatQuery};
/// use aiclient::options::Configuration;
///
/// # async fn run() -> Result<(), aiclient::ClientError> {
/// let client = OpenAiClient::new(Configuration::new("sk-..."))?;
/// let query = ChatQuery::new("gpt-4o", vec![ChatMessage::user("Hello!")]);
///
/// let result = client.chats(query).await?;
/// println!("{:?}", result.choices[0].message.content);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct OpenAiClient {
    configuration: Configuration,
    http: reqwest::Client,
    transport: Arc<dyn Transport>,
    sessions: SessionRegistry,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("configuration", &self.configuration)
            .field("live_sessions", &self.sessions.len())
            .finish()
    }
}

impl OpenAiClient {
    /// Create a client that talks HTTP through `reqwest`.
    pub fn new(configuration: Configuration) -> Result<Self, ClientError> {
        let http = build_http_client(&configuration)?;
        let transport = HttpTransport::new(http.clone());
        Ok(Self {
            configuration,
            http,
            transport: Arc::new(transport),
            sessions: SessionRegistry::new(),
        })
    }

    /// Create a client that sends its requests through `transport`.
    pub fn with_transport(
        configuration: Configuration,
        transport: impl Transport + 'static,
    ) -> Result<Self, ClientError> {
        let http = build_http_client(&configuration)?;
        Ok(Self {
            configuration,
            http,
            transport: Arc::new(transport),
            sessions: SessionRegistry::new(),
        })
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Streaming sessions that have been started and not yet completed.
    pub fn live_sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    // --- Endpoints ---

    pub async fn chats(&self, query: ChatQuery) -> Result<ChatResult, ClientError> {
        let request = self.json_request(Method::POST, CHATS_PATH, Some(&query))?;
        self.perform_request(request).await
    }

    /// Stream a chat completion.
    ///
    /// Returns immediately; `on_result` receives every decoded chunk or
    /// per-chunk error, and `on_complete` runs exactly once when the
    /// connection ends. Must be called from within a tokio runtime.
    pub fn chats_stream<R, C>(&self, query: ChatQuery, on_result: R, on_complete: C) -> StreamHandle
    where
        R: FnMut(Result<ChatStreamResult, ClientError>) + Send + 'static,
        C: FnOnce(Option<ClientError>) + Send + 'static,
    {
        let request = self.stream_request(CHATS_PATH, &query.make_streamable());

        let on_result = Arc::new(Mutex::new(on_result));
        let on_error = on_result.clone();
        self.perform_streaming_request(
            request,
            move |event| {
                let mut callback = on_result.lock().unwrap_or_else(PoisonError::into_inner);
                (*callback)(Ok(event))
            },
            move |error| {
                let mut callback = on_error.lock().unwrap_or_else(PoisonError::into_inner);
                (*callback)(Err(error))
            },
            on_complete,
        )
    }

    /// Stream a chat completion as a [`Stream`] of decoded chunks.
    ///
    /// The stream ends when the connection closes; a transport failure is
    /// yielded as the final item.
    pub async fn chats_stream_events(
        &self,
        query: ChatQuery,
    ) -> Result<impl Stream<Item = Result<ChatStreamResult, ClientError>> + Send, ClientError> {
        let request = self.stream_request(CHATS_PATH, &query.make_streamable())?;
        let chunks = self.transport.open_stream(request).await?;
        Ok(chunks.sse_events::<ChatStreamResult>())
    }

    pub async fn embeddings(&self, query: EmbeddingsQuery) -> Result<EmbeddingsResult, ClientError> {
        let request = self.json_request(Method::POST, EMBEDDINGS_PATH, Some(&query))?;
        self.perform_request(request).await
    }

    pub async fn images(&self, query: ImagesQuery) -> Result<ImagesResult, ClientError> {
        let request = self.json_request(Method::POST, IMAGES_PATH, Some(&query))?;
        self.perform_request(request).await
    }

    pub async fn image_edits(&self, query: ImageEditsQuery) -> Result<ImagesResult, ClientError> {
        let request = self.multipart_request(IMAGE_EDITS_PATH, query.into())?;
        self.perform_request(request).await
    }

    pub async fn image_variations(
        &self,
        query: ImageVariationsQuery,
    ) -> Result<ImagesResult, ClientError> {
        let request = self.multipart_request(IMAGE_VARIATIONS_PATH, query.into())?;
        self.perform_request(request).await
    }

    /// Fetch a single model by id.
    pub async fn model(&self, query: ModelQuery) -> Result<ModelResult, ClientError> {
        let path = with_path(MODELS_PATH, &query.model);
        let request = self.json_request::<()>(Method::GET, &path, None)?;
        self.perform_request(request).await
    }

    /// List every model available to the account.
    pub async fn models(&self) -> Result<ModelsResult, ClientError> {
        let request = self.json_request::<()>(Method::GET, MODELS_PATH, None)?;
        self.perform_request(request).await
    }

    pub async fn moderations(
        &self,
        query: ModerationsQuery,
    ) -> Result<ModerationsResult, ClientError> {
        let request = self.json_request(Method::POST, MODERATIONS_PATH, Some(&query))?;
        self.perform_request(request).await
    }

    pub async fn audio_transcriptions(
        &self,
        query: AudioTranscriptionQuery,
    ) -> Result<AudioTranscriptionResult, ClientError> {
        let request = self.multipart_request(AUDIO_TRANSCRIPTIONS_PATH, query.into())?;
        self.perform_request(request).await
    }

    pub async fn audio_translations(
        &self,
        query: AudioTranslationQuery,
    ) -> Result<AudioTranslationResult, ClientError> {
        let request = self.multipart_request(AUDIO_TRANSLATIONS_PATH, query.into())?;
        self.perform_request(request).await
    }

    /// Text-to-speech. The response body is returned as raw audio.
    pub async fn audio_create_speech(
        &self,
        query: AudioSpeechQuery,
    ) -> Result<AudioSpeechResult, ClientError> {
        let request = self.json_request(Method::POST, AUDIO_SPEECH_PATH, Some(&query))?;
        self.perform_speech_request(request).await
    }

    // --- Request execution ---

    fn request_builder(&self, method: Method, path: &str) -> Result<RequestBuilder, ClientError> {
        let url = build_url(&self.configuration, path)?;
        Ok(self.http.request(method, url).configured(&self.configuration))
    }

    fn json_request<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Request, ClientError> {
        let builder = self
            .request_builder(method, path)?
            .bounded(&self.configuration);
        let builder = match body {
            Some(body) => builder.json_logged(body),
            None => builder,
        };
        Ok(builder.build()?)
    }

    /// Like [`json_request`](Self::json_request) but without a total
    /// timeout; only the client's per-read timeout applies.
    fn stream_request<B: Serialize>(&self, path: &str, body: &B) -> Result<Request, ClientError> {
        Ok(self
            .request_builder(Method::POST, path)?
            .json_logged(body)
            .build()?)
    }

    fn multipart_request(&self, path: &str, form: Form) -> Result<Request, ClientError> {
        Ok(self
            .request_builder(Method::POST, path)?
            .bounded(&self.configuration)
            .multipart(form)
            .build()?)
    }

    /// Send one request and decode its JSON body.
    ///
    /// When the body is not a `T`, it is tried as the server's error object
    /// and reported as [`ClientError::Api`]; only if that also fails is the
    /// original decode error returned.
    pub async fn perform_request<T: DeserializeOwned>(
        &self,
        request: Request,
    ) -> Result<T, ClientError> {
        debug!(method = %request.method(), url = %request.url(), "sending request");
        let body = self.transport.execute(request).await?;
        if body.is_empty() {
            return Err(ClientError::EmptyData);
        }
        serde_json::from_slice::<T>(&body).map_err(|err| {
            match serde_json::from_slice::<ApiErrorResponse>(&body) {
                Ok(api_error) => ClientError::Api(api_error),
                Err(_) => ClientError::Parse(err),
            }
        })
    }

    async fn perform_speech_request(&self, request: Request) -> Result<AudioSpeechResult, ClientError> {
        debug!(url = %request.url(), "sending speech request");
        let audio = self.transport.execute(request).await?;
        if audio.is_empty() {
            return Err(ClientError::EmptyData);
        }
        Ok(AudioSpeechResult { audio })
    }

    /// Start a streamed request and decode its events as `T`.
    ///
    /// The session is registered in [`live_sessions`](Self::live_sessions)
    /// before its task is spawned and removed right before `on_complete`
    /// runs. A request that could not be built still completes, with the
    /// build error.
    pub fn perform_streaming_request<T, E, R, C>(
        &self,
        request: Result<Request, ClientError>,
        on_event: E,
        on_error: R,
        on_complete: C,
    ) -> StreamHandle
    where
        T: DeserializeOwned + Send + 'static,
        E: FnMut(T) + Send + 'static,
        R: FnMut(ClientError) + Send + 'static,
        C: FnOnce(Option<ClientError>) + Send + 'static,
    {
        let (id, cancel) = self.sessions.register();
        let registry = self.sessions.clone();
        let session = StreamingSession::<T>::new(id)
            .on_event(on_event)
            .on_error(on_error)
            .on_complete(move |error| {
                registry.remove(id);
                on_complete(error);
            });

        let transport = self.transport.clone();
        let open = async move {
            match request {
                Ok(request) => transport.open_stream(request).await,
                Err(error) => Err(error),
            }
        };
        tokio::spawn(session.run(open, cancel));

        StreamHandle::new(id, self.sessions.clone())
    }
}
