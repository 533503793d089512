//! HTTP plumbing: URL assembly, header attachment and the transport seam.
//!
//! The rest of the crate only talks to the network through [`Transport`],
//! so tests (or callers with their own connection management) can substitute
//! a different implementation.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use itertools::Itertools;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Request, RequestBuilder, Url};
use serde::Serialize;
use std::pin::Pin;
use tracing::trace;

use crate::client::ClientError;
use crate::options::Configuration;

pub const EMBEDDINGS_PATH: &str = "/embeddings";
pub const CHATS_PATH: &str = "/chat/completions";
pub const MODELS_PATH: &str = "/models";
pub const MODERATIONS_PATH: &str = "/moderations";
pub const AUDIO_SPEECH_PATH: &str = "/audio/speech";
pub const AUDIO_TRANSCRIPTIONS_PATH: &str = "/audio/transcriptions";
pub const AUDIO_TRANSLATIONS_PATH: &str = "/audio/translations";
pub const IMAGES_PATH: &str = "/images/generations";
pub const IMAGE_EDITS_PATH: &str = "/images/edits";
pub const IMAGE_VARIATIONS_PATH: &str = "/images/variations";

const ORGANIZATION_HEADER: &str = "OpenAI-Organization";

/// Raw body chunks of a streaming response, in arrival order.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ClientError>> + Send>>;

/// The network capability the client is built on.
///
/// `execute` performs one request and returns the complete body.
/// `open_stream` opens a persistent connection and yields body chunks as
/// the server sends them; the stream ends when the connection closes and
/// yields an `Err` for a connection-level failure.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: Request) -> Result<Bytes, ClientError>;

    async fn open_stream(&self, request: Request) -> Result<ByteStream, ClientError>;
}

/// [`Transport`] backed by a `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: Request) -> Result<Bytes, ClientError> {
        let response = self.client.execute(request).await?;
        trace!(status = %response.status(), "response received");
        Ok(response.bytes().await?)
    }

    async fn open_stream(&self, request: Request) -> Result<ByteStream, ClientError> {
        let response = self.client.execute(request).await?;
        trace!(status = %response.status(), "stream opened");
        Ok(Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(ClientError::from)),
        ))
    }
}

/// Build the HTTP client used to construct and send requests.
///
/// `timeout_interval` bounds how long any single read may stall, so a
/// long-running stream stays open as long as chunks keep arriving.
pub fn build_http_client(configuration: &Configuration) -> Result<reqwest::Client, ClientError> {
    let client = reqwest::Client::builder()
        .read_timeout(configuration.timeout_interval)
        .build()?;
    Ok(client)
}

/// Assemble the endpoint URL for `path` from the configured scheme, host,
/// port, base path and API version. Empty segments are skipped and slashes
/// at segment edges are collapsed.
///
/// # Example
/// ```
/// use aiclient::http::build_url;
/// use aiclient::options::Configuration;
///
/// let config = Configuration::new("sk-test").with_base_path("/proxy/".to_string());
/// let url = build_url(&config, "/chat/completions").unwrap();
/// assert_eq!(url.as_str(), "https://api.openai.com/proxy/v1/chat/completions");
/// ```
pub fn build_url(configuration: &Configuration, path: &str) -> Result<Url, ClientError> {
    let path = [
        configuration.base_path.as_str(),
        configuration.api_version.as_str(),
        path,
    ]
    .iter()
    .map(|segment| segment.trim_matches('/'))
    .filter(|segment| !segment.is_empty())
    .join("/");

    let url = format!(
        "{}://{}:{}/{}",
        configuration.scheme, configuration.host, configuration.port, path
    );
    Url::parse(&url).map_err(|e| ClientError::Config(format!("Invalid URL {}: {}", url, e)))
}

/// Append a sub-resource to an endpoint path, e.g. `/models` + `gpt-4o`.
pub fn with_path(base: &str, path: &str) -> String {
    format!("{}/{}", base, path)
}

/// Request builder helpers shared by every endpoint.
pub trait RequestBuilderExt {
    /// Attach the bearer token and organization header.
    fn configured(self, configuration: &Configuration) -> Self;

    /// Cap the whole exchange at `timeout_interval`. Not applied to
    /// streamed requests, whose bodies may legitimately outlast it.
    fn bounded(self, configuration: &Configuration) -> Self;

    /// Set a JSON body, logging it at trace level.
    fn json_logged<T: Serialize + ?Sized>(self, body: &T) -> Self;
}

impl RequestBuilderExt for RequestBuilder {
    fn configured(self, configuration: &Configuration) -> Self {
        let request = self.header(
            AUTHORIZATION,
            format!("Bearer {}", configuration.token.expose_secret()),
        );

        match &configuration.organization_identifier {
            Some(organization) => request.header(ORGANIZATION_HEADER, organization),
            None => request,
        }
    }

    fn bounded(self, configuration: &Configuration) -> Self {
        self.timeout(configuration.timeout_interval)
    }

    fn json_logged<T: Serialize + ?Sized>(self, body: &T) -> Self {
        if tracing::enabled!(tracing::Level::TRACE) {
            if let Ok(text) = serde_json::to_string(body) {
                trace!(body = %text, "request body");
            }
        }
        self.header(CONTENT_TYPE, "application/json").json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_build_http_client() {
        let config = Configuration::new("test").with_timeout(Duration::from_secs(30));
        assert!(build_http_client(&config).is_ok());
    }

    #[test]
    fn test_build_url_defaults() {
        let config = Configuration::new("test");
        let url = build_url(&config, CHATS_PATH).unwrap();
        assert_eq!(url.as_str(), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn test_build_url_custom_host_and_port() {
        let config = Configuration::new("test")
            .with_scheme("http".to_string())
            .with_host("localhost".to_string())
            .with_port(8080)
            .with_base_path("/openai".to_string())
            .with_api_version("v2".to_string());
        let url = build_url(&config, &with_path(MODELS_PATH, "gpt-4o")).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/openai/v2/models/gpt-4o");
    }

    #[test]
    fn test_build_url_empty_version() {
        let config = Configuration::new("test").with_api_version(String::new());
        let url = build_url(&config, "/embeddings/").unwrap();
        assert_eq!(url.as_str(), "https://api.openai.com/embeddings");
    }

    #[test]
    fn test_build_url_invalid_host() {
        let config = Configuration::new("test").with_host("bad host".to_string());
        assert!(matches!(
            build_url(&config, CHATS_PATH),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn test_configured_headers() {
        let config = Configuration::new("sk-abc").with_organization("org-1".to_string());
        let client = build_http_client(&config).unwrap();
        let request = client
            .get("https://api.openai.com/v1/models")
            .configured(&config)
            .build()
            .unwrap();

        assert_eq!(request.headers()[AUTHORIZATION], "Bearer sk-abc");
        assert_eq!(request.headers()[ORGANIZATION_HEADER], "org-1");
        assert!(request.timeout().is_none());
    }

    #[test]
    fn test_bounded_sets_total_timeout() {
        let config = Configuration::new("sk-abc").with_timeout(Duration::from_secs(12));
        let client = build_http_client(&config).unwrap();
        let request = client
            .get("https://api.openai.com/v1/models")
            .configured(&config)
            .bounded(&config)
            .build()
            .unwrap();

        assert_eq!(request.timeout(), Some(&Duration::from_secs(12)));
    }

    #[test]
    fn test_configured_without_organization() {
        let config = Configuration::new("sk-abc");
        let client = build_http_client(&config).unwrap();
        let request = client
            .get("https://api.openai.com/v1/models")
            .configured(&config)
            .build()
            .unwrap();

        assert!(request.headers().get(ORGANIZATION_HEADER).is_none());
    }
}
