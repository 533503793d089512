//! Client configuration: credentials, endpoint location and request timeout.

use std::time::Duration;

use crate::client::ClientError;

const DEFAULT_HOST: &str = "api.openai.com";
const DEFAULT_PORT: u16 = 443;
const DEFAULT_SCHEME: &str = "https";
const DEFAULT_API_VERSION: &str = "v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(900);

/// A secret string type for sensitive data like API keys.
/// Prevents accidental logging or display of secrets.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
    /// Create a new secret string.
    pub fn new(s: String) -> Self {
        Self(s)
    }

    /// Get the underlying secret value.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

/// Everything needed to address the API and authenticate against it.
///
/// The defaults point at the public OpenAI endpoint. Set `host`, `port`,
/// `scheme` and `base_path` when talking to a proxy or a self-hosted
/// compatible server.
///
/// # Example
/// ```rust
/// use aiclient::options::Configuration;
/// use std::time::Duration;
///
/// let config = Configuration::new("sk-...")
///     .with_organization("org-123".to_string())
///     .with_host("localhost".to_string())
///     .with_port(8080)
///     .with_scheme("http".to_string())
///     .with_timeout(Duration::from_secs(30));
///
/// assert_eq!(config.port, 8080);
/// ```
#[derive(Debug, Clone)]
pub struct Configuration {
    /// Bearer token sent with every request
    pub token: SecretString,

    /// Optional organization identifier (`OpenAI-Organization` header)
    pub organization_identifier: Option<String>,

    /// API host, without scheme or port
    pub host: String,

    pub port: u16,

    /// `http` or `https`
    pub scheme: String,

    /// Path prefix inserted before the API version, for proxies
    pub base_path: String,

    /// API version path segment
    pub api_version: String,

    /// Idle timeout for reads on the connection. Single-body requests are
    /// also capped at this in total; streamed requests are not, so a stream
    /// stays open as long as chunks keep arriving.
    pub timeout_interval: Duration,
}

impl Configuration {
    /// Create a configuration with the given token and default endpoint.
    pub fn new(token: impl Into<SecretString>) -> Self {
        Self {
            token: token.into(),
            organization_identifier: None,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            scheme: DEFAULT_SCHEME.to_string(),
            base_path: String::new(),
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout_interval: DEFAULT_TIMEOUT,
        }
    }

    /// Build a configuration from `OPENAI_API_KEY`, and optionally
    /// `OPENAI_ORGANIZATION` and `OPENAI_HOST`.
    pub fn from_env() -> Result<Self, ClientError> {
        let token = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ClientError::Config("OPENAI_API_KEY is not set".to_string()))?;

        let mut config = Self::new(token);
        if let Ok(organization) = std::env::var("OPENAI_ORGANIZATION") {
            config.organization_identifier = Some(organization);
        }
        if let Ok(host) = std::env::var("OPENAI_HOST") {
            config.host = host;
        }
        Ok(config)
    }

    /// Set the organization identifier.
    pub fn with_organization(mut self, organization: String) -> Self {
        self.organization_identifier = Some(organization);
        self
    }

    /// Set the API host.
    pub fn with_host(mut self, host: String) -> Self {
        self.host = host;
        self
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the URL scheme.
    pub fn with_scheme(mut self, scheme: String) -> Self {
        self.scheme = scheme;
        self
    }

    /// Set the base path used by proxies.
    pub fn with_base_path(mut self, base_path: String) -> Self {
        self.base_path = base_path;
        self
    }

    /// Set the API version segment.
    pub fn with_api_version(mut self, api_version: String) -> Self {
        self.api_version = api_version;
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_interval = timeout;
        self
    }
}
