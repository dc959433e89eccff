//! Runtime configuration for the proxy, read from the process environment.

use std::time::Duration;

use secrecy::SecretString;

/// Default FatSecret OAuth token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://oauth.fatsecret.com/connect/token";
/// Default scope requested with the client-credentials grant.
pub const DEFAULT_SCOPE: &str = "premier image-recognition";
/// Default FatSecret image recognition endpoint.
pub const DEFAULT_RECOGNITION_URL: &str =
    "https://platform.fatsecret.com/rest/image-recognition/v2";
/// Default upstream call bound (30 seconds).
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Listen address used when `HOST` is unset.
pub const DEFAULT_HOST: &str = "0.0.0.0";
/// Listen port used when `PORT` is unset.
pub const DEFAULT_PORT: u16 = 3000;

const CLIENT_ID_VAR: &str = "FATSECRET_CLIENT_ID";
const CLIENT_SECRET_VAR: &str = "FATSECRET_CLIENT_SECRET";

/// Errors raised while assembling a [`ProxyConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {name}")]
    Invalid { name: &'static str, value: String },
}

/// OAuth client credentials. The secret is redacted from `Debug` output.
#[derive(Debug)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: SecretString,
}

impl Credentials {
    /// Wraps the secret so it stays out of logs.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: SecretString::from(client_secret.into()),
        }
    }
}

/// Everything the proxy needs to listen and to reach FatSecret.
#[derive(Debug)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
    pub token_url: String,
    pub scope: String,
    pub recognition_url: String,
    pub upstream_timeout: Duration,
}

impl ProxyConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let client_id = var(CLIENT_ID_VAR).ok_or(ConfigError::Missing(CLIENT_ID_VAR))?;
        let client_secret =
            var(CLIENT_SECRET_VAR).ok_or(ConfigError::Missing(CLIENT_SECRET_VAR))?;

        let port = match var("PORT") {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { name: "PORT", value })?,
            None => DEFAULT_PORT,
        };

        let upstream_timeout = match var("FATSECRET_TIMEOUT_SECS") {
            Some(value) => value
                .trim()
                .parse()
                .map(Duration::from_secs)
                .map_err(|_| ConfigError::Invalid {
                    name: "FATSECRET_TIMEOUT_SECS",
                    value,
                })?,
            None => DEFAULT_UPSTREAM_TIMEOUT,
        };

        Ok(Self {
            host: var("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            credentials: Credentials::new(client_id, client_secret),
            token_url: var("FATSECRET_TOKEN_URL").unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string()),
            scope: var("FATSECRET_SCOPE").unwrap_or_else(|| DEFAULT_SCOPE.to_string()),
            recognition_url: var("FATSECRET_RECOGNITION_URL")
                .unwrap_or_else(|| DEFAULT_RECOGNITION_URL.to_string()),
            upstream_timeout,
        })
    }

    /// The `host:port` pair the server listens on.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
