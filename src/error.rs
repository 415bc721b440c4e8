use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({platform}): {message}")]
    Api {
        platform: String,
        message: String,
        status_code: Option<u16>,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Rate limited by {platform}")]
    RateLimit {
        platform: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Missing credentials for {provider}: set {env_var}")]
    MissingCredentials { provider: String, env_var: String },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    pub fn api(platform: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            platform: platform.into(),
            message: message.into(),
            status_code: None,
        }
    }

    pub fn api_with_status(
        platform: impl Into<String>,
        message: impl Into<String>,
        status_code: u16,
    ) -> Self {
        Self::Api {
            platform: platform.into(),
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn missing_credentials(provider: impl Into<String>, env_var: impl Into<String>) -> Self {
        Self::MissingCredentials {
            provider: provider.into(),
            env_var: env_var.into(),
        }
    }

    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    /// Machine-readable code surfaced in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "UPSTREAM_ERROR",
            Self::Api { .. } => "UPSTREAM_ERROR",
            Self::Parse(_) => "UPSTREAM_PARSE_ERROR",
            Self::Config(_) => "CONFIGURATION_ERROR",
            Self::RateLimit { .. } => "RATE_LIMITED",
            Self::InvalidRequest(_) => "VALIDATION_ERROR",
            Self::MissingCredentials { .. } => "MISSING_CREDENTIALS",
            Self::Cache(_) => "CACHE_ERROR",
            Self::Template(_) => "INTERNAL_ERROR",
            Self::Io(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
