use thiserror::Error;

/// Request-facing errors, raised before any stream has been handed to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Bad HTTP method, unparseable body or a body that fails validation.
    #[error("{0}")]
    InvalidArguments(String),

    /// No route matched the request path.
    #[error("{0}")]
    NotFound(String),

    /// No authentication context could be extracted from the request.
    #[error("{0}")]
    Unauthorized(String),

    /// The chat stack could not be assembled.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// HTTP status code equivalent used by the front end.
    pub fn status_code(&self) -> u16 {
        match self {
            ChatError::InvalidArguments(_) => 400,
            ChatError::Unauthorized(_) => 401,
            ChatError::NotFound(_) => 404,
            ChatError::Internal(_) => 500,
        }
    }
}

/// Errors produced while talking to the model backend.
#[derive(Error, Debug)]
pub enum ModelError {
    /// A wrapper for authentication/authorization errors.
    #[error("Auth Error: {0}")]
    AuthError(String),

    /// Errors related to malformed requests.
    #[error("Invalid Request: {0}")]
    InvalidRequest(String),

    /// The backend answered with a non-success status.
    #[error("Provider Error ({status}): {message}")]
    ProviderError { status: u16, message: String },

    /// Errors related to malformed response bodies.
    #[error("Response Format Error: {message}. Raw response: '{raw_response}'")]
    ResponseFormatError {
        message: String,
        raw_response: String,
    },

    #[error("HTTP Error: {0}")]
    HttpError(String),

    /// Handles JSON serialization and deserialization errors.
    #[error("JSON Error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        ModelError::HttpError(err.to_string())
    }
}

/// Failure of a single tool provider. Never surfaced to callers as a request failure.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("invalid auth header `{header}`: {reason}")]
    InvalidHeader { header: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("failed to list tools from {url}: {reason}")]
    ListTools { url: String, reason: String },
}

/// Structural problems with the tool provider configuration payload.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("tool provider configuration is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("tool provider configuration must be a JSON array, got {0}")]
    NotAnArray(&'static str),
}
