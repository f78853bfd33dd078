use thiserror::Error;

/// Error types that can occur when formatting a conversation or talking to a
/// text-generation endpoint.
#[derive(Error, Debug)]
pub enum LLMError {
    /// A message role the target prompt format has no template for.
    #[error("Unsupported message type: {0}. Supported message types: system, human, assistant")]
    UnsupportedMessageType(String),

    /// Missing or invalid endpoint configuration.
    #[error("Configuration Error: {0}")]
    ConfigurationError(String),

    /// Malformed generation parameters.
    #[error("Invalid Request: {0}")]
    InvalidRequest(String),

    /// Transport or remote-service failure during a generate call.
    #[error("Generation Failure: {0}")]
    GenerationFailure(#[from] GenerationFailure),
}

/// Underlying cause of a [`LLMError::GenerationFailure`].
#[derive(Error, Debug)]
pub enum GenerationFailure {
    #[error("HTTP Error: {0}")]
    Http(String),

    /// The server answered with a non-success status.
    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },

    /// Errors related to malformed response bodies.
    #[error("Response Format Error: {message}. Raw response: '{raw_response}'")]
    ResponseFormat {
        message: String,
        raw_response: String,
    },

    /// The server reported an error in the middle of a stream.
    #[error("Server Error ({error_type}): {message}")]
    Remote { error_type: String, message: String },

    /// The stream closed before the server signalled completion.
    #[error("Stream ended before generation completed")]
    Incomplete,

    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Runtime Error: {0}")]
    Runtime(String),
}

impl From<serde_json::Error> for LLMError {
    fn from(err: serde_json::Error) -> Self {
        LLMError::GenerationFailure(GenerationFailure::Json(err))
    }
}

#[cfg(feature = "http-client")]
impl From<reqwest::Error> for LLMError {
    fn from(err: reqwest::Error) -> Self {
        LLMError::GenerationFailure(GenerationFailure::Http(err.to_string()))
    }
}

impl From<http::Error> for LLMError {
    fn from(err: http::Error) -> Self {
        LLMError::InvalidRequest(err.to_string())
    }
}

impl From<url::ParseError> for LLMError {
    fn from(err: url::ParseError) -> Self {
        LLMError::ConfigurationError(format!("Invalid URL: {}", err))
    }
}

/// Returns early with a [`GenerationFailure::Status`] when the response is not
/// a success. The server message is read from a `{"error": ...}` body when
/// present, otherwise the raw body is used.
#[macro_export]
macro_rules! handle_http_error {
    ($resp:expr) => {
        if !$resp.status().is_success() {
            return Err($crate::error::status_error(
                $resp.status().as_u16(),
                $resp.body(),
            ));
        }
    };
}

/// Builds the error for a non-success response body.
pub fn status_error(status: u16, body: &[u8]) -> LLMError {
    let message = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());
    LLMError::GenerationFailure(GenerationFailure::Status { status, message })
}
