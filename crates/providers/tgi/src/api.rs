//! Wire types of the text-generation-inference HTTP API.

use hfchat::generation::GenerationResult;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Serialize)]
pub(crate) struct GenerateRequest<'a> {
    pub inputs: &'a str,
    pub parameters: Value,
    pub stream: bool,
}

/// `/generate` answers with an object; some deployments wrap it in a list.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum GenerateResponse {
    Single(GenerationResult),
    Batch(Vec<GenerationResult>),
}

#[derive(Debug, Deserialize)]
pub(crate) struct Token {
    pub text: String,
    #[serde(default)]
    pub special: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StreamResponse {
    pub token: Option<Token>,
    #[serde(default)]
    pub generated_text: Option<String>,
    #[serde(default)]
    pub details: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_type: Option<String>,
}

/// One `data:` payload of `/generate_stream`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum StreamLine {
    Error(ErrorResponse),
    Token(StreamResponse),
}
