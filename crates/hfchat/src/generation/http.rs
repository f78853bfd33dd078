use crate::{
    error::LLMError,
    generation::GenerationResult,
    params::GenerationParams,
};
use http::{Request, Response};
use serde_json::{Map, Value};

/// What a single line of a streaming response means.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A piece of generated text.
    Fragment(String),
    /// The server finished; an optional last fragment precedes the end.
    Done {
        fragment: Option<String>,
        details: Option<Map<String, Value>>,
    },
    /// Keep-alives, comments, special tokens and other lines with no text.
    Skip,
}

/// Sans-IO half of a text-generation backend: builds requests and parses
/// responses, leaving the transport to the adapter.
pub trait HTTPTextGenProvider: Send + Sync {
    fn generate_request(
        &self,
        prompt: &str,
        params: &GenerationParams,
        stream: bool,
    ) -> Result<Request<Vec<u8>>, LLMError>;

    fn parse_generate(&self, resp: Response<Vec<u8>>) -> Result<GenerationResult, LLMError>;

    /// Parses one newline-terminated line of a streaming response body.
    fn parse_stream_line(&self, line: &[u8]) -> Result<StreamEvent, LLMError>;
}
