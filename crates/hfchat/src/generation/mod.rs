use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::pin::Pin;

use crate::{error::LLMError, params::GenerationParams};

pub mod http;

/// Generated text plus whatever details the server attached to it (token
/// counts, finish reason, seed, ...). The details are not interpreted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub generated_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Map<String, Value>>,
}

impl GenerationResult {
    pub fn finish_reason(&self) -> Option<&str> {
        self.details.as_ref()?.get("finish_reason")?.as_str()
    }

    pub fn generated_tokens(&self) -> Option<u64> {
        self.details.as_ref()?.get("generated_tokens")?.as_u64()
    }
}

/// Incremental text fragments of one generation, in order.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LLMError>> + Send>>;

/// A remote text-generation endpoint.
///
/// Each call is one independent request; nothing is retried here.
#[async_trait]
pub trait TextGenProvider: Send + Sync {
    /// Waits for the complete generation.
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<GenerationResult, LLMError>;

    /// Opens a streaming generation. Dropping the stream before it ends
    /// closes the underlying connection.
    async fn generate_stream(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<TextStream, LLMError>;
}
