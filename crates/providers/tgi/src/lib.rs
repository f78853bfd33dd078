//! text-generation-inference backend.
//!
//! [`TextGenInference`] speaks the `/generate` and `/generate_stream` routes of
//! a TGI server. [`llama2_chat`] puts the Llama-2 chat prompt format in front
//! of it, and [`TgiFactory`] builds the same chat model from a JSON
//! configuration.

use http::{
    Method, Request, Response,
    header::{ACCEPT, CONTENT_TYPE, COOKIE},
};
use hfchat::{
    adapters::{TextGenChat, TextGenFromHTTP},
    blocking::Blocking,
    error::{GenerationFailure, LLMError},
    format::Llama2Formatter,
    generation::{
        GenerationResult,
        http::{HTTPTextGenProvider, StreamEvent},
    },
    handle_http_error,
    outbound::Outbound,
    params::{GenerationParams, build_extra_kwargs},
};
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use url::Url;

mod api;
pub mod config;

use api::{GenerateRequest, GenerateResponse, StreamLine};
pub use config::{ClientConfig, ClientConfigBuilder, TGI_URL_ENV};

/// Identifier reported by the Llama-2 chat model.
pub const LLM_TYPE: &str = "huggingface-llama2";

/// Llama-2 chat over text-generation-inference.
pub type Llama2Chat = TextGenChat<Llama2Formatter>;

/// Request builder and response parser for one TGI endpoint.
#[derive(Debug, Clone)]
pub struct TextGenInference {
    config: ClientConfig,
}

impl TextGenInference {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Pairs this endpoint with an HTTP transport using the configured timeout.
    pub fn into_provider(self) -> Result<TextGenFromHTTP, LLMError> {
        let outbound = Outbound::new(self.config.timeout())?;
        Ok(TextGenFromHTTP::new(Arc::new(self), outbound))
    }

    /// Synchronous provider with a transport of its own. Connections opened
    /// here are never shared with async callers of another provider.
    pub fn into_blocking(self) -> Result<Blocking<TextGenFromHTTP>, LLMError> {
        Ok(Blocking::new(Arc::new(self.into_provider()?)))
    }

    fn endpoint(&self, stream: bool) -> Result<Url, LLMError> {
        let route = if stream { "generate_stream" } else { "generate" };
        Ok(self.config.base_url().join(route)?)
    }
}

fn format_error(message: impl Into<String>, raw: &[u8]) -> LLMError {
    GenerationFailure::ResponseFormat {
        message: message.into(),
        raw_response: String::from_utf8_lossy(raw).into_owned(),
    }
    .into()
}

impl HTTPTextGenProvider for TextGenInference {
    fn generate_request(
        &self,
        prompt: &str,
        params: &GenerationParams,
        stream: bool,
    ) -> Result<Request<Vec<u8>>, LLMError> {
        let mut parameters = params.to_json()?;
        if let Value::Object(map) = &mut parameters {
            map.entry("details").or_insert(Value::Bool(true));
        }
        let body = serde_json::to_vec(&GenerateRequest {
            inputs: prompt,
            parameters,
            stream,
        })?;

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(self.endpoint(stream)?.as_str())
            .header(CONTENT_TYPE, "application/json");
        if stream {
            builder = builder.header(ACCEPT, "text/event-stream");
        }
        for (name, value) in self.config.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(cookies) = self.config.cookie_header() {
            builder = builder.header(COOKIE, cookies);
        }
        Ok(builder.body(body)?)
    }

    fn parse_generate(&self, resp: Response<Vec<u8>>) -> Result<GenerationResult, LLMError> {
        handle_http_error!(resp);

        let body = resp.body();
        let parsed: GenerateResponse = serde_json::from_slice(body)
            .map_err(|e| format_error(format!("Failed to decode TGI response: {}", e), body))?;
        match parsed {
            GenerateResponse::Single(result) => Ok(result),
            GenerateResponse::Batch(results) => results
                .into_iter()
                .next()
                .ok_or_else(|| format_error("TGI returned no generations", body)),
        }
    }

    fn parse_stream_line(&self, line: &[u8]) -> Result<StreamEvent, LLMError> {
        let text = std::str::from_utf8(line)
            .map_err(|e| format_error(format!("Stream line is not UTF-8: {}", e), line))?
            .trim();
        if text.is_empty() || text.starts_with(':') {
            return Ok(StreamEvent::Skip);
        }
        let payload = match text.strip_prefix("data:") {
            Some(data) => data.trim_start(),
            None if text.starts_with('{') => text,
            // event:, id: and retry: carry nothing for us
            None => return Ok(StreamEvent::Skip),
        };

        let parsed: StreamLine = serde_json::from_str(payload)
            .map_err(|e| format_error(format!("Failed to decode stream event: {}", e), line))?;
        match parsed {
            StreamLine::Error(err) => Err(GenerationFailure::Remote {
                error_type: err.error_type.unwrap_or_else(|| "unknown".into()),
                message: err.error,
            }
            .into()),
            StreamLine::Token(event) => {
                let fragment = event.token.filter(|t| !t.special).map(|t| t.text);
                if event.generated_text.is_some() || event.details.is_some() {
                    Ok(StreamEvent::Done {
                        fragment,
                        details: event.details,
                    })
                } else {
                    Ok(fragment.map_or(StreamEvent::Skip, StreamEvent::Fragment))
                }
            }
        }
    }
}

/// Llama-2 chat model talking to the endpoint described by `config`.
pub fn llama2_chat(config: ClientConfig, params: GenerationParams) -> Result<Llama2Chat, LLMError> {
    llama2_chat_with(config, params, Llama2Formatter::default())
}

fn llama2_chat_with(
    config: ClientConfig,
    params: GenerationParams,
    formatter: Llama2Formatter,
) -> Result<Llama2Chat, LLMError> {
    let provider = TextGenInference::new(config).into_provider()?;
    Ok(TextGenChat::new(Arc::new(provider), formatter, params, LLM_TYPE))
}

/// Configuration of a Llama-2 chat model on TGI, as read from a file.
///
/// Keys that are neither connection settings nor generation parameters are
/// forwarded to the server alongside `model_kwargs`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct TgiChatConfig {
    #[serde(flatten)]
    pub client: ClientConfigBuilder,
    /// Separator placed between formatted messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<String>,
    /// Extra parameters forwarded verbatim to the server
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub model_kwargs: Map<String, Value>,
    #[serde(flatten)]
    pub params: GenerationParams,
}

impl TgiChatConfig {
    pub fn build(self) -> Result<Llama2Chat, LLMError> {
        let env = std::env::var(TGI_URL_ENV).ok();
        self.build_with_env(env.as_deref())
    }

    /// Like [`TgiChatConfig::build`] with `env` standing in for `TGI_URL`.
    pub fn build_with_env(self, env: Option<&str>) -> Result<Llama2Chat, LLMError> {
        let TgiChatConfig {
            client,
            join,
            model_kwargs,
            mut params,
        } = self;
        let unknown = std::mem::take(&mut params.extra);
        params.extra = build_extra_kwargs(model_kwargs, unknown, GenerationParams::FIELDS)?;

        let formatter = join.map(Llama2Formatter::with_join).unwrap_or_default();
        llama2_chat_with(client.build_with_env(env)?, params, formatter)
    }
}

/// Builds Llama-2 chat models on TGI from JSON configuration.
pub struct TgiFactory;

impl TgiFactory {
    pub fn name(&self) -> &str {
        "tgi"
    }

    pub fn config_schema(&self) -> String {
        schema_for!(TgiChatConfig).as_value().to_string()
    }

    pub fn from_config(&self, cfg: &str) -> Result<Llama2Chat, LLMError> {
        let cfg: TgiChatConfig = serde_json::from_str(cfg)
            .map_err(|e| LLMError::ConfigurationError(format!("Invalid TGI config: {}", e)))?;
        cfg.build()
    }
}
