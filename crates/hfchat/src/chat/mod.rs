use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;

use crate::error::LLMError;

/// Role of a participant in a chat conversation.
///
/// The set is closed: every prompt format matches on it exhaustively, so a
/// role without a template is a compile error rather than a runtime surprise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions that frame the whole conversation
    System,
    /// The user/human participant in the conversation
    Human,
    /// The AI assistant participant in the conversation
    Assistant,
}

impl FromStr for ChatRole {
    type Err = LLMError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(ChatRole::System),
            "human" | "user" => Ok(ChatRole::Human),
            "assistant" | "ai" => Ok(ChatRole::Assistant),
            _ => Err(LLMError::UnsupportedMessageType(s.to_string())),
        }
    }
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatRole::System => write!(f, "system"),
            ChatRole::Human => write!(f, "human"),
            ChatRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawChatMessage")]
pub struct ChatMessage {
    role: ChatRole,
    content: String,
}

/// Wire shape of a message before its role has been checked.
#[derive(Deserialize)]
struct RawChatMessage {
    role: String,
    #[serde(default)]
    content: String,
}

impl TryFrom<RawChatMessage> for ChatMessage {
    type Error = LLMError;

    fn try_from(raw: RawChatMessage) -> Result<Self, Self::Error> {
        Ok(ChatMessage::new(raw.role.parse()?, raw.content))
    }
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Human, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }

    /// Builds a message from a free-form role name, rejecting roles outside
    /// system/human/assistant.
    pub fn from_role(role: &str, content: impl Into<String>) -> Result<Self, LLMError> {
        Ok(Self::new(role.parse()?, content))
    }

    pub fn role(&self) -> ChatRole {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// One candidate answer: the assistant message and the server's generation
/// details, passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatGeneration {
    pub message: ChatMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_info: Option<Map<String, Value>>,
}

/// Result of a chat call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResult {
    pub generations: Vec<ChatGeneration>,
}

impl ChatResult {
    /// Text of the first generation.
    pub fn text(&self) -> Option<&str> {
        self.generations.first().map(|g| g.message.content())
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.generations
            .first()?
            .generation_info
            .as_ref()?
            .get("finish_reason")?
            .as_str()
    }
}

impl fmt::Display for ChatResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text().unwrap_or_default())
    }
}

/// A fragment of an assistant answer delivered while streaming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatGenerationChunk {
    pub content: String,
}

pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatGenerationChunk, LLMError>> + Send>>;

/// A chat model turns a conversation into an assistant reply.
///
/// ```rust,ignore
/// let result = model.chat(&messages, None).await?;
///
/// let mut stream = model.chat_stream(&messages, None).await?;
/// while let Some(chunk) = stream.next().await {
///     print!("{}", chunk?.content);
/// }
/// ```
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Short identifier of the model family this adapter targets.
    fn llm_type(&self) -> &str;

    /// Parameters that distinguish this model instance, for logging/caching.
    fn identifying_params(&self) -> Map<String, Value> {
        Map::new()
    }

    /// Single-shot chat. `stop` replaces the model's default stop sequences
    /// for this call only; `None` and an empty list both keep the defaults.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        stop: Option<&[String]>,
    ) -> Result<ChatResult, LLMError>;

    /// Streaming chat. The stream ends once the server signals completion.
    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        stop: Option<&[String]>,
    ) -> Result<ChatStream, LLMError>;
}
