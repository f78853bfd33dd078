//! Conversation-to-prompt formatting.
//!
//! Instruction-tuned models expect the whole conversation flattened into one
//! string with model-specific control tokens around each turn. A
//! [`PromptFormatter`] owns one such convention.

use crate::chat::{ChatMessage, ChatRole};

/// Turns an ordered conversation into a single prompt string.
pub trait PromptFormatter: Send + Sync {
    /// Renders one message with its control tokens.
    fn format_message(&self, message: &ChatMessage) -> String;

    /// Separator placed between rendered messages.
    fn join_str(&self) -> &str {
        "\n"
    }

    /// Stop sequences to send when the caller gives none.
    fn default_stop(&self) -> Vec<String> {
        Vec::new()
    }

    /// Renders every message in order and joins them with [`join_str`](Self::join_str).
    fn format(&self, messages: &[ChatMessage]) -> String {
        messages
            .iter()
            .map(|m| self.format_message(m))
            .collect::<Vec<_>>()
            .join(self.join_str())
    }
}

/// Prompt format of the Llama-2 chat models as served through HuggingFace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Llama2Formatter {
    join: String,
}

impl Llama2Formatter {
    pub const B_INST: &'static str = "[INST]";
    pub const E_INST: &'static str = "[/INST]";
    pub const B_SYS: &'static str = "<<SYS>>\n";
    pub const E_SYS: &'static str = "\n<</SYS>>\n\n";
    pub const BOS: &'static str = "<s>";
    pub const EOS: &'static str = "</s>";

    pub fn new() -> Self {
        Self::with_join("\n")
    }

    pub fn with_join(join: impl Into<String>) -> Self {
        Self { join: join.into() }
    }
}

impl Default for Llama2Formatter {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptFormatter for Llama2Formatter {
    fn format_message(&self, message: &ChatMessage) -> String {
        let content = message.content();
        match message.role() {
            ChatRole::System => format!(
                "{}{}{}{}{}",
                Self::BOS,
                Self::B_SYS,
                content,
                Self::E_SYS,
                Self::EOS
            ),
            ChatRole::Human => format!("{}{}{}{}", Self::BOS, Self::B_INST, content, Self::E_INST),
            ChatRole::Assistant => format!("{}{}", content, Self::EOS),
        }
    }

    fn join_str(&self) -> &str {
        &self.join
    }

    fn default_stop(&self) -> Vec<String> {
        vec![Self::EOS.to_string()]
    }
}

/// Formats `messages` with the Llama-2 tokens, joined by `join`.
pub fn format_llama2(messages: &[ChatMessage], join: &str) -> String {
    Llama2Formatter::with_join(join).format(messages)
}
