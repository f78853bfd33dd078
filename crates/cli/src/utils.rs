use colored::*;
use hfchat::chat::ChatMessage;
use serde_json::Value;

pub fn parse_kv(s: &str) -> Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("custom-option must be KEY=VALUE, got `{}`", s))?;
    match serde_json::from_str::<Value>(raw) {
        Ok(v) => Ok((key.to_string(), v)),
        Err(_) => Ok((key.to_string(), Value::String(raw.to_string()))),
    }
}

/// `NAME=VALUE` for headers and cookies; the value is kept verbatim.
pub fn parse_pair(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got `{}`", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing name in `{}`", s));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Turns piped input and an optional prompt argument into one human message.
pub fn process_input(input: &[u8], prompt: Option<&str>) -> Option<ChatMessage> {
    let input = String::from_utf8_lossy(input);
    let input = input.trim_end();
    match (prompt, input.is_empty()) {
        (Some(p), false) => Some(ChatMessage::human(format!("{}\n\n{}", p, input))),
        (Some(p), true) => Some(ChatMessage::human(p)),
        (None, false) => Some(ChatMessage::human(input)),
        (None, true) => None,
    }
}

pub fn print_separator() {
    println!("{}", "─".repeat(50).bright_black());
}
