//! Effective configuration: the TOML file first, command line flags on top.

use crate::cli_args::CliArgs;
use anyhow::{Context, Result};
use hfchat::{chat::ChatMessage, params::GenerationParams};
use serde_json::{Map, Value};
use std::path::PathBuf;

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("hfchat").join("config.toml"))
}

/// Reads the file named by `--config`, or the default file when it exists.
pub fn load_file(args: &CliArgs) -> Result<Map<String, Value>> {
    let path = match &args.config {
        Some(path) => path.clone(),
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(Map::new()),
        },
    };
    log::debug!("Loading config from {}", path.display());
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    parse_toml(&text).with_context(|| format!("Invalid config file {}", path.display()))
}

fn parse_toml(text: &str) -> Result<Map<String, Value>> {
    Ok(toml::from_str(text)?)
}

fn insert_nested(cfg: &mut Map<String, Value>, key: &str, name: &str, value: Value) {
    match cfg.get_mut(key) {
        Some(Value::Object(map)) => {
            map.insert(name.to_string(), value);
        }
        _ => {
            let mut map = Map::new();
            map.insert(name.to_string(), value);
            cfg.insert(key.to_string(), Value::Object(map));
        }
    }
}

/// Overlays the flags of `args` onto a configuration object.
pub fn apply_flags(mut cfg: Map<String, Value>, args: &CliArgs) -> Map<String, Value> {
    if let Some(url) = &args.base_url {
        cfg.insert("base_url".into(), url.clone().into());
    }
    if let Some(timeout) = args.timeout {
        cfg.insert("timeout_seconds".into(), timeout.into());
    }
    for (name, value) in &args.headers {
        insert_nested(&mut cfg, "headers", name, value.clone().into());
    }
    for (name, value) in &args.cookies {
        insert_nested(&mut cfg, "cookies", name, value.clone().into());
    }
    if let Some(n) = args.max_new_tokens {
        cfg.insert("max_new_tokens".into(), n.into());
    }
    if let Some(t) = args.temperature {
        cfg.insert("temperature".into(), t.into());
    }
    if let Some(p) = args.top_p {
        cfg.insert("top_p".into(), p.into());
    }
    if let Some(k) = args.top_k {
        cfg.insert("top_k".into(), k.into());
    }
    if !args.stop.is_empty() {
        cfg.remove("stop_sequences");
        cfg.insert("stop".into(), args.stop.clone().into());
    }
    for (key, value) in &args.options {
        if GenerationParams::FIELDS.contains(&key.as_str()) {
            cfg.insert(key.clone(), value.clone());
        } else {
            insert_nested(&mut cfg, "model_kwargs", key, value.clone());
        }
    }
    cfg
}

/// Messages that precede the prompt: the system prompt, then `--messages`.
pub fn history(args: &CliArgs) -> Result<Vec<ChatMessage>> {
    let mut messages = Vec::new();
    if let Some(system) = &args.system {
        messages.push(ChatMessage::system(system.clone()));
    }
    if let Some(path) = &args.messages {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read messages file {}", path.display()))?;
        let loaded: Vec<ChatMessage> = serde_json::from_str(&text)
            .with_context(|| format!("Invalid messages file {}", path.display()))?;
        messages.extend(loaded);
    }
    Ok(messages)
}
