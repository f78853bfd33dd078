use crate::utils::{parse_kv, parse_pair};
use clap::Parser;
use serde_json::Value;
use std::path::PathBuf;

/// Command line arguments for the hfchat CLI
#[derive(Parser, Debug, Default)]
#[clap(
    name = "hfchat",
    about = "Chat with Llama-2 models served by text-generation-inference",
    allow_hyphen_values = true
)]
pub struct CliArgs {
    /// The prompt to send. If not provided, will enter interactive mode.
    #[arg()]
    pub prompt: Option<String>,

    /// TOML configuration file (defaults to <config dir>/hfchat/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Base URL of the TGI server (falls back to TGI_URL)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Extra request header, NAME=VALUE
    #[arg(short = 'H', long = "header", value_parser = parse_pair, action = clap::ArgAction::Append)]
    pub headers: Vec<(String, String)>,

    /// Cookie sent with every request, NAME=VALUE
    #[arg(long = "cookie", value_parser = parse_pair, action = clap::ArgAction::Append)]
    pub cookies: Vec<(String, String)>,

    /// System prompt to set context
    #[arg(short, long)]
    pub system: Option<String>,

    /// JSON file holding earlier messages: [{"role": ..., "content": ...}]
    #[arg(long)]
    pub messages: Option<PathBuf>,

    /// Maximum tokens to generate
    #[arg(long)]
    pub max_new_tokens: Option<u32>,

    /// Temperature setting
    #[arg(long)]
    pub temperature: Option<f32>,

    #[arg(long)]
    pub top_p: Option<f32>,

    #[arg(long)]
    pub top_k: Option<u32>,

    /// Stop sequence (repeatable)
    #[arg(long = "stop", action = clap::ArgAction::Append)]
    pub stop: Vec<String>,

    /// Extra generation parameter, KEY=VALUE (VALUE parsed as JSON when possible)
    #[arg(short = 'o', value_parser = parse_kv, action = clap::ArgAction::Append)]
    pub options: Vec<(String, Value)>,

    /// Print tokens as they arrive
    #[arg(long)]
    pub stream: bool,

    /// Print the formatted prompt and exit without calling the server
    #[arg(long)]
    pub show_prompt: bool,

    /// Print the JSON schema of the configuration file and exit
    #[arg(long)]
    pub config_schema: bool,
}
