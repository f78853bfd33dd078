use anyhow::Result;
use clap::Parser;
use hfchat::format::{Llama2Formatter, PromptFormatter};
use hfchat_tgi::TgiFactory;
use serde_json::Value;
use std::io::{self, IsTerminal, Read};

mod chat;
mod cli_args;
mod config;
mod telemetry;
mod utils;

use chat::{chat_pipe, interactive_loop};
use cli_args::CliArgs;
use telemetry::setup_logging;
use utils::process_input;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let telemetry = setup_logging()?;
    let result = run(args).await;
    telemetry.shutdown();
    result
}

async fn run(args: CliArgs) -> Result<()> {
    let factory = TgiFactory;
    if args.config_schema {
        println!("{}", factory.config_schema());
        return Ok(());
    }

    let cfg = config::apply_flags(config::load_file(&args)?, &args);
    let mut messages = config::history(&args)?;
    let is_pipe = !io::stdin().is_terminal();

    if args.show_prompt {
        let mut input = Vec::new();
        if is_pipe {
            io::stdin().read_to_end(&mut input)?;
        }
        messages.extend(process_input(&input, args.prompt.as_deref()));
        let formatter = match cfg.get("join").and_then(Value::as_str) {
            Some(join) => Llama2Formatter::with_join(join),
            None => Llama2Formatter::default(),
        };
        println!("{}", formatter.format(&messages));
        return Ok(());
    }

    let model = factory.from_config(&Value::Object(cfg).to_string())?;
    log::debug!("Built {} chat model", factory.name());

    if is_pipe || args.prompt.is_some() {
        return chat_pipe(&model, messages, args.prompt.as_deref(), args.stream).await;
    }

    interactive_loop(&model, messages, args.stream).await
}
