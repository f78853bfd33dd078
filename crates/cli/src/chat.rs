use crate::utils::{print_separator, process_input};
use colored::*;
use futures::StreamExt;
use hfchat::{
    chat::{ChatMessage, ChatModel},
    error::LLMError,
};
use rustyline::{
    Cmd, Config, Editor, EventHandler, KeyCode, KeyEvent, Modifiers,
    completion::FilenameCompleter,
    error::ReadlineError,
    highlight::{CmdKind, Highlighter, MatchingBracketHighlighter},
    hint::HistoryHinter,
    validate::MatchingBracketValidator,
};
use rustyline_derive::{Completer, Helper, Hinter, Validator};
use spinners::{Spinner, Spinners};
use std::{
    borrow::Cow,
    io::{self, IsTerminal, Read, Write},
};

#[derive(Helper, Completer, Hinter, Validator)]
struct ChatHelper {
    #[rustyline(Completer)]
    completer: FilenameCompleter,
    highlighter: MatchingBracketHighlighter,
    #[rustyline(Validator)]
    validator: MatchingBracketValidator,
    #[rustyline(Hinter)]
    hinter: HistoryHinter,
    colored_prompt: String,
}

impl Highlighter for ChatHelper {
    fn highlight_prompt<'b, 's: 'b, 'p: 'b>(
        &'s self,
        prompt: &'p str,
        default: bool,
    ) -> Cow<'b, str> {
        if default {
            Cow::Borrowed(&self.colored_prompt)
        } else {
            Cow::Borrowed(prompt)
        }
    }

    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        Cow::Owned("\x1b[1m".to_owned() + hint + "\x1b[m")
    }

    fn highlight<'l>(&self, line: &'l str, pos: usize) -> Cow<'l, str> {
        self.highlighter.highlight(line, pos)
    }

    fn highlight_char(&self, line: &str, pos: usize, kind: CmdKind) -> bool {
        self.highlighter.highlight_char(line, pos, kind)
    }
}

fn stop_spinner(spinner: &mut Option<Spinner>) {
    if let Some(mut sp) = spinner.take() {
        sp.stop();
        print!("\r\x1B[K");
    }
}

/// Sends the conversation and prints the answer. Returns the assistant text,
/// or `None` when the user interrupted a streamed answer.
async fn respond(
    model: &dyn ChatModel,
    messages: &[ChatMessage],
    stream: bool,
    spinner: &mut Option<Spinner>,
) -> Result<Option<String>, LLMError> {
    if !stream {
        let result = model.chat(messages, None).await;
        stop_spinner(spinner);
        let result = result?;
        if let Some(reason) = result.finish_reason() {
            log::info!("Finish reason: {}", reason);
        }
        let text = result.text().unwrap_or_default().to_string();
        println!("{} {}", "> Assistant:".bright_green(), text.trim_start());
        return Ok(Some(text));
    }

    let opened = model.chat_stream(messages, None).await;
    stop_spinner(spinner);
    let mut chunks = opened?;
    print!("{}", "> Assistant: ".bright_green());
    io::stdout().flush().ok();

    let mut full_text = String::new();
    loop {
        tokio::select! {
            chunk = chunks.next() => {
                let Some(chunk) = chunk else {
                    println!();
                    break;
                };
                let chunk = chunk?;
                log::trace!("Received stream text chunk: {} bytes", chunk.content.len());
                print!("{}", chunk.content);
                io::stdout().flush().ok();
                full_text.push_str(&chunk.content);
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("{}", "Interrupted.".bright_yellow());
                return Ok(None);
            }
        }
    }
    Ok(Some(full_text))
}

/// Handle piped input or single-shot chat
pub async fn chat_pipe(
    model: &dyn ChatModel,
    mut messages: Vec<ChatMessage>,
    prompt: Option<&str>,
    stream: bool,
) -> anyhow::Result<()> {
    let mut input = Vec::new();
    if !io::stdin().is_terminal() {
        io::stdin().read_to_end(&mut input)?;
    }
    let Some(message) = process_input(&input, prompt) else {
        anyhow::bail!("Nothing to send: give a prompt or pipe text on stdin");
    };
    messages.push(message);
    respond(model, &messages, stream, &mut None).await?;
    Ok(())
}

/// Interactive REPL loop. The conversation so far is resent with every turn.
pub async fn interactive_loop(
    model: &dyn ChatModel,
    mut messages: Vec<ChatMessage>,
    stream: bool,
) -> anyhow::Result<()> {
    println!("{}", "hfchat - Interactive Chat".bright_blue());
    println!("Model: {}", model.llm_type().bright_green());
    println!("{}", "Type 'exit' to quit".bright_black());
    print_separator();

    let prompt_prefix = ":: ".bold().red().to_string();
    let helper = ChatHelper {
        completer: FilenameCompleter::new(),
        highlighter: MatchingBracketHighlighter::new(),
        validator: MatchingBracketValidator::new(),
        hinter: HistoryHinter::new(),
        colored_prompt: prompt_prefix.clone(),
    };

    let config = Config::builder()
        .history_ignore_space(true)
        .completion_type(rustyline::CompletionType::List)
        .build();
    let mut rl = Editor::with_config(config)?;
    rl.set_helper(Some(helper));
    rl.bind_sequence(
        KeyEvent(KeyCode::Enter, Modifiers::ALT),
        EventHandler::Simple(Cmd::Newline),
    );

    loop {
        io::stdout().flush()?;
        match rl.readline(&prompt_prefix) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("exit") {
                    println!("{}", "Goodbye!".bright_blue());
                    break;
                }
                let _ = rl.add_history_entry(trimmed);

                messages.push(ChatMessage::human(trimmed));
                let mut sp = Some(Spinner::new(
                    Spinners::Dots12,
                    "Thinking...".bright_magenta().to_string(),
                ));
                let outcome = tokio::select! {
                    res = respond(model, &messages, stream, &mut sp) => Some(res),
                    _ = tokio::signal::ctrl_c() => None,
                };
                stop_spinner(&mut sp);
                match outcome {
                    Some(Ok(Some(text))) => messages.push(ChatMessage::assistant(text)),
                    Some(Ok(None)) => {
                        messages.pop();
                    }
                    Some(Err(e)) => {
                        eprintln!("{} {}", "Error:".bright_red(), e);
                        messages.pop();
                    }
                    None => {
                        println!();
                        println!("{}", "Interrupted.".bright_yellow());
                        messages.pop();
                    }
                }
                print_separator();
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("\n{}", "Goodbye!".bright_blue());
                break;
            }
            Err(err) => {
                eprintln!("{} {:?}", "Error:".bright_red(), err);
                break;
            }
        }
    }
    Ok(())
}
