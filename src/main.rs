// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::{self, Read, Write};
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use clap::Parser;
use gemchat_config::{Config, Settings};
use gemchat_core::{
    export_json, export_transcript, ChatController, ChatEvent, Command, FileStore, KeyValueStore, MemoryStore,
    Message, Role, Session, SessionStore, Turn,
};
use gemchat_model::ModelProvider;
use gemchat_render::{escape_html, render};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    // Commands that need neither storage nor a provider
    if let Some(cmd) = &cli.command {
        match cmd {
            Commands::Completions { shell } => {
                cli::print_completions(*shell);
                return Ok(());
            }
            Commands::ShowConfig => {
                let config = gemchat_config::load(cli.config.as_deref())?;
                println!("{}", serde_yaml::to_string(&config).context("serializing configuration")?);
                return Ok(());
            }
            Commands::Render => {
                let mut raw = String::new();
                io::stdin().read_to_string(&mut raw).context("reading stdin")?;
                println!("{}", render(&raw));
                return Ok(());
            }
            _ => {}
        }
    }

    let config = gemchat_config::load(cli.config.as_deref())?;
    let mut ctl = build_controller(&cli, &config)?;

    match cli.command {
        None => run_repl(&mut ctl).await,
        Some(cmd) => run_command(cmd, &mut ctl).await,
    }
}

fn build_controller(cli: &Cli, config: &Config) -> anyhow::Result<ChatController> {
    let kv: Arc<dyn KeyValueStore> = if cli.ephemeral {
        Arc::new(MemoryStore::new())
    } else {
        let dir = cli.data_dir.clone().unwrap_or_else(|| config.storage.data_dir());
        let store = FileStore::open(&dir).with_context(|| format!("opening chat store in {}", dir.display()))?;
        Arc::new(store)
    };
    let provider: Arc<dyn ModelProvider> = Arc::from(gemchat_model::from_config(&config.model)?);
    debug!(provider = provider.name(), "provider ready");

    let mut ctl = ChatController::new(provider, SessionStore::open(kv), &Settings::from_config(config));
    if let Some(model) = &cli.model {
        let settings = Settings { model: model.clone(), ..ctl.state().settings.clone() };
        ctl.use_settings(settings);
    }
    Ok(ctl)
}

async fn run_command(cmd: Commands, ctl: &mut ChatController) -> anyhow::Result<()> {
    let (tx, rx) = mpsc::channel(256);
    match cmd {
        Commands::Ask { prompt, chat, html } => {
            if let Some(id) = chat {
                if !ctl.open_chat(&id, &tx).await {
                    bail!("no such chat: {id}");
                }
            }
            let printer = spawn_printer(rx, PrintMode::for_html(html));
            let result = ctl.send(&prompt.join(" "), &tx).await;
            finish_printer(tx, printer).await;
            if result.is_none() {
                std::process::exit(1);
            }
        }
        Commands::Regen { id, html } => {
            if !ctl.open_chat(&id, &tx).await {
                bail!("no such chat: {id}");
            }
            let printer = spawn_printer(rx, PrintMode::for_html(html));
            let result = ctl.regenerate(&tx).await;
            finish_printer(tx, printer).await;
            if result.is_none() {
                std::process::exit(1);
            }
        }
        Commands::Chats { all, search } => {
            let sessions: Vec<&Session> = match &search {
                Some(q) => ctl.store().search(q).into_iter().filter(|s| all || !s.archived).collect(),
                None => ctl.store().display_order(all),
            };
            print_chats(&sessions);
        }
        Commands::Show { id } => {
            let session = lookup(ctl, &id)?;
            for msg in &session.messages {
                println!("{}", message_html(msg));
            }
        }
        Commands::Export { id, json } => {
            let session = lookup(ctl, &id)?;
            if json {
                println!("{}", export_json(session)?);
            } else {
                print!("{}", export_transcript(session));
            }
        }
        Commands::Rename { id, title } => {
            lookup(ctl, &id)?;
            let title = title.join(" ");
            if title.trim().is_empty() {
                bail!("title must not be empty");
            }
            ctl.dispatch(Command::RenameChat { id, title }, &tx).await?;
        }
        Commands::Rm { id } => {
            lookup(ctl, &id)?;
            ctl.dispatch(Command::DeleteChat(id), &tx).await?;
        }
        Commands::Pin { id, off } => {
            lookup(ctl, &id)?;
            ctl.dispatch(Command::SetPinned { id, pinned: !off }, &tx).await?;
        }
        Commands::Archive { id, off } => {
            lookup(ctl, &id)?;
            ctl.dispatch(Command::SetArchived { id, archived: !off }, &tx).await?;
        }
        Commands::ClearAll { yes } => {
            if !yes {
                bail!("refusing to delete every chat without --yes");
            }
            ctl.dispatch(Command::ClearAll, &tx).await?;
        }
        Commands::Settings { model, temperature, max_tokens, theme } => {
            // Start from what is stored so a --model override stays out of it.
            let mut settings = ctl.saved_settings();
            let changed = model.is_some() || temperature.is_some() || max_tokens.is_some() || theme.is_some();
            if let Some(m) = model {
                settings.model = m;
            }
            if let Some(t) = temperature {
                settings.temperature = t;
            }
            if let Some(n) = max_tokens {
                settings.max_output_tokens = n;
            }
            if let Some(t) = theme {
                settings.theme = t;
            }
            if changed {
                ctl.dispatch(Command::UpdateSettings(settings), &tx).await?;
            }
            print!("{}", serde_yaml::to_string(&ctl.saved_settings())?);
        }
        Commands::Render | Commands::ShowConfig | Commands::Completions { .. } => {}
    }
    Ok(())
}

/// One stored message as an `<article>`; the id comes from disk, so it is
/// escaped like the text.
fn message_html(msg: &Message) -> String {
    let role = match msg.role {
        Role::User => "user",
        Role::Model => "model",
    };
    format!(
        "<article class=\"message {role}\" data-id=\"{}\">{}</article>",
        escape_html(&msg.id),
        render(&msg.text)
    )
}

fn lookup<'a>(ctl: &'a ChatController, id: &str) -> anyhow::Result<&'a Session> {
    ctl.store().get(id).with_context(|| format!("no such chat: {id}"))
}

fn print_chats(sessions: &[&Session]) {
    if sessions.is_empty() {
        println!("No saved chats found.");
        return;
    }
    println!("{:<20}  {:<16}  {:<4}  {:<2}  TITLE", "ID", "UPDATED", "MSGS", "");
    println!("{}", "-".repeat(80));
    for s in sessions {
        let flags = format!(
            "{}{}",
            if s.pinned { "P" } else { "" },
            if s.archived { "A" } else { "" }
        );
        let updated = s.updated_at.format("%Y-%m-%d %H:%M").to_string();
        println!("{:<20}  {:<16}  {:<4}  {:<2}  {}", s.id, updated, s.messages.len(), flags, s.title);
    }
    println!("\nTotal: {} chat(s)", sessions.len());
}

// ─── Event printing ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PrintMode {
    /// Stream raw deltas as they arrive
    Text,
    /// Print only the final HTML
    Html,
    /// Like `Text`, plus speaker labels and the history of opened chats
    Interactive,
}

impl PrintMode {
    fn for_html(html: bool) -> Self {
        if html {
            PrintMode::Html
        } else {
            PrintMode::Text
        }
    }
}

fn spawn_printer(mut rx: mpsc::Receiver<ChatEvent>, mode: PrintMode) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut out = io::stdout();
        while let Some(event) = rx.recv().await {
            match event {
                ChatEvent::PlaceholderOpened { .. } if mode == PrintMode::Interactive => {
                    let _ = write!(out, "Gemini: ");
                    let _ = out.flush();
                }
                ChatEvent::PlaceholderUpdated { delta, .. } if mode != PrintMode::Html => {
                    let _ = write!(out, "{delta}");
                    let _ = out.flush();
                }
                ChatEvent::TurnFinalized { session_id, html, .. } => {
                    match mode {
                        PrintMode::Html => println!("{html}"),
                        PrintMode::Text | PrintMode::Interactive => println!(),
                    }
                    debug!(session_id = %session_id, "reply stored");
                }
                ChatEvent::TurnFailed { text, .. } => {
                    if mode != PrintMode::Html {
                        println!();
                    }
                    eprintln!("{text}");
                }
                ChatEvent::TokenUsage { input, output, .. } => {
                    debug!(input, output, "token usage");
                }
                ChatEvent::ChatOpened { session_id, messages } if mode == PrintMode::Interactive => {
                    match &session_id {
                        Some(id) => println!("── {id} ──"),
                        None => println!("── new chat ──"),
                    }
                    for m in &messages {
                        let who = match m.role {
                            Role::User => "You",
                            Role::Model => "Gemini",
                        };
                        println!("{who}:\n{}\n", m.text);
                    }
                }
                _ => {}
            }
        }
    })
}

async fn finish_printer(tx: mpsc::Sender<ChatEvent>, printer: JoinHandle<()>) {
    drop(tx);
    let _ = printer.await;
}

// ─── Interactive loop ────────────────────────────────────────────────────────

const REPL_HELP: &str = "/new  start a new chat\n\
                         /regen  regenerate the last reply\n\
                         /chats  list chats\n\
                         /open <id>  switch to a chat\n\
                         /quit  exit";

async fn run_repl(ctl: &mut ChatController) -> anyhow::Result<()> {
    let (tx, rx) = mpsc::channel(256);
    let printer = spawn_printer(rx, PrintMode::Interactive);
    let interactive = is_stdin_tty();
    if interactive {
        println!("gemchat: type a message, /help for commands");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        if interactive {
            print!("> ");
            let _ = io::stdout().flush();
        }
        let Some(line) = lines.next_line().await.context("reading stdin")? else { break };
        let line = line.trim();
        let command = match line.split_once(' ').map_or((line, ""), |(c, rest)| (c, rest.trim())) {
            ("", _) => continue,
            ("/quit" | "/exit", _) => break,
            ("/help", _) => {
                println!("{REPL_HELP}");
                continue;
            }
            ("/chats", _) => {
                print_chats(&ctl.store().display_order(false));
                continue;
            }
            ("/new", _) => Command::NewChat,
            ("/regen", _) => Command::Regenerate,
            ("/open", id) if !id.is_empty() => Command::OpenChat(id.to_string()),
            (cmd, _) if cmd.starts_with('/') => {
                eprintln!("unknown command {cmd}; /help lists commands");
                continue;
            }
            _ => Command::Submit(line.to_string()),
        };
        let turn = match command {
            Command::Submit(text) => ctl.begin_submit(&text, &tx).await,
            Command::Regenerate => ctl.begin_regenerate(&tx).await,
            other => {
                if let Err(e) = ctl.dispatch(other, &tx).await {
                    eprintln!("error: {e}");
                }
                continue;
            }
        };
        let Some(turn) = turn else { continue };
        if !drive_turn(ctl, turn, &mut lines, &tx).await? {
            break;
        }
    }

    finish_printer(tx, printer).await;
    Ok(())
}

/// Run `turn` to completion while still reading input.  Lines that arrive
/// meanwhile go through the controller, which refuses them while the turn
/// is in flight.  Returns `false` once input is exhausted.
async fn drive_turn<R>(
    ctl: &mut ChatController,
    turn: Turn,
    lines: &mut Lines<R>,
    tx: &mpsc::Sender<ChatEvent>,
) -> anyhow::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    let mut input_open = true;
    let outcome = {
        let run = turn.run(tx);
        tokio::pin!(run);
        loop {
            tokio::select! {
                biased;
                line = lines.next_line(), if input_open => match line.context("reading stdin")? {
                    Some(line) => {
                        if ctl.begin_submit(&line, tx).await.is_none() && !line.trim().is_empty() {
                            eprintln!("(reply in progress; input ignored)");
                        }
                    }
                    None => input_open = false,
                },
                outcome = &mut run => break outcome,
            }
        }
    };
    ctl.finish_turn(turn, outcome, tx).await;
    Ok(input_open)
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn is_stdin_tty() -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        unsafe { libc::isatty(io::stdin().as_raw_fd()) != 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
