// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use gemchat_config::Theme;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "gemchat",
    about = "Chat with Gemini from the terminal, with local chat history",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Model to use for this run, e.g. "gemini-1.5-pro".
    /// Stored settings are left unchanged.
    #[arg(long, short = 'M', env = "GEMCHAT_MODEL", global = true)]
    pub model: Option<String>,

    /// Path to config file (overrides auto-discovery)
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding saved chats (overrides storage.data_dir)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Keep chats in memory only; nothing is written to disk
    #[arg(long, global = true)]
    pub ephemeral: bool,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one prompt and stream the reply to stdout
    Ask {
        /// The prompt; several words are joined with spaces
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
        /// Continue an existing chat instead of starting a new one
        #[arg(long, value_name = "ID")]
        chat: Option<String>,
        /// Print the final rendered HTML instead of streaming raw text
        #[arg(long)]
        html: bool,
    },
    /// Regenerate the last reply of a chat
    Regen {
        id: String,
        #[arg(long)]
        html: bool,
    },
    /// List saved chats, pinned first, then most recent
    Chats {
        /// Include archived chats
        #[arg(long)]
        all: bool,
        /// Only chats whose title or messages contain this text
        #[arg(long, short = 's')]
        search: Option<String>,
    },
    /// Print a chat as HTML
    Show { id: String },
    /// Export a chat as a plain-text transcript
    Export {
        id: String,
        /// Export the stored JSON instead
        #[arg(long)]
        json: bool,
    },
    /// Rename a chat
    Rename {
        id: String,
        #[arg(required = true, num_args = 1..)]
        title: Vec<String>,
    },
    /// Delete a chat and all its messages
    Rm { id: String },
    /// Pin a chat to the top of the list
    Pin {
        id: String,
        /// Unpin instead
        #[arg(long)]
        off: bool,
    },
    /// Hide a chat from the default list
    Archive {
        id: String,
        /// Unarchive instead
        #[arg(long)]
        off: bool,
    },
    /// Delete every saved chat
    ClearAll {
        /// Required; there is no undo
        #[arg(long)]
        yes: bool,
    },
    /// Show or change stored settings
    Settings {
        #[arg(long = "set-model", value_name = "NAME")]
        model: Option<String>,
        /// Sampling temperature, clamped to [0, 1]
        #[arg(long)]
        temperature: Option<f32>,
        #[arg(long)]
        max_tokens: Option<u32>,
        #[arg(long, value_enum)]
        theme: Option<Theme>,
    },
    /// Render markdown from stdin to HTML
    Render,
    /// Print the effective configuration and exit
    ShowConfig,
    /// Generate shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "gemchat", &mut std::io::stdout());
}
