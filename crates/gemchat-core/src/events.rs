// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::fmt;

use gemchat_config::Settings;

use crate::session::Message;

/// Identifies one in-flight model turn.  Placeholders in the view are keyed
/// by it so a late event can never land in the wrong bubble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TurnId(pub u64);

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "turn-{}", self.0)
    }
}

/// Events emitted by the controller.
/// Front ends subscribe to these to drive their output; nothing flows back.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// A user message was appended to the live view (not yet persisted)
    UserMessage { turn: TurnId, message: Message },
    /// A transient placeholder for the model reply should be shown
    PlaceholderOpened { turn: TurnId },
    /// A delta arrived.  `html` is the whole buffer so far, re-rendered;
    /// `delta` is the raw text just appended.
    PlaceholderUpdated { turn: TurnId, delta: String, html: String },
    /// Token usage as last reported by the provider
    TokenUsage { turn: TurnId, input: u32, output: u32 },
    /// The turn completed and was persisted into `session_id`
    TurnFinalized {
        turn: TurnId,
        session_id: String,
        message: Message,
        html: String,
    },
    /// The turn failed; `text` replaces the placeholder contents
    TurnFailed { turn: TurnId, text: String },
    /// A message left the live view (regenerate replaces the last reply)
    MessageRemoved { message_id: String },
    /// Reaction or bookmark metadata on a finalized message changed
    MessageUpdated { message: Message },
    /// The live view switched conversation; `None` is a fresh, unsaved chat
    ChatOpened {
        session_id: Option<String>,
        messages: Vec<Message>,
    },
    /// The session collection changed (sidebar should refresh)
    SessionsChanged,
    SettingsChanged(Settings),
}
