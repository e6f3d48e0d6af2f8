// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Streaming response consumer.
//!
//! Deltas are appended to one growing buffer and the *whole* buffer is
//! re-rendered after every delta.  The displayed HTML is therefore always
//! `render(buffer)`, which keeps an unterminated fence escaped until the
//! closing fence arrives.

use futures::StreamExt;
use gemchat_model::{ResponseEvent, ResponseStream, Usage};
use gemchat_render::render;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::events::{ChatEvent, TurnId};

/// Fixed text shown in place of a failed reply.
pub const STREAM_ERROR_TEXT: &str = "Sorry, something went wrong. Please try again.";

/// Per-turn accumulation state.  Dropped when the turn finalizes or fails.
#[derive(Debug, Default)]
pub struct RenderState {
    buffer: String,
    html: String,
    chunks: usize,
}

impl RenderState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `delta` and re-render the accumulated buffer.
    pub fn push(&mut self, delta: &str) -> &str {
        self.buffer.push_str(delta);
        self.html = render(&self.buffer);
        self.chunks += 1;
        &self.html
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn chunks(&self) -> usize {
        self.chunks
    }

    pub fn into_text(self) -> String {
        self.buffer
    }
}

/// Result of draining one response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    Completed { text: String, usage: Option<Usage> },
    Failed { error: String },
}

impl StreamOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, StreamOutcome::Completed { .. })
    }
}

/// Drain `stream`, emitting a `PlaceholderUpdated` after every non-empty
/// delta.  A stream error or a reply with no text yields
/// [`StreamOutcome::Failed`]; partial text is discarded in that case.
pub async fn consume_stream(
    mut stream: ResponseStream,
    turn: TurnId,
    tx: &mpsc::Sender<ChatEvent>,
) -> StreamOutcome {
    let mut state = RenderState::new();
    let mut usage = None;

    while let Some(item) = stream.next().await {
        match item {
            Ok(ResponseEvent::TextDelta(delta)) => {
                if delta.is_empty() {
                    continue;
                }
                let html = state.push(&delta).to_string();
                let _ = tx.send(ChatEvent::PlaceholderUpdated { turn, delta, html }).await;
            }
            Ok(ResponseEvent::Usage { input_tokens, output_tokens }) => {
                usage = Some(Usage { input_tokens, output_tokens });
                let _ = tx
                    .send(ChatEvent::TokenUsage { turn, input: input_tokens, output: output_tokens })
                    .await;
            }
            Ok(ResponseEvent::Done) => break,
            Err(e) => {
                warn!(%turn, chunks = state.chunks(), "response stream failed: {e:#}");
                return StreamOutcome::Failed { error: format!("{e:#}") };
            }
        }
    }

    if state.buffer().is_empty() {
        warn!(%turn, "model returned an empty reply");
        return StreamOutcome::Failed { error: "empty response".into() };
    }
    debug!(%turn, chunks = state.chunks(), bytes = state.buffer().len(), "stream complete");
    StreamOutcome::Completed { text: state.into_text(), usage }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
