// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// Request sent to a model provider: one free-text prompt plus the
/// generation settings snapshot taken when the turn started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub model: String,
    /// Sampling temperature in `[0, 1]`
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            temperature: 0.7,
            max_output_tokens: 2048,
        }
    }
}

/// A single streamed event from the model.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEvent {
    /// A text delta streamed from the model; deltas are additive.
    TextDelta(String),
    /// Token accounting as last reported by the provider
    Usage {
        input_tokens: u32,
        output_tokens: u32,
    },
    /// The stream finished normally
    Done,
}

/// Token usage from one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}
