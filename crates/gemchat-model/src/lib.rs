// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod types;
mod provider;
mod google;
mod mock;

pub use types::*;
pub use provider::{ModelProvider, ResponseStream};
pub use google::GoogleProvider;
pub use mock::{MockProvider, Script, ScriptStep, ScriptedMockProvider};

use anyhow::bail;
use gemchat_config::ModelConfig;

/// Construct a boxed [`ModelProvider`] from configuration.
///
/// Provider selection:
/// - `"google"` → [`GoogleProvider`]
/// - `"mock"` → [`MockProvider`] (echo-back)
pub fn from_config(cfg: &ModelConfig) -> anyhow::Result<Box<dyn ModelProvider>> {
    match cfg.provider.as_str() {
        "google" | "gemini" => Ok(Box::new(GoogleProvider::new(
            cfg.name.clone(),
            resolve_api_key(cfg),
            cfg.base_url.clone(),
        ))),
        "mock" => Ok(Box::new(MockProvider)),
        other => bail!("unknown model provider: {other}"),
    }
}

fn resolve_api_key(cfg: &ModelConfig) -> Option<String> {
    if let Some(k) = &cfg.api_key {
        return Some(k.clone());
    }
    if let Some(env) = &cfg.api_key_env {
        return std::env::var(env).ok();
    }
    None
}
