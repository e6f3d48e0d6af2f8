// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default Gemini model used when neither the config file nor the persisted
/// settings name one.
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Environment variable consulted for the Gemini API key.
pub const DEFAULT_API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ui: UiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Provider identifier: "google" | "mock"
    pub provider: String,
    /// Model name forwarded to the provider API
    pub name: String,
    /// Environment variable that holds the API key (read at runtime)
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files
    pub api_key: Option<String>,
    /// Base URL override, e.g. a local proxy in front of the Gemini API.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–1.0)
    pub temperature: Option<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "google".into(),
            name: DEFAULT_MODEL.into(),
            api_key_env: Some(DEFAULT_API_KEY_ENV.into()),
            api_key: None,
            base_url: None,
            max_tokens: Some(2048),
            temperature: Some(0.7),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory backing the local key-value store.  Defaults to
    /// `$XDG_DATA_HOME/gemchat` when unset.
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolve the effective data directory.
    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        dirs::data_dir()
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".local")
                    .join("share")
            })
            .join("gemchat")
    }
}

/// Initial UI preferences.  Only used to seed [`Settings`] the first time;
/// afterwards the persisted settings win.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub theme: Theme,
    pub send_on_enter: bool,
    pub font_size: u8,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self { theme: Theme::System, send_on_enter: true, font_size: 14 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    /// Follow the desktop preference
    #[default]
    System,
}

// ─── Persisted user settings ────────────────────────────────────────────────

/// User settings persisted in the key-value store next to the session
/// collection.  Unknown or missing fields fall back to defaults so a stale
/// or hand-edited blob never prevents startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub theme: Theme,
    pub send_on_enter: bool,
    pub font_size: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl Settings {
    /// Seed settings from the file configuration.
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            model: cfg.model.name.clone(),
            temperature: cfg.model.temperature.unwrap_or(0.7),
            max_output_tokens: cfg.model.max_tokens.unwrap_or(2048),
            theme: cfg.ui.theme,
            send_on_enter: cfg.ui.send_on_enter,
            font_size: cfg.ui.font_size,
        }
        .normalized()
    }

    /// Clamp values into their valid ranges.
    ///
    /// Temperature is limited to `[0, 1]`; a NaN temperature resets to the
    /// default.  An empty model name or zero token budget also resets.
    pub fn normalized(mut self) -> Self {
        self.temperature = if self.temperature.is_nan() {
            0.7
        } else {
            self.temperature.clamp(0.0, 1.0)
        };
        if self.model.trim().is_empty() {
            self.model = DEFAULT_MODEL.into();
        }
        if self.max_output_tokens == 0 {
            self.max_output_tokens = 2048;
        }
        self
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
