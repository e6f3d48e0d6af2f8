// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod session;
mod kv;
mod store;
mod stream;
mod events;
mod controller;
mod export;

pub use session::{derive_title, Message, ModelSnapshot, Role, Session, TITLE_MAX_CHARS};
pub use kv::{FileStore, KeyValueStore, MemoryStore, StoreError};
pub use store::{SessionStore, SESSIONS_KEY, SETTINGS_KEY};
pub use stream::{consume_stream, RenderState, StreamOutcome, STREAM_ERROR_TEXT};
pub use events::{ChatEvent, TurnId};
pub use controller::{AppState, ChatController, Command, Turn, TurnState};
pub use export::{export_json, export_transcript};
