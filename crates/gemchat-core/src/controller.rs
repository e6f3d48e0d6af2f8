// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Conversation controller.
//!
//! A turn moves `Idle → AwaitingResponse → Idle` (or `→ Error`).  It is split
//! into three phases so the streaming part needs no controller borrow:
//!
//! 1. [`ChatController::begin_submit`] / [`ChatController::begin_regenerate`]
//!    flip the busy state and return a [`Turn`];
//! 2. [`Turn::run`] opens the stream and drives the consumer;
//! 3. [`ChatController::finish_turn`] persists the reply or surfaces the
//!    fixed error text, then releases the busy state.
//!
//! While a turn is in flight further submissions and regenerations are
//! ignored.  Navigation is still allowed; a turn always persists into the
//! session it started in.

use std::sync::Arc;

use gemchat_config::Settings;
use gemchat_model::{CompletionRequest, ModelProvider};
use gemchat_render::render;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::events::{ChatEvent, TurnId};
use crate::kv::StoreError;
use crate::session::{Message, ModelSnapshot};
use crate::store::SessionStore;
use crate::stream::{consume_stream, StreamOutcome, STREAM_ERROR_TEXT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    AwaitingResponse(TurnId),
    /// The last turn failed.  Behaves like `Idle` for the next command.
    Error,
}

/// Everything the controller owns that is not persisted.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Session shown in the live view; `None` for a fresh, unsaved chat.
    pub current_chat_id: Option<String>,
    pub turn_state: TurnState,
    /// Messages of the live view.  May hold a user message whose turn
    /// failed; the next finalized turn resyncs it from the store.
    pub live: Vec<Message>,
    pub settings: Settings,
    /// Bumped whenever the live view switches conversation.
    view: u64,
    next_turn: u64,
}

impl AppState {
    fn new(settings: Settings) -> Self {
        Self {
            current_chat_id: None,
            turn_state: TurnState::Idle,
            live: Vec::new(),
            settings,
            view: 0,
            next_turn: 1,
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.turn_state, TurnState::AwaitingResponse(_))
    }
}

/// The closed set of user-triggered actions.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Submit(String),
    Regenerate,
    NewChat,
    OpenChat(String),
    RenameChat { id: String, title: String },
    DeleteChat(String),
    SetPinned { id: String, pinned: bool },
    SetArchived { id: String, archived: bool },
    /// Acts on a message of the open chat.
    ToggleBookmark { message_id: String },
    ToggleReaction { message_id: String, reaction: String },
    UpdateSettings(Settings),
    ClearAll,
}

enum TurnKind {
    Submit { user: Message },
    /// Replace the model message with this id.
    Regenerate { replaces: String },
}

/// One in-flight model turn.
pub struct Turn {
    id: TurnId,
    origin: Option<String>,
    view: u64,
    prompt: String,
    kind: TurnKind,
    snapshot: ModelSnapshot,
    provider: Arc<dyn ModelProvider>,
}

impl Turn {
    pub fn id(&self) -> TurnId {
        self.id
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Open a fresh stream and drain it.  Open failures are folded into
    /// [`StreamOutcome::Failed`].
    pub async fn run(&self, tx: &mpsc::Sender<ChatEvent>) -> StreamOutcome {
        let request = CompletionRequest {
            prompt: self.prompt.clone(),
            model: self.snapshot.model.clone(),
            temperature: self.snapshot.temperature,
            max_output_tokens: self.snapshot.max_output_tokens,
        };
        debug!(turn = %self.id, model = %request.model, provider = self.provider.name(), "opening stream");
        match self.provider.complete(request).await {
            Ok(stream) => consume_stream(stream, self.id, tx).await,
            Err(e) => {
                warn!(turn = %self.id, "could not open response stream: {e:#}");
                StreamOutcome::Failed { error: format!("{e:#}") }
            }
        }
    }
}

pub struct ChatController {
    provider: Arc<dyn ModelProvider>,
    store: SessionStore,
    state: AppState,
    /// Used when the store holds no settings.
    defaults: Settings,
}

impl ChatController {
    /// Settings come from the store, falling back to `fallback`.
    pub fn new(provider: Arc<dyn ModelProvider>, store: SessionStore, fallback: &Settings) -> Self {
        let settings = store.load_settings(fallback);
        Self { provider, store, state: AppState::new(settings), defaults: fallback.clone() }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn is_busy(&self) -> bool {
        self.state.is_busy()
    }

    /// Use `settings` for the rest of this run without persisting them.
    pub fn use_settings(&mut self, settings: Settings) {
        self.state.settings = settings.normalized();
    }

    /// Settings as stored, ignoring any [`use_settings`](Self::use_settings)
    /// override.
    pub fn saved_settings(&self) -> Settings {
        self.store.load_settings(&self.defaults)
    }

    fn next_turn_id(&mut self) -> TurnId {
        let id = TurnId(self.state.next_turn);
        self.state.next_turn += 1;
        id
    }

    // ── Turn phases ──────────────────────────────────────────────────────────

    /// Start a submit turn.  Returns `None` (and does nothing) for blank
    /// text or while another turn is in flight.
    pub async fn begin_submit(&mut self, text: &str, tx: &mpsc::Sender<ChatEvent>) -> Option<Turn> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if self.is_busy() {
            debug!("submission ignored: turn in flight");
            return None;
        }

        let id = self.next_turn_id();
        let user = Message::user(text);
        self.state.live.push(user.clone());
        self.state.turn_state = TurnState::AwaitingResponse(id);
        let _ = tx.send(ChatEvent::UserMessage { turn: id, message: user.clone() }).await;
        let _ = tx.send(ChatEvent::PlaceholderOpened { turn: id }).await;

        Some(Turn {
            id,
            origin: self.state.current_chat_id.clone(),
            view: self.state.view,
            prompt: text.to_string(),
            kind: TurnKind::Submit { user },
            snapshot: ModelSnapshot::from(&self.state.settings),
            provider: Arc::clone(&self.provider),
        })
    }

    /// Start a regenerate turn for the open chat's last stored exchange.
    /// A prompt whose submit failed was never stored and is not replayed.
    pub async fn begin_regenerate(&mut self, tx: &mpsc::Sender<ChatEvent>) -> Option<Turn> {
        if self.is_busy() {
            debug!("regenerate ignored: turn in flight");
            return None;
        }
        let session_id = self.state.current_chat_id.clone()?;
        let (prompt, replaces) = {
            let session = self.store.get(&session_id)?;
            let (prompt, reply) = session.last_exchange()?;
            (prompt.text.clone(), reply.id.clone())
        };

        let id = self.next_turn_id();
        self.state.turn_state = TurnState::AwaitingResponse(id);
        let _ = tx.send(ChatEvent::PlaceholderOpened { turn: id }).await;

        Some(Turn {
            id,
            origin: Some(session_id),
            view: self.state.view,
            prompt,
            kind: TurnKind::Regenerate { replaces },
            snapshot: ModelSnapshot::from(&self.state.settings),
            provider: Arc::clone(&self.provider),
        })
    }

    /// Persist a completed turn or surface the failure.  Returns the id of
    /// the session the reply was stored in.
    pub async fn finish_turn(
        &mut self,
        turn: Turn,
        outcome: StreamOutcome,
        tx: &mpsc::Sender<ChatEvent>,
    ) -> Option<String> {
        if self.state.turn_state != TurnState::AwaitingResponse(turn.id) {
            warn!(turn = %turn.id, "finishing a turn that is not in flight");
            return None;
        }

        let text = match outcome {
            StreamOutcome::Completed { text, .. } => text,
            StreamOutcome::Failed { error } => {
                debug!(turn = %turn.id, %error, "turn failed");
                self.fail(turn.id, tx).await;
                return None;
            }
        };

        let reply = Message::model(text);
        let session_id = match self.persist_turn(&turn, reply.clone()) {
            Ok(id) => id,
            Err(e) => {
                warn!(turn = %turn.id, "could not persist turn: {e}");
                self.fail(turn.id, tx).await;
                return None;
            }
        };
        info!(turn = %turn.id, session_id = %session_id, "turn finalized");

        if turn.view == self.state.view {
            self.state.current_chat_id = Some(session_id.clone());
            self.state.live = self
                .store
                .get(&session_id)
                .map(|s| s.messages.clone())
                .unwrap_or_default();
            if let TurnKind::Regenerate { replaces } = &turn.kind {
                let _ = tx.send(ChatEvent::MessageRemoved { message_id: replaces.clone() }).await;
            }
        }
        let html = render(&reply.text);
        self.state.turn_state = TurnState::Idle;
        let _ = tx
            .send(ChatEvent::TurnFinalized {
                turn: turn.id,
                session_id: session_id.clone(),
                message: reply,
                html,
            })
            .await;
        let _ = tx.send(ChatEvent::SessionsChanged).await;
        Some(session_id)
    }

    fn persist_turn(&mut self, turn: &Turn, reply: Message) -> Result<String, StoreError> {
        let mut messages = turn
            .origin
            .as_deref()
            .and_then(|id| self.store.get(id))
            .map(|s| s.messages.clone())
            .unwrap_or_default();
        match &turn.kind {
            TurnKind::Submit { user } => messages.push(user.clone()),
            TurnKind::Regenerate { replaces } => {
                messages.retain(|m| &m.id != replaces);
                if messages.is_empty() {
                    messages.push(Message::user(turn.prompt.clone()));
                }
            }
        }
        messages.push(reply);
        self.store
            .upsert_turn(turn.origin.as_deref(), &turn.prompt, messages, turn.snapshot.clone())
    }

    async fn fail(&mut self, turn: TurnId, tx: &mpsc::Sender<ChatEvent>) {
        self.state.turn_state = TurnState::Error;
        let _ = tx.send(ChatEvent::TurnFailed { turn, text: STREAM_ERROR_TEXT.into() }).await;
    }

    /// Run a full submit turn.  `None` when ignored or failed.
    pub async fn send(&mut self, text: &str, tx: &mpsc::Sender<ChatEvent>) -> Option<String> {
        let turn = self.begin_submit(text, tx).await?;
        let outcome = turn.run(tx).await;
        self.finish_turn(turn, outcome, tx).await
    }

    /// Replay the last prompt of the open chat through a fresh stream and
    /// replace the previous reply.  On failure the previous reply stays.
    pub async fn regenerate(&mut self, tx: &mpsc::Sender<ChatEvent>) -> Option<String> {
        let turn = self.begin_regenerate(tx).await?;
        let outcome = turn.run(tx).await;
        self.finish_turn(turn, outcome, tx).await
    }

    // ── Navigation and management ────────────────────────────────────────────

    async fn switch_view(&mut self, session_id: Option<String>, tx: &mpsc::Sender<ChatEvent>) {
        let messages = session_id
            .as_deref()
            .and_then(|id| self.store.get(id))
            .map(|s| s.messages.clone())
            .unwrap_or_default();
        self.state.view += 1;
        self.state.current_chat_id = session_id.clone();
        self.state.live = messages.clone();
        let _ = tx.send(ChatEvent::ChatOpened { session_id, messages }).await;
    }

    /// Show an empty, unsaved chat.  Nothing is persisted until the first
    /// exchange completes.
    pub async fn new_chat(&mut self, tx: &mpsc::Sender<ChatEvent>) {
        self.switch_view(None, tx).await;
    }

    pub async fn open_chat(&mut self, id: &str, tx: &mpsc::Sender<ChatEvent>) -> bool {
        if !self.store.contains(id) {
            debug!(session_id = %id, "open ignored: unknown session");
            return false;
        }
        self.switch_view(Some(id.to_string()), tx).await;
        true
    }

    pub async fn delete_chat(&mut self, id: &str, tx: &mpsc::Sender<ChatEvent>) -> Result<bool, StoreError> {
        let deleted = self.store.delete(id)?;
        if deleted {
            if self.state.current_chat_id.as_deref() == Some(id) {
                self.switch_view(None, tx).await;
            }
            let _ = tx.send(ChatEvent::SessionsChanged).await;
        }
        Ok(deleted)
    }

    pub async fn clear_all(&mut self, tx: &mpsc::Sender<ChatEvent>) -> Result<(), StoreError> {
        self.store.clear_all()?;
        self.switch_view(None, tx).await;
        let _ = tx.send(ChatEvent::SessionsChanged).await;
        Ok(())
    }

    async fn sync_message(&mut self, updated: Option<Message>, tx: &mpsc::Sender<ChatEvent>) {
        let Some(message) = updated else { return };
        if let Some(live) = self.state.live.iter_mut().find(|m| m.id == message.id) {
            *live = message.clone();
        }
        let _ = tx.send(ChatEvent::MessageUpdated { message }).await;
    }

    pub async fn update_settings(
        &mut self,
        settings: Settings,
        tx: &mpsc::Sender<ChatEvent>,
    ) -> Result<(), StoreError> {
        let saved = self.store.save_settings(&settings)?;
        self.state.settings = saved.clone();
        let _ = tx.send(ChatEvent::SettingsChanged(saved)).await;
        Ok(())
    }

    /// Map a command to its controller method.  Turn failures never surface
    /// here; only storage errors from management commands do.
    pub async fn dispatch(&mut self, command: Command, tx: &mpsc::Sender<ChatEvent>) -> Result<(), StoreError> {
        match command {
            Command::Submit(text) => {
                self.send(&text, tx).await;
            }
            Command::Regenerate => {
                self.regenerate(tx).await;
            }
            Command::NewChat => self.new_chat(tx).await,
            Command::OpenChat(id) => {
                self.open_chat(&id, tx).await;
            }
            Command::RenameChat { id, title } => {
                if self.store.rename(&id, &title)? {
                    let _ = tx.send(ChatEvent::SessionsChanged).await;
                }
            }
            Command::DeleteChat(id) => {
                self.delete_chat(&id, tx).await?;
            }
            Command::SetPinned { id, pinned } => {
                if self.store.set_pinned(&id, pinned)? {
                    let _ = tx.send(ChatEvent::SessionsChanged).await;
                }
            }
            Command::SetArchived { id, archived } => {
                if self.store.set_archived(&id, archived)? {
                    let _ = tx.send(ChatEvent::SessionsChanged).await;
                }
            }
            Command::ToggleBookmark { message_id } => {
                if let Some(session_id) = self.state.current_chat_id.clone() {
                    let updated = self.store.toggle_bookmark(&session_id, &message_id)?;
                    self.sync_message(updated, tx).await;
                }
            }
            Command::ToggleReaction { message_id, reaction } => {
                if let Some(session_id) = self.state.current_chat_id.clone() {
                    let updated = self.store.toggle_reaction(&session_id, &message_id, &reaction)?;
                    self.sync_message(updated, tx).await;
                }
            }
            Command::UpdateSettings(settings) => self.update_settings(settings, tx).await?,
            Command::ClearAll => self.clear_all(tx).await?,
        }
        Ok(())
    }
}
