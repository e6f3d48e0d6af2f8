// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use gemchat_config::Settings;
use tracing::{debug, info, warn};

use crate::kv::{KeyValueStore, StoreError};
use crate::session::{derive_title, Message, ModelSnapshot, Session};

/// Key holding the serialized session collection.
pub const SESSIONS_KEY: &str = "gemchat.sessions";
/// Key holding the serialized user settings.
pub const SETTINGS_KEY: &str = "gemchat.settings";

/// In-memory mirror of the session collection, written back whole after
/// every mutation.
///
/// The collection keeps insertion order (new sessions are prepended); the
/// sidebar order comes from [`SessionStore::display_order`].
pub struct SessionStore {
    kv: Arc<dyn KeyValueStore>,
    sessions: Vec<Session>,
}

impl SessionStore {
    /// Open the store and load whatever collection the substrate holds.
    pub fn open(kv: Arc<dyn KeyValueStore>) -> Self {
        let sessions = read_sessions(kv.as_ref());
        Self { kv, sessions }
    }

    /// Re-read the collection from the substrate, discarding the mirror.
    pub fn load(&mut self) -> &[Session] {
        self.sessions = read_sessions(self.kv.as_ref());
        &self.sessions
    }

    /// Replace the whole collection.  Later duplicates of an id are dropped.
    pub fn save_all(&mut self, sessions: Vec<Session>) -> Result<(), StoreError> {
        self.commit(|all| *all = dedupe(sessions))
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Record a completed exchange.
    ///
    /// With `id == None`, or an id that is no longer in the collection, a new
    /// session is minted, titled from `user_text` and prepended.  Otherwise
    /// the session's message list, `updated_at` and model snapshot are
    /// replaced; its title is left alone.
    pub fn upsert_turn(
        &mut self,
        id: Option<&str>,
        user_text: &str,
        messages: Vec<Message>,
        snapshot: ModelSnapshot,
    ) -> Result<String, StoreError> {
        let existing = id.filter(|id| self.contains(id)).map(str::to_string);
        match existing {
            Some(id) => {
                self.commit(|all| {
                    if let Some(session) = find_mut(all, &id) {
                        session.messages = messages;
                        session.updated_at = Utc::now();
                        session.model_config = snapshot;
                    }
                })?;
                debug!(session_id = %id, "updated session");
                Ok(id)
            }
            None => {
                if let Some(stale) = id {
                    warn!(session_id = %stale, "session vanished during turn; creating a new one");
                }
                let new_id = self.mint_id();
                let session = Session::new(new_id.clone(), derive_title(user_text), messages, snapshot);
                self.commit(|all| all.insert(0, session))?;
                info!(session_id = %new_id, "created session");
                Ok(new_id)
            }
        }
    }

    /// Time-based id; bumped past any id already present.
    fn mint_id(&self) -> String {
        let mut millis = Utc::now().timestamp_millis();
        loop {
            let id = format!("chat_{millis}");
            if !self.contains(&id) {
                return id;
            }
            millis += 1;
        }
    }

    // ── Mutation helpers ─────────────────────────────────────────────────────

    /// Returns `false` when the id is unknown or the trimmed title is empty.
    pub fn rename(&mut self, id: &str, title: &str) -> Result<bool, StoreError> {
        let title = title.trim();
        if title.is_empty() {
            return Ok(false);
        }
        self.update_session(id, |s| s.title = title.to_string())
    }

    pub fn delete(&mut self, id: &str) -> Result<bool, StoreError> {
        if !self.contains(id) {
            return Ok(false);
        }
        self.commit(|all| all.retain(|s| s.id != id))?;
        info!(session_id = %id, "deleted session");
        Ok(true)
    }

    pub fn set_pinned(&mut self, id: &str, pinned: bool) -> Result<bool, StoreError> {
        self.update_session(id, |s| s.pinned = pinned)
    }

    pub fn set_archived(&mut self, id: &str, archived: bool) -> Result<bool, StoreError> {
        self.update_session(id, |s| s.archived = archived)
    }

    /// Flip the bookmark flag; returns the updated message, or `None` when
    /// either id is unknown.
    pub fn toggle_bookmark(&mut self, session_id: &str, message_id: &str) -> Result<Option<Message>, StoreError> {
        self.update_message(session_id, message_id, |m| m.bookmarked = !m.bookmarked)
    }

    pub fn toggle_reaction(
        &mut self,
        session_id: &str,
        message_id: &str,
        reaction: &str,
    ) -> Result<Option<Message>, StoreError> {
        self.update_message(session_id, message_id, |m| {
            m.toggle_reaction(reaction);
        })
    }

    pub fn clear_all(&mut self) -> Result<(), StoreError> {
        self.kv.remove(SESSIONS_KEY)?;
        self.sessions.clear();
        Ok(())
    }

    fn update_session(&mut self, id: &str, f: impl FnOnce(&mut Session)) -> Result<bool, StoreError> {
        if !self.contains(id) {
            return Ok(false);
        }
        self.commit(|all| {
            if let Some(session) = find_mut(all, id) {
                f(session);
            }
        })?;
        Ok(true)
    }

    fn update_message(
        &mut self,
        session_id: &str,
        message_id: &str,
        f: impl FnOnce(&mut Message),
    ) -> Result<Option<Message>, StoreError> {
        let known = self
            .get(session_id)
            .is_some_and(|s| s.messages.iter().any(|m| m.id == message_id));
        if !known {
            return Ok(None);
        }
        self.commit(|all| {
            find_mut(all, session_id)
                .and_then(|s| s.message_mut(message_id))
                .map(|m| {
                    f(m);
                    m.clone()
                })
        })
    }

    /// Apply `f` to a copy of the collection; the mirror only takes the copy
    /// once it has been written.
    fn commit<T>(&mut self, f: impl FnOnce(&mut Vec<Session>) -> T) -> Result<T, StoreError> {
        let mut next = self.sessions.clone();
        let out = f(&mut next);
        let json = serde_json::to_string(&next)?;
        self.kv.set(SESSIONS_KEY, &json)?;
        debug!(sessions = next.len(), "persisted session collection");
        self.sessions = next;
        Ok(out)
    }

    /// Sidebar order: pinned first, then most recently updated.
    pub fn display_order(&self, include_archived: bool) -> Vec<&Session> {
        let mut out: Vec<&Session> = self
            .sessions
            .iter()
            .filter(|s| include_archived || !s.archived)
            .collect();
        out.sort_by(|a, b| b.pinned.cmp(&a.pinned).then(b.updated_at.cmp(&a.updated_at)));
        out
    }

    /// Case-insensitive match over titles and message text, archived
    /// sessions included, in display order.
    pub fn search(&self, query: &str) -> Vec<&Session> {
        let needle = query.trim().to_lowercase();
        self.display_order(true)
            .into_iter()
            .filter(|s| needle.is_empty() || s.matches(&needle))
            .collect()
    }

    // ── Settings ─────────────────────────────────────────────────────────────

    /// Stored settings, or `fallback` when absent or unreadable.
    pub fn load_settings(&self, fallback: &Settings) -> Settings {
        let raw = match self.kv.get(SETTINGS_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return fallback.clone().normalized(),
            Err(e) => {
                warn!("could not read settings, using defaults: {e}");
                return fallback.clone().normalized();
            }
        };
        match serde_json::from_str::<Settings>(&raw) {
            Ok(s) => s.normalized(),
            Err(e) => {
                warn!("stored settings are malformed, using defaults: {e}");
                fallback.clone().normalized()
            }
        }
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<Settings, StoreError> {
        let settings = settings.clone().normalized();
        self.kv.set(SETTINGS_KEY, &serde_json::to_string(&settings)?)?;
        Ok(settings)
    }
}

fn read_sessions(kv: &dyn KeyValueStore) -> Vec<Session> {
    let raw = match kv.get(SESSIONS_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(e) => {
            warn!("could not read sessions, starting empty: {e}");
            return Vec::new();
        }
    };
    match serde_json::from_str::<Vec<Session>>(&raw) {
        Ok(sessions) => dedupe(sessions),
        Err(e) => {
            warn!("stored sessions are malformed, starting empty: {e}");
            Vec::new()
        }
    }
}

fn find_mut<'a>(sessions: &'a mut [Session], id: &str) -> Option<&'a mut Session> {
    sessions.iter_mut().find(|s| s.id == id)
}

fn dedupe(sessions: Vec<Session>) -> Vec<Session> {
    let mut seen = HashSet::new();
    sessions.into_iter().filter(|s| seen.insert(s.id.clone())).collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::kv::{FileStore, FlakyStore, MemoryStore};

    fn store() -> SessionStore {
        SessionStore::open(Arc::new(MemoryStore::new()))
    }

    fn exchange(q: &str, a: &str) -> Vec<Message> {
        vec![Message::user(q), Message::model(a)]
    }

    fn add(store: &mut SessionStore, q: &str) -> String {
        store.upsert_turn(None, q, exchange(q, "ok"), ModelSnapshot::default()).unwrap()
    }

    #[test]
    fn new_turn_creates_titled_session_first() {
        let mut s = store();
        let a = add(&mut s, "first question");
        let b = add(&mut s, "second question");
        assert_ne!(a, b);
        assert!(b.starts_with("chat_"));
        assert_eq!(s.sessions()[0].id, b);
        assert_eq!(s.get(&a).unwrap().title, "first question");
    }

    #[test]
    fn existing_turn_replaces_messages_keeps_title() {
        let mut s = store();
        let id = add(&mut s, "hello");
        let created = s.get(&id).unwrap().created_at;
        let mut msgs = s.get(&id).unwrap().messages.clone();
        msgs.extend(exchange("a completely different prompt", "x"));
        let same = s.upsert_turn(Some(id.as_str()), "a completely different prompt", msgs, ModelSnapshot::default()).unwrap();
        assert_eq!(same, id);
        let session = s.get(&id).unwrap();
        assert_eq!(session.title, "hello");
        assert_eq!(session.messages.len(), 4);
        assert_eq!(session.created_at, created);
        assert!(session.updated_at >= created);
        assert_eq!(s.sessions().len(), 1);
    }

    #[test]
    fn upsert_unknown_id_creates_session() {
        let mut s = store();
        let id = s.upsert_turn(Some("chat_gone"), "q", exchange("q", "a"), ModelSnapshot::default()).unwrap();
        assert_ne!(id, "chat_gone");
        assert!(s.contains(&id));
    }

    #[test]
    fn minted_ids_never_collide() {
        let mut s = store();
        let ids: HashSet<String> = (0..20).map(|i| add(&mut s, &format!("q{i}"))).collect();
        assert_eq!(ids.len(), 20);
    }

    #[test]
    fn collection_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let kv: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(dir.path()).unwrap());
        let id = {
            let mut s = SessionStore::open(kv.clone());
            add(&mut s, "persist me")
        };
        let s = SessionStore::open(kv);
        assert_eq!(s.get(&id).unwrap().messages[1].text, "ok");
    }

    #[test]
    fn malformed_collection_loads_empty() {
        let kv = Arc::new(MemoryStore::new());
        kv.set(SESSIONS_KEY, "{not json").unwrap();
        let s = SessionStore::open(kv);
        assert!(s.sessions().is_empty());
    }

    #[test]
    fn duplicate_ids_are_dropped_on_load() {
        let kv = Arc::new(MemoryStore::new());
        let one = Session::new("dup".into(), "one".into(), vec![], ModelSnapshot::default());
        let two = Session::new("dup".into(), "two".into(), vec![], ModelSnapshot::default());
        kv.set(SESSIONS_KEY, &serde_json::to_string(&vec![one, two]).unwrap()).unwrap();
        let s = SessionStore::open(kv);
        assert_eq!(s.sessions().len(), 1);
        assert_eq!(s.sessions()[0].title, "one");
    }

    #[test]
    fn delete_leaves_other_sessions_untouched() {
        let mut s = store();
        let a = add(&mut s, "a");
        let b = add(&mut s, "b");
        let before = s.get(&b).unwrap().clone();
        assert!(s.delete(&a).unwrap());
        assert!(!s.contains(&a));
        assert_eq!(s.get(&b).unwrap(), &before);
        assert!(!s.delete(&a).unwrap());
    }

    #[test]
    fn rename_trims_and_rejects_empty() {
        let mut s = store();
        let id = add(&mut s, "q");
        assert!(!s.rename(&id, "   ").unwrap());
        assert!(s.rename(&id, "  New name ").unwrap());
        assert_eq!(s.get(&id).unwrap().title, "New name");
        assert!(!s.rename("missing", "x").unwrap());
    }

    #[test]
    fn display_order_pins_first_then_recency() {
        let mut s = store();
        let old = add(&mut s, "old");
        let new = add(&mut s, "new");
        let arch = add(&mut s, "archived");
        let now = Utc::now();
        let mut all = s.sessions().to_vec();
        for sess in &mut all {
            sess.updated_at = match sess.id.as_str() {
                id if id == old => now - Duration::hours(2),
                id if id == new => now - Duration::hours(1),
                _ => now,
            };
        }
        s.save_all(all).unwrap();
        s.set_archived(&arch, true).unwrap();
        s.set_pinned(&old, true).unwrap();

        let order: Vec<&str> = s.display_order(false).iter().map(|x| x.id.as_str()).collect();
        assert_eq!(order, vec![old.as_str(), new.as_str()]);
        let with_archived: Vec<&str> = s.display_order(true).iter().map(|x| x.id.as_str()).collect();
        assert_eq!(with_archived, vec![old.as_str(), arch.as_str(), new.as_str()]);
    }

    #[test]
    fn search_matches_title_and_body_case_insensitively() {
        let mut s = store();
        let a = add(&mut s, "Rust lifetimes");
        s.upsert_turn(None, "other", exchange("other", "mentions RUST too"), ModelSnapshot::default())
            .unwrap();
        add(&mut s, "unrelated");
        assert_eq!(s.search("rust").len(), 2);
        assert_eq!(s.search("LIFETIMES")[0].id, a);
        assert!(s.search("zzz").is_empty());
    }

    #[test]
    fn bookmark_and_reaction_toggle_persist() {
        let kv = Arc::new(MemoryStore::new());
        let mut s = SessionStore::open(kv.clone());
        let id = add(&mut s, "q");
        let mid = s.get(&id).unwrap().messages[1].id.clone();

        let m = s.toggle_bookmark(&id, &mid).unwrap().unwrap();
        assert!(m.bookmarked);
        let m = s.toggle_reaction(&id, &mid, "👍").unwrap().unwrap();
        assert_eq!(m.reactions, vec!["👍".to_string()]);
        assert!(s.toggle_bookmark(&id, "nope").unwrap().is_none());

        let reopened = SessionStore::open(kv);
        let msg = &reopened.get(&id).unwrap().messages[1];
        assert!(msg.bookmarked);
        assert_eq!(msg.reactions.len(), 1);
    }

    #[test]
    fn failed_write_leaves_mirror_unchanged() {
        let kv = Arc::new(FlakyStore::default());
        let mut s = SessionStore::open(kv.clone());
        let kept = add(&mut s, "kept");

        kv.set_failing(true);
        assert!(s.upsert_turn(None, "lost", exchange("lost", "x"), ModelSnapshot::default()).is_err());
        assert!(s.rename(&kept, "renamed").is_err());
        assert!(s.set_pinned(&kept, true).is_err());
        assert!(s.delete(&kept).is_err());
        assert!(s.clear_all().is_err());
        assert_eq!(s.sessions().len(), 1);
        assert_eq!(s.get(&kept).unwrap().title, "kept");
        assert!(!s.get(&kept).unwrap().pinned);

        kv.set_failing(false);
        add(&mut s, "later");
        let titles: Vec<String> = SessionStore::open(kv).sessions().iter().map(|x| x.title.clone()).collect();
        assert_eq!(titles, vec!["later".to_string(), "kept".to_string()]);
    }

    #[test]
    fn clear_all_empties_substrate() {
        let kv = Arc::new(MemoryStore::new());
        let mut s = SessionStore::open(kv.clone());
        add(&mut s, "q");
        s.clear_all().unwrap();
        assert!(s.sessions().is_empty());
        assert_eq!(kv.get(SESSIONS_KEY).unwrap(), None);
    }

    #[test]
    fn settings_fall_back_and_round_trip() {
        let kv = Arc::new(MemoryStore::new());
        let s = SessionStore::open(kv.clone());
        let fallback = Settings::default();
        assert_eq!(s.load_settings(&fallback), fallback);

        kv.set(SETTINGS_KEY, "{broken").unwrap();
        assert_eq!(s.load_settings(&fallback), fallback);

        let custom = Settings { temperature: 3.0, model: "gemini-pro".into(), ..Settings::default() };
        let saved = s.save_settings(&custom).unwrap();
        assert_eq!(saved.temperature, 1.0);
        let loaded = s.load_settings(&fallback);
        assert_eq!(loaded.model, "gemini-pro");
        assert_eq!(loaded.temperature, 1.0);
    }
}
