// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use gemchat_config::Settings;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest title kept verbatim; longer prompts are cut to 27 chars + "...".
pub const TITLE_MAX_CHARS: usize = 30;
const TITLE_KEEP_CHARS: usize = TITLE_MAX_CHARS - 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One turn of a conversation.  `text` is the raw, unescaped source; HTML is
/// always derived from it and never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub bookmarked: bool,
}

impl Message {
    fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            text: text.into(),
            timestamp: Utc::now(),
            reactions: Vec::new(),
            bookmarked: false,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::new(Role::Model, text)
    }

    /// Toggle `reaction`; returns `true` when it is now present.
    pub fn toggle_reaction(&mut self, reaction: &str) -> bool {
        if let Some(pos) = self.reactions.iter().position(|r| r == reaction) {
            self.reactions.remove(pos);
            false
        } else {
            self.reactions.push(reaction.to_string());
            true
        }
    }
}

/// Generation settings in effect when a session last received a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSnapshot {
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for ModelSnapshot {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for ModelSnapshot {
    fn from(s: &Settings) -> Self {
        Self {
            model: s.model.clone(),
            temperature: s.temperature,
            max_output_tokens: s.max_output_tokens,
        }
    }
}

/// A persisted conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub model_config: ModelSnapshot,
}

impl Session {
    pub fn new(id: String, title: String, messages: Vec<Message>, model_config: ModelSnapshot) -> Self {
        let now = Utc::now();
        Self {
            id,
            title,
            messages,
            created_at: now,
            updated_at: now,
            pinned: false,
            archived: false,
            model_config,
        }
    }

    pub fn message_mut(&mut self, message_id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == message_id)
    }

    /// The final model message together with the user prompt that produced
    /// it, when the conversation ends on a model turn.
    pub fn last_exchange(&self) -> Option<(&Message, &Message)> {
        let (last, rest) = self.messages.split_last()?;
        if last.role != Role::Model {
            return None;
        }
        let prompt = rest.iter().rev().find(|m| m.role == Role::User)?;
        Some((prompt, last))
    }

    pub fn matches(&self, needle_lower: &str) -> bool {
        self.title.to_lowercase().contains(needle_lower)
            || self.messages.iter().any(|m| m.text.to_lowercase().contains(needle_lower))
    }
}

/// Derive a sidebar title from the first user prompt.
///
/// The trimmed prompt is counted as given; line breaks and tabs become
/// single spaces so the title stays on one line.  Prompts longer than
/// [`TITLE_MAX_CHARS`] characters keep their first 27 characters followed by
/// `"..."`, giving exactly 30.
pub fn derive_title(prompt: &str) -> String {
    let line: String = prompt
        .trim()
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .collect();
    if line.chars().count() > TITLE_MAX_CHARS {
        let head: String = line.chars().take(TITLE_KEEP_CHARS).collect();
        format!("{head}...")
    } else {
        line
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_long_prompt_truncated_to_thirty() {
        let prompt = "a".repeat(40);
        let title = derive_title(&prompt);
        assert_eq!(title.chars().count(), 30);
        assert!(title.ends_with("..."));
        assert_eq!(&title[..27], &prompt[..27]);
    }

    #[test]
    fn title_short_prompt_unchanged() {
        assert_eq!(derive_title("0123456789"), "0123456789");
    }

    #[test]
    fn title_exactly_thirty_unchanged() {
        let prompt = "b".repeat(30);
        assert_eq!(derive_title(&prompt), prompt);
    }

    #[test]
    fn title_counts_chars_not_bytes() {
        let prompt = "é".repeat(31);
        let title = derive_title(&prompt);
        assert_eq!(title.chars().count(), 30);
        assert!(title.starts_with(&"é".repeat(27)));
    }

    #[test]
    fn title_keeps_inner_whitespace_length() {
        assert_eq!(derive_title("ab\n\ncd  ef"), "ab  cd  ef");
        assert_eq!(derive_title("  hello\tworld "), "hello world");
    }

    #[test]
    fn title_space_runs_count_toward_limit() {
        let prompt = format!("a{}{}", " ".repeat(20), "b".repeat(19));
        assert_eq!(prompt.chars().count(), 40);
        let title = derive_title(&prompt);
        assert_eq!(title.chars().count(), 30);
        assert!(title.ends_with("..."));
        assert_eq!(&title[..27], &prompt[..27]);
    }

    #[test]
    fn messages_get_unique_ids() {
        assert_ne!(Message::user("a").id, Message::user("a").id);
    }

    #[test]
    fn toggle_reaction_adds_then_removes() {
        let mut m = Message::model("x");
        assert!(m.toggle_reaction("👍"));
        assert_eq!(m.reactions, vec!["👍".to_string()]);
        assert!(!m.toggle_reaction("👍"));
        assert!(m.reactions.is_empty());
    }

    #[test]
    fn last_exchange_requires_trailing_model_message() {
        let mut s = Session::new("s".into(), "t".into(), vec![Message::user("q")], ModelSnapshot::default());
        assert!(s.last_exchange().is_none());
        s.messages.push(Message::model("a"));
        let (prompt, reply) = s.last_exchange().unwrap();
        assert_eq!(prompt.text, "q");
        assert_eq!(reply.text, "a");
    }

    #[test]
    fn message_json_field_names() {
        let mut m = Message::user("hi");
        m.bookmarked = true;
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["role"], "user");
        assert_eq!(v["text"], "hi");
        assert_eq!(v["bookmarked"], true);
        assert!(v.get("reactions").is_none());
        assert!(v.get("timestamp").is_some());
    }

    #[test]
    fn session_json_uses_camel_case() {
        let s = Session::new("s".into(), "t".into(), vec![], ModelSnapshot::default());
        let v = serde_json::to_value(&s).unwrap();
        assert!(v.get("createdAt").is_some());
        assert!(v.get("updatedAt").is_some());
        assert!(v["modelConfig"].get("maxOutputTokens").is_some());
    }

    #[test]
    fn session_missing_flags_default_false() {
        let json = r#"{"id":"a","title":"t","messages":[],
            "createdAt":"2024-01-01T00:00:00Z","updatedAt":"2024-01-01T00:00:00Z"}"#;
        let s: Session = serde_json::from_str(json).unwrap();
        assert!(!s.pinned);
        assert!(!s.archived);
    }
}
