// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::SecondsFormat;

use crate::session::{Role, Session};

fn sender(role: Role) -> &'static str {
    match role {
        Role::User => "You",
        Role::Model => "Gemini",
    }
}

/// Plain-text transcript: a fixed header, then `[time] Sender:` and the raw
/// text of every message in session order.
pub fn export_transcript(session: &Session) -> String {
    let mut out = String::new();
    out.push_str(&format!("Title: {}\n", session.title));
    out.push_str(&format!(
        "Created: {}\n",
        session.created_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    ));
    out.push_str(&format!(
        "Updated: {}\n",
        session.updated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    ));
    out.push_str(&format!("Model: {}\n\n", session.model_config.model));

    for msg in &session.messages {
        out.push_str(&format!(
            "[{}] {}:\n{}\n\n",
            msg.timestamp.format("%H:%M:%S"),
            sender(msg.role),
            msg.text
        ));
    }
    out
}

/// Pretty JSON of the session, same schema as storage.
pub fn export_json(session: &Session) -> serde_json::Result<String> {
    serde_json::to_string_pretty(session)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::session::{Message, ModelSnapshot};

    fn sample() -> Session {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 5).unwrap();
        let mut q = Message::user("What is 2+2?");
        q.timestamp = t;
        let mut a = Message::model("**4**");
        a.timestamp = t + chrono::Duration::seconds(2);
        let mut s = Session::new(
            "chat_1".into(),
            "What is 2+2?".into(),
            vec![q, a],
            ModelSnapshot { model: "gemini-pro".into(), temperature: 0.5, max_output_tokens: 100 },
        );
        s.created_at = t;
        s.updated_at = t;
        s
    }

    #[test]
    fn transcript_layout() {
        let expected = "Title: What is 2+2?\n\
                        Created: 2024-05-01T09:30:05Z\n\
                        Updated: 2024-05-01T09:30:05Z\n\
                        Model: gemini-pro\n\
                        \n\
                        [09:30:05] You:\nWhat is 2+2?\n\n\
                        [09:30:07] Gemini:\n**4**\n\n";
        assert_eq!(export_transcript(&sample()), expected);
    }

    #[test]
    fn json_export_reloads() {
        let s = sample();
        let back: Session = serde_json::from_str(&export_json(&s).unwrap()).unwrap();
        assert_eq!(back, s);
    }
}
