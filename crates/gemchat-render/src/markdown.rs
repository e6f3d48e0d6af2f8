// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::escape::escape_html;

/// CSS class on every rendered code block.  Syntax highlighters look for it
/// together with the `language-<name>` class on the inner `<code>`.
pub const CODE_BLOCK_CLASS: &str = "code-block";

/// Language tag used when a fence has no info string.
pub const DEFAULT_LANGUAGE: &str = "plaintext";

// Private-use code points delimit code-block placeholders.  Any occurrence in
// the raw input is replaced before extraction, so a placeholder can never be
// forged from message text.
const SENTINEL_OPEN: char = '\u{E000}';
const SENTINEL_CLOSE: char = '\u{E001}';

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```([A-Za-z0-9_+#.-]*)[ \t]*\n(.*?)```").unwrap())
}

fn bold_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*\*(.+?)\*\*").unwrap())
}

fn italic_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*([^*\n]+)\*").unwrap())
}

fn inline_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"`([^`\n]+)`").unwrap())
}

fn link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\]\n]+)\]\(([^)\s]+)\)").unwrap())
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("\u{E000}([0-9]+)\u{E001}").unwrap())
}

/// Render raw message text to an HTML fragment.
///
/// Steps, each on the output of the previous one:
/// 1. fenced code blocks are cut out, escaped on their own and replaced by
///    placeholders;
/// 2. the remaining text is escaped;
/// 3. inline transforms run in order: bold, italic, inline code, links,
///    then line breaks;
/// 4. placeholders are swapped back for the code-block markup.
///
/// Every byte of `raw` goes through [`escape_html`] exactly once.
pub fn render(raw: &str) -> String {
    let normalized = normalize(raw);

    let mut blocks: Vec<String> = Vec::new();
    let extracted = fence_re().replace_all(&normalized, |caps: &Captures| {
        let lang = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let body = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let idx = blocks.len();
        blocks.push(code_block_html(lang, body));
        format!("{SENTINEL_OPEN}{idx}{SENTINEL_CLOSE}")
    });

    let escaped = escape_html(&extracted);
    let inline = apply_inline(&escaped);
    restore_blocks(&inline, &blocks)
}

fn normalize(raw: &str) -> String {
    raw.replace("\r\n", "\n")
        .replace(&[SENTINEL_OPEN, SENTINEL_CLOSE][..], "\u{FFFD}")
}

fn code_block_html(lang: &str, body: &str) -> String {
    let lang = if lang.is_empty() { DEFAULT_LANGUAGE } else { lang };
    format!(
        "<pre class=\"{CODE_BLOCK_CLASS}\" data-lang=\"{lang}\"><code class=\"language-{lang}\">{}</code></pre>",
        escape_html(body)
    )
}

fn apply_inline(escaped: &str) -> String {
    let text = bold_re().replace_all(escaped, "<strong>${1}</strong>");
    let text = italic_re().replace_all(&text, "<em>${1}</em>");
    let text = inline_code_re().replace_all(&text, "<code>${1}</code>");
    let text = link_re().replace_all(&text, |caps: &Captures| {
        let label = &caps[1];
        // A code block may not end up inside an anchor or its href.
        if [label, &caps[2]].iter().any(|s| s.contains(&[SENTINEL_OPEN, SENTINEL_CLOSE][..])) {
            return caps[0].to_string();
        }
        let url = strip_inline_tags(&caps[2]);
        if is_safe_url(&url) {
            format!("<a href=\"{url}\" target=\"_blank\" rel=\"noopener noreferrer\">{label}</a>")
        } else {
            label.to_string()
        }
    });
    text.replace('\n', "<br>")
}

/// Undo emphasis and inline code inside a link target.  The text was escaped
/// before the inline transforms ran, so every tag here is one of ours.
fn strip_inline_tags(url: &str) -> String {
    url.replace("<strong>", "**")
        .replace("</strong>", "**")
        .replace("<em>", "*")
        .replace("</em>", "*")
        .replace("<code>", "`")
        .replace("</code>", "`")
}

/// Only web, mail and scheme-less (relative) targets become links.
fn is_safe_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("mailto:") {
        return true;
    }
    let head_end = lower.find(&['/', '?', '#'][..]).unwrap_or(lower.len());
    !lower[..head_end].contains(':')
}

fn restore_blocks(text: &str, blocks: &[String]) -> String {
    if blocks.is_empty() {
        return text.to_string();
    }
    placeholder_re()
        .replace_all(text, |caps: &Captures| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|i| blocks.get(i))
                .cloned()
                .unwrap_or_default()
        })
        .into_owned()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
