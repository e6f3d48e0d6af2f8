// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Markdown → safe HTML for chat messages.
//!
//! [`render`] is a pure function of the raw message text.  Callers keep the
//! raw text as the source of truth and re-render from it; the HTML output is
//! never fed back into [`render`].
mod escape;
mod markdown;

pub use escape::escape_html;
pub use markdown::{render, CODE_BLOCK_CLASS, DEFAULT_LANGUAGE};
