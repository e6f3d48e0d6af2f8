// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::{CompletionRequest, ResponseEvent};

/// A finite, non-restartable sequence of response events.  A retry always
/// opens a brand-new stream through [`ModelProvider::complete`].
pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider name for status display.
    fn name(&self) -> &str;

    /// Default model identifier as reported to users.  The request may
    /// override it per call.
    fn model_name(&self) -> &str;

    /// Send a completion request and return a streaming response.
    ///
    /// An `Err` here means the stream could not be opened at all; failures
    /// after that surface as `Err` items inside the stream.
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream>;
}
