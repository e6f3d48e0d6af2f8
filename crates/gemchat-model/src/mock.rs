// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use futures::stream;

use crate::{provider::ResponseStream, CompletionRequest, ResponseEvent};

/// Deterministic mock provider.  Echoes the prompt back as the response,
/// split into two deltas so consumers see real streaming.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl crate::ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let events: Vec<anyhow::Result<ResponseEvent>> = vec![
            Ok(ResponseEvent::TextDelta("MOCK: ".into())),
            Ok(ResponseEvent::TextDelta(req.prompt)),
            Ok(ResponseEvent::Usage { input_tokens: 10, output_tokens: 10 }),
            Ok(ResponseEvent::Done),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// One step in a scripted response stream.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Event(ResponseEvent),
    /// Yield an `Err` item; the consumer sees a transport failure.
    Fail(String),
}

/// A scripted reply for one call to `complete`.
#[derive(Debug, Clone)]
pub enum Script {
    Stream(Vec<ScriptStep>),
    /// `complete` itself fails; no stream is opened.
    OpenError(String),
}

/// A pre-scripted mock provider.  Each call to `complete` pops the next
/// script from the front of the queue, so tests can specify exact chunk
/// sequences and failures without network access.
pub struct ScriptedMockProvider {
    scripts: Arc<Mutex<Vec<Script>>>,
    name: String,
    calls: AtomicUsize,
    /// The last `CompletionRequest` seen by this provider.
    pub last_request: Arc<Mutex<Option<CompletionRequest>>>,
}

impl ScriptedMockProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            name: "scripted-mock".into(),
            calls: AtomicUsize::new(0),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Convenience: a stream of text deltas followed by `Done`.
    pub fn chunks(deltas: &[&str]) -> Script {
        let mut steps: Vec<ScriptStep> = deltas
            .iter()
            .map(|d| ScriptStep::Event(ResponseEvent::TextDelta((*d).to_string())))
            .collect();
        steps.push(ScriptStep::Event(ResponseEvent::Done));
        Script::Stream(steps)
    }

    /// Convenience: some deltas, then a mid-stream failure.
    pub fn failing_after(deltas: &[&str], error: impl Into<String>) -> Script {
        let mut steps: Vec<ScriptStep> = deltas
            .iter()
            .map(|d| ScriptStep::Event(ResponseEvent::TextDelta((*d).to_string())))
            .collect();
        steps.push(ScriptStep::Fail(error.into()));
        Script::Stream(steps)
    }

    /// Convenience: provider that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        let r = reply.into();
        Self::new(vec![Script::Stream(vec![
            ScriptStep::Event(ResponseEvent::TextDelta(r)),
            ScriptStep::Event(ResponseEvent::Usage { input_tokens: 5, output_tokens: 5 }),
            ScriptStep::Event(ResponseEvent::Done),
        ])])
    }

    /// Number of streams opened (or attempted) so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl crate::ModelProvider for ScriptedMockProvider {
    fn name(&self) -> &str {
        &self.name
    }
    fn model_name(&self) -> &str {
        "scripted-mock-model"
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(req);
        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Default fallback when all scripts are consumed
                Self::chunks(&["[no more scripts]"])
            } else {
                scripts.remove(0)
            }
        };
        match script {
            Script::OpenError(msg) => Err(anyhow!(msg)),
            Script::Stream(steps) => {
                let items: Vec<anyhow::Result<ResponseEvent>> = steps
                    .into_iter()
                    .map(|s| match s {
                        ScriptStep::Event(ev) => Ok(ev),
                        ScriptStep::Fail(msg) => Err(anyhow!(msg)),
                    })
                    .collect();
                Ok(Box::pin(stream::iter(items)))
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
