// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Google Gemini driver for the native Generative Language API.
//!
//! Uses the `streamGenerateContent` endpoint with server-sent events.
//!
//! # Auth
//! API key via the `x-goog-api-key` header.
//!
//! # Endpoint pattern
//! `POST https://generativelanguage.googleapis.com/v1beta/models/{model}:streamGenerateContent?alt=sse`

use std::collections::VecDeque;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tracing::debug;

use crate::{provider::ResponseStream, CompletionRequest, ResponseEvent};

pub struct GoogleProvider {
    model: String,
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(model: String, api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            model,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://generativelanguage.googleapis.com".into()),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url.trim_end_matches('/'),
            model
        )
    }
}

#[async_trait]
impl crate::ModelProvider for GoogleProvider {
    fn name(&self) -> &str { "google" }
    fn model_name(&self) -> &str { &self.model }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let key = self.api_key.as_deref().context("GEMINI_API_KEY not set")?;
        let model = if req.model.is_empty() { self.model.as_str() } else { req.model.as_str() };

        let body = request_body(&req);
        debug!(model = %model, prompt_chars = req.prompt.chars().count(), "sending Google Gemini request");

        let resp = self.client
            .post(self.endpoint(model))
            .header("x-goog-api-key", key)
            .json(&body)
            .send()
            .await
            .context("Google Gemini request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Google Gemini error {status}: {}", api_error_message(&text).unwrap_or(text));
        }

        Ok(decode_sse(resp.bytes_stream()))
    }
}

fn request_body(req: &CompletionRequest) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [{ "text": req.prompt }],
        }],
        "generationConfig": {
            "temperature": req.temperature,
            "maxOutputTokens": req.max_output_tokens,
        }
    })
}

/// Pull `error.message` out of a Gemini error body, if it is one.
fn api_error_message(body: &str) -> Option<String> {
    let v: Value = serde_json::from_str(body).ok()?;
    v["error"]["message"].as_str().map(str::to_string)
}

// ─── SSE decoding ────────────────────────────────────────────────────────────

/// Line-buffered SSE decoder.  Network chunks may split a `data:` line (and a
/// multi-byte character) anywhere, so bytes are held until a newline arrives.
#[derive(Default)]
struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    fn feed(&mut self, chunk: &[u8], out: &mut VecDeque<anyhow::Result<ResponseEvent>>) {
        self.buf.extend_from_slice(chunk);
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            decode_line(&String::from_utf8_lossy(&line), out);
        }
    }

    fn finish(&mut self, out: &mut VecDeque<anyhow::Result<ResponseEvent>>) {
        if !self.buf.is_empty() {
            let line = std::mem::take(&mut self.buf);
            decode_line(&String::from_utf8_lossy(&line), out);
        }
    }
}

fn decode_line(line: &str, out: &mut VecDeque<anyhow::Result<ResponseEvent>>) {
    let Some(data) = line.trim_end().strip_prefix("data:") else {
        return;
    };
    let data = data.trim();
    if data.is_empty() {
        return;
    }
    if data == "[DONE]" {
        out.push_back(Ok(ResponseEvent::Done));
        return;
    }
    match serde_json::from_str::<Value>(data) {
        Ok(v) => match parse_gemini_chunk(&v) {
            Ok(events) => out.extend(events.into_iter().map(Ok)),
            Err(e) => out.push_back(Err(e)),
        },
        Err(e) => out.push_back(Err(anyhow!(e).context("malformed Gemini stream chunk"))),
    }
}

struct SseState<S> {
    bytes: S,
    decoder: SseDecoder,
    pending: VecDeque<anyhow::Result<ResponseEvent>>,
    finished: bool,
}

/// Turn a byte stream of SSE frames into a [`ResponseStream`].
fn decode_sse<S, B, E>(bytes: S) -> ResponseStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let state = SseState {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };
    let stream = futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(ev) = st.pending.pop_front() {
                return Some((ev, st));
            }
            if st.finished {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(chunk)) => st.decoder.feed(chunk.as_ref(), &mut st.pending),
                Some(Err(e)) => {
                    st.finished = true;
                    st.pending.push_back(Err(anyhow!(e).context("Gemini stream interrupted")));
                }
                None => {
                    st.finished = true;
                    st.decoder.finish(&mut st.pending);
                }
            }
        }
    });
    Box::pin(stream)
}

/// Translate one streamed `GenerateContentResponse` into events.
///
/// A single chunk may carry text, usage metadata and a finish reason at once,
/// so all three are emitted in that order.
fn parse_gemini_chunk(v: &Value) -> anyhow::Result<Vec<ResponseEvent>> {
    if let Some(err) = v.get("error") {
        let msg = err["message"].as_str().unwrap_or("unknown error");
        bail!("Google Gemini stream error: {msg}");
    }
    if let Some(reason) = v["promptFeedback"]["blockReason"].as_str() {
        bail!("prompt blocked: {reason}");
    }

    let mut events = Vec::new();
    let candidate = &v["candidates"][0];

    let mut text = String::new();
    if let Some(parts) = candidate["content"]["parts"].as_array() {
        for part in parts {
            if part.get("thought").and_then(Value::as_bool) == Some(true) {
                continue;
            }
            if let Some(t) = part["text"].as_str() {
                text.push_str(t);
            }
        }
    }
    let has_text = !text.is_empty();
    if has_text {
        events.push(ResponseEvent::TextDelta(text));
    }

    if let Some(meta) = v.get("usageMetadata") {
        events.push(ResponseEvent::Usage {
            input_tokens: meta["promptTokenCount"].as_u64().unwrap_or(0) as u32,
            output_tokens: meta["candidatesTokenCount"].as_u64().unwrap_or(0) as u32,
        });
    }

    if let Some(reason) = candidate["finishReason"].as_str() {
        match reason {
            "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" if !has_text => {
                bail!("response blocked: {reason}");
            }
            _ => events.push(ResponseEvent::Done),
        }
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModelProvider;

    async fn collect(stream: ResponseStream) -> Vec<anyhow::Result<ResponseEvent>> {
        stream.collect().await
    }

    fn frames(chunks: &[&str]) -> ResponseStream {
        let owned: Vec<Result<Vec<u8>, std::io::Error>> =
            chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect();
        decode_sse(futures::stream::iter(owned))
    }

    #[test]
    fn provider_name() {
        let p = GoogleProvider::new("gemini-1.5-flash".into(), None, None);
        assert_eq!(p.name(), "google");
        assert_eq!(p.model_name(), "gemini-1.5-flash");
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let p = GoogleProvider::new("m".into(), None, Some("http://localhost:9/".into()));
        assert_eq!(
            p.endpoint("gemini-pro"),
            "http://localhost:9/v1beta/models/gemini-pro:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn request_body_carries_generation_config() {
        let mut req = CompletionRequest::new("hello", "gemini-pro");
        req.temperature = 0.25;
        req.max_output_tokens = 512;
        let body = request_body(&req);
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 512);
        assert_eq!(body["generationConfig"]["temperature"], 0.25);
    }

    #[tokio::test]
    async fn complete_without_key_fails() {
        let p = GoogleProvider::new("gemini-pro".into(), None, None);
        let err = p.complete(CompletionRequest::new("x", "")).await.err().unwrap();
        assert!(err.to_string().contains("GEMINI_API_KEY"));
    }

    #[test]
    fn text_delta_parsed() {
        let v = json!({ "candidates": [{ "content": { "parts": [{ "text": "hello" }] } }] });
        let ev = parse_gemini_chunk(&v).unwrap();
        assert_eq!(ev, vec![ResponseEvent::TextDelta("hello".into())]);
    }

    #[test]
    fn text_usage_and_finish_in_one_chunk() {
        let v = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "bye" }] },
                "finishReason": "STOP"
            }],
            "usageMetadata": { "promptTokenCount": 100, "candidatesTokenCount": 50 }
        });
        let ev = parse_gemini_chunk(&v).unwrap();
        assert_eq!(
            ev,
            vec![
                ResponseEvent::TextDelta("bye".into()),
                ResponseEvent::Usage { input_tokens: 100, output_tokens: 50 },
                ResponseEvent::Done,
            ]
        );
    }

    #[test]
    fn thought_parts_are_skipped() {
        let v = json!({
            "candidates": [{ "content": { "parts": [
                { "text": "thinking...", "thought": true },
                { "text": "answer" }
            ] } }]
        });
        let ev = parse_gemini_chunk(&v).unwrap();
        assert_eq!(ev, vec![ResponseEvent::TextDelta("answer".into())]);
    }

    #[test]
    fn safety_stop_without_text_is_error() {
        let v = json!({ "candidates": [{ "finishReason": "SAFETY" }] });
        assert!(parse_gemini_chunk(&v).is_err());
    }

    #[test]
    fn error_object_is_error() {
        let v = json!({ "error": { "code": 429, "message": "quota exceeded" } });
        let err = parse_gemini_chunk(&v).unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[test]
    fn api_error_message_extracted() {
        let body = r#"{"error":{"code":400,"message":"API key not valid"}}"#;
        assert_eq!(api_error_message(body).as_deref(), Some("API key not valid"));
        assert_eq!(api_error_message("plain text"), None);
    }

    #[tokio::test]
    async fn sse_line_split_across_chunks() {
        let stream = frames(&[
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"te",
            "xt\":\"Hel\"}]}}]}\n\ndata: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"lo\"}]}}]}\n",
        ]);
        let events: Vec<ResponseEvent> =
            collect(stream).await.into_iter().map(|e| e.unwrap()).collect();
        assert_eq!(
            events,
            vec![ResponseEvent::TextDelta("Hel".into()), ResponseEvent::TextDelta("lo".into())]
        );
    }

    #[tokio::test]
    async fn sse_multibyte_char_split_across_chunks() {
        let line = "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"é\"}]}}]}\n";
        let bytes = line.as_bytes();
        let split = line.find('é').unwrap() + 1;
        let owned: Vec<Result<Vec<u8>, std::io::Error>> =
            vec![Ok(bytes[..split].to_vec()), Ok(bytes[split..].to_vec())];
        let events = collect(decode_sse(futures::stream::iter(owned))).await;
        assert!(matches!(&events[0], Ok(ResponseEvent::TextDelta(t)) if t == "é"));
    }

    #[tokio::test]
    async fn sse_trailing_line_without_newline_is_flushed() {
        let stream = frames(&["data: {\"candidates\":[{\"finishReason\":\"STOP\"}]}"]);
        let events = collect(stream).await;
        assert!(matches!(events.as_slice(), [Ok(ResponseEvent::Done)]));
    }

    #[tokio::test]
    async fn sse_malformed_json_is_error_item() {
        let events = collect(frames(&["data: {not json\n"])).await;
        assert!(events[0].is_err());
    }

    #[tokio::test]
    async fn transport_error_ends_stream_with_error() {
        let owned: Vec<Result<Vec<u8>, std::io::Error>> = vec![
            Ok(b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"a\"}]}}]}\n".to_vec()),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            Ok(b"data: [DONE]\n".to_vec()),
        ];
        let events = collect(decode_sse(futures::stream::iter(owned))).await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(events[1].is_err());
    }
}
