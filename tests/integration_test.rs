/// Integration tests for gemchat's core logic using the mock model provider
/// and a file-backed store in a scratch directory.
use std::sync::Arc;

use gemchat_config::{Config, Settings};
use gemchat_core::{
    export_transcript, ChatController, ChatEvent, Command, FileStore, KeyValueStore, SessionStore,
    STREAM_ERROR_TEXT,
};
use gemchat_model::{MockProvider, ModelProvider, Script, ScriptedMockProvider};
use gemchat_render::render;
use tokio::sync::mpsc;

fn file_controller(dir: &std::path::Path, model: Arc<dyn ModelProvider>) -> ChatController {
    let kv: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(dir).unwrap());
    ChatController::new(model, SessionStore::open(kv), &Settings::default())
}

#[tokio::test]
async fn mock_reply_is_persisted_and_reloaded() {
    let dir = tempfile::tempdir().unwrap();
    let (tx, mut rx) = mpsc::channel(256);

    let id = {
        let mut ctl = file_controller(dir.path(), Arc::new(MockProvider));
        ctl.send("hello", &tx).await.unwrap()
    };

    let mut got_delta = false;
    while let Ok(event) = rx.try_recv() {
        if let ChatEvent::PlaceholderUpdated { delta, .. } = event {
            assert!(!delta.is_empty());
            got_delta = true;
        }
    }
    assert!(got_delta, "expected at least one PlaceholderUpdated event");

    let ctl = file_controller(dir.path(), Arc::new(MockProvider));
    let session = ctl.store().get(&id).expect("session survives restart");
    assert_eq!(session.messages[1].text, "MOCK: hello");
    assert_eq!(session.title, "hello");
}

#[tokio::test]
async fn html_in_reply_is_escaped_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedMockProvider::new(vec![ScriptedMockProvider::chunks(&[
        "<script>alert(1)</script>\n```html\n",
        "<script>x</script>\n```",
    ])]);
    let mut ctl = file_controller(dir.path(), Arc::new(model));
    let (tx, mut rx) = mpsc::channel(256);
    ctl.send("show me", &tx).await.unwrap();

    let mut finalized = None;
    while let Ok(event) = rx.try_recv() {
        if let ChatEvent::TurnFinalized { html, message, .. } = event {
            assert_eq!(html, render(&message.text));
            finalized = Some(html);
        }
    }
    let html = finalized.unwrap();
    assert!(!html.contains("<script>"));
    assert_eq!(html.matches("&lt;script&gt;").count(), 2);
}

#[tokio::test]
async fn failed_turn_leaves_disk_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedMockProvider::new(vec![Script::OpenError("quota exceeded".into())]);
    let mut ctl = file_controller(dir.path(), Arc::new(model));
    let (tx, mut rx) = mpsc::channel(256);

    assert!(ctl.send("hi", &tx).await.is_none());
    assert!(!dir.path().join("gemchat.sessions.json").exists());

    let mut failed = false;
    while let Ok(event) = rx.try_recv() {
        if let ChatEvent::TurnFailed { text, .. } = event {
            assert_eq!(text, STREAM_ERROR_TEXT);
            failed = true;
        }
    }
    assert!(failed);
}

#[tokio::test]
async fn corrupt_store_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("gemchat.sessions.json"), "][").unwrap();
    std::fs::write(dir.path().join("gemchat.settings.json"), "nope").unwrap();
    let ctl = file_controller(dir.path(), Arc::new(MockProvider));
    assert!(ctl.store().sessions().is_empty());
    assert_eq!(ctl.state().settings, Settings::default());
}

#[tokio::test]
async fn transcript_export_after_management_commands() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctl = file_controller(dir.path(), Arc::new(MockProvider));
    let (tx, _rx) = mpsc::channel(256);
    let id = ctl.send("first prompt", &tx).await.unwrap();

    ctl.dispatch(Command::RenameChat { id: id.clone(), title: "Notes".into() }, &tx).await.unwrap();
    ctl.dispatch(Command::SetPinned { id: id.clone(), pinned: true }, &tx).await.unwrap();

    let ctl = file_controller(dir.path(), Arc::new(MockProvider));
    let session = ctl.store().get(&id).unwrap();
    assert!(session.pinned);
    let text = export_transcript(session);
    assert!(text.starts_with("Title: Notes\n"));
    assert!(text.contains("] You:\nfirst prompt\n\n"));
    assert!(text.contains("] Gemini:\nMOCK: first prompt\n\n"));
}

#[test]
fn config_file_selects_mock_provider_and_data_dir() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        format!(
            "[model]\nprovider = \"mock\"\nname = \"gemini-pro\"\n\n[storage]\ndata_dir = \"{}\"\n",
            dir.path().join("data").display()
        ),
    )
    .unwrap();

    let config: Config = gemchat_config::load(Some(&path)).unwrap();
    assert_eq!(config.storage.data_dir(), dir.path().join("data"));
    let provider = gemchat_model::from_config(&config.model).unwrap();
    assert_eq!(provider.name(), "mock");
    assert_eq!(Settings::from_config(&config).model, "gemini-pro");
}
