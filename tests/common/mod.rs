#![allow(dead_code)]

use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mindmend::api_key::MemoryKeyValueStore;
use mindmend::build_controller;
use mindmend::constants::{API_KEY_STORE_KEY, PROBE_MESSAGE};
use mindmend::conversation::ConversationController;
use mindmend::gemini::GeminiClient;
use mindmend::notify::Inbox;

pub const GENERATE_PATH: &str = "/v1/models/gemini-1.5-flash:generateContent";

/// Success body in the shape Gemini returns.
pub fn reply(text: &str) -> Value {
    json!({
        "candidates": [{
            "content": {"parts": [{"text": text}], "role": "model"},
            "finishReason": "STOP"
        }]
    })
}

pub fn error_body(message: &str) -> Value {
    json!({"error": {"code": 400, "message": message, "status": "INVALID_ARGUMENT"}})
}

pub fn client_for(server: &MockServer) -> Arc<GeminiClient> {
    Arc::new(GeminiClient::new(format!("{}{}", server.uri(), GENERATE_PATH)))
}

/// Controller backed by an in-memory key store, optionally pre-seeded.
pub fn controller_for(
    server: &MockServer,
    stored_key: Option<&str>,
) -> (ConversationController, Arc<Inbox>) {
    let inbox = Arc::new(Inbox::new());
    let backend = match stored_key {
        Some(key) => MemoryKeyValueStore::with_entry(API_KEY_STORE_KEY, key),
        None => MemoryKeyValueStore::new(),
    };
    let controller = build_controller(client_for(server), Box::new(backend), inbox.clone());
    (controller, inbox)
}

/// Answers the key-validation probe with `text`, ahead of any other mock.
pub async fn mount_probe_reply(server: &MockServer, text: &str) {
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(body_partial_json(json!({
            "contents": [{"parts": [{"text": PROBE_MESSAGE}]}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply(text)))
        .with_priority(1)
        .mount(server)
        .await;
}

pub async fn mount_chat_reply(server: &MockServer, text: &str) {
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply(text)))
        .mount(server)
        .await;
}

pub async fn request_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|request| request.body_json::<Value>().unwrap())
        .collect()
}
