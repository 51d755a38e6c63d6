pub mod api_key;
pub mod chat;
pub mod constants;
pub mod conversation;
pub mod gemini;
pub mod message;
pub mod notify;
pub mod web_server;

use std::sync::Arc;

use api_key::{ApiKeyStore, KeyValueStore};
use conversation::ConversationController;
use gemini::GeminiClient;
use notify::Inbox;

/// Wires one client, one key store and one inbox into a controller. The inbox
/// serves as both the toast and the key-prompt collaborator.
pub fn build_controller(
    client: Arc<GeminiClient>,
    backend: Box<dyn KeyValueStore>,
    inbox: Arc<Inbox>,
) -> ConversationController {
    let keys = ApiKeyStore::new(backend, client.clone(), inbox.clone());
    ConversationController::new(client, keys, inbox.clone(), inbox)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_key::MemoryKeyValueStore;
    use crate::constants::API_KEY_STORE_KEY;
    use crate::conversation::ChatState;

    #[test]
    fn test_build_controller_without_key() {
        let inbox = Arc::new(Inbox::new());
        let client = Arc::new(GeminiClient::new("http://127.0.0.1:9/unused"));
        let controller = build_controller(client, Box::new(MemoryKeyValueStore::new()), inbox.clone());

        assert!(!controller.has_credential());
        assert_eq!(controller.state(), ChatState::Idle);
        assert_eq!(inbox.drain().len(), 1);
    }

    #[test]
    fn test_build_controller_with_stored_key() {
        let inbox = Arc::new(Inbox::new());
        let client = Arc::new(GeminiClient::new("http://127.0.0.1:9/unused"));
        let backend = MemoryKeyValueStore::with_entry(API_KEY_STORE_KEY, "abc");
        let controller = build_controller(client, Box::new(backend), inbox.clone());

        assert!(controller.has_credential());
        assert!(inbox.drain().is_empty());
    }
}
