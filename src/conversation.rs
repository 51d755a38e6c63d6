//! Conversation state and the send/receive cycle.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::api_key::ApiKeyStore;
use crate::constants::{GREETING, HISTORY_WINDOW};
use crate::gemini::{GeminiClient, HistoryEntry, InferenceError};
use crate::message::{is_submittable, Message, MessageId, Sender};
use crate::notify::{KeyPrompt, Notification, Notifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatState {
    Idle,
    AwaitingCredential,
    Sending,
    /// Entered and left inside the same failure handling call, so it shows up
    /// in the debug log but never in `state()` or a published snapshot.
    Error,
}

/// What a front end needs to draw the conversation, published after every
/// change so it can be read while a send holds the controller.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSnapshot {
    pub state: ChatState,
    pub messages: Vec<Message>,
    pub has_credential: bool,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("no API key is configured")]
    CredentialMissing,
    #[error("{0}")]
    CredentialInvalid(String),
    #[error(transparent)]
    Inference(InferenceError),
}

impl From<InferenceError> for ChatError {
    fn from(err: InferenceError) -> Self {
        if err.is_credential_problem() {
            ChatError::CredentialInvalid(err.to_string())
        } else {
            ChatError::Inference(err)
        }
    }
}

#[derive(Debug)]
pub enum SubmitOutcome {
    /// Blank input, nothing appended.
    Ignored,
    /// User message appended, send deferred until a key is entered.
    AwaitingCredential,
    /// Assistant reply appended under this id.
    Replied(MessageId),
    /// The failure was shown to the user; no reply appended.
    Failed(ChatError),
}

/// Owns the message log and drives each request to Gemini.
pub struct ConversationController {
    messages: Vec<Message>,
    state: ChatState,
    pending: Option<MessageId>,
    next_id: u64,
    client: Arc<GeminiClient>,
    keys: ApiKeyStore,
    notifier: Arc<dyn Notifier>,
    prompt: Arc<dyn KeyPrompt>,
    snapshot: watch::Sender<ConversationSnapshot>,
}

impl ConversationController {
    /// Starts a session with the greeting. Emits a one-time notice when no
    /// key is configured yet.
    pub fn new(
        client: Arc<GeminiClient>,
        keys: ApiKeyStore,
        notifier: Arc<dyn Notifier>,
        prompt: Arc<dyn KeyPrompt>,
    ) -> Self {
        if !keys.has_credential() {
            notifier.notify(Notification::info(
                "API Connection Required",
                "To use the AI assistant, please connect your Gemini API key.",
            ));
        }

        let messages = vec![Message::new(MessageId(0), Sender::Assistant, GREETING)];
        let (snapshot, _) = watch::channel(ConversationSnapshot {
            state: ChatState::Idle,
            messages: messages.clone(),
            has_credential: keys.has_credential(),
        });

        Self {
            messages,
            state: ChatState::Idle,
            pending: None,
            next_id: 1,
            client,
            keys,
            notifier,
            prompt,
            snapshot,
        }
    }

    /// Receiver that always holds the latest snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ConversationSnapshot> {
        self.snapshot.subscribe()
    }

    fn publish(&self) {
        self.snapshot.send_replace(ConversationSnapshot {
            state: self.state,
            messages: self.messages.clone(),
            has_credential: self.keys.has_credential(),
        });
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn state(&self) -> ChatState {
        self.state
    }

    pub fn has_credential(&self) -> bool {
        self.keys.has_credential()
    }

    pub fn is_busy(&self) -> bool {
        self.state == ChatState::Sending
    }

    fn append(&mut self, sender: Sender, content: impl Into<String>) -> MessageId {
        let id = MessageId(self.next_id);
        self.next_id += 1;
        self.messages.push(Message::new(id, sender, content));
        self.publish();
        id
    }

    fn transition(&mut self, next: ChatState) {
        debug!(from = ?self.state, to = ?next, "Chat state change");
        self.state = next;
        if next != ChatState::Error {
            self.publish();
        }
    }

    /// Append the user's message and try to get a reply for it.
    #[instrument(skip_all, fields(len = input.len()))]
    pub async fn submit(&mut self, input: &str) -> SubmitOutcome {
        if !is_submittable(input) {
            return SubmitOutcome::Ignored;
        }

        let id = self.append(Sender::User, input);
        self.pending = Some(id);
        self.dispatch_pending().await
    }

    /// Called once a key is available. Resends the deferred message only if it
    /// is still the newest entry in the log.
    pub async fn credential_available(&mut self) -> Option<SubmitOutcome> {
        self.prompt.open(false);

        let resendable = match (self.pending, self.messages.last()) {
            (Some(pending), Some(last)) => last.id == pending && last.is_user(),
            _ => false,
        };

        if !resendable {
            self.pending = None;
            self.transition(ChatState::Idle);
            return None;
        }

        info!("Resending pending message after key entry");
        Some(self.dispatch_pending().await)
    }

    /// Modal submit path: validate the candidate, store it, then resume.
    pub async fn submit_credential(&mut self, candidate: &str) -> bool {
        if !self.keys.validate(candidate).await {
            self.notifier.notify(Notification::error(
                "Invalid API Key",
                "The Gemini API key could not be verified. Please check it and try again.",
            ));
            return false;
        }

        if !self.keys.set_credential(candidate) {
            return false;
        }
        self.credential_available().await;
        true
    }

    /// Open the key prompt without touching the conversation.
    pub fn request_credential_entry(&mut self) {
        self.prompt.open(true);
    }

    /// Close the key prompt. A deferred message stays in the log unsent.
    pub fn dismiss_credential_entry(&mut self) {
        self.prompt.open(false);
        if self.state == ChatState::AwaitingCredential {
            self.transition(ChatState::Idle);
        }
    }

    /// Messages sent with the pending one: up to `HISTORY_WINDOW` earlier
    /// entries followed by the pending message.
    fn request_window(&self, pending: MessageId) -> Vec<HistoryEntry> {
        let Some(position) = self.messages.iter().position(|m| m.id == pending) else {
            return Vec::new();
        };
        let start = position.saturating_sub(HISTORY_WINDOW);

        self.messages[start..=position]
            .iter()
            .map(|m| HistoryEntry::new(m.sender.into(), m.content.clone()))
            .collect()
    }

    async fn dispatch_pending(&mut self) -> SubmitOutcome {
        let Some(pending) = self.pending else {
            return SubmitOutcome::Ignored;
        };

        let Some(credential) = self.keys.credential().cloned() else {
            info!("{}, waiting for key entry", ChatError::CredentialMissing);
            self.transition(ChatState::AwaitingCredential);
            self.prompt.open(true);
            return SubmitOutcome::AwaitingCredential;
        };

        let history = self.request_window(pending);
        self.transition(ChatState::Sending);

        match self.client.send(&credential, &history).await {
            Ok(reply) => {
                let id = self.append(Sender::Assistant, reply);
                self.pending = None;
                self.transition(ChatState::Idle);
                SubmitOutcome::Replied(id)
            }
            Err(err) => self.fail(ChatError::from(err)),
        }
    }

    fn fail(&mut self, err: ChatError) -> SubmitOutcome {
        warn!(error = %err, "Chat request failed");
        self.transition(ChatState::Error);
        self.notifier.notify(Notification::error("Error", err.to_string()));

        if matches!(err, ChatError::CredentialInvalid(_)) {
            self.transition(ChatState::AwaitingCredential);
            self.prompt.open(true);
        } else {
            self.pending = None;
            self.transition(ChatState::Idle);
        }
        SubmitOutcome::Failed(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_key::MemoryKeyValueStore;
    use crate::gemini::Role;
    use crate::notify::Inbox;

    fn controller() -> (ConversationController, Arc<Inbox>) {
        let inbox = Arc::new(Inbox::new());
        let client = Arc::new(GeminiClient::new("http://127.0.0.1:9/unused"));
        let keys = ApiKeyStore::new(
            Box::new(MemoryKeyValueStore::new()),
            client.clone(),
            inbox.clone(),
        );
        let controller = ConversationController::new(client, keys, inbox.clone(), inbox.clone());
        (controller, inbox)
    }

    #[test]
    fn test_starts_with_greeting() {
        let (controller, inbox) = controller();
        assert_eq!(controller.messages().len(), 1);
        assert_eq!(controller.messages()[0].sender, Sender::Assistant);
        assert_eq!(controller.messages()[0].content, GREETING);
        assert_eq!(controller.state(), ChatState::Idle);

        let notes = inbox.drain();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].title, "API Connection Required");
    }

    #[test]
    fn test_request_window_caps_history() {
        let (mut controller, _) = controller();
        for i in 0..15 {
            controller.append(Sender::User, format!("message {}", i));
        }
        let pending = controller.append(Sender::User, "latest");

        let window = controller.request_window(pending);
        assert_eq!(window.len(), HISTORY_WINDOW + 1);
        assert_eq!(window[0].content, "message 5");
        assert_eq!(window.last().unwrap().content, "latest");
        assert_eq!(window.last().unwrap().role, Role::User);
    }

    #[test]
    fn test_request_window_short_history() {
        let (mut controller, _) = controller();
        let pending = controller.append(Sender::User, "hi");

        let window = controller.request_window(pending);
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].role, Role::Assistant);
        assert_eq!(window[0].content, GREETING);
    }

    #[test]
    fn test_credential_error_classification() {
        let err = ChatError::from(InferenceError::Provider {
            status: 400,
            message: "API key not valid".to_string(),
        });
        assert!(matches!(err, ChatError::CredentialInvalid(ref m) if m == "API key not valid"));

        let err = ChatError::from(InferenceError::NoResponse);
        assert!(matches!(err, ChatError::Inference(InferenceError::NoResponse)));
        assert_eq!(err.to_string(), "No response generated");
    }

    #[tokio::test]
    async fn test_blank_submit_is_ignored() {
        let (mut controller, _) = controller();
        assert!(matches!(controller.submit("   ").await, SubmitOutcome::Ignored));
        assert_eq!(controller.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_follows_changes() {
        let (mut controller, _) = controller();
        let snapshot = controller.subscribe();
        assert_eq!(snapshot.borrow().messages.len(), 1);
        assert!(!snapshot.borrow().has_credential);

        controller.submit("hello").await;

        let latest = snapshot.borrow();
        assert_eq!(latest.state, ChatState::AwaitingCredential);
        assert_eq!(latest.messages.len(), 2);
        assert_eq!(latest.messages[1].content, "hello");
    }

    #[tokio::test]
    async fn test_failure_never_leaves_error_visible() {
        // Nothing listens on the unused endpoint, so the send fails.
        let inbox = Arc::new(Inbox::new());
        let client = Arc::new(GeminiClient::new("http://127.0.0.1:1/unused"));
        let keys = ApiKeyStore::new(
            Box::new(MemoryKeyValueStore::with_entry(
                crate::constants::API_KEY_STORE_KEY,
                "stored-key",
            )),
            client.clone(),
            inbox.clone(),
        );
        let mut controller = ConversationController::new(client, keys, inbox.clone(), inbox);
        let snapshot = controller.subscribe();

        assert!(matches!(controller.submit("hello").await, SubmitOutcome::Failed(_)));
        assert_eq!(controller.state(), ChatState::Idle);
        assert_eq!(snapshot.borrow().state, ChatState::Idle);
    }

    #[tokio::test]
    async fn test_dismiss_returns_to_idle() {
        let (mut controller, inbox) = controller();
        assert!(matches!(
            controller.submit("hello").await,
            SubmitOutcome::AwaitingCredential
        ));
        assert!(inbox.is_prompt_open());

        controller.dismiss_credential_entry();
        assert_eq!(controller.state(), ChatState::Idle);
        assert!(!inbox.is_prompt_open());
        assert_eq!(controller.messages().len(), 2);
    }
}
