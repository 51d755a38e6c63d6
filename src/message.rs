use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

/// One turn of the conversation. Built once by the controller and never changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub sender: Sender,
    pub timestamp: DateTime<Local>,
}

impl Message {
    pub fn new(id: MessageId, sender: Sender, content: impl Into<String>) -> Self {
        Self {
            id,
            content: content.into(),
            sender,
            timestamp: Local::now(),
        }
    }

    pub fn is_user(&self) -> bool {
        self.sender == Sender::User
    }

    /// Short clock time used by the chat front ends.
    pub fn time_label(&self) -> String {
        self.timestamp.format("%H:%M").to_string()
    }
}

/// True when the input has something other than whitespace in it.
pub fn is_submittable(input: &str) -> bool {
    !input.trim().is_empty()
}
