//! Interfaces the chat core uses to reach the presentation layer.
//!
//! Both are called synchronously and must not block on rendering.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Default,
    Destructive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub description: String,
    pub severity: Severity,
}

impl Notification {
    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            severity: Severity::Default,
        }
    }

    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            severity: Severity::Destructive,
        }
    }
}

/// Toast collaborator.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Key-entry modal collaborator.
pub trait KeyPrompt: Send + Sync {
    fn open(&self, open: bool);
}

/// Collects notifications and the prompt flag so a front end can pick them up
/// after each controller call.
#[derive(Debug, Default)]
pub struct Inbox {
    notifications: Mutex<Vec<Notification>>,
    prompt_open: AtomicBool,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<Notification> {
        match self.notifications.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    /// Pending notifications, left in place for a later `drain`.
    pub fn peek(&self) -> Vec<Notification> {
        match self.notifications.lock() {
            Ok(pending) => pending.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_prompt_open(&self) -> bool {
        self.prompt_open.load(Ordering::SeqCst)
    }
}

impl Notifier for Inbox {
    fn notify(&self, notification: Notification) {
        match self.notifications.lock() {
            Ok(mut pending) => pending.push(notification),
            Err(poisoned) => poisoned.into_inner().push(notification),
        }
    }
}

impl KeyPrompt for Inbox {
    fn open(&self, open: bool) {
        self.prompt_open.store(open, Ordering::SeqCst);
    }
}
