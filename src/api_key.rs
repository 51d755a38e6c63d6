//! Gemini API key lifecycle: load, replace, persist and validate.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::constants::{API_KEY_STORE_KEY, PROBE_MESSAGE, PROBE_TOKEN};
use crate::gemini::{GeminiClient, HistoryEntry, Role};
use crate::notify::{Notification, Notifier};

/// Opaque API key. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Returns `None` for blank input.
    pub fn new(value: impl AsRef<str>) -> Option<Self> {
        let value = value.as_ref().trim();
        if value.is_empty() {
            None
        } else {
            Some(Self(value.to_string()))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("failed to access key store: {0}")]
    Io(#[from] std::io::Error),
    #[error("key store is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Durable string-to-string storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, KeyStoreError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), KeyStoreError>;
}

/// JSON object on disk, read and rewritten whole on every access.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    path: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Map<String, Value>, KeyStoreError> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        Ok(serde_json::from_str(&content)?)
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, KeyStoreError> {
        Ok(self
            .load()?
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), KeyStoreError> {
        let mut entries = self.load()?;
        entries.insert(key.to_string(), Value::String(value.to_string()));
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&entries)?)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryKeyValueStore {
    entries: HashMap<String, String>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(key: &str, value: &str) -> Self {
        let mut store = Self::new();
        store.entries.insert(key.to_string(), value.to_string());
        store
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, KeyStoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), KeyStoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

pub struct ApiKeyStore {
    current: Option<Credential>,
    backend: Box<dyn KeyValueStore>,
    client: Arc<GeminiClient>,
    notifier: Arc<dyn Notifier>,
}

impl ApiKeyStore {
    /// Builds the store and picks up a previously persisted key, if any.
    pub fn new(
        backend: Box<dyn KeyValueStore>,
        client: Arc<GeminiClient>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let current = match backend.get(API_KEY_STORE_KEY) {
            Ok(value) => value.and_then(Credential::new),
            Err(e) => {
                warn!(error = %e, "Could not read persisted API key");
                None
            }
        };
        info!(present = current.is_some(), "API key store loaded");

        Self {
            current,
            backend,
            client,
            notifier,
        }
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.current.as_ref()
    }

    pub fn has_credential(&self) -> bool {
        self.current.is_some()
    }

    /// Make `value` the active key and persist it. Blank input is ignored and
    /// returns false. A failed write keeps the key for this session only.
    pub fn set_credential(&mut self, value: &str) -> bool {
        let Some(credential) = Credential::new(value) else {
            warn!("Ignoring blank API key");
            return false;
        };

        let persisted = self.backend.set(API_KEY_STORE_KEY, credential.expose());
        self.current = Some(credential);

        match persisted {
            Ok(()) => {
                info!("API key saved");
                self.notifier.notify(Notification::info(
                    "API Key Saved",
                    "Your Gemini API key has been saved.",
                ));
            }
            Err(e) => {
                warn!(error = %e, "API key kept in memory only");
                self.notifier.notify(Notification::info(
                    "API Key Saved",
                    "Your Gemini API key will be used for this session but could not be stored.",
                ));
            }
        }
        true
    }

    /// Round-trip check of `candidate` against the live endpoint. Never fails and
    /// never changes the active key.
    #[instrument(skip_all)]
    pub async fn validate(&self, candidate: &str) -> bool {
        let Some(candidate) = Credential::new(candidate) else {
            return false;
        };

        let probe = [HistoryEntry::new(Role::User, PROBE_MESSAGE)];
        match self.client.send(&candidate, &probe).await {
            Ok(reply) => {
                let confirmed = reply.contains(PROBE_TOKEN);
                if !confirmed {
                    warn!("API key probe reply did not contain the confirmation token");
                }
                confirmed
            }
            Err(e) => {
                warn!(error = %e, "API key probe failed");
                false
            }
        }
    }
}
