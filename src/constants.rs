// Fixed policy values plus a few paths loaded from the environment.

use std::env;

lazy_static::lazy_static! {
    pub static ref TEMPLATE_DIR: String = env::var("MINDMEND_TEMPLATE_DIR").unwrap_or_else(|_| "templates".to_string());
    pub static ref STATIC_DIR: String = env::var("MINDMEND_STATIC_DIR").unwrap_or_else(|_| "static".to_string());
}

pub const DEFAULT_GEMINI_API_URL: &str =
    "https://generativelanguage.googleapis.com/v1/models/gemini-1.5-flash:generateContent";

pub const DEFAULT_DATA_DIR: &str = ".mindmend";

/// File inside the data directory that backs the key-value store.
pub const SETTINGS_FILE: &str = "settings.json";

/// Key under which the Gemini credential is persisted.
pub const API_KEY_STORE_KEY: &str = "gemini_api_key";

/// Number of earlier messages sent along with a new user message.
pub const HISTORY_WINDOW: usize = 10;

pub const GREETING: &str = "Hello! I'm your MindMend assistant. How are you feeling today?";

pub const PROBE_MESSAGE: &str = "This is a connection test. Reply with the single word CONNECTED.";
pub const PROBE_TOKEN: &str = "CONNECTED";
