//! Client for the Gemini `generateContent` endpoint.
//!
//! One call is one HTTP POST. The client keeps no credential of its own: the
//! caller lends one for the duration of [`GeminiClient::send`].

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, instrument};

use crate::api_key::Credential;
use crate::message::Sender;

const FALLBACK_ERROR_MESSAGE: &str = "Failed to get response from Gemini";

const TEMPERATURE: f32 = 0.7;
const TOP_P: f32 = 0.95;
const TOP_K: u32 = 40;
const MAX_OUTPUT_TOKENS: u32 = 1024;

#[derive(Debug, Error)]
pub enum InferenceError {
    /// Non-2xx response. `message` is the provider's own text when it sent one.
    #[error("{message}")]
    Provider { status: u16, message: String },

    #[error("No response generated")]
    NoResponse,

    #[error("Malformed response from Gemini: {0}")]
    MalformedResponse(String),

    /// The request never produced a response. The URL (and its `key` query
    /// parameter) is removed before the error is stored.
    #[error("Failed to reach Gemini: {0}")]
    Transport(reqwest::Error),
}

impl InferenceError {
    /// Gemini reports rejected credentials with messages like
    /// "API key not valid. Please pass a valid API key."
    pub fn is_credential_problem(&self) -> bool {
        self.to_string().contains("API key")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl From<Sender> for Role {
    fn from(sender: Sender) -> Self {
        match sender {
            Sender::User => Role::User,
            Sender::Assistant => Role::Assistant,
        }
    }
}

/// Normalized history entry handed to the client.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl HistoryEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: Role,
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
}

impl<'a> GenerateContentRequest<'a> {
    fn from_history(history: &'a [HistoryEntry]) -> Self {
        let contents = history
            .iter()
            .map(|entry| Content {
                role: entry.role,
                parts: [Part {
                    text: &entry.content,
                }],
            })
            .collect();

        Self {
            contents,
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                top_p: TOP_P,
                top_k: TOP_K,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

/// Pull `error.message` out of a Gemini error body, if there is one.
fn provider_error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body)
        .ok()?
        .error?
        .message
        .filter(|message| !message.is_empty())
}

fn first_candidate_text(response: GenerateContentResponse) -> Result<String, InferenceError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or(InferenceError::NoResponse)?;

    debug!(finish_reason = ?candidate.finish_reason, "Received Gemini candidate");

    candidate
        .content
        .and_then(|content| content.parts.into_iter().next())
        .and_then(|part| part.text)
        .ok_or_else(|| InferenceError::MalformedResponse("candidate has no text part".to_string()))
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    endpoint: String,
}

impl GeminiClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send the history and return the first candidate's text exactly as received.
    #[instrument(skip(self, credential, history), fields(turns = history.len()))]
    pub async fn send(
        &self,
        credential: &Credential,
        history: &[HistoryEntry],
    ) -> Result<String, InferenceError> {
        let request = GenerateContentRequest::from_history(history);

        let response = self
            .http
            .post(&self.endpoint)
            .query(&[("key", credential.expose())])
            .json(&request)
            .send()
            .await
            .map_err(|e| InferenceError::Transport(e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = provider_error_message(&body)
                .unwrap_or_else(|| FALLBACK_ERROR_MESSAGE.to_string());
            error!(%status, %message, "Gemini API request failed");
            return Err(InferenceError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|e| InferenceError::MalformedResponse(e.without_url().to_string()))?;

        first_candidate_text(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_shape() {
        let history = vec![
            HistoryEntry::new(Role::Assistant, "How are you feeling today?"),
            HistoryEntry::new(Role::User, "I feel anxious"),
        ];
        let value = serde_json::to_value(GenerateContentRequest::from_history(&history)).unwrap();

        assert_eq!(
            value,
            json!({
                "contents": [
                    {"role": "assistant", "parts": [{"text": "How are you feeling today?"}]},
                    {"role": "user", "parts": [{"text": "I feel anxious"}]}
                ],
                "generationConfig": {
                    "temperature": 0.7f32,
                    "topP": 0.95f32,
                    "topK": 40,
                    "maxOutputTokens": 1024
                }
            })
        );
    }

    #[test]
    fn test_provider_error_message() {
        let body = r#"{"error":{"code":400,"message":"API key not valid","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(provider_error_message(body).as_deref(), Some("API key not valid"));
        assert!(provider_error_message("<html>bad gateway</html>").is_none());
        assert!(provider_error_message(r#"{"error":{}}"#).is_none());
        assert!(provider_error_message("").is_none());
    }

    #[test]
    fn test_first_candidate_text() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [
                {"content": {"parts": [{"text": "First"}, {"text": "ignored"}], "role": "model"}, "finishReason": "STOP"},
                {"content": {"parts": [{"text": "Second"}]}}
            ]
        }))
        .unwrap();
        assert_eq!(first_candidate_text(response).unwrap(), "First");
    }

    #[test]
    fn test_first_candidate_text_empty() {
        let response: GenerateContentResponse = serde_json::from_value(json!({})).unwrap();
        assert!(matches!(first_candidate_text(response), Err(InferenceError::NoResponse)));

        let response: GenerateContentResponse =
            serde_json::from_value(json!({"candidates": [{"finishReason": "SAFETY"}]})).unwrap();
        assert!(matches!(
            first_candidate_text(response),
            Err(InferenceError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_is_credential_problem() {
        let err = InferenceError::Provider {
            status: 400,
            message: "API key not valid. Please pass a valid API key.".to_string(),
        };
        assert!(err.is_credential_problem());

        let err = InferenceError::Provider {
            status: 500,
            message: "Internal error".to_string(),
        };
        assert!(!err.is_credential_problem());
        assert!(!InferenceError::NoResponse.is_credential_problem());
    }
}
