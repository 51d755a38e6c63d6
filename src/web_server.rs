use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    serve, Json, Router,
};
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::{watch, Mutex};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::constants::{STATIC_DIR, TEMPLATE_DIR};
use crate::conversation::{ChatState, ConversationController, ConversationSnapshot};
use crate::message::{Message, MessageId, Sender};
use crate::notify::{Inbox, KeyPrompt, Notification};

#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub id: MessageId,
    pub sender: Sender,
    pub content: String,
    pub time: String,
}

impl From<&Message> for MessageView {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            sender: message.sender,
            content: message.content.clone(),
            time: message.time_label(),
        }
    }
}

/// Everything the page needs after any action.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationView {
    pub state: ChatState,
    pub messages: Vec<MessageView>,
    pub has_credential: bool,
    pub key_prompt_open: bool,
    pub notifications: Vec<Notification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct KeyRequest {
    pub key: String,
}

// Shared application state. The controller lock is held for a whole send, so
// reads go through the published snapshot instead.
#[derive(Clone)]
pub struct AppState {
    templates: Arc<AutoReloader>,
    controller: Arc<Mutex<ConversationController>>,
    snapshot: watch::Receiver<ConversationSnapshot>,
    inbox: Arc<Inbox>,
}

impl AppState {
    pub fn new(controller: ConversationController, inbox: Arc<Inbox>) -> Self {
        Self {
            templates: Arc::new(create_minijinja_env()),
            snapshot: controller.subscribe(),
            controller: Arc::new(Mutex::new(controller)),
            inbox,
        }
    }

    /// Current view; hands pending notifications over to the caller.
    fn view(&self) -> ConversationView {
        let mut view = self.peek();
        view.notifications = self.inbox.drain();
        view
    }

    /// Current view with notifications left in the inbox.
    fn peek(&self) -> ConversationView {
        let snapshot = self.snapshot.borrow();
        ConversationView {
            state: snapshot.state,
            messages: snapshot.messages.iter().map(MessageView::from).collect(),
            has_credential: snapshot.has_credential,
            key_prompt_open: self.inbox.is_prompt_open(),
            notifications: self.inbox.peek(),
            accepted: None,
        }
    }
}

pub enum ApiError {
    Busy,
    Render(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Busy => (
                StatusCode::CONFLICT,
                Json(serde_json::json!({ "error": "A reply is still being generated" })),
            )
                .into_response(),
            ApiError::Render(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(format!("Internal Server Error: {}", message)),
            )
                .into_response(),
        }
    }
}

// Minijinja Environment setup
fn create_minijinja_env() -> AutoReloader {
    AutoReloader::new(|notifier| {
        let template_dir = TEMPLATE_DIR.as_str();
        let mut env = Environment::new();
        env.set_loader(path_loader(template_dir));
        notifier.watch_path(template_dir, true);
        Ok(env)
    })
}

// The page script fetches /api/conversation on load and shows the toasts from
// there, so rendering must not consume them.
async fn index_handler(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    let view = state.peek();

    state
        .templates
        .acquire_env()
        .and_then(|env| {
            env.get_template("index.html").and_then(|tmpl| {
                tmpl.render(minijinja::context! {
                    title => "MindMend Assistant",
                    view => view,
                })
            })
        })
        .map(Html)
        .map_err(|e| {
            error!("Failed to get or render template: {}", e);
            ApiError::Render(e.to_string())
        })
}

async fn conversation_handler(State(state): State<AppState>) -> Json<ConversationView> {
    Json(state.view())
}

// Only one send may be in flight; a second submission is refused, not queued.
async fn submit_handler(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<ConversationView>, ApiError> {
    let Ok(mut controller) = state.controller.try_lock() else {
        warn!("Rejecting message while a reply is pending");
        return Err(ApiError::Busy);
    };
    controller.submit(&request.text).await;
    drop(controller);
    Ok(Json(state.view()))
}

async fn key_handler(
    State(state): State<AppState>,
    Json(request): Json<KeyRequest>,
) -> Result<Json<ConversationView>, ApiError> {
    let Ok(mut controller) = state.controller.try_lock() else {
        return Err(ApiError::Busy);
    };
    let accepted = controller.submit_credential(&request.key).await;
    drop(controller);
    let mut view = state.view();
    view.accepted = Some(accepted);
    Ok(Json(view))
}

// While a send holds the controller the state is Sending, never
// AwaitingCredential, so toggling the modal flag is all either action does.
async fn open_prompt_handler(State(state): State<AppState>) -> Json<ConversationView> {
    match state.controller.try_lock() {
        Ok(mut controller) => controller.request_credential_entry(),
        Err(_) => state.inbox.open(true),
    }
    Json(state.view())
}

async fn dismiss_prompt_handler(State(state): State<AppState>) -> Json<ConversationView> {
    match state.controller.try_lock() {
        Ok(mut controller) => controller.dismiss_credential_entry(),
        Err(_) => state.inbox.open(false),
    }
    Json(state.view())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/conversation", get(conversation_handler))
        .route("/api/messages", post(submit_handler))
        .route("/api/key", post(key_handler))
        .route(
            "/api/key/prompt",
            post(open_prompt_handler).delete(dismiss_prompt_handler),
        )
        .nest_service("/static", ServeDir::new(STATIC_DIR.as_str()))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_web_server(port: u16, state: AppState) -> Result<()> {
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Web server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, app.into_make_service())
        .await
        .context("Web server failed")?;

    Ok(())
}
