// Interactive terminal chat.
// Plays the presentation role for the controller: renders messages, prints
// notifications as toasts and asks for a key when the prompt is open.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{stdin, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use crate::conversation::ConversationController;
use crate::message::{Message, Sender};
use crate::notify::{Inbox, Notification, Severity};

const HELP: &str = "Commands: /key to change your Gemini API key, /quit to leave.";

fn render_message(message: &Message) -> String {
    let who = match message.sender {
        Sender::User => "You",
        Sender::Assistant => "MindMend",
    };
    format!("[{}] {}: {}", message.time_label(), who, message.content)
}

fn render_notification(notification: &Notification) -> String {
    let marker = match notification.severity {
        Severity::Default => "*",
        Severity::Destructive => "!",
    };
    format!("{} {}: {}", marker, notification.title, notification.description)
}

/// Runs until stdin closes or the user types `/quit`.
pub async fn run_chat(mut controller: ConversationController, inbox: Arc<Inbox>) -> Result<()> {
    info!("Starting terminal chat session");
    let mut lines = BufReader::new(stdin()).lines();
    let mut out = tokio::io::stdout();
    let mut shown = 0;

    out.write_all(format!("{}\n", HELP).as_bytes()).await?;

    loop {
        let mut screen = String::new();
        for message in &controller.messages()[shown..] {
            screen.push_str(&render_message(message));
            screen.push('\n');
        }
        shown = controller.messages().len();
        for notification in inbox.drain() {
            screen.push_str(&render_notification(&notification));
            screen.push('\n');
        }

        let key_entry = inbox.is_prompt_open();
        screen.push_str(if key_entry {
            "Enter your Gemini API key (blank to cancel): "
        } else {
            "> "
        });
        out.write_all(screen.as_bytes()).await?;
        out.flush().await?;

        let Some(line) = lines.next_line().await.context("Failed to read from stdin")? else {
            break;
        };

        if key_entry {
            if line.trim().is_empty() {
                controller.dismiss_credential_entry();
            } else {
                out.write_all(b"Checking key...\n").await?;
                controller.submit_credential(&line).await;
            }
            continue;
        }

        match line.trim() {
            "/quit" => break,
            "/key" => controller.request_credential_entry(),
            _ => {
                controller.submit(&line).await;
            }
        }
    }

    info!("Terminal chat session finished");
    Ok(())
}
