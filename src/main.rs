use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use mindmend::api_key::{ApiKeyStore, FileKeyValueStore};
use mindmend::constants::{DEFAULT_DATA_DIR, DEFAULT_GEMINI_API_URL, SETTINGS_FILE};
use mindmend::gemini::GeminiClient;
use mindmend::notify::Inbox;
use mindmend::web_server::AppState;
use mindmend::{build_controller, chat, web_server};

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Gemini generateContent endpoint.
    #[arg(long, global = true, env = "GEMINI_API_URL", default_value = DEFAULT_GEMINI_API_URL)]
    endpoint: String,

    /// Directory holding the persisted settings (including the API key).
    #[arg(long, global = true, env = "MINDMEND_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Serve the MindMend web chat.
    Serve {
        #[arg(long, default_value_t = 9900, help = "Port for the web server.")]
        port: u16,
    },
    /// Chat with the assistant in the terminal.
    Chat,
    /// Manage the Gemini API key.
    Key {
        #[command(subcommand)]
        action: KeyCommands,
    },
}

#[derive(clap::Subcommand, Debug)]
enum KeyCommands {
    /// Verify a key against Gemini and store it.
    Set {
        key: String,
        #[arg(long, help = "Store the key without the verification round trip.")]
        skip_validation: bool,
    },
    /// Verify the stored key against Gemini.
    Check,
}

fn print_notifications(inbox: &Inbox) {
    for n in inbox.drain() {
        eprintln!("{}: {}", n.title, n.description);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for settings like GEMINI_API_URL)
    dotenvy::dotenv().ok();

    // Logs go to stderr so the terminal chat owns stdout.
    // Reads log level from RUST_LOG (e.g., RUST_LOG=info,mindmend=debug)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("MindMend starting with command: {:?}", cli.command);

    // One client for the whole process, shared by the key store and the controller.
    let client = Arc::new(GeminiClient::new(cli.endpoint.clone()));
    let settings = FileKeyValueStore::new(cli.data_dir.join(SETTINGS_FILE));
    let inbox = Arc::new(Inbox::new());

    match cli.command {
        Commands::Serve { port } => {
            let controller = build_controller(client, Box::new(settings), inbox.clone());
            let state = AppState::new(controller, inbox);

            tokio::select! {
                res = web_server::start_web_server(port, state) => {
                    res.context("Web server failed")?;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl-C received, shutting down");
                }
            }
        }
        Commands::Chat => {
            let controller = build_controller(client, Box::new(settings), inbox.clone());
            chat::run_chat(controller, inbox)
                .await
                .context("Chat session failed")?;
        }
        Commands::Key { action } => {
            let mut keys = ApiKeyStore::new(Box::new(settings), client, inbox.clone());
            match action {
                KeyCommands::Set { key, skip_validation } => {
                    if !skip_validation && !keys.validate(&key).await {
                        bail!("The API key could not be verified with Gemini");
                    }
                    if !keys.set_credential(&key) {
                        bail!("The API key must not be blank");
                    }
                    print_notifications(&inbox);
                    println!("API key stored in {}", cli.data_dir.display());
                }
                KeyCommands::Check => {
                    let Some(stored) = keys.credential().cloned() else {
                        bail!("No API key is stored. Run `mindmend key set <KEY>` first.");
                    };
                    if !keys.validate(stored.expose()).await {
                        bail!("The stored API key was rejected by Gemini");
                    }
                    println!("The stored API key is valid.");
                }
            }
        }
    }

    Ok(())
}
