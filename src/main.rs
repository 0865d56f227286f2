use std::error::Error;

use chrono::DateTime;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use futures::StreamExt;
use ping_feed::SqlitePingClient;
use ping_feed::config::{self, AppConfig};
use ping_feed::storage;
use ping_feed::ui::{HistoryState, MessageDraft, render_feed};

#[derive(Parser)]
#[command(
    name = "ping_feed",
    version,
    about = "Broadcast pings to a shared live feed"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a ping with an optional message
    Send { message: Option<String> },
    /// Follow the live feed
    History {
        /// Print the current feed and exit
        #[arg(long)]
        once: bool,
    },
    /// Print this installation's anonymous identity
    Whoami {
        /// Also write the effective config to the config path
        #[arg(long)]
        init_config: bool,
    },
    /// Forget this installation's identity
    SignOut,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let app_config = config::load_config(&cli.config);
    storage::ensure_parent_dir(&app_config.store.database_path)?;
    let client = SqlitePingClient::from_config(&app_config)?;

    let result = match cli.command {
        Command::Send { message } => send_ping(&client, message.as_deref()).await,
        Command::History { once } => show_history(&client, once).await,
        Command::Whoami { init_config } => {
            whoami(&client, &cli.config, &app_config, init_config).await
        }
        Command::SignOut => match client.sign_out().await {
            Ok(()) => {
                println!("Signed out");
                Ok(())
            }
            Err(err) => Err(err.into()),
        },
    };

    if let Err(err) = &result {
        log::error!("Command failed: {err}");
    }
    result
}

async fn send_ping(client: &SqlitePingClient, message: Option<&str>) -> Result<(), Box<dyn Error>> {
    let draft = MessageDraft::parse(message)?;
    if draft.message().is_some() {
        println!("Message: {}", draft.counter());
    }

    let identity = match client.ensure_identity().await {
        Ok(identity) => identity,
        Err(err) => {
            eprintln!(
                "Authentication Error: Failed to authenticate. Please check your connection and try again."
            );
            return Err(err.into());
        }
    };

    match client.create_ping(&identity, draft.message()).await {
        Ok(id) => {
            println!("Ping Sent! Your ping {id} is now in the history feed.");
            Ok(())
        }
        Err(err) => {
            eprintln!("Error: Failed to send ping. Please check your connection and try again.");
            Err(err.into())
        }
    }
}

async fn show_history(client: &SqlitePingClient, once: bool) -> Result<(), Box<dyn Error>> {
    let mut feed = client.watch_pings();
    let mut state = HistoryState::new();
    let mut interrupt = std::pin::pin!(tokio::signal::ctrl_c());

    println!("Loading ping history...");
    loop {
        tokio::select! {
            snapshot = feed.next() => {
                let Some(pings) = snapshot else {
                    break;
                };
                let fresh = state.apply_snapshot(pings);
                println!("\n{}", render_feed(&state.pings));
                if fresh > 0 {
                    println!("\n({fresh} new)");
                }
                if once {
                    break;
                }
            }
            _ = &mut interrupt => {
                log::info!("Interrupted; closing feed");
                break;
            }
        }
    }

    feed.unsubscribe();
    Ok(())
}

async fn whoami(
    client: &SqlitePingClient,
    config_path: &str,
    app_config: &AppConfig,
    init_config: bool,
) -> Result<(), Box<dyn Error>> {
    let identity = client.ensure_identity().await?;
    println!("User ID: {identity}");

    if let Some(issued) = client
        .identity_provider()
        .issued_at()?
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
    {
        println!("Issued: {}", issued.to_rfc3339());
    }

    if init_config {
        config::save_config(config_path, app_config)?;
        println!("Wrote config to {config_path}");
    }
    Ok(())
}
