//! carmarket-chat - terminal chat client for the car marketplace
//!
//! Buyer/seller conversations with paginated history and live updates.

mod api;
mod auth;
mod config;
mod conversation;
mod live;
mod models;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use models::MessageType;

#[derive(Parser)]
#[command(name = "carmarket-chat")]
#[command(about = "Terminal chat client for the car marketplace", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in to the marketplace
    Login {
        /// Account username
        username: String,

        /// Password (prompted on stdin if omitted)
        #[arg(short, long)]
        password: Option<String>,

        /// Log in again even if a valid token is cached
        #[arg(short, long)]
        force: bool,
    },

    /// Log out and clear cached credentials
    Logout,

    /// Show current authentication status
    Status,

    /// Show current user info (verify auth works)
    Whoami,

    /// List chat rooms
    Rooms {
        /// Keep running and update rooms from the live feed
        #[arg(short, long)]
        follow: bool,
    },

    /// Print the history of a chat room
    Read {
        /// Chat room ID (from `rooms` output)
        room_id: String,

        /// Number of history pages to load
        #[arg(short, long, default_value = "1")]
        pages: u32,
    },

    /// Send a message
    Send {
        /// Chat room ID (from `rooms` output)
        #[arg(short, long)]
        to: String,

        /// Message kind: text, image, file, car, user
        #[arg(short, long, default_value = "text")]
        kind: MessageType,

        /// Message content
        message: String,
    },

    /// Open a chat room with live updates
    Watch {
        /// Chat room ID (from `rooms` output)
        room_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Login {
            username,
            password,
            force,
        } => {
            tracing::info!("Logging in as {}...", username);
            auth::login(&username, password, force).await?;
        }
        Commands::Logout => {
            tracing::info!("Logging out...");
            auth::logout().await?;
        }
        Commands::Status => {
            auth::status().await?;
        }
        Commands::Whoami => {
            api::whoami().await?;
        }
        Commands::Rooms { follow } => {
            if follow {
                conversation::follow_rooms().await?;
            } else {
                tracing::info!("Fetching rooms...");
                api::list_rooms().await?;
            }
        }
        Commands::Read { room_id, pages } => {
            conversation::read(&room_id, pages).await?;
        }
        Commands::Send { to, kind, message } => {
            tracing::info!("Sending message...");
            api::send_message(&to, &message, kind).await?;
        }
        Commands::Watch { room_id } => {
            conversation::watch(&room_id).await?;
        }
    }

    Ok(())
}
