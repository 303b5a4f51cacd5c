//! Lectern CLI — the main entry point.
//!
//! Commands:
//! - `onboard` — Write a default config
//! - `serve`   — Start the HTTP gateway
//! - `chat`    — Interactive chat or single-message mode
//! - `status`  — Show configuration and model server status
//! - `models`  — List the models the server offers

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "lectern",
    about = "Lectern — chat with local models, grounded in your documents",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration and data directories
    Onboard,

    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override the bind address
        #[arg(long)]
        host: Option<String>,
    },

    /// Chat with a model
    Chat {
        /// Settings profile to use
        #[arg(short, long, env = "LECTERN_USER", default_value = commands::DEFAULT_USER)]
        user: String,

        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Use this model instead of the first one the server lists
        #[arg(long)]
        model: Option<String>,
    },

    /// Show configuration and model server status
    Status {
        #[arg(short, long, env = "LECTERN_USER", default_value = commands::DEFAULT_USER)]
        user: String,
    },

    /// List the models the server offers
    Models {
        #[arg(short, long, env = "LECTERN_USER", default_value = commands::DEFAULT_USER)]
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Serve { port, host } => commands::serve::run(port, host).await?,
        Commands::Chat {
            user,
            message,
            model,
        } => commands::chat::run(&user, message, model).await?,
        Commands::Status { user } => commands::status::run(&user).await?,
        Commands::Models { user } => commands::models::run(&user).await?,
    }

    Ok(())
}
