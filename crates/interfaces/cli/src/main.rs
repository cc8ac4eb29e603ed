mod chat;
mod daemon;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use parley_config::AppConfig;
use parley_llm::provider_for;

#[derive(Debug, Parser)]
#[command(name = "parley", version, about = "A personal tool-using AI agent")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Send one message to the agent (via the daemon when one is running,
    /// in-process otherwise).
    Chat {
        /// The message to send.
        message: String,
        /// Conversation id to load and persist history under.
        #[arg(long, default_value = "cli")]
        conversation: String,
    },
    /// Manage the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },
    /// Show daemon status (model, timers, clients, uptime).
    Status,
    /// List timers scheduled in the daemon.
    Timers,
    /// Delete stored history for a conversation.
    Clear {
        #[arg(long, default_value = "cli")]
        conversation: String,
    },
    /// List models available from the configured provider.
    Models,
}

#[derive(Debug, Subcommand)]
enum DaemonCommands {
    /// Run the daemon in the foreground (logs to the daemon log file).
    Run,
    /// Spawn the daemon as a detached background process.
    Start,
    /// Ask a running daemon to shut down.
    Stop,
    /// Show daemon status.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // The foreground daemon logs to a rolling file; everything else logs to
    // stderr.  The appender guard must outlive the process body.
    let _log_guard = match &cli.command {
        Commands::Daemon { command: DaemonCommands::Run } => Some(daemon::init_daemon_logging()?),
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                )
                .with_writer(std::io::stderr)
                .init();
            None
        }
    };

    let config = AppConfig::load()?;

    match cli.command {
        Commands::Chat { message, conversation } => {
            chat::run_chat(&config, &message, &conversation).await
        }
        Commands::Daemon { command } => match command {
            DaemonCommands::Run => daemon::run_foreground(config).await,
            DaemonCommands::Start => daemon::start_detached(&config).await,
            DaemonCommands::Stop => daemon::stop(&config).await,
            DaemonCommands::Status => daemon::status(&config).await,
        },
        Commands::Status => daemon::status(&config).await,
        Commands::Timers => daemon::timers(&config).await,
        Commands::Clear { conversation } => chat::clear(&config, &conversation).await,
        Commands::Models => {
            let provider = provider_for(&config)?;
            let models = provider.models().await?;
            if models.is_empty() {
                println!("no models reported by {}", provider.name());
            }
            for model in models {
                println!("{}", model.id);
            }
            Ok(())
        }
    }
}
