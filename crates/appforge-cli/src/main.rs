//! AppForge CLI tool.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod client;
mod commands;

use client::ApiClient;

#[derive(Parser)]
#[command(name = "appforge")]
#[command(about = "AppForge build CLI", long_about = None)]
struct Cli {
    /// API server URL
    #[arg(long, env = "APPFORGE_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage builds
    Builds {
        #[command(subcommand)]
        command: BuildCommands,
    },
    /// Validate a server configuration file
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "appforge.kdl")]
        path: String,
    },
}

#[derive(Subcommand)]
enum BuildCommands {
    /// Start a build for an application commit
    Create {
        /// Application ID
        #[arg(long)]
        app: String,
        /// Commit to build
        #[arg(long)]
        commit: String,
        /// Commit message for the published sources
        #[arg(long)]
        message: Option<String>,
        /// Stop after generation
        #[arg(long)]
        skip_publish: bool,
        /// Wait until the build finishes
        #[arg(short, long)]
        wait: bool,
    },
    /// List recent builds
    List {
        /// Filter by application ID
        #[arg(long)]
        app: Option<String>,
        /// Maximum number of builds to show
        #[arg(long, default_value = "20")]
        limit: u32,
    },
    /// Show build details
    Show {
        /// Build ID
        id: String,
    },
    /// Print the derived build status
    Status {
        /// Build ID
        id: String,
    },
    /// Print step logs
    Logs {
        /// Build ID
        id: String,
    },
    /// Download the generated sources as a zip archive
    Download {
        /// Build ID
        id: String,
        /// Output file, defaults to <id>.zip
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Builds { command } => {
            let client = ApiClient::new(&cli.api_url)?;
            match command {
                BuildCommands::Create {
                    app,
                    commit,
                    message,
                    skip_publish,
                    wait,
                } => {
                    commands::builds::create(&client, &app, &commit, message, skip_publish, wait)
                        .await?;
                }
                BuildCommands::List { app, limit } => {
                    commands::builds::list(&client, app, limit).await?;
                }
                BuildCommands::Show { id } => {
                    commands::builds::show(&client, &id).await?;
                }
                BuildCommands::Status { id } => {
                    commands::builds::status(&client, &id).await?;
                }
                BuildCommands::Logs { id } => {
                    commands::builds::logs(&client, &id).await?;
                }
                BuildCommands::Download { id, output } => {
                    commands::builds::download(&client, &id, output).await?;
                }
            }
        }
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
    }

    Ok(())
}
