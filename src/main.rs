use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use entigraph::config::AppConfig;
use entigraph::server::{migrate_database, start_server, MigrateDirection};

#[derive(Parser)]
#[command(name = "entigraph", about = "Schema-driven entity store with transformation exports")]
struct Cli {
    /// Path to a YAML config file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API server
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(long)]
        database: Option<String>,
    },
    /// Run database migrations
    Migrate {
        #[command(subcommand)]
        direction: MigrateDirection,
        #[arg(long)]
        database: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { port, database } => {
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(database) = database {
                config.database_path = database;
            }
            start_server(config).await
        }
        Command::Migrate { direction, database } => {
            let database_path = database.unwrap_or(config.database_path);
            migrate_database(&database_path, direction).await
        }
    }
}
