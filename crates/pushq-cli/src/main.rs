//! pushq CLI tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "pushq")]
#[command(about = "pushq job queue CLI", long_about = None)]
struct Cli {
    /// Worker configuration file
    #[arg(long, global = true, env = "PUSHQ_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the worker pool until interrupted
    Worker,
    /// Submit a source archive for pushing
    Submit {
        /// Where the source archive is downloaded from
        #[arg(long)]
        source_url: String,
        /// Target repository, as owner/name
        #[arg(long)]
        repository: String,
        /// Address notified about the outcome
        #[arg(long)]
        owner_email: String,
        /// Job id; generated when omitted
        #[arg(long)]
        id: Option<String>,
        /// Build parameter, as key=value (repeatable)
        #[arg(long = "build", value_name = "KEY=VALUE")]
        build: Vec<String>,
    },
    /// Enqueue a diagnostic test job
    Test,
    /// Validate a worker configuration file
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "pushq.kdl")]
        path: PathBuf,
    },
    /// Run database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Worker => {
            commands::worker::run(config).await?;
        }
        Commands::Submit {
            source_url,
            repository,
            owner_email,
            id,
            build,
        } => {
            let request = commands::submit::SubmitArgs {
                source_url,
                repository,
                owner_email,
                id,
                build,
            };
            commands::submit::submit(config, request).await?;
        }
        Commands::Test => {
            commands::submit::test(config).await?;
        }
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
        Commands::Migrate => {
            commands::migrate(config).await?;
        }
    }

    Ok(())
}
