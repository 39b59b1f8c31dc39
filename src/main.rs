use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use repograde::config::GraderConfig;
use repograde::logging::{LoggingConfig, init_logging};

mod cmd;

#[derive(Parser)]
#[command(name = "repograde")]
#[command(version, about = "Unattended repository analysis and scoring pipeline")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to repograde.toml. Defaults to ./repograde.toml when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API and the worker pool
    Serve {
        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (bind 0.0.0.0, permissive CORS)
        #[arg(long)]
        dev: bool,
    },
    /// Create the run database schema and exit
    InitDb {
        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Analyze a local repository and print the report
    Analyze {
        /// Path to a git working tree
        repo_path: PathBuf,

        /// Print the structured result as JSON instead of markdown
        #[arg(long)]
        json: bool,
    },
    /// Score a saved analyzer result ("-" reads stdin)
    Score {
        input: PathBuf,

        /// Print the structured result as JSON instead of markdown
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(LoggingConfig::from_env(cli.verbose));

    let config = GraderConfig::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { port, db_path, dev } => {
            cmd::cmd_serve(config, port, db_path, dev).await?;
        }
        Commands::InitDb { db_path } => cmd::cmd_init_db(&config, db_path)?,
        Commands::Analyze { repo_path, json } => {
            cmd::cmd_analyze(&config, &repo_path, json).await?;
        }
        Commands::Score { input, json } => cmd::cmd_score(&config, &input, json).await?,
    }

    Ok(())
}
