use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use gator::commands::{Registry, State};
use gator::config::Config;
use gator::storage::{Database, DatabaseError};

#[derive(Parser, Debug)]
#[command(name = "gator", about = "Command-line RSS aggregator", version)]
struct Args {
    /// Config file (default: ~/.config/gator/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database file, overriding `db_path` from the config
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    /// register, login, users, reset, addfeed, feeds, follow, unfollow,
    /// following, browse or agg
    command: String,

    /// Arguments for the command
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so command output on stdout stays clean
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => Config::default_path()?,
    };
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = args
        .db
        .unwrap_or_else(|| config.database_path(&config_path));
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let db_path_str = db_path
        .to_str()
        .context("Database path is not valid UTF-8")?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            anyhow::bail!(
                "Database {} is locked by another process. Try again shortly.",
                db_path.display()
            );
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to open database {}", db_path.display()))
        }
    };
    tracing::debug!(path = %db_path.display(), "Opened database");

    let registry = Registry::with_builtins();
    let mut state = State::new(db, config, config_path);

    let output = registry
        .run(&mut state, &args.command, &args.args)
        .await
        .with_context(|| format!("{} failed", args.command))?;
    if !output.is_empty() {
        println!("{}", output);
    }

    Ok(())
}
