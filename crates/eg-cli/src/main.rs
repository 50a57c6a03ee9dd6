use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use eg_cli::commands::{replay, status};
use eg_cli::{Cli, Commands, Config, ReplayArgs};
use eg_core::ClientId;
use eg_store::IdentityDb;

/// Load config and open the identity store, ensuring the parent directory exists.
fn open_store(config_path: Option<&Path>) -> Result<(IdentityDb, Config)> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.store_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create store directory")?;
    }

    let db = IdentityDb::open(&config.store_path).context("failed to open identity store")?;
    Ok((db, config))
}

fn run_replay(config_path: Option<&Path>, args: &ReplayArgs) -> Result<()> {
    let input = std::fs::read_to_string(&args.trace)
        .with_context(|| format!("failed to read {}", args.trace.display()))?;
    let trace = replay::Trace::parse(&input)
        .with_context(|| format!("failed to parse {}", args.trace.display()))?;
    let start = match &args.start {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .with_context(|| format!("invalid --start time: {raw}"))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let (mut db, config) = open_store(config_path)?;
    if args.new_session {
        db.clear_session().context("failed to clear session identity")?;
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let summary = replay::run(&mut out, &config, &mut db, &trace, start, args.finish)?;
    out.flush()?;

    if let Some(delivery) = summary.delivery {
        tracing::info!(
            delivered = delivery.delivered,
            failed = delivery.failed,
            "snapshot delivery finished"
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // stdout carries snapshots, so logs go to stderr
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    match &cli.command {
        Some(Commands::Replay(args)) => run_replay(cli.config.as_deref(), args)?,
        Some(Commands::Status { client_id }) => {
            let (db, config) = open_store(cli.config.as_deref())?;
            let client = ClientId::new(client_id.as_deref().unwrap_or(&config.client_id))
                .context("invalid client ID")?;
            let stdout = std::io::stdout();
            status::run(&mut stdout.lock(), &db, &config.store_path, &client)?;
        }
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
