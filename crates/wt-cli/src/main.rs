use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use wt_cli::commands::{status, today, track, util, watch};
use wt_cli::{Cli, Commands, Config};
use wt_core::{OwnerId, SharedStore, SystemClock, TimeTrackingEngine, WriterHandle, spawn_writer};
use wt_db::Database;

/// Open the configured database, ensuring the parent directory exists.
fn open_database(config: &Config) -> Result<Database> {
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }
    Database::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))
}

async fn dispatch(
    command: &Commands,
    config: &Config,
    owner: OwnerId,
    store: SharedStore<Database>,
    sink: WriterHandle,
) -> Result<()> {
    let clock = SystemClock::new();
    let mut engine = TimeTrackingEngine::initialize(owner, store, &clock, sink)
        .context("failed to load tracking state")?;
    let mut stdout = std::io::stdout().lock();

    match command {
        Commands::Start => track::start(&mut stdout, &mut engine)?,
        Commands::Pause => track::pause(&mut stdout, &mut engine)?,
        Commands::Resume => track::resume(&mut stdout, &mut engine)?,
        Commands::Stop => track::stop(&mut stdout, &mut engine)?,
        Commands::Status { json } => status::run(&mut stdout, &engine, *json)?,
        Commands::Today { json } => {
            today::run(&mut stdout, &engine, *json, &util::timezone_name())?;
        }
        Commands::Watch => {
            let ctrl_c = async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    tracing::warn!(error = %err, "failed to listen for ctrl-c");
                    std::future::pending::<()>().await;
                }
            };
            watch::run(&mut stdout, &engine, config.tick_interval(), ctrl_c).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let Some(command) = &cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let config = Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");
    let owner = OwnerId::new(cli.owner.clone().unwrap_or_else(|| config.owner.clone()))
        .context("invalid owner")?;

    let store = Arc::new(Mutex::new(open_database(&config)?));
    let (writer, mut events) = spawn_writer(Arc::clone(&store), config.persistence.retry_policy());

    let result = dispatch(command, &config, owner, store, writer.handle()).await;

    // Every queued write is applied or abandoned before the process exits.
    writer.shutdown().await;
    while let Ok(event) = events.try_recv() {
        eprintln!("Warning: {event}");
    }

    result
}
