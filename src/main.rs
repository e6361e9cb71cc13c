//! Homework import worker
//!
//! Polls the job table, turns free-text homework into tasks, and optionally
//! serves the job API.

use anyhow::{Context, Result};
use clap::Parser;
use homework_worker::cli::{Cli, Command, SubjectsCommand, SubmitArgs};
use homework_worker::config::{Config, ConfigLoader, ConfigPaths};
use homework_worker::db::Database;
use homework_worker::extract::OpenAiExtractor;
use homework_worker::import::ImportNormalizer;
use homework_worker::jobs::{
    self, HandlerRegistry, IMPORT_HOMEWORK, ImportHandler, ImportHomeworkPayload, JobRequest,
    Worker,
};
use homework_worker::server::{self, AppState};
use secrecy::SecretString;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let mut loader = ConfigLoader::load_with_override(
        ConfigPaths::discover(),
        cli.config.as_deref().map(Path::new),
    )?;
    for source in loader.sources() {
        debug!(path = %source.display(), "Using config file");
    }
    if let Some(db_path) = &cli.database {
        loader.config_mut().server.db_path = db_path.into();
    }
    let config = loader.into_config();

    match cli.command {
        Some(Command::Work) | None => run_worker(config).await?,
        Some(Command::Serve { bind }) => run_serve(config, bind).await?,
        Some(Command::Submit(args)) => run_submit(&config, args)?,
        Some(Command::Job { id, user }) => {
            let db = open_db(&config)?;
            match db.get_job_for_owner(id, user)? {
                Some(job) => print_json(&job)?,
                None => anyhow::bail!("job {} not found for user {}", id, user),
            }
        }
        Some(Command::Subjects(cmd)) => {
            let db = open_db(&config)?;
            match cmd {
                SubjectsCommand::List => print_json(&db.list_subjects()?)?,
                SubjectsCommand::Add { name } => print_json(&db.add_subject(&name)?)?,
                SubjectsCommand::Seed => {
                    let inserted = db.seed_subjects()?;
                    println!("Seeded {} subject(s)", inserted);
                }
            }
        }
        Some(Command::Tasks { child_id }) => {
            let db = open_db(&config)?;
            print_json(&db.list_tasks_for_child(child_id)?)?;
        }
    }

    Ok(())
}

/// Install the fmt subscriber selected by `--log`. `RUST_LOG` wins over `--verbose`.
fn init_logging(cli: &Cli) -> Result<()> {
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };

    match cli.log.as_str() {
        "0" | "off" => {}
        "1" | "stdout" => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter())
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(filename)
                .with_context(|| format!("cannot open log file {}", filename))?;
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter())
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

fn open_db(config: &Config) -> Result<Database> {
    Database::open(&config.server.db_path)
        .with_context(|| format!("cannot open database {}", config.server.db_path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Wire the extractor, normalizer and handlers into a worker.
fn build_worker(config: &Config, db: Database) -> Result<Worker> {
    let api_key = std::env::var(&config.extractor.api_key_env)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .map(SecretString::from);
    if api_key.is_none() {
        warn!(
            env = %config.extractor.api_key_env,
            "No extraction API key set; import jobs will fail"
        );
    }

    let extractor = Arc::new(OpenAiExtractor::new(&config.extractor, api_key)?);
    let normalizer = ImportNormalizer::new(extractor, &config.import);

    let mut registry = HandlerRegistry::new();
    registry.register(IMPORT_HOMEWORK, ImportHandler::new(db.clone(), normalizer))?;

    Ok(Worker::new(
        db,
        Arc::new(registry),
        Duration::from_millis(config.worker.poll_interval_ms),
    ))
}

/// Open the database and make sure the canonical subjects exist.
fn prepare_db(config: &Config) -> Result<Database> {
    let db = open_db(config)?;
    let seeded = db.seed_subjects()?;
    if seeded > 0 {
        info!(seeded, "Seeded subject catalog");
    }
    Ok(db)
}

/// Shutdown channel flipped by Ctrl-C.
fn shutdown_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            let _ = tx.send(true);
        }
    });
    rx
}

async fn run_worker(config: Config) -> Result<()> {
    let db = prepare_db(&config)?;
    let worker = build_worker(&config, db)?;
    worker.run(shutdown_channel()).await;
    Ok(())
}

async fn run_serve(config: Config, bind: Option<String>) -> Result<()> {
    let db = prepare_db(&config)?;
    let worker = Arc::new(build_worker(&config, db.clone())?);
    let shutdown = shutdown_channel();

    let state = AppState::new(db, worker.wakeup(), config.server.worker_api_key.clone());
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("cannot bind {}", bind))?;

    let worker_task = {
        let worker = worker.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run(shutdown).await })
    };

    server::serve(listener, state, shutdown).await?;
    worker_task.await?;
    Ok(())
}

fn run_submit(config: &Config, args: SubmitArgs) -> Result<()> {
    let db = open_db(config)?;
    let raw_text = args.raw_text()?;
    let request = JobRequest::ImportHomework(ImportHomeworkPayload {
        raw_text,
        child_id: args.child,
    });
    let job = jobs::submit(&db, args.user, &request)?;
    print_json(&job)
}
