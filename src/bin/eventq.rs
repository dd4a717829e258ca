//! eventq CLI: run the consumer and inspect the queue.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use eventq::config::Config;
use eventq::config::secrets::ExposeSecret;
use eventq::db::{Backend, PgStore, SqliteStore, StoreAdmin};
use eventq::engine::{ShutdownHandle, WorkerPool};
use eventq::handler::{CommandHandler, DelayHandler, EventHandler, Router};
use eventq::model::{EventId, NewEvent};
use eventq::queue::QueueAccessLayer;
use eventq::telemetry::{TelemetryConfig, init_telemetry};
use tracing::info;

#[derive(Parser)]
#[command(name = "eventq", about = "At-least-once consumer for an events table")]
struct Cli {
    /// TOML file with [queue] and [handlers.*] sections
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the worker pool and stale guard until Ctrl-C / SIGTERM
    Serve {
        /// Number of workers (overrides WORKERS and the config file)
        #[arg(long)]
        workers: Option<usize>,
        /// Executable for event types without a configured handler
        #[arg(long, conflicts_with = "simulate_ms")]
        fallback_command: Option<PathBuf>,
        /// Log and sleep this long instead of running a command for unrouted types
        #[arg(long)]
        simulate_ms: Option<u64>,
    },
    /// Run a single stale-claim maintenance pass
    Reclaim,
    /// Show an event as JSON
    Show {
        /// Event ID
        id: EventId,
    },
    /// Insert a new unclaimed event
    Enqueue {
        /// Event type (selects the handler)
        event_type: String,
        /// Payload, passed to the handler verbatim
        payload: String,
        /// Deduplication token carried with the event
        #[arg(long, default_value = "")]
        idempotency_key: String,
    },
    /// Create the events table if it does not exist
    InitSchema,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    let _telemetry = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "eventq".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let url = config.database_url.expose_secret().to_string();
    match Backend::from_url(&url)? {
        Backend::Sqlite => dispatch(SqliteStore::connect(&url).await?, cli.command, config).await,
        Backend::Postgres => dispatch(PgStore::connect(&url).await?, cli.command, config).await,
    }
}

async fn dispatch<S: StoreAdmin + 'static>(
    mut store: S,
    command: Command,
    mut config: Config,
) -> anyhow::Result<()> {
    match command {
        Command::Serve {
            workers,
            fallback_command,
            simulate_ms,
        } => {
            if let Some(n) = workers {
                config.queue.workers = n;
            }
            let handler = build_router(&config, fallback_command.as_deref(), simulate_ms);
            cmd_serve(store, config, handler).await
        }
        Command::Reclaim => {
            let queue = QueueAccessLayer::new(store, config.queue.thresholds()?);
            let report = queue.reclaim_stale().await?;
            println!("released: {}", report.released);
            println!("deleted:  {}", report.deleted);
            Ok(())
        }
        Command::Show { id } => {
            let queue = QueueAccessLayer::new(store, config.queue.thresholds()?);
            match queue.fetch(&id).await? {
                Some(event) => {
                    println!("{}", serde_json::to_string_pretty(&event)?);
                    println!("state: {}", event.state());
                    Ok(())
                }
                None => anyhow::bail!("no event with id {id}"),
            }
        }
        Command::Enqueue {
            event_type,
            payload,
            idempotency_key,
        } => {
            let id = store
                .insert(NewEvent::new(event_type, payload).idempotency_key(idempotency_key))
                .await?;
            println!("Enqueued: {id}");
            Ok(())
        }
        Command::InitSchema => {
            store.ensure_schema().await?;
            println!("events table ready");
            Ok(())
        }
    }
}

async fn cmd_serve<S: StoreAdmin + 'static>(
    mut store: S,
    config: Config,
    handler: Arc<dyn EventHandler>,
) -> anyhow::Result<()> {
    store.health_check().await?;
    let queue = Arc::new(QueueAccessLayer::new(store, config.queue.thresholds()?));
    let pool = WorkerPool::new(queue, handler, config.queue);

    tokio::spawn(watch_signals(pool.shutdown_handle()));

    pool.run().await?;
    Ok(())
}

fn build_router(
    config: &Config,
    fallback_command: Option<&Path>,
    simulate_ms: Option<u64>,
) -> Arc<dyn EventHandler> {
    let fallback: Option<Arc<dyn EventHandler>> = match (fallback_command, simulate_ms) {
        (Some(program), _) => Some(Arc::new(CommandHandler::new(program))),
        (None, Some(ms)) => Some(Arc::new(DelayHandler::new(Duration::from_millis(ms)))),
        (None, None) => None,
    };
    Arc::new(Router::from_specs(&config.handlers, fallback))
}

async fn watch_signals(stop: ShutdownHandle) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("stop (ctrl-c)"),
                    _ = term.recv() => info!("stop (SIGTERM)"),
                }
            }
            Err(_) => {
                tokio::signal::ctrl_c().await.ok();
                info!("stop (ctrl-c)");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
        info!("stop (ctrl-c)");
    }
    stop.shutdown();
}
