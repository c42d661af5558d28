//! Courier CLI - operate the offline-first delivery queue.
//!
//! Runs the delivery service against an HTTP backend and offers admin
//! commands over the persisted queue.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use courier_common::MessageId;
use courier_storage::{KeyValueStore, StoreBackend};
use courier_sync::{
    EventReceiver, MessageSender, OutgoingMessage, PollingMonitor, Priority, SignalMonitor,
    SyncConfig, SyncEngine, SyncEngineBuilder, SyncEvent, SyncScheduler,
};
use courier_transport::{HttpProbe, HttpSender, LoopbackSender};

/// Backend used when neither the flag nor the config file names one.
const DEFAULT_ENDPOINT: &str = "http://localhost:3000";

/// Lock file guarding the data directory.
const LOCK_FILE: &str = "courier.lock";

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Courier - offline-first message delivery")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the persisted queue.
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the delivery service until interrupted.
    Run {
        /// Backend base URL.
        #[arg(short, long)]
        endpoint: Option<String>,
    },

    /// Add a message to the persisted queue.
    Enqueue {
        /// Message payload as JSON.
        #[arg(short, long)]
        payload: String,

        /// Priority: "high", "normal", or "low".
        #[arg(long, default_value = "normal")]
        priority: Priority,

        /// Message id (generated when omitted).
        #[arg(long)]
        id: Option<String>,
    },

    /// Show queue status.
    Status,

    /// Drop every queued message.
    Clear,

    /// Deliver the queue now, regardless of connectivity.
    Flush {
        /// Backend base URL.
        #[arg(short, long)]
        endpoint: Option<String>,
    },

    /// Simulate an outage and recovery with an in-process backend.
    Demo,
}

/// Contents of the `--config` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct CourierConfig {
    /// Engine settings.
    engine: SyncConfig,
    /// Store backend: "file" or "memory".
    store: StoreBackend,
    /// Backend base URL.
    endpoint: Option<String>,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            engine: SyncConfig::default(),
            store: StoreBackend::default(),
            endpoint: None,
        }
    }
}

impl CourierConfig {
    fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        config.engine.validate()?;
        Ok(config)
    }

    fn endpoint(&self, flag: Option<String>) -> String {
        flag.or_else(|| self.endpoint.clone())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = CourierConfig::load(cli.config.as_deref())?;
    let data_dir = resolve_data_dir(cli.data_dir)?;

    match cli.command {
        Commands::Run { endpoint } => {
            cmd_run(&config, &data_dir, &config.endpoint(endpoint)).await
        }

        Commands::Enqueue {
            payload,
            priority,
            id,
        } => cmd_enqueue(&config, &data_dir, &payload, priority, id).await,

        Commands::Status => cmd_status(&config, &data_dir).await,

        Commands::Clear => cmd_clear(&config, &data_dir).await,

        Commands::Flush { endpoint } => {
            cmd_flush(&config, &data_dir, &config.endpoint(endpoint)).await
        }

        Commands::Demo => cmd_demo().await,
    }
}

fn resolve_data_dir(flag: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(dir);
    }
    dirs::data_dir()
        .map(|dir| dir.join("courier"))
        .context("No platform data directory; pass --data-dir")
}

/// Take the data directory for the lifetime of the returned file.
///
/// Fails at once if another courier process holds it.
fn lock_data_dir(data_dir: &Path) -> Result<File> {
    fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;

    let path = data_dir.join(LOCK_FILE);
    let file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    file.try_lock_exclusive()
        .map_err(|_| anyhow!("another courier process is using {}", data_dir.display()))?;
    debug!(lock = %path.display(), "Data directory locked");
    Ok(file)
}

fn open_store(config: &CourierConfig, data_dir: &Path) -> Result<Arc<dyn KeyValueStore>> {
    let store = config
        .store
        .open(Some(data_dir))
        .with_context(|| format!("Failed to open '{}' store", config.store))?;
    debug!(store = store.name(), dir = %data_dir.display(), "Store opened");
    Ok(store)
}

async fn open_engine<S>(
    config: &CourierConfig,
    data_dir: &Path,
    sender: Arc<S>,
) -> Result<Arc<SyncEngine<S>>>
where
    S: MessageSender + 'static,
{
    let engine = SyncEngineBuilder::from_arc(sender)
        .with_config(config.engine.clone())
        .with_store(open_store(config, data_dir)?)
        .build()
        .await
        .context("Failed to start delivery engine")?;
    Ok(Arc::new(engine))
}

/// Forward engine events to the log until the engine goes away.
fn spawn_event_log(mut events: EventReceiver) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    })
}

/// Wait for Ctrl-C or SIGTERM.
#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            info!("Received Ctrl+C");
        }
        _ = terminate.recv() => info!("Received SIGTERM"),
    }
    Ok(())
}

/// Wait for Ctrl-C.
#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C");
    Ok(())
}

fn log_event(event: &SyncEvent) {
    match event {
        SyncEvent::Online => info!("Connection restored"),
        SyncEvent::Offline => warn!("Connection lost, messages will be queued"),
        SyncEvent::MessageQueued(message) => {
            debug!(message_id = %message.id, priority = %message.priority, "Message queued")
        }
        SyncEvent::SyncComplete(summary) => info!(
            synced = summary.synced,
            failed = summary.failed,
            remaining = summary.remaining,
            "Sync cycle finished"
        ),
        SyncEvent::MessageFailed(failed) => error!(
            message_id = %failed.message.id,
            error = %failed.error,
            "Message failed permanently"
        ),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run the delivery service until Ctrl-C or SIGTERM.
async fn cmd_run(config: &CourierConfig, data_dir: &Path, endpoint: &str) -> Result<()> {
    let _lock = lock_data_dir(data_dir)?;
    info!("Starting delivery service against {}", endpoint);

    let sender = Arc::new(HttpSender::new(endpoint)?);
    let probe = Arc::new(HttpProbe::new(endpoint)?);
    let engine = open_engine(config, data_dir, sender).await?;
    let event_log = spawn_event_log(engine.subscribe());

    let monitor = PollingMonitor::spawn(
        probe,
        config.engine.probe_interval,
        config.engine.assume_online,
    );
    let scheduler = SyncScheduler::spawn(engine.clone(), &monitor)?;

    info!(
        "Delivery service running with {} queued messages. Press Ctrl+C to stop.",
        engine.queue_len().await
    );
    shutdown_signal().await?;

    info!("Stopping delivery service");
    drop(monitor);
    scheduler.shutdown().await?;
    event_log.abort();

    let status = engine.status().await;
    info!("Stopped with {} messages still queued", status.queue_size);
    Ok(())
}

async fn cmd_enqueue(
    config: &CourierConfig,
    data_dir: &Path,
    payload: &str,
    priority: Priority,
    id: Option<String>,
) -> Result<()> {
    let payload: Value = serde_json::from_str(payload).context("Payload is not valid JSON")?;

    let mut message = OutgoingMessage::new(payload).with_priority(priority);
    if let Some(id) = id {
        message = message.with_id(MessageId::new(id)?);
    }

    let _lock = lock_data_dir(data_dir)?;
    let engine = open_engine(config, data_dir, Arc::new(LoopbackSender::new())).await?;
    let id = engine.enqueue(message).await;

    println!("{}", id);
    Ok(())
}

async fn cmd_status(config: &CourierConfig, data_dir: &Path) -> Result<()> {
    let _lock = lock_data_dir(data_dir)?;
    let engine = open_engine(config, data_dir, Arc::new(LoopbackSender::new())).await?;
    print_json(&engine.status().await)
}

async fn cmd_clear(config: &CourierConfig, data_dir: &Path) -> Result<()> {
    let _lock = lock_data_dir(data_dir)?;
    let engine = open_engine(config, data_dir, Arc::new(LoopbackSender::new())).await?;
    let count = engine.clear_queue().await;
    println!("Cleared {} messages", count);
    Ok(())
}

async fn cmd_flush(config: &CourierConfig, data_dir: &Path, endpoint: &str) -> Result<()> {
    let _lock = lock_data_dir(data_dir)?;
    info!("Flushing queue to {}", endpoint);

    let sender = Arc::new(HttpSender::new(endpoint)?);
    let engine = open_engine(config, data_dir, sender).await?;
    let event_log = spawn_event_log(engine.subscribe());

    let status = engine.force_sync().await;
    event_log.abort();

    print_json(&status)
}

/// Queue messages while offline, then come back online and watch them drain.
async fn cmd_demo() -> Result<()> {
    let sender = Arc::new(LoopbackSender::new().with_latency(Duration::from_millis(50)));
    let engine = Arc::new(
        SyncEngineBuilder::from_arc(sender.clone())
            .with_config(SyncConfig::default().with_sync_interval(Duration::from_secs(1)))
            .build()
            .await?,
    );
    let event_log = spawn_event_log(engine.subscribe());

    let monitor = SignalMonitor::new(false);
    let scheduler = SyncScheduler::spawn(engine.clone(), &monitor)?;

    info!("Simulating offline mode");
    tokio::time::sleep(Duration::from_millis(100)).await;

    for i in 1..=5 {
        let priority = if i == 1 { Priority::High } else { Priority::Normal };
        let message = OutgoingMessage::new(json!({
            "content": format!("Test message {}", i),
            "roomId": "!demo:localhost",
        }))
        .with_priority(priority);
        engine.enqueue(message).await;
    }
    print_json(&engine.status().await)?;

    info!("Simulating reconnection");
    monitor.set_online(true);
    tokio::time::sleep(Duration::from_secs(2)).await;

    scheduler.shutdown().await?;
    event_log.abort();

    print_json(&engine.status().await)?;
    info!("Delivered {} messages", sender.delivered().len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_enqueue() {
        let cli = Cli::parse_from([
            "courier",
            "--data-dir",
            "/tmp/q",
            "enqueue",
            "--payload",
            r#"{"content":"hi"}"#,
            "--priority",
            "high",
        ]);

        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/q")));
        match cli.command {
            Commands::Enqueue { priority, id, .. } => {
                assert_eq!(priority, Priority::High);
                assert!(id.is_none());
            }
            _ => panic!("expected enqueue"),
        }
    }

    #[test]
    fn test_rejects_unknown_priority() {
        assert!(Cli::try_parse_from(["courier", "enqueue", "-p", "{}", "--priority", "urgent"])
            .is_err());
    }

    #[test]
    fn test_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.json");
        std::fs::write(
            &path,
            r#"{ "engine": { "max_queue_size": 50, "sync_interval": 2000 }, "endpoint": "http://backend:8080" }"#,
        )
        .unwrap();

        let config = CourierConfig::load(Some(&path)).unwrap();
        assert_eq!(config.engine.max_queue_size, 50);
        assert_eq!(config.engine.sync_interval, Duration::from_secs(2));
        assert_eq!(config.store, StoreBackend::File);
        assert_eq!(config.endpoint(None), "http://backend:8080");
        assert_eq!(config.endpoint(Some("http://other".into())), "http://other");
    }

    #[test]
    fn test_config_defaults() {
        let config = CourierConfig::load(None).unwrap();
        assert_eq!(config.endpoint(None), DEFAULT_ENDPOINT);
        assert_eq!(config.engine.max_retry_attempts, 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.json");
        std::fs::write(&path, r#"{ "engine": { "max_queue_size": 0 } }"#).unwrap();

        assert!(CourierConfig::load(Some(&path)).is_err());
    }

    #[tokio::test]
    async fn test_enqueue_then_clear_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = CourierConfig::default();

        cmd_enqueue(&config, dir.path(), r#"{"content":"a"}"#, Priority::Low, None)
            .await
            .unwrap();
        cmd_enqueue(&config, dir.path(), r#"{"content":"b"}"#, Priority::High, Some("b".into()))
            .await
            .unwrap();

        let engine = open_engine(&config, dir.path(), Arc::new(LoopbackSender::new()))
            .await
            .unwrap();
        let pending = engine.pending_messages().await;
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id.as_str(), "b");
        drop(engine);

        cmd_clear(&config, dir.path()).await.unwrap();
        let engine = open_engine(&config, dir.path(), Arc::new(LoopbackSender::new()))
            .await
            .unwrap();
        assert_eq!(engine.queue_len().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_payload() {
        let dir = tempfile::tempdir().unwrap();
        let result =
            cmd_enqueue(&CourierConfig::default(), dir.path(), "not json", Priority::Normal, None)
                .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_memory_store_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.json");
        std::fs::write(&path, r#"{ "store": "memory" }"#).unwrap();

        let config = CourierConfig::load(Some(&path)).unwrap();
        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(open_store(&config, dir.path()).unwrap().name(), "memory");
    }

    #[tokio::test]
    async fn test_commands_refuse_locked_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = CourierConfig::default();
        let held = lock_data_dir(dir.path()).unwrap();

        let err = cmd_enqueue(&config, dir.path(), r#"{"content":"a"}"#, Priority::Normal, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("another courier process"));
        assert!(cmd_clear(&config, dir.path()).await.is_err());
        assert!(cmd_status(&config, dir.path()).await.is_err());
        assert!(lock_data_dir(dir.path()).is_err());

        drop(held);
        cmd_enqueue(&config, dir.path(), r#"{"content":"a"}"#, Priority::Normal, None)
            .await
            .unwrap();
        let engine = open_engine(&config, dir.path(), Arc::new(LoopbackSender::new()))
            .await
            .unwrap();
        assert_eq!(engine.queue_len().await, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sigterm_ends_shutdown_wait() {
        use tokio::signal::unix::{signal, SignalKind};

        // Installed first so the test process survives the signal.
        let _guard = signal(SignalKind::terminate()).unwrap();
        let waiting = tokio::spawn(shutdown_signal());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiting.is_finished());

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), waiting)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
