//! hass-sentinel daemon and CLI
//!
//! # Usage
//!
//! ```bash
//! # Run the monitor (default subcommand)
//! hass-sentinel --config /etc/hass-sentinel/sentinel.toml
//!
//! # Validate a config file without starting anything
//! hass-sentinel --config sentinel.toml check-config
//!
//! # Query or drive a running daemon over HTTP
//! hass-sentinel status
//! hass-sentinel heal sensor.kitchen_temperature --dry-run
//! ```
//!
//! # Environment Variables
//!
//! - `HASS_SENTINEL_CONFIG`: config file path when `--config` is not given
//! - `HASS_TOKEN`: controller access token (name configurable via `controller.token_env`)
//! - `HASS_SENTINEL_CORS_ORIGINS`: extra CORS origins for the HTTP API
//! - `RUST_LOG`: logging level (default: info)

use anyhow::{Context, Result};
use axum::Router;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use hass_sentinel::api::{create_app, ApiState};
use hass_sentinel::background::{run_circuit_sweep, Reconciler};
use hass_sentinel::cache::{EntityFilter, EntityStateCache};
use hass_sentinel::clock::{Clock, SystemClock};
use hass_sentinel::config::{ConfigError, LoadedConfig, LoggingConfig, SentinelConfig};
use hass_sentinel::controller::{ControllerClient, ControllerError, StateSource, WsConnector};
use hass_sentinel::healing::{
    ControllerRemediator, ControllerResolver, HealingOrchestrator, HealingPolicy,
    IntegrationResolver, StaticResolver,
};
use hass_sentinel::health::{HealthMonitor, SharedHealthMonitor};
use hass_sentinel::notify::{ControllerNotifier, FanoutNotifier, LogNotifier, NotificationSink};
use hass_sentinel::pipeline::{IssueDispatcher, MonitorLoop, Sentinel};
use hass_sentinel::storage::{PatternRecorder, PatternStore, ProcessLock};
use hass_sentinel::EventStreamClient;

#[derive(Parser, Debug)]
#[command(name = "hass-sentinel")]
#[command(about = "Entity health monitor and integration healer for Home Assistant")]
#[command(version)]
struct CliArgs {
    /// Path to the TOML config file (falls back to $HASS_SENTINEL_CONFIG, then ./sentinel.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Run the monitor and healing loop (default)
    Run {
        /// Override the HTTP listen address
        #[arg(short, long)]
        addr: Option<String>,
    },
    /// Print the status of a running daemon
    Status {
        /// Daemon address (default: server.addr from config)
        #[arg(long)]
        addr: Option<String>,
    },
    /// Ask a running daemon to heal the integration behind an entity
    Heal {
        entity_id: String,
        /// Report what would happen without reloading anything
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        addr: Option<String>,
    },
    /// Validate the configuration and exit
    CheckConfig,
}

// ============================================================================
// Task supervision
// ============================================================================

#[derive(Debug)]
enum TaskName {
    HttpServer,
    EventStream,
    MonitorLoop,
    Reconciler,
    CircuitSweep,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::HttpServer => write!(f, "HttpServer"),
            TaskName::EventStream => write!(f, "EventStream"),
            TaskName::MonitorLoop => write!(f, "MonitorLoop"),
            TaskName::Reconciler => write!(f, "Reconciler"),
            TaskName::CircuitSweep => write!(f, "CircuitSweep"),
        }
    }
}

fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    app: Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => {
                info!("[HttpServer] Graceful shutdown complete");
                Ok(TaskName::HttpServer)
            }
            Err(e) => {
                error!("[HttpServer] Server error: {}", e);
                Err(anyhow::anyhow!("HTTP server error: {}", e))
            }
        }
    });
}

/// Wait for tasks until cancellation or the first failure.
///
/// A failed or panicked task cancels everything else.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("Supervisor: all tasks spawned, monitoring");

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("Supervisor: shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!(task = %task_name, "Supervisor: task completed normally");
                    }
                    Some(Ok(Err(e))) => {
                        error!("Supervisor: task failed with error: {:#}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("Supervisor: task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("Supervisor: all tasks completed");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

// ============================================================================
// Entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let command = args.command.unwrap_or(SubCommand::Run { addr: None });
    let resolved = SentinelConfig::resolve(args.config.as_deref());

    let loaded = match command {
        SubCommand::CheckConfig => return check_config(resolved),
        _ => resolved.context("Failed to load configuration")?,
    };

    init_logging(&loaded.config.logging);
    match &loaded.source {
        Some(path) => info!(path = %path.display(), "Loaded configuration"),
        None => info!("No config file found, using built-in defaults"),
    }
    for warning in &loaded.warnings {
        warn!("Config: {}", warning);
    }

    match command {
        SubCommand::Run { addr } => run(loaded.config, addr).await,
        SubCommand::Status { addr } => {
            let addr = addr.unwrap_or_else(|| loaded.config.server.addr.clone());
            print_remote(reqwest::Client::new().get(api_url(&addr, "/status"))).await
        }
        SubCommand::Heal { entity_id, dry_run, addr } => {
            let addr = addr.unwrap_or_else(|| loaded.config.server.addr.clone());
            let url = api_url(&addr, &format!("/heal/{entity_id}"));
            print_remote(reqwest::Client::new().post(url).query(&[("dry_run", dry_run)])).await
        }
        SubCommand::CheckConfig => Ok(()),
    }
}

fn init_logging(config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if config.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn check_config(resolved: Result<LoadedConfig, ConfigError>) -> Result<()> {
    let loaded = match resolved {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Configuration invalid: {e}");
            std::process::exit(1);
        }
    };
    match &loaded.source {
        Some(path) => println!("Configuration: {}", path.display()),
        None => println!("Configuration: built-in defaults"),
    }
    for warning in &loaded.warnings {
        println!("  warning: {warning}");
    }
    if loaded.config.controller.access_token().is_none() {
        println!(
            "  warning: no access token (set controller.token or ${})",
            loaded.config.controller.token_env
        );
    }
    println!("OK");
    Ok(())
}

fn api_url(addr: &str, path: &str) -> String {
    let base = if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", addr.replace("0.0.0.0", "127.0.0.1"))
    };
    format!("{base}/api/v1{path}")
}

async fn print_remote(request: reqwest::RequestBuilder) -> Result<()> {
    let response = request.send().await.context("Daemon unreachable")?;
    let status = response.status();
    let body: serde_json::Value = response.json().await.context("Malformed daemon response")?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    if !status.is_success() {
        anyhow::bail!("Daemon returned {status}");
    }
    Ok(())
}

// ============================================================================
// Daemon
// ============================================================================

async fn run(config: SentinelConfig, addr_override: Option<String>) -> Result<()> {
    info!("hass-sentinel v{} starting", env!("CARGO_PKG_VERSION"));

    let _process_lock = ProcessLock::acquire(&config.storage.data_dir)?;

    let store = PatternStore::open(config.storage.data_dir.join("patterns"))
        .context("Failed to open pattern store")?;
    match store.apply_retention(config.storage.retention_days, Utc::now()) {
        Ok(0) => {}
        Ok(pruned) => info!(pruned, "Pruned expired pattern records"),
        Err(e) => warn!("Pattern retention failed: {}", e),
    }
    let recorder: Arc<dyn PatternRecorder> = Arc::new(store.clone());

    let token = config
        .controller
        .access_token()
        .ok_or_else(|| ControllerError::MissingToken(config.controller.token_env.clone()))?;
    let client = ControllerClient::new(&config.controller)?;
    match client.ping().await {
        Ok(()) => info!(url = %client.base_url(), "Controller reachable"),
        Err(ControllerError::Unauthorized) => {
            anyhow::bail!("Controller rejected the access token");
        }
        Err(e) if e.is_transient() => warn!("Controller not reachable yet ({}), continuing", e),
        Err(e) => anyhow::bail!("Controller at {} is not usable: {e}", client.base_url()),
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let filter = EntityFilter::new(&config.monitor);
    let cache = Arc::new(EntityStateCache::new());
    let health = SharedHealthMonitor::new(HealthMonitor::new(&config.health));

    // Notifications
    let mut fanout = FanoutNotifier::new().with(Arc::new(LogNotifier));
    if config.notifications.controller {
        fanout = fanout.with(Arc::new(ControllerNotifier::new(
            client.clone(),
            config.notifications.title.clone(),
        )));
    }
    let notifier: Arc<dyn NotificationSink> = Arc::new(fanout);

    // Healing
    let overrides = StaticResolver::new(&config.resolver.mappings);
    let resolver: Arc<dyn IntegrationResolver> = if config.resolver.controller_lookup {
        Arc::new(ControllerResolver::new(client.clone(), overrides))
    } else {
        if overrides.is_empty() {
            warn!("Resolver has no mappings and controller lookup is off; nothing can be healed");
        }
        Arc::new(overrides)
    };
    let executor = Arc::new(ControllerRemediator::new(client.clone(), config.healing.strategy));
    let orchestrator = Arc::new(
        HealingOrchestrator::new(
            HealingPolicy::from(&config.healing),
            resolver,
            executor,
            Arc::clone(&notifier),
            Arc::clone(&recorder),
            Arc::clone(&clock),
        )
        .with_ledger(Arc::new(health.clone())),
    );

    let tracker = TaskTracker::new();
    let dispatcher = IssueDispatcher::new(
        Arc::clone(&orchestrator),
        health.clone(),
        Arc::clone(&recorder),
        tracker.clone(),
    )
    .healing_enabled(config.healing.enabled)
    .record_issues(config.storage.record_issues);
    if !config.healing.enabled {
        warn!("Healing disabled: issues will be detected and recorded only");
    }

    // Initial snapshot
    let source: Arc<dyn StateSource> = Arc::new(client.clone());
    match source.fetch_states().await {
        Ok(mut states) => {
            states.retain(|s| filter.is_monitored(&s.entity_id));
            info!(entities = states.len(), "Seeded entity cache from snapshot");
            cache.seed(states);
            let issues = health.lock().evaluate_all(&cache.all(), clock.now());
            dispatcher.dispatch_all(issues);
        }
        Err(e) => warn!("Initial snapshot failed ({}), reconciliation will fill the cache", e),
    }

    // Event stream
    let connector = WsConnector::new(
        config.controller.websocket_endpoint(),
        Duration::from_secs(config.stream.connect_timeout_secs),
    );
    let mut stream = EventStreamClient::new(
        connector,
        token,
        config.stream.clone(),
        Arc::clone(&source),
        Arc::clone(&cache),
        Arc::clone(&notifier),
    )
    .with_notify_timeout(Duration::from_secs(config.healing.notify_timeout_secs));
    if let Some(latest) = cache.latest_update() {
        stream = stream.resume_from(latest);
    }
    let stream_status = stream.status_handle();
    let (tx, rx) = mpsc::channel(config.stream.channel_capacity);

    // HTTP surface
    let sentinel = Sentinel::new(
        Arc::clone(&cache),
        health.clone(),
        Arc::clone(&orchestrator),
        stream_status,
        Arc::clone(&recorder),
        Arc::clone(&clock),
    );
    let app = create_app(ApiState::new(sentinel));
    let server_addr = addr_override.unwrap_or_else(|| config.server.addr.clone());
    let listener = tokio::net::TcpListener::bind(&server_addr)
        .await
        .with_context(|| format!("Failed to bind {server_addr}"))?;
    info!(addr = %server_addr, "HTTP API listening");

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown");
        shutdown_token.cancel();
    });

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();
    spawn_http_server(&mut task_set, listener, app, cancel_token.clone());

    let stream_cancel = cancel_token.clone();
    task_set.spawn(async move {
        stream
            .run(tx, stream_cancel)
            .await
            .context("Event stream stopped")?;
        Ok(TaskName::EventStream)
    });

    let monitor = MonitorLoop::new(
        Arc::clone(&cache),
        filter.clone(),
        health.clone(),
        dispatcher.clone(),
        Arc::clone(&clock),
        Duration::from_secs(config.health.tick_interval_secs),
    );
    let monitor_cancel = cancel_token.clone();
    task_set.spawn(async move {
        let stats = monitor.run(rx, monitor_cancel).await;
        info!(
            applied = stats.events_applied,
            ignored = stats.events_ignored,
            issues = stats.issues_raised,
            "Monitor loop finished"
        );
        Ok(TaskName::MonitorLoop)
    });

    let reconciler = Reconciler::new(
        Arc::clone(&source),
        Arc::clone(&cache),
        filter,
        health.clone(),
        dispatcher,
        Arc::clone(&clock),
        Duration::from_secs(config.reconciliation.interval_secs),
        config.reconciliation.missing_cycles_before_removal,
    );
    let reconcile_cancel = cancel_token.clone();
    task_set.spawn(async move {
        reconciler.run(reconcile_cancel).await;
        Ok(TaskName::Reconciler)
    });

    let sweep_cancel = cancel_token.clone();
    let sweep_interval = Duration::from_secs(config.healing.sweep_interval_secs);
    let sweep_orchestrator = Arc::clone(&orchestrator);
    task_set.spawn(async move {
        run_circuit_sweep(sweep_orchestrator, sweep_interval, sweep_cancel).await;
        Ok(TaskName::CircuitSweep)
    });

    let result = run_supervisor(&mut task_set, cancel_token.clone()).await;

    // Shutdown: let loops observe cancellation, then drain in-flight healing
    cancel_token.cancel();
    let grace = Duration::from_secs(config.healing.shutdown_grace_secs);
    if tokio::time::timeout(grace, async { while task_set.join_next().await.is_some() {} })
        .await
        .is_err()
    {
        warn!("Tasks still running after {}s, aborting", grace.as_secs());
        task_set.abort_all();
    }
    tracker.close();
    if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
        warn!(
            in_flight = tracker.len(),
            "Healing attempts still in flight at shutdown, abandoning"
        );
    }
    if let Err(e) = store.flush() {
        warn!("Pattern store flush failed: {}", e);
    }

    info!("hass-sentinel stopped");
    result
}
