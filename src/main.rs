//! wabridge - Main Entry Point
//!
//! Wires the MQTT sidecar transport, the connection lifecycle, the event
//! dispatcher and the HTTP API together, then runs until SIGINT or SIGTERM.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use wabridge::api::{self, ApiState};
use wabridge::config::{BridgeConfig, IdentityMode, WorkflowStoreKind};
use wabridge::identity::{DirectoryIdentityResolver, IdentityResolver, PlaceholderIdentityResolver};
use wabridge::observability::{init_default_logging, metrics};
use wabridge::processing::EventDispatcher;
use wabridge::protocol::WorkflowType;
use wabridge::routing::{
    FlowiseBackend, N8nBackend, UnconfiguredBackend, WorkflowBackend, WorkflowRouter,
};
use wabridge::session::ConnectionLifecycleManager;
use wabridge::store::{
    FileWorkflowConfigStore, InMemoryUserDirectory, StaticWorkflowConfigStore,
    WorkflowConfigStore,
};
use wabridge::transport::mqtt::MqttClient;
use wabridge::transport::Transport;

/// WhatsApp to n8n/Flowise bridge
#[derive(Parser)]
#[command(name = "wabridge")]
#[command(about = "Bridge a WhatsApp session to n8n or Flowise workflows")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "WABRIDGE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge
    Run,
    /// Validate configuration
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,
    },
}

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting wabridge v{}", env!("CARGO_PKG_VERSION"));

    let config = match BridgeConfig::discover(cli.config.as_deref()) {
        Ok((config, path)) => {
            info!(path = %path.display(), "Configuration loaded");
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_bridge(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

async fn run_bridge(config: BridgeConfig) -> AppResult<()> {
    info!(service_id = %config.service.id, "Bridge starting");

    let transport = Arc::new(MqttClient::new(config.sidecar_options())?);
    let (event_tx, event_rx) = mpsc::channel(config.service.event_buffer);
    transport.set_event_sender(event_tx);

    let store = build_store(&config);
    let router = Arc::new(build_router(&config, Arc::clone(&store))?);
    let identity = build_identity(&config);

    let lifecycle = Arc::new(ConnectionLifecycleManager::new(Arc::clone(&transport)));
    let shutdown = CancellationToken::new();

    let dispatcher = Arc::new(EventDispatcher::new(
        Arc::clone(&lifecycle),
        router,
        identity,
        config.dispatcher_config(),
        shutdown.child_token(),
    ));
    let dispatcher_task = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.run(event_rx).await })
    };

    let http_task = if config.http.enabled {
        let addr = config.http_bind_address()?;
        let state = Arc::new(ApiState::new(
            config.service.id.clone(),
            Arc::clone(&lifecycle),
            Arc::clone(&store),
        ));
        let token = shutdown.child_token();
        Some(tokio::spawn(async move {
            if let Err(e) = api::serve(state, addr, token).await {
                error!("HTTP API error: {}", e);
            }
        }))
    } else {
        info!("HTTP API disabled");
        None
    };

    // A start failure leaves the process up so the HTTP API can report it
    if let Err(e) = lifecycle.start().await {
        error!("Session start failed: {}", e);
    }

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Bridge is running");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }

    shutdown.cancel();
    lifecycle.stop().await;
    if dispatcher_task.await.is_err() {
        warn!("Dispatcher task ended abnormally");
    }
    if let Some(task) = http_task {
        if task.await.is_err() {
            warn!("HTTP task ended abnormally");
        }
    }
    transport.shutdown().await;

    let snapshot = metrics().get_metrics();
    info!(
        received = snapshot.messages.received,
        routed = snapshot.messages.routed,
        failed = snapshot.messages.failed,
        "Final message counters"
    );
    Ok(())
}

fn build_store(config: &BridgeConfig) -> Arc<dyn WorkflowConfigStore> {
    match config.workflow.store {
        WorkflowStoreKind::File => {
            // validate() guarantees a path for the file store
            let path = config.workflow.path.clone().unwrap_or_default();
            info!(path = %path.display(), "Using file workflow config store");
            Arc::new(FileWorkflowConfigStore::new(path))
        }
        WorkflowStoreKind::Static => {
            info!(workflow_type = %config.workflow.workflow_type, "Using static workflow config");
            Arc::new(StaticWorkflowConfigStore::new(
                config.workflow.workflow_type.clone(),
            ))
        }
    }
}

fn build_router(
    config: &BridgeConfig,
    store: Arc<dyn WorkflowConfigStore>,
) -> AppResult<WorkflowRouter> {
    let n8n: Arc<dyn WorkflowBackend> = Arc::new(N8nBackend::new(config.n8n_config()));
    let flowise: Arc<dyn WorkflowBackend> = match config.flowise_config()? {
        Some(flowise_config) => Arc::new(FlowiseBackend::new(flowise_config)),
        None => {
            warn!("No [flowise] section; routing to Flowise will fail");
            Arc::new(UnconfiguredBackend::new(WorkflowType::Flowise))
        }
    };
    Ok(WorkflowRouter::new(store, n8n, flowise))
}

fn build_identity(config: &BridgeConfig) -> Arc<dyn IdentityResolver> {
    match config.identity.mode {
        IdentityMode::Placeholder => Arc::new(PlaceholderIdentityResolver),
        IdentityMode::Directory => {
            let directory = Arc::new(InMemoryUserDirectory::new(config.users()));
            info!(users = directory.len(), "Using user directory for identity");
            Arc::new(DirectoryIdentityResolver::new(
                directory,
                config.identity.notify_unregistered,
            ))
        }
    }
}

fn handle_config_command(config: &BridgeConfig, show: bool) -> AppResult<()> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
