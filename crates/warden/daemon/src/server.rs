//! Server setup and lifecycle management

use crate::adapters::{DryRunCapability, TelemetryHealthCheck, WebhookCapability, WebhookNotifier};
use crate::api::create_router;
use crate::api::rest::state::AppState;
use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use warden_recovery::{
    ActionCapability, Capabilities, DependencyGraph, IncidentOrchestrator, LogNotifier, Notifier,
    PatternStore, RuleBasedAnalyzer, SymptomDetector, TelemetryIngest,
};
use warden_types::IncidentEvent;

/// Warden Daemon Server
pub struct Server {
    config: DaemonConfig,
    orchestrator: IncidentOrchestrator,
}

impl Server {
    /// Create a new server with the given configuration. Loads learned
    /// patterns from disk.
    pub fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let orchestrator = build_orchestrator(&config)?;

        orchestrator.patterns().load(&config.patterns.path)?;

        Ok(Self {
            config,
            orchestrator,
        })
    }

    pub fn orchestrator(&self) -> &IncidentOrchestrator {
        &self.orchestrator
    }

    /// Run the server
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;
        let app = create_router(AppState::new(self.orchestrator.clone()), &self.config.server);

        // Create listener
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Warden daemon listening on {}", addr);

        let path = self.config.patterns.path.clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(log_events(self.orchestrator.subscribe()));
        let flusher = tokio::spawn(flush_patterns(
            self.orchestrator.patterns().clone(),
            path.clone(),
            self.config.patterns.flush_interval,
            shutdown_rx,
        ));

        // Run server with graceful shutdown
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!("Warden daemon shutting down");

        let _ = shutdown_tx.send(true);
        if let Err(e) = flusher.await {
            tracing::warn!(error = %e, "Pattern flush task ended abnormally");
        }

        self.orchestrator.shutdown();
        self.orchestrator.patterns().save(&path)?;
        tracing::info!(
            patterns = self.orchestrator.patterns().len(),
            path = %path.display(),
            "Saved learned patterns"
        );

        Ok(())
    }
}

/// Wire the engine with the capabilities named in the configuration.
pub fn build_orchestrator(config: &DaemonConfig) -> DaemonResult<IncidentOrchestrator> {
    let engine = config.engine_config();
    engine.validate()?;

    let telemetry = Arc::new(TelemetryIngest::from_config(&engine.detection));
    let patterns = Arc::new(PatternStore::new(
        engine.patterns.decay,
        engine.recovery.pattern_confidence_floor,
    ));
    let graph = match &config.topology_path {
        Some(path) => load_topology(path)?,
        None => DependencyGraph::default_topology(),
    };

    let timeout = Duration::from_secs(config.capability.timeout_secs);
    let actions: Arc<dyn ActionCapability> = match &config.capability.action_webhook {
        Some(url) => {
            tracing::info!(url = %url, "Sending actions to webhook");
            Arc::new(WebhookCapability::new(url.clone(), timeout).map_err(webhook_error)?)
        }
        None => {
            tracing::warn!("No action webhook configured, running in dry-run mode");
            Arc::new(DryRunCapability)
        }
    };
    let notifier: Arc<dyn Notifier> = match &config.capability.notify_webhook {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone(), timeout).map_err(webhook_error)?),
        None => Arc::new(LogNotifier),
    };

    let capabilities = Capabilities {
        analyzer: Arc::new(RuleBasedAnalyzer::default()),
        actions,
        health: Arc::new(TelemetryHealthCheck::new(
            telemetry.clone(),
            SymptomDetector::from_config(&engine.detection),
        )),
        notifier,
    };

    let orchestrator =
        IncidentOrchestrator::new(engine, telemetry, graph, patterns, capabilities)?;
    Ok(orchestrator)
}

fn webhook_error(e: reqwest::Error) -> DaemonError {
    DaemonError::Config(format!("Invalid webhook client: {}", e))
}

/// Read a dependency graph from a JSON file.
pub fn load_topology(path: &Path) -> DaemonResult<DependencyGraph> {
    let raw = std::fs::read_to_string(path)?;
    let graph: DependencyGraph = serde_json::from_str(&raw).map_err(|e| {
        DaemonError::Config(format!("Invalid topology {}: {}", path.display(), e))
    })?;
    graph.validate()?;

    tracing::info!(services = graph.len(), path = %path.display(), "Loaded topology");
    Ok(graph)
}

/// Write patterns back periodically until shutdown.
async fn flush_patterns(
    patterns: Arc<PatternStore>,
    path: PathBuf,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if patterns.is_empty() {
                    continue;
                }
                if let Err(e) = patterns.save(&path) {
                    tracing::warn!(error = %e, path = %path.display(), "Pattern flush failed");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn log_events(mut events: broadcast::Receiver<IncidentEvent>) {
    loop {
        match events.recv().await {
            Ok(IncidentEvent::Transitioned {
                incident_id,
                device_id,
                from,
                to,
                reason,
            }) => {
                tracing::info!(
                    incident_id = %incident_id,
                    device_id = %device_id,
                    from = %from,
                    to = %to,
                    reason = %reason,
                    "Incident state changed"
                );
            }
            Ok(event) => {
                tracing::debug!(device_id = %event.device_id(), event = ?event, "Incident event");
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event log fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
