//! Daemon setup and lifecycle management

use crate::config::DaemonConfig;
use crate::error::DaemonResult;
use crate::templates;
use approval_engine::{ApprovalEngine, InMemoryInstanceStore, SweepReport, SystemClock};
use approval_types::ApprovalEventEnvelope;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Approval daemon
pub struct Daemon {
    config: DaemonConfig,
    engine: Arc<ApprovalEngine>,
}

impl Daemon {
    /// Create a daemon with an in-memory instance store
    pub fn new(config: DaemonConfig) -> Self {
        let engine = ApprovalEngine::new(
            config.engine.clone(),
            Arc::new(InMemoryInstanceStore::new()),
            config.directory.build(),
            Arc::new(SystemClock),
        );
        Self {
            config,
            engine: Arc::new(engine),
        }
    }

    pub fn engine(&self) -> &Arc<ApprovalEngine> {
        &self.engine
    }

    /// Load the configured template file, if any
    pub async fn load_templates(&self) -> DaemonResult<usize> {
        let Some(path) = self.config.templates.path.as_deref() else {
            tracing::warn!("No template file configured, every validation will go unrouted");
            return Ok(0);
        };
        let parsed = templates::read_templates(path).await?;
        let ids = templates::register_all(&self.engine, parsed).await?;
        Ok(ids.len())
    }

    /// Run a single SLA sweep
    pub async fn sweep_once(&self) -> DaemonResult<SweepReport> {
        Ok(self.engine.sla_monitor().sweep().await?)
    }

    /// Run the SLA monitor until a shutdown signal arrives
    pub async fn run(self) -> DaemonResult<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Event log
        let events = self.engine.subscribe();
        let event_log = tokio::spawn(log_events(events, shutdown_rx.clone()));

        // SLA monitor
        let monitor = Arc::new(self.engine.sla_monitor());
        let period = self.config.monitor.sweep_interval();
        let sweeper = tokio::spawn(monitor.run(period, shutdown_rx));

        tracing::info!(
            sweep_interval_secs = period.as_secs(),
            at_risk_window_hours = self.config.engine.at_risk_window_hours,
            "Approval daemon running"
        );

        shutdown_signal().await;
        tracing::info!("Approval daemon shutting down");

        // Receivers may already be gone
        let _ = shutdown_tx.send(true);
        if let Err(e) = sweeper.await {
            tracing::error!(error = %e, "SLA monitor task failed");
        }
        if let Err(e) = event_log.await {
            tracing::error!(error = %e, "Event log task failed");
        }
        Ok(())
    }
}

/// Write every domain event to the log until shutdown
async fn log_events(
    mut events: broadcast::Receiver<ApprovalEventEnvelope>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(envelope) => {
                    tracing::info!(
                        event = envelope.event.name(),
                        event_id = %envelope.id,
                        tenant = %envelope.tenant_id,
                        instance_id = %envelope.event.instance_id(),
                        "Approval event"
                    );
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event log fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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
