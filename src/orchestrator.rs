//! Reconciliation orchestrator (§4.6): owns the state that must survive
//! across ticks, drives one tick end to end, and runs the tick loop with
//! cooperative shutdown.

use tokio::signal;
use tracing::{error, info, warn};

use crate::client::ClusterClient;
use crate::config::PlannerConfig;
use crate::error::{PlannerError, Result};
use crate::inflight;
use crate::liveness::LivenessTracker;
use crate::metrics;
use crate::placement;
use crate::rebalance::dispatch;
use crate::rebalance::weighted::WeightedSampler;
use crate::snapshot;
use crate::types::InflightMove;

use crate::awareness::AwarenessToggle;

/// State that must persist across ticks because the cluster API never
/// reports it back directly (§9 Design Notes).
pub struct ControllerState {
    inflight_moves: Vec<InflightMove>,
    liveness: LivenessTracker,
    awareness: AwarenessToggle,
    sampler: WeightedSampler,
}

impl ControllerState {
    pub fn new() -> Self {
        ControllerState {
            inflight_moves: Vec::new(),
            liveness: LivenessTracker::new(),
            awareness: AwarenessToggle::new(),
            sampler: WeightedSampler::from_entropy(),
        }
    }

    /// Runs the startup `_cluster/settings` PUT that takes the built-in
    /// allocator and balancer out of the planner's way (§4.6).
    pub async fn prepare_cluster(&self, client: &dyn ClusterClient) -> Result<()> {
        info!("disabling built-in shard allocation and rebalancing");
        let settings = serde_json::json!({
            "cluster.routing.allocation.enable": "none",
            "cluster.routing.rebalance.enable": "none",
            "cluster.routing.allocation.balance.shard": 0.0,
            "cluster.routing.allocation.balance.index": 0.0,
            "cluster.routing.allocation.balance.threshold": 1.0,
            "cluster.routing.allocation.disk.threshold_enabled": false,
        });
        client.put_cluster_settings(settings.clone(), settings).await
    }

    /// Runs the operator-configured `finally` command sequences on shutdown,
    /// best-effort: a failing command is logged and does not block the rest.
    pub async fn run_finally(&self, client: &dyn ClusterClient, config: &PlannerConfig) {
        for (label, commands) in &config.finally {
            for command in commands {
                info!(label, method = %command.method, path = %command.path, "running finally command");
                let result = if command.method.eq_ignore_ascii_case("PUT") {
                    client
                        .put_cluster_settings(command.body.clone(), serde_json::json!({}))
                        .await
                } else {
                    Ok(())
                };
                if let Err(err) = result {
                    warn!(label, error = %err, "finally command failed");
                }
            }
        }
    }

    pub async fn tick(&mut self, client: &dyn ClusterClient, config: &PlannerConfig) -> Result<()> {
        let timer = metrics::TickTimer::start();
        let result = self.tick_inner(client, config).await;
        let elapsed = timer.finish();
        if let Err(err) = &result {
            metrics::record_tick_error(err.error_type());
            error!(error = %err, elapsed_ms = elapsed.as_millis() as u64, "tick failed");
        } else {
            info!(elapsed_ms = elapsed.as_millis() as u64, inflight = self.inflight_moves.len(), "tick complete");
        }
        metrics::set_inflight_moves(self.inflight_moves.len());
        result
    }

    async fn tick_inner(&mut self, client: &dyn ClusterClient, config: &PlannerConfig) -> Result<()> {
        let snap = snapshot::build(client, config, &mut self.liveness, &mut self.inflight_moves).await?;

        for node in snap.nodes.keys() {
            if let Some(liveness) = self.liveness.status_of(node) {
                metrics::set_node_liveness(node, liveness == crate::types::Liveness::Alive);
            }
        }

        let classified = placement::classify(&snap, config, &mut self.sampler);
        for fix in &classified.replica_fixes {
            client.put_index_settings(&fix.index, fix.target_number_of_replicas).await?;
        }

        dispatch::dispatch(
            classified.requests,
            &snap,
            config,
            client,
            &mut self.inflight_moves,
            &mut self.sampler,
            &mut self.awareness,
        )
        .await?;

        metrics::set_awareness_enabled(self.awareness.is_on());
        Ok(())
    }
}

impl Default for ControllerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs ticks on a fixed interval until SIGINT/SIGTERM, then runs the
/// `finally` sequence before returning.
pub async fn run(client: &dyn ClusterClient, config: &PlannerConfig) -> Result<()> {
    let mut state = ControllerState::new();
    state.prepare_cluster(client).await?;

    let mut interval = tokio::time::interval(std::time::Duration::from_secs(config.constants.tick_interval_secs));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(err) = state.tick(client, config).await {
                    if matches!(err, PlannerError::CircuitBreaker(_)) {
                        error!(error = %err, "circuit breaker tripped, aborting this tick");
                    }
                }
            }
            _ = shutdown_signal() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    state.run_finally(client, config).await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
