//! Planner observability metrics (§6c): counters for issued/skipped/failed
//! moves, a tick-duration histogram, and gauges for inflight moves and
//! per-node liveness, exported via `metrics-exporter-prometheus`.

use std::time::{Duration, Instant};

/// Record a move the dispatcher successfully issued.
pub fn record_move_issued(index: &str, reason: &str) {
    metrics::counter!(
        "shard_planner_moves_issued_total",
        "index" => index.to_string(),
        "reason" => reason.to_string(),
    )
    .increment(1);
}

/// Record a move the dispatcher chose not to issue (no candidate, recoverable
/// rejection, lost node, or contended retry).
pub fn record_move_skipped(index: &str, reason: &str) {
    metrics::counter!(
        "shard_planner_moves_skipped_total",
        "index" => index.to_string(),
        "reason" => reason.to_string(),
    )
    .increment(1);
}

/// Record a move the cluster rejected outright (counts toward the circuit
/// breaker).
pub fn record_move_failed(index: &str) {
    metrics::counter!(
        "shard_planner_moves_failed_total",
        "index" => index.to_string(),
    )
    .increment(1);
}

/// Record a tick ending in an error, labeled by `PlannerError::error_type`.
pub fn record_tick_error(error_type: &str) {
    metrics::counter!(
        "shard_planner_tick_errors_total",
        "error_type" => error_type.to_string(),
    )
    .increment(1);
}

pub fn set_inflight_moves(count: usize) {
    metrics::gauge!("shard_planner_inflight_moves").set(count as f64);
}

pub fn set_node_liveness(node: &str, alive: bool) {
    metrics::gauge!("shard_planner_node_alive", "node" => node.to_string()).set(if alive { 1.0 } else { 0.0 });
}

pub fn set_awareness_enabled(enabled: bool) {
    metrics::gauge!("shard_planner_awareness_enabled").set(if enabled { 1.0 } else { 0.0 });
}

/// Guard for timing one reconciliation tick.
pub struct TickTimer {
    start: Instant,
}

impl TickTimer {
    pub fn start() -> Self {
        TickTimer { start: Instant::now() }
    }

    pub fn finish(self) -> Duration {
        let elapsed = self.start.elapsed();
        metrics::histogram!("shard_planner_tick_duration_seconds").record(elapsed.as_secs_f64());
        elapsed
    }
}
