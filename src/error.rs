//! The controller's error taxonomy (§7).
//!
//! `PlannerError::error_type` labels the metrics counters; the reroute
//! rejection classifier lives in `rebalance::dispatch` and maps raw response
//! reasons onto the `RerouteOutcome` variants below before they ever become
//! a `PlannerError`, since most rejections are not failures at all.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlannerError {
    #[error("cluster request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid base URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("failed to decode cluster response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to parse config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("node '{0}' has no zone")]
    NodeWithoutZone(String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("too many consecutive move failures ({0}), aborting tick")]
    CircuitBreaker(u32),

    #[error("cluster rejected reroute: {0}")]
    RerouteRejected(String),
}

impl PlannerError {
    /// Classifier label used for metrics (§6c) and log fields.
    pub fn error_type(&self) -> &'static str {
        match self {
            PlannerError::Http(_) => "transient_cluster",
            PlannerError::InvalidUrl(_) => "config",
            PlannerError::Json(_) => "transient_cluster",
            PlannerError::Config(_) => "config",
            PlannerError::Io(_) => "config",
            PlannerError::NodeWithoutZone(_) => "fatal",
            PlannerError::Invariant(_) => "fatal",
            PlannerError::CircuitBreaker(_) => "circuit_breaker",
            PlannerError::RerouteRejected(_) => "reroute_rejected",
        }
    }
}

pub type Result<T> = std::result::Result<T, PlannerError>;

/// How a single `/_cluster/reroute` command resolved, per the §7 taxonomy.
/// Distinct from `PlannerError`: most rejections are routine skips, not
/// failures the orchestrator needs to propagate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RerouteOutcome {
    Accepted,
    /// Built-in balancer contention, out of space, already-placed, or wrong
    /// node version — logged, the request is simply dropped this tick.
    SkippedRecoverable { reason: String },
    /// "too many copies of the shard" — caller should disable awareness,
    /// wait, and retry once.
    RetryWithAwarenessOff { reason: String },
    /// "failed to resolve [X]" — the named node should be treated as
    /// zoneless for the remainder of the tick.
    NodeLost { node: String },
    /// Any other non-2xx / not-acknowledged response.
    Failed { reason: String },
}

/// Classifies a reroute response body's reason string per §7. Pure string
/// matching, mirroring the original implementation's substring checks.
pub fn classify_reroute_reason(reason: &str) -> RerouteOutcome {
    if reason.contains("too many copies of the shard") {
        return RerouteOutcome::RetryWithAwarenessOff { reason: reason.to_string() };
    }
    if let Some(start) = reason.find("failed to resolve [") {
        let rest = &reason[start + "failed to resolve [".len()..];
        if let Some(end) = rest.find(']') {
            return RerouteOutcome::NodeLost { node: rest[..end].to_string() };
        }
    }
    const RECOVERABLE: &[&str] = &[
        "too many shards on nodes for attribute",
        "after allocation more than allowed",
        "shard cannot be allocated on same node",
        "target node version",
    ];
    if RECOVERABLE.iter().any(|needle| reason.contains(needle)) {
        return RerouteOutcome::SkippedRecoverable { reason: reason.to_string() };
    }
    RerouteOutcome::Failed { reason: reason.to_string() }
}
