//! Destination selector and dispatcher (§4.4): turns the classifier's
//! prioritized `AllocationRequest`s into `_cluster/reroute` commands, one
//! shard at a time, tracking per-node bandwidth and a single `done` set so a
//! shard is never touched twice in the same tick.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::awareness::AwarenessToggle;
use crate::client::{ClusterClient, RerouteCommand};
use crate::config::PlannerConfig;
use crate::error::{classify_reroute_reason, PlannerError, Result, RerouteOutcome};
use crate::inflight;
use crate::metrics;
use crate::rebalance::weighted::WeightedSampler;
use crate::types::{AllocationRequest, InflightMove, ShardKey, ShardKind, ShardStatus, Snapshot};

#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub issued: u32,
    pub skipped: u32,
}

/// Per-tick bandwidth accounting, in bytes rather than move counts: a node
/// may have at most `concurrent * big_shard_size` bytes inbound and the same
/// outbound before the dispatcher stops choosing it as a destination/source.
struct BandwidthBudget {
    limit_bytes: u64,
    inbound: HashMap<String, u64>,
    outbound: HashMap<String, u64>,
}

impl BandwidthBudget {
    fn new(limit_bytes: u64) -> Self {
        BandwidthBudget { limit_bytes: limit_bytes.max(1), inbound: HashMap::new(), outbound: HashMap::new() }
    }

    fn has_room(&self, from: Option<&str>, to: &str) -> bool {
        if *self.inbound.get(to).unwrap_or(&0) >= self.limit_bytes {
            return false;
        }
        if let Some(from) = from {
            if *self.outbound.get(from).unwrap_or(&0) >= self.limit_bytes {
                return false;
            }
        }
        true
    }

    fn record(&mut self, from: Option<&str>, to: &str, bytes: u64) {
        *self.inbound.entry(to.to_string()).or_insert(0) += bytes;
        if let Some(from) = from {
            *self.outbound.entry(from.to_string()).or_insert(0) += bytes;
        }
    }
}

/// Bytes of the shard identified by `key`, equalized across its rows.
fn shard_bytes(snapshot: &Snapshot, key: &ShardKey) -> u64 {
    snapshot.shard_rows(key).iter().map(|s| s.size).max().unwrap_or(0)
}

pub async fn dispatch(
    mut requests: Vec<AllocationRequest>,
    snapshot: &Snapshot,
    config: &PlannerConfig,
    client: &dyn ClusterClient,
    inflight_moves: &mut Vec<InflightMove>,
    sampler: &mut WeightedSampler,
    awareness: &mut AwarenessToggle,
) -> Result<DispatchReport> {
    requests.sort_by_key(|r| r.sort_key());

    let mut report = DispatchReport::default();
    let mut done: HashSet<_> = HashSet::new();
    let mut lost_nodes: HashSet<String> = HashSet::new();
    let limit_bytes = config.constants.concurrent as u64 * config.big_shard_size_bytes()?;
    let mut budget = BandwidthBudget::new(limit_bytes);
    for mv in inflight_moves.iter() {
        let bytes = shard_bytes(snapshot, &ShardKey::new(mv.index.clone(), mv.shard_id));
        budget.record(Some(&mv.from_node), &mv.to_node, bytes);
    }
    let mut consecutive_failures = 0u32;

    for request in &requests {
        if done.contains(&request.shard) {
            continue;
        }
        if config.debug.log_all_requests {
            debug!(index = %request.shard.index, shard = request.shard.i, reason = request.reason, "considering allocation request");
        }

        let source_node = request.source_node.clone().or_else(|| derive_source(snapshot, request));

        let destination = choose_destination(snapshot, request, &lost_nodes, &budget, source_node.as_deref(), sampler);
        let destination = match destination {
            Some(d) => d,
            None => {
                debug!(index = %request.shard.index, shard = request.shard.i, "no eligible destination this tick");
                report.skipped += 1;
                continue;
            }
        };

        if config.debug.dry_run {
            info!(index = %request.shard.index, shard = request.shard.i, destination = %destination, reason = request.reason, "dry run: would dispatch");
            done.insert(request.shard.clone());
            continue;
        }

        let command = build_command(config, request, source_node.as_deref(), &destination);
        let outcome = send_with_retry(client, command.clone(), awareness, config).await?;

        match outcome {
            RerouteOutcome::Accepted => {
                budget.record(source_node.as_deref(), &destination, shard_bytes(snapshot, &request.shard));
                if let Some(from) = &source_node {
                    inflight::record(inflight_moves, &request.shard.index, request.shard.i, from, &destination);
                }
                metrics::record_move_issued(&request.shard.index, request.reason);
                done.insert(request.shard.clone());
                report.issued += 1;
                consecutive_failures = 0;
            }
            RerouteOutcome::SkippedRecoverable { reason } => {
                debug!(index = %request.shard.index, shard = request.shard.i, %reason, "reroute skipped");
                metrics::record_move_skipped(&request.shard.index, "recoverable");
                done.insert(request.shard.clone());
                report.skipped += 1;
            }
            RerouteOutcome::NodeLost { node } => {
                warn!(%node, "reroute reports node unresolvable, excluding for the rest of this tick");
                lost_nodes.insert(node);
                metrics::record_move_skipped(&request.shard.index, "node_lost");
                report.skipped += 1;
            }
            RerouteOutcome::RetryWithAwarenessOff { reason } => {
                // send_with_retry already attempted the retry; reaching this
                // branch means even the retry came back with the same class.
                debug!(index = %request.shard.index, shard = request.shard.i, %reason, "reroute still contended after awareness retry");
                metrics::record_move_skipped(&request.shard.index, "too_many_copies");
                done.insert(request.shard.clone());
                report.skipped += 1;
            }
            RerouteOutcome::Failed { reason } => {
                warn!(index = %request.shard.index, shard = request.shard.i, %reason, "reroute failed");
                metrics::record_move_failed(&request.shard.index);
                consecutive_failures += 1;
                done.insert(request.shard.clone());
                report.skipped += 1;
                if consecutive_failures >= config.constants.max_move_failures {
                    return Err(PlannerError::CircuitBreaker(consecutive_failures));
                }
            }
        }
    }

    awareness.ensure_on(client, config).await?;
    Ok(report)
}

/// Per §4.4 step 2: an `AllocationRequest` with no explicit source (an
/// UNASSIGNED shard) still drags bandwidth from a STARTED primary of the
/// same `(index, i)`, if one exists.
fn derive_source(snapshot: &Snapshot, request: &AllocationRequest) -> Option<String> {
    snapshot
        .shard_rows(&request.shard)
        .iter()
        .find(|s| s.status == ShardStatus::Started && s.kind == ShardKind::Primary)
        .and_then(|s| s.node.clone())
}

fn choose_destination(
    snapshot: &Snapshot,
    request: &AllocationRequest,
    lost_nodes: &HashSet<String>,
    budget: &BandwidthBudget,
    source_node: Option<&str>,
    sampler: &mut WeightedSampler,
) -> Option<String> {
    if let Some(forced) = &request.forced_destination {
        if budget.has_room(source_node, forced) {
            return Some(forced.clone());
        }
        return None;
    }

    let occupied: HashSet<&str> = snapshot
        .shard_rows(&request.shard)
        .iter()
        .filter(|s| s.status.is_active())
        .filter_map(|s| s.node.as_deref())
        .collect();

    let candidates: Vec<&crate::types::Node> = snapshot
        .nodes
        .values()
        .filter(|n| n.is_data())
        .filter(|n| !lost_nodes.contains(&n.name))
        .filter(|n| Some(n.name.as_str()) != source_node)
        .filter(|n| !occupied.contains(n.name.as_str()))
        .filter(|n| n.zone.as_deref().map(|z| request.candidate_zones.is_empty() || request.candidate_zones.contains(z)).unwrap_or(false))
        .filter(|n| budget.has_room(source_node, &n.name))
        .collect();

    if candidates.is_empty() {
        return None;
    }

    let weights: Vec<f64> = candidates.iter().map(|n| node_weight(snapshot, n, request)).collect();
    let idx = sampler.choose(&weights)?;
    Some(candidates[idx].name.clone())
}

/// Weighs a candidate node by available heap memory, scaled down the closer
/// the node already sits to its fair share of this index in its zone. A node
/// at or past its `min_allowed` cell count for this index is penalized
/// geometrically so the sampler strongly prefers genuinely under-served
/// nodes without ever fully excluding one that still has headroom. A second
/// factor further discounts a node already holding a large share of this
/// index's total bytes, so two nodes with equal memory but unequal existing
/// density are not weighed the same.
fn node_weight(snapshot: &Snapshot, node: &crate::types::Node, request: &AllocationRequest) -> f64 {
    if node.memory == 0 {
        return 0.0;
    }
    let current_count = snapshot.cell(&request.shard.index, &node.name).map(|c| c.started_count() as i64).unwrap_or(0);
    let min_allowed = snapshot.cell(&request.shard.index, &node.name).map(|c| c.min_allowed).unwrap_or(0);
    let exponent = (min_allowed - current_count - 1).min(-1);
    let fair_share_factor = 4f64.powi(exponent as i32);
    let same_index_bytes = same_index_bytes_on_node(snapshot, &request.shard.index, &node.name);
    let density_factor = 1.0 - (same_index_bytes as f64 / (request.index_size as f64 + 1.0));
    node.memory as f64 * fair_share_factor * density_factor
}

/// Bytes of STARTED shards of `index` currently sitting on `node`.
fn same_index_bytes_on_node(snapshot: &Snapshot, index: &str, node: &str) -> u64 {
    snapshot
        .shards
        .iter()
        .filter(|(k, _)| k.index == index)
        .flat_map(|(_, rows)| rows.iter())
        .filter(|s| s.status == ShardStatus::Started && s.node.as_deref() == Some(node))
        .map(|s| s.size)
        .sum()
}

fn build_command(config: &PlannerConfig, request: &AllocationRequest, source_node: Option<&str>, destination: &str) -> RerouteCommand {
    match source_node {
        Some(from) => RerouteCommand::Move {
            index: request.shard.index.clone(),
            shard: request.shard.i,
            from_node: from.to_string(),
            to_node: destination.to_string(),
        },
        None => match request.kind {
            ShardKind::Primary => RerouteCommand::AllocateEmptyPrimary {
                index: request.shard.index.clone(),
                shard: request.shard.i,
                node: destination.to_string(),
                accept_data_loss: config.constants.accept_data_loss,
            },
            ShardKind::Replica => RerouteCommand::AllocateReplica {
                index: request.shard.index.clone(),
                shard: request.shard.i,
                node: destination.to_string(),
            },
        },
    }
}

/// Issues one reroute command, retrying exactly once with allocation
/// awareness disabled if the cluster reports "too many copies of the shard"
/// (§4.5, §7).
async fn send_with_retry(
    client: &dyn ClusterClient,
    command: RerouteCommand,
    awareness: &mut AwarenessToggle,
    config: &PlannerConfig,
) -> Result<RerouteOutcome> {
    match client.reroute(vec![command.clone()]).await {
        Ok(_) => Ok(RerouteOutcome::Accepted),
        Err(PlannerError::RerouteRejected(reason)) => {
            let outcome = classify_reroute_reason(&reason);
            if let RerouteOutcome::RetryWithAwarenessOff { .. } = &outcome {
                awareness.ensure_off(client, config).await?;
                awareness.wait_for_settle().await;
                let retry = client.reroute(vec![command]).await;
                awareness.ensure_on(client, config).await?;
                return match retry {
                    Ok(_) => Ok(RerouteOutcome::Accepted),
                    Err(PlannerError::RerouteRejected(reason)) => Ok(classify_reroute_reason(&reason)),
                    Err(other) => Err(other),
                };
            }
            Ok(outcome)
        }
        Err(other) => Err(other),
    }
}
