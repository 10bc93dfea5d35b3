//! Policy classifier (§4.3): a pure function from a `Snapshot` to a
//! prioritized list of placement proposals, plus the replica-count
//! reconciliation side effect (rule A).

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::config::PlannerConfig;
use crate::rebalance::weighted::WeightedSampler;
use crate::types::{AllocationRequest, Shard, ShardKey, ShardKind, ShardStatus, Snapshot};

#[derive(Debug, Clone)]
pub struct ReplicaCountFix {
    pub index: String,
    pub target_number_of_replicas: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ClassifyOutput {
    pub requests: Vec<AllocationRequest>,
    pub replica_fixes: Vec<ReplicaCountFix>,
}

pub fn classify(snapshot: &Snapshot, config: &PlannerConfig, sampler: &mut WeightedSampler) -> ClassifyOutput {
    let mut out = ClassifyOutput::default();
    let mut requested: HashSet<ShardKey> = HashSet::new();

    rule_a_replica_count(snapshot, &mut out.replica_fixes);
    rule_b_not_started(snapshot, config, &mut out.requests, &mut requested);
    rule_c_high_risk(snapshot, &mut out.requests, &mut requested);
    rule_d_over_allocated(snapshot, &mut out.requests);
    rule_e_free_space(snapshot, &mut out.requests);
    rule_f_primary_off_busy(snapshot, config, &mut out.requests, sampler);
    rule_g_intra_zone_duplication(snapshot, &mut out.requests, &mut requested);
    rule_h_low_risk_allocation(snapshot, &mut out.requests, &mut requested);
    let imbalanced_zones = rule_i_shard_imbalance(snapshot, &mut out.requests);
    rule_j_inter_zone_duplication(snapshot, &mut out.requests, &mut requested);
    rule_k_slight_balance(snapshot, &imbalanced_zones, &mut out.requests);

    out
}

fn active_count_in_zone(snapshot: &Snapshot, key: &ShardKey, zone: &str) -> u32 {
    snapshot
        .shard_rows(key)
        .iter()
        .filter(|s| s.status.is_active())
        .filter_map(|s| s.node.as_ref())
        .filter_map(|n| snapshot.nodes.get(n))
        .filter(|n| n.zone.as_deref() == Some(zone))
        .count() as u32
}

fn required_for(snapshot: &Snapshot, index: &str, zone: &str) -> u32 {
    snapshot.required.get(index).and_then(|m| m.get(zone)).copied().unwrap_or(0)
}

fn non_risky_zones(snapshot: &Snapshot) -> HashSet<String> {
    snapshot.zones.values().filter(|z| !z.risky).map(|z| z.name.clone()).collect()
}

fn base_request(
    row: &Shard,
    candidate_zones: HashSet<String>,
    reason: &'static str,
    mode_priority: f64,
    replication_priority: i64,
    source_node: Option<String>,
) -> AllocationRequest {
    AllocationRequest {
        shard: ShardKey::new(row.index.clone(), row.i),
        kind: row.kind,
        candidate_zones,
        concurrency_hint: 1,
        reason,
        mode_priority,
        replication_priority,
        index_size: row.index_size,
        forced_destination: None,
        source_node,
    }
}

/// A. Replica-count reconciliation (side effect, no placement).
fn rule_a_replica_count(snapshot: &Snapshot, fixes: &mut Vec<ReplicaCountFix>) {
    for (index, primaries) in &snapshot.index_primaries {
        let primaries = (*primaries).max(1);
        let total_rows = *snapshot.index_replica_count.get(index).unwrap_or(&0);
        let required_total: u32 = snapshot.required.get(index).map(|m| m.values().sum()).unwrap_or(0);
        let observed = (total_rows as f64 / primaries as f64).round() as u32;
        if observed != required_total {
            fixes.push(ReplicaCountFix {
                index: index.clone(),
                target_number_of_replicas: required_total.saturating_sub(1),
            });
        }
    }
}

/// B. Not-started shards (priority 1).
fn rule_b_not_started(
    snapshot: &Snapshot,
    config: &PlannerConfig,
    requests: &mut Vec<AllocationRequest>,
    requested: &mut HashSet<ShardKey>,
) {
    let empty_keys: Vec<ShardKey> = snapshot
        .shards
        .keys()
        .filter(|k| snapshot.active_zones(k).is_empty())
        .cloned()
        .collect();

    let busy_indices: HashSet<&str> = snapshot
        .shards
        .values()
        .flatten()
        .filter(|s| matches!(s.status, ShardStatus::Relocating | ShardStatus::Initializing))
        .map(|s| s.index.as_str())
        .collect();

    let overlapping = empty_keys.iter().filter(|k| busy_indices.contains(k.index.as_str())).count();
    if overlapping > 1 {
        debug!(overlapping, "cluster busy warming up, skipping not-started rule this tick");
        return;
    }

    let non_risky = non_risky_zones(snapshot);
    for key in &empty_keys {
        if let Some(row) = snapshot.shard_rows(key).iter().find(|s| s.status == ShardStatus::Unassigned) {
            requests.push(base_request(
                row,
                non_risky.clone(),
                "not started",
                1.0,
                config.replication_priority_of(&row.index),
                None,
            ));
            requested.insert(key.clone());
        }
    }
}

/// C. High-risk shards (priorities 2, 2.1).
fn rule_c_high_risk(snapshot: &Snapshot, requests: &mut Vec<AllocationRequest>, requested: &mut HashSet<ShardKey>) {
    for key in snapshot.shards.keys() {
        if requested.contains(key) {
            continue;
        }
        let active = snapshot.active_zones(key);
        if active.is_empty() {
            continue;
        }
        let all_risky = active.iter().all(|z| snapshot.zones.get(z).map(|z| z.risky).unwrap_or(false));
        if !all_risky {
            continue;
        }
        let row = match snapshot.shard_rows(key).iter().find(|s| s.status == ShardStatus::Unassigned) {
            Some(r) => r,
            None => continue,
        };

        let eligible: Vec<&str> = snapshot
            .zones
            .values()
            .filter(|z| active_count_in_zone(snapshot, key, &z.name) < required_for(snapshot, &key.index, &z.name))
            .map(|z| z.name.as_str())
            .collect();
        let non_risky: HashSet<String> = eligible
            .iter()
            .filter(|z| !snapshot.zones.get(**z).map(|zo| zo.risky).unwrap_or(false))
            .map(|z| z.to_string())
            .collect();
        if !non_risky.is_empty() {
            requests.push(base_request(row, non_risky, "high risk zone, non-risky fallback", 2.0, 0, None));
            requested.insert(key.clone());
            continue;
        }
        let risky: HashSet<String> = eligible.iter().map(|z| z.to_string()).collect();
        if !risky.is_empty() {
            requests.push(base_request(row, risky, "high risk zone, risky-only fallback", 2.1, 0, None));
            requested.insert(key.clone());
        }
    }
}

/// D. Over-allocated zones (priority 3).
fn rule_d_over_allocated(snapshot: &Snapshot, requests: &mut Vec<AllocationRequest>) {
    for key in snapshot.shards.keys() {
        for zone in snapshot.zones.values() {
            let active = active_count_in_zone(snapshot, key, &zone.name);
            let required = required_for(snapshot, &key.index, &zone.name);
            if active <= required {
                continue;
            }
            let alt = snapshot
                .zones
                .values()
                .filter(|z| z.name != zone.name)
                .filter(|z| active_count_in_zone(snapshot, key, &z.name) < required_for(snapshot, &key.index, &z.name))
                .min_by_key(|z| (z.risky, active_count_in_zone(snapshot, key, &z.name)));
            let alt = match alt {
                Some(z) => z,
                None => continue,
            };
            let busy_destination = alt.busy;
            let candidate_row = snapshot
                .shard_rows(key)
                .iter()
                .filter(|s| s.status == ShardStatus::Started)
                .filter(|s| {
                    s.node.as_ref().and_then(|n| snapshot.nodes.get(n)).and_then(|n| n.zone.as_deref())
                        == Some(zone.name.as_str())
                })
                .min_by_key(|s| if busy_destination { s.kind == ShardKind::Primary } else { false });
            if let Some(row) = candidate_row {
                let mut candidate_zones = HashSet::new();
                candidate_zones.insert(alt.name.clone());
                requests.push(base_request(row, candidate_zones, "over allocated", 3.0, 0, row.node.clone()));
            }
        }
    }
}

/// E. Free-space evacuation (priority 3).
fn rule_e_free_space(snapshot: &Snapshot, requests: &mut Vec<AllocationRequest>) {
    for node in snapshot.nodes.values() {
        if !node.is_data() || node.disk == 0 {
            continue;
        }
        if node.disk_free_ratio() >= 0.05 {
            continue;
        }
        let zone = match &node.zone {
            Some(z) => z.clone(),
            None => continue,
        };
        let largest = snapshot
            .shards
            .values()
            .flatten()
            .filter(|s| s.status == ShardStatus::Started && s.node.as_deref() == Some(node.name.as_str()))
            .max_by_key(|s| s.size);
        if let Some(row) = largest {
            let mut candidate_zones = HashSet::new();
            candidate_zones.insert(zone);
            requests.push(base_request(row, candidate_zones, "free space", 3.0, 0, Some(node.name.clone())));
        }
    }
}

/// F. Primary off busy zone (priority 3). The peer is moved into the busy
/// zone as a swap hint; whether the primary actually migrates out afterward
/// is left to the next tick's rules, not enforced here (§9 open question).
/// The peer is drawn at random from the eligible rows rather than always
/// the first one found in iteration order.
fn rule_f_primary_off_busy(snapshot: &Snapshot, config: &PlannerConfig, requests: &mut Vec<AllocationRequest>, sampler: &mut WeightedSampler) {
    let prefix_len = config.constants.alias_prefix_len.max(1);
    let mut latest_per_prefix: HashMap<String, &str> = HashMap::new();
    for index in &snapshot.known_indices {
        let prefix = if index.len() >= prefix_len { index[..prefix_len].to_string() } else { index.clone() };
        latest_per_prefix
            .entry(prefix)
            .and_modify(|current| {
                if index.as_str() > *current {
                    *current = index.as_str();
                }
            })
            .or_insert(index.as_str());
    }

    for index in latest_per_prefix.values() {
        for rows in snapshot.shards.iter().filter(|(k, _)| &k.index == *index).map(|(_, rows)| rows) {
            if !rows.iter().all(|s| s.status == ShardStatus::Started) {
                continue;
            }
            let primary = match rows.iter().find(|s| s.kind == ShardKind::Primary) {
                Some(p) => p,
                None => continue,
            };
            let primary_zone = match primary.node.as_ref().and_then(|n| snapshot.nodes.get(n)).and_then(|n| n.zone.clone()) {
                Some(z) => z,
                None => continue,
            };
            if !snapshot.zones.get(&primary_zone).map(|z| z.busy).unwrap_or(false) {
                continue;
            }
            let peers: Vec<&Shard> = rows
                .iter()
                .filter(|s| {
                    s.kind == ShardKind::Replica
                        && s.node
                            .as_ref()
                            .and_then(|n| snapshot.nodes.get(n))
                            .and_then(|n| n.zone.as_ref())
                            .map(|z| !snapshot.zones.get(z).map(|zo| zo.busy).unwrap_or(false))
                            .unwrap_or(false)
                })
                .collect();
            let peer = sampler.choose(&vec![1.0; peers.len()]).map(|idx| peers[idx]);
            if let Some(peer) = peer {
                let mut candidate_zones = HashSet::new();
                candidate_zones.insert(primary_zone);
                requests.push(base_request(
                    peer,
                    candidate_zones,
                    "primary off busy zone (swap hint)",
                    3.0,
                    0,
                    peer.node.clone(),
                ));
            }
        }
    }
}

/// G. Intra-zone primary duplication (priority 5).
fn rule_g_intra_zone_duplication(snapshot: &Snapshot, requests: &mut Vec<AllocationRequest>, requested: &mut HashSet<ShardKey>) {
    for (key, rows) in &snapshot.shards {
        if requested.contains(key) {
            continue;
        }
        let row = match rows.iter().find(|s| s.status == ShardStatus::Unassigned && s.kind == ShardKind::Primary) {
            Some(r) => r,
            None => continue,
        };
        let active = snapshot.active_zones(key);
        let zone = active
            .iter()
            .find(|z| active_count_in_zone(snapshot, key, z) >= 1 && active_count_in_zone(snapshot, key, z) < required_for(snapshot, &key.index, z));
        if let Some(zone) = zone {
            let mut candidate_zones = HashSet::new();
            candidate_zones.insert(zone.clone());
            requests.push(base_request(row, candidate_zones, "intra-zone primary duplication", 5.0, 0, None));
            requested.insert(key.clone());
        }
    }
}

/// H. Low-risk allocation (priority 4).
fn rule_h_low_risk_allocation(snapshot: &Snapshot, requests: &mut Vec<AllocationRequest>, requested: &mut HashSet<ShardKey>) {
    for (key, rows) in &snapshot.shards {
        if requested.contains(key) {
            continue;
        }
        let row = match rows.iter().find(|s| s.status == ShardStatus::Unassigned) {
            Some(r) => r,
            None => continue,
        };
        let eligible: HashSet<String> = snapshot
            .zones
            .values()
            .filter(|z| active_count_in_zone(snapshot, key, &z.name) < required_for(snapshot, &key.index, &z.name))
            .map(|z| z.name.clone())
            .collect();
        if !eligible.is_empty() {
            requests.push(base_request(row, eligible, "low risk allocation", 4.0, 0, None));
            requested.insert(key.clone());
        }
    }
}

/// I. Shard imbalance (priority 4). Returns the set of zones that received a
/// proposal, so rule K can skip them.
fn rule_i_shard_imbalance(snapshot: &Snapshot, requests: &mut Vec<AllocationRequest>) -> HashSet<String> {
    let mut imbalanced_zones = HashSet::new();
    for cell in snapshot.cells.values() {
        if (cell.started_count() as i64) <= cell.max_allowed {
            continue;
        }
        let node = match snapshot.nodes.get(&cell.node) {
            Some(n) => n,
            None => continue,
        };
        let zone = match &node.zone {
            Some(z) => z.clone(),
            None => continue,
        };
        let shard_id = match cell.shard_ids.first().copied() {
            Some(i) => i,
            None => continue,
        };
        let key = ShardKey::new(cell.index.clone(), shard_id);
        if active_count_in_zone(snapshot, &key, &zone) > required_for(snapshot, &cell.index, &zone) {
            continue; // rule D already covers this zone being over its required count
        }
        if let Some(row) = snapshot
            .shard_rows(&key)
            .iter()
            .find(|s| s.status == ShardStatus::Started && s.node.as_deref() == Some(cell.node.as_str()))
        {
            let mut candidate_zones = HashSet::new();
            candidate_zones.insert(zone.clone());
            requests.push(base_request(row, candidate_zones, "shard imbalance", 4.0, 0, Some(cell.node.clone())));
            imbalanced_zones.insert(zone);
        }
    }
    imbalanced_zones
}

/// J. Inter-zone duplication (priority 7). Like G but across zones, capped
/// by `zone.shards` rather than the computed required map.
fn rule_j_inter_zone_duplication(snapshot: &Snapshot, requests: &mut Vec<AllocationRequest>, requested: &mut HashSet<ShardKey>) {
    for (key, rows) in &snapshot.shards {
        if requested.contains(key) {
            continue;
        }
        let row = match rows.iter().find(|s| s.status == ShardStatus::Unassigned) {
            Some(r) => r,
            None => continue,
        };
        let eligible: HashSet<String> = snapshot
            .zones
            .values()
            .filter(|z| active_count_in_zone(snapshot, key, &z.name) < z.shards)
            .map(|z| z.name.clone())
            .collect();
        if !eligible.is_empty() {
            requests.push(base_request(row, eligible, "inter-zone duplication", 7.0, 0, None));
            requested.insert(key.clone());
        }
    }
}

/// K. Slight balance (priority 8), only for zones rule I left untouched.
fn rule_k_slight_balance(snapshot: &Snapshot, imbalanced_zones: &HashSet<String>, requests: &mut Vec<AllocationRequest>) {
    for index in snapshot.index_primaries.keys() {
        for zone in snapshot.zones.values() {
            if imbalanced_zones.contains(&zone.name) {
                continue;
            }
            let mut counts: HashMap<&str, u32> = HashMap::new();
            for rows in snapshot.shards.iter().filter(|(k, _)| &k.index == index).map(|(_, rows)| rows) {
                for s in rows.iter().filter(|s| s.status == ShardStatus::Started) {
                    if let Some(node_name) = &s.node {
                        if snapshot.nodes.get(node_name).and_then(|n| n.zone.as_deref()) == Some(zone.name.as_str()) {
                            *counts.entry(node_name.as_str()).or_insert(0) += 1;
                        }
                    }
                }
            }
            let best = counts.iter().max_by_key(|(_, count)| **count);
            let (node_name, count) = match best {
                Some((n, c)) => (*n, *c),
                None => continue,
            };
            let min_allowed = snapshot.cell(index, node_name).map(|c| c.min_allowed).unwrap_or(0).max(1);
            if (count as i64) <= min_allowed {
                continue;
            }
            if let Some(row) = snapshot
                .shards
                .iter()
                .filter(|(k, _)| &k.index == index)
                .flat_map(|(_, rows)| rows.iter())
                .find(|s| s.status == ShardStatus::Started && s.node.as_deref() == Some(node_name))
            {
                let mut candidate_zones = HashSet::new();
                candidate_zones.insert(zone.name.clone());
                requests.push(base_request(row, candidate_zones, "slight balance", 8.0, 0, Some(node_name.to_string())));
            }
        }
    }
}
