//! Snapshot builder (§4.1): pulls node stats, shard and index listings from
//! the cluster, merges operator overrides, and produces the immutable
//! per-tick `Snapshot`.

use std::collections::{HashMap, HashSet};

use crate::client::ClusterClient;
use crate::config::PlannerConfig;
use crate::error::{PlannerError, Result};
use crate::inflight;
use crate::liveness::LivenessTracker;
use crate::sizefmt::{split_at, text_to_bytes};
use crate::types::{
    AllocationCell, CellKey, Node, NodeRole, Shard, ShardKey, ShardKind, ShardStatus, Snapshot,
    Zone, InflightMove,
};

/// `index, i, type, status` are always present; `num, size, ip, node` are
/// blank (and so absent after whitespace-splitting) for UNASSIGNED shards.
const CAT_SHARDS_MIN_COLUMNS: usize = 4;

pub async fn build(
    client: &dyn ClusterClient,
    config: &PlannerConfig,
    liveness: &mut LivenessTracker,
    inflight_moves: &mut Vec<InflightMove>,
) -> Result<Snapshot> {
    let mut zones: HashMap<String, Zone> = config
        .zones
        .iter()
        .map(|z| (z.name.clone(), Zone::new(z.name.clone(), z.shards, z.risky, z.busy)))
        .collect();

    let stats = client.node_stats().await?;
    let mut nodes: HashMap<String, Node> = HashMap::new();
    for raw in stats.nodes.into_values() {
        let mut zone = raw.attributes.get("zone").cloned();
        let roles: HashSet<NodeRole> = raw.roles.iter().map(|r| NodeRole::parse(r)).collect();
        let memory = raw.jvm.as_ref().map(|j| j.mem.heap_max_in_bytes).unwrap_or(0);
        let (disk, disk_free) = raw
            .fs
            .as_ref()
            .map(|f| (f.total.total_in_bytes, f.total.available_in_bytes))
            .unwrap_or((0, 0));

        if let Some(ov) = config.nodes.iter().find(|n| n.name == raw.name) {
            if ov.zone.is_some() {
                zone = ov.zone.clone();
            }
        }

        let mut node = Node {
            name: raw.name.clone(),
            ip: raw.host.clone().unwrap_or_default(),
            roles,
            zone,
            memory,
            disk,
            disk_free,
            siblings: 0,
        };

        if let Some(ov) = config.nodes.iter().find(|n| n.name == raw.name) {
            if let Some(mem) = &ov.memory {
                node.memory = text_to_bytes(mem).unwrap_or(node.memory);
            }
            if let Some(disk) = &ov.disk {
                node.disk = text_to_bytes(disk).unwrap_or(node.disk);
            }
            if let Some(disk_free) = &ov.disk_free {
                node.disk_free = text_to_bytes(disk_free).unwrap_or(node.disk_free);
            }
        }
        node.disk_free = node.disk_free.min(node.disk);

        nodes.insert(node.name.clone(), node);
    }

    liveness.update(nodes.keys().map(|s| s.as_str()));

    for node in nodes.values() {
        let zone_name = node.zone.as_ref().ok_or_else(|| PlannerError::NodeWithoutZone(node.name.clone()))?;
        if !zones.contains_key(zone_name) {
            zones.insert(zone_name.clone(), Zone::new(zone_name.clone(), 1, false, false));
        }
    }

    for node in nodes.values_mut() {
        if !node.is_data() {
            node.memory = 0;
            node.disk = 0;
            node.disk_free = 0;
        }
    }

    for node in nodes.values() {
        let zone_name = node.zone.as_ref().expect("validated above");
        let zone = zones.get_mut(zone_name).expect("inserted above");
        zone.num_nodes += 1;
        if node.is_data() {
            zone.memory += node.memory;
        }
    }
    let mut siblings_by_zone: HashMap<String, u32> = HashMap::new();
    for node in nodes.values() {
        if node.is_data() {
            *siblings_by_zone.entry(node.zone.clone().unwrap()).or_insert(0) += 1;
        }
    }
    for node in nodes.values_mut() {
        if let Some(zone_name) = &node.zone {
            node.siblings = *siblings_by_zone.get(zone_name).unwrap_or(&0);
        }
    }

    let indices_body = client.cat_indices().await?;
    let known_indices: HashSet<String> = indices_body
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| split_at(line).get(2).cloned())
        .collect();

    let shards_body = client.cat_shards().await?;
    let mut shards: HashMap<ShardKey, Vec<Shard>> = HashMap::new();
    for line in shards_body.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_at(line);
        if fields.len() < CAT_SHARDS_MIN_COLUMNS {
            continue;
        }
        let index = fields[0].clone();
        let i: u32 = match fields[1].parse() {
            Ok(v) => v,
            Err(_) => continue,
        };
        let kind = ShardKind::parse(&fields[2]);
        let status = ShardStatus::parse(&fields[3]);
        let size = fields.get(5).map(|s| text_to_bytes(s).unwrap_or(0)).unwrap_or(0);

        let (node_name, relocating_to) = if fields.len() >= 11 && fields[8] == "->" {
            (Some(fields[7].clone()), Some(fields[10].clone()))
        } else if fields.len() > 7 {
            (Some(fields[7].clone()), None)
        } else {
            (None, None)
        };

        if let Some(to_node) = &relocating_to {
            if let Some(from_node) = &node_name {
                let already_tracked = inflight_moves.iter().any(|m| {
                    m.index == index && m.shard_id == i && m.to_node == *to_node
                });
                if !already_tracked {
                    inflight_moves.push(InflightMove {
                        index: index.clone(),
                        shard_id: i,
                        from_node: from_node.clone(),
                        to_node: to_node.clone(),
                    });
                }
            }
        }

        let shard = Shard {
            index: index.clone(),
            i,
            replica_num: fields.get(4).and_then(|s| s.parse().ok()).unwrap_or(0),
            kind,
            status,
            size,
            node: node_name,
            index_size: 0,
            siblings: 0,
            synthetic: false,
        };
        shards.entry(ShardKey::new(index, i)).or_default().push(shard);
    }
    for group in shards.values_mut() {
        let max_size = group.iter().map(|s| s.size).max().unwrap_or(0);
        for s in group.iter_mut() {
            s.size = max_size;
        }
    }

    let mut scratch = Snapshot {
        zones: zones.clone(),
        nodes: nodes.clone(),
        shards,
        cells: HashMap::new(),
        required: HashMap::new(),
        index_primaries: HashMap::new(),
        index_replica_count: HashMap::new(),
        known_indices: known_indices.clone(),
    };
    inflight::reconcile(inflight_moves, &mut scratch);
    let shards = scratch.shards;

    let mut index_size: HashMap<String, u64> = HashMap::new();
    let mut index_primaries: HashMap<String, u32> = HashMap::new();
    let mut index_replica_rows: HashMap<String, u32> = HashMap::new();
    for (key, rows) in &shards {
        for s in rows {
            *index_size.entry(key.index.clone()).or_insert(0) += s.size;
            if s.kind == ShardKind::Primary {
                *index_primaries.entry(key.index.clone()).or_insert(0) += 1;
            }
            *index_replica_rows.entry(key.index.clone()).or_insert(0) += 1;
        }
    }

    let mut shards = shards;
    for (key, rows) in shards.iter_mut() {
        let total = *index_size.get(&key.index).unwrap_or(&0);
        let primaries = *index_primaries.get(&key.index).unwrap_or(&1).max(&1);
        for s in rows.iter_mut() {
            s.index_size = total;
            s.siblings = primaries;
        }
    }

    let mut required: HashMap<String, HashMap<String, u32>> = HashMap::new();
    for index in shards.keys().map(|k| k.index.clone()).collect::<HashSet<_>>() {
        let mut per_zone = HashMap::new();
        for zone in zones.values() {
            let target = config.zone_shards_for(&index, &zone.name, zone.shards);
            let capped = target.min(zone.num_nodes);
            per_zone.insert(zone.name.clone(), capped);
        }
        required.insert(index, per_zone);
    }

    let mut cells: HashMap<CellKey, AllocationCell> = HashMap::new();
    for (index, per_zone) in &required {
        let primaries = *index_primaries.get(index).unwrap_or(&1).max(&1);
        for node in nodes.values() {
            if !node.is_data() {
                continue;
            }
            let zone_name = match &node.zone {
                Some(z) => z,
                None => continue,
            };
            let zone = match zones.get(zone_name) {
                Some(z) => z,
                None => continue,
            };
            let replicas_per_zone = *per_zone.get(zone_name).unwrap_or(&0);
            let pro = if zone.memory > 0 {
                (node.memory as f64 / zone.memory as f64) * replicas_per_zone as f64 * primaries as f64
            } else {
                0.0
            };
            let min_allowed = pro.floor() as i64;
            let max_allowed = if node.memory > 0 { pro.ceil() as i64 } else { 0 };
            cells.insert(
                CellKey { index: index.clone(), node: node.name.clone() },
                AllocationCell {
                    index: index.clone(),
                    node: node.name.clone(),
                    min_allowed,
                    max_allowed,
                    shard_ids: Vec::new(),
                },
            );
        }
    }
    for (key, rows) in &shards {
        for s in rows {
            if !s.status.is_active() {
                continue;
            }
            if let Some(node) = &s.node {
                if let Some(cell) = cells.get_mut(&CellKey { index: key.index.clone(), node: node.clone() }) {
                    cell.shard_ids.push(key.i);
                }
            }
        }
    }

    Ok(Snapshot {
        zones,
        nodes,
        shards,
        cells,
        required,
        index_primaries,
        index_replica_count: index_replica_rows,
        known_indices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{NodeStatsResponse, RawFsStat, RawFsTotal, RawJvmMem, RawJvmStat, RawNodeStat, RerouteCommand, RerouteResponse};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeClient {
        nodes: Vec<RawNodeStat>,
        indices: String,
        shards: String,
        settings_calls: Mutex<Vec<(String, u32)>>,
    }

    #[async_trait]
    impl ClusterClient for FakeClient {
        async fn node_stats(&self) -> Result<NodeStatsResponse> {
            let map = self
                .nodes
                .iter()
                .map(|n| (n.name.clone(), clone_raw(n)))
                .collect();
            Ok(NodeStatsResponse { nodes: map })
        }
        async fn cat_indices(&self) -> Result<String> {
            Ok(self.indices.clone())
        }
        async fn cat_shards(&self) -> Result<String> {
            Ok(self.shards.clone())
        }
        async fn put_index_settings(&self, index: &str, number_of_replicas: u32) -> Result<()> {
            self.settings_calls.lock().unwrap().push((index.to_string(), number_of_replicas));
            Ok(())
        }
        async fn reroute(&self, _commands: Vec<RerouteCommand>) -> Result<RerouteResponse> {
            Ok(RerouteResponse { acknowledged: true })
        }
        async fn put_cluster_settings(&self, _p: serde_json::Value, _t: serde_json::Value) -> Result<()> {
            Ok(())
        }
    }

    fn clone_raw(n: &RawNodeStat) -> RawNodeStat {
        RawNodeStat {
            name: n.name.clone(),
            host: n.host.clone(),
            roles: n.roles.clone(),
            attributes: n.attributes.clone(),
            jvm: n.jvm.as_ref().map(|j| RawJvmStat { mem: RawJvmMem { heap_max_in_bytes: j.mem.heap_max_in_bytes } }),
            fs: n.fs.as_ref().map(|f| RawFsStat {
                total: RawFsTotal {
                    total_in_bytes: f.total.total_in_bytes,
                    available_in_bytes: f.total.available_in_bytes,
                },
            }),
        }
    }

    fn data_node(name: &str, zone: &str, memory: u64) -> RawNodeStat {
        let mut attrs = HashMap::new();
        attrs.insert("zone".to_string(), zone.to_string());
        RawNodeStat {
            name: name.to_string(),
            host: Some("10.0.0.1".to_string()),
            roles: vec!["data".to_string()],
            attributes: attrs,
            jvm: Some(RawJvmStat { mem: RawJvmMem { heap_max_in_bytes: memory } }),
            fs: Some(RawFsStat { total: RawFsTotal { total_in_bytes: 100, available_in_bytes: 90 } }),
        }
    }

    #[tokio::test]
    async fn builds_required_replicas_bounded_by_zone_node_count() {
        let config: PlannerConfig = toml::from_str(
            r#"
            [[zones]]
            name = "primary"
            shards = 5
            "#,
        )
        .unwrap();
        let client = FakeClient {
            nodes: vec![data_node("n1", "primary", 1000)],
            indices: "open green ix uuid1\n".to_string(),
            shards: "ix 0 p STARTED 0 10mb 10.0.0.1 n1\n".to_string(),
            settings_calls: Mutex::new(vec![]),
        };
        let mut liveness = LivenessTracker::new();
        let mut inflight = vec![];
        let snap = build(&client, &config, &mut liveness, &mut inflight).await.unwrap();
        assert_eq!(*snap.required.get("ix").unwrap().get("primary").unwrap(), 1);
    }

    #[tokio::test]
    async fn node_without_zone_is_flagged() {
        let config: PlannerConfig = toml::from_str("").unwrap();
        let client = FakeClient {
            nodes: vec![RawNodeStat {
                name: "n1".to_string(),
                host: Some("10.0.0.1".to_string()),
                roles: vec!["data".to_string()],
                attributes: HashMap::new(),
                jvm: Some(RawJvmStat { mem: RawJvmMem { heap_max_in_bytes: 10 } }),
                fs: Some(RawFsStat { total: RawFsTotal { total_in_bytes: 100, available_in_bytes: 90 } }),
            }],
            indices: String::new(),
            shards: String::new(),
            settings_calls: Mutex::new(vec![]),
        };
        let mut liveness = LivenessTracker::new();
        let mut inflight = vec![];
        let result = build(&client, &config, &mut liveness, &mut inflight).await;
        assert!(matches!(result, Err(PlannerError::NodeWithoutZone(_))));
    }
}
