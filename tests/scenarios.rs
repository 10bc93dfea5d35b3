//! End-to-end reconciliation scenarios (§8), driven against a fake cluster
//! client so no network or real Elasticsearch is required.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use shard_planner::client::{
    ClusterClient, NodeStatsResponse, RawFsStat, RawFsTotal, RawJvmMem, RawJvmStat, RawNodeStat,
    RerouteCommand, RerouteResponse,
};
use shard_planner::config::PlannerConfig;
use shard_planner::error::{PlannerError, Result};
use shard_planner::orchestrator::ControllerState;

enum RerouteOutcome {
    Ack,
    Reject(&'static str),
}

struct FakeCluster {
    nodes: Vec<RawNodeStat>,
    indices: String,
    shards: String,
    reroute_script: Mutex<VecDeque<RerouteOutcome>>,
    reroute_calls: Mutex<Vec<RerouteCommand>>,
    settings_calls: Mutex<Vec<(String, u32)>>,
}

impl FakeCluster {
    fn new(nodes: Vec<RawNodeStat>, indices: &str, shards: &str) -> Self {
        FakeCluster {
            nodes,
            indices: indices.to_string(),
            shards: shards.to_string(),
            reroute_script: Mutex::new(VecDeque::new()),
            reroute_calls: Mutex::new(Vec::new()),
            settings_calls: Mutex::new(Vec::new()),
        }
    }

    fn with_reroute_script(self, script: Vec<RerouteOutcome>) -> Self {
        *self.reroute_script.lock().unwrap() = script.into_iter().collect();
        self
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn node_stats(&self) -> Result<NodeStatsResponse> {
        let map = self
            .nodes
            .iter()
            .map(|n| {
                (
                    n.name.clone(),
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
                    },
                )
            })
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

    async fn reroute(&self, commands: Vec<RerouteCommand>) -> Result<RerouteResponse> {
        self.reroute_calls.lock().unwrap().extend(commands.into_iter());
        let next = self.reroute_script.lock().unwrap().pop_front();
        match next {
            None | Some(RerouteOutcome::Ack) => Ok(RerouteResponse { acknowledged: true }),
            Some(RerouteOutcome::Reject(reason)) => Err(PlannerError::RerouteRejected(reason.to_string())),
        }
    }

    async fn put_cluster_settings(&self, _persistent: serde_json::Value, _transient: serde_json::Value) -> Result<()> {
        Ok(())
    }
}

fn data_node(name: &str, zone: &str, memory: u64) -> RawNodeStat {
    node_with_disk(name, zone, memory, 100_000_000, 90_000_000)
}

fn node_with_disk(name: &str, zone: &str, memory: u64, disk_total: u64, disk_free: u64) -> RawNodeStat {
    let mut attrs = HashMap::new();
    attrs.insert("zone".to_string(), zone.to_string());
    RawNodeStat {
        name: name.to_string(),
        host: Some("10.0.0.1".to_string()),
        roles: vec!["data".to_string()],
        attributes: attrs,
        jvm: Some(RawJvmStat { mem: RawJvmMem { heap_max_in_bytes: memory } }),
        fs: Some(RawFsStat { total: RawFsTotal { total_in_bytes: disk_total, available_in_bytes: disk_free } }),
    }
}

fn two_zone_config() -> PlannerConfig {
    toml::from_str(
        r#"
        [[zones]]
        name = "primary"
        shards = 1

        [[zones]]
        name = "spot"
        risky = true
        shards = 1
        "#,
    )
    .unwrap()
}

/// Scenario: a freshly created index has an unassigned replica; the
/// dispatcher should allocate it onto an eligible node in the other zone.
#[tokio::test]
async fn unassigned_replica_gets_allocated() {
    let config = two_zone_config();
    let cluster = FakeCluster::new(
        vec![data_node("p1", "primary", 1_000_000_000), data_node("s1", "spot", 1_000_000_000)],
        "open green ix uuid1\n",
        "ix 0 p STARTED 0 10mb 10.0.0.1 p1\nix 0 r UNASSIGNED\n",
    );

    let mut state = ControllerState::new();
    state.tick(&cluster, &config).await.unwrap();

    let calls = cluster.reroute_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert!(matches!(&calls[0], RerouteCommand::AllocateReplica { index, shard, node } if index == "ix" && *shard == 0 && node == "s1"));
}

/// Scenario: both primary and replica ended up STARTED in the same zone;
/// rule D should move one of them out to the under-served zone.
#[tokio::test]
async fn over_allocated_zone_triggers_a_move() {
    let config = two_zone_config();
    let cluster = FakeCluster::new(
        vec![data_node("p1", "primary", 1_000_000_000), data_node("p2", "primary", 1_000_000_000), data_node("s1", "spot", 1_000_000_000)],
        "open green ix uuid1\n",
        "ix 0 p STARTED 0 10mb 10.0.0.1 p1\nix 0 r STARTED 0 10mb 10.0.0.1 p2\n",
    );

    let mut state = ControllerState::new();
    state.tick(&cluster, &config).await.unwrap();

    let calls = cluster.reroute_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert!(matches!(&calls[0], RerouteCommand::Move { index, shard, to_node, .. } if index == "ix" && *shard == 0 && to_node == "s1"));
}

/// Scenario: the cluster rejects a reroute with "too many copies of the
/// shard"; the dispatcher disables awareness, waits, and retries once.
#[tokio::test(start_paused = true)]
async fn too_many_copies_retries_with_awareness_off() {
    let config = two_zone_config();
    let cluster = FakeCluster::new(
        vec![data_node("p1", "primary", 1_000_000_000), data_node("s1", "spot", 1_000_000_000)],
        "open green ix uuid1\n",
        "ix 0 p STARTED 0 10mb 10.0.0.1 p1\nix 0 r UNASSIGNED\n",
    )
    .with_reroute_script(vec![RerouteOutcome::Reject("[NO(too many copies of the shard)]"), RerouteOutcome::Ack]);

    let mut state = ControllerState::new();
    let before = tokio::time::Instant::now();
    state.tick(&cluster, &config).await.unwrap();
    assert!(before.elapsed() >= std::time::Duration::from_secs(5));

    let calls = cluster.reroute_calls.lock().unwrap();
    assert_eq!(calls.len(), 2, "first rejected attempt and the awareness-off retry");
}

/// Scenario: repeated unrecoverable reroute failures trip the circuit
/// breaker and abort the tick.
#[tokio::test]
async fn repeated_failures_trip_circuit_breaker() {
    let config: PlannerConfig = toml::from_str(
        r#"
        [[zones]]
        name = "primary"
        shards = 2

        [constants]
        max_move_failures = 2
        "#,
    )
    .unwrap();
    let cluster = FakeCluster::new(
        vec![data_node("p1", "primary", 1_000_000_000), data_node("p2", "primary", 1_000_000_000)],
        "open green ix1 uuid1\nopen green ix2 uuid2\n",
        "ix1 0 p STARTED 0 10mb 10.0.0.1 p1\nix1 0 r UNASSIGNED\nix2 0 p STARTED 0 10mb 10.0.0.1 p2\nix2 0 r UNASSIGNED\n",
    )
    .with_reroute_script(vec![RerouteOutcome::Reject("disk watermark exceeded"), RerouteOutcome::Reject("disk watermark exceeded")]);

    let mut state = ControllerState::new();
    let result = state.tick(&cluster, &config).await;
    assert!(matches!(result, Err(PlannerError::CircuitBreaker(_))));
}

/// Scenario: a node is nearly out of disk; rule E should move its largest
/// started shard to a healthy node in the same zone.
#[tokio::test]
async fn full_disk_node_sheds_its_largest_shard() {
    let config: PlannerConfig = toml::from_str(
        r#"
        [[zones]]
        name = "primary"
        shards = 1
        "#,
    )
    .unwrap();
    let cluster = FakeCluster::new(
        vec![
            node_with_disk("n-full", "primary", 1_000_000_000, 100_000_000, 4_000_000),
            node_with_disk("n-ok", "primary", 1_000_000_000, 100_000_000, 90_000_000),
        ],
        "open green ix uuid1\n",
        "ix 0 p STARTED 0 20mb 10.0.0.1 n-full\n",
    );

    let mut state = ControllerState::new();
    state.tick(&cluster, &config).await.unwrap();

    let calls = cluster.reroute_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert!(matches!(&calls[0], RerouteCommand::Move { index, shard, from_node, to_node } if index == "ix" && *shard == 0 && from_node == "n-full" && to_node == "n-ok"));
}

/// Scenario: an index has no active copies at all (both primary and replica
/// UNASSIGNED); the dispatcher must allocate the primary first.
#[tokio::test]
async fn red_index_gets_its_primary_allocated() {
    let config = two_zone_config();
    let cluster = FakeCluster::new(
        vec![data_node("p1", "primary", 1_000_000_000), data_node("s1", "spot", 1_000_000_000)],
        "open red ix uuid1\n",
        "ix 0 p UNASSIGNED\nix 0 r UNASSIGNED\n",
    );

    let mut state = ControllerState::new();
    state.tick(&cluster, &config).await.unwrap();

    let calls = cluster.reroute_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert!(matches!(&calls[0], RerouteCommand::AllocateEmptyPrimary { index, shard, node, .. } if index == "ix" && *shard == 0 && node == "p1"));
}

/// Scenario: several unassigned replicas share one busy source primary; the
/// per-tick bandwidth cap should let only as many through as fit under
/// `concurrent * big_shard_size`, deferring the rest to the next tick.
#[tokio::test]
async fn bandwidth_cap_defers_excess_moves() {
    let config: PlannerConfig = toml::from_str(
        r#"
        [[zones]]
        name = "primary"
        shards = 1

        [[zones]]
        name = "spot"
        risky = true
        shards = 1

        [constants]
        concurrent = 1
        big_shard_size = "2gb"
        "#,
    )
    .unwrap();
    let cluster = FakeCluster::new(
        vec![
            data_node("p1", "primary", 1_000_000_000),
            data_node("s1", "spot", 1_000_000_000),
            data_node("s2", "spot", 1_000_000_000),
            data_node("s3", "spot", 1_000_000_000),
        ],
        "open green ix1 uuid1\nopen green ix2 uuid2\nopen green ix3 uuid3\n",
        "ix1 0 p STARTED 0 1gb 10.0.0.1 p1\nix1 0 r UNASSIGNED\n\
         ix2 0 p STARTED 0 1gb 10.0.0.1 p1\nix2 0 r UNASSIGNED\n\
         ix3 0 p STARTED 0 1gb 10.0.0.1 p1\nix3 0 r UNASSIGNED\n",
    );

    let mut state = ControllerState::new();
    state.tick(&cluster, &config).await.unwrap();

    let calls = cluster.reroute_calls.lock().unwrap();
    assert_eq!(calls.len(), 2, "only two 1gb replicas fit under a 1 * 2gb bandwidth budget from the shared source");
}
