//! Core data model for one tick's view of the cluster: zones, nodes, shards,
//! allocation cells and the derived required-replicas map.
//!
//! Entities are kept in arenas keyed by name (or `(index, node)` pair) rather
//! than linked via pointers, so the node<->zone and shard<->cell relationships
//! that would otherwise be cyclic are instead forward maps the snapshot
//! builder resolves once per tick. Nothing here persists across ticks.

use std::collections::{HashMap, HashSet};

/// Named availability domain.
#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    pub name: String,
    /// Nodes here may vanish without notice (e.g. spot instances).
    pub risky: bool,
    /// Avoid placing primaries of the newest index in an alias series here.
    pub busy: bool,
    /// Default target replica count per index in this zone.
    pub shards: u32,
    /// Derived: number of nodes with this zone.
    pub num_nodes: u32,
    /// Derived: sum of data-node heap memory in this zone.
    pub memory: u64,
}

impl Zone {
    pub fn new(name: impl Into<String>, shards: u32, risky: bool, busy: bool) -> Self {
        Zone { name: name.into(), risky, busy, shards, num_nodes: 0, memory: 0 }
    }
}

/// A data, master, ingest, or other cluster role a node may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    Data,
    Master,
    Ingest,
    Other,
}

impl NodeRole {
    pub fn parse(s: &str) -> NodeRole {
        match s {
            "data" | "d" => NodeRole::Data,
            "master" | "m" => NodeRole::Master,
            "ingest" | "i" => NodeRole::Ingest,
            _ => NodeRole::Other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub ip: String,
    pub roles: HashSet<NodeRole>,
    pub zone: Option<String>,
    /// Heap bytes; zero if this node does not hold the data role.
    pub memory: u64,
    pub disk: u64,
    pub disk_free: u64,
    /// Derived: number of data nodes sharing this node's zone.
    pub siblings: u32,
}

impl Node {
    pub fn is_data(&self) -> bool {
        self.roles.contains(&NodeRole::Data)
    }

    pub fn disk_free_ratio(&self) -> f64 {
        if self.disk == 0 {
            1.0
        } else {
            self.disk_free as f64 / self.disk as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardKind {
    Primary,
    Replica,
}

impl ShardKind {
    pub fn parse(s: &str) -> ShardKind {
        match s {
            "p" => ShardKind::Primary,
            _ => ShardKind::Replica,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardStatus {
    Unassigned,
    Initializing,
    Started,
    Relocating,
}

impl ShardStatus {
    pub fn parse(s: &str) -> ShardStatus {
        match s {
            "INITIALIZING" => ShardStatus::Initializing,
            "STARTED" => ShardStatus::Started,
            "RELOCATING" => ShardStatus::Relocating,
            _ => ShardStatus::Unassigned,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ShardStatus::Started | ShardStatus::Relocating | ShardStatus::Initializing)
    }
}

/// `(index, shard_id)` — identifies a partition of an index, independent of
/// which replica slot or node currently hosts it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardKey {
    pub index: String,
    pub i: u32,
}

impl ShardKey {
    pub fn new(index: impl Into<String>, i: u32) -> Self {
        ShardKey { index: index.into(), i }
    }
}

/// One replica instance of one `(index, shard_id)`, as returned by a single
/// `_cat/shards` row (or synthesized for a pending inbound relocation).
#[derive(Debug, Clone)]
pub struct Shard {
    pub index: String,
    pub i: u32,
    pub replica_num: u32,
    pub kind: ShardKind,
    pub status: ShardStatus,
    /// Bytes; equalized to the max observed across replicas of this shard.
    pub size: u64,
    pub node: Option<String>,
    /// Sum over all replicas of this index.
    pub index_size: u64,
    /// Count of primary rows for this index (used as a weighting signal).
    pub siblings: u32,
    /// True if this row was synthesized to represent a pending relocation
    /// target rather than read directly from `_cat/shards`.
    pub synthetic: bool,
}

impl Shard {
    pub fn key(&self) -> ShardKey {
        ShardKey::new(self.index.clone(), self.i)
    }
}

/// `(index, node)` — the unit of fair-share accounting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub index: String,
    pub node: String,
}

#[derive(Debug, Clone)]
pub struct AllocationCell {
    pub index: String,
    pub node: String,
    pub min_allowed: i64,
    pub max_allowed: i64,
    /// Shard ids currently occupying this cell with an active status.
    pub shard_ids: Vec<u32>,
}

impl AllocationCell {
    pub fn started_count(&self) -> usize {
        self.shard_ids.len()
    }
}

/// `index -> zone -> required active replica count`.
pub type RequiredReplicas = HashMap<String, HashMap<String, u32>>;

/// A reroute the planner has issued but the cluster has not yet confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InflightMove {
    pub index: String,
    pub shard_id: u32,
    pub from_node: String,
    pub to_node: String,
}

/// Node liveness as remembered across ticks, for transition alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Dead,
}

/// Planner-internal proposal produced by the policy classifier (§4.3) and
/// consumed by the destination selector (§4.4).
#[derive(Debug, Clone)]
pub struct AllocationRequest {
    pub shard: ShardKey,
    pub kind: ShardKind,
    /// Candidate zones this shard may be placed into; empty means "any zone".
    pub candidate_zones: HashSet<String>,
    pub concurrency_hint: u32,
    pub reason: &'static str,
    pub mode_priority: f64,
    pub replication_priority: i64,
    pub index_size: u64,
    /// Preferred destination when the rule already picked a specific peer
    /// (rule F's busy-zone swap hint); `None` lets the weighted selector choose.
    pub forced_destination: Option<String>,
    /// `Some(node)` when the rule picked a specific currently-STARTED row to
    /// relocate (a `move`); `None` for an UNASSIGNED shard, whose source (if
    /// any, for bandwidth accounting) the dispatcher derives from a STARTED
    /// primary per §4.4 step 2.
    pub source_node: Option<String>,
}

impl AllocationRequest {
    pub fn sort_key(&self) -> (OrderedF64, i64, u64, u32) {
        (OrderedF64(self.mode_priority), self.replication_priority, self.index_size, self.shard.i)
    }
}

/// `f64` wrapper giving a total order for sorting; `mode_priority` values are
/// always finite (1, 2, 2.1, 3, 4, 5, 7, 8) so `NaN` never occurs in practice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderedF64(pub f64);

impl Eq for OrderedF64 {}

impl PartialOrd for OrderedF64 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedF64 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal)
    }
}

/// The full, immutable per-tick view produced by the snapshot builder.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub zones: HashMap<String, Zone>,
    pub nodes: HashMap<String, Node>,
    /// Keyed by `(index, i)`; each entry holds every replica row for that shard.
    pub shards: HashMap<ShardKey, Vec<Shard>>,
    pub cells: HashMap<CellKey, AllocationCell>,
    pub required: RequiredReplicas,
    pub index_primaries: HashMap<String, u32>,
    pub index_replica_count: HashMap<String, u32>,
    /// Index names as reported by `_cat/indices`, used by rule F to detect
    /// alias series by common prefix.
    pub known_indices: HashSet<String>,
}

impl Snapshot {
    pub fn shard_rows(&self, key: &ShardKey) -> &[Shard] {
        self.shards.get(key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn active_zones(&self, key: &ShardKey) -> HashSet<String> {
        self.shard_rows(key)
            .iter()
            .filter(|s| s.status.is_active())
            .filter_map(|s| s.node.as_ref())
            .filter_map(|n| self.nodes.get(n))
            .filter_map(|n| n.zone.clone())
            .collect()
    }

    pub fn cell(&self, index: &str, node: &str) -> Option<&AllocationCell> {
        self.cells.get(&CellKey { index: index.to_string(), node: node.to_string() })
    }
}
