//! Operator configuration (§6b), loaded from a TOML file.
//!
//! Every optional field carries a `default_*` function mirroring the
//! constants `original_source` hardcodes, so a minimal file naming only
//! `elasticsearch.host` and `zones` is valid.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{PlannerError, Result};
use crate::sizefmt::text_to_bytes;

#[derive(Debug, Clone, Deserialize)]
pub struct PlannerConfig {
    #[serde(default)]
    pub elasticsearch: ElasticsearchConfig,

    #[serde(default)]
    pub zones: Vec<ZoneConfig>,

    #[serde(default)]
    pub nodes: Vec<NodeOverride>,

    #[serde(default)]
    pub allocate: Vec<AllocateOverride>,

    /// Glob or exact index names, most important first; unmatched indices
    /// sort last.
    #[serde(default)]
    pub replication_priority: Vec<String>,

    /// Keyed by an arbitrary label, run best-effort on shutdown.
    #[serde(default)]
    pub finally: HashMap<String, Vec<FinallyCommand>>,

    #[serde(default)]
    pub constants: Constants,

    #[serde(default)]
    pub debug: DebugConfig,

    /// Passed through to the (out-of-scope) SSH-based disk scrubber; the
    /// planner itself never dials out over SSH.
    #[serde(default)]
    pub connect: HashMap<String, String>,
}

impl PlannerConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: PlannerConfig = toml::from_str(&text)?;
        Ok(config)
    }

    pub fn zone_config(&self, name: &str) -> Option<&ZoneConfig> {
        self.zones.iter().find(|z| z.name == name)
    }

    /// First matching glob in `allocate` for this index, if any.
    pub fn allocate_override(&self, index: &str) -> Option<&AllocateOverride> {
        self.allocate.iter().find(|a| glob_match(&a.name, index))
    }

    /// The target replica count for `index` in `zone`: the first `allocate`
    /// entry whose glob matches `index` and whose zone is `zone`, falling
    /// back to the zone's own default `shards`.
    pub fn zone_shards_for(&self, index: &str, zone: &str, zone_default: u32) -> u32 {
        self.allocate
            .iter()
            .find(|a| a.zone == zone && glob_match(&a.name, index))
            .map(|a| a.shards)
            .unwrap_or(zone_default)
    }

    /// Position of the first glob in `replication_priority` matching `index`,
    /// or `i64::MAX` if none match (sorts last).
    pub fn replication_priority_of(&self, index: &str) -> i64 {
        self.replication_priority
            .iter()
            .position(|glob| glob_match(glob, index))
            .map(|pos| pos as i64)
            .unwrap_or(i64::MAX)
    }

    pub fn big_shard_size_bytes(&self) -> Result<u64> {
        text_to_bytes(&self.constants.big_shard_size)
            .ok_or_else(|| PlannerError::Invariant(format!(
                "invalid constants.big_shard_size: {}",
                self.constants.big_shard_size
            )))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ElasticsearchConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl ElasticsearchConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        ElasticsearchConfig { host: default_host(), port: default_port() }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    9200
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneConfig {
    pub name: String,
    #[serde(default = "default_zone_shards")]
    pub shards: u32,
    #[serde(default)]
    pub risky: bool,
    #[serde(default)]
    pub busy: bool,
}

fn default_zone_shards() -> u32 {
    1
}

/// Per-node attribute overrides applied after the `_nodes/stats` fetch
/// (§4.1 step 2). Any field left `None` keeps the observed value.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeOverride {
    pub name: String,
    pub zone: Option<String>,
    /// Size string, e.g. `"64gb"`.
    pub memory: Option<String>,
    pub disk: Option<String>,
    pub disk_free: Option<String>,
}

/// Per-index (glob) override of the default zone replica target.
#[derive(Debug, Clone, Deserialize)]
pub struct AllocateOverride {
    /// Exact index name or glob.
    pub name: String,
    pub zone: String,
    pub shards: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FinallyCommand {
    #[serde(default = "default_finally_method")]
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub body: serde_json::Value,
}

fn default_finally_method() -> String {
    "PUT".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Constants {
    #[serde(default = "default_concurrent")]
    pub concurrent: u32,
    #[serde(default = "default_big_shard_size")]
    pub big_shard_size: String,
    #[serde(default = "default_max_move_failures")]
    pub max_move_failures: u32,
    #[serde(default = "default_identical_node_attribute")]
    pub identical_node_attribute: String,
    #[serde(default)]
    pub accept_data_loss: bool,
    #[serde(default = "default_alias_prefix_len")]
    pub alias_prefix_len: usize,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
}

impl Default for Constants {
    fn default() -> Self {
        Constants {
            concurrent: default_concurrent(),
            big_shard_size: default_big_shard_size(),
            max_move_failures: default_max_move_failures(),
            identical_node_attribute: default_identical_node_attribute(),
            accept_data_loss: false,
            alias_prefix_len: default_alias_prefix_len(),
            tick_interval_secs: default_tick_interval_secs(),
        }
    }
}

fn default_concurrent() -> u32 {
    1
}

fn default_big_shard_size() -> String {
    "2gb".to_string()
}

fn default_max_move_failures() -> u32 {
    3
}

fn default_identical_node_attribute() -> String {
    "xpack.installed".to_string()
}

fn default_alias_prefix_len() -> usize {
    15
}

fn default_tick_interval_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DebugConfig {
    /// Build commands and log them but never POST to the cluster.
    #[serde(default)]
    pub dry_run: bool,
    /// Log every allocation request the classifier produces, not just the
    /// ones that end up dispatched.
    #[serde(default)]
    pub log_all_requests: bool,
}

/// Minimal glob matcher supporting a single trailing `*` (the only wildcard
/// form `original_source`'s configs use), falling back to exact match.
fn glob_match(pattern: &str, candidate: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => candidate.starts_with(prefix),
        None => pattern == candidate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_match_prefix() {
        assert!(glob_match("logs-*", "logs-2024-01"));
        assert!(!glob_match("logs-*", "metrics-2024-01"));
    }

    #[test]
    fn glob_match_exact() {
        assert!(glob_match("logs-2024-01", "logs-2024-01"));
        assert!(!glob_match("logs-2024-01", "logs-2024-02"));
    }

    #[test]
    fn replication_priority_unmatched_sorts_last() {
        let config = PlannerConfig {
            elasticsearch: ElasticsearchConfig::default(),
            zones: vec![],
            nodes: vec![],
            allocate: vec![],
            replication_priority: vec!["critical-*".to_string(), "logs-*".to_string()],
            finally: HashMap::new(),
            constants: Constants::default(),
            debug: DebugConfig::default(),
            connect: HashMap::new(),
        };
        assert_eq!(config.replication_priority_of("critical-orders"), 0);
        assert_eq!(config.replication_priority_of("logs-app"), 1);
        assert_eq!(config.replication_priority_of("unrelated"), i64::MAX);
    }

    #[test]
    fn minimal_config_parses() {
        let toml_text = r#"
            [elasticsearch]
            host = "es.internal"

            [[zones]]
            name = "primary"
        "#;
        let config: PlannerConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(config.elasticsearch.host, "es.internal");
        assert_eq!(config.elasticsearch.port, 9200);
        assert_eq!(config.zones[0].shards, 1);
        assert_eq!(config.constants.concurrent, 1);
        assert_eq!(config.big_shard_size_bytes().unwrap(), 2_000_000_000);
    }
}
