//! Cluster HTTP API client (§6a): a `ClusterClient` trait the rest of the
//! planner depends on, plus a `reqwest`-backed production implementation.
//! Grounded on the importer's `ElasticsearchSource` — a thin `reqwest::Client`
//! wrapper with a base `Url` and `.json().await?` response decoding.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{PlannerError, Result};

#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn node_stats(&self) -> Result<NodeStatsResponse>;
    async fn cat_indices(&self) -> Result<String>;
    async fn cat_shards(&self) -> Result<String>;
    async fn put_index_settings(&self, index: &str, number_of_replicas: u32) -> Result<()>;
    async fn reroute(&self, commands: Vec<RerouteCommand>) -> Result<RerouteResponse>;
    async fn put_cluster_settings(
        &self,
        persistent: serde_json::Value,
        transient: serde_json::Value,
    ) -> Result<()>;
}

pub struct HttpClusterClient {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpClusterClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(HttpClusterClient { client, base_url })
    }

    fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }
}

#[async_trait]
impl ClusterClient for HttpClusterClient {
    async fn node_stats(&self) -> Result<NodeStatsResponse> {
        let response = self.client.get(self.url("_nodes/stats")?).send().await?;
        let response = response.error_for_status()?;
        Ok(response.json().await?)
    }

    async fn cat_indices(&self) -> Result<String> {
        let response = self.client.get(self.url("_cat/indices")?).send().await?;
        let response = response.error_for_status()?;
        Ok(response.text().await?)
    }

    async fn cat_shards(&self) -> Result<String> {
        let response = self.client.get(self.url("_cat/shards")?).send().await?;
        let response = response.error_for_status()?;
        Ok(response.text().await?)
    }

    async fn put_index_settings(&self, index: &str, number_of_replicas: u32) -> Result<()> {
        let url = self.url(&format!("{index}/_settings"))?;
        let body = serde_json::json!({ "index": { "number_of_replicas": number_of_replicas } });
        let response = self.client.put(url).json(&body).send().await?;
        let _ = response.error_for_status()?;
        Ok(())
    }

    async fn reroute(&self, commands: Vec<RerouteCommand>) -> Result<RerouteResponse> {
        let url = self.url("_cluster/reroute")?;
        let body = RerouteRequest { commands };
        let response = self.client.post(url).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if status.is_success() {
            if let Ok(parsed) = serde_json::from_str::<RerouteResponse>(&text) {
                if parsed.acknowledged {
                    return Ok(parsed);
                }
            }
        }
        let reason = extract_error_reason(&text)
            .unwrap_or_else(|| format!("reroute failed with status {status}: {text}"));
        Err(PlannerError::RerouteRejected(reason))
    }

    async fn put_cluster_settings(
        &self,
        persistent: serde_json::Value,
        transient: serde_json::Value,
    ) -> Result<()> {
        let url = self.url("_cluster/settings")?;
        let body = serde_json::json!({ "persistent": persistent, "transient": transient });
        let response = self.client.put(url).json(&body).send().await?;
        let _ = response.error_for_status()?;
        Ok(())
    }
}

/// Extracts a rejection reason from either the modern JSON error shape
/// (`{"error":{"root_cause":{"reason":"..."}}}`) or the legacy
/// `"[NO(reason)]"` string form.
pub fn extract_error_reason(body: &str) -> Option<String> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(reason) = value
            .get("error")
            .and_then(|e| e.get("root_cause"))
            .and_then(|rc| rc.get("reason").or_else(|| rc.as_array().and_then(|a| a.first()).and_then(|f| f.get("reason"))))
            .and_then(|r| r.as_str())
        {
            return Some(reason.to_string());
        }
        if let Some(reason) = value.get("error").and_then(|e| e.as_str()) {
            return Some(reason.to_string());
        }
    }
    if let Some(start) = body.find("[NO(") {
        let rest = &body[start + 4..];
        if let Some(end) = rest.find(')') {
            return Some(rest[..end].to_string());
        }
    }
    None
}

#[derive(Debug, Deserialize)]
pub struct NodeStatsResponse {
    pub nodes: HashMap<String, RawNodeStat>,
}

#[derive(Debug, Deserialize)]
pub struct RawNodeStat {
    pub name: String,
    pub host: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    pub jvm: Option<RawJvmStat>,
    pub fs: Option<RawFsStat>,
}

#[derive(Debug, Deserialize)]
pub struct RawJvmStat {
    pub mem: RawJvmMem,
}

#[derive(Debug, Deserialize)]
pub struct RawJvmMem {
    pub heap_max_in_bytes: u64,
}

#[derive(Debug, Deserialize)]
pub struct RawFsStat {
    pub total: RawFsTotal,
}

#[derive(Debug, Deserialize)]
pub struct RawFsTotal {
    pub total_in_bytes: u64,
    pub available_in_bytes: u64,
}

#[derive(Debug, Serialize)]
struct RerouteRequest {
    commands: Vec<RerouteCommand>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RerouteCommand {
    Move { index: String, shard: u32, from_node: String, to_node: String },
    AllocateReplica { index: String, shard: u32, node: String },
    AllocateStalePrimary { index: String, shard: u32, node: String, accept_data_loss: bool },
    AllocateEmptyPrimary { index: String, shard: u32, node: String, accept_data_loss: bool },
    /// Preserved for interface completeness; no rule ever constructs one (§9).
    Cancel { index: String, shard: u32, node: String },
}

#[derive(Debug, Deserialize)]
pub struct RerouteResponse {
    #[serde(default)]
    pub acknowledged: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_modern_json_error_reason() {
        let body = r#"{"error":{"root_cause":{"type":"x","reason":"too many copies of the shard"}}}"#;
        assert_eq!(extract_error_reason(body).as_deref(), Some("too many copies of the shard"));
    }

    #[test]
    fn extracts_legacy_bracket_reason() {
        let body = "rejected: [NO(disk watermark exceeded)]";
        assert_eq!(extract_error_reason(body).as_deref(), Some("disk watermark exceeded"));
    }

    #[test]
    fn returns_none_for_unrecognized_body() {
        assert_eq!(extract_error_reason("not json at all"), None);
    }
}
