//! Cluster allocation-awareness toggle (§4.5). The dispatcher normally keeps
//! zone awareness on so the cluster itself refuses cross-zone placements it
//! shouldn't make; "too many copies of the shard" rejections mean the
//! built-in allocator and the planner disagree about a shard's whereabouts,
//! and retrying once with awareness off resolves the deadlock.

use std::time::Duration;

use tracing::info;

use crate::client::ClusterClient;
use crate::config::PlannerConfig;
use crate::error::Result;

const AWARENESS_ATTRIBUTE: &str = "zone";
const RETRY_WAIT: Duration = Duration::from_secs(5);

pub struct AwarenessToggle {
    on: bool,
}

impl AwarenessToggle {
    pub fn new() -> Self {
        AwarenessToggle { on: true }
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    pub async fn ensure_off(&mut self, client: &dyn ClusterClient, config: &PlannerConfig) -> Result<()> {
        if !self.on {
            return Ok(());
        }
        info!("disabling allocation awareness to resolve a stuck reroute");
        client
            .put_cluster_settings(
                serde_json::json!({ "cluster.routing.allocation.awareness.attributes": config.constants.identical_node_attribute }),
                serde_json::json!({}),
            )
            .await?;
        self.on = false;
        Ok(())
    }

    pub async fn ensure_on(&mut self, client: &dyn ClusterClient, _config: &PlannerConfig) -> Result<()> {
        if self.on {
            return Ok(());
        }
        info!("restoring allocation awareness");
        client
            .put_cluster_settings(
                serde_json::json!({ "cluster.routing.allocation.awareness.attributes": AWARENESS_ATTRIBUTE }),
                serde_json::json!({}),
            )
            .await?;
        self.on = true;
        Ok(())
    }

    /// Waits out the interval the cluster needs to settle after an awareness
    /// flip before a retried reroute has a chance of succeeding.
    pub async fn wait_for_settle(&self) {
        tokio::time::sleep(RETRY_WAIT).await;
    }
}

impl Default for AwarenessToggle {
    fn default() -> Self {
        Self::new()
    }
}
