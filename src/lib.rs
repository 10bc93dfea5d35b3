//! External shard-placement controller for a zone-aware Elasticsearch-like
//! search cluster.
//!
//! # Architecture
//!
//! - **client**: the cluster's HTTP API surface (`_nodes/stats`, `_cat/*`,
//!   `_cluster/reroute`, `_cluster/settings`) behind the `ClusterClient` trait.
//! - **snapshot**: builds one tick's `Snapshot` of zones, nodes, shards, and
//!   allocation cells from the cluster API plus operator configuration.
//! - **placement**: the policy classifier (rules A-K) producing prioritized
//!   `AllocationRequest`s from a `Snapshot`.
//! - **rebalance**: the destination selector and dispatcher that turns
//!   requests into reroute commands, plus the weighted sampler it uses.
//! - **awareness**: the allocation-awareness on/off toggle used to break
//!   "too many copies of the shard" deadlocks.
//! - **orchestrator**: ties the above into one tick and runs the tick loop.
//! - **inflight** / **liveness**: cross-tick state the cluster API never
//!   reports back directly.

pub mod awareness;
pub mod client;
pub mod config;
pub mod error;
pub mod inflight;
pub mod liveness;
pub mod metrics;
pub mod orchestrator;
pub mod placement;
pub mod rebalance;
pub mod sizefmt;
pub mod snapshot;
pub mod types;

pub use client::{ClusterClient, HttpClusterClient};
pub use config::PlannerConfig;
pub use error::{PlannerError, Result};
pub use types::Snapshot;
