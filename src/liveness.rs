//! Node liveness tracking across ticks (§4.1 step 3, §3 lifecycle).
//!
//! Unlike the heartbeat-driven health checker this module is grounded on,
//! the planner never actively pings nodes: liveness is derived purely from
//! whether a node's name appears in the most recent `_nodes/stats` response.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::types::Liveness;

#[derive(Debug, Default)]
pub struct LivenessTracker {
    status: HashMap<String, Liveness>,
    first_tick: bool,
}

impl LivenessTracker {
    pub fn new() -> Self {
        LivenessTracker { status: HashMap::new(), first_tick: true }
    }

    /// Updates liveness given the node names observed this tick. The first
    /// tick suppresses "new node" alerts since every node is new then.
    pub fn update<'a>(&mut self, observed: impl Iterator<Item = &'a str>) {
        let observed: HashSet<&str> = observed.collect();

        for name in &observed {
            match self.status.get(*name) {
                Some(Liveness::Dead) => {
                    warn!(node = *name, "node came back");
                }
                None if !self.first_tick => {
                    warn!(node = *name, "new node joined the cluster");
                }
                _ => {}
            }
            self.status.insert(name.to_string(), Liveness::Alive);
        }

        let newly_dead: Vec<String> = self
            .status
            .iter()
            .filter(|(name, live)| **live == Liveness::Alive && !observed.contains(name.as_str()))
            .map(|(name, _)| name.clone())
            .collect();
        for name in newly_dead {
            warn!(node = %name, "node is DEAD");
            self.status.insert(name, Liveness::Dead);
        }

        self.first_tick = false;
    }

    pub fn status_of(&self, name: &str) -> Option<Liveness> {
        self.status.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_tick_suppresses_new_node_alert() {
        let mut tracker = LivenessTracker::new();
        tracker.update(["a", "b"].into_iter());
        assert_eq!(tracker.status_of("a"), Some(Liveness::Alive));
        assert_eq!(tracker.status_of("b"), Some(Liveness::Alive));
    }

    #[test]
    fn absent_node_marked_dead_then_recovers() {
        let mut tracker = LivenessTracker::new();
        tracker.update(["a", "b"].into_iter());
        tracker.update(["a"].into_iter());
        assert_eq!(tracker.status_of("b"), Some(Liveness::Dead));
        tracker.update(["a", "b"].into_iter());
        assert_eq!(tracker.status_of("b"), Some(Liveness::Alive));
    }
}
