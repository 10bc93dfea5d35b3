//! Inflight move tracker (§4.2): the process-wide record of moves the
//! planner has issued but the cluster has not yet confirmed, since the
//! cluster API never reports a shard's move destination directly.

use crate::types::{Shard, ShardKey, ShardKind, ShardStatus, Snapshot, InflightMove};

/// Reconciles the persistent inflight list against a freshly built snapshot
/// (§4.1 step 8). For each tracked move:
/// - if the target is STARTED at `to_node`, the move is done: retire it.
/// - if a source replica is still RELOCATING, the destination hasn't
///   reported yet: synthesize a virtual INITIALIZING shard at `to_node` so
///   bandwidth and allocation accounting include the pending arrival.
/// - otherwise nothing matches any more (the shard vanished or the cluster
///   never actually started the move): retire as stale.
pub fn reconcile(inflight: &mut Vec<InflightMove>, snapshot: &mut Snapshot) {
    let mut retained = Vec::with_capacity(inflight.len());
    for mv in inflight.drain(..) {
        let key = ShardKey::new(mv.index.clone(), mv.shard_id);
        let rows = snapshot.shards.get(&key).cloned().unwrap_or_default();

        let confirmed = rows.iter().any(|s| {
            s.status == ShardStatus::Started && s.node.as_deref() == Some(mv.to_node.as_str())
        });
        if confirmed {
            continue;
        }

        let relocating_source = rows.iter().any(|s| {
            s.status == ShardStatus::Relocating && s.node.as_deref() == Some(mv.from_node.as_str())
        });
        if relocating_source {
            let template = rows.first().cloned();
            if let Some(entry) = snapshot.shards.get_mut(&key) {
                entry.push(synthesize_arrival(&mv, template));
            }
            retained.push(mv);
            continue;
        }
        // Neither confirmed nor still relocating: stale, drop it.
    }
    *inflight = retained;
}

fn synthesize_arrival(mv: &InflightMove, template: Option<Shard>) -> Shard {
    let (kind, index_size, siblings, size) = match &template {
        Some(t) => (t.kind, t.index_size, t.siblings, t.size),
        None => (ShardKind::Replica, 0, 0, 0),
    };
    Shard {
        index: mv.index.clone(),
        i: mv.shard_id,
        replica_num: 0,
        kind,
        status: ShardStatus::Initializing,
        size,
        node: Some(mv.to_node.clone()),
        index_size,
        siblings,
        synthetic: true,
    }
}

/// Records a move the dispatcher just had accepted by the cluster.
pub fn record(inflight: &mut Vec<InflightMove>, index: &str, shard_id: u32, from: &str, to: &str) {
    inflight.push(InflightMove {
        index: index.to_string(),
        shard_id,
        from_node: from.to_string(),
        to_node: to.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn shard(index: &str, i: u32, status: ShardStatus, node: Option<&str>) -> Shard {
        Shard {
            index: index.to_string(),
            i,
            replica_num: 0,
            kind: ShardKind::Replica,
            status,
            size: 100,
            node: node.map(|n| n.to_string()),
            index_size: 100,
            siblings: 1,
            synthetic: false,
        }
    }

    fn empty_snapshot() -> Snapshot {
        Snapshot {
            zones: HashMap::new(),
            nodes: HashMap::new(),
            shards: HashMap::new(),
            cells: HashMap::new(),
            required: HashMap::new(),
            index_primaries: HashMap::new(),
            index_replica_count: HashMap::new(),
            known_indices: std::collections::HashSet::new(),
        }
    }

    #[test]
    fn retires_confirmed_move() {
        let mut inflight = vec![InflightMove {
            index: "ix".into(),
            shard_id: 0,
            from_node: "a".into(),
            to_node: "b".into(),
        }];
        let mut snap = empty_snapshot();
        snap.shards.insert(
            ShardKey::new("ix", 0),
            vec![shard("ix", 0, ShardStatus::Started, Some("b"))],
        );
        reconcile(&mut inflight, &mut snap);
        assert!(inflight.is_empty());
    }

    #[test]
    fn synthesizes_virtual_shard_while_relocating() {
        let mut inflight = vec![InflightMove {
            index: "ix".into(),
            shard_id: 0,
            from_node: "a".into(),
            to_node: "b".into(),
        }];
        let mut snap = empty_snapshot();
        snap.shards.insert(
            ShardKey::new("ix", 0),
            vec![shard("ix", 0, ShardStatus::Relocating, Some("a"))],
        );
        reconcile(&mut inflight, &mut snap);
        assert_eq!(inflight.len(), 1);
        let rows = snap.shard_rows(&ShardKey::new("ix", 0));
        assert!(rows.iter().any(|s| s.synthetic && s.node.as_deref() == Some("b")));
    }

    #[test]
    fn retires_stale_move_with_no_match() {
        let mut inflight = vec![InflightMove {
            index: "ix".into(),
            shard_id: 0,
            from_node: "a".into(),
            to_node: "b".into(),
        }];
        let mut snap = empty_snapshot();
        reconcile(&mut inflight, &mut snap);
        assert!(inflight.is_empty());
    }
}
