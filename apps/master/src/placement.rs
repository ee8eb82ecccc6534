use std::cmp::Ordering;
use std::collections::BTreeSet;

use common::{NodeDescriptor, NodeId};

/// Picks up to `count` nodes for a chunk of `chunk_size` bytes.
///
/// Only healthy nodes outside `exclude` with room for the chunk qualify. They are
/// ranked by ascending load factor, ties broken by node id, so the same registry
/// snapshot always yields the same answer. A short result is returned as-is.
pub fn choose_targets(
    nodes: &[NodeDescriptor],
    count: usize,
    exclude: &BTreeSet<NodeId>,
    chunk_size: u64,
) -> Vec<NodeId> {
    if count == 0 {
        return Vec::new();
    }

    let mut eligible: Vec<&NodeDescriptor> = nodes
        .iter()
        .filter(|node| node.is_healthy())
        .filter(|node| !exclude.contains(&node.node_id))
        .filter(|node| node.free_bytes >= chunk_size)
        .collect();

    eligible.sort_by(|a, b| compare_load(a, b).then_with(|| a.node_id.cmp(&b.node_id)));

    let mut selected = Vec::with_capacity(count.min(eligible.len()));
    for node in eligible {
        if selected.len() >= count {
            break;
        }
        // Snapshots built from a map never repeat ids, but a caller-built slice might.
        if !selected.contains(&node.node_id) {
            selected.push(node.node_id.clone());
        }
    }

    selected
}

/// Places every chunk of a file. Works on a private copy of the snapshot and
/// debits each chosen node by the chunk size, so one plan never overcommits a
/// node and later chunks drift towards less loaded nodes.
pub fn plan_upload(
    nodes: &[NodeDescriptor],
    chunk_sizes: &[u64],
    replication_factor: usize,
) -> Vec<Vec<NodeId>> {
    let mut working = nodes.to_vec();
    let exclude = BTreeSet::new();

    chunk_sizes
        .iter()
        .map(|size| {
            let targets = choose_targets(&working, replication_factor, &exclude, *size);
            debit(&mut working, &targets, *size);
            targets
        })
        .collect()
}

pub(crate) fn debit(nodes: &mut [NodeDescriptor], targets: &[NodeId], size: u64) {
    for node in nodes.iter_mut() {
        if targets.contains(&node.node_id) {
            node.free_bytes = node.free_bytes.saturating_sub(size);
        }
    }
}

/// Compares `used / capacity` exactly by cross-multiplying.
fn compare_load(a: &NodeDescriptor, b: &NodeDescriptor) -> Ordering {
    let (used_a, cap_a) = load_ratio(a);
    let (used_b, cap_b) = load_ratio(b);
    (used_a * cap_b).cmp(&(used_b * cap_a))
}

fn load_ratio(node: &NodeDescriptor) -> (u128, u128) {
    if node.capacity_bytes == 0 {
        return (1, 1);
    }
    (node.used_bytes() as u128, node.capacity_bytes as u128)
}
