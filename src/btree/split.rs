//! Split planning. Builds the sorted combined node list (existing nodes +
//! the node being inserted) and partitions it into one or more page-sized
//! groups.
//!
//! The balanced two-way search below naturally produces `split_index = 0`
//! (all existing nodes move right, new node alone on the left) as one
//! outcome: when the new node is large enough that no other partition
//! fits, isolating it on its own is simply the balanced choice that
//! happens to minimize the size difference while keeping both sides under
//! capacity. When the new node instead sorts *between* two existing large
//! nodes (so no single cut isolates it), the recursive fallback below
//! keeps bisecting the oversized side until every group fits one page —
//! which in the concrete case of two already-page-filling siblings plus
//! one new node converges to three singleton leaves, still in sorted
//! order.

use crate::alloc::Allocator;
use crate::error::Result;
use crate::node::{self, NodeFlags, NODE_PREFIX_SIZE, SLOT_SIZE};
use crate::page::{self, Header, PageKind};

#[derive(Debug, Clone)]
pub struct NodeData {
    pub key: Vec<u8>,
    pub stored_value: Vec<u8>,
    pub value_size: u32,
    pub flags: NodeFlags,
}

impl NodeData {
    pub fn encoded_size(&self) -> usize {
        SLOT_SIZE + NODE_PREFIX_SIZE + self.key.len() + self.stored_value.len()
    }
}

pub fn collect_nodes(bytes: &[u8]) -> Vec<NodeData> {
    node::iter_nodes(bytes)
        .map(|acc| NodeData {
            key: acc.key().to_vec(),
            stored_value: acc.raw_value().to_vec(),
            value_size: acc.value_size() as u32,
            flags: acc.flags(),
        })
        .collect()
}

/// Usable body budget for a fresh page: everything after the header.
pub fn capacity(page_size: usize) -> usize {
    page_size - page::HEADER_SIZE
}

/// Splits `nodes` (already including the new node, in sorted order) into
/// page-sized groups, each of which fits in `capacity` bytes.
pub fn plan_split(nodes: Vec<NodeData>, capacity: usize) -> Vec<Vec<NodeData>> {
    let n = nodes.len();
    if n <= 1 {
        return vec![nodes];
    }

    let sizes: Vec<usize> = nodes.iter().map(|nd| nd.encoded_size()).collect();
    let total: usize = sizes.iter().sum();

    let mut best: Option<(usize, i64)> = None;
    for j in 1..n {
        let left: usize = sizes[..j].iter().sum();
        let right: usize = total - left;
        if left <= capacity && right <= capacity {
            let score = (left as i64 - right as i64).abs();
            if best.map_or(true, |(_, b)| score < b) {
                best = Some((j, score));
            }
        }
    }

    if let Some((j, _)) = best {
        let mut rest = nodes;
        let right = rest.split_off(j);
        return vec![rest, right];
    }

    // Degenerate case: no two-way cut fits. Isolate the largest node and
    // recurse on what remains either side of it.
    let (max_idx, _) = sizes.iter().enumerate().max_by_key(|&(_, &s)| s).unwrap();
    let mut groups = Vec::new();
    let mut nodes = nodes;
    let after = nodes.split_off(max_idx + 1);
    let isolated = nodes.split_off(max_idx);
    let before = nodes;

    if !before.is_empty() {
        groups.extend(plan_split(before, capacity));
    }
    groups.push(isolated);
    if !after.is_empty() {
        groups.extend(plan_split(after, capacity));
    }
    groups
}

/// Writes one split group into a page (freshly allocated or the COWed
/// original), in slot order.
pub fn write_group(alloc: &Allocator, page_id: u64, kind: PageKind, group: &[NodeData]) -> Result<()> {
    let page_size = alloc.page_size();
    {
        let mut buf = alloc.write_mut(page_id)?;
        page::write_header(
            &mut buf,
            &Header { page_id, kind, lower: page::HEADER_SIZE as u16, upper: page_size as u16, txn_id: alloc.txn_id() },
        );
    }
    for (i, nd) in group.iter().enumerate() {
        let mut buf = alloc.write_mut(page_id)?;
        node::write_node(&mut buf, i, &nd.key, &nd.stored_value, nd.value_size, nd.flags)?;
    }
    Ok(())
}

/// First key of a group, used as the separator installed in the parent
/// branch page for every group after the first.
pub fn group_separator(group: &[NodeData]) -> Vec<u8> {
    group[0].key.clone()
}
