use std::collections::BTreeMap;

use crate::graph::{GraphError, NodeId};

/// Nodes waiting to be spliced, keyed by `(offset, sequence)`.
///
/// The sequence number keeps nodes sharing an offset in the order they were
/// pushed, so a Send always lands before the Recv of the same pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpliceSet {
    entries: BTreeMap<(usize, u64), NodeId>,
    next_seq: u64,
}

impl SpliceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `node` to be inserted before the node currently at `offset`.
    pub fn push(&mut self, offset: usize, node: NodeId) {
        self.entries.insert((offset, self.next_seq), node);
        self.next_seq += 1;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending offset order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (usize, NodeId)> + '_ {
        self.entries
            .iter()
            .map(|(&(offset, _), &node)| (offset, node))
    }
}

/// Builds a new order with every entry of `splices` inserted into `order`.
///
/// Insertion walks the offsets from highest to lowest so earlier inserts never
/// shift positions that are still pending.
pub fn splice_order(order: &[NodeId], splices: &SpliceSet) -> Result<Vec<NodeId>, GraphError> {
    let len = order.len();
    if let Some((offset, _)) = splices.iter().next_back() {
        if offset > len {
            return Err(GraphError::OffsetOutOfRange { offset, len });
        }
    }
    let mut spliced = Vec::with_capacity(len + splices.len());
    spliced.extend_from_slice(order);
    for (offset, node) in splices.iter().rev() {
        spliced.insert(offset, node);
    }
    Ok(spliced)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u32]) -> Vec<NodeId> {
        raw.iter().copied().map(NodeId).collect()
    }

    #[test]
    fn inserts_before_the_original_occupant() {
        let order = ids(&[0, 1, 2, 3]);
        let mut splices = SpliceSet::new();
        splices.push(3, NodeId(12));
        splices.push(1, NodeId(10));
        splices.push(4, NodeId(13));
        splices.push(2, NodeId(11));

        let spliced = splice_order(&order, &splices).expect("splice");
        assert_eq!(spliced, ids(&[0, 10, 1, 11, 2, 12, 3, 13]));
    }

    #[test]
    fn equal_offsets_keep_push_order() {
        let order = ids(&[0, 1]);
        let mut splices = SpliceSet::new();
        splices.push(1, NodeId(10));
        splices.push(1, NodeId(11));
        splices.push(0, NodeId(9));
        splices.push(1, NodeId(12));

        let spliced = splice_order(&order, &splices).expect("splice");
        assert_eq!(spliced, ids(&[9, 0, 10, 11, 12, 1]));
    }

    #[test]
    fn offset_past_the_end_is_rejected() {
        let mut splices = SpliceSet::new();
        splices.push(3, NodeId(10));
        let err = splice_order(&ids(&[0, 1]), &splices).unwrap_err();
        assert_eq!(err, GraphError::OffsetOutOfRange { offset: 3, len: 2 });
    }

    #[test]
    fn empty_set_is_identity() {
        let order = ids(&[4, 2, 7]);
        assert_eq!(splice_order(&order, &SpliceSet::new()).unwrap(), order);
    }
}
