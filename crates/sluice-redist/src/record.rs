//! What the redistribution engine needs from a record.

use serde::{Deserialize, Serialize};

use crate::block::BlockDomain;
use crate::error::RedistResult;

/// A run of consecutive local items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSpan {
    /// Local index of the first item.
    pub offset: u64,
    /// Number of items.
    pub count: u64,
}

impl ItemSpan {
    /// Creates a span.
    pub fn new(offset: u64, count: u64) -> Self {
        Self { offset, count }
    }

    /// One past the last item.
    pub fn end(&self) -> u64 {
        self.offset + self.count
    }
}

/// Ordered set of local items destined to one destination.
pub type Selection = Vec<ItemSpan>;

/// Appends `index` to `selection`, extending the last span when contiguous.
pub fn push_item(selection: &mut Selection, index: u64) {
    match selection.last_mut() {
        Some(last) if last.end() == index => last.count += 1,
        _ => selection.push(ItemSpan::new(index, 1)),
    }
}

/// Number of items covered by a selection.
pub fn selection_len(selection: &[ItemSpan]) -> u64 {
    selection.iter().map(|s| s.count).sum()
}

/// Data unit flowing through redistribution channels.
///
/// `Default` must produce the empty record that destinations merge into.
pub trait Record: Default + Clone + Send + Sync + 'static {
    /// True when every item-carrying field agrees on the item count.
    fn is_countable(&self) -> bool;

    /// Number of items held locally.
    fn item_count(&self) -> u64;

    /// Extracts one owned sub-record per selection.
    fn split_by_ranges(&self, selections: &[Selection]) -> Vec<Self>;

    /// Absorbs another record's contents.
    fn merge_from(&mut self, other: Self) -> RedistResult<()>;

    /// True when the record only carries system fields, such as the quit marker.
    fn is_system_tagged(&self) -> bool;

    /// The termination record.
    fn quit() -> Self;

    /// True when the record carries the termination marker.
    fn is_quit(&self) -> bool;

    /// Encodes the record.
    fn serialize_to_bytes(&self) -> RedistResult<Vec<u8>>;

    /// Decodes a record.
    fn deserialize_from_bytes(bytes: &[u8]) -> RedistResult<Self>;

    /// Per-item positions, used by spatial strategies.
    fn positions(&self) -> Option<Vec<[f32; 3]>> {
        None
    }

    /// Domain descriptor, used by the block strategy.
    fn domain(&self) -> Option<BlockDomain> {
        None
    }

    /// Rewrites the domain descriptor of a chunk.
    fn set_domain(&mut self, _domain: BlockDomain) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_item_coalesces() {
        let mut sel = Selection::new();
        for i in [0, 1, 2, 5, 6, 9] {
            push_item(&mut sel, i);
        }
        assert_eq!(
            sel,
            vec![ItemSpan::new(0, 3), ItemSpan::new(5, 2), ItemSpan::new(9, 1)]
        );
        assert_eq!(selection_len(&sel), 6);
    }
}
