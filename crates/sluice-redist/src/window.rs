//! Position of a source's items in the global item sequence.

use serde::{Deserialize, Serialize};

/// Where one source's items sit in the concatenation of every source's items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GlobalIndexWindow {
    /// Global index of the first local item.
    pub local_offset: u64,
    /// Number of local items.
    pub local_count: u64,
    /// Number of items across the whole source group.
    pub global_count: u64,
}

impl GlobalIndexWindow {
    /// Window of a source that is alone in its group.
    pub fn single(local_count: u64) -> Self {
        Self {
            local_offset: 0,
            local_count,
            global_count: local_count,
        }
    }

    /// One past the global index of the last local item.
    pub fn local_end(&self) -> u64 {
        self.local_offset + self.local_count
    }
}
