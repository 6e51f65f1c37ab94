//! In-memory tier.

use std::collections::BTreeMap;

use sluice_redist::Record;

use super::{StorageTier, TierKind};
use crate::error::{StreamError, StreamResult};
use crate::frame::FrameId;

/// Tier holding records in a sorted map.
#[derive(Debug)]
pub struct MemoryTier<R> {
    capacity: usize,
    frames: BTreeMap<FrameId, R>,
}

impl<R> MemoryTier<R> {
    /// Creates a tier holding at most `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            frames: BTreeMap::new(),
        }
    }
}

impl<R: Record> StorageTier<R> for MemoryTier<R> {
    fn kind(&self) -> TierKind {
        TierKind::MainMemory
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn len(&self) -> usize {
        self.frames.len()
    }

    fn insert(&mut self, id: FrameId, record: &R) -> StreamResult<()> {
        if self.frames.contains_key(&id) {
            return Err(StreamError::DuplicateFrame(id));
        }
        if self.is_full() {
            return Err(StreamError::Capacity {
                id,
                tiers: 1,
                frames: self.frames.len(),
            });
        }
        self.frames.insert(id, record.clone());
        Ok(())
    }

    fn erase(&mut self, id: FrameId) -> bool {
        self.frames.remove(&id).is_some()
    }

    fn contains(&self, id: FrameId) -> bool {
        self.frames.contains_key(&id)
    }

    fn get(&self, id: FrameId) -> StreamResult<R> {
        self.frames.get(&id).cloned().ok_or(StreamError::FrameNotFound(id))
    }

    fn ids(&self) -> Vec<FrameId> {
        self.frames.keys().copied().collect()
    }
}
