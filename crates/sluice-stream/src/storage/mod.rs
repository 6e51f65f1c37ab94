//! Frame storage: bounded tiers keyed by frame id and the collection that
//! places frames across them.

pub mod collection;
pub mod file;
pub mod memory;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sluice_redist::Record;

use crate::error::StreamResult;
use crate::frame::{FrameCommand, FrameId};

pub use collection::{StorageCollection, StoragePolicy};
pub use file::FileTier;
pub use memory::MemoryTier;

/// Where a tier keeps its frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    /// Records held in process memory.
    #[serde(rename = "mainmem")]
    MainMemory,
    /// One serialized record per file.
    File,
}

/// Bounded id-to-record map.
pub trait StorageTier<R: Record>: Send {
    /// Storage medium.
    fn kind(&self) -> TierKind;

    /// Maximum number of frames.
    fn capacity(&self) -> usize;

    /// Number of frames held.
    fn len(&self) -> usize;

    /// True when no frame is held.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when no further frame fits.
    fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// Stores a frame. Fails when the tier is full or already holds `id`.
    fn insert(&mut self, id: FrameId, record: &R) -> StreamResult<()>;

    /// Drops a frame, returning whether it was held.
    fn erase(&mut self, id: FrameId) -> bool;

    /// True when `id` is held.
    fn contains(&self, id: FrameId) -> bool;

    /// Copy of a held frame.
    fn get(&self, id: FrameId) -> StreamResult<R>;

    /// Held ids in ascending order.
    fn ids(&self) -> Vec<FrameId>;

    /// Drops every frame the command covers and returns their ids.
    fn apply_command(&mut self, command: FrameCommand) -> Vec<FrameId> {
        let doomed: Vec<FrameId> = self.ids().into_iter().filter(|&id| command.removes(id)).collect();
        for &id in &doomed {
            self.erase(id);
        }
        doomed
    }

    /// `(id, path)` pairs of a file-backed tier.
    fn file_entries(&self) -> Option<Vec<(FrameId, PathBuf)>> {
        None
    }
}
