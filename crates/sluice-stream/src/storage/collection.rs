//! Ordered tiers plus a placement policy.
//!
//! `placement` maps every stored frame to the tier holding it and
//! `recency` lists the same ids newest first. Both are updated together
//! with the tiers inside each `&mut self` call, so no caller ever sees a
//! frame that one of them has and the other lacks.

use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sluice_redist::Record;
use tracing::{debug, error, warn};

use super::{FileTier, MemoryTier, StorageTier, TierKind};
use crate::config::StreamConfig;
use crate::error::{StreamError, StreamResult};
use crate::frame::{FrameCommand, FrameId};

/// How a collection picks a tier for a new frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoragePolicy {
    /// First tier with room; fail when all are full.
    #[default]
    Greedy,
    /// First tier with room; when all are full, evict the oldest frame.
    Lru,
}

impl std::str::FromStr for StoragePolicy {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "greedy" => Ok(StoragePolicy::Greedy),
            "lru" => Ok(StoragePolicy::Lru),
            other => Err(StreamError::Configuration(format!("unknown storage policy '{}'", other))),
        }
    }
}

/// Counters kept by a collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    /// Frames stored.
    pub insertions: u64,
    /// Frames evicted to make room.
    pub evictions: u64,
    /// Inserts refused.
    pub rejections: u64,
}

/// Frames spread over an ordered list of tiers.
pub struct StorageCollection<R: Record> {
    tiers: Vec<Box<dyn StorageTier<R>>>,
    policy: StoragePolicy,
    placement: HashMap<FrameId, usize>,
    recency: VecDeque<FrameId>,
    folder: PathBuf,
    stats: StorageStats,
}

impl<R: Record> StorageCollection<R> {
    /// Creates an empty collection. `folder` is where [`save`](Self::save)
    /// writes its manifest.
    pub fn new(policy: StoragePolicy, folder: impl Into<PathBuf>) -> Self {
        Self {
            tiers: Vec::new(),
            policy,
            placement: HashMap::new(),
            recency: VecDeque::new(),
            folder: folder.into(),
            stats: StorageStats::default(),
        }
    }

    /// Builds the tiers listed in `config` for `rank`.
    pub fn from_config(config: &StreamConfig, rank: u32) -> StreamResult<Self> {
        let folder = config.resolved_storage_folder();
        let mut collection = Self::new(config.storage_policy, folder.clone());
        for tier in &config.storages {
            match tier.kind {
                TierKind::MainMemory => collection.add_tier(Box::new(MemoryTier::new(tier.capacity))),
                TierKind::File => collection.add_tier(Box::new(FileTier::new(tier.capacity, rank, folder.clone()))),
            }
        }
        if collection.tier_count() == 0 {
            return Err(StreamError::Configuration(
                "stream flow control needs at least one storage tier".to_string(),
            ));
        }
        debug!(
            rank = rank,
            policy = ?collection.policy,
            tiers = collection.tier_count(),
            "storage collection created"
        );
        Ok(collection)
    }

    /// Appends a tier; tiers are tried in the order added.
    pub fn add_tier(&mut self, tier: Box<dyn StorageTier<R>>) {
        self.tiers.push(tier);
    }

    /// Placement policy.
    pub fn policy(&self) -> StoragePolicy {
        self.policy
    }

    /// Number of tiers.
    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }

    /// Frames held by tier `index`, 0 for an unknown index.
    pub fn buffer_size(&self, index: usize) -> usize {
        self.tiers.get(index).map_or(0, |t| t.len())
    }

    /// Frames held across all tiers.
    pub fn len(&self) -> usize {
        self.placement.len()
    }

    /// True when no frame is held.
    pub fn is_empty(&self) -> bool {
        self.placement.is_empty()
    }

    /// True when an insert would fail. Never true under LRU placement,
    /// which evicts instead.
    pub fn is_full(&self) -> bool {
        match self.policy {
            StoragePolicy::Greedy => self.tiers.iter().all(|t| t.is_full()),
            StoragePolicy::Lru => false,
        }
    }

    /// Stored ids in ascending order.
    pub fn ids(&self) -> Vec<FrameId> {
        let mut ids: Vec<FrameId> = self.placement.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Stored ids, newest insertion first.
    pub fn recency(&self) -> impl Iterator<Item = FrameId> + '_ {
        self.recency.iter().copied()
    }

    /// Counters since creation.
    pub fn stats(&self) -> StorageStats {
        self.stats
    }

    /// Stores a frame, returning false (and logging) when it cannot.
    pub fn insert(&mut self, id: FrameId, record: &R) -> bool {
        match self.try_insert(id, record) {
            Ok(()) => true,
            Err(e) => {
                warn!(frame_id = id, error = %e, "frame not stored");
                false
            }
        }
    }

    /// Stores a frame.
    pub fn try_insert(&mut self, id: FrameId, record: &R) -> StreamResult<()> {
        if self.placement.contains_key(&id) {
            self.stats.rejections += 1;
            return Err(StreamError::DuplicateFrame(id));
        }
        let (tier, victim) = match self.tiers.iter().position(|t| !t.is_full()) {
            Some(tier) => (tier, None),
            None => match (self.policy, self.recency.back().copied()) {
                (StoragePolicy::Lru, Some(oldest)) => {
                    let (tier, data) = self.evict(oldest)?;
                    (tier, Some((oldest, data)))
                }
                _ => {
                    self.stats.rejections += 1;
                    return Err(StreamError::Capacity {
                        id,
                        tiers: self.tiers.len(),
                        frames: self.placement.len(),
                    });
                }
            },
        };
        if let Err(e) = self.tiers[tier].insert(id, record) {
            self.stats.rejections += 1;
            if let Some((oldest, data)) = victim {
                self.reinstate(tier, oldest, &data);
            }
            return Err(e);
        }
        if let Some((oldest, _)) = victim {
            self.stats.evictions += 1;
            debug!(frame_id = oldest, tier = tier, "evicted oldest frame");
        }
        self.placement.insert(id, tier);
        self.recency.push_front(id);
        self.stats.insertions += 1;
        debug!(frame_id = id, tier = tier, stored = self.placement.len(), "frame stored");
        Ok(())
    }

    /// Removes `id` and returns its tier and a copy of its data, so the
    /// eviction can be undone if the replacement cannot be stored.
    fn evict(&mut self, id: FrameId) -> StreamResult<(usize, R)> {
        let tier = *self.placement.get(&id).ok_or(StreamError::FrameNotFound(id))?;
        let data = self.tiers[tier].get(id)?;
        self.forget(id);
        self.tiers[tier].erase(id);
        Ok((tier, data))
    }

    /// Puts an evicted frame back as the oldest one.
    fn reinstate(&mut self, tier: usize, id: FrameId, data: &R) {
        match self.tiers[tier].insert(id, data) {
            Ok(()) => {
                self.placement.insert(id, tier);
                self.recency.push_back(id);
                debug!(frame_id = id, tier = tier, "eviction rolled back");
            }
            Err(e) => error!(frame_id = id, tier = tier, error = %e, "evicted frame could not be restored"),
        }
    }

    fn forget(&mut self, id: FrameId) -> Option<usize> {
        let tier = self.placement.remove(&id)?;
        if let Some(pos) = self.recency.iter().position(|&r| r == id) {
            self.recency.remove(pos);
        }
        Some(tier)
    }

    /// Drops a frame, returning whether it was held.
    pub fn erase(&mut self, id: FrameId) -> bool {
        match self.forget(id) {
            Some(tier) => self.tiers[tier].erase(id),
            None => false,
        }
    }

    /// True when `id` is held.
    pub fn has_data(&self, id: FrameId) -> bool {
        self.placement.contains_key(&id)
    }

    /// Copy of a held frame.
    pub fn get_data(&self, id: FrameId) -> StreamResult<R> {
        let tier = self.placement.get(&id).ok_or(StreamError::FrameNotFound(id))?;
        self.tiers[*tier].get(id)
    }

    /// Drops every frame covered by `command`. Applying the same command
    /// twice is the same as applying it once.
    pub fn apply_command(&mut self, command: FrameCommand) -> usize {
        let mut removed = 0;
        for tier in self.tiers.iter_mut() {
            for id in tier.apply_command(command) {
                self.placement.remove(&id);
                removed += 1;
            }
        }
        let placement = &self.placement;
        self.recency.retain(|id| placement.contains_key(id));
        if removed > 0 {
            debug!(command = ?command, removed = removed, remaining = self.placement.len(), "frames released");
        }
        removed
    }

    /// Path of the manifest written by [`save`](Self::save).
    pub fn manifest_path(&self, rank: u32) -> PathBuf {
        self.folder.join(format!("filelist_{}.txt", rank))
    }

    /// Writes every held frame to files and lists them in
    /// `filelist_<rank>.txt`. Frames already in a file tier are listed in
    /// place; the others are copied into `save_<rank>_<id>` files. Refuses
    /// to overwrite an existing manifest.
    pub fn save(&self, rank: u32) -> StreamResult<PathBuf> {
        let manifest = self.manifest_path(rank);
        if manifest.exists() {
            return Err(StreamError::Storage(format!(
                "{} already exists, refusing to overwrite",
                manifest.display()
            )));
        }

        let mut entries: Vec<(FrameId, PathBuf)> = Vec::with_capacity(self.placement.len());
        let mut copies: FileTier<R> = FileTier::new(usize::MAX, rank, self.folder.clone());
        for tier in &self.tiers {
            match tier.file_entries() {
                Some(files) => entries.extend(files),
                None => {
                    for id in tier.ids() {
                        copies.insert(id, &tier.get(id)?)?;
                    }
                }
            }
        }
        if let Some(files) = StorageTier::<R>::file_entries(&copies) {
            entries.extend(files);
        }
        entries.sort_by_key(|(id, _)| *id);

        let mut text = String::new();
        for (id, path) in &entries {
            let _ = writeln!(text, "{} {}", id, path.display());
        }
        fs::write(&manifest, text)?;
        debug!(rank = rank, frames = entries.len(), manifest = %manifest.display(), "storage saved");
        Ok(manifest)
    }

    /// Folder used for manifests and copied frames.
    pub fn folder(&self) -> &Path {
        &self.folder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_redist::{Field, FieldRecord};

    fn record(v: i64) -> FieldRecord {
        FieldRecord::new().with("v", Field::per_item_i64(1, vec![v]))
    }

    fn collection(policy: StoragePolicy, capacities: &[usize]) -> StorageCollection<FieldRecord> {
        let mut c = StorageCollection::new(policy, std::env::temp_dir());
        for &cap in capacities {
            c.add_tier(Box::new(MemoryTier::new(cap)));
        }
        c
    }

    #[test]
    fn test_greedy_fills_in_order() {
        let mut c = collection(StoragePolicy::Greedy, &[1, 2]);
        assert!(c.insert(1, &record(1)));
        assert!(c.insert(2, &record(2)));
        assert_eq!(c.buffer_size(0), 1);
        assert_eq!(c.buffer_size(1), 1);
        assert!(c.insert(3, &record(3)));
        assert!(c.is_full());
        assert!(!c.insert(4, &record(4)));
        assert!(matches!(
            c.try_insert(4, &record(4)),
            Err(StreamError::Capacity { id: 4, tiers: 2, frames: 3 })
        ));
        assert_eq!(c.stats().rejections, 2);
        assert_eq!(c.buffer_size(9), 0);
    }

    #[test]
    fn test_lru_keeps_victim_when_replacement_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut c: StorageCollection<FieldRecord> = StorageCollection::new(StoragePolicy::Lru, dir.path());
        let tier: FileTier<FieldRecord> = FileTier::new(1, 0, dir.path());
        let stale = tier.path_for(2);
        c.add_tier(Box::new(tier));
        assert!(c.insert(1, &record(1)));
        fs::write(&stale, b"left over").unwrap();

        assert!(matches!(c.try_insert(2, &record(2)), Err(StreamError::Storage(_))));
        assert_eq!(c.ids(), vec![1]);
        assert_eq!(c.get_data(1).unwrap(), record(1));
        assert_eq!(c.recency().collect::<Vec<_>>(), vec![1]);
        assert_eq!(c.stats().evictions, 0);

        fs::remove_file(&stale).unwrap();
        c.try_insert(2, &record(2)).unwrap();
        assert_eq!(c.ids(), vec![2]);
        assert_eq!(c.stats().evictions, 1);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut c = collection(StoragePolicy::Greedy, &[4]);
        c.try_insert(1, &record(1)).unwrap();
        assert!(matches!(c.try_insert(1, &record(1)), Err(StreamError::DuplicateFrame(1))));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_lru_evicts_oldest_across_tiers() {
        let mut c = collection(StoragePolicy::Lru, &[1, 1]);
        assert!(c.insert(1, &record(1)));
        assert!(c.insert(2, &record(2)));
        assert!(!c.is_full());
        assert!(c.insert(3, &record(3)));
        assert!(!c.has_data(1));
        assert!(c.has_data(2));
        assert!(c.insert(4, &record(4)));
        assert!(!c.has_data(2));
        assert_eq!(c.recency().collect::<Vec<_>>(), vec![4, 3]);
        assert_eq!(c.stats().evictions, 2);
    }

    #[test]
    fn test_erase_keeps_index_consistent() {
        let mut c = collection(StoragePolicy::Lru, &[3]);
        for id in 1..=3 {
            c.insert(id, &record(id as i64));
        }
        assert!(c.erase(2));
        assert!(!c.erase(2));
        assert_eq!(c.recency().collect::<Vec<_>>(), vec![3, 1]);
        assert_eq!(c.ids(), vec![1, 3]);
    }

    #[test]
    fn test_remove_up_to_is_idempotent() {
        let mut c = collection(StoragePolicy::Greedy, &[2, 4]);
        for id in 0..6 {
            c.insert(id, &record(id as i64));
        }
        assert_eq!(c.apply_command(FrameCommand::RemoveUpTo(3)), 4);
        let after_once = c.ids();
        assert_eq!(c.apply_command(FrameCommand::RemoveUpTo(3)), 0);
        assert_eq!(c.ids(), after_once);
        assert_eq!(after_once, vec![4, 5]);
        assert_eq!(c.recency().collect::<Vec<_>>(), vec![5, 4]);
    }

    #[test]
    fn test_get_data() {
        let mut c = collection(StoragePolicy::Greedy, &[2]);
        c.insert(8, &record(80));
        assert_eq!(c.get_data(8).unwrap(), record(80));
        assert!(matches!(c.get_data(9), Err(StreamError::FrameNotFound(9))));
    }

    #[test]
    fn test_policy_names() {
        assert_eq!("LRU".parse::<StoragePolicy>().unwrap(), StoragePolicy::Lru);
        assert_eq!("greedy".parse::<StoragePolicy>().unwrap(), StoragePolicy::Greedy);
        assert!("fifo".parse::<StoragePolicy>().is_err());
    }
}
