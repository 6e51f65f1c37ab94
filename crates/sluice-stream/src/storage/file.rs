//! File-backed tier: one serialized record per frame, named
//! `save_<rank>_<id>` inside the storage folder.

use std::collections::BTreeMap;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use sluice_redist::Record;
use tracing::{debug, warn};

use super::{StorageTier, TierKind};
use crate::error::{StreamError, StreamResult};
use crate::frame::FrameId;

/// Tier writing each frame to its own file.
#[derive(Debug)]
pub struct FileTier<R> {
    capacity: usize,
    rank: u32,
    folder: PathBuf,
    files: BTreeMap<FrameId, PathBuf>,
    _record: PhantomData<fn() -> R>,
}

impl<R> FileTier<R> {
    /// Creates an empty tier writing into `folder`.
    pub fn new(capacity: usize, rank: u32, folder: impl Into<PathBuf>) -> Self {
        Self {
            capacity,
            rank,
            folder: folder.into(),
            files: BTreeMap::new(),
            _record: PhantomData,
        }
    }

    /// Folder holding the frame files.
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Path a frame is written to.
    pub fn path_for(&self, id: FrameId) -> PathBuf {
        self.folder.join(format!("save_{}_{}", self.rank, id))
    }

    /// Rebuilds the id-to-file map from a manifest of `id path` lines.
    /// Files are not read until requested.
    pub fn restore(&mut self, manifest: &Path) -> StreamResult<usize> {
        let text = fs::read_to_string(manifest)?;
        let mut restored = 0;
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (id, path) = line.split_once(' ').ok_or_else(|| {
                StreamError::Storage(format!("{}:{}: expected `id path`", manifest.display(), line_no + 1))
            })?;
            let id: FrameId = id.parse().map_err(|_| {
                StreamError::Storage(format!("{}:{}: bad frame id {:?}", manifest.display(), line_no + 1, id))
            })?;
            if self.files.contains_key(&id) {
                warn!(frame_id = id, manifest = %manifest.display(), "frame listed twice in manifest, keeping first");
                continue;
            }
            self.files.insert(id, PathBuf::from(path));
            restored += 1;
        }
        debug!(manifest = %manifest.display(), frames = restored, "file tier restored");
        Ok(restored)
    }
}

impl<R: Record> StorageTier<R> for FileTier<R> {
    fn kind(&self) -> TierKind {
        TierKind::File
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn len(&self) -> usize {
        self.files.len()
    }

    fn insert(&mut self, id: FrameId, record: &R) -> StreamResult<()> {
        if self.files.contains_key(&id) {
            return Err(StreamError::DuplicateFrame(id));
        }
        if self.files.len() >= self.capacity {
            return Err(StreamError::Capacity {
                id,
                tiers: 1,
                frames: self.files.len(),
            });
        }
        let path = self.path_for(id);
        if path.exists() {
            return Err(StreamError::Storage(format!(
                "{} already exists, refusing to overwrite",
                path.display()
            )));
        }
        fs::write(&path, record.serialize_to_bytes()?)?;
        debug!(frame_id = id, path = %path.display(), "frame written");
        self.files.insert(id, path);
        Ok(())
    }

    fn erase(&mut self, id: FrameId) -> bool {
        match self.files.remove(&id) {
            Some(path) => {
                if let Err(e) = fs::remove_file(&path) {
                    warn!(frame_id = id, path = %path.display(), error = %e, "failed to remove frame file");
                }
                true
            }
            None => false,
        }
    }

    fn contains(&self, id: FrameId) -> bool {
        self.files.contains_key(&id)
    }

    fn get(&self, id: FrameId) -> StreamResult<R> {
        let path = self.files.get(&id).ok_or(StreamError::FrameNotFound(id))?;
        let bytes = fs::read(path)?;
        Ok(R::deserialize_from_bytes(&bytes)?)
    }

    fn ids(&self) -> Vec<FrameId> {
        self.files.keys().copied().collect()
    }

    fn file_entries(&self) -> Option<Vec<(FrameId, PathBuf)>> {
        Some(self.files.iter().map(|(&id, path)| (id, path.clone())).collect())
    }
}
