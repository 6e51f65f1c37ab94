#![warn(missing_docs)]

//! Sluice stream subsystem.
//!
//! Connects a producer group to a consumer group, optionally through a
//! link group that buffers frames in tiered storage and forwards the ones
//! picked by a frame selection policy. Feedback signals between the
//! groups keep fast producers from flooding slow consumers.

pub mod config;
pub mod datastream;
pub mod error;
pub mod frame;
pub mod selector;
pub mod storage;

pub use config::{FramePolicy, StreamConfig, StreamPolicy, TierConfig};
pub use datastream::{LinkStep, StreamCoordinator, StreamTopology};
pub use error::{StreamError, StreamResult};
pub use frame::{Frame, FrameCommand, FrameId};
pub use selector::{build_frame_manager, FrameManager, LowHighFrames, MostRecentFrames, SequentialFrames};
pub use storage::{FileTier, MemoryTier, StorageCollection, StoragePolicy, StorageTier, TierKind};
