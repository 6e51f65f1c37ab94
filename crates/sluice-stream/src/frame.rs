//! Frames and the retention commands issued after each forward.

/// Producer-assigned frame identifier.
pub type FrameId = u32;

/// A record tagged with its frame id.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame<R> {
    /// Frame id.
    pub id: FrameId,
    /// Payload.
    pub payload: R,
}

/// Retention command emitted after selecting a frame to forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCommand {
    /// Drop exactly this frame.
    RemoveOne(FrameId),
    /// Drop every frame with an id up to and including this one.
    RemoveUpTo(FrameId),
    /// Drop every frame with an id strictly below this one.
    RemoveUpToExcluding(FrameId),
}

impl FrameCommand {
    /// Boundary frame id.
    pub fn frame_id(&self) -> FrameId {
        match *self {
            FrameCommand::RemoveOne(id)
            | FrameCommand::RemoveUpTo(id)
            | FrameCommand::RemoveUpToExcluding(id) => id,
        }
    }

    /// True when the command removes frame `id`.
    pub fn removes(&self, id: FrameId) -> bool {
        match *self {
            FrameCommand::RemoveOne(target) => id == target,
            FrameCommand::RemoveUpTo(bound) => id <= bound,
            FrameCommand::RemoveUpToExcluding(bound) => id < bound,
        }
    }
}
