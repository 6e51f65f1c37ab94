//! Rank-addressed messaging abstraction.
//!
//! Every process in a job owns one endpoint identified by its [`Rank`].
//! Messages are matched on their [`Tag`] and optionally on their source,
//! and messages between one pair of ranks with the same tag are delivered
//! in the order they were sent.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Process identifier within a job.
pub type Rank = u32;

/// Message class, used to keep independent traffic on one channel apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TagKind {
    /// Redistributed record chunks.
    Data = 1,
    /// Per-iteration message counts announced ahead of data.
    Count = 2,
    /// Group collective traffic.
    Collective = 3,
    /// One-way signal publications.
    Signal = 4,
}

impl TagKind {
    /// Decodes the wire representation.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(TagKind::Data),
            2 => Some(TagKind::Count),
            3 => Some(TagKind::Collective),
            4 => Some(TagKind::Signal),
            _ => None,
        }
    }
}

/// Message matching key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// Channel that owns the traffic.
    pub channel: u32,
    /// Traffic class inside the channel.
    pub kind: TagKind,
    /// Iteration or operation sequence number.
    pub seq: u64,
}

impl Tag {
    /// Creates a tag.
    pub fn new(channel: u32, kind: TagKind, seq: u64) -> Self {
        Self { channel, kind, seq }
    }
}

/// A delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Sending rank.
    pub source: Rank,
    /// Matching key.
    pub tag: Tag,
    /// Message body.
    pub payload: Bytes,
}

/// Point-to-point messaging between the ranks of a job.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Rank of the local endpoint.
    fn rank(&self) -> Rank;

    /// Number of ranks in the job.
    fn size(&self) -> u32;

    /// Queues `payload` for `dest`. Sending to the local rank is allowed.
    async fn send(&self, dest: Rank, tag: Tag, payload: Bytes) -> Result<()>;

    /// Waits for the next message with `tag` from any source.
    async fn recv(&self, tag: Tag) -> Result<Envelope>;

    /// Waits for the next message with `tag` from `source`.
    async fn recv_from(&self, source: Rank, tag: Tag) -> Result<Envelope>;

    /// Takes a matching message if one has already arrived.
    fn try_recv(&self, source: Option<Rank>, tag: Tag) -> Option<Envelope>;

    /// Reports whether a matching message has already arrived, without taking it.
    fn has_pending(&self, source: Option<Rank>, tag: Tag) -> bool;
}
