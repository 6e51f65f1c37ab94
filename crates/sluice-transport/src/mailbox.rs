//! Per-rank inbox shared by every transport implementation.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

use crate::error::{Result, TransportError};
use crate::transport::{Envelope, Rank, Tag};

/// Tag-indexed queue of delivered messages.
#[derive(Default)]
pub struct Mailbox {
    queues: Mutex<HashMap<Tag, VecDeque<(Rank, Bytes)>>>,
    arrived: Notify,
    closed: AtomicBool,
}

impl Mailbox {
    /// Creates an empty mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message and wakes pending receivers.
    pub fn deliver(&self, envelope: Envelope) {
        trace!(
            source = envelope.source,
            channel = envelope.tag.channel,
            seq = envelope.tag.seq,
            len = envelope.payload.len(),
            "message delivered"
        );
        self.queues
            .lock()
            .entry(envelope.tag)
            .or_default()
            .push_back((envelope.source, envelope.payload));
        self.arrived.notify_waiters();
    }

    /// Removes the oldest message matching `source` and `tag`.
    pub fn take(&self, source: Option<Rank>, tag: Tag) -> Option<Envelope> {
        let mut queues = self.queues.lock();
        let queue = queues.get_mut(&tag)?;
        let pos = match source {
            Some(src) => queue.iter().position(|(s, _)| *s == src)?,
            None => {
                if queue.is_empty() {
                    return None;
                }
                0
            }
        };
        let (src, payload) = queue.remove(pos)?;
        if queue.is_empty() {
            queues.remove(&tag);
        }
        Some(Envelope {
            source: src,
            tag,
            payload,
        })
    }

    /// Reports whether a matching message is queued.
    pub fn contains(&self, source: Option<Rank>, tag: Tag) -> bool {
        let queues = self.queues.lock();
        match (queues.get(&tag), source) {
            (Some(queue), Some(src)) => queue.iter().any(|(s, _)| *s == src),
            (Some(queue), None) => !queue.is_empty(),
            (None, _) => false,
        }
    }

    /// Waits until a matching message can be taken.
    pub async fn wait(&self, source: Option<Rank>, tag: Tag) -> Result<Envelope> {
        loop {
            let notified = self.arrived.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(envelope) = self.take(source, tag) {
                return Ok(envelope);
            }
            if self.closed.load(Ordering::Acquire) {
                return Err(TransportError::Disconnected);
            }
            notified.await;
        }
    }

    /// Number of queued messages across all tags.
    pub fn pending(&self) -> usize {
        self.queues.lock().values().map(VecDeque::len).sum()
    }

    /// Fails every pending and future blocking receive that finds nothing queued.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.arrived.notify_waiters();
    }
}
