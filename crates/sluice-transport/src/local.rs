//! In-process fabric: every rank lives in the same address space.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Result, TransportError};
use crate::mailbox::Mailbox;
use crate::transport::{Envelope, Rank, Tag, Transport};

/// Factory for a set of connected [`LocalTransport`] endpoints.
pub struct LocalFabric;

impl LocalFabric {
    /// Creates `size` endpoints, one per rank, indexed by rank.
    pub fn create(size: u32) -> Vec<Arc<LocalTransport>> {
        let mailboxes: Arc<Vec<Arc<Mailbox>>> =
            Arc::new((0..size).map(|_| Arc::new(Mailbox::new())).collect());
        (0..size)
            .map(|rank| {
                Arc::new(LocalTransport {
                    rank,
                    mailboxes: mailboxes.clone(),
                })
            })
            .collect()
    }
}

/// One rank's endpoint on a [`LocalFabric`].
pub struct LocalTransport {
    rank: Rank,
    mailboxes: Arc<Vec<Arc<Mailbox>>>,
}

impl LocalTransport {
    fn own(&self) -> &Mailbox {
        &self.mailboxes[self.rank as usize]
    }

    /// Number of messages waiting in this rank's mailbox.
    pub fn pending(&self) -> usize {
        self.own().pending()
    }

    /// Shuts down this rank's mailbox.
    pub fn close(&self) {
        self.own().close();
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> u32 {
        self.mailboxes.len() as u32
    }

    async fn send(&self, dest: Rank, tag: Tag, payload: Bytes) -> Result<()> {
        let mailbox = self
            .mailboxes
            .get(dest as usize)
            .ok_or(TransportError::UnknownRank {
                rank: dest,
                size: self.size(),
            })?;
        mailbox.deliver(Envelope {
            source: self.rank,
            tag,
            payload,
        });
        Ok(())
    }

    async fn recv(&self, tag: Tag) -> Result<Envelope> {
        self.own().wait(None, tag).await
    }

    async fn recv_from(&self, source: Rank, tag: Tag) -> Result<Envelope> {
        if source >= self.size() {
            return Err(TransportError::UnknownRank {
                rank: source,
                size: self.size(),
            });
        }
        self.own().wait(Some(source), tag).await
    }

    fn try_recv(&self, source: Option<Rank>, tag: Tag) -> Option<Envelope> {
        self.own().take(source, tag)
    }

    fn has_pending(&self, source: Option<Rank>, tag: Tag) -> bool {
        self.own().contains(source, tag)
    }
}
