//! One-way signals: a single publisher pushes small integer values to a
//! fixed set of receivers, and each receiver reads them at its own pace.
//!
//! Every receiver keeps a local slot. Publications land in the slot when
//! the receiver next inspects it, in the order they were published, and
//! the slot is otherwise changed only through the operations below.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;

use crate::error::{Result, TransportError};
use crate::transport::{Rank, Tag, TagKind, Transport};

/// Flow-control commands exchanged over signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelCommand {
    /// Go ahead.
    Ok,
    /// Hold on.
    Wait,
    /// Fetch from the upstream channel.
    Get,
    /// Forward to the downstream channel.
    Put,
}

impl ChannelCommand {
    /// Integer carried on the wire.
    pub fn as_i64(self) -> i64 {
        match self {
            ChannelCommand::Ok => 0,
            ChannelCommand::Wait => 1,
            ChannelCommand::Get => 2,
            ChannelCommand::Put => 4,
        }
    }

    /// Decodes a wire value.
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(ChannelCommand::Ok),
            1 => Some(ChannelCommand::Wait),
            2 => Some(ChannelCommand::Get),
            4 => Some(ChannelCommand::Put),
            _ => None,
        }
    }
}

/// Single-writer, multi-reader value slot.
pub struct OneWaySignal<T: Transport + ?Sized> {
    transport: Arc<T>,
    channel: u32,
    publisher: Rank,
    receivers: Vec<Rank>,
    slot: AtomicI64,
}

impl<T: Transport + ?Sized> OneWaySignal<T> {
    /// Creates a signal published by `publisher` and read by `receivers`.
    /// Every slot starts at `initial`.
    pub fn new(
        transport: Arc<T>,
        channel: u32,
        publisher: Rank,
        receivers: Vec<Rank>,
        initial: i64,
    ) -> Self {
        Self {
            transport,
            channel,
            publisher,
            receivers,
            slot: AtomicI64::new(initial),
        }
    }

    fn tag(&self) -> Tag {
        Tag::new(self.channel, TagKind::Signal, 0)
    }

    /// True on the publishing rank.
    pub fn is_publisher(&self) -> bool {
        self.transport.rank() == self.publisher
    }

    /// True on receiving ranks.
    pub fn is_receiver(&self) -> bool {
        self.receivers.contains(&self.transport.rank())
    }

    /// Pushes `value` to every receiver. A publisher that is also a
    /// receiver writes its own slot directly.
    pub async fn publish(&self, value: i64) -> Result<()> {
        let me = self.transport.rank();
        if me != self.publisher {
            return Err(TransportError::NotInGroup { rank: me });
        }
        trace!(channel = self.channel, value = value, "signal published");
        let payload = Bytes::copy_from_slice(&value.to_be_bytes());
        for &receiver in &self.receivers {
            if receiver == me {
                self.slot.store(value, Ordering::Release);
            } else {
                self.transport.send(receiver, self.tag(), payload.clone()).await?;
            }
        }
        Ok(())
    }

    /// Publishes a flow-control command.
    pub async fn send_command(&self, command: ChannelCommand) -> Result<()> {
        self.publish(command.as_i64()).await
    }

    fn drain(&self) {
        while let Some(envelope) = self.transport.try_recv(Some(self.publisher), self.tag()) {
            if let Ok(raw) = <[u8; 8]>::try_from(envelope.payload.as_ref()) {
                self.slot.store(i64::from_be_bytes(raw), Ordering::Release);
            }
        }
    }

    /// Current slot value.
    pub fn check(&self) -> i64 {
        self.drain();
        self.slot.load(Ordering::Acquire)
    }

    /// True when the slot holds `expected`.
    pub fn check_command(&self, expected: ChannelCommand) -> bool {
        self.check() == expected.as_i64()
    }

    /// If the slot holds `expected`, stores `replacement` and returns true.
    pub fn check_and_replace(&self, expected: i64, replacement: i64) -> bool {
        self.drain();
        self.slot
            .compare_exchange(expected, replacement, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Command form of [`check_and_replace`](Self::check_and_replace).
    pub fn check_and_replace_command(&self, expected: ChannelCommand, replacement: ChannelCommand) -> bool {
        self.check_and_replace(expected.as_i64(), replacement.as_i64())
    }

    /// If the slot differs from `unwanted`, returns the value found and
    /// stores `replacement`.
    pub fn check_different_and_replace(&self, unwanted: i64, replacement: i64) -> Option<i64> {
        self.drain();
        let current = self.slot.load(Ordering::Acquire);
        if current == unwanted {
            return None;
        }
        match self
            .slot
            .compare_exchange(current, replacement, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(found) => Some(found),
            Err(_) => None,
        }
    }

    /// Overwrites the local slot without notifying anyone. Publications
    /// still in flight land on top of this value at the next check.
    pub fn update_self(&self, value: i64) {
        self.slot.store(value, Ordering::Release);
    }

    /// Command form of [`update_self`](Self::update_self).
    pub fn update_self_command(&self, command: ChannelCommand) {
        self.update_self(command.as_i64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::{LocalFabric, LocalTransport};

    fn signals(size: u32, publisher: Rank, receivers: Vec<Rank>, initial: i64) -> Vec<OneWaySignal<LocalTransport>> {
        LocalFabric::create(size)
            .into_iter()
            .map(|t| OneWaySignal::new(t, 3, publisher, receivers.clone(), initial))
            .collect()
    }

    #[test]
    fn test_command_codes() {
        assert_eq!(ChannelCommand::Ok.as_i64(), 0);
        assert_eq!(ChannelCommand::Wait.as_i64(), 1);
        assert_eq!(ChannelCommand::Get.as_i64(), 2);
        assert_eq!(ChannelCommand::Put.as_i64(), 4);
        assert_eq!(ChannelCommand::from_i64(3), None);
        assert_eq!(ChannelCommand::from_i64(4), Some(ChannelCommand::Put));
    }

    #[tokio::test]
    async fn test_publish_reaches_all_receivers() {
        let s = signals(3, 0, vec![1, 2], -1);
        assert_eq!(s[1].check(), -1);
        s[0].publish(5).await.unwrap();
        assert_eq!(s[1].check(), 5);
        assert_eq!(s[2].check(), 5);
    }

    #[tokio::test]
    async fn test_publisher_receiver_updates_own_slot() {
        let s = signals(2, 0, vec![0, 1], 0);
        s[0].send_command(ChannelCommand::Put).await.unwrap();
        assert!(s[0].check_command(ChannelCommand::Put));
        assert!(s[1].check_command(ChannelCommand::Put));
    }

    #[tokio::test]
    async fn test_check_and_replace() {
        let s = signals(2, 0, vec![1], ChannelCommand::Wait.as_i64());
        assert!(!s[1].check_and_replace_command(ChannelCommand::Ok, ChannelCommand::Wait));
        s[0].send_command(ChannelCommand::Ok).await.unwrap();
        assert!(s[1].check_and_replace_command(ChannelCommand::Ok, ChannelCommand::Wait));
        assert!(s[1].check_command(ChannelCommand::Wait));
        assert!(!s[1].check_and_replace_command(ChannelCommand::Ok, ChannelCommand::Wait));
    }

    #[tokio::test]
    async fn test_check_different_and_replace() {
        let s = signals(2, 0, vec![1], -1);
        assert_eq!(s[1].check_different_and_replace(-1, -1), None);
        s[0].publish(8).await.unwrap();
        assert_eq!(s[1].check_different_and_replace(-1, -1), Some(8));
        assert_eq!(s[1].check(), -1);
    }

    #[tokio::test]
    async fn test_publications_apply_in_order() {
        let s = signals(2, 0, vec![1], 0);
        for v in 1..=4 {
            s[0].publish(v).await.unwrap();
        }
        assert_eq!(s[1].check(), 4);
    }

    #[tokio::test]
    async fn test_update_self_is_local() {
        let s = signals(3, 0, vec![1, 2], 0);
        s[1].update_self(9);
        assert_eq!(s[1].check(), 9);
        assert_eq!(s[2].check(), 0);
    }

    #[tokio::test]
    async fn test_non_publisher_cannot_publish() {
        let s = signals(2, 0, vec![1], 0);
        let err = s[1].publish(1).await.unwrap_err();
        assert!(matches!(err, TransportError::NotInGroup { rank: 1 }));
    }
}
