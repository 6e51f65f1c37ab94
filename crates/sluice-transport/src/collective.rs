//! Collective operations over a subset of ranks.
//!
//! A [`Group`] is an ordered list of ranks; index 0 is the group root.
//! All collectives are rooted at index 0: contributions are gathered
//! there, combined, and the result is sent back. Members must invoke the
//! collectives of one group in the same order, since each call consumes
//! one sequence number on the group's channel.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

use crate::error::{Result, TransportError};
use crate::transport::{Rank, Tag, TagKind, Transport};

/// Ordered set of ranks taking part in collectives together.
#[derive(Debug)]
pub struct Group {
    members: Vec<Rank>,
    channel: u32,
    seq: AtomicU64,
}

impl Group {
    /// Creates a group communicating on `channel`.
    pub fn new(channel: u32, members: Vec<Rank>) -> Self {
        Self {
            members,
            channel,
            seq: AtomicU64::new(0),
        }
    }

    /// Member ranks, root first.
    pub fn members(&self) -> &[Rank] {
        &self.members
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True when the group has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Rank of the group root.
    pub fn root(&self) -> Option<Rank> {
        self.members.first().copied()
    }

    /// Position of `rank` in the group.
    pub fn index_of(&self, rank: Rank) -> Option<usize> {
        self.members.iter().position(|&r| r == rank)
    }

    /// True when `rank` belongs to the group.
    pub fn contains(&self, rank: Rank) -> bool {
        self.index_of(rank).is_some()
    }

    fn next_tag(&self) -> Tag {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        Tag::new(self.channel, TagKind::Collective, seq)
    }

    fn member_index<T: Transport + ?Sized>(&self, transport: &T) -> Result<usize> {
        self.index_of(transport.rank())
            .ok_or(TransportError::NotInGroup {
                rank: transport.rank(),
            })
    }

    /// Gathers one value per member at the root, in member order.
    /// Non-root members get `None`.
    pub async fn gather<T, V>(&self, transport: &T, value: &V) -> Result<Option<Vec<V>>>
    where
        T: Transport + ?Sized,
        V: Serialize + DeserializeOwned + Clone,
    {
        let index = self.member_index(transport)?;
        let tag = self.next_tag();
        if index != 0 {
            let payload = bincode::serialize(value)?;
            transport.send(self.members[0], tag, Bytes::from(payload)).await?;
            return Ok(None);
        }
        let mut values = Vec::with_capacity(self.members.len());
        values.push(value.clone());
        for &member in &self.members[1..] {
            let envelope = transport.recv_from(member, tag).await?;
            values.push(bincode::deserialize(&envelope.payload)?);
        }
        Ok(Some(values))
    }

    /// Sends the root's value to every member and returns it everywhere.
    pub async fn broadcast<T, V>(&self, transport: &T, value: Option<&V>) -> Result<V>
    where
        T: Transport + ?Sized,
        V: Serialize + DeserializeOwned + Clone,
    {
        let index = self.member_index(transport)?;
        let tag = self.next_tag();
        if index == 0 {
            let value = value.ok_or_else(|| {
                TransportError::Serialization("broadcast root supplied no value".to_string())
            })?;
            let payload = Bytes::from(bincode::serialize(value)?);
            for &member in &self.members[1..] {
                transport.send(member, tag, payload.clone()).await?;
            }
            return Ok(value.clone());
        }
        let envelope = transport.recv_from(self.members[0], tag).await?;
        Ok(bincode::deserialize(&envelope.payload)?)
    }

    /// Blocks until every member has entered the barrier.
    pub async fn barrier<T: Transport + ?Sized>(&self, transport: &T) -> Result<()> {
        trace!(rank = transport.rank(), channel = self.channel, "barrier");
        let gathered = self.gather(transport, &()).await?;
        self.broadcast(transport, gathered.as_ref().map(|_| &())).await
    }

    /// Reduces `combine` over every member's value and returns the result everywhere.
    pub async fn all_reduce<T, V, F>(&self, transport: &T, value: V, combine: F) -> Result<V>
    where
        T: Transport + ?Sized,
        V: Serialize + DeserializeOwned + Clone,
        F: Fn(V, V) -> V,
    {
        let gathered = self.gather(transport, &value).await?;
        let reduced = gathered.map(|values| {
            let mut iter = values.into_iter();
            let first = iter.next().unwrap_or(value);
            iter.fold(first, &combine)
        });
        self.broadcast(transport, reduced.as_ref()).await
    }

    /// Sum of every member's value.
    pub async fn all_reduce_sum<T: Transport + ?Sized>(&self, transport: &T, value: u64) -> Result<u64> {
        self.all_reduce(transport, value, |a, b| a + b).await
    }

    /// Element-wise sum of equal-length vectors, delivered to the root only.
    pub async fn reduce_sum_vec<T: Transport + ?Sized>(
        &self,
        transport: &T,
        values: Vec<u64>,
    ) -> Result<Option<Vec<u64>>> {
        let gathered = self.gather(transport, &values).await?;
        Ok(gathered.map(|all| {
            let mut sum = vec![0u64; values.len()];
            for contribution in all {
                for (acc, v) in sum.iter_mut().zip(contribution) {
                    *acc += v;
                }
            }
            sum
        }))
    }

    /// Exclusive prefix sum in member order, plus the global total.
    pub async fn exclusive_scan_sum<T: Transport + ?Sized>(
        &self,
        transport: &T,
        value: u64,
    ) -> Result<(u64, u64)> {
        let index = self.member_index(transport)?;
        let gathered = self.gather(transport, &value).await?;
        let prefixes = gathered.map(|all| {
            let mut running = 0u64;
            let mut out = Vec::with_capacity(all.len() + 1);
            for v in all {
                out.push(running);
                running += v;
            }
            out.push(running);
            out
        });
        let prefixes: Vec<u64> = self.broadcast(transport, prefixes.as_ref()).await?;
        let total = prefixes.last().copied().unwrap_or(0);
        Ok((prefixes.get(index).copied().unwrap_or(0), total))
    }

    /// Element-wise minimum of equal-length float vectors, returned everywhere.
    pub async fn all_reduce_min_f32<T: Transport + ?Sized>(
        &self,
        transport: &T,
        values: Vec<f32>,
    ) -> Result<Vec<f32>> {
        self.all_reduce(transport, values, |a, b| {
            a.into_iter().zip(b).map(|(x, y)| x.min(y)).collect()
        })
        .await
    }

    /// Element-wise maximum of equal-length float vectors, returned everywhere.
    pub async fn all_reduce_max_f32<T: Transport + ?Sized>(
        &self,
        transport: &T,
        values: Vec<f32>,
    ) -> Result<Vec<f32>> {
        self.all_reduce(transport, values, |a, b| {
            a.into_iter().zip(b).map(|(x, y)| x.max(y)).collect()
        })
        .await
    }
}
