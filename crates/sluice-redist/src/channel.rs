//! One redistribution step between a source group and a destination group.
//!
//! A source calls [`RedistributionChannel::put`] once per iteration and a
//! destination calls [`RedistributionChannel::get`] once per iteration. A
//! rank may be both; the chunk it addresses to itself skips the transport.
//!
//! Under the collective discipline every source sends to every destination
//! it is linked to, even when the chunk is empty, so a destination knows its
//! message count up front. Under the point-to-point discipline sources sum
//! their non-empty flags onto the source root, which announces to every
//! destination how many chunks to expect before any payload is received.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use sluice_transport::{Envelope, Group, Rank, Tag, TagKind, Transport};
use tracing::{debug, error};

use crate::block::{bisect, BlockDomain, Extents};
use crate::config::{Discipline, RedistConfig};
use crate::error::{RedistError, RedistResult};
use crate::record::{Record, Selection};
use crate::split::{self, Strategy};
use crate::window::GlobalIndexWindow;

/// Ranks taking part in a channel, in group order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelLayout {
    /// Source ranks; index 0 is the source root.
    pub sources: Vec<Rank>,
    /// Destination ranks.
    pub destinations: Vec<Rank>,
}

impl ChannelLayout {
    /// Creates a layout.
    pub fn new(sources: Vec<Rank>, destinations: Vec<Rank>) -> Self {
        Self { sources, destinations }
    }
}

/// Merged result of one iteration on a destination.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery<R> {
    /// Frame id the sources attached to this iteration.
    pub frame_id: u32,
    /// Merged record.
    pub record: R,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Chunk {
    frame_id: u32,
    source_index: u32,
    body: Option<ByteBuf>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Announcement {
    frame_id: u32,
    messages: u32,
}

/// Moves records from a source group to a destination group.
pub struct RedistributionChannel<T: Transport + ?Sized, R: Record> {
    transport: Arc<T>,
    channel: u32,
    layout: ChannelLayout,
    strategy: Strategy,
    discipline: Discipline,
    recv_timeout: Option<Duration>,
    source_group: Option<Group>,
    send_seq: u64,
    recv_seq: u64,
    transit: VecDeque<(u64, Chunk)>,
    last_window: Option<GlobalIndexWindow>,
    zcurve_bbox: Option<[f32; 6]>,
    blocks: Option<Vec<Extents>>,
    _record: PhantomData<fn() -> R>,
}

impl<T: Transport + ?Sized, R: Record> RedistributionChannel<T, R> {
    /// Creates the channel endpoint of the local rank.
    pub fn new(transport: Arc<T>, channel: u32, layout: ChannelLayout, config: &RedistConfig) -> RedistResult<Self> {
        if layout.sources.is_empty() || layout.destinations.is_empty() {
            return Err(RedistError::Configuration(
                "a channel needs at least one source and one destination".to_string(),
            ));
        }
        let strategy = Strategy::from_config(&config.strategy, layout.sources.len(), layout.destinations.len())?;
        let zcurve_bbox = match &strategy {
            Strategy::ZCurve(params) => params.bbox,
            _ => None,
        };
        let me = transport.rank();
        let source_group = layout
            .sources
            .contains(&me)
            .then(|| Group::new(channel, layout.sources.clone()));
        debug!(
            rank = me,
            channel = channel,
            sources = layout.sources.len(),
            destinations = layout.destinations.len(),
            strategy = ?strategy,
            discipline = ?config.discipline,
            "redistribution channel created"
        );
        Ok(Self {
            transport,
            channel,
            layout,
            strategy,
            discipline: config.discipline,
            recv_timeout: config.recv_timeout_ms.map(Duration::from_millis),
            source_group,
            send_seq: 0,
            recv_seq: 0,
            transit: VecDeque::new(),
            last_window: None,
            zcurve_bbox,
            blocks: None,
            _record: PhantomData,
        })
    }

    /// Channel identifier.
    pub fn id(&self) -> u32 {
        self.channel
    }

    /// Channel layout.
    pub fn layout(&self) -> &ChannelLayout {
        &self.layout
    }

    /// Position of the local rank in the source group.
    pub fn source_index(&self) -> Option<usize> {
        let me = self.transport.rank();
        self.layout.sources.iter().position(|&r| r == me)
    }

    /// Position of the local rank in the destination group.
    pub fn destination_index(&self) -> Option<usize> {
        let me = self.transport.rank();
        self.layout.destinations.iter().position(|&r| r == me)
    }

    /// True when the local rank sends on this channel.
    pub fn is_source(&self) -> bool {
        self.source_group.is_some()
    }

    /// True when the local rank receives on this channel.
    pub fn is_destination(&self) -> bool {
        self.destination_index().is_some()
    }

    /// Window computed by the last split, kept for inspection.
    pub fn last_window(&self) -> Option<GlobalIndexWindow> {
        self.last_window
    }

    fn group(&self) -> RedistResult<&Group> {
        self.source_group.as_ref().ok_or_else(|| {
            RedistError::Configuration(format!(
                "rank {} is not a source of channel {}",
                self.transport.rank(),
                self.channel
            ))
        })
    }

    fn linked_destinations(&self, source: usize) -> std::ops::Range<usize> {
        match &self.strategy {
            Strategy::ProcToProc(mapping) => mapping.targets(source),
            _ => 0..self.layout.destinations.len(),
        }
    }

    fn linked_sources(&self, dest: usize) -> std::ops::Range<usize> {
        match &self.strategy {
            Strategy::ProcToProc(mapping) => mapping.sources(dest),
            _ => 0..self.layout.sources.len(),
        }
    }

    /// Locates the local items in the global item sequence.
    pub async fn compute_global_index(&mut self, record: &R) -> RedistResult<GlobalIndexWindow> {
        if !record.is_countable() {
            error!(channel = self.channel, "record is not countable");
            return Err(RedistError::Configuration(
                "record is not countable; the strategy needs item counts".to_string(),
            ));
        }
        let local = record.item_count();
        let group = self.group()?;
        let window = if group.len() == 1 {
            GlobalIndexWindow::single(local)
        } else {
            let (offset, total) = group.exclusive_scan_sum(self.transport.as_ref(), local).await?;
            GlobalIndexWindow {
                local_offset: offset,
                local_count: local,
                global_count: total,
            }
        };
        self.last_window = Some(window);
        Ok(window)
    }

    async fn discover_bbox(&mut self, positions: &[[f32; 3]]) -> RedistResult<Option<[f32; 6]>> {
        if let Some(bbox) = self.zcurve_bbox {
            return Ok(Some(bbox));
        }
        let local = split::local_bbox(positions);
        let group = self.group()?;
        let transport = self.transport.as_ref();
        let min = group.all_reduce_min_f32(transport, local[..3].to_vec()).await?;
        let max = group.all_reduce_max_f32(transport, local[3..].to_vec()).await?;
        let bbox = [min[0], min[1], min[2], max[0], max[1], max[2]];
        if (0..3).any(|axis| bbox[axis] > bbox[axis + 3]) {
            debug!(channel = self.channel, "no positions anywhere yet, bounding box deferred");
            return Ok(None);
        }
        debug!(channel = self.channel, bbox = ?bbox, "bounding box discovered");
        self.zcurve_bbox = Some(bbox);
        Ok(Some(bbox))
    }

    fn chunks_from(record: &R, selections: Vec<Selection>) -> Vec<Option<R>> {
        let parts = record.split_by_ranges(&selections);
        parts
            .into_iter()
            .zip(selections.iter())
            .map(|(part, sel)| (!sel.is_empty()).then_some(part))
            .collect()
    }

    /// Splits a local record into one optional chunk per destination.
    pub async fn split(&mut self, record: &R) -> RedistResult<Vec<Option<R>>> {
        let nb_dests = self.layout.destinations.len();
        let window = if self.strategy.needs_global_index() {
            Some(self.compute_global_index(record).await?)
        } else {
            None
        };
        match self.strategy.clone() {
            Strategy::ContiguousCount => {
                let window = window.unwrap_or_default();
                let selections = split::count_spans(&window, nb_dests)
                    .into_iter()
                    .map(|span| span.into_iter().collect())
                    .collect();
                Ok(Self::chunks_from(record, selections))
            }
            Strategy::RoundRobin => {
                let window = window.unwrap_or_default();
                Ok(Self::chunks_from(record, split::round_robin_selections(&window, nb_dests)))
            }
            Strategy::ProcToProc(_) => {
                let source = self.source_index().unwrap_or(0);
                let targets = self.linked_destinations(source);
                Ok((0..nb_dests)
                    .map(|d| targets.contains(&d).then(|| record.clone()))
                    .collect())
            }
            Strategy::Block(dims) => {
                let domain = record.domain().ok_or_else(|| {
                    RedistError::Configuration("block strategy needs a domain descriptor".to_string())
                })?;
                let positions = self.positions(record)?;
                let blocks = match &self.blocks {
                    Some(blocks) => blocks.clone(),
                    None => {
                        let blocks = bisect(domain.global_extents, nb_dests, dims)?;
                        self.blocks = Some(blocks.clone());
                        blocks
                    }
                };
                let selections = split::block_selections(&positions, &domain, &blocks);
                let mut chunks = Self::chunks_from(record, selections);
                for (chunk, extents) in chunks.iter_mut().zip(blocks.iter()) {
                    if let Some(chunk) = chunk {
                        chunk.set_domain(BlockDomain {
                            local_extents: *extents,
                            ..domain
                        });
                    }
                }
                Ok(chunks)
            }
            Strategy::ZCurve(params) => {
                let positions = self.positions(record)?;
                match self.discover_bbox(&positions).await? {
                    Some(bbox) => Ok(Self::chunks_from(
                        record,
                        split::zcurve_selections(&positions, &bbox, &params, nb_dests),
                    )),
                    None => Ok(vec![None; nb_dests]),
                }
            }
        }
    }

    fn positions(&self, record: &R) -> RedistResult<Vec<[f32; 3]>> {
        if !record.is_countable() {
            error!(channel = self.channel, "record is not countable");
            return Err(RedistError::Configuration(
                "record is not countable; the strategy needs item counts".to_string(),
            ));
        }
        let positions = record.positions().ok_or_else(|| {
            RedistError::Configuration("spatial strategy needs a position field".to_string())
        })?;
        if positions.len() as u64 != record.item_count() {
            return Err(RedistError::Configuration(format!(
                "{} positions for {} items",
                positions.len(),
                record.item_count()
            )));
        }
        Ok(positions)
    }

    /// Splits `record` and ships the chunks tagged with `frame_id`.
    /// System records, and any record carrying the quit marker, are copied
    /// whole to every linked destination.
    pub async fn put(&mut self, frame_id: u32, record: &R) -> RedistResult<()> {
        let source = self.source_index().ok_or_else(|| {
            RedistError::Configuration(format!(
                "rank {} is not a source of channel {}",
                self.transport.rank(),
                self.channel
            ))
        })?;
        let chunks = if record.is_system_tagged() || record.is_quit() {
            let linked = self.linked_destinations(source);
            (0..self.layout.destinations.len())
                .map(|d| linked.contains(&d).then(|| record.clone()))
                .collect()
        } else {
            self.split(record).await?
        };
        self.redistribute(frame_id, source, chunks).await
    }

    fn data_tag(&self, seq: u64) -> Tag {
        Tag::new(self.channel, TagKind::Data, seq)
    }

    fn count_tag(&self, seq: u64) -> Tag {
        Tag::new(self.channel, TagKind::Count, seq)
    }

    async fn redistribute(&mut self, frame_id: u32, source: usize, chunks: Vec<Option<R>>) -> RedistResult<()> {
        let seq = self.send_seq;
        self.send_seq += 1;
        let me = self.transport.rank();

        let mut encoded: Vec<Option<ByteBuf>> = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            match chunk {
                Some(record) => match record.serialize_to_bytes() {
                    Ok(bytes) => encoded.push(Some(ByteBuf::from(bytes))),
                    Err(e) => {
                        error!(channel = self.channel, seq = seq, error = %e, "failed to serialize chunk");
                        return Err(e);
                    }
                },
                None => encoded.push(None),
            }
        }

        let linked = self.linked_destinations(source);
        if self.discipline == Discipline::PointToPoint {
            let flags: Vec<u64> = self
                .layout
                .destinations
                .iter()
                .zip(encoded.iter())
                .map(|(&dest, body)| u64::from(body.is_some() && dest != me))
                .collect();
            let totals = self.group()?.reduce_sum_vec(self.transport.as_ref(), flags).await?;
            if let Some(totals) = totals {
                for (&dest, &messages) in self.layout.destinations.iter().zip(totals.iter()) {
                    let announcement = Announcement {
                        frame_id,
                        messages: messages as u32,
                    };
                    let payload = Bytes::from(bincode::serialize(&announcement)?);
                    self.transport.send(dest, self.count_tag(seq), payload).await?;
                }
            }
        }

        for (d, body) in encoded.into_iter().enumerate() {
            if !linked.contains(&d) {
                continue;
            }
            if self.discipline == Discipline::PointToPoint && body.is_none() {
                continue;
            }
            let dest = self.layout.destinations[d];
            let chunk = Chunk {
                frame_id,
                source_index: source as u32,
                body,
            };
            if dest == me {
                self.transit.push_back((seq, chunk));
                continue;
            }
            let payload = Bytes::from(bincode::serialize(&chunk)?);
            debug!(
                channel = self.channel,
                seq = seq,
                frame_id = frame_id,
                dest = dest,
                bytes = payload.len(),
                "chunk sent"
            );
            self.transport.send(dest, self.data_tag(seq), payload).await?;
        }
        Ok(())
    }

    fn take_transit(&mut self, seq: u64) -> Option<Chunk> {
        match self.transit.front() {
            Some((s, _)) if *s == seq => self.transit.pop_front().map(|(_, c)| c),
            _ => None,
        }
    }

    fn has_transit(&self, seq: u64) -> bool {
        matches!(self.transit.front(), Some((s, _)) if *s == seq)
    }

    async fn recv_with_timeout(&self, source: Option<Rank>, tag: Tag, what: &str) -> RedistResult<Envelope> {
        let transport = self.transport.as_ref();
        let fut = async {
            match source {
                Some(src) => transport.recv_from(src, tag).await,
                None => transport.recv(tag).await,
            }
        };
        match self.recv_timeout {
            None => Ok(fut.await?),
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => Ok(result?),
                Err(_) => {
                    error!(channel = self.channel, seq = tag.seq, "timed out waiting for {}", what);
                    Err(RedistError::ProtocolViolation {
                        channel: self.channel,
                        reason: format!("timed out after {:?} waiting for {}", limit, what),
                    })
                }
            },
        }
    }

    /// True when data of the next iteration has started to arrive, so that
    /// [`get`](Self::get) will not wait on a source that has not sent yet.
    pub fn ready(&self) -> bool {
        let seq = self.recv_seq;
        match self.discipline {
            Discipline::PointToPoint => self
                .transport
                .has_pending(Some(self.layout.sources[0]), self.count_tag(seq)),
            Discipline::Collective => {
                self.has_transit(seq) || self.transport.has_pending(None, self.data_tag(seq))
            }
        }
    }

    /// Receives the next iteration if it has started to arrive.
    pub async fn try_get(&mut self) -> RedistResult<Option<Delivery<R>>> {
        if !self.ready() {
            return Ok(None);
        }
        self.get().await.map(Some)
    }

    /// Receives and merges the next iteration.
    pub async fn get(&mut self) -> RedistResult<Delivery<R>> {
        let dest = self.destination_index().ok_or_else(|| {
            RedistError::Configuration(format!(
                "rank {} is not a destination of channel {}",
                self.transport.rank(),
                self.channel
            ))
        })?;
        let seq = self.recv_seq;
        self.recv_seq += 1;
        let me = self.transport.rank();

        let (expected, announced_frame) = match self.discipline {
            Discipline::Collective => {
                let count = self
                    .linked_sources(dest)
                    .filter(|&s| self.layout.sources[s] != me)
                    .count();
                (count, None)
            }
            Discipline::PointToPoint => {
                let root = self.layout.sources[0];
                let envelope = self
                    .recv_with_timeout(Some(root), self.count_tag(seq), "the message count")
                    .await?;
                let announcement: Announcement = bincode::deserialize(&envelope.payload)?;
                (announcement.messages as usize, Some(announcement.frame_id))
            }
        };

        let mut chunks = Vec::with_capacity(expected + 1);
        for received in 0..expected {
            let what = format!("chunk {} of {}", received + 1, expected);
            let envelope = self.recv_with_timeout(None, self.data_tag(seq), &what).await?;
            let chunk: Chunk = bincode::deserialize(&envelope.payload).map_err(|e| {
                error!(channel = self.channel, seq = seq, source = envelope.source, "failed to decode chunk");
                RedistError::from(e)
            })?;
            chunks.push(chunk);
        }
        if self.discipline == Discipline::PointToPoint && self.transport.has_pending(None, self.data_tag(seq)) {
            error!(channel = self.channel, seq = seq, expected = expected, "unannounced chunk received");
            return Err(RedistError::ProtocolViolation {
                channel: self.channel,
                reason: format!("more than the {} announced chunks arrived", expected),
            });
        }
        if let Some(chunk) = self.take_transit(seq) {
            chunks.push(chunk);
        }
        chunks.sort_by_key(|c| c.source_index);

        let frame_id = match announced_frame.or_else(|| chunks.first().map(|c| c.frame_id)) {
            Some(id) => id,
            None => {
                return Err(RedistError::ProtocolViolation {
                    channel: self.channel,
                    reason: "iteration carried no chunk and no announcement".to_string(),
                })
            }
        };
        if let Some(other) = chunks.iter().find(|c| c.frame_id != frame_id) {
            error!(channel = self.channel, seq = seq, "chunks disagree on the frame id");
            return Err(RedistError::ProtocolViolation {
                channel: self.channel,
                reason: format!(
                    "chunk from source {} carries frame {}, expected {}",
                    other.source_index, other.frame_id, frame_id
                ),
            });
        }

        let mut record = R::default();
        for chunk in chunks {
            if let Some(body) = chunk.body {
                let part = R::deserialize_from_bytes(&body)?;
                record.merge_from(part)?;
            }
        }
        debug!(
            channel = self.channel,
            seq = seq,
            frame_id = frame_id,
            items = record.item_count(),
            "iteration merged"
        );
        Ok(Delivery { frame_id, record })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyConfig;
    use crate::fields::{Field, FieldRecord};
    use sluice_transport::LocalFabric;

    fn ids(range: std::ops::Range<i64>) -> FieldRecord {
        FieldRecord::new().with("id", Field::per_item_i64(1, range.collect()))
    }

    #[tokio::test]
    async fn test_single_rank_transit() {
        let ranks = LocalFabric::create(1);
        let layout = ChannelLayout::new(vec![0], vec![0]);
        let mut channel: RedistributionChannel<_, FieldRecord> =
            RedistributionChannel::new(ranks[0].clone(), 1, layout, &RedistConfig::default()).unwrap();
        assert!(channel.is_source());
        assert!(channel.is_destination());
        assert!(!channel.ready());

        channel.put(7, &ids(0..5)).await.unwrap();
        assert!(channel.ready());
        let delivery = channel.get().await.unwrap();
        assert_eq!(delivery.frame_id, 7);
        assert_eq!(delivery.record.i64_values("id").unwrap(), &[0, 1, 2, 3, 4]);
        assert_eq!(ranks[0].pending(), 0);
    }

    #[tokio::test]
    async fn test_uncountable_rejected() {
        let ranks = LocalFabric::create(1);
        let layout = ChannelLayout::new(vec![0], vec![0]);
        let mut channel: RedistributionChannel<_, FieldRecord> =
            RedistributionChannel::new(ranks[0].clone(), 1, layout, &RedistConfig::default()).unwrap();
        let bad = ids(0..3).with("mass", Field::per_item_f32(1, vec![1.0]));
        let err = channel.put(0, &bad).await.unwrap_err();
        assert!(matches!(err, RedistError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_bad_proc_mapping() {
        let ranks = LocalFabric::create(5);
        let layout = ChannelLayout::new(vec![0, 1, 2], vec![3, 4]);
        let config = RedistConfig::new(StrategyConfig::Proc, Discipline::Collective);
        let result: RedistResult<RedistributionChannel<_, FieldRecord>> =
            RedistributionChannel::new(ranks[0].clone(), 1, layout, &config);
        assert!(matches!(result, Err(RedistError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_get_on_non_destination() {
        let ranks = LocalFabric::create(2);
        let layout = ChannelLayout::new(vec![0], vec![1]);
        let mut channel: RedistributionChannel<_, FieldRecord> =
            RedistributionChannel::new(ranks[0].clone(), 1, layout, &RedistConfig::default()).unwrap();
        assert!(matches!(channel.get().await, Err(RedistError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_quit_duplicated() {
        let ranks = LocalFabric::create(3);
        let layout = ChannelLayout::new(vec![0], vec![1, 2]);
        let config = RedistConfig::default();
        let mut source: RedistributionChannel<_, FieldRecord> =
            RedistributionChannel::new(ranks[0].clone(), 2, layout.clone(), &config).unwrap();
        source.put(3, &FieldRecord::quit()).await.unwrap();
        for rank in [1, 2] {
            let mut dest: RedistributionChannel<_, FieldRecord> =
                RedistributionChannel::new(ranks[rank].clone(), 2, layout.clone(), &config).unwrap();
            let delivery = dest.get().await.unwrap();
            assert!(delivery.record.is_quit());
            assert_eq!(delivery.frame_id, 3);
        }
    }

    #[tokio::test]
    async fn test_p2p_extra_message_detected() {
        let ranks = LocalFabric::create(2);
        let layout = ChannelLayout::new(vec![0], vec![1]);
        let config = RedistConfig::new(StrategyConfig::Count, Discipline::PointToPoint);
        let mut source: RedistributionChannel<_, FieldRecord> =
            RedistributionChannel::new(ranks[0].clone(), 5, layout.clone(), &config).unwrap();
        let mut dest: RedistributionChannel<_, FieldRecord> =
            RedistributionChannel::new(ranks[1].clone(), 5, layout, &config).unwrap();

        source.put(0, &ids(0..4)).await.unwrap();
        let stray = Chunk {
            frame_id: 0,
            source_index: 0,
            body: None,
        };
        ranks[0]
            .send(1, Tag::new(5, TagKind::Data, 0), Bytes::from(bincode::serialize(&stray).unwrap()))
            .await
            .unwrap();
        let err = dest.get().await.unwrap_err();
        assert!(matches!(err, RedistError::ProtocolViolation { channel: 5, .. }));
    }

    #[tokio::test]
    async fn test_p2p_timeout_on_missing_chunk() {
        let ranks = LocalFabric::create(2);
        let layout = ChannelLayout::new(vec![0], vec![1]);
        let config = RedistConfig {
            strategy: StrategyConfig::Count,
            discipline: Discipline::PointToPoint,
            recv_timeout_ms: Some(50),
        };
        let mut dest: RedistributionChannel<_, FieldRecord> =
            RedistributionChannel::new(ranks[1].clone(), 6, layout, &config).unwrap();
        let announcement = Announcement {
            frame_id: 0,
            messages: 1,
        };
        ranks[0]
            .send(1, Tag::new(6, TagKind::Count, 0), Bytes::from(bincode::serialize(&announcement).unwrap()))
            .await
            .unwrap();
        let err = dest.get().await.unwrap_err();
        assert!(matches!(err, RedistError::ProtocolViolation { channel: 6, .. }));
    }

    #[tokio::test]
    async fn test_frame_id_mismatch() {
        let ranks = LocalFabric::create(3);
        let layout = ChannelLayout::new(vec![0, 1], vec![2]);
        let config = RedistConfig::new(StrategyConfig::Proc, Discipline::Collective);
        let mut dest: RedistributionChannel<_, FieldRecord> =
            RedistributionChannel::new(ranks[2].clone(), 8, layout, &config).unwrap();
        for (source, frame_id) in [(0u32, 4u32), (1, 5)] {
            let chunk = Chunk {
                frame_id,
                source_index: source,
                body: None,
            };
            ranks[source as usize]
                .send(2, Tag::new(8, TagKind::Data, 0), Bytes::from(bincode::serialize(&chunk).unwrap()))
                .await
                .unwrap();
        }
        let err = dest.get().await.unwrap_err();
        assert!(matches!(err, RedistError::ProtocolViolation { .. }));
    }
}
