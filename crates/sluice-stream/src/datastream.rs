//! Stream coordination between a producer group, an optional link group
//! and a consumer group.
//!
//! Producers call [`StreamCoordinator::submit`], consumers call
//! [`StreamCoordinator::receive`], link ranks call
//! [`StreamCoordinator::link_step`] (or [`run_link`](StreamCoordinator::run_link))
//! until the quit record has gone through.
//!
//! Flow control depends on [`StreamPolicy`]:
//!
//! * `None`: plain redistribution, the link forwards every frame it gets.
//! * `Single` with a link: the link buffers incoming frames and forwards
//!   one selected frame each time the consumer root reports it is ready.
//!   Without a link the producer root waits for that report instead.
//! * `Double`: as `Single`, and the link root also grants every producer
//!   put, only while its storage has room.
//!
//! Every group-wide decision is taken by the group root and published to
//! the other members through a [`OneWaySignal`], so all members of a
//! group act on the same command in the same iteration.

use std::sync::Arc;
use std::time::Duration;

use sluice_redist::{ChannelLayout, Delivery, RedistConfig, Record, RedistributionChannel};
use sluice_transport::{ChannelCommand, Group, OneWaySignal, Rank, Transport};
use tracing::{debug, info, trace, warn};

use crate::config::{StreamConfig, StreamPolicy};
use crate::error::{StreamError, StreamResult};
use crate::frame::{Frame, FrameCommand, FrameId};
use crate::selector::{build_frame_manager, FrameManager, NO_FRAME};
use crate::storage::StorageCollection;

/// Transport channels reserved per stream.
pub const CHANNELS_PER_STREAM: u32 = 16;

const UPSTREAM: u32 = 0;
const DOWNSTREAM: u32 = 1;
const LINK_COMMAND: u32 = 3;
const CONSUMER_LINK: u32 = 4;
const PRODUCER_GROUP: u32 = 5;
const PRODUCER_LINK: u32 = 6;
const LINK_PRODUCER: u32 = 7;
const FRAME_CHOICE: u32 = 8;
const CONSUMER_PRODUCER: u32 = 9;
const LINK_BARRIER: u32 = 10;
const PRODUCER_BARRIER: u32 = 11;

const POLL_INTERVAL: Duration = Duration::from_micros(100);

/// Ranks of each stage and the redistribution used between stages.
#[derive(Debug, Clone)]
pub struct StreamTopology {
    /// Producer ranks; index 0 is the producer root.
    pub producers: Vec<Rank>,
    /// Link ranks, if the stream has a link stage.
    pub link: Option<Vec<Rank>>,
    /// Consumer ranks; index 0 is the consumer root.
    pub consumers: Vec<Rank>,
    /// Redistribution out of the producers.
    pub upstream: RedistConfig,
    /// Redistribution from the link to the consumers.
    pub downstream: RedistConfig,
}

impl StreamTopology {
    /// Producers feeding consumers directly.
    pub fn direct(producers: Vec<Rank>, consumers: Vec<Rank>) -> Self {
        Self {
            producers,
            link: None,
            consumers,
            upstream: RedistConfig::default(),
            downstream: RedistConfig::default(),
        }
    }

    /// Producers feeding consumers through a link stage.
    pub fn linked(producers: Vec<Rank>, link: Vec<Rank>, consumers: Vec<Rank>) -> Self {
        Self {
            link: Some(link),
            ..Self::direct(producers, consumers)
        }
    }

    /// Sets the redistribution out of the producers.
    pub fn with_upstream(mut self, config: RedistConfig) -> Self {
        self.upstream = config;
        self
    }

    /// Sets the redistribution into the consumers.
    pub fn with_downstream(mut self, config: RedistConfig) -> Self {
        self.downstream = config;
        self
    }

    fn validate(&self, config: &StreamConfig) -> StreamResult<()> {
        if self.producers.is_empty() || self.consumers.is_empty() {
            return Err(StreamError::Configuration(
                "a stream needs at least one producer and one consumer".to_string(),
            ));
        }
        if matches!(&self.link, Some(link) if link.is_empty()) {
            return Err(StreamError::Configuration("link stage without ranks".to_string()));
        }
        if config.stream == StreamPolicy::None {
            return Ok(());
        }
        if config.stream == StreamPolicy::Double && self.link.is_none() {
            return Err(StreamError::Configuration(
                "double feedback needs a link stage".to_string(),
            ));
        }
        if self.link.is_some() && config.storages.is_empty() {
            return Err(StreamError::Configuration(
                "stream flow control needs at least one storage tier".to_string(),
            ));
        }
        let link = self.link.as_deref().unwrap_or(&[]);
        let overlap = self
            .producers
            .iter()
            .find(|r| link.contains(r) || self.consumers.contains(r))
            .or_else(|| link.iter().find(|r| self.consumers.contains(r)));
        if let Some(rank) = overlap {
            return Err(StreamError::Configuration(format!(
                "rank {} holds two roles, flow-controlled streams need disjoint stages",
                rank
            )));
        }
        Ok(())
    }
}

/// Outcome of one link iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStep {
    /// A frame was forwarded downstream.
    Forwarded(FrameId),
    /// The quit record was forwarded; the link is done.
    Terminated,
}

struct Signals<T: Transport + ?Sized> {
    link_command: Option<OneWaySignal<T>>,
    consumer_link: Option<OneWaySignal<T>>,
    producer_group: Option<OneWaySignal<T>>,
    producer_link: Option<OneWaySignal<T>>,
    link_producer: Option<OneWaySignal<T>>,
    consumer_producer: Option<OneWaySignal<T>>,
}

impl<T: Transport + ?Sized> Default for Signals<T> {
    fn default() -> Self {
        Self {
            link_command: None,
            consumer_link: None,
            producer_group: None,
            producer_link: None,
            link_producer: None,
            consumer_producer: None,
        }
    }
}

/// One rank's endpoint of a stream.
pub struct StreamCoordinator<T: Transport + ?Sized, R: Record> {
    transport: Arc<T>,
    config: StreamConfig,
    topology: StreamTopology,
    upstream: Option<RedistributionChannel<T, R>>,
    downstream: Option<RedistributionChannel<T, R>>,
    frames: Option<Box<dyn FrameManager>>,
    storage: Option<StorageCollection<R>>,
    signals: Signals<T>,
    link_group: Option<Group>,
    producer_group: Option<Group>,
    next_frame_id: FrameId,
    first_iteration: bool,
    do_get: bool,
    pending_quit: Option<(FrameId, R)>,
    terminated: bool,
    forwarded: u64,
}

fn require<'a, S>(slot: &'a Option<S>, what: &str) -> StreamResult<&'a S> {
    slot.as_ref()
        .ok_or_else(|| StreamError::Configuration(format!("{} is not set up on this rank", what)))
}

async fn pause() {
    tokio::time::sleep(POLL_INTERVAL).await;
}

impl<T: Transport + ?Sized, R: Record> StreamCoordinator<T, R> {
    /// Sets up the local rank's part of stream `stream_id`. Every rank of
    /// the topology must create its coordinator with the same arguments.
    pub fn new(transport: Arc<T>, stream_id: u32, topology: StreamTopology, config: StreamConfig) -> StreamResult<Self> {
        config.validate()?;
        topology.validate(&config)?;
        let base = stream_id.checked_mul(CHANNELS_PER_STREAM).ok_or_else(|| {
            StreamError::Configuration(format!("stream id {} out of range", stream_id))
        })?;
        let me = transport.rank();
        let is_producer = topology.producers.contains(&me);
        let is_consumer = topology.consumers.contains(&me);
        let is_link = topology.link.as_ref().is_some_and(|l| l.contains(&me));
        let producer_root = topology.producers[0];
        let consumer_root = topology.consumers[0];

        let upstream_destinations = topology.link.clone().unwrap_or_else(|| topology.consumers.clone());
        let upstream = if is_producer || upstream_destinations.contains(&me) {
            Some(RedistributionChannel::new(
                transport.clone(),
                base + UPSTREAM,
                ChannelLayout::new(topology.producers.clone(), upstream_destinations),
                &topology.upstream,
            )?)
        } else {
            None
        };
        let downstream = match &topology.link {
            Some(link) if is_link || is_consumer => Some(RedistributionChannel::new(
                transport.clone(),
                base + DOWNSTREAM,
                ChannelLayout::new(link.clone(), topology.consumers.clone()),
                &topology.downstream,
            )?),
            _ => None,
        };

        let signal = |offset: u32, publisher: Rank, receivers: Vec<Rank>, initial: ChannelCommand| {
            (me == publisher || receivers.contains(&me))
                .then(|| OneWaySignal::new(transport.clone(), base + offset, publisher, receivers, initial.as_i64()))
        };

        let mut signals = Signals::default();
        let mut frames = None;
        let mut storage = None;
        let mut link_group = None;
        match (&topology.link, config.stream) {
            (_, StreamPolicy::None) => {}
            (None, StreamPolicy::Single) => {
                signals.producer_group = signal(
                    PRODUCER_GROUP,
                    producer_root,
                    topology.producers.clone(),
                    ChannelCommand::Wait,
                );
                signals.consumer_producer =
                    signal(CONSUMER_PRODUCER, consumer_root, vec![producer_root], ChannelCommand::Wait);
            }
            (Some(link), policy) => {
                let link_root = link[0];
                signals.link_command = signal(LINK_COMMAND, link_root, link.clone(), ChannelCommand::Wait);
                signals.consumer_link = signal(CONSUMER_LINK, consumer_root, vec![link_root], ChannelCommand::Wait);
                if policy == StreamPolicy::Double {
                    signals.producer_group = signal(
                        PRODUCER_GROUP,
                        producer_root,
                        topology.producers.clone(),
                        ChannelCommand::Wait,
                    );
                    signals.producer_link = signal(PRODUCER_LINK, producer_root, vec![link_root], ChannelCommand::Ok);
                    signals.link_producer = signal(LINK_PRODUCER, link_root, vec![producer_root], ChannelCommand::Wait);
                }
                if is_link {
                    let choice = OneWaySignal::new(transport.clone(), base + FRAME_CHOICE, link_root, link.clone(), NO_FRAME);
                    frames = Some(build_frame_manager(&config, Some(choice))?);
                    storage = Some(StorageCollection::from_config(&config, me)?);
                    link_group = Some(Group::new(base + LINK_BARRIER, link.clone()));
                }
            }
            (None, StreamPolicy::Double) => {
                return Err(StreamError::Configuration(
                    "double feedback needs a link stage".to_string(),
                ))
            }
        }
        if is_producer {
            frames = Some(build_frame_manager::<T>(&config, None)?);
        }
        let producer_group = (is_producer && config.stream == StreamPolicy::Double)
            .then(|| Group::new(base + PRODUCER_BARRIER, topology.producers.clone()));

        info!(
            rank = me,
            stream = stream_id,
            policy = ?config.stream,
            frame_policy = ?config.frame_policy,
            producer = is_producer,
            link = is_link,
            consumer = is_consumer,
            "stream endpoint created"
        );
        Ok(Self {
            transport,
            config,
            topology,
            upstream,
            downstream,
            frames,
            storage,
            signals,
            link_group,
            producer_group,
            next_frame_id: 0,
            first_iteration: true,
            do_get: true,
            pending_quit: None,
            terminated: false,
            forwarded: 0,
        })
    }

    fn rank(&self) -> Rank {
        self.transport.rank()
    }

    /// True on producer ranks.
    pub fn is_producer(&self) -> bool {
        self.topology.producers.contains(&self.rank())
    }

    /// True on link ranks.
    pub fn is_link(&self) -> bool {
        self.topology.link.as_ref().is_some_and(|l| l.contains(&self.rank()))
    }

    /// True on consumer ranks.
    pub fn is_consumer(&self) -> bool {
        self.topology.consumers.contains(&self.rank())
    }

    fn is_producer_root(&self) -> bool {
        self.topology.producers.first() == Some(&self.rank())
    }

    fn is_consumer_root(&self) -> bool {
        self.topology.consumers.first() == Some(&self.rank())
    }

    fn is_link_root(&self) -> bool {
        self.topology.link.as_ref().and_then(|l| l.first()) == Some(&self.rank())
    }

    /// True once the quit record has passed through this rank.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Frames forwarded by this link rank.
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    /// Link storage, on link ranks of flow-controlled streams.
    pub fn storage(&self) -> Option<&StorageCollection<R>> {
        self.storage.as_ref()
    }

    /// Writes the link storage to files and returns the manifest path.
    pub fn save_storage(&self) -> StreamResult<std::path::PathBuf> {
        require(&self.storage, "link storage")?.save(self.rank())
    }

    fn check_role(&self, holds: bool, role: &'static str) -> StreamResult<()> {
        if holds {
            Ok(())
        } else {
            Err(StreamError::WrongRole { rank: self.rank(), role })
        }
    }

    fn frames_mut(&mut self) -> StreamResult<&mut Box<dyn FrameManager>> {
        self.frames
            .as_mut()
            .ok_or_else(|| StreamError::Configuration("frame selection is not set up on this rank".to_string()))
    }

    fn storage_mut(&mut self) -> StreamResult<&mut StorageCollection<R>> {
        self.storage
            .as_mut()
            .ok_or_else(|| StreamError::Configuration("link storage is not set up on this rank".to_string()))
    }

    fn upstream_mut(&mut self) -> StreamResult<&mut RedistributionChannel<T, R>> {
        self.upstream
            .as_mut()
            .ok_or_else(|| StreamError::Configuration("upstream channel is not set up on this rank".to_string()))
    }

    fn downstream_mut(&mut self) -> StreamResult<&mut RedistributionChannel<T, R>> {
        self.downstream
            .as_mut()
            .ok_or_else(|| StreamError::Configuration("downstream channel is not set up on this rank".to_string()))
    }

    /// Sends one frame downstream. Returns false once the stream is closed.
    ///
    /// Frames the sampling policy skips are dropped here but still consume
    /// a frame id. The quit record is never skipped.
    pub async fn submit(&mut self, record: R) -> StreamResult<bool> {
        self.check_role(self.is_producer(), "producer")?;
        if self.terminated {
            return Ok(false);
        }
        let id = self.next_frame_id;
        self.next_frame_id += 1;
        let quit = record.is_quit();
        if !quit && !self.frames_mut()?.send_frame(id) {
            trace!(frame_id = id, "frame skipped by sampling");
            return Ok(true);
        }

        match (self.config.stream, self.topology.link.is_some()) {
            (StreamPolicy::Single, false) => self.wait_for_consumer().await?,
            (StreamPolicy::Double, _) => self.wait_for_link_grant().await?,
            _ => {}
        }

        self.upstream_mut()?.put(id, &record).await?;
        debug!(frame_id = id, quit = quit, "frame submitted");
        if quit {
            self.terminated = true;
            info!(rank = self.rank(), frame_id = id, "producer terminated");
        }
        Ok(true)
    }

    /// Sends the quit record downstream and releases local storage.
    pub async fn terminate(&mut self) -> StreamResult<()> {
        if self.is_producer() && !self.terminated {
            self.submit(R::quit()).await?;
        }
        if let Some(storage) = self.storage.as_mut() {
            storage.apply_command(FrameCommand::RemoveUpTo(FrameId::MAX));
        }
        self.pending_quit = None;
        self.terminated = true;
        Ok(())
    }

    async fn wait_for_consumer(&mut self) -> StreamResult<()> {
        let is_root = self.is_producer_root();
        loop {
            if is_root {
                let granted = if self.first_iteration {
                    self.first_iteration = false;
                    true
                } else {
                    require(&self.signals.consumer_producer, "consumer signal")?
                        .check_and_replace_command(ChannelCommand::Ok, ChannelCommand::Wait)
                };
                if granted {
                    require(&self.signals.producer_group, "producer signal")?
                        .send_command(ChannelCommand::Ok)
                        .await?;
                }
            }
            if require(&self.signals.producer_group, "producer signal")?
                .check_and_replace_command(ChannelCommand::Ok, ChannelCommand::Wait)
            {
                return Ok(());
            }
            pause().await;
        }
    }

    async fn wait_for_link_grant(&mut self) -> StreamResult<()> {
        let group_signal = require(&self.signals.producer_group, "producer signal")?;
        if self.is_producer_root() {
            let request = require(&self.signals.producer_link, "producer request signal")?;
            let grant = require(&self.signals.link_producer, "link grant signal")?;
            request.send_command(ChannelCommand::Wait).await?;
            while !grant.check_and_replace_command(ChannelCommand::Ok, ChannelCommand::Wait) {
                pause().await;
            }
            group_signal.send_command(ChannelCommand::Ok).await?;
        }
        require(&self.producer_group, "producer group")?
            .barrier(self.transport.as_ref())
            .await?;
        while !group_signal.check_and_replace_command(ChannelCommand::Ok, ChannelCommand::Wait) {
            pause().await;
        }
        Ok(())
    }

    /// Receives the next frame's payload, or `None` once upstream has terminated.
    pub async fn receive(&mut self) -> StreamResult<Option<R>> {
        Ok(self.receive_frame().await?.map(|frame| frame.payload))
    }

    /// Receives the next frame, or `None` once upstream has terminated.
    pub async fn receive_frame(&mut self) -> StreamResult<Option<Frame<R>>> {
        self.check_role(self.is_consumer(), "consumer")?;
        if self.terminated {
            return Ok(None);
        }
        if self.is_consumer_root() {
            let ready = match (self.config.stream, self.topology.link.is_some()) {
                (StreamPolicy::Single, true) if self.first_iteration => None,
                (StreamPolicy::Single, true) | (StreamPolicy::Double, _) => Some(&self.signals.consumer_link),
                (StreamPolicy::Single, false) => Some(&self.signals.consumer_producer),
                (StreamPolicy::None, _) => None,
            };
            if let Some(slot) = ready {
                require(slot, "consumer signal")?.send_command(ChannelCommand::Ok).await?;
            }
        }
        self.first_iteration = false;

        let channel = if self.downstream.is_some() {
            self.downstream_mut()?
        } else {
            self.upstream_mut()?
        };
        let Delivery { frame_id, record } = channel.get().await?;
        if record.is_quit() {
            self.terminated = true;
            info!(rank = self.rank(), frame_id = frame_id, "consumer reached end of stream");
            return Ok(None);
        }
        debug!(frame_id = frame_id, "frame received");
        Ok(Some(Frame {
            id: frame_id,
            payload: record,
        }))
    }

    /// Runs one link iteration: selects a frame according to the stream
    /// policy, applies `transform` to it and forwards it downstream. The
    /// quit record is forwarded untransformed.
    pub async fn link_step<F>(&mut self, mut transform: F) -> StreamResult<LinkStep>
    where
        F: FnMut(&mut R),
    {
        self.check_role(self.is_link(), "link")?;
        if self.terminated {
            return Ok(LinkStep::Terminated);
        }
        let (id, mut record) = match self.config.stream {
            StreamPolicy::None => {
                let delivery = self.upstream_mut()?.get().await?;
                (delivery.frame_id, delivery.record)
            }
            StreamPolicy::Single => self.single_feedback_select().await?,
            StreamPolicy::Double => self.double_feedback_select().await?,
        };
        let quit = record.is_quit();
        if !quit {
            transform(&mut record);
        }
        self.downstream_mut()?.put(id, &record).await?;
        self.forwarded += 1;
        if quit {
            self.terminated = true;
            info!(rank = self.rank(), frame_id = id, forwarded = self.forwarded, "link terminated");
            return Ok(LinkStep::Terminated);
        }
        debug!(frame_id = id, "frame forwarded");
        Ok(LinkStep::Forwarded(id))
    }

    /// Runs link iterations until the quit record has been forwarded and
    /// returns the number of frames forwarded, quit record included.
    pub async fn run_link<F>(&mut self, mut transform: F) -> StreamResult<u64>
    where
        F: FnMut(&mut R),
    {
        loop {
            if self.link_step(&mut transform).await? == LinkStep::Terminated {
                return Ok(self.forwarded);
            }
        }
    }

    /// Files an incoming frame. The quit record is held aside rather than
    /// stored, so a full storage can never refuse it.
    fn store(&mut self, delivery: Delivery<R>) -> StreamResult<()> {
        let Delivery { frame_id, record } = delivery;
        if record.is_quit() {
            self.do_get = false;
            debug!(frame_id = frame_id, "quit record held until the backlog drains");
            self.pending_quit = Some((frame_id, record));
            return Ok(());
        }
        let inserted = self.storage_mut()?.try_insert(frame_id, &record);
        match inserted {
            Ok(()) => self.frames_mut()?.put_frame(frame_id),
            Err(e) => warn!(frame_id = frame_id, error = %e, "frame dropped by link storage"),
        }
        Ok(())
    }

    /// Hands out the held quit record once no selectable frame is left.
    fn release_quit(&mut self) -> StreamResult<(FrameId, R)> {
        self.pending_quit.take().ok_or_else(|| {
            StreamError::Stalled("upstream terminated before the selected frame arrived".to_string())
        })
    }

    /// Pops the selected frame from storage, moving past frames that were
    /// evicted before their turn.
    fn take_selected(&mut self) -> StreamResult<(FrameId, R)> {
        loop {
            let (id, command) = self.frames_mut()?.get_next_frame()?;
            let storage = self.storage_mut()?;
            let data = storage.get_data(id);
            storage.apply_command(command);
            let evicted = matches!(data, Err(StreamError::FrameNotFound(_)));
            if evicted && self.frames_mut()?.has_next_frame() {
                warn!(frame_id = id, "frame evicted before it was forwarded");
                continue;
            }
            let record = data?;
            debug!(frame_id = id, command = ?command, "frame selected");
            return Ok((id, record));
        }
    }

    async fn single_feedback_select(&mut self) -> StreamResult<(FrameId, R)> {
        let is_root = self.is_link_root();
        loop {
            if is_root {
                let granted = if self.first_iteration {
                    self.first_iteration = false;
                    true
                } else {
                    require(&self.signals.consumer_link, "consumer signal")?
                        .check_and_replace_command(ChannelCommand::Ok, ChannelCommand::Wait)
                };
                if granted {
                    require(&self.signals.link_command, "link command signal")?
                        .send_command(ChannelCommand::Ok)
                        .await?;
                    self.frames_mut()?.compute_next_frame().await?;
                }
            }
            require(&self.link_group, "link group")?
                .barrier(self.transport.as_ref())
                .await?;
            let go = require(&self.signals.link_command, "link command signal")?
                .check_and_replace_command(ChannelCommand::Ok, ChannelCommand::Wait);
            if self.do_get {
                if let Some(delivery) = self.upstream_mut()?.try_get().await? {
                    self.store(delivery)?;
                }
            }
            if go {
                break;
            }
            pause().await;
        }

        while !self.frames_mut()?.has_next_frame() {
            if !self.do_get {
                return self.release_quit();
            }
            let delivery = self.upstream_mut()?.get().await?;
            self.store(delivery)?;
        }
        self.take_selected()
    }

    async fn double_feedback_select(&mut self) -> StreamResult<(FrameId, R)> {
        let is_root = self.is_link_root();
        require(&self.signals.link_command, "link command signal")?.update_self_command(ChannelCommand::Wait);
        loop {
            if is_root {
                self.double_feedback_decide().await?;
            }
            require(&self.link_group, "link group")?
                .barrier(self.transport.as_ref())
                .await?;
            let command = require(&self.signals.link_command, "link command signal")?.check();
            let mut selected = None;
            match ChannelCommand::from_i64(command) {
                Some(ChannelCommand::Get) => {
                    if self.do_get {
                        let delivery = self.upstream_mut()?.get().await?;
                        self.store(delivery)?;
                    }
                }
                Some(ChannelCommand::Put) => {
                    selected = Some(if self.frames_mut()?.has_next_frame() {
                        self.take_selected()?
                    } else {
                        self.release_quit()?
                    });
                }
                _ => {}
            }
            require(&self.signals.link_command, "link command signal")?.update_self_command(ChannelCommand::Wait);
            if let Some(selected) = selected {
                return Ok(selected);
            }
        }
    }

    /// Link root: waits until either the producer asks for a slot and
    /// storage has room, or storage holds frames (or the quit record) and
    /// the consumer is ready, then publishes `Get` or `Put` to the link group.
    async fn double_feedback_decide(&mut self) -> StreamResult<()> {
        loop {
            let (has_room, stored) = {
                let storage = require(&self.storage, "link storage")?;
                (self.do_get && !storage.is_full(), storage.len())
            };
            let commands = require(&self.signals.link_command, "link command signal")?;

            if has_room
                && require(&self.signals.producer_link, "producer request signal")?
                    .check_and_replace_command(ChannelCommand::Wait, ChannelCommand::Ok)
            {
                require(&self.signals.link_producer, "link grant signal")?
                    .send_command(ChannelCommand::Ok)
                    .await?;
                commands.send_command(ChannelCommand::Get).await?;
                trace!(stored = stored, "producer slot granted");
                return Ok(());
            }
            if stored > 0 || self.pending_quit.is_some() {
                if require(&self.signals.consumer_link, "consumer signal")?
                    .check_and_replace_command(ChannelCommand::Ok, ChannelCommand::Wait)
                {
                    commands.send_command(ChannelCommand::Put).await?;
                    self.frames_mut()?.compute_next_frame().await?;
                    trace!(stored = stored, "consumer request served");
                    return Ok(());
                }
            } else if !self.do_get {
                return Err(StreamError::Stalled(
                    "upstream terminated and link storage is empty".to_string(),
                ));
            }
            pause().await;
        }
    }
}
