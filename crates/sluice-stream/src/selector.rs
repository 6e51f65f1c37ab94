//! Frame selection on the link stage.
//!
//! Producers only ask [`FrameManager::send_frame`] whether to emit a frame
//! at all. Link ranks run the full cycle once per forward:
//! `put_frame` for every arrival, then `compute_next_frame` on the
//! coordinating rank, then `has_next_frame` until the chosen frame is
//! local, then `get_next_frame` for the id and the retention command.
//!
//! Policies that choose among several candidates publish the choice from
//! the coordinating rank through a [`OneWaySignal`], so every link rank
//! forwards the same frame. A choice is a lower bound: each rank forwards
//! its oldest frame at or above it, which is the chosen frame itself on
//! every rank that already holds it.

use std::collections::VecDeque;

use async_trait::async_trait;
use sluice_transport::{OneWaySignal, Transport};
use tracing::{debug, warn};

use crate::config::{FramePolicy, StreamConfig};
use crate::error::{StreamError, StreamResult};
use crate::frame::{FrameCommand, FrameId};

/// Slot value meaning no frame has been chosen yet.
pub const NO_FRAME: i64 = -1;

/// Frame selection state machine.
#[async_trait]
pub trait FrameManager: Send + Sync {
    /// Producer side: whether frame `id` is emitted at all.
    fn send_frame(&self, id: FrameId) -> bool;

    /// Records the arrival of frame `id`.
    fn put_frame(&mut self, id: FrameId);

    /// True once the coordinating rank has chosen the next frame.
    fn has_next_frame_id(&mut self) -> bool;

    /// Chooses the next frame. A no-op on ranks that do not coordinate.
    async fn compute_next_frame(&mut self) -> StreamResult<()>;

    /// True when the chosen frame is available locally.
    fn has_next_frame(&mut self) -> bool;

    /// Consumes the chosen frame and returns its id with the retention
    /// command for storage.
    fn get_next_frame(&mut self) -> StreamResult<(FrameId, FrameCommand)>;

    /// True on the rank that makes the choice.
    fn is_coordinator(&self) -> bool;

    /// Frames waiting to be forwarded.
    fn backlog_len(&self) -> usize;
}

/// Forwards every frame in arrival order.
#[derive(Debug)]
pub struct SequentialFrames {
    prod_freq: u32,
    backlog: VecDeque<FrameId>,
}

impl SequentialFrames {
    /// Samples every `prod_freq`-th frame on the producer side.
    pub fn new(prod_freq: u32) -> Self {
        Self {
            prod_freq: prod_freq.max(1),
            backlog: VecDeque::new(),
        }
    }
}

#[async_trait]
impl FrameManager for SequentialFrames {
    fn send_frame(&self, id: FrameId) -> bool {
        id % self.prod_freq == 0
    }

    fn put_frame(&mut self, id: FrameId) {
        self.backlog.push_back(id);
    }

    fn has_next_frame_id(&mut self) -> bool {
        !self.backlog.is_empty()
    }

    async fn compute_next_frame(&mut self) -> StreamResult<()> {
        Ok(())
    }

    fn has_next_frame(&mut self) -> bool {
        !self.backlog.is_empty()
    }

    fn get_next_frame(&mut self) -> StreamResult<(FrameId, FrameCommand)> {
        let id = self.backlog.pop_front().ok_or_else(|| {
            StreamError::Configuration("next frame requested with an empty backlog".to_string())
        })?;
        Ok((id, FrameCommand::RemoveOne(id)))
    }

    fn is_coordinator(&self) -> bool {
        true
    }

    fn backlog_len(&self) -> usize {
        self.backlog.len()
    }
}

enum Decision<T: Transport + ?Sized> {
    Local(i64),
    Shared(OneWaySignal<T>),
}

impl<T: Transport + ?Sized> Decision<T> {
    fn is_coordinator(&self) -> bool {
        match self {
            Decision::Local(_) => true,
            Decision::Shared(signal) => signal.is_publisher(),
        }
    }

    async fn publish(&mut self, value: i64) -> StreamResult<()> {
        match self {
            Decision::Local(slot) => *slot = value,
            Decision::Shared(signal) => signal.publish(value).await?,
        }
        Ok(())
    }

    fn current(&self) -> i64 {
        match self {
            Decision::Local(slot) => *slot,
            Decision::Shared(signal) => signal.check(),
        }
    }
}

/// Backlog shared by the policies that choose among candidates.
struct Backlog<T: Transport + ?Sized> {
    ids: VecDeque<FrameId>,
    previous: Option<FrameId>,
    consumed: i64,
    chosen: Option<FrameId>,
    decision: Decision<T>,
}

impl<T: Transport + ?Sized> Backlog<T> {
    fn new(signal: Option<OneWaySignal<T>>) -> Self {
        let decision = match signal {
            Some(signal) => {
                signal.update_self(NO_FRAME);
                Decision::Shared(signal)
            }
            None => Decision::Local(NO_FRAME),
        };
        Self {
            ids: VecDeque::new(),
            previous: None,
            consumed: NO_FRAME,
            chosen: None,
            decision,
        }
    }

    fn put(&mut self, id: FrameId) {
        let newer_than_backlog = self.ids.back().map_or(true, |&b| id > b);
        let newer_than_forwarded = self.previous.map_or(true, |p| id > p);
        if newer_than_backlog && newer_than_forwarded {
            self.ids.push_back(id);
        } else {
            warn!(frame_id = id, "out-of-order frame ignored by selector");
        }
    }

    fn after_previous(&self) -> FrameId {
        self.previous.map_or(0, |p| p + 1)
    }

    fn has_next_frame_id(&mut self) -> bool {
        if self.chosen.is_none() {
            let value = self.decision.current();
            if value != self.consumed && value >= 0 {
                self.chosen = Some(value as FrameId);
            }
        }
        self.chosen.is_some()
    }

    fn has_next_frame(&mut self) -> bool {
        if !self.has_next_frame_id() {
            return false;
        }
        match self.chosen {
            Some(chosen) => self.ids.iter().any(|&id| id >= chosen),
            None => false,
        }
    }

    async fn offer(&mut self, id: FrameId) -> StreamResult<()> {
        debug!(frame_id = id, backlog = self.ids.len(), "next frame chosen");
        self.decision.publish(i64::from(id)).await
    }

    /// Pops the frame to forward and everything older.
    fn take(&mut self) -> StreamResult<FrameId> {
        if !self.has_next_frame() {
            return Err(StreamError::FrameNotFound(self.chosen.unwrap_or_else(|| self.after_previous())));
        }
        let chosen = self.chosen.take().unwrap_or_default();
        let id = self
            .ids
            .iter()
            .copied()
            .find(|&id| id >= chosen)
            .unwrap_or(chosen);
        while self.ids.front().is_some_and(|&front| front <= id) {
            self.ids.pop_front();
        }
        self.previous = Some(id);
        self.consumed = i64::from(chosen);
        Ok(id)
    }
}

/// Forwards the newest frame available, dropping older ones.
pub struct MostRecentFrames<T: Transport + ?Sized> {
    prod_freq: u32,
    backlog: Backlog<T>,
}

impl<T: Transport + ?Sized> MostRecentFrames<T> {
    /// Creates a selector. Without a signal the rank decides alone.
    pub fn new(prod_freq: u32, signal: Option<OneWaySignal<T>>) -> Self {
        Self {
            prod_freq: prod_freq.max(1),
            backlog: Backlog::new(signal),
        }
    }

    /// Last forwarded frame.
    pub fn previous(&self) -> Option<FrameId> {
        self.backlog.previous
    }
}

#[async_trait]
impl<T: Transport + ?Sized> FrameManager for MostRecentFrames<T> {
    fn send_frame(&self, id: FrameId) -> bool {
        id % self.prod_freq == 0
    }

    fn put_frame(&mut self, id: FrameId) {
        self.backlog.put(id);
    }

    fn has_next_frame_id(&mut self) -> bool {
        self.backlog.has_next_frame_id()
    }

    async fn compute_next_frame(&mut self) -> StreamResult<()> {
        if !self.backlog.decision.is_coordinator() {
            return Ok(());
        }
        let next = match (self.backlog.ids.back(), self.backlog.previous) {
            (Some(&newest), Some(previous)) if newest > previous => newest,
            (Some(&newest), None) => newest,
            _ => self.backlog.after_previous(),
        };
        self.backlog.offer(next).await
    }

    fn has_next_frame(&mut self) -> bool {
        self.backlog.has_next_frame()
    }

    fn get_next_frame(&mut self) -> StreamResult<(FrameId, FrameCommand)> {
        let id = self.backlog.take()?;
        Ok((id, FrameCommand::RemoveUpTo(id)))
    }

    fn is_coordinator(&self) -> bool {
        self.backlog.decision.is_coordinator()
    }

    fn backlog_len(&self) -> usize {
        self.backlog.ids.len()
    }
}

/// Forwards at least one frame per low-frequency window and catches up
/// within a window while the consumer keeps pace.
///
/// When the newest frame has left the window of the last forward, the
/// oldest later frame on a window boundary (`id % low_freq == 0`) is taken,
/// or the oldest frame of a later window when no boundary frame arrived.
pub struct LowHighFrames<T: Transport + ?Sized> {
    low_freq: u32,
    high_freq: u32,
    backlog: Backlog<T>,
}

impl<T: Transport + ?Sized> LowHighFrames<T> {
    /// Creates a selector. `low_freq` must be greater than `high_freq`.
    pub fn new(low_freq: u32, high_freq: u32, signal: Option<OneWaySignal<T>>) -> StreamResult<Self> {
        if high_freq == 0 || low_freq <= high_freq {
            return Err(StreamError::Configuration(format!(
                "low frequency {} must be greater than high frequency {}",
                low_freq, high_freq
            )));
        }
        Ok(Self {
            low_freq,
            high_freq,
            backlog: Backlog::new(signal),
        })
    }

    fn window(&self, id: FrameId) -> FrameId {
        id / self.low_freq
    }
}

#[async_trait]
impl<T: Transport + ?Sized> FrameManager for LowHighFrames<T> {
    fn send_frame(&self, id: FrameId) -> bool {
        id % self.high_freq == 0
    }

    fn put_frame(&mut self, id: FrameId) {
        self.backlog.put(id);
    }

    fn has_next_frame_id(&mut self) -> bool {
        self.backlog.has_next_frame_id()
    }

    async fn compute_next_frame(&mut self) -> StreamResult<()> {
        if !self.backlog.decision.is_coordinator() {
            return Ok(());
        }
        let ids = &self.backlog.ids;
        let next = match (ids.front(), ids.back(), self.backlog.previous) {
            (None, _, _) | (_, None, _) => self.backlog.after_previous(),
            (Some(&oldest), Some(_), None) => oldest,
            (Some(_), Some(&newest), Some(previous)) => {
                let previous_window = self.window(previous);
                if self.window(newest) == previous_window {
                    newest
                } else {
                    let low = self.low_freq;
                    let later: Vec<FrameId> = ids.iter().copied().filter(|&id| id / low > previous_window).collect();
                    later
                        .iter()
                        .copied()
                        .find(|&id| id % low == 0)
                        .or_else(|| later.first().copied())
                        .unwrap_or(newest)
                }
            }
        };
        self.backlog.offer(next).await
    }

    fn has_next_frame(&mut self) -> bool {
        self.backlog.has_next_frame()
    }

    fn get_next_frame(&mut self) -> StreamResult<(FrameId, FrameCommand)> {
        let id = self.backlog.take()?;
        Ok((id, FrameCommand::RemoveUpTo(id)))
    }

    fn is_coordinator(&self) -> bool {
        self.backlog.decision.is_coordinator()
    }

    fn backlog_len(&self) -> usize {
        self.backlog.ids.len()
    }
}

/// Builds the selector named by `config`. Link ranks pass the signal that
/// carries the coordinator's choice; producers pass `None`.
pub fn build_frame_manager<T: Transport + ?Sized>(
    config: &StreamConfig,
    signal: Option<OneWaySignal<T>>,
) -> StreamResult<Box<dyn FrameManager>> {
    let manager: Box<dyn FrameManager> = match config.frame_policy {
        FramePolicy::None | FramePolicy::Seq => Box::new(SequentialFrames::new(config.prod_freq_output)),
        FramePolicy::Recent => Box::new(MostRecentFrames::new(config.prod_freq_output, signal)),
        FramePolicy::LowHigh => Box::new(LowHighFrames::new(
            config.low_frequency,
            config.high_frequency,
            signal,
        )?),
    };
    Ok(manager)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_transport::{LocalFabric, LocalTransport};

    fn recent(prod_freq: u32) -> MostRecentFrames<LocalTransport> {
        MostRecentFrames::new(prod_freq, None)
    }

    fn low_high(low: u32, high: u32) -> LowHighFrames<LocalTransport> {
        LowHighFrames::new(low, high, None).unwrap()
    }

    async fn forward(manager: &mut dyn FrameManager) -> Option<(FrameId, FrameCommand)> {
        manager.compute_next_frame().await.unwrap();
        if manager.has_next_frame() {
            Some(manager.get_next_frame().unwrap())
        } else {
            None
        }
    }

    #[tokio::test]
    async fn test_sequential_fifo() {
        let mut m = SequentialFrames::new(3);
        assert!(m.send_frame(0));
        assert!(!m.send_frame(1));
        assert!(m.send_frame(6));
        assert!(!m.has_next_frame());
        m.put_frame(0);
        m.put_frame(3);
        assert_eq!(forward(&mut m).await, Some((0, FrameCommand::RemoveOne(0))));
        assert_eq!(forward(&mut m).await, Some((3, FrameCommand::RemoveOne(3))));
        assert_eq!(forward(&mut m).await, None);
        assert!(m.get_next_frame().is_err());
    }

    #[tokio::test]
    async fn test_most_recent_skips_to_newest() {
        let mut m = recent(1);
        for id in 0..4 {
            m.put_frame(id);
        }
        assert_eq!(forward(&mut m).await, Some((3, FrameCommand::RemoveUpTo(3))));
        assert_eq!(m.backlog_len(), 0);
        // Nothing new: waits for the next frame instead of repeating.
        assert_eq!(forward(&mut m).await, None);
        m.put_frame(4);
        assert!(m.has_next_frame());
        assert_eq!(m.get_next_frame().unwrap(), (4, FrameCommand::RemoveUpTo(4)));
    }

    #[tokio::test]
    async fn test_most_recent_waiting_choice_accepts_later_frame() {
        let mut m = recent(2);
        m.put_frame(0);
        assert_eq!(forward(&mut m).await.map(|f| f.0), Some(0));
        m.compute_next_frame().await.unwrap();
        assert!(m.has_next_frame_id());
        assert!(!m.has_next_frame());
        m.put_frame(2);
        assert_eq!(m.get_next_frame().unwrap().0, 2);
        assert_eq!(m.previous(), Some(2));
    }

    #[tokio::test]
    async fn test_low_high_rejects_inverted_frequencies() {
        assert!(LowHighFrames::<LocalTransport>::new(2, 4, None).is_err());
        assert!(LowHighFrames::<LocalTransport>::new(4, 4, None).is_err());
        assert!(LowHighFrames::<LocalTransport>::new(4, 0, None).is_err());
    }

    #[tokio::test]
    async fn test_low_high_visits_every_window() {
        let mut m = low_high(4, 1);
        for id in [0, 1, 2, 5, 6, 9] {
            m.put_frame(id);
        }
        // First forward takes the oldest frame.
        assert_eq!(forward(&mut m).await.map(|f| f.0), Some(0));
        // Newest (9) is in a later window, so jump to the oldest frame of the next one.
        assert_eq!(forward(&mut m).await.map(|f| f.0), Some(5));
        assert_eq!(forward(&mut m).await.map(|f| f.0), Some(9));
        assert_eq!(m.backlog_len(), 0);
    }

    #[tokio::test]
    async fn test_low_high_prefers_window_boundary() {
        let mut m = low_high(4, 1);
        m.put_frame(0);
        assert_eq!(forward(&mut m).await.map(|f| f.0), Some(0));
        for id in [5, 8, 9] {
            m.put_frame(id);
        }
        assert_eq!(forward(&mut m).await, Some((8, FrameCommand::RemoveUpTo(8))));
        assert_eq!(forward(&mut m).await.map(|f| f.0), Some(9));
    }

    #[tokio::test]
    async fn test_low_high_catches_up_within_window() {
        let mut m = low_high(10, 2);
        m.put_frame(0);
        assert_eq!(forward(&mut m).await.map(|f| f.0), Some(0));
        m.put_frame(2);
        m.put_frame(4);
        assert_eq!(forward(&mut m).await, Some((4, FrameCommand::RemoveUpTo(4))));
        assert!(m.send_frame(4));
        assert!(!m.send_frame(5));
    }

    #[tokio::test]
    async fn test_shared_choice_reaches_other_link_ranks() {
        let ranks = LocalFabric::create(2);
        let signals: Vec<_> = ranks
            .iter()
            .map(|t| OneWaySignal::new(t.clone(), 40, 0, vec![0, 1], NO_FRAME))
            .collect();
        let mut managers: Vec<MostRecentFrames<LocalTransport>> =
            signals.into_iter().map(|s| MostRecentFrames::new(1, Some(s))).collect();
        assert!(managers[0].is_coordinator());
        assert!(!managers[1].is_coordinator());

        for m in managers.iter_mut() {
            m.put_frame(0);
            m.put_frame(1);
        }
        // Only the coordinator chooses.
        managers[1].compute_next_frame().await.unwrap();
        assert!(!managers[1].has_next_frame_id());
        managers[0].compute_next_frame().await.unwrap();
        for m in managers.iter_mut() {
            assert!(m.has_next_frame());
            assert_eq!(m.get_next_frame().unwrap().0, 1);
            assert!(!m.has_next_frame_id());
        }
    }

    #[test]
    fn test_build_from_config() {
        let config = StreamConfig {
            frame_policy: FramePolicy::LowHigh,
            low_frequency: 3,
            high_frequency: 5,
            ..Default::default()
        };
        assert!(build_frame_manager::<LocalTransport>(&config, None).is_err());
        let config = StreamConfig {
            frame_policy: FramePolicy::Recent,
            prod_freq_output: 2,
            ..Default::default()
        };
        let manager = build_frame_manager::<LocalTransport>(&config, None).unwrap();
        assert!(manager.send_frame(4));
        assert!(!manager.send_frame(5));
    }
}
