//! Common test utilities for multi-rank stream tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sluice_redist::{Field, FieldRecord};
use sluice_stream::{FrameId, StreamConfig, StreamCoordinator, StreamTopology};
use sluice_transport::{LocalFabric, LocalTransport, Transport};
use tracing_subscriber::EnvFilter;

/// Installs a test subscriber honoring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Runs `body` once per rank of a fresh local fabric and collects the
/// results in rank order. Fails the test if the ranks do not finish
/// within 30 seconds.
pub async fn run_ranks<F, Fut, O>(size: u32, body: F) -> Vec<O>
where
    F: Fn(Arc<LocalTransport>) -> Fut,
    Fut: Future<Output = O> + Send + 'static,
    O: Send + 'static,
{
    init_tracing();
    let handles: Vec<_> = LocalFabric::create(size)
        .into_iter()
        .map(|t| tokio::spawn(body(t)))
        .collect();
    let joined = async {
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            out.push(handle.await.expect("rank task panicked"));
        }
        out
    };
    tokio::time::timeout(Duration::from_secs(30), joined)
        .await
        .expect("stream ranks did not finish")
}

/// Record for frame `frame` sent by producer `producer`: two items with
/// ids `frame * 100 + producer * 10` and the next one.
pub fn frame_record(frame: u32, producer: usize) -> FieldRecord {
    let first = frame as i64 * 100 + producer as i64 * 10;
    FieldRecord::new().with("id", Field::per_item_i64(1, vec![first, first + 1]))
}

/// Ids carried by a record, empty when it has none.
pub fn ids_of(record: &FieldRecord) -> Vec<i64> {
    record.i64_values("id").map(|v| v.to_vec()).unwrap_or_default()
}

/// What one rank observed while the stream ran.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Outcome {
    /// Frames received by a consumer, with their item ids.
    pub received: Vec<(FrameId, Vec<i64>)>,
    /// Frames forwarded by a link rank, quit record included.
    pub forwarded: u64,
}

/// Runs a whole stream: producers submit `frames` frames built by
/// [`frame_record`] and terminate, link ranks run until the quit record
/// passed applying `transform`, consumers receive until the end of the stream.
pub async fn run_stream_with(
    size: u32,
    topology: StreamTopology,
    config: StreamConfig,
    frames: u32,
    transform: fn(&mut FieldRecord),
) -> Vec<Outcome> {
    run_ranks(size, move |t| {
        let topology = topology.clone();
        let config = config.clone();
        async move {
            let mut stream: StreamCoordinator<LocalTransport, FieldRecord> =
                StreamCoordinator::new(t.clone(), 2, topology.clone(), config).unwrap();
            let mut outcome = Outcome::default();
            if let Some(index) = topology.producers.iter().position(|&r| r == t.rank()) {
                for frame in 0..frames {
                    assert!(stream.submit(frame_record(frame, index)).await.unwrap());
                }
                stream.terminate().await.unwrap();
            } else if stream.is_link() {
                outcome.forwarded = stream.run_link(transform).await.unwrap();
            } else if stream.is_consumer() {
                while let Some(frame) = stream.receive_frame().await.unwrap() {
                    let mut ids = ids_of(&frame.payload);
                    ids.sort_unstable();
                    outcome.received.push((frame.id, ids));
                }
                assert!(stream.is_terminated());
            }
            outcome
        }
    })
    .await
}

/// [`run_stream_with`] with links forwarding frames unchanged.
pub async fn run_stream(size: u32, topology: StreamTopology, config: StreamConfig, frames: u32) -> Vec<Outcome> {
    run_stream_with(size, topology, config, frames, |_| {}).await
}

/// Item ids all producers send for `frame`, sorted.
pub fn expected_ids(frame: u32, producers: usize) -> Vec<i64> {
    let mut ids: Vec<i64> = (0..producers).flat_map(|p| ids_of(&frame_record(frame, p))).collect();
    ids.sort_unstable();
    ids
}
