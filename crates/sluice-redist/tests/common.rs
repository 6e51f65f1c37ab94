//! Common test utilities for multi-rank redistribution tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;

use sluice_redist::{Field, FieldRecord};
use sluice_transport::{LocalFabric, LocalTransport};
use tracing_subscriber::EnvFilter;

/// Installs a test subscriber honoring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Runs `body` once per rank of a fresh local fabric and collects the results in rank order.
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
    let mut out = Vec::with_capacity(handles.len());
    for handle in handles {
        out.push(handle.await.expect("rank task panicked"));
    }
    out
}

/// Record holding global item ids `start..start + count`, with positions
/// spread along x so spatial strategies have something to sort.
pub fn items(start: i64, count: i64) -> FieldRecord {
    let ids: Vec<i64> = (start..start + count).collect();
    let pos = ids.iter().flat_map(|&i| [i as f32 + 0.5, 0.5, 0.5]).collect();
    FieldRecord::new()
        .with("id", Field::per_item_i64(1, ids))
        .with("pos", Field::per_item_f32(3, pos))
}

/// Ids carried by a record, empty when it has none.
pub fn ids_of(record: &FieldRecord) -> Vec<i64> {
    record.i64_values("id").map(|v| v.to_vec()).unwrap_or_default()
}
