//! Multi-rank stream scenarios on an in-process fabric.

mod common;

use common::{expected_ids, frame_record, ids_of, run_ranks, run_stream, run_stream_with};
use sluice_redist::{Field, FieldRecord};
use sluice_stream::{
    FileTier, FramePolicy, StorageCollection, StorageTier, StreamConfig, StreamCoordinator, StreamPolicy,
    StreamTopology, TierConfig, TierKind,
};
use sluice_transport::{LocalFabric, LocalTransport, Transport};

fn flow(stream: StreamPolicy, frame_policy: FramePolicy, capacity: usize) -> StreamConfig {
    StreamConfig {
        stream,
        frame_policy,
        storages: vec![TierConfig::memory(capacity)],
        ..Default::default()
    }
}

fn shift_ids(record: &mut FieldRecord) {
    let shifted: Vec<i64> = ids_of(record).into_iter().map(|id| id + 1000).collect();
    record.insert("id", Field::per_item_i64(1, shifted));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_plain_direct_stream() {
    let topology = StreamTopology::direct(vec![0, 1], vec![2]);
    let out = run_stream(3, topology, StreamConfig::default(), 5).await;
    let expected: Vec<_> = (0..5).map(|f| (f, expected_ids(f, 2))).collect();
    assert_eq!(out[2].received, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_plain_linked_stream_applies_transform() {
    let topology = StreamTopology::linked(vec![0], vec![1, 2], vec![3]);
    let out = run_stream_with(4, topology, StreamConfig::default(), 5, shift_ids).await;
    assert_eq!(out[1].forwarded, 6);
    assert_eq!(out[2].forwarded, 6);
    let expected: Vec<_> = (0..5)
        .map(|f| (f, expected_ids(f, 1).into_iter().map(|id| id + 1000).collect::<Vec<i64>>()))
        .collect();
    assert_eq!(out[3].received, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_feedback_without_link() {
    let config = StreamConfig {
        stream: StreamPolicy::Single,
        ..Default::default()
    };
    let topology = StreamTopology::direct(vec![0, 1], vec![2]);
    let out = run_stream(3, topology, config, 6).await;
    let expected: Vec<_> = (0..6).map(|f| (f, expected_ids(f, 2))).collect();
    assert_eq!(out[2].received, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_feedback_sequential_link() {
    let config = flow(StreamPolicy::Single, FramePolicy::Seq, 64);
    let topology = StreamTopology::linked(vec![0], vec![1, 2], vec![3]);
    let out = run_stream(4, topology, config, 8).await;
    let expected: Vec<_> = (0..8).map(|f| (f, expected_ids(f, 1))).collect();
    assert_eq!(out[3].received, expected);
    assert_eq!(out[1].forwarded, 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_full_link_storage_still_forwards_quit() {
    let config = flow(StreamPolicy::Single, FramePolicy::Seq, 1);
    let out = run_ranks(3, move |t| {
        let config = config.clone();
        async move {
            let topology = StreamTopology::linked(vec![0], vec![1], vec![2]);
            let mut stream: StreamCoordinator<LocalTransport, FieldRecord> =
                StreamCoordinator::new(t.clone(), 2, topology, config).unwrap();
            let mut ids = Vec::new();
            match t.rank() {
                0 => {
                    for frame in 0..5 {
                        assert!(stream.submit(frame_record(frame, 0)).await.unwrap());
                    }
                    stream.terminate().await.unwrap();
                }
                1 => {
                    let forwarded = stream.run_link(|_| {}).await.unwrap();
                    assert!(forwarded >= 2, "only {} forwarded", forwarded);
                }
                _ => loop {
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    match stream.receive_frame().await.unwrap() {
                        Some(frame) => ids.push(frame.id),
                        None => {
                            assert!(stream.is_terminated());
                            break;
                        }
                    }
                },
            }
            ids
        }
    })
    .await;
    assert!(!out[2].is_empty());
    assert!(out[2].windows(2).all(|w| w[0] < w[1]), "not increasing: {:?}", out[2]);
    assert!(out[2].iter().all(|&id| id < 5));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_most_recent_sampling() {
    let config = StreamConfig {
        prod_freq_output: 2,
        ..flow(StreamPolicy::Single, FramePolicy::Recent, 64)
    };
    let topology = StreamTopology::linked(vec![0], vec![1, 2], vec![3]);
    let out = run_stream(4, topology, config, 10).await;

    let ids: Vec<u32> = out[3].received.iter().map(|(id, _)| *id).collect();
    assert!(!ids.is_empty());
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "not increasing: {:?}", ids);
    assert!(ids.iter().all(|id| [0, 2, 4, 6, 8].contains(id)), "unexpected frames: {:?}", ids);
    for (id, items) in &out[3].received {
        assert_eq!(items, &expected_ids(*id, 1));
    }
    assert_eq!(out[1].forwarded, out[2].forwarded);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_double_feedback_delivers_everything() {
    let config = flow(StreamPolicy::Double, FramePolicy::Seq, 2);
    let topology = StreamTopology::linked(vec![0, 1], vec![2], vec![3]);
    let out = run_stream(4, topology, config, 8).await;
    let expected: Vec<_> = (0..8).map(|f| (f, expected_ids(f, 2))).collect();
    assert_eq!(out[3].received, expected);
    assert_eq!(out[2].forwarded, 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_double_feedback_low_high_visits_every_window() {
    let config = StreamConfig {
        low_frequency: 4,
        high_frequency: 2,
        ..flow(StreamPolicy::Double, FramePolicy::LowHigh, 3)
    };
    let topology = StreamTopology::linked(vec![0, 1], vec![2, 3], vec![4]);
    let out = run_stream(5, topology, config, 12).await;

    let ids: Vec<u32> = out[4].received.iter().map(|(id, _)| *id).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "not increasing: {:?}", ids);
    assert!(ids.iter().all(|id| id % 2 == 0), "unsampled frame forwarded: {:?}", ids);
    for window in 0..3 {
        assert!(ids.iter().any(|id| id / 4 == window), "window {} skipped: {:?}", window, ids);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_consumer_sees_end_of_stream_once_terminated() {
    let out = run_ranks(2, |t| async move {
        let topology = StreamTopology::direct(vec![0], vec![1]);
        let mut stream: StreamCoordinator<LocalTransport, FieldRecord> =
            StreamCoordinator::new(t.clone(), 0, topology, StreamConfig::default()).unwrap();
        if stream.is_producer() {
            stream.submit(frame_record(0, 0)).await.unwrap();
            stream.terminate().await.unwrap();
            assert!(!stream.submit(frame_record(1, 0)).await.unwrap());
            Vec::new()
        } else {
            let mut seen = Vec::new();
            while let Some(record) = stream.receive().await.unwrap() {
                seen.push(ids_of(&record));
            }
            assert!(stream.receive().await.unwrap().is_none());
            seen
        }
    })
    .await;
    assert_eq!(out[1], vec![vec![0, 1]]);
}

#[tokio::test]
async fn test_link_storage_save_and_restore() {
    let dir = tempfile::tempdir().unwrap();
    let config = StreamConfig {
        storage_folder: Some(dir.path().to_path_buf()),
        storages: vec![TierConfig::memory(2), TierConfig::file(4)],
        ..flow(StreamPolicy::Single, FramePolicy::Seq, 1)
    };
    let transports = LocalFabric::create(3);
    let topology = StreamTopology::linked(vec![0], vec![1], vec![2]);
    let link: StreamCoordinator<LocalTransport, FieldRecord> =
        StreamCoordinator::new(transports[1].clone(), 0, topology, config.clone()).unwrap();
    let storage = link.storage().unwrap();
    assert_eq!(storage.tier_count(), 2);
    assert!(storage.is_empty());

    let manifest = link.save_storage().unwrap();
    assert!(manifest.exists());
    assert!(link.save_storage().is_err());

    let mut collection: StorageCollection<FieldRecord> = StorageCollection::from_config(&config, 7).unwrap();
    for id in 0..4 {
        assert!(collection.insert(id, &frame_record(id, 0)));
    }
    let manifest = collection.save(7).unwrap();

    let mut restored = FileTier::<FieldRecord>::new(8, 7, dir.path());
    assert_eq!(restored.restore(&manifest).unwrap(), 4);
    assert_eq!(restored.kind(), TierKind::File);
    assert_eq!(ids_of(&restored.get(3).unwrap()), ids_of(&frame_record(3, 0)));
}
