use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use tgarchive_core::{
    Fields, InvalidationPolicy, Observation, PeerKind, Snapshot, StreamKey, Timestamp, UserFields,
    is_changed,
};
use tgarchive_infra::recorder::SnapshotRecorder;
use tgarchive_infra::snapshot_store::{InMemorySnapshotStore, SqliteSnapshotStore};

fn user(id: i64, at: i64, name: &str) -> Observation {
    Observation::peer(
        PeerKind::User,
        id,
        Timestamp::from_secs(at),
        Fields::User(UserFields {
            first_name: Some(name.to_string()),
            last_name: Some("Benchmark".to_string()),
            username: Some(format!("user{id}")),
            common_chats_count: Some(3),
            ..Default::default()
        }),
    )
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
}

fn bench_comparator(c: &mut Criterion) {
    let previous = user(1, 0, "Ann").into_snapshot().expect("valid id");
    let same = user(1, 60, "Ann").into_snapshot().expect("valid id");
    let renamed = user(1, 60, "Anna").into_snapshot().expect("valid id");

    let mut group = c.benchmark_group("comparator");
    group.bench_function("unchanged", |b| {
        b.iter(|| is_changed(black_box(Some(&previous)), black_box(&same)))
    });
    group.bench_function("changed", |b| {
        b.iter(|| is_changed(black_box(Some(&previous)), black_box(&renamed)))
    });
    group.finish();
}

/// Steady state of a polling run: the entity exists and is unchanged.
fn bench_record_skip(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("record_unchanged");

    let memory = SnapshotRecorder::new(InMemorySnapshotStore::new(), InvalidationPolicy::default());
    rt.block_on(memory.record(user(1, 0, "Ann"))).expect("seed");
    group.bench_function("memory", |b| {
        b.to_async(&rt)
            .iter(|| async { memory.record(user(1, 60, "Ann")).await.expect("record") })
    });

    let sqlite = rt.block_on(async {
        let store = SqliteSnapshotStore::in_memory().await.expect("sqlite");
        let recorder = SnapshotRecorder::new(store, InvalidationPolicy::default());
        recorder.record(user(1, 0, "Ann")).await.expect("seed");
        recorder
    });
    group.bench_function("sqlite", |b| {
        b.to_async(&rt)
            .iter(|| async { sqlite.record(user(1, 60, "Ann")).await.expect("record") })
    });

    group.finish();
}

/// First observation of many distinct users in one batch.
fn bench_batch_throughput(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("record_batch");

    for batch_size in [100usize, 1_000] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("sqlite", batch_size),
            &batch_size,
            |b, &batch_size| {
                b.to_async(&rt).iter(|| async move {
                    let store = SqliteSnapshotStore::in_memory().await.expect("sqlite");
                    let recorder =
                        Arc::new(SnapshotRecorder::new(store, InvalidationPolicy::default()));
                    let observations =
                        (1..=batch_size as i64).map(|id| user(id, 0, "Ann")).collect();
                    let report = recorder.record_batch(observations).await;
                    assert_eq!(report.written(), batch_size);
                })
            },
        );
    }

    group.finish();
}

/// Indexed latest-row lookup against a long history.
fn bench_latest_lookup(c: &mut Criterion) {
    let rt = runtime();
    let key = StreamKey::peer(PeerKind::User, 1).expect("valid id");
    let store = rt.block_on(async {
        let store = SqliteSnapshotStore::in_memory().await.expect("sqlite");
        for at in 0..5_000i64 {
            let snapshot: Snapshot = user(1, at, &format!("name {at}"))
                .into_snapshot()
                .expect("valid id");
            store.append_snapshot(&snapshot).await.expect("append");
        }
        store
    });

    c.bench_function("latest_with_5000_rows", |b| {
        b.to_async(&rt)
            .iter(|| async { store.load_latest(black_box(&key)).await.expect("latest") })
    });
}

criterion_group!(
    benches,
    bench_comparator,
    bench_record_skip,
    bench_batch_throughput,
    bench_latest_lookup
);
criterion_main!(benches);
