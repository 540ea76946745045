//! Worker pool and worker channel behavior across real worker threads.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use statekeep_core::{Packet, Payload, Signal, Value, DEFAULT_STATE_KEY};
use statekeep_persist::{MemoryEngine, PersistError, PoolOptions, WorkerPool};

fn pool(size: i64, lazy: bool) -> WorkerPool {
    WorkerPool::new(
        size,
        Arc::new(MemoryEngine::new()),
        PoolOptions {
            lazy,
            request_timeout: Duration::from_secs(5),
            ..PoolOptions::default()
        },
    )
    .unwrap()
}

#[tokio::test]
async fn concurrent_double_init_yields_one_success_and_one_failure() {
    let pool = pool(1, true);
    let worker = pool.assign_worker().unwrap();

    let (first, second) = tokio::join!(
        worker.request(Packet::init("cart")),
        worker.request(Packet::init("cart")),
    );
    let mut headers = [first.unwrap().header, second.unwrap().header];
    headers.sort_by_key(|h| u8::from(*h));
    assert_eq!(headers, [Signal::InitSuccess, Signal::InitFailure]);
    assert_eq!(worker.pending_requests(), 0);
    pool.shutdown().await;
}

#[tokio::test]
async fn writes_posted_before_shutdown_are_drained() {
    let engine = Arc::new(MemoryEngine::new());
    let pool = WorkerPool::new(1, engine.clone(), PoolOptions::default()).unwrap();
    let worker = pool.assign_worker().unwrap();
    worker.call(Packet::init("counter")).await.unwrap();

    for n in 0..100 {
        worker
            .post(&Packet::write("counter", DEFAULT_STATE_KEY, Value::Int(n)))
            .unwrap();
    }
    pool.shutdown().await;

    let err = worker
        .call(Packet::query("counter", DEFAULT_STATE_KEY))
        .await
        .unwrap_err();
    assert!(matches!(err, PersistError::Disconnected(_)));

    let pool = WorkerPool::new(1, engine, PoolOptions::default()).unwrap();
    let worker = pool.assign_worker().unwrap();
    worker.call(Packet::init("counter")).await.unwrap();
    let stored = worker
        .call(Packet::query("counter", DEFAULT_STATE_KEY))
        .await
        .unwrap();
    assert_eq!(stored, Some(Payload::Snapshot(Value::Int(99))));
    pool.shutdown().await;
}

#[tokio::test]
async fn detail_is_answered_exactly_once() {
    let pool = pool(1, false);
    let worker = pool.assign_worker().unwrap();
    worker.call(Packet::init("cart")).await.unwrap();

    let detail = worker
        .request(Packet::command(Signal::Detail, "cart"))
        .await
        .unwrap();
    assert_eq!(detail.header, Signal::GetDetailSuccess);

    // the next response on the channel belongs to the next request
    let env = worker
        .request(Packet::command(Signal::WorkerDetail, "cart"))
        .await
        .unwrap();
    assert_eq!(env.header, Signal::WorkerDetail);
    pool.shutdown().await;
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn assignment_is_periodic_in_pool_size(size in 1i64..4, rounds in 1usize..4, lazy in any::<bool>()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let pool = pool(size, lazy);
            let n = usize::try_from(size).unwrap();
            let names: Vec<String> = (0..n * rounds)
                .map(|_| pool.assign_worker().unwrap().name().to_string())
                .collect();
            for (i, name) in names.iter().enumerate() {
                prop_assert_eq!(name, &format!("statekeep-worker-{}", i % n));
            }
            pool.shutdown().await;
            Ok(())
        })?;
    }
}
