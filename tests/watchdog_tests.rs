//! Watchdog tests: lost jobs are timed out, live outcomes are left alone.

mod test_harness;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use jobmill::config::WatchdogConfig;
use jobmill::gateway::SubmitRequest;
use jobmill::store::{JobStatus, JobStore, MemoryJobStore, NewJob};
use jobmill::watchdog::LostJobWatchdog;

use test_harness::{assert_eventually, Pipeline};

fn fast_watchdog_config() -> WatchdogConfig {
    WatchdogConfig {
        enabled: true,
        scan_interval: Duration::from_millis(25),
        lost_grace: Duration::from_millis(100),
    }
}

#[tokio::test]
async fn job_with_no_workers_is_timed_out() {
    // Zero workers: the message is published but nobody ever consumes it.
    let mut pipeline = Pipeline::start(0).await;
    pipeline.spawn_watchdog(fast_watchdog_config());

    let job_id = pipeline
        .gateway
        .submit(SubmitRequest {
            script: "echo never".to_string(),
            timeout: Duration::from_millis(100),
        }, &pipeline.token)
        .await
        .unwrap();

    assert_eventually(
        || async {
            matches!(
                pipeline.gateway.get_result(job_id).await.unwrap(),
                Some(s) if s.status == JobStatus::TimedOut
            )
        },
        Duration::from_secs(5),
        "watchdog never reclaimed the job",
    )
    .await;

    let snapshot = pipeline.gateway.get_result(job_id).await.unwrap().unwrap();
    assert!(snapshot.finished_at.is_some());

    pipeline.shutdown().await;
}

#[tokio::test]
async fn claimed_job_of_a_dead_worker_is_timed_out() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let id = Uuid::new_v4();
    store
        .create(
            id,
            NewJob {
                script: "echo hi".to_string(),
                timeout: Duration::from_millis(50),
            },
            "alice",
        )
        .await
        .unwrap();
    // The claiming worker dies here and never reports back.
    store.claim(id).await.unwrap();

    let token = CancellationToken::new();
    let watchdog = LostJobWatchdog::new(store.clone(), fast_watchdog_config());
    let watchdog_token = token.clone();
    let handle = tokio::spawn(async move { watchdog.run(watchdog_token).await });

    assert_eventually(
        || async {
            matches!(
                store.get(id).await.unwrap(),
                Some(s) if s.status == JobStatus::TimedOut
            )
        },
        Duration::from_secs(5),
        "running job of a dead worker was never reclaimed",
    )
    .await;

    token.cancel();
    let _ = handle.await;
}

#[tokio::test]
async fn finished_jobs_are_not_touched() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let id = Uuid::new_v4();
    store
        .create(
            id,
            NewJob {
                script: "echo hi".to_string(),
                timeout: Duration::ZERO,
            },
            "alice",
        )
        .await
        .unwrap();
    store.claim(id).await.unwrap();
    store.complete(id, b"done".to_vec()).await.unwrap();
    let before = store.get(id).await.unwrap().unwrap();

    let token = CancellationToken::new();
    let watchdog = LostJobWatchdog::new(store.clone(), fast_watchdog_config());
    let watchdog_token = token.clone();
    let handle = tokio::spawn(async move { watchdog.run(watchdog_token).await });

    tokio::time::sleep(Duration::from_millis(300)).await;
    let after = store.get(id).await.unwrap().unwrap();
    assert_eq!(after.status, JobStatus::Completed);
    assert_eq!(after.finished_at, before.finished_at);
    assert_eq!(after.result, b"done");

    token.cancel();
    let _ = handle.await;
}

#[tokio::test]
async fn disabled_watchdog_exits_immediately() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let watchdog = LostJobWatchdog::new(
        store,
        WatchdogConfig {
            enabled: false,
            ..fast_watchdog_config()
        },
    );
    // Runs to completion without the token ever being cancelled.
    tokio::time::timeout(
        Duration::from_secs(1),
        watchdog.run(CancellationToken::new()),
    )
    .await
    .unwrap();
}
