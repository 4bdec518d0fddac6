//! Gateway tests: validation runs before any store or broker interaction,
//! and create happens before publish.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use jobmill::broker::{provision, JobConsumer, MemoryBroker};
use jobmill::config::{BrokerConfig, GatewayConfig, JOBS_TOPIC};
use jobmill::error::MillError;
use jobmill::gateway::{SubmissionGateway, SubmitRequest};
use jobmill::store::{JobStatus, JobStore, MemoryJobStore};

async fn gateway_fixture() -> (MemoryBroker, BrokerConfig, Arc<dyn JobStore>, SubmissionGateway) {
    let broker = MemoryBroker::new();
    let broker_config = BrokerConfig::default();
    provision(&broker, &broker_config).await.unwrap();

    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let producer = Arc::new(broker.producer(JOBS_TOPIC, &broker_config.submitter_principal));
    let gateway = SubmissionGateway::new(
        store.clone(),
        producer,
        broker_config.submitter_principal.clone(),
        GatewayConfig::default(),
    );
    (broker, broker_config, store, gateway)
}

#[tokio::test]
async fn submit_creates_pending_record_and_publishes() {
    let (broker, broker_config, store, gateway) = gateway_fixture().await;
    let consumer = broker
        .subscribe(
            JOBS_TOPIC,
            &broker_config.group_id,
            &broker_config.worker_principal,
        )
        .unwrap();

    let job_id = gateway
        .submit(SubmitRequest {
            script: "echo hi".to_string(),
            timeout: Duration::from_secs(30),
        }, &CancellationToken::new())
        .await
        .unwrap();

    let snapshot = store.get(job_id).await.unwrap().unwrap();
    assert_eq!(snapshot.status, JobStatus::Pending);
    assert_eq!(
        store.jobs_of(&broker_config.submitter_principal).await.unwrap(),
        vec![job_id]
    );

    let token = CancellationToken::new();
    let delivery = consumer
        .poll(Duration::from_millis(200), &token)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery.job_id().unwrap(), job_id);
}

#[tokio::test]
async fn empty_script_is_rejected_before_any_side_effect() {
    let (_broker, broker_config, store, gateway) = gateway_fixture().await;
    let err = gateway
        .submit(SubmitRequest {
            script: "   \n".to_string(),
            timeout: Duration::from_secs(30),
        }, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MillError::Validation(_)));
    assert!(store
        .jobs_of(&broker_config.submitter_principal)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn oversized_script_is_rejected() {
    let (_broker, _broker_config, _store, gateway) = gateway_fixture().await;
    let err = gateway
        .submit(SubmitRequest {
            script: "x".repeat(GatewayConfig::default().max_script_bytes + 1),
            timeout: Duration::from_secs(30),
        }, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MillError::Validation(_)));
}

#[tokio::test]
async fn out_of_bounds_timeouts_are_rejected() {
    let (_broker, _broker_config, store, gateway) = gateway_fixture().await;
    for timeout in [Duration::from_millis(10), Duration::from_secs(60 * 60 * 24)] {
        let err = gateway
            .submit(SubmitRequest {
                script: "echo hi".to_string(),
                timeout,
            }, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MillError::Validation(_)));
    }
    assert!(store.jobs_of("svc_jobs_gateway").await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_job_id_yields_none() {
    let (_broker, _broker_config, _store, gateway) = gateway_fixture().await;
    assert!(gateway.get_result(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn cancelled_token_is_honored_by_the_publish_leg() {
    let (_broker, broker_config, store, gateway) = gateway_fixture().await;
    let token = CancellationToken::new();
    token.cancel();

    let err = gateway
        .submit(
            SubmitRequest {
                script: "echo hi".to_string(),
                timeout: Duration::from_secs(30),
            },
            &token,
        )
        .await
        .unwrap_err();
    assert!(err.is_transient());

    // Create ran before publish; the Pending record stays for recovery.
    let owned = store
        .jobs_of(&broker_config.submitter_principal)
        .await
        .unwrap();
    assert_eq!(owned.len(), 1);
    assert_eq!(
        store.get(owned[0]).await.unwrap().unwrap().status,
        JobStatus::Pending
    );
}

#[tokio::test]
async fn publish_failure_leaves_the_record_for_the_watchdog() {
    // No provisioning: the submitter has no write grant, so publish fails
    // after the record is created.
    let broker = MemoryBroker::new();
    let broker_config = BrokerConfig::default();
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let producer = Arc::new(broker.producer(JOBS_TOPIC, &broker_config.submitter_principal));
    let gateway = SubmissionGateway::new(
        store.clone(),
        producer,
        broker_config.submitter_principal.clone(),
        GatewayConfig::default(),
    );

    let err = gateway
        .submit(SubmitRequest {
            script: "echo hi".to_string(),
            timeout: Duration::from_secs(30),
        }, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MillError::AccessDenied { .. }));

    // The orphaned Pending record is still there for recovery.
    let owned = store
        .jobs_of(&broker_config.submitter_principal)
        .await
        .unwrap();
    assert_eq!(owned.len(), 1);
    let snapshot = store.get(owned[0]).await.unwrap().unwrap();
    assert_eq!(snapshot.status, JobStatus::Pending);
}
