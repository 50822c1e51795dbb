//! Operation failure policy tests
//!
//! Broker rejections are fatal under the default fail-fast policy and retried
//! with backoff under a retry policy. Connect is never retried.

mod test_helpers;

use mtls_pubsub::error::SessionError;
use mtls_pubsub::session::{
    OperationPolicy, RetryConfig, SessionController, SessionPersistence, SessionState,
};
use mtls_pubsub::testing::mocks::{MockTransport, TransportCall};
use mtls_pubsub::transport::{OperationKind, Qos, TransportError};
use std::time::Duration;
use test_helpers::{publish_plan, session_config, TOPIC};

fn retry_policy(max_attempts: u32) -> OperationPolicy {
    OperationPolicy::Retry(RetryConfig {
        max_attempts,
        ..RetryConfig::default()
    })
}

async fn publish_calls(transport: &MockTransport) -> usize {
    transport
        .count_calls(|call| matches!(call, TransportCall::Publish { .. }))
        .await
}

#[tokio::test(start_paused = true)]
async fn test_rejected_publish_is_retried() {
    let transport = MockTransport::new().with_publish_rejections(1);
    let mut controller =
        SessionController::new(session_config(SessionPersistence::Resume), transport.clone())
            .with_policy(retry_policy(3));

    controller.connect().await.unwrap();
    let result = controller.publish(TOPIC, Qos::AtLeastOnce, b"hello #0!").await;

    assert!(result.is_ok());
    assert_eq!(publish_calls(&transport).await, 2);
    controller.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rejected_publish_fails_fast_by_default() {
    let transport = MockTransport::new().with_publish_rejections(1);
    let mut controller =
        SessionController::new(session_config(SessionPersistence::Resume), transport.clone());

    controller.connect().await.unwrap();
    let result = controller.publish(TOPIC, Qos::AtLeastOnce, b"hello #0!").await;

    assert!(matches!(
        result,
        Err(SessionError::Operation {
            operation: OperationKind::Publish,
            source: TransportError::Rejected { .. },
        })
    ));
    assert_eq!(publish_calls(&transport).await, 1);
    controller.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_retries_are_bounded() {
    let transport = MockTransport::new().with_subscribe_rejections(10);
    let mut controller =
        SessionController::new(session_config(SessionPersistence::Resume), transport.clone())
            .with_policy(retry_policy(2));

    controller.connect().await.unwrap();
    let result = controller.subscribe(TOPIC, Qos::AtLeastOnce).await;

    assert!(matches!(
        result,
        Err(SessionError::Operation {
            operation: OperationKind::Subscribe,
            ..
        })
    ));
    let subscribes = transport
        .count_calls(|call| matches!(call, TransportCall::Subscribe { .. }))
        .await;
    assert_eq!(subscribes, 3);
    assert!(controller.active_subscriptions().is_empty());
    controller.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_connect_is_never_retried() {
    let transport = MockTransport::new().with_connect_failure("handshake failure");
    let mut controller =
        SessionController::new(session_config(SessionPersistence::Resume), transport.clone())
            .with_policy(retry_policy(5));

    assert!(matches!(
        controller.connect().await,
        Err(SessionError::Connect(_))
    ));
    assert_eq!(transport.calls().await.len(), 1);
    assert_eq!(controller.state(), SessionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_message_loop_rejection_ends_run_under_fail_fast() {
    let transport = MockTransport::new().with_publish_rejections(1);
    let mut controller =
        SessionController::new(session_config(SessionPersistence::Resume), transport.clone());
    let plan = publish_plan(Qos::AtLeastOnce, 0, Duration::from_secs(2));

    let result = controller.run(&plan, std::future::pending::<()>()).await;

    assert!(matches!(result, Err(ref e) if e.exit_code() == 1));
    assert_eq!(controller.state(), SessionState::Closed);
    assert_eq!(transport.disconnect_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_message_loop_recovers_under_retry() {
    let transport = MockTransport::new().with_publish_rejections(2);
    let mut controller =
        SessionController::new(session_config(SessionPersistence::Resume), transport.clone())
            .with_policy(retry_policy(3));
    let plan = publish_plan(Qos::AtLeastOnce, 0, Duration::from_secs(2));

    let trigger = transport.clone();
    let result = controller
        .run(&plan, async move { trigger.wait_for_publishes(4).await })
        .await;

    assert!(result.is_ok());
    // Two rejected attempts, then "hello #0!" and "hello #1!"
    let payloads = transport.published_payloads().await;
    assert_eq!(payloads[2..], ["hello #0!", "hello #1!"]);
}
