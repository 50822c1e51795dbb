//! Test helpers and utilities for integration tests

use mtls_pubsub::session::{
    PublishSettings, RunMode, RunPlan, SessionConfig, SessionObserver, SessionPersistence,
};
use mtls_pubsub::testing::mocks::test_session_config_builder;
use mtls_pubsub::transport::Qos;
use std::sync::Arc;
use std::time::Duration;

#[allow(dead_code)]
pub const CLIENT_ID: &str = "client1-session1";
#[allow(dead_code)]
pub const TOPIC: &str = "sample/t1";

/// Session configuration for the mock transport
#[allow(dead_code)]
pub fn session_config(persistence: SessionPersistence) -> SessionConfig {
    test_session_config_builder(CLIENT_ID)
        .persistence(persistence)
        .build()
        .unwrap()
}

/// Session configuration reporting to `observer`
#[allow(dead_code)]
pub fn observed_session_config(observer: Arc<dyn SessionObserver>) -> SessionConfig {
    test_session_config_builder(CLIENT_ID)
        .observer(observer)
        .build()
        .unwrap()
}

/// Publish-only plan sending `"hello #<n>!"` from `base`
#[allow(dead_code)]
pub fn publish_plan(qos: Qos, base: u64, interval: Duration) -> RunPlan {
    RunPlan::new(
        TOPIC,
        qos,
        RunMode::PublishOnly,
        Some(
            PublishSettings::new("hello")
                .with_sequence_base(base)
                .with_interval(interval),
        ),
    )
    .unwrap()
}

#[allow(dead_code)]
pub fn subscribe_plan(qos: Qos) -> RunPlan {
    RunPlan::new(TOPIC, qos, RunMode::SubscribeOnly, None).unwrap()
}
