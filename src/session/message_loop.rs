//! Periodic publisher
//!
//! Publishes `"<message> #<n>!"` with an increasing sequence number, waiting
//! for each acknowledgment before the next publish so that at most one publish
//! is outstanding at any time. The loop stops at the next wait point once the
//! shutdown signal is raised; an unacknowledged final publish is abandoned.

use super::plan::PublishSettings;
use super::policy::{run_operation, OperationPolicy};
use crate::error::SessionError;
use crate::transport::{OperationKind, Qos, SessionTransport, TransportError};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, Instrument, Span};

/// Summary of a finished loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoopReport {
    /// Publishes the broker acknowledged
    pub published: u64,
    /// Sequence number the next publish would have used
    pub next_sequence: u64,
}

pub struct MessageLoop<T: SessionTransport> {
    transport: Arc<T>,
    topic: String,
    qos: Qos,
    settings: PublishSettings,
    policy: OperationPolicy,
}

impl<T: SessionTransport> MessageLoop<T> {
    pub fn new(
        transport: Arc<T>,
        topic: impl Into<String>,
        qos: Qos,
        settings: PublishSettings,
        policy: OperationPolicy,
    ) -> Self {
        Self {
            transport,
            topic: topic.into(),
            qos,
            settings,
            policy,
        }
    }

    /// Run the loop on its own task
    pub fn spawn(
        self,
        shutdown: watch::Receiver<bool>,
        span: Span,
    ) -> JoinHandle<Result<LoopReport, SessionError>> {
        tokio::spawn(self.run(shutdown).instrument(span))
    }

    /// Publish until `shutdown` is raised or a publish fails
    pub async fn run(
        self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<LoopReport, SessionError> {
        let mut report = LoopReport {
            published: 0,
            next_sequence: self.settings.sequence_base(),
        };

        info!(topic = %self.topic, qos = %self.qos, "Sending messages to {}", self.topic);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let payload = self.settings.payload(report.next_sequence);
            let publish = run_operation(&self.policy, OperationKind::Publish, || {
                self.publish_once(&payload)
            });

            tokio::select! {
                biased;
                _ = stop_requested(&mut shutdown) => {
                    debug!(sequence = report.next_sequence, "Abandoning unacknowledged publish");
                    break;
                }
                result = publish => {
                    result?;
                    debug!(sequence = report.next_sequence, "Published: {}", payload);
                    report.published += 1;
                    report.next_sequence += 1;
                }
            }

            tokio::select! {
                biased;
                _ = stop_requested(&mut shutdown) => break,
                _ = tokio::time::sleep(self.settings.interval()) => {}
            }
        }

        info!(
            published = report.published,
            next_sequence = report.next_sequence,
            "Message loop stopped"
        );
        Ok(report)
    }

    async fn publish_once(&self, payload: &str) -> Result<(), TransportError> {
        let token = self
            .transport
            .publish(&self.topic, self.qos, false, payload.as_bytes().to_vec())
            .await?;
        token.wait().await
    }
}

/// Resolves once shutdown is raised or its sender is gone
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockTransport;
    use std::time::Duration;

    fn settings() -> PublishSettings {
        PublishSettings::new("hello").with_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_loop_publishes_sequenced_payloads() {
        let transport = Arc::new(MockTransport::new());
        transport.connect_default().await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = MessageLoop::new(
            transport.clone(),
            "t1",
            Qos::AtLeastOnce,
            settings().with_sequence_base(1),
            OperationPolicy::FailFast,
        )
        .spawn(shutdown_rx, Span::none());

        transport.wait_for_publishes(3).await;
        shutdown_tx.send(true).unwrap();
        let report = handle.await.unwrap().unwrap();

        let payloads = transport.published_payloads().await;
        assert!(payloads.len() >= 3);
        assert_eq!(payloads[0], "hello #1!");
        assert_eq!(payloads[1], "hello #2!");
        assert_eq!(payloads[2], "hello #3!");
        assert!(report.published >= 3);
        assert_eq!(report.next_sequence, 1 + report.published);
    }

    #[tokio::test]
    async fn test_loop_stops_immediately_when_already_signalled() {
        let transport = Arc::new(MockTransport::new());
        transport.connect_default().await;
        let (_shutdown_tx, shutdown_rx) = watch::channel(true);

        let report = MessageLoop::new(
            transport.clone(),
            "t1",
            Qos::AtLeastOnce,
            settings(),
            OperationPolicy::FailFast,
        )
        .run(shutdown_rx)
        .await
        .unwrap();

        assert_eq!(report, LoopReport::default());
        assert!(transport.published_payloads().await.is_empty());
    }

    #[tokio::test]
    async fn test_loop_abandons_unacknowledged_publish_on_shutdown() {
        let transport = Arc::new(MockTransport::new().with_ack_delay(Duration::from_secs(60)));
        transport.connect_default().await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = MessageLoop::new(
            transport.clone(),
            "t1",
            Qos::AtLeastOnce,
            settings(),
            OperationPolicy::FailFast,
        )
        .spawn(shutdown_rx, Span::none());

        transport.wait_for_publishes(1).await;
        shutdown_tx.send(true).unwrap();

        let report = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop should stop promptly")
            .unwrap()
            .unwrap();
        assert_eq!(report.published, 0);
        assert_eq!(report.next_sequence, 0);
    }

    #[tokio::test]
    async fn test_loop_fails_fast_on_rejected_publish() {
        let transport = Arc::new(MockTransport::new().with_publish_rejections(1));
        transport.connect_default().await;
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let result = MessageLoop::new(
            transport.clone(),
            "t1",
            Qos::AtLeastOnce,
            settings(),
            OperationPolicy::FailFast,
        )
        .run(shutdown_rx)
        .await;

        assert!(matches!(
            result,
            Err(SessionError::Operation {
                operation: OperationKind::Publish,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_loop_stops_when_shutdown_sender_dropped() {
        let transport = Arc::new(MockTransport::new());
        transport.connect_default().await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = MessageLoop::new(
            transport.clone(),
            "t1",
            Qos::AtMostOnce,
            settings(),
            OperationPolicy::FailFast,
        )
        .spawn(shutdown_rx, Span::none());

        transport.wait_for_publishes(1).await;
        drop(shutdown_tx);

        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(result.unwrap().unwrap().is_ok());
    }
}
