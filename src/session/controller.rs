//! Session lifecycle controller
//!
//! [`SessionController`] owns one broker session from connect to release. It
//! enforces the lifecycle in [`super::state`], applies the operation policy to
//! subscribe, publish and unsubscribe, supervises the message loop, and
//! guarantees that a session which reached `Ready` is disconnected exactly
//! once, whatever failed before.

use super::config::SessionConfig;
use super::message_loop::{LoopReport, MessageLoop};
use super::observer::ConnectionInfo;
use super::plan::{PublishSettings, RunPlan, DEFAULT_DRAIN_TIMEOUT, DEFAULT_GRACE_PERIOD};
use super::policy::{run_operation, OperationPolicy};
use super::state::{transition, SessionEvent, SessionState};
use crate::error::SessionError;
use crate::transport::{ConnectAck, OperationKind, Qos, SessionTransport};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn, Instrument, Span};

type LoopHandle = JoinHandle<Result<LoopReport, SessionError>>;

pub struct SessionController<T: SessionTransport> {
    config: SessionConfig,
    transport: Arc<T>,
    state: SessionState,
    policy: OperationPolicy,
    span: Span,
    subscriptions: Vec<String>,
    message_loop: Option<LoopHandle>,
    shutdown_tx: watch::Sender<bool>,
    grace_period: Duration,
    drain_timeout: Duration,
}

impl<T: SessionTransport> SessionController<T> {
    pub fn new(config: SessionConfig, transport: T) -> Self {
        Self::with_shared_transport(config, Arc::new(transport))
    }

    /// Create a controller around a transport the caller keeps a handle to
    pub fn with_shared_transport(config: SessionConfig, transport: Arc<T>) -> Self {
        let span = crate::session_span!(config.client_id());
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            transport,
            state: SessionState::Disconnected,
            policy: OperationPolicy::default(),
            span,
            subscriptions: Vec::new(),
            message_loop: None,
            shutdown_tx,
            grace_period: DEFAULT_GRACE_PERIOD,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_policy(mut self, policy: OperationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Log everything this session does inside `span`
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Topics currently subscribed on this session, including restored ones
    pub fn active_subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    pub fn is_message_loop_running(&self) -> bool {
        self.message_loop
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn apply(&mut self, event: SessionEvent, operation: OperationKind) -> Result<(), SessionError> {
        match transition(self.state, event) {
            Some(next) => {
                debug!(from = %self.state, to = %next, "Session state change");
                self.state = next;
                Ok(())
            }
            None => Err(SessionError::InvalidState {
                operation,
                state: self.state,
            }),
        }
    }

    fn ensure_ready(&self, operation: OperationKind) -> Result<(), SessionError> {
        if self.state.accepts_operations() {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Open the session and wait for the broker acknowledgment
    ///
    /// A failed connect closes the session without any further transport
    /// calls. When the broker resumes a previous session the restored
    /// subscriptions become active without being requested again.
    pub async fn connect(&mut self) -> Result<ConnectAck, SessionError> {
        let span = self.span.clone();
        async {
            self.apply(SessionEvent::ConnectRequested, OperationKind::Connect)?;

            info!(
                broker = %self.config.broker_uri(),
                protocol = %self.config.protocol_version(),
                clean_session = self.config.persistence().is_clean(),
                "Connecting to {}",
                self.config.broker_uri()
            );

            match self.transport.connect(&self.config).await {
                Ok(ack) => {
                    self.apply(SessionEvent::ConnectAcknowledged, OperationKind::Connect)?;

                    if ack.session_present && !self.config.persistence().is_clean() {
                        for topic in &ack.restored_subscriptions {
                            if !self.subscriptions.contains(topic) {
                                self.subscriptions.push(topic.clone());
                            }
                        }
                        info!(
                            restored = ack.restored_subscriptions.len(),
                            "Resumed previous session"
                        );
                    }

                    self.config.observer().on_connected(&ConnectionInfo {
                        broker_uri: self.config.broker_uri(),
                        client_id: self.config.client_id().to_string(),
                        session_present: ack.session_present,
                    });
                    Ok(ack)
                }
                Err(e) => {
                    self.apply(SessionEvent::ConnectFailed, OperationKind::Connect)?;
                    error!("Failed to connect: {}", e);
                    Err(SessionError::Connect(e))
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Subscribe to `topic` and wait for the broker acknowledgment
    pub async fn subscribe(&mut self, topic: &str, qos: Qos) -> Result<(), SessionError> {
        self.ensure_ready(OperationKind::Subscribe)?;
        let transport = &self.transport;

        run_operation(&self.policy, OperationKind::Subscribe, || async move {
            transport.subscribe(topic, qos).await?.wait().await
        })
        .instrument(self.span.clone())
        .await?;

        if !self.subscriptions.iter().any(|t| t == topic) {
            self.subscriptions.push(topic.to_string());
        }
        info!(parent: &self.span, %qos, "Subscribed to topic {}", topic);
        Ok(())
    }

    /// Publish one message and wait for its acknowledgment
    pub async fn publish(&self, topic: &str, qos: Qos, payload: &[u8]) -> Result<(), SessionError> {
        self.ensure_ready(OperationKind::Publish)?;
        let transport = &self.transport;

        run_operation(&self.policy, OperationKind::Publish, || async move {
            transport
                .publish(topic, qos, false, payload.to_vec())
                .await?
                .wait()
                .await
        })
        .instrument(self.span.clone())
        .await
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), SessionError> {
        let transport = &self.transport;

        run_operation(&self.policy, OperationKind::Unsubscribe, || async move {
            transport.unsubscribe(topic).await?.wait().await
        })
        .instrument(self.span.clone())
        .await?;

        info!(parent: &self.span, "Unsubscribed from topic {}", topic);
        Ok(())
    }

    /// Start the periodic publisher on its own task
    pub fn start_message_loop(
        &mut self,
        topic: &str,
        qos: Qos,
        settings: PublishSettings,
    ) -> Result<(), SessionError> {
        self.ensure_ready(OperationKind::Publish)?;
        if self.message_loop.is_some() {
            return Err(SessionError::message_loop("message loop already started"));
        }

        let span = crate::operation_span!(parent: &self.span, "message_loop", topic);
        let handle = MessageLoop::new(
            self.transport.clone(),
            topic,
            qos,
            settings,
            self.policy.clone(),
        )
        .spawn(self.shutdown_tx.subscribe(), span);

        self.message_loop = Some(handle);
        Ok(())
    }

    /// Drain and close the session
    ///
    /// Stops the message loop, releases the active subscriptions and always
    /// disconnects a session that reached `Ready`. Calling it again, or on a
    /// session that never connected, is a no-op beyond moving to `Closed`.
    /// The first error encountered is returned after every release step ran.
    pub async fn shutdown(&mut self) -> Result<(), SessionError> {
        let span = self.span.clone();
        async {
            match self.state {
                SessionState::Closed => {
                    debug!("Session already closed");
                    return Ok(());
                }
                SessionState::Ready => {
                    self.apply(SessionEvent::ShutdownRequested, OperationKind::Disconnect)?;
                }
                SessionState::Draining => {}
                SessionState::Disconnected | SessionState::Connecting => {
                    self.stop_loop_now();
                    self.apply(SessionEvent::ShutdownRequested, OperationKind::Disconnect)?;
                    return Ok(());
                }
            }

            info!("Disconnecting...");
            let mut first_error = None;

            if let Err(e) = self.drain_message_loop().await {
                error!("{}", e);
                first_error.get_or_insert(e);
            }

            for topic in std::mem::take(&mut self.subscriptions) {
                if let Err(e) = self.unsubscribe(&topic).await {
                    error!("Failed to unsubscribe from {}: {}", topic, e);
                    first_error.get_or_insert(e);
                }
            }

            if let Err(e) = self.transport.disconnect(self.grace_period).await {
                warn!("Disconnect did not complete cleanly: {}", e);
                first_error.get_or_insert(SessionError::operation(OperationKind::Disconnect, e));
            }

            self.apply(SessionEvent::Released, OperationKind::Disconnect)?;
            info!("Session closed");

            match first_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
        .instrument(span)
        .await
    }

    /// Signal the message loop and wait for it, bounded by the drain timeout
    async fn drain_message_loop(&mut self) -> Result<(), SessionError> {
        let _ = self.shutdown_tx.send(true);
        let Some(mut handle) = self.message_loop.take() else {
            return Ok(());
        };

        match tokio::time::timeout(self.drain_timeout, &mut handle).await {
            Ok(joined) => loop_outcome(joined).map(|report| {
                debug!(published = report.published, "Message loop drained");
            }),
            Err(_) => {
                warn!(
                    "Message loop did not stop within {:?}, aborting it",
                    self.drain_timeout
                );
                handle.abort();
                Ok(())
            }
        }
    }

    fn stop_loop_now(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.message_loop.take() {
            handle.abort();
        }
    }

    /// Drive a complete session: connect, serve `plan` until `shutdown`
    /// resolves or an operation fails, then drain and close
    ///
    /// Release always runs once the session connected. A failure while
    /// serving takes precedence over a failure while draining.
    pub async fn run<F>(&mut self, plan: &RunPlan, shutdown: F) -> Result<(), SessionError>
    where
        F: Future<Output = ()>,
    {
        self.grace_period = plan.grace_period();
        self.drain_timeout = plan.drain_timeout();

        self.connect().await?;

        let served = self.serve(plan, shutdown).await;
        if let Err(e) = &served {
            error!(parent: &self.span, "Session failed: {}", e);
        }

        let drained = self.shutdown().await;
        served.and(drained)
    }

    async fn serve<F>(&mut self, plan: &RunPlan, shutdown: F) -> Result<(), SessionError>
    where
        F: Future<Output = ()>,
    {
        if plan.mode().subscribes() {
            if self.subscriptions.iter().any(|t| t == plan.topic()) {
                info!(parent: &self.span, "Subscription to {} restored with the session", plan.topic());
            } else {
                self.subscribe(plan.topic(), plan.qos()).await?;
            }
        }

        if let Some(settings) = plan.publish() {
            self.start_message_loop(plan.topic(), plan.qos(), settings.clone())?;
        }

        tokio::pin!(shutdown);

        if let Some(mut handle) = self.message_loop.take() {
            let finished = tokio::select! {
                _ = &mut shutdown => None,
                joined = &mut handle => Some(joined),
            };

            match finished {
                None => self.message_loop = Some(handle),
                Some(joined) => {
                    // The loop only returns early on failure
                    loop_outcome(joined)?;
                    shutdown.await;
                }
            }
        } else {
            shutdown.await;
        }

        info!(parent: &self.span, "Shutdown requested");
        Ok(())
    }
}

fn loop_outcome(
    joined: Result<Result<LoopReport, SessionError>, JoinError>,
) -> Result<LoopReport, SessionError> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Ok(LoopReport::default()),
        Err(e) => Err(SessionError::message_loop(e.to_string())),
    }
}

impl<T: SessionTransport> Drop for SessionController<T> {
    fn drop(&mut self) {
        if self.state == SessionState::Ready || self.state == SessionState::Draining {
            warn!(parent: &self.span, "Session dropped without shutdown, connection not released");
        }
        self.stop_loop_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::{test_session_config, MockTransport, TransportCall};
    use crate::transport::TransportError;

    fn controller(transport: MockTransport) -> SessionController<MockTransport> {
        SessionController::new(test_session_config("client1"), transport)
    }

    #[tokio::test]
    async fn test_initial_state() {
        let controller = controller(MockTransport::new());
        assert_eq!(controller.state(), SessionState::Disconnected);
        assert!(controller.active_subscriptions().is_empty());
        assert!(!controller.is_message_loop_running());
    }

    #[tokio::test]
    async fn test_connect_moves_to_ready() {
        let mut controller = controller(MockTransport::new());
        let ack = controller.connect().await.unwrap();
        assert!(!ack.session_present);
        assert_eq!(controller.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_connect_failure_closes_without_disconnect() {
        let mut controller = controller(MockTransport::new().with_connect_failure("tls handshake"));

        let result = controller.connect().await;
        assert!(matches!(result, Err(SessionError::Connect(_))));
        assert_eq!(controller.state(), SessionState::Closed);

        controller.shutdown().await.unwrap();
        let calls = controller.transport().calls().await;
        assert_eq!(calls.len(), 1);
        assert!(matches!(calls[0], TransportCall::Connect { .. }));
    }

    #[tokio::test]
    async fn test_operations_rejected_before_connect() {
        let mut controller = controller(MockTransport::new());

        let result = controller.subscribe("t1", Qos::AtLeastOnce).await;
        assert!(matches!(
            result,
            Err(SessionError::InvalidState {
                operation: OperationKind::Subscribe,
                state: SessionState::Disconnected
            })
        ));

        let result = controller.publish("t1", Qos::AtLeastOnce, b"x").await;
        assert!(matches!(result, Err(SessionError::InvalidState { .. })));
        assert!(controller.transport().calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_connect_twice_rejected() {
        let mut controller = controller(MockTransport::new());
        controller.connect().await.unwrap();
        assert!(matches!(
            controller.connect().await,
            Err(SessionError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_shutdown_releases_in_order() {
        let mut controller = controller(MockTransport::new());
        controller.connect().await.unwrap();
        controller.subscribe("t1", Qos::AtLeastOnce).await.unwrap();
        assert_eq!(controller.active_subscriptions(), ["t1".to_string()]);

        controller.shutdown().await.unwrap();
        assert_eq!(controller.state(), SessionState::Closed);
        assert!(controller.active_subscriptions().is_empty());

        let calls = controller.transport().calls().await;
        assert!(matches!(calls[1], TransportCall::Subscribe { .. }));
        assert!(matches!(calls[2], TransportCall::Unsubscribe { ref topic } if topic == "t1"));
        assert!(matches!(calls[3], TransportCall::Disconnect { grace } if grace == DEFAULT_GRACE_PERIOD));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let mut controller = controller(MockTransport::new());
        controller.connect().await.unwrap();

        controller.shutdown().await.unwrap();
        controller.shutdown().await.unwrap();

        assert_eq!(controller.transport().disconnect_count().await, 1);
    }

    #[tokio::test]
    async fn test_shutdown_without_connect_makes_no_calls() {
        let mut controller = controller(MockTransport::new());
        controller.shutdown().await.unwrap();
        assert_eq!(controller.state(), SessionState::Closed);
        assert!(controller.transport().calls().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_after_abandoned_connect_closes() {
        let mut controller =
            controller(MockTransport::new().with_connect_delay(Duration::from_secs(5)));

        let attempt = tokio::time::timeout(Duration::from_millis(300), controller.connect()).await;
        assert!(attempt.is_err());
        assert_eq!(controller.state(), SessionState::Connecting);

        controller.shutdown().await.unwrap();
        assert_eq!(controller.state(), SessionState::Closed);
        assert_eq!(controller.transport().disconnect_count().await, 0);
    }

    #[tokio::test]
    async fn test_subscribe_rejection_is_fatal_with_fail_fast() {
        let mut controller = controller(MockTransport::new().with_subscribe_rejections(1));
        controller.connect().await.unwrap();

        let result = controller.subscribe("t1", Qos::AtLeastOnce).await;
        assert!(matches!(
            result,
            Err(SessionError::Operation {
                operation: OperationKind::Subscribe,
                source: TransportError::Rejected { .. }
            })
        ));
        assert!(controller.active_subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_message_loop_cannot_start_twice() {
        let mut controller = controller(MockTransport::new());
        controller.connect().await.unwrap();

        let settings = PublishSettings::new("hello").with_interval(Duration::from_millis(10));
        controller
            .start_message_loop("t1", Qos::AtLeastOnce, settings.clone())
            .unwrap();
        assert!(controller
            .start_message_loop("t1", Qos::AtLeastOnce, settings)
            .is_err());

        controller.shutdown().await.unwrap();
        assert!(!controller.is_message_loop_running());
    }

    #[tokio::test]
    async fn test_disconnect_failure_reported_after_release() {
        let mut controller = controller(MockTransport::new().with_disconnect_failure());
        controller.connect().await.unwrap();

        let result = controller.shutdown().await;
        assert!(matches!(
            result,
            Err(SessionError::Operation {
                operation: OperationKind::Disconnect,
                ..
            })
        ));
        assert_eq!(controller.state(), SessionState::Closed);
    }
}
