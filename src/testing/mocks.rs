//! Mock implementations for testing
//!
//! Provides a mock [`SessionTransport`] backed by an in-memory broker session
//! store, plus a recording [`SessionObserver`], so the session lifecycle can be
//! exercised without a broker or certificates.

use crate::session::config::{SessionConfig, SessionConfigBuilder};
use crate::session::observer::{ConnectionInfo, IncomingMessage, SessionObserver};
use crate::transport::tls::SecurityContext;
use crate::transport::{
    ConnectAck, OperationKind, OperationToken, Qos, SessionTransport, TransportError,
};
use async_trait::async_trait;
use bytes::Bytes;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;

/// One request received by the mock transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Connect { client_id: String, clean_session: bool },
    Subscribe { topic: String, qos: Qos },
    Publish {
        topic: String,
        qos: Qos,
        retain: bool,
        payload: Vec<u8>,
    },
    Unsubscribe { topic: String },
    Disconnect { grace: Duration },
}

/// Broker-side session store, shareable between transports
///
/// Remembers the subscriptions of every persistent session by client id.
#[derive(Debug, Default, Clone)]
pub struct MockBroker {
    sessions: Arc<Mutex<HashMap<String, Vec<String>>>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    async fn open_session(&self, client_id: &str, clean: bool) -> ConnectAck {
        let mut sessions = self.sessions.lock().await;
        if clean {
            sessions.remove(client_id);
            return ConnectAck::default();
        }

        match sessions.get(client_id) {
            Some(subscriptions) => ConnectAck {
                session_present: true,
                restored_subscriptions: subscriptions.clone(),
            },
            None => {
                sessions.insert(client_id.to_string(), Vec::new());
                ConnectAck::default()
            }
        }
    }

    async fn add_subscription(&self, client_id: &str, topic: &str) {
        let mut sessions = self.sessions.lock().await;
        let subscriptions = sessions.entry(client_id.to_string()).or_default();
        if !subscriptions.iter().any(|t| t == topic) {
            subscriptions.push(topic.to_string());
        }
    }

    async fn remove_subscription(&self, client_id: &str, topic: &str) {
        if let Some(subscriptions) = self.sessions.lock().await.get_mut(client_id) {
            subscriptions.retain(|t| t != topic);
        }
    }

    async fn discard_session(&self, client_id: &str) {
        self.sessions.lock().await.remove(client_id);
    }

    /// Subscriptions the broker keeps for `client_id`
    pub async fn stored_subscriptions(&self, client_id: &str) -> Vec<String> {
        self.sessions
            .lock()
            .await
            .get(client_id)
            .cloned()
            .unwrap_or_default()
    }
}

/// Connected client as seen by the mock
#[derive(Clone)]
struct MockSession {
    client_id: String,
    clean: bool,
    observer: Arc<dyn SessionObserver>,
}

/// Mock transport for testing
///
/// Clones share all state, so a test can keep a handle while the controller
/// owns another.
#[derive(Default, Clone)]
pub struct MockTransport {
    pub calls: Arc<Mutex<Vec<TransportCall>>>,
    pub broker: MockBroker,
    session: Arc<Mutex<Option<MockSession>>>,
    connected: Arc<AtomicBool>,
    connect_failure: Option<String>,
    disconnect_failure: bool,
    connect_delay: Option<Duration>,
    ack_delay: Option<Duration>,
    publish_rejections: Arc<AtomicU32>,
    subscribe_rejections: Arc<AtomicU32>,
    outstanding_publishes: Arc<AtomicUsize>,
    max_outstanding_publishes: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a broker session store shared with other transports
    pub fn with_broker(mut self, broker: MockBroker) -> Self {
        self.broker = broker;
        self
    }

    /// Fail every connect with a TLS handshake error
    pub fn with_connect_failure(mut self, reason: impl Into<String>) -> Self {
        self.connect_failure = Some(reason.into());
        self
    }

    pub fn with_disconnect_failure(mut self) -> Self {
        self.disconnect_failure = true;
        self
    }

    /// Answer connects only after `delay`
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// Acknowledge publishes only after `delay`
    pub fn with_ack_delay(mut self, delay: Duration) -> Self {
        self.ack_delay = Some(delay);
        self
    }

    /// Reject the next `count` publishes
    pub fn with_publish_rejections(self, count: u32) -> Self {
        self.publish_rejections.store(count, Ordering::SeqCst);
        self
    }

    /// Reject the next `count` subscribes
    pub fn with_subscribe_rejections(self, count: u32) -> Self {
        self.subscribe_rejections.store(count, Ordering::SeqCst);
        self
    }

    /// Connect with [`test_session_config`] for tests that bypass a controller
    pub async fn connect_default(&self) -> ConnectAck {
        self.connect(&test_session_config("mock-client"))
            .await
            .expect("mock connect should succeed")
    }

    pub async fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().await.clone()
    }

    pub async fn clear_history(&self) {
        self.calls.lock().await.clear();
    }

    /// Payloads of every publish request, as text
    pub async fn published_payloads(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|call| match call {
                TransportCall::Publish { payload, .. } => {
                    Some(String::from_utf8_lossy(payload).into_owned())
                }
                _ => None,
            })
            .collect()
    }

    pub async fn count_calls(&self, predicate: impl Fn(&TransportCall) -> bool) -> usize {
        self.calls.lock().await.iter().filter(|c| predicate(c)).count()
    }

    pub async fn disconnect_count(&self) -> usize {
        self.count_calls(|c| matches!(c, TransportCall::Disconnect { .. }))
            .await
    }

    /// Wait until at least `count` publish requests were made
    pub async fn wait_for_publishes(&self, count: usize) {
        while self.published_payloads().await.len() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// Highest number of publish tokens that were unresolved at once
    pub fn max_outstanding_publishes(&self) -> usize {
        self.max_outstanding_publishes.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Deliver an application message to the connected session's observer
    pub async fn inject_message(&self, topic: &str, payload: &[u8]) {
        if let Some(session) = self.session.lock().await.clone() {
            session.observer.on_message(&IncomingMessage {
                topic: topic.to_string(),
                payload: Bytes::copy_from_slice(payload),
                retain: false,
                duplicate: false,
            });
        }
    }

    /// Simulate the broker dropping the connection
    pub async fn drop_connection(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(session) = self.session.lock().await.clone() {
            session.observer.on_connection_lost(reason);
        }
    }

    async fn record(&self, call: TransportCall) {
        self.calls.lock().await.push(call);
    }

    async fn current_client(&self) -> Result<String, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.client_id.clone())
            .ok_or(TransportError::NotConnected)
    }
}

fn take_rejection(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn rejected(operation: OperationKind) -> TransportError {
    TransportError::Rejected {
        operation,
        reason: "rejected by mock broker".to_string(),
    }
}

#[async_trait]
impl SessionTransport for MockTransport {
    async fn connect(&self, config: &SessionConfig) -> Result<ConnectAck, TransportError> {
        let clean = config.persistence().is_clean();
        self.record(TransportCall::Connect {
            client_id: config.client_id().to_string(),
            clean_session: clean,
        })
        .await;

        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = &self.connect_failure {
            return Err(TransportError::Tls(reason.clone()));
        }
        if self.is_connected() {
            return Err(TransportError::AlreadyStarted);
        }

        let ack = self.broker.open_session(config.client_id(), clean).await;
        *self.session.lock().await = Some(MockSession {
            client_id: config.client_id().to_string(),
            clean,
            observer: config.observer().clone(),
        });
        self.connected.store(true, Ordering::SeqCst);
        Ok(ack)
    }

    async fn subscribe(&self, topic: &str, qos: Qos) -> Result<OperationToken, TransportError> {
        self.record(TransportCall::Subscribe {
            topic: topic.to_string(),
            qos,
        })
        .await;
        let client_id = self.current_client().await?;

        if take_rejection(&self.subscribe_rejections) {
            return Ok(OperationToken::resolved(
                OperationKind::Subscribe,
                Err(rejected(OperationKind::Subscribe)),
            ));
        }

        self.broker.add_subscription(&client_id, topic).await;
        Ok(OperationToken::resolved(OperationKind::Subscribe, Ok(())))
    }

    async fn publish(
        &self,
        topic: &str,
        qos: Qos,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<OperationToken, TransportError> {
        self.record(TransportCall::Publish {
            topic: topic.to_string(),
            qos,
            retain,
            payload,
        })
        .await;
        self.current_client().await?;

        if take_rejection(&self.publish_rejections) {
            return Ok(OperationToken::resolved(
                OperationKind::Publish,
                Err(rejected(OperationKind::Publish)),
            ));
        }

        let outstanding = self.outstanding_publishes.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_outstanding_publishes
            .fetch_max(outstanding, Ordering::SeqCst);

        let (completer, token) = OperationToken::pending(OperationKind::Publish);
        let counter = self.outstanding_publishes.clone();
        match self.ack_delay {
            None => {
                counter.fetch_sub(1, Ordering::SeqCst);
                completer.succeed();
            }
            Some(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    counter.fetch_sub(1, Ordering::SeqCst);
                    completer.succeed();
                });
            }
        }
        Ok(token)
    }

    async fn unsubscribe(&self, topic: &str) -> Result<OperationToken, TransportError> {
        self.record(TransportCall::Unsubscribe {
            topic: topic.to_string(),
        })
        .await;
        let client_id = self.current_client().await?;

        self.broker.remove_subscription(&client_id, topic).await;
        Ok(OperationToken::resolved(OperationKind::Unsubscribe, Ok(())))
    }

    async fn disconnect(&self, grace: Duration) -> Result<(), TransportError> {
        self.record(TransportCall::Disconnect { grace }).await;
        self.connected.store(false, Ordering::SeqCst);

        if let Some(session) = self.session.lock().await.take() {
            if session.clean {
                self.broker.discard_session(&session.client_id).await;
            }
        }

        if self.disconnect_failure {
            return Err(TransportError::ConnectionLost(
                "mock disconnect failure".to_string(),
            ));
        }
        Ok(())
    }
}

/// Observer that records every event it receives
#[derive(Debug, Default)]
pub struct RecordingObserver {
    connections: std::sync::Mutex<Vec<ConnectionInfo>>,
    messages: std::sync::Mutex<Vec<IncomingMessage>>,
    lost: std::sync::Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn messages(&self) -> Vec<IncomingMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn lost_reasons(&self) -> Vec<String> {
        self.lost
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_connected(&self, info: &ConnectionInfo) {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(info.clone());
    }

    fn on_message(&self, message: &IncomingMessage) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
    }

    fn on_connection_lost(&self, reason: &str) {
        self.lost
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(reason.to_string());
    }
}

/// Placeholder certificate material; the mock never performs a handshake
pub fn test_security_context() -> SecurityContext {
    SecurityContext::new(
        vec![CertificateDer::from(b"mock certificate".to_vec())],
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(b"mock key".to_vec())),
    )
}

/// Builder preloaded with a complete mock configuration
pub fn test_session_config_builder(client_id: &str) -> SessionConfigBuilder {
    SessionConfig::builder()
        .broker_host("broker.example.net")
        .client_id(client_id)
        .username("client1-authn-ID")
        .security(test_security_context())
}

pub fn test_session_config(client_id: &str) -> SessionConfig {
    test_session_config_builder(client_id)
        .build()
        .expect("mock session config should be valid")
}
