//! MQTT 3.1.1 session transport over mutual TLS
//!
//! [`MqttTransport`] drives a rumqttc event loop on its own task. Requests are
//! registered with an [`AckTracker`] before they are handed to rumqttc, and
//! the event loop task resolves their tokens as acknowledgments arrive.
//!
//! A lost connection is not re-established: every pending token fails, the
//! observer is told, and later requests report [`TransportError::NotConnected`].

use super::ack_tracker::AckTracker;
use super::connection::{classify_connect_error, configure_mqtt_options, to_wire_qos, ConnectionState};
use super::message_handler::{EventRoute, MessageHandler};
use crate::session::config::SessionConfig;
use crate::session::observer::SessionObserver;
use crate::transport::{
    ConnectAck, OperationKind, OperationToken, Qos, SessionTransport, TransportError,
};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, EventLoop, MqttOptions};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, trace, warn, Instrument};

/// Capacity of the rumqttc request channel
const REQUEST_CAPACITY: usize = 10;

/// Time allowed for the TLS handshake and CONNACK
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

type ConnAckResult = Result<bool, TransportError>;

fn lock_tracker(tracker: &StdMutex<AckTracker>) -> MutexGuard<'_, AckTracker> {
    tracker.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Aborts a spawned task when dropped, unless disarmed
struct AbortGuard {
    handle: AbortHandle,
    armed: bool,
}

impl AbortGuard {
    fn new(handle: &JoinHandle<()>) -> Self {
        Self {
            handle: handle.abort_handle(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if self.armed {
            self.handle.abort();
        }
    }
}

/// State of one established connection
struct ActiveConnection {
    client: AsyncClient,
    state_rx: watch::Receiver<ConnectionState>,
    tracker: Arc<StdMutex<AckTracker>>,
    handle: JoinHandle<()>,
}

impl ActiveConnection {
    /// Check connection state before operations
    fn ensure_connected(&self) -> Result<(), TransportError> {
        match &*self.state_rx.borrow() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Disconnected(reason) => {
                Err(TransportError::ConnectionLost(reason.clone()))
            }
            ConnectionState::Connecting => Err(TransportError::NotConnected),
        }
    }
}

/// rumqttc-backed [`SessionTransport`]
pub struct MqttTransport {
    connection: Mutex<Option<ActiveConnection>>,
    known_subscriptions: StdMutex<Vec<String>>,
    connect_timeout: Duration,
}

impl Default for MqttTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttTransport {
    pub fn new() -> Self {
        Self {
            connection: Mutex::new(None),
            known_subscriptions: StdMutex::new(Vec::new()),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn known_subscriptions(&self) -> MutexGuard<'_, Vec<String>> {
        self.known_subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for the event loop to report the CONNACK outcome
    async fn wait_for_connack(
        &self,
        connack_rx: oneshot::Receiver<ConnAckResult>,
    ) -> Result<bool, TransportError> {
        match tokio::time::timeout(self.connect_timeout, connack_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::ConnectFailed(
                "event loop stopped before CONNACK".into(),
            )),
            Err(_) => Err(TransportError::ConnectFailed(
                format!("no CONNACK within {:?}", self.connect_timeout).into(),
            )),
        }
    }

    /// Start an event loop for `mqtt_options` and wait for the CONNACK
    ///
    /// The event loop task is aborted unless the connection gets stored, so
    /// a failed or cancelled connect leaves nothing running.
    async fn open(
        &self,
        mqtt_options: MqttOptions,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<ConnectAck, TransportError> {
        let mut connection = self.connection.lock().await;
        if connection.is_some() {
            return Err(TransportError::AlreadyStarted);
        }

        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (connack_tx, connack_rx) = oneshot::channel();
        let tracker = Arc::new(StdMutex::new(AckTracker::new()));

        let task = EventLoopTask {
            tracker: tracker.clone(),
            observer,
            state_tx,
            connack_tx: Some(connack_tx),
            disconnecting: false,
        };
        let handle = tokio::spawn(task.run(event_loop).in_current_span());
        let guard = AbortGuard::new(&handle);

        let session_present = self.wait_for_connack(connack_rx).await?;

        let restored_subscriptions = {
            let mut known = self.known_subscriptions();
            if !session_present {
                known.clear();
            }
            known.clone()
        };

        *connection = Some(ActiveConnection {
            client,
            state_rx,
            tracker,
            handle,
        });
        guard.disarm();

        Ok(ConnectAck {
            session_present,
            restored_subscriptions,
        })
    }
}

#[async_trait]
impl SessionTransport for MqttTransport {
    async fn connect(&self, config: &SessionConfig) -> Result<ConnectAck, TransportError> {
        let mqtt_options = configure_mqtt_options(config)?;
        let ack = self.open(mqtt_options, config.observer().clone()).await?;

        info!(
            session_present = ack.session_present,
            "Connected to {}",
            config.broker_uri()
        );
        Ok(ack)
    }

    async fn subscribe(&self, topic: &str, qos: Qos) -> Result<OperationToken, TransportError> {
        let connection = self.connection.lock().await;
        let active = connection.as_ref().ok_or(TransportError::NotConnected)?;
        active.ensure_connected()?;

        let (completer, token) = OperationToken::pending(OperationKind::Subscribe);
        lock_tracker(&active.tracker).enqueue(qos, completer);

        if let Err(e) = active.client.subscribe(topic, to_wire_qos(qos)).await {
            lock_tracker(&active.tracker).discard_last(OperationKind::Subscribe);
            return Err(TransportError::RequestFailed {
                operation: OperationKind::Subscribe,
                source: e.to_string().into(),
            });
        }

        let mut known = self.known_subscriptions();
        if !known.iter().any(|t| t == topic) {
            known.push(topic.to_string());
        }
        Ok(token)
    }

    async fn publish(
        &self,
        topic: &str,
        qos: Qos,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<OperationToken, TransportError> {
        let connection = self.connection.lock().await;
        let active = connection.as_ref().ok_or(TransportError::NotConnected)?;
        active.ensure_connected()?;

        let (completer, token) = OperationToken::pending(OperationKind::Publish);
        lock_tracker(&active.tracker).enqueue(qos, completer);

        if let Err(e) = active
            .client
            .publish(topic, to_wire_qos(qos), retain, payload)
            .await
        {
            lock_tracker(&active.tracker).discard_last(OperationKind::Publish);
            return Err(TransportError::RequestFailed {
                operation: OperationKind::Publish,
                source: e.to_string().into(),
            });
        }

        Ok(token)
    }

    async fn unsubscribe(&self, topic: &str) -> Result<OperationToken, TransportError> {
        let connection = self.connection.lock().await;
        let active = connection.as_ref().ok_or(TransportError::NotConnected)?;
        active.ensure_connected()?;

        let (completer, token) = OperationToken::pending(OperationKind::Unsubscribe);
        lock_tracker(&active.tracker).enqueue(Qos::AtLeastOnce, completer);

        if let Err(e) = active.client.unsubscribe(topic).await {
            lock_tracker(&active.tracker).discard_last(OperationKind::Unsubscribe);
            return Err(TransportError::RequestFailed {
                operation: OperationKind::Unsubscribe,
                source: e.to_string().into(),
            });
        }

        self.known_subscriptions().retain(|t| t != topic);
        Ok(token)
    }

    async fn disconnect(&self, grace: Duration) -> Result<(), TransportError> {
        let Some(active) = self.connection.lock().await.take() else {
            debug!("Disconnect requested without a connection");
            return Ok(());
        };
        let ActiveConnection {
            client,
            tracker,
            mut handle,
            ..
        } = active;

        // Queued requests are flushed ahead of the DISCONNECT
        let closed = tokio::time::timeout(grace, async {
            let requested = client.disconnect().await;
            let _ = (&mut handle).await;
            requested
        })
        .await;

        let result = match closed {
            Ok(Ok(())) => {
                debug!("Event loop stopped after disconnect");
                Ok(())
            }
            Ok(Err(e)) => Err(TransportError::RequestFailed {
                operation: OperationKind::Disconnect,
                source: e.to_string().into(),
            }),
            Err(_) => {
                warn!("Event loop did not stop within {:?}, forcing closure", grace);
                handle.abort();
                Ok(())
            }
        };

        let abandoned = lock_tracker(&tracker).fail_all("session closed");
        if abandoned > 0 {
            debug!(abandoned, "Unacknowledged operations abandoned at disconnect");
        }

        result
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        // Can't disconnect from Drop; only stop the background task
        if let Some(active) = self.connection.get_mut().take() {
            active.handle.abort();
        }
    }
}

/// State owned by the spawned event loop task
struct EventLoopTask {
    tracker: Arc<StdMutex<AckTracker>>,
    observer: Arc<dyn SessionObserver>,
    state_tx: watch::Sender<ConnectionState>,
    connack_tx: Option<oneshot::Sender<ConnAckResult>>,
    disconnecting: bool,
}

impl EventLoopTask {
    async fn run(mut self, mut event_loop: EventLoop) {
        debug!("Starting MQTT event loop");
        loop {
            match event_loop.poll().await {
                Ok(event) => self.handle_route(MessageHandler::route_event(&event)),
                Err(e) => {
                    self.handle_error(e);
                    break;
                }
            }
        }
        debug!("MQTT event loop stopped");
    }

    /// Apply one routed event
    fn handle_route(&mut self, route: EventRoute) {
        match route {
            EventRoute::ConnectionAcknowledged { session_present } => {
                let _ = self.state_tx.send(ConnectionState::Connected);
                if let Some(tx) = self.connack_tx.take() {
                    let _ = tx.send(Ok(session_present));
                }
            }
            EventRoute::MessageReceived(message) => self.observer.on_message(&message),
            EventRoute::OutgoingRequest { kind, pkid } => {
                lock_tracker(&self.tracker).on_outgoing(kind, pkid);
            }
            EventRoute::PublishAcknowledged(pkid) => {
                lock_tracker(&self.tracker).on_publish_ack(pkid);
            }
            EventRoute::PublishCompleted(pkid) => {
                lock_tracker(&self.tracker).on_publish_complete(pkid);
            }
            EventRoute::SubscriptionAcknowledged { pkid, rejected } => {
                if rejected {
                    warn!(pkid, "Broker rejected subscription");
                }
                lock_tracker(&self.tracker).on_subscribe_ack(pkid, rejected);
            }
            EventRoute::UnsubscriptionAcknowledged(pkid) => {
                lock_tracker(&self.tracker).on_unsubscribe_ack(pkid);
            }
            EventRoute::DisconnectSent => {
                self.disconnecting = true;
            }
            EventRoute::InfrastructureEvent(event) => trace!("MQTT event: {}", event),
            EventRoute::OutgoingEvent => {}
        }
    }

    fn handle_error(&mut self, error: ConnectionError) {
        if let Some(tx) = self.connack_tx.take() {
            let error = classify_connect_error(error);
            let reason = error.to_string();
            let _ = tx.send(Err(error));
            self.close(&reason);
            return;
        }

        let reason = error.to_string();
        if self.disconnecting {
            debug!("Connection closed after disconnect: {}", reason);
        } else {
            error!("MQTT connection lost: {}", reason);
            self.observer.on_connection_lost(&reason);
        }
        self.close(&reason);
    }

    fn close(&mut self, reason: &str) {
        let failed = lock_tracker(&self.tracker).fail_all(reason);
        if failed > 0 {
            debug!(failed, "Failed pending operations: {}", reason);
        }
        let _ = self
            .state_tx
            .send(ConnectionState::Disconnected(reason.to_string()));
    }
}
