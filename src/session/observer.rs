//! Session event observer
//!
//! Callers receive connection and message events through an explicit
//! [`SessionObserver`] passed into the session configuration, instead of
//! registering handlers on a global client.

use bytes::Bytes;
use tracing::{info, warn};

/// Details reported when the broker accepts the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub broker_uri: String,
    pub client_id: String,
    pub session_present: bool,
}

/// Application message delivered by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub topic: String,
    pub payload: Bytes,
    pub retain: bool,
    pub duplicate: bool,
}

impl IncomingMessage {
    /// Payload as text, replacing invalid UTF-8
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Receiver of session events
pub trait SessionObserver: Send + Sync {
    /// Called once the broker acknowledged the connect
    fn on_connected(&self, info: &ConnectionInfo);

    /// Called for every application message received on the session
    fn on_message(&self, message: &IncomingMessage);

    /// Called when an established connection drops
    fn on_connection_lost(&self, _reason: &str) {}
}

/// Observer that reports every event through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl SessionObserver for LoggingObserver {
    fn on_connected(&self, info: &ConnectionInfo) {
        info!(
            broker = %info.broker_uri,
            client_id = %info.client_id,
            session_present = info.session_present,
            "Connected to {}",
            info.broker_uri
        );
    }

    fn on_message(&self, message: &IncomingMessage) {
        info!(
            topic = %message.topic,
            retain = message.retain,
            "Received message: {}",
            message.payload_text()
        );
    }

    fn on_connection_lost(&self, reason: &str) {
        warn!("The connection to the broker was lost: {}", reason);
    }
}
