//! Transport layer for the broker session
//!
//! This module provides the transport abstraction the session controller
//! drives, and the MQTT 3.1.1 implementation over mutual TLS.

use crate::session::config::SessionConfig;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub mod mqtt;
pub mod tls;
pub mod token;

pub use token::{Completion, OperationKind, OperationToken, TokenCompleter};

/// Delivery guarantee requested for a subscribe or publish operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Qos {
    /// Fire-and-forget, no acknowledgment (QoS 0)
    AtMostOnce,
    /// Broker confirms receipt, duplicates possible (QoS 1)
    AtLeastOnce,
    /// Four-way handshake, delivered once (QoS 2)
    ExactlyOnce,
}

impl Qos {
    /// Parse a numeric MQTT QoS level
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Qos::AtMostOnce),
            1 => Some(Qos::AtLeastOnce),
            2 => Some(Qos::ExactlyOnce),
            _ => None,
        }
    }

    pub fn level(self) -> u8 {
        match self {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        }
    }

    /// Whether the broker sends an acknowledgment for publishes at this level
    pub fn is_acknowledged(self) -> bool {
        !matches!(self, Qos::AtMostOnce)
    }
}

impl fmt::Display for Qos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.level())
    }
}

/// Broker acknowledgment of a session connect
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectAck {
    /// Broker holds state from a previous session for this client id
    pub session_present: bool,
    /// Subscriptions the transport knows were restored with the session
    pub restored_subscriptions: Vec<String>,
}

/// Transport-level failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("TLS setup failed: {0}")]
    Tls(String),
    #[error("Connection refused by broker: {0}")]
    ConnectionRefused(String),
    #[error("Connection failed")]
    ConnectFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Session already started")]
    AlreadyStarted,
    #[error("Broker rejected {operation}: {reason}")]
    Rejected {
        operation: OperationKind,
        reason: String,
    },
    #[error("Failed to issue {operation} request")]
    RequestFailed {
        operation: OperationKind,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("{operation} token abandoned before acknowledgment")]
    Abandoned { operation: OperationKind },
}

impl TransportError {
    /// Whether repeating the same request on the same session can succeed
    ///
    /// Only broker rejections qualify. Every other failure means the session
    /// itself is gone and no reconnection is attempted.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Rejected { .. })
    }
}

/// Session transport abstraction
///
/// Implementations own the network session. All methods take `&self` so the
/// controller and the message loop can share one transport through an `Arc`;
/// publish requests must be accepted concurrently with subscribe and
/// unsubscribe requests.
#[async_trait::async_trait]
pub trait SessionTransport: Send + Sync + 'static {
    /// Open the session and wait for the broker acknowledgment
    async fn connect(&self, config: &SessionConfig) -> Result<ConnectAck, TransportError>;

    /// Request a subscription, returning the token for its SUBACK
    async fn subscribe(&self, topic: &str, qos: Qos) -> Result<OperationToken, TransportError>;

    /// Request a publish, returning the token for its acknowledgment
    async fn publish(
        &self,
        topic: &str,
        qos: Qos,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<OperationToken, TransportError>;

    /// Request removal of a subscription, returning the token for its UNSUBACK
    async fn unsubscribe(&self, topic: &str) -> Result<OperationToken, TransportError>;

    /// Close the session, giving in-flight acknowledgments up to `grace` to flush
    async fn disconnect(&self, grace: Duration) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_from_level() {
        assert_eq!(Qos::from_level(0), Some(Qos::AtMostOnce));
        assert_eq!(Qos::from_level(1), Some(Qos::AtLeastOnce));
        assert_eq!(Qos::from_level(2), Some(Qos::ExactlyOnce));
        assert_eq!(Qos::from_level(3), None);
    }

    #[test]
    fn test_qos_level_and_display() {
        for level in 0..=2u8 {
            let qos = Qos::from_level(level).unwrap();
            assert_eq!(qos.level(), level);
            assert_eq!(qos.to_string(), level.to_string());
        }
    }

    #[test]
    fn test_qos_acknowledged() {
        assert!(!Qos::AtMostOnce.is_acknowledged());
        assert!(Qos::AtLeastOnce.is_acknowledged());
        assert!(Qos::ExactlyOnce.is_acknowledged());
    }

    #[test]
    fn test_transport_error_display() {
        let errors = vec![
            TransportError::Tls("bad key".to_string()),
            TransportError::ConnectionRefused("NotAuthorized".to_string()),
            TransportError::ConnectFailed("handshake".to_string().into()),
            TransportError::ConnectionLost("eof".to_string()),
            TransportError::NotConnected,
            TransportError::AlreadyStarted,
            TransportError::Rejected {
                operation: OperationKind::Subscribe,
                reason: "failure".to_string(),
            },
            TransportError::RequestFailed {
                operation: OperationKind::Publish,
                source: "closed".to_string().into(),
            },
            TransportError::Abandoned {
                operation: OperationKind::Publish,
            },
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }

    #[test]
    fn test_only_rejections_are_transient() {
        assert!(TransportError::Rejected {
            operation: OperationKind::Subscribe,
            reason: "failure".to_string(),
        }
        .is_transient());
        assert!(!TransportError::NotConnected.is_transient());
        assert!(!TransportError::ConnectionLost("eof".to_string()).is_transient());
        assert!(!TransportError::Abandoned {
            operation: OperationKind::Publish
        }
        .is_transient());
    }
}
