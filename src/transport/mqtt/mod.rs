//! MQTT 3.1.1 transport over mutual TLS
//!
//! The module separates pure functions from I/O:
//!
//! - [`connection`] - option building and error classification
//! - [`message_handler`] - routing of rumqttc events
//! - [`ack_tracker`] - binding requests to packet ids and resolving tokens
//! - [`client`] - the event loop task and the [`SessionTransport`](crate::transport::SessionTransport) implementation
//!
//! # Example
//!
//! ```rust,no_run
//! use mtls_pubsub::transport::mqtt::MqttTransport;
//! use mtls_pubsub::transport::{Qos, SessionTransport};
//! use std::time::Duration;
//! # use mtls_pubsub::session::SessionConfig;
//! # fn session_config() -> SessionConfig { unimplemented!() }
//! # tokio_test::block_on(async {
//! let transport = MqttTransport::new();
//! let ack = transport.connect(&session_config()).await?;
//! println!("session present: {}", ack.session_present);
//!
//! let token = transport
//!     .publish("sample/t1", Qos::AtLeastOnce, false, b"hello #0!".to_vec())
//!     .await?;
//! token.wait().await?;
//!
//! transport.disconnect(Duration::from_millis(250)).await?;
//! # Ok::<(), mtls_pubsub::TransportError>(())
//! # });
//! ```

pub mod ack_tracker;
pub mod client;
pub mod connection;
pub mod message_handler;

// Re-export public types for convenience
pub use ack_tracker::AckTracker;
pub use client::{MqttTransport, DEFAULT_CONNECT_TIMEOUT};
pub use connection::{configure_mqtt_options, ConnectionState};
pub use message_handler::{EventRoute, MessageHandler};
