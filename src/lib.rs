//! mTLS publish/subscribe client
//!
//! A long-lived MQTT 3.1.1 client that authenticates to its broker with a TLS
//! client certificate, optionally subscribes to one topic, optionally publishes
//! a numbered message stream to it, and releases the session deterministically
//! on SIGINT or SIGTERM.
//!
//! # Overview
//!
//! - [`session`] - the lifecycle state machine, message loop and observer
//! - [`transport`] - the transport seam, operation tokens and the rumqttc
//!   implementation
//! - [`config`] and [`credentials`] - settings and certificate loading
//! - [`observability`] - `tracing` setup and session spans
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mtls_pubsub::session::{
//!     LoggingObserver, PublishSettings, RunMode, RunPlan, SessionConfig, SessionController,
//!     SessionPersistence,
//! };
//! use mtls_pubsub::credentials::{load_security_context, CredentialFiles};
//! use mtls_pubsub::transport::{mqtt::MqttTransport, tls::PeerVerification, Qos};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let security = load_security_context(
//!     &CredentialFiles {
//!         cert_file: "client1.crt".into(),
//!         key_file: "client1.key".into(),
//!         ca_file: None,
//!     },
//!     PeerVerification::Mutual,
//! )?;
//!
//! let config = SessionConfig::builder()
//!     .broker_host("broker.example.net")
//!     .client_id("client1-session1")
//!     .username("client1-authn-ID")
//!     .security(security)
//!     .persistence(SessionPersistence::Resume)
//!     .observer(Arc::new(LoggingObserver))
//!     .build()?;
//!
//! let plan = RunPlan::new(
//!     "sample/topic",
//!     Qos::AtLeastOnce,
//!     RunMode::SubscribeAndPublish,
//!     Some(PublishSettings::new("hello")),
//! )?;
//!
//! let mut controller = SessionController::new(config, MqttTransport::new());
//! controller.run(&plan, async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod credentials;
pub mod error;
pub mod observability;
pub mod session;
pub mod shutdown;
pub mod testing;
pub mod transport;

pub use config::{ClientSettings, ConfigError, SettingsOverrides};
pub use error::SessionError;
pub use session::{SessionConfig, SessionController, SessionState};
pub use transport::{OperationToken, Qos, SessionTransport, TransportError};
