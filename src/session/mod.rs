//! Broker session lifecycle
//!
//! - [`config`] - immutable session configuration and its builder
//! - [`state`] - the lifecycle state machine
//! - [`plan`] - what a session does once it is ready
//! - [`policy`] - failure policy for subscribe, publish and unsubscribe
//! - [`message_loop`] - the periodic publisher
//! - [`controller`] - drives a session from connect to release
//! - [`observer`] - connection and message callbacks

pub mod config;
pub mod controller;
pub mod message_loop;
pub mod observer;
pub mod plan;
pub mod policy;
pub mod state;

pub use config::{SessionConfig, SessionConfigBuilder, SessionPersistence};
pub use controller::SessionController;
pub use message_loop::{LoopReport, MessageLoop};
pub use observer::{ConnectionInfo, IncomingMessage, LoggingObserver, SessionObserver};
pub use plan::{PublishSettings, RunMode, RunPlan};
pub use policy::{OperationPolicy, RetryConfig};
pub use state::SessionState;
