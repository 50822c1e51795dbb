//! Immutable session configuration and its builder
//!
//! A [`SessionConfig`] is assembled once from validated inputs and consumed by
//! the transport when the session is created. The password is always empty:
//! the client identity is asserted by the TLS client certificate.

use super::observer::{LoggingObserver, SessionObserver};
use crate::config::ConfigError;
use crate::transport::tls::SecurityContext;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Fixed TLS port of the broker
pub const BROKER_PORT: u16 = 8883;

/// Default keep-alive interval
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// MQTT protocol version spoken on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// MQTT 3.1.1, protocol level 4
    V311,
}

impl ProtocolVersion {
    pub fn level(self) -> u8 {
        match self {
            ProtocolVersion::V311 => 4,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V311 => f.write_str("MQTT 3.1.1"),
        }
    }
}

/// Session persistence requested at connect time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPersistence {
    /// Discard previous subscriptions and queued state
    Clean,
    /// Ask the broker to keep and replay the previous session
    #[default]
    Resume,
}

impl SessionPersistence {
    pub fn from_clean_session(clean: bool) -> Self {
        if clean {
            SessionPersistence::Clean
        } else {
            SessionPersistence::Resume
        }
    }

    pub fn is_clean(self) -> bool {
        matches!(self, SessionPersistence::Clean)
    }
}

/// Connection parameters for one broker session
#[derive(Clone)]
pub struct SessionConfig {
    broker_host: String,
    client_id: String,
    username: String,
    security: SecurityContext,
    persistence: SessionPersistence,
    keep_alive: Duration,
    observer: Arc<dyn SessionObserver>,
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    pub fn broker_host(&self) -> &str {
        &self.broker_host
    }

    pub fn broker_port(&self) -> u16 {
        BROKER_PORT
    }

    /// Broker URI in `tls://host:port` form
    pub fn broker_uri(&self) -> String {
        format!("tls://{}:{}", self.broker_host, BROKER_PORT)
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        ProtocolVersion::V311
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Always empty; the certificate proves identity
    pub fn password(&self) -> &str {
        ""
    }

    pub fn security(&self) -> &SecurityContext {
        &self.security
    }

    pub fn persistence(&self) -> SessionPersistence {
        self.persistence
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    pub fn observer(&self) -> &Arc<dyn SessionObserver> {
        &self.observer
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("broker_uri", &self.broker_uri())
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("security", &self.security)
            .field("persistence", &self.persistence)
            .field("keep_alive", &self.keep_alive)
            .finish_non_exhaustive()
    }
}

/// Builder for [`SessionConfig`]
#[derive(Default)]
pub struct SessionConfigBuilder {
    broker_host: Option<String>,
    client_id: Option<String>,
    username: Option<String>,
    security: Option<SecurityContext>,
    persistence: SessionPersistence,
    keep_alive: Option<Duration>,
    observer: Option<Arc<dyn SessionObserver>>,
}

impl SessionConfigBuilder {
    pub fn broker_host(mut self, host: impl Into<String>) -> Self {
        self.broker_host = Some(host.into());
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Authentication identity sent as the MQTT username
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn security(mut self, security: SecurityContext) -> Self {
        self.security = Some(security);
        self
    }

    pub fn persistence(mut self, persistence: SessionPersistence) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Validate the inputs and produce the immutable configuration
    pub fn build(self) -> Result<SessionConfig, ConfigError> {
        let broker_host = required("broker host", self.broker_host)?;
        let client_id = required("client id", self.client_id)?;
        let username = required("username", self.username)?;
        let security = self
            .security
            .ok_or_else(|| ConfigError::MissingField("security context".to_string()))?;

        validate_client_id(&client_id)?;

        if security.certificate_count() == 0 {
            return Err(ConfigError::InvalidConfig(
                "security context must contain at least one client certificate".to_string(),
            ));
        }

        let keep_alive = self.keep_alive.unwrap_or(DEFAULT_KEEP_ALIVE);
        if keep_alive < Duration::from_secs(1) {
            return Err(ConfigError::InvalidConfig(
                "keep-alive must be at least one second".to_string(),
            ));
        }

        Ok(SessionConfig {
            broker_host,
            client_id,
            username,
            security,
            persistence: self.persistence,
            keep_alive,
            observer: self
                .observer
                .unwrap_or_else(|| Arc::new(LoggingObserver)),
        })
    }
}

fn required(field: &str, value: Option<String>) -> Result<String, ConfigError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingField(field.to_string())),
    }
}

/// Client ids are reused across connects to resume sessions, so they must be
/// stable printable identifiers
fn validate_client_id(client_id: &str) -> Result<(), ConfigError> {
    if client_id.starts_with(char::is_whitespace) || client_id.chars().any(char::is_control) {
        return Err(ConfigError::InvalidClientId(client_id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tls::tests::{fixture_context, fixture_key};
    use crate::transport::tls::PeerVerification;

    fn complete_builder() -> SessionConfigBuilder {
        SessionConfig::builder()
            .broker_host("broker.example.net")
            .client_id("client1-session1")
            .username("client1-authn-ID")
            .security(fixture_context())
    }

    #[test]
    fn test_build_complete_config() {
        let config = complete_builder().build().unwrap();

        assert_eq!(config.broker_host(), "broker.example.net");
        assert_eq!(config.broker_port(), 8883);
        assert_eq!(config.broker_uri(), "tls://broker.example.net:8883");
        assert_eq!(config.client_id(), "client1-session1");
        assert_eq!(config.username(), "client1-authn-ID");
        assert_eq!(config.password(), "");
        assert_eq!(config.protocol_version(), ProtocolVersion::V311);
        assert_eq!(config.protocol_version().level(), 4);
        assert_eq!(config.persistence(), SessionPersistence::Resume);
        assert_eq!(config.keep_alive(), DEFAULT_KEEP_ALIVE);
    }

    #[test]
    fn test_missing_client_id() {
        let result = SessionConfig::builder()
            .broker_host("broker.example.net")
            .username("user")
            .security(fixture_context())
            .build();

        match result {
            Err(ConfigError::MissingField(field)) => assert_eq!(field, "client id"),
            other => panic!("expected missing client id, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_broker_host_rejected() {
        let result = complete_builder().broker_host("   ").build();
        assert!(matches!(result, Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn test_missing_security_context() {
        let result = SessionConfig::builder()
            .broker_host("broker.example.net")
            .client_id("client1")
            .username("user")
            .build();
        assert!(matches!(result, Err(ConfigError::MissingField(f)) if f == "security context"));
    }

    #[test]
    fn test_security_context_without_certificates_rejected() {
        let empty = SecurityContext::new(Vec::new(), fixture_key());

        let result = complete_builder().security(empty).build();
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_client_id_with_leading_whitespace_rejected() {
        let result = complete_builder().client_id(" client").build();
        assert!(matches!(result, Err(ConfigError::InvalidClientId(_))));
    }

    #[test]
    fn test_clean_session_flag() {
        let config = complete_builder()
            .persistence(SessionPersistence::from_clean_session(true))
            .build()
            .unwrap();
        assert!(config.persistence().is_clean());

        assert_eq!(
            SessionPersistence::from_clean_session(false),
            SessionPersistence::Resume
        );
    }

    #[test]
    fn test_keep_alive_lower_bound() {
        let result = complete_builder()
            .keep_alive(Duration::from_millis(10))
            .build();
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_verification_policy_carried() {
        let config = complete_builder()
            .security(fixture_context().with_verification(PeerVerification::SkipHostname))
            .build()
            .unwrap();
        assert_eq!(
            config.security().verification(),
            PeerVerification::SkipHostname
        );
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let config = complete_builder().build().unwrap();
        let debug = format!("{config:?}");
        assert!(debug.contains("tls://broker.example.net:8883"));
        assert!(!debug.contains("PRIVATE KEY"));
    }
}
