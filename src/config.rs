//! Client settings: TOML file, environment and command-line overrides
//!
//! Settings are the raw, user-facing inputs. They are validated here and
//! turned into the typed values the session core consumes: a
//! [`SessionConfig`], a [`RunPlan`] and an [`OperationPolicy`].

use crate::credentials::{self, CredentialError, CredentialFiles};
use crate::session::config::{SessionConfig, SessionPersistence};
use crate::session::observer::SessionObserver;
use crate::session::plan::{PublishSettings, RunMode, RunPlan};
use crate::session::policy::{OperationPolicy, RetryConfig};
use crate::transport::tls::{PeerVerification, SecurityContext};
use crate::transport::Qos;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Complete client settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientSettings {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub tls: TlsSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub publish: PublishSection,
    #[serde(default)]
    pub retry: RetrySection,
}

/// Broker endpoint and identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Fully qualified broker host name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fqdn: Option<String>,
    /// Topic used for both subscribe and publish
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Authentication identity (MQTT username)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Client identifier; keep it stable to resume sessions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            fqdn: None,
            topic: None,
            username: None,
            client_id: None,
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

/// Certificate material
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TlsSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
    /// Extra CA bundle trusted in addition to the webpki roots
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,
    /// Verify the broker chain but not its hostname
    #[serde(default)]
    pub skip_hostname_verification: bool,
}

/// Session behavior
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    /// Discard broker-side session state on connect
    #[serde(default)]
    pub clean_session: bool,
    #[serde(default = "default_qos")]
    pub qos: u8,
    #[serde(default)]
    pub subscribe: bool,
    #[serde(default = "default_publish")]
    pub publish: bool,
    /// Time the transport gets to flush acknowledgments on disconnect
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    /// Time the message loop gets to stop during draining
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            clean_session: false,
            qos: default_qos(),
            subscribe: false,
            publish: default_publish(),
            grace_period_ms: default_grace_period_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

/// Message loop parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub sequence_base: u64,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            message: None,
            sequence_base: 0,
            interval_secs: default_interval_secs(),
        }
    }
}

/// Retry policy for subscribe, publish and unsubscribe
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrySection {
    /// Retries after the first failure; 0 fails fast
    #[serde(default)]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: Vec<u64>,
    #[serde(default = "default_sustained_delay_ms")]
    pub sustained_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            backoff_ms: default_backoff_ms(),
            sustained_delay_ms: default_sustained_delay_ms(),
        }
    }
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_qos() -> u8 {
    1
}

fn default_publish() -> bool {
    true
}

fn default_grace_period_ms() -> u64 {
    250
}

fn default_drain_timeout_ms() -> u64 {
    1000
}

fn default_interval_secs() -> u64 {
    2
}

fn default_backoff_ms() -> Vec<u64> {
    vec![25, 50, 100, 250]
}

fn default_sustained_delay_ms() -> u64 {
    250
}

/// Configuration errors, all detected before any network activity
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Missing required setting: {0}")]
    MissingField(String),
    #[error("Invalid client id: {0:?}")]
    InvalidClientId(String),
    #[error("Invalid QoS level {0} (expected 0, 1 or 2)")]
    InvalidQos(u8),
    #[error("At least one of subscribe or publish must be enabled")]
    NoRunMode,
    #[error("A message must be set when publishing")]
    MissingMessage,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Credential error: {0}")]
    Credentials(#[from] CredentialError),
}

/// Values supplied on the command line or through the environment
///
/// `None` leaves the file or default value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsOverrides {
    pub fqdn: Option<String>,
    pub topic: Option<String>,
    pub username: Option<String>,
    pub client_id: Option<String>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub ca_file: Option<PathBuf>,
    pub skip_hostname_verification: Option<bool>,
    pub clean_session: Option<bool>,
    pub qos: Option<u8>,
    pub subscribe: Option<bool>,
    pub publish: Option<bool>,
    pub message: Option<String>,
    pub sequence_base: Option<u64>,
    pub interval_secs: Option<u64>,
}

impl ClientSettings {
    /// Load settings from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let settings: ClientSettings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Layer command-line and environment values over the current settings
    pub fn apply_overrides(&mut self, overrides: SettingsOverrides) {
        fn set<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        set(&mut self.broker.fqdn, overrides.fqdn);
        set(&mut self.broker.topic, overrides.topic);
        set(&mut self.broker.username, overrides.username);
        set(&mut self.broker.client_id, overrides.client_id);
        set(&mut self.tls.cert_file, overrides.cert_file);
        set(&mut self.tls.key_file, overrides.key_file);
        set(&mut self.tls.ca_file, overrides.ca_file);
        set(&mut self.publish.message, overrides.message);

        if let Some(skip) = overrides.skip_hostname_verification {
            self.tls.skip_hostname_verification = skip;
        }
        if let Some(clean) = overrides.clean_session {
            self.session.clean_session = clean;
        }
        if let Some(qos) = overrides.qos {
            self.session.qos = qos;
        }
        if let Some(subscribe) = overrides.subscribe {
            self.session.subscribe = subscribe;
        }
        if let Some(publish) = overrides.publish {
            self.session.publish = publish;
        }
        if let Some(base) = overrides.sequence_base {
            self.publish.sequence_base = base;
        }
        if let Some(interval) = overrides.interval_secs {
            self.publish.interval_secs = interval;
        }
    }

    /// Check every setting that does not require touching the filesystem
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.run_plan()?;
        required("broker fqdn (MQTT_BROKER_FQDN)", &self.broker.fqdn)?;
        required("username (MQTT_USERNAME)", &self.broker.username)?;
        required("client id (MQTT_CLIENT_ID)", &self.broker.client_id)?;
        self.credential_files()?;
        Ok(())
    }

    pub fn qos(&self) -> Result<Qos, ConfigError> {
        Qos::from_level(self.session.qos).ok_or(ConfigError::InvalidQos(self.session.qos))
    }

    pub fn run_mode(&self) -> Result<RunMode, ConfigError> {
        RunMode::from_flags(self.session.subscribe, self.session.publish)
    }

    pub fn peer_verification(&self) -> PeerVerification {
        if self.tls.skip_hostname_verification {
            PeerVerification::SkipHostname
        } else {
            PeerVerification::Mutual
        }
    }

    /// Build the run plan: topic, QoS, mode and message loop parameters
    pub fn run_plan(&self) -> Result<RunPlan, ConfigError> {
        let mode = self.run_mode()?;
        let qos = self.qos()?;
        let topic = required("topic (MQTT_TOPIC)", &self.broker.topic)?;

        let publish = if mode.publishes() {
            let message = self
                .publish
                .message
                .clone()
                .filter(|m| !m.is_empty())
                .ok_or(ConfigError::MissingMessage)?;
            if self.publish.interval_secs == 0 {
                return Err(ConfigError::InvalidConfig(
                    "publish interval must be at least one second".to_string(),
                ));
            }
            Some(
                PublishSettings::new(message)
                    .with_sequence_base(self.publish.sequence_base)
                    .with_interval(Duration::from_secs(self.publish.interval_secs)),
            )
        } else {
            None
        };

        Ok(RunPlan::new(topic, qos, mode, publish)?
            .with_grace_period(Duration::from_millis(self.session.grace_period_ms))
            .with_drain_timeout(Duration::from_millis(self.session.drain_timeout_ms)))
    }

    pub fn credential_files(&self) -> Result<CredentialFiles, ConfigError> {
        let cert_file = self
            .tls
            .cert_file
            .clone()
            .ok_or_else(|| ConfigError::MissingField("certificate file (MQTT_TLS_CERT_FILE)".to_string()))?;
        let key_file = self
            .tls
            .key_file
            .clone()
            .ok_or_else(|| ConfigError::MissingField("key file (MQTT_TLS_KEY_FILE)".to_string()))?;

        Ok(CredentialFiles {
            cert_file,
            key_file,
            ca_file: self.tls.ca_file.clone(),
        })
    }

    /// Load the certificate material into a validated security context
    pub fn security_context(&self) -> Result<SecurityContext, ConfigError> {
        let files = self.credential_files()?;
        Ok(credentials::load_security_context(
            &files,
            self.peer_verification(),
        )?)
    }

    /// Assemble the immutable session configuration
    pub fn session_config(
        &self,
        security: SecurityContext,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<SessionConfig, ConfigError> {
        let mut builder = SessionConfig::builder()
            .security(security)
            .persistence(SessionPersistence::from_clean_session(
                self.session.clean_session,
            ))
            .keep_alive(Duration::from_secs(self.broker.keep_alive_secs))
            .observer(observer);

        if let Some(fqdn) = &self.broker.fqdn {
            builder = builder.broker_host(fqdn.clone());
        }
        if let Some(client_id) = &self.broker.client_id {
            builder = builder.client_id(client_id.clone());
        }
        if let Some(username) = &self.broker.username {
            builder = builder.username(username.clone());
        }

        builder.build()
    }

    pub fn operation_policy(&self) -> OperationPolicy {
        if self.retry.max_attempts == 0 {
            OperationPolicy::FailFast
        } else {
            OperationPolicy::Retry(RetryConfig {
                max_attempts: self.retry.max_attempts,
                backoff_pattern: self.retry.backoff_ms.clone(),
                sustained_delay: self.retry.sustained_delay_ms,
            })
        }
    }

    /// Create settings for unit testing
    #[cfg(test)]
    pub fn test_settings() -> Self {
        let toml_content = r#"
[broker]
fqdn = "broker.example.net"
topic = "t1"
username = "client1-authn-ID"
client_id = "client1-session1"

[tls]
cert_file = "tests/fixtures/client.crt"
key_file = "tests/fixtures/client.key"

[publish]
message = "hello"
"#;
        toml::from_str(toml_content).expect("Test settings should parse")
    }
}

fn required(field: &str, value: &Option<String>) -> Result<String, ConfigError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value.clone()),
        _ => Err(ConfigError::MissingField(field.to_string())),
    }
}
