//! What a session does once it is ready

use crate::config::ConfigError;
use crate::transport::Qos;
use std::time::Duration;

/// Time the transport gets to flush acknowledgments on disconnect
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(250);

/// Pause between two publishes of the message loop
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_secs(2);

/// Time the message loop gets to stop during draining
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Subscribe, publish, or both
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    SubscribeOnly,
    PublishOnly,
    SubscribeAndPublish,
}

impl RunMode {
    pub fn from_flags(subscribe: bool, publish: bool) -> Result<Self, ConfigError> {
        match (subscribe, publish) {
            (true, true) => Ok(RunMode::SubscribeAndPublish),
            (true, false) => Ok(RunMode::SubscribeOnly),
            (false, true) => Ok(RunMode::PublishOnly),
            (false, false) => Err(ConfigError::NoRunMode),
        }
    }

    pub fn subscribes(self) -> bool {
        matches!(self, RunMode::SubscribeOnly | RunMode::SubscribeAndPublish)
    }

    pub fn publishes(self) -> bool {
        matches!(self, RunMode::PublishOnly | RunMode::SubscribeAndPublish)
    }
}

/// Parameters of the periodic publisher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishSettings {
    message: String,
    sequence_base: u64,
    interval: Duration,
}

impl PublishSettings {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sequence_base: 0,
            interval: DEFAULT_PUBLISH_INTERVAL,
        }
    }

    /// Sequence number of the first publish
    pub fn with_sequence_base(mut self, base: u64) -> Self {
        self.sequence_base = base;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn sequence_base(&self) -> u64 {
        self.sequence_base
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Payload for sequence number `sequence`: `"<message> #<n>!"`
    pub fn payload(&self, sequence: u64) -> String {
        format!("{} #{}!", self.message, sequence)
    }
}

/// Everything the controller needs to drive one session run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    topic: String,
    qos: Qos,
    mode: RunMode,
    publish: Option<PublishSettings>,
    grace_period: Duration,
    drain_timeout: Duration,
}

impl RunPlan {
    pub fn new(
        topic: impl Into<String>,
        qos: Qos,
        mode: RunMode,
        publish: Option<PublishSettings>,
    ) -> Result<Self, ConfigError> {
        let topic = topic.into();
        if topic.trim().is_empty() {
            return Err(ConfigError::MissingField("topic".to_string()));
        }

        if mode.publishes() {
            match &publish {
                Some(settings) if !settings.message().is_empty() => {}
                _ => return Err(ConfigError::MissingMessage),
            }
            if topic.contains(['+', '#']) {
                return Err(ConfigError::InvalidConfig(format!(
                    "cannot publish to wildcard topic {topic}"
                )));
            }
        }

        // Subscribe-only runs ignore publish settings
        let publish = if mode.publishes() { publish } else { None };

        Ok(Self {
            topic,
            qos,
            mode,
            publish,
            grace_period: DEFAULT_GRACE_PERIOD,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        })
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn qos(&self) -> Qos {
        self.qos
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn publish(&self) -> Option<&PublishSettings> {
        self.publish.as_ref()
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }
}
