//! Pure connection setup for the MQTT 3.1.1 transport
//!
//! Builds rumqttc options from a [`SessionConfig`] and classifies event loop
//! failures into [`TransportError`]s.

use crate::session::config::SessionConfig;
use crate::transport::{Qos, TransportError};
use rumqttc::{ConnectionError, MqttOptions, QoS, TlsConfiguration, Transport as RumqttcTransport};

/// Connection state reported by the event loop task
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Connect sent, waiting for CONNACK
    Connecting,
    /// Broker accepted the session
    Connected,
    /// Disconnected with reason
    Disconnected(String),
}

/// Pure function to configure MQTT options from the session configuration
pub fn configure_mqtt_options(config: &SessionConfig) -> Result<MqttOptions, TransportError> {
    let mut mqtt_options = MqttOptions::new(
        config.client_id(),
        config.broker_host(),
        config.broker_port(),
    );

    mqtt_options.set_keep_alive(config.keep_alive());
    mqtt_options.set_clean_session(config.persistence().is_clean());

    // Identity comes from the client certificate; the password stays empty
    mqtt_options.set_credentials(config.username(), config.password());

    let tls = TlsConfiguration::Rustls(config.security().client_config()?);
    mqtt_options.set_transport(RumqttcTransport::tls_with_config(tls));

    Ok(mqtt_options)
}

/// Map our QoS onto the rumqttc wire QoS
pub fn to_wire_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// Classify an event loop error raised before the broker accepted the session
pub fn classify_connect_error(error: ConnectionError) -> TransportError {
    match error {
        ConnectionError::ConnectionRefused(code) => {
            TransportError::ConnectionRefused(format!("{code:?}"))
        }
        ConnectionError::Tls(e) => TransportError::Tls(e.to_string()),
        other => TransportError::ConnectFailed(other.to_string().into()),
    }
}
