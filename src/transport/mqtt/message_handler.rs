//! Pure routing of rumqttc events
//!
//! Maps every event the MQTT 3.1.1 event loop reports to the action the
//! transport takes, so the event loop task itself stays a thin dispatcher.

use crate::session::observer::IncomingMessage;
use crate::transport::OperationKind;
use rumqttc::{Event, Outgoing, Packet, SubscribeReasonCode};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route an event to the action it requires
    pub fn route_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(packet) => match packet {
                // A refused CONNACK never gets here; poll() returns
                // ConnectionError::ConnectionRefused for it instead
                Packet::ConnAck(ack) => EventRoute::ConnectionAcknowledged {
                    session_present: ack.session_present,
                },
                Packet::Publish(publish) => EventRoute::MessageReceived(IncomingMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                    retain: publish.retain,
                    duplicate: publish.dup,
                }),
                Packet::PubAck(ack) => EventRoute::PublishAcknowledged(ack.pkid),
                Packet::PubComp(comp) => EventRoute::PublishCompleted(comp.pkid),
                Packet::SubAck(suback) => EventRoute::SubscriptionAcknowledged {
                    pkid: suback.pkid,
                    rejected: Self::is_subscription_rejected(&suback.return_codes),
                },
                Packet::UnsubAck(unsuback) => {
                    EventRoute::UnsubscriptionAcknowledged(unsuback.pkid)
                }
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(outgoing) => match outgoing {
                Outgoing::Publish(pkid) => EventRoute::OutgoingRequest {
                    kind: OperationKind::Publish,
                    pkid: *pkid,
                },
                Outgoing::Subscribe(pkid) => EventRoute::OutgoingRequest {
                    kind: OperationKind::Subscribe,
                    pkid: *pkid,
                },
                Outgoing::Unsubscribe(pkid) => EventRoute::OutgoingRequest {
                    kind: OperationKind::Unsubscribe,
                    pkid: *pkid,
                },
                Outgoing::Disconnect => EventRoute::DisconnectSent,
                _ => EventRoute::OutgoingEvent,
            },
        }
    }

    /// A SUBACK with any failure code rejects the subscription
    pub fn is_subscription_rejected(return_codes: &[SubscribeReasonCode]) -> bool {
        return_codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure))
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Broker accepted the connect
    ConnectionAcknowledged { session_present: bool },
    /// Application message for the observer
    MessageReceived(IncomingMessage),
    /// PUBACK for a QoS 1 publish
    PublishAcknowledged(u16),
    /// PUBCOMP for a QoS 2 publish
    PublishCompleted(u16),
    SubscriptionAcknowledged { pkid: u16, rejected: bool },
    UnsubscriptionAcknowledged(u16),
    /// A queued request left the event loop with this packet id
    OutgoingRequest { kind: OperationKind, pkid: u16 },
    /// Our DISCONNECT was written; the event loop is done
    DisconnectSent,
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}
