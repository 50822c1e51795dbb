//! Pure acknowledgment bookkeeping for the rumqttc event loop
//!
//! rumqttc assigns packet ids inside its event loop, so a request is first
//! queued per operation kind and only bound to its packet id when the loop
//! reports the outgoing packet. Requests of one kind leave the event loop in
//! the order they were issued, which makes the per-kind queues FIFO.

use crate::transport::{OperationKind, Qos, TokenCompleter, TransportError};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

struct PendingOperation {
    qos: Qos,
    completer: TokenCompleter,
}

/// Tracks every unresolved operation token of one connection
#[derive(Default)]
pub struct AckTracker {
    queued: HashMap<OperationKind, VecDeque<PendingOperation>>,
    in_flight: HashMap<(OperationKind, u16), PendingOperation>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a request before it is handed to the event loop
    pub fn enqueue(&mut self, qos: Qos, completer: TokenCompleter) {
        self.queued
            .entry(completer.kind())
            .or_default()
            .push_back(PendingOperation { qos, completer });
    }

    /// Drop the most recent queued request of `kind` after it failed to send
    pub fn discard_last(&mut self, kind: OperationKind) -> bool {
        self.queued
            .get_mut(&kind)
            .and_then(VecDeque::pop_back)
            .is_some()
    }

    /// Bind the oldest queued request of `kind` to the packet id the event
    /// loop just sent
    pub fn on_outgoing(&mut self, kind: OperationKind, pkid: u16) {
        let Some(pending) = self.queued.get_mut(&kind).and_then(VecDeque::pop_front) else {
            debug!(%kind, pkid, "Outgoing packet without a tracked request");
            return;
        };

        // QoS 0 publishes are done once written
        if kind == OperationKind::Publish && !pending.qos.is_acknowledged() {
            pending.completer.succeed();
            return;
        }

        if let Some(stale) = self.in_flight.insert((kind, pkid), pending) {
            stale.completer.fail(TransportError::Abandoned { operation: kind });
        }
    }

    /// PUBACK completes a QoS 1 publish
    pub fn on_publish_ack(&mut self, pkid: u16) -> bool {
        self.complete_publish(pkid, Qos::AtLeastOnce)
    }

    /// PUBCOMP completes a QoS 2 publish
    pub fn on_publish_complete(&mut self, pkid: u16) -> bool {
        self.complete_publish(pkid, Qos::ExactlyOnce)
    }

    fn complete_publish(&mut self, pkid: u16, qos: Qos) -> bool {
        let key = (OperationKind::Publish, pkid);
        match self.in_flight.get(&key) {
            Some(pending) if pending.qos == qos => {}
            _ => return false,
        }
        match self.in_flight.remove(&key) {
            Some(pending) => {
                pending.completer.succeed();
                true
            }
            None => false,
        }
    }

    /// SUBACK completes a subscribe; a failure return code rejects it
    pub fn on_subscribe_ack(&mut self, pkid: u16, rejected: bool) -> bool {
        let Some(pending) = self.in_flight.remove(&(OperationKind::Subscribe, pkid)) else {
            return false;
        };

        if rejected {
            pending.completer.fail(TransportError::Rejected {
                operation: OperationKind::Subscribe,
                reason: "broker returned a failure code".to_string(),
            });
        } else {
            pending.completer.succeed();
        }
        true
    }

    /// UNSUBACK completes an unsubscribe
    pub fn on_unsubscribe_ack(&mut self, pkid: u16) -> bool {
        match self.in_flight.remove(&(OperationKind::Unsubscribe, pkid)) {
            Some(pending) => {
                pending.completer.succeed();
                true
            }
            None => false,
        }
    }

    /// Fail every unresolved token, returning how many there were
    pub fn fail_all(&mut self, reason: &str) -> usize {
        let queued = self.queued.drain().flat_map(|(_, queue)| queue);
        let in_flight = self.in_flight.drain().map(|(_, pending)| pending);

        let mut failed = 0;
        for pending in queued.chain(in_flight) {
            pending
                .completer
                .fail(TransportError::ConnectionLost(reason.to_string()));
            failed += 1;
        }
        failed
    }

    /// Number of unresolved tokens
    pub fn pending(&self) -> usize {
        self.queued.values().map(VecDeque::len).sum::<usize>() + self.in_flight.len()
    }
}
