//! Operation tokens for in-flight session requests
//!
//! Every subscribe, publish and unsubscribe request issued against a
//! [`SessionTransport`](super::SessionTransport) yields exactly one
//! [`OperationToken`]. The token is awaited once to learn whether the broker
//! acknowledged the request. Tokens are neither `Clone` nor
//! reusable: one request, one token, one outcome.

use super::TransportError;
use std::fmt;
use tokio::sync::oneshot;

/// Kind of operation a token represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Connect,
    Subscribe,
    Publish,
    Unsubscribe,
    Disconnect,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Connect => "connect",
            OperationKind::Subscribe => "subscribe",
            OperationKind::Publish => "publish",
            OperationKind::Unsubscribe => "unsubscribe",
            OperationKind::Disconnect => "disconnect",
        };
        f.write_str(name)
    }
}

/// Result delivered through a token
pub type Completion = Result<(), TransportError>;

/// Handle for an in-flight asynchronous request
#[must_use = "an operation token must be awaited to observe the acknowledgment"]
#[derive(Debug)]
pub struct OperationToken {
    kind: OperationKind,
    receiver: oneshot::Receiver<Completion>,
}

/// Producer side of an [`OperationToken`], held by the transport
#[derive(Debug)]
pub struct TokenCompleter {
    kind: OperationKind,
    sender: oneshot::Sender<Completion>,
}

impl OperationToken {
    /// Create a pending token and the completer that resolves it
    pub fn pending(kind: OperationKind) -> (TokenCompleter, OperationToken) {
        let (sender, receiver) = oneshot::channel();
        (
            TokenCompleter { kind, sender },
            OperationToken { kind, receiver },
        )
    }

    /// Token that is already resolved with `outcome`
    pub fn resolved(kind: OperationKind, outcome: Completion) -> Self {
        let (completer, token) = Self::pending(kind);
        completer.complete(outcome);
        token
    }

    /// Kind of operation this token tracks
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Wait for the acknowledgment
    ///
    /// If the transport drops the completer without resolving it the token
    /// reports [`TransportError::Abandoned`].
    pub async fn wait(self) -> Completion {
        match self.receiver.await {
            Ok(outcome) => outcome,
            Err(_) => Err(TransportError::Abandoned {
                operation: self.kind,
            }),
        }
    }
}

impl TokenCompleter {
    /// Kind of operation being completed
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Resolve the token. A token whose owner stopped waiting is ignored.
    pub fn complete(self, outcome: Completion) {
        let _ = self.sender.send(outcome);
    }

    pub fn succeed(self) {
        self.complete(Ok(()));
    }

    pub fn fail(self, error: TransportError) {
        self.complete(Err(error));
    }
}
