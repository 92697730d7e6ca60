//! Application-facing callback surface. The engine calls these synchronously at state transitions;
//! nothing returned here feeds back into the engine.

use crate::protocol::PeerId;

/// Why a relayed message did not go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendFailure {
    #[error("control connection lost before the server answered")]
    ConnectionLost,
    #[error("server answered with status {0}")]
    Rejected(u16),
    #[error("malformed server response")]
    Protocol,
}

pub trait Observer {
    fn on_signed_in(&mut self);
    fn on_disconnected(&mut self);
    fn on_peer_connected(&mut self, id: PeerId, name: &str);
    fn on_peer_disconnected(&mut self, id: PeerId);
    fn on_message_from_peer(&mut self, id: PeerId, message: &str);
    fn on_message_sent(&mut self, result: Result<(), SendFailure>);
    fn on_server_connection_failure(&mut self);
}

/// Owned form of each callback, for hosts that forward events elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    SignedIn,
    Disconnected,
    PeerConnected { id: PeerId, name: String },
    PeerDisconnected { id: PeerId },
    MessageFromPeer { id: PeerId, message: String },
    MessageSent(Result<(), SendFailure>),
    ServerConnectionFailure,
}

impl ClientEvent {
    /// True for the callbacks that must only fire while signed in.
    pub fn is_peer_event(&self) -> bool {
        matches!(
            self,
            ClientEvent::PeerConnected { .. }
                | ClientEvent::PeerDisconnected { .. }
                | ClientEvent::MessageFromPeer { .. }
        )
    }
}

/// Records every callback in order.
impl Observer for Vec<ClientEvent> {
    fn on_signed_in(&mut self) {
        self.push(ClientEvent::SignedIn);
    }

    fn on_disconnected(&mut self) {
        self.push(ClientEvent::Disconnected);
    }

    fn on_peer_connected(&mut self, id: PeerId, name: &str) {
        self.push(ClientEvent::PeerConnected {
            id,
            name: name.to_string(),
        });
    }

    fn on_peer_disconnected(&mut self, id: PeerId) {
        self.push(ClientEvent::PeerDisconnected { id });
    }

    fn on_message_from_peer(&mut self, id: PeerId, message: &str) {
        self.push(ClientEvent::MessageFromPeer {
            id,
            message: message.to_string(),
        });
    }

    fn on_message_sent(&mut self, result: Result<(), SendFailure>) {
        self.push(ClientEvent::MessageSent(result));
    }

    fn on_server_connection_failure(&mut self) {
        self.push(ClientEvent::ServerConnectionFailure);
    }
}
