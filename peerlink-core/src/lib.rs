//! Signaling client for the peer-connection rendezvous server.
//! Host-driven: no I/O; host passes resolver and socket events and receives actions.

pub mod client;
pub mod config;
pub mod framing;
pub mod observer;
pub mod parser;
pub mod protocol;
pub mod registry;
pub mod socket;

pub use client::{
    ConnectError, ResolveError, ServerAddress, SessionState, SendError, SignOutError,
    SignalingClient,
};
pub use config::ClientConfig;
pub use observer::{ClientEvent, Observer, SendFailure};
pub use protocol::{PeerId, BYE_MESSAGE, DEFAULT_PORT};
pub use registry::PeerRegistry;
pub use socket::{CloseReason, IoAction, SocketId, SocketRole};
