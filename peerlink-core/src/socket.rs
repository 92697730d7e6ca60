//! The two socket roles and the I/O actions the host performs for them.
//!
//! Each role is its own small state machine. A socket is identified by role plus generation;
//! every reopen bumps the generation, so completions the host reports for an earlier
//! connection are recognised as stale and dropped.

use std::net::SocketAddr;
use std::time::Duration;

use crate::framing::ResponseReader;
use crate::protocol::{PeerId, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketRole {
    /// One request/response exchange per connection.
    Control,
    /// Long-lived notification channel.
    HangingGet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId {
    pub role: SocketRole,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Closed,
    Connecting,
    Open,
}

/// Why the host saw a socket go away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Orderly EOF from the server.
    PeerClosed,
    /// Connect was refused.
    Refused,
    /// Any other connect, read or write error.
    Failed,
}

/// Work for the host. The engine never performs I/O itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoAction {
    /// Resolve `host`; report back with `on_resolved(attempt, ..)`.
    Resolve { attempt: u64, host: String, port: u16 },
    /// Open a TCP connection to `addr` after `delay`; report `on_connected` or `on_closed`.
    Connect {
        socket: SocketId,
        addr: SocketAddr,
        delay: Duration,
    },
    /// Write all of `bytes`.
    Send { socket: SocketId, bytes: Vec<u8> },
    /// Close the socket and stop reporting events for it.
    Close { socket: SocketId },
}

/// State shared by both roles.
#[derive(Debug)]
pub struct SocketSlot {
    role: SocketRole,
    generation: u64,
    state: SocketState,
    reader: ResponseReader,
    bytes_received: usize,
}

impl SocketSlot {
    pub fn new(role: SocketRole) -> Self {
        Self {
            role,
            generation: 0,
            state: SocketState::Closed,
            reader: ResponseReader::new(),
            bytes_received: 0,
        }
    }

    pub fn id(&self) -> SocketId {
        SocketId {
            role: self.role,
            generation: self.generation,
        }
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    /// Bytes received on the current connection.
    pub fn bytes_received(&self) -> usize {
        self.bytes_received
    }

    /// True if `id` names the live connection of this slot.
    pub fn is_current(&self, id: SocketId) -> bool {
        self.state != SocketState::Closed && id == self.id()
    }

    pub(crate) fn reader(&mut self) -> &mut ResponseReader {
        &mut self.reader
    }

    pub(crate) fn open(&mut self, addr: SocketAddr, delay: Duration) -> IoAction {
        self.generation += 1;
        self.reader.clear();
        self.bytes_received = 0;
        self.state = SocketState::Connecting;
        IoAction::Connect {
            socket: self.id(),
            addr,
            delay,
        }
    }

    pub(crate) fn mark_open(&mut self) {
        self.state = SocketState::Open;
    }

    pub(crate) fn receive(&mut self, bytes: &[u8]) {
        self.bytes_received += bytes.len();
        self.reader.push(bytes);
    }

    /// Single close path for every reason. Clears buffered bytes; returns a Close action if the
    /// host still holds a connection.
    pub(crate) fn shutdown(&mut self) -> Option<IoAction> {
        self.reader.clear();
        if self.state == SocketState::Closed {
            return None;
        }
        self.state = SocketState::Closed;
        Some(IoAction::Close { socket: self.id() })
    }
}

/// What an outstanding control request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    SignIn,
    Message { to: PeerId },
    SignOut,
}

#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub kind: RequestKind,
    bytes: Vec<u8>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StartError {
    #[error("a control request is already outstanding")]
    Busy,
}

/// Control connection with a single request slot.
#[derive(Debug)]
pub struct ControlSocket {
    slot: SocketSlot,
    pending: Option<PendingRequest>,
    failures: u32,
}

impl ControlSocket {
    pub fn new() -> Self {
        Self {
            slot: SocketSlot::new(SocketRole::Control),
            pending: None,
            failures: 0,
        }
    }

    pub fn slot(&self) -> &SocketSlot {
        &self.slot
    }

    pub(crate) fn slot_mut(&mut self) -> &mut SocketSlot {
        &mut self.slot
    }

    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_kind(&self) -> Option<RequestKind> {
        self.pending.as_ref().map(|p| p.kind)
    }

    /// Consecutive failures since the last answered request.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Occupy the slot and open a fresh connection for `request`.
    pub(crate) fn start(
        &mut self,
        kind: RequestKind,
        request: &Request,
        addr: SocketAddr,
    ) -> Result<IoAction, StartError> {
        if self.pending.is_some() {
            return Err(StartError::Busy);
        }
        self.pending = Some(PendingRequest {
            kind,
            bytes: request.encode(),
        });
        Ok(self.slot.open(addr, Duration::ZERO))
    }

    /// Reopen for the request still in the slot.
    pub(crate) fn retry(&mut self, addr: SocketAddr, delay: Duration) -> Option<IoAction> {
        self.pending.as_ref()?;
        Some(self.slot.open(addr, delay))
    }

    /// Connection is up: the request bytes to write.
    pub(crate) fn on_connected(&mut self) -> Option<IoAction> {
        self.slot.mark_open();
        let pending = self.pending.as_ref()?;
        Some(IoAction::Send {
            socket: self.slot.id(),
            bytes: pending.bytes.clone(),
        })
    }

    /// Release the slot after an answer and reset the failure count.
    pub(crate) fn complete(&mut self) -> Option<PendingRequest> {
        self.failures = 0;
        self.pending.take()
    }

    /// Count a failure. Returns the new consecutive failure count.
    pub(crate) fn record_failure(&mut self) -> u32 {
        self.failures = self.failures.saturating_add(1);
        self.failures
    }

    pub(crate) fn take_pending(&mut self) -> Option<PendingRequest> {
        self.pending.take()
    }

    /// Drop the connection and the pending request.
    pub(crate) fn reset(&mut self) -> Option<IoAction> {
        self.pending = None;
        self.failures = 0;
        self.slot.shutdown()
    }
}

impl Default for ControlSocket {
    fn default() -> Self {
        Self::new()
    }
}

/// Hanging-get connection.
#[derive(Debug)]
pub struct NotificationSocket {
    slot: SocketSlot,
    failed_connects: u32,
}

impl NotificationSocket {
    pub fn new() -> Self {
        Self {
            slot: SocketSlot::new(SocketRole::HangingGet),
            failed_connects: 0,
        }
    }

    pub fn slot(&self) -> &SocketSlot {
        &self.slot
    }

    pub(crate) fn slot_mut(&mut self) -> &mut SocketSlot {
        &mut self.slot
    }

    /// Consecutive connects that failed before the socket opened.
    pub fn failed_connects(&self) -> u32 {
        self.failed_connects
    }

    pub(crate) fn open(&mut self, addr: SocketAddr, delay: Duration) -> IoAction {
        self.slot.open(addr, delay)
    }

    /// Connection is up: send the wait request.
    pub(crate) fn on_connected(&mut self, me: PeerId) -> IoAction {
        self.slot.mark_open();
        self.failed_connects = 0;
        IoAction::Send {
            socket: self.slot.id(),
            bytes: Request::Wait { peer_id: me }.encode(),
        }
    }

    pub(crate) fn record_failed_connect(&mut self) -> u32 {
        self.failed_connects = self.failed_connects.saturating_add(1);
        self.failed_connects
    }

    pub(crate) fn reset(&mut self) -> Option<IoAction> {
        self.failed_connects = 0;
        self.slot.shutdown()
    }
}

impl Default for NotificationSocket {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:8888".parse().unwrap()
    }

    #[test]
    fn reopen_bumps_generation_and_clears_buffer() {
        let mut slot = SocketSlot::new(SocketRole::HangingGet);
        let first = match slot.open(addr(), Duration::ZERO) {
            IoAction::Connect { socket, .. } => socket,
            other => panic!("unexpected {:?}", other),
        };
        slot.receive(b"HTTP/1.1 200");
        assert_eq!(slot.reader().buffered(), 12);
        assert_eq!(slot.shutdown(), Some(IoAction::Close { socket: first }));
        assert_eq!(slot.reader().buffered(), 0);
        assert_eq!(slot.shutdown(), None);
        slot.open(addr(), Duration::ZERO);
        assert!(!slot.is_current(first));
        assert!(slot.is_current(slot.id()));
        assert_eq!(slot.bytes_received(), 0);
    }

    #[test]
    fn control_slot_holds_one_request() {
        let mut control = ControlSocket::new();
        let req = Request::SignIn { name: "a".into() };
        assert!(control.start(RequestKind::SignIn, &req, addr()).is_ok());
        assert_eq!(
            control.start(RequestKind::SignIn, &req, addr()),
            Err(StartError::Busy)
        );
        match control.on_connected() {
            Some(IoAction::Send { bytes, .. }) => assert_eq!(bytes, req.encode()),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(control.complete().map(|p| p.kind), Some(RequestKind::SignIn));
        assert!(!control.is_busy());
    }

    #[test]
    fn notification_connect_sends_wait() {
        let mut n = NotificationSocket::new();
        n.open(addr(), Duration::ZERO);
        assert_eq!(n.record_failed_connect(), 1);
        let action = n.on_connected(PeerId(4));
        assert_eq!(n.failed_connects(), 0);
        assert_eq!(
            action,
            IoAction::Send {
                socket: n.slot().id(),
                bytes: b"GET /wait?peer_id=4 HTTP/1.0\r\n\r\n".to_vec(),
            }
        );
    }
}
