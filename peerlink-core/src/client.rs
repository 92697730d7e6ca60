//! Session engine. The host passes resolver and socket events in and performs the returned
//! actions; observer callbacks fire synchronously from inside those calls.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::framing::Response;
use crate::observer::{Observer, SendFailure};
use crate::parser::{parse_peer_entry, parse_peer_list};
use crate::protocol::{PeerId, Request, BYE_MESSAGE, DEFAULT_PORT};
use crate::registry::PeerRegistry;
use crate::socket::{
    CloseReason, ControlSocket, IoAction, NotificationSocket, RequestKind, SocketId, SocketState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Resolving,
    SigningIn,
    Connected,
    /// Sign-out requested while a control request was outstanding.
    SigningOutWaiting,
    SigningOut,
}

/// Server endpoint for the current connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub addr: SocketAddr,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("no address found for {0}")]
    NotFound(String),
    #[error("lookup failed: {0}")]
    Lookup(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("session already active ({0:?})")]
    AlreadyActive(SessionState),
    #[error("server address is empty")]
    EmptyServer,
    #[error("client name is empty")]
    EmptyName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("not signed in")]
    NotConnected,
    #[error("already sending")]
    AlreadySending,
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SignOutError {
    #[error("not signed in")]
    NotSignedIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlFailure {
    Closed(CloseReason),
    Protocol,
}

/// Signaling client engine. Single writer: every method takes `&mut self`.
pub struct SignalingClient<O> {
    observer: O,
    config: ClientConfig,
    state: SessionState,
    /// Bumped on every connect and teardown; resolutions for older attempts are dropped.
    attempt: u64,
    host: String,
    name: String,
    server: Option<ServerAddress>,
    my_id: Option<PeerId>,
    peers: PeerRegistry,
    control: ControlSocket,
    hanging_get: NotificationSocket,
}

impl<O: Observer> SignalingClient<O> {
    pub fn new(observer: O) -> Self {
        Self::with_config(observer, ClientConfig::default())
    }

    pub fn with_config(observer: O, config: ClientConfig) -> Self {
        Self {
            observer,
            config,
            state: SessionState::Disconnected,
            attempt: 0,
            host: String::new(),
            name: String::new(),
            server: None,
            my_id: None,
            peers: PeerRegistry::new(),
            control: ControlSocket::new(),
            hanging_get: NotificationSocket::new(),
        }
    }

    /// Own id, once signed in.
    pub fn id(&self) -> Option<PeerId> {
        self.my_id
    }

    pub fn is_connected(&self) -> bool {
        self.my_id.is_some()
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn server(&self) -> Option<&ServerAddress> {
        self.server.as_ref()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    pub fn into_observer(self) -> O {
        self.observer
    }

    /// True while a peer message is outstanding on the control socket.
    pub fn is_sending_message(&self) -> bool {
        self.state == SessionState::Connected && self.control.is_busy()
    }

    /// Start a session. Port 0 selects the default port. An IP literal skips resolution.
    pub fn connect(
        &mut self,
        server: &str,
        port: u16,
        name: &str,
    ) -> Result<Vec<IoAction>, ConnectError> {
        if self.state != SessionState::Disconnected {
            return Err(ConnectError::AlreadyActive(self.state));
        }
        let server = server.trim();
        if server.is_empty() {
            return Err(ConnectError::EmptyServer);
        }
        if name.is_empty() {
            return Err(ConnectError::EmptyName);
        }
        let port = if port == 0 { DEFAULT_PORT } else { port };
        self.attempt += 1;
        self.host = server.to_string();
        self.name = name.to_string();
        info!(server, port, name, "connecting");

        if let Ok(ip) = server.parse::<IpAddr>() {
            self.server = Some(ServerAddress {
                host: self.host.clone(),
                addr: SocketAddr::new(ip, port),
            });
            let mut actions = Vec::new();
            self.start_sign_in(&mut actions);
            return Ok(actions);
        }
        self.state = SessionState::Resolving;
        Ok(vec![IoAction::Resolve {
            attempt: self.attempt,
            host: self.host.clone(),
            port,
        }])
    }

    /// Resolver completion for the `Resolve` action tagged `attempt`.
    pub fn on_resolved(
        &mut self,
        attempt: u64,
        result: Result<SocketAddr, ResolveError>,
    ) -> Vec<IoAction> {
        let mut actions = Vec::new();
        if attempt != self.attempt || self.state != SessionState::Resolving {
            debug!(attempt, "dropping stale resolution");
            return actions;
        }
        match result {
            Ok(addr) => {
                debug!(%addr, "resolved");
                self.server = Some(ServerAddress {
                    host: self.host.clone(),
                    addr,
                });
                self.start_sign_in(&mut actions);
            }
            Err(e) => {
                warn!(host = %self.host, error = %e, "resolution failed");
                self.abort(&mut actions);
            }
        }
        actions
    }

    pub fn on_connected(&mut self, socket: SocketId) -> Vec<IoAction> {
        let mut actions = Vec::new();
        if self.control.slot().is_current(socket) {
            if self.control.slot().state() == SocketState::Connecting {
                actions.extend(self.control.on_connected());
            }
        } else if self.hanging_get.slot().is_current(socket) {
            match self.my_id {
                Some(me) => actions.push(self.hanging_get.on_connected(me)),
                None => actions.extend(self.hanging_get.reset()),
            }
        } else {
            debug!(?socket, "connect completion for stale socket");
        }
        actions
    }

    pub fn on_data(&mut self, socket: SocketId, bytes: &[u8]) -> Vec<IoAction> {
        let mut actions = Vec::new();
        if self.control.slot().is_current(socket) {
            let slot = self.control.slot_mut();
            slot.receive(bytes);
            let next = slot.reader().next_response();
            match next {
                Ok(None) => {}
                Ok(Some(response)) => self.on_control_response(response, &mut actions),
                Err(e) => {
                    warn!(error = %e, "malformed control response");
                    self.on_control_failure(ControlFailure::Protocol, &mut actions);
                }
            }
        } else if self.hanging_get.slot().is_current(socket) {
            self.hanging_get.slot_mut().receive(bytes);
            self.drain_notifications(&mut actions);
        } else {
            debug!(?socket, len = bytes.len(), "data for stale socket");
        }
        actions
    }

    pub fn on_closed(&mut self, socket: SocketId, reason: CloseReason) -> Vec<IoAction> {
        let mut actions = Vec::new();
        if self.control.slot().is_current(socket) {
            debug!(?reason, "control socket closed");
            self.on_control_failure(ControlFailure::Closed(reason), &mut actions);
        } else if self.hanging_get.slot().is_current(socket) {
            let was_open = self.hanging_get.slot().state() == SocketState::Open;
            actions.extend(self.hanging_get.slot_mut().shutdown());
            if self.state != SessionState::Connected {
                return actions;
            }
            if was_open {
                // Server idle timeouts close long polls routinely; only failed connects back off.
                debug!(?reason, "hanging get closed; reopening");
                self.reopen_hanging_get(Duration::ZERO, &mut actions);
            } else {
                self.hanging_get_failed(&mut actions);
            }
        } else {
            debug!(?socket, ?reason, "close for stale socket");
        }
        actions
    }

    /// Relay `message` to `peer_id`. Rejected without I/O unless signed in, idle, and the peer is known.
    pub fn send_to_peer(
        &mut self,
        peer_id: PeerId,
        message: &str,
    ) -> Result<Vec<IoAction>, SendError> {
        if self.state != SessionState::Connected {
            return Err(SendError::NotConnected);
        }
        let (Some(me), Some(addr)) = (self.my_id, self.server_addr()) else {
            return Err(SendError::NotConnected);
        };
        if self.control.is_busy() {
            return Err(SendError::AlreadySending);
        }
        if !self.peers.contains(peer_id) {
            return Err(SendError::UnknownPeer(peer_id));
        }
        let request = Request::Message {
            from: me,
            to: peer_id,
            body: message.to_string(),
        };
        let action = self
            .control
            .start(RequestKind::Message { to: peer_id }, &request, addr)
            .map_err(|_| SendError::AlreadySending)?;
        debug!(to = %peer_id, len = message.len(), "sending message");
        Ok(vec![action])
    }

    pub fn send_hang_up(&mut self, peer_id: PeerId) -> Result<Vec<IoAction>, SendError> {
        self.send_to_peer(peer_id, BYE_MESSAGE)
    }

    /// Leave the server. Waits for an outstanding request before sending the sign-out.
    pub fn sign_out(&mut self) -> Result<Vec<IoAction>, SignOutError> {
        let mut actions = Vec::new();
        match self.state {
            SessionState::Disconnected => return Err(SignOutError::NotSignedIn),
            SessionState::SigningOut | SessionState::SigningOutWaiting => {}
            SessionState::Resolving | SessionState::SigningIn => {
                info!("sign-out before sign-in completed");
                self.finish(&mut actions);
            }
            SessionState::Connected => {
                actions.extend(self.hanging_get.reset());
                if self.control.is_busy() {
                    info!("waiting for outstanding request before signing out");
                    self.state = SessionState::SigningOutWaiting;
                } else {
                    self.begin_sign_out(&mut actions);
                }
            }
        }
        Ok(actions)
    }

    /// Drop the session immediately without telling the server. No-op when disconnected.
    pub fn close(&mut self) -> Vec<IoAction> {
        let mut actions = Vec::new();
        if self.state != SessionState::Disconnected {
            self.finish(&mut actions);
        }
        actions
    }

    fn server_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(|s| s.addr)
    }

    fn start_sign_in(&mut self, actions: &mut Vec<IoAction>) {
        let Some(addr) = self.server_addr() else {
            self.abort(actions);
            return;
        };
        self.state = SessionState::SigningIn;
        let request = Request::SignIn {
            name: self.name.clone(),
        };
        match self.control.start(RequestKind::SignIn, &request, addr) {
            Ok(action) => actions.push(action),
            Err(e) => {
                warn!(error = %e, "cannot start sign-in");
                self.abort(actions);
            }
        }
    }

    fn on_control_response(&mut self, response: Response, actions: &mut Vec<IoAction>) {
        actions.extend(self.control.slot_mut().shutdown());
        let Some(request) = self.control.complete() else {
            return;
        };
        match request.kind {
            RequestKind::SignIn => self.finish_sign_in(response, actions),
            RequestKind::Message { to } => {
                if response.head.is_success() {
                    self.observer.on_message_sent(Ok(()));
                } else {
                    warn!(status = response.status(), %to, "message rejected");
                    self.observer
                        .on_message_sent(Err(SendFailure::Rejected(response.status())));
                }
                if self.state == SessionState::SigningOutWaiting {
                    self.begin_sign_out(actions);
                }
            }
            RequestKind::SignOut => {
                if !response.head.is_success() {
                    warn!(status = response.status(), "sign-out answered with error");
                }
                info!("signed out");
                self.finish(actions);
            }
        }
    }

    fn finish_sign_in(&mut self, response: Response, actions: &mut Vec<IoAction>) {
        if self.state != SessionState::SigningIn {
            return;
        }
        if !response.head.is_success() {
            warn!(status = response.status(), "sign-in rejected");
            self.abort(actions);
            return;
        }
        let Some(me) = response.peer_id() else {
            warn!("sign-in response carries no peer id");
            self.abort(actions);
            return;
        };
        self.my_id = Some(me);
        self.state = SessionState::Connected;
        info!(id = %me, "signed in");

        let list = parse_peer_list(&response.body_text());
        for (line, error) in &list.defects {
            warn!(line, %error, "skipping malformed peer entry");
        }
        for entry in list.entries {
            if entry.id == me || !entry.connected {
                continue;
            }
            self.peers.insert(entry.id, entry.name.clone());
            self.observer.on_peer_connected(entry.id, &entry.name);
        }
        self.observer.on_signed_in();
        self.reopen_hanging_get(Duration::ZERO, actions);
    }

    fn on_control_failure(&mut self, failure: ControlFailure, actions: &mut Vec<IoAction>) {
        actions.extend(self.control.slot_mut().shutdown());
        let Some(kind) = self.control.pending_kind() else {
            return;
        };
        let failures = self.control.record_failure();
        let limit = self.config.max_control_failures.max(1);

        if failure == ControlFailure::Closed(CloseReason::Refused) && failures < limit {
            if let Some(addr) = self.server_addr() {
                let delay = self.config.reconnect_delay();
                warn!(failures, ?delay, "connection refused; retrying");
                actions.extend(self.control.retry(addr, delay));
                return;
            }
        }

        self.control.take_pending();
        match kind {
            RequestKind::SignIn => {
                warn!(?failure, "sign-in failed");
                self.abort(actions);
            }
            RequestKind::Message { to } => {
                warn!(?failure, %to, failures, "message request failed");
                let reason = match failure {
                    ControlFailure::Protocol => SendFailure::Protocol,
                    ControlFailure::Closed(_) => SendFailure::ConnectionLost,
                };
                self.observer.on_message_sent(Err(reason));
                if failures >= limit {
                    warn!(failures, "control socket keeps failing");
                    self.abort(actions);
                } else if self.state == SessionState::SigningOutWaiting {
                    self.begin_sign_out(actions);
                }
            }
            RequestKind::SignOut => {
                warn!(?failure, "sign-out request failed; closing anyway");
                self.finish(actions);
            }
        }
    }

    fn drain_notifications(&mut self, actions: &mut Vec<IoAction>) {
        while self.state == SessionState::Connected {
            let next = self.hanging_get.slot_mut().reader().next_response();
            match next {
                Ok(None) => return,
                Ok(Some(response)) => {
                    if !response.head.is_success() {
                        warn!(status = response.status(), "hanging get answered with error");
                        actions.extend(self.hanging_get.slot_mut().shutdown());
                        self.hanging_get_failed(actions);
                        return;
                    }
                    let close = response.head.connection_close;
                    self.on_notification(response);
                    if close {
                        actions.extend(self.hanging_get.slot_mut().shutdown());
                        self.reopen_hanging_get(Duration::ZERO, actions);
                        return;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "malformed notification; reconnecting");
                    actions.extend(self.hanging_get.slot_mut().shutdown());
                    self.reopen_hanging_get(self.config.reconnect_delay(), actions);
                    return;
                }
            }
        }
    }

    fn on_notification(&mut self, response: Response) {
        let Some(me) = self.my_id else {
            return;
        };
        let Some(sender) = response.peer_id() else {
            warn!("notification carries no peer id");
            return;
        };
        let body = response.body_text();
        if sender == me {
            // Membership change: body is one peer entry.
            let line = body.lines().next().unwrap_or_default();
            match parse_peer_entry(line) {
                Ok(entry) if entry.id == me => {}
                Ok(entry) if entry.connected => {
                    debug!(id = %entry.id, name = %entry.name, "peer joined");
                    self.peers.insert(entry.id, entry.name.clone());
                    self.observer.on_peer_connected(entry.id, &entry.name);
                }
                Ok(entry) => {
                    if self.peers.remove(entry.id).is_some() {
                        debug!(id = %entry.id, "peer left");
                        self.observer.on_peer_disconnected(entry.id);
                    }
                }
                Err(error) => warn!(%error, "skipping malformed peer notification"),
            }
        } else if body == BYE_MESSAGE {
            info!(peer = %sender, "peer hung up");
            self.observer.on_peer_disconnected(sender);
        } else {
            self.observer.on_message_from_peer(sender, &body);
        }
    }

    fn reopen_hanging_get(&mut self, delay: Duration, actions: &mut Vec<IoAction>) {
        if let Some(addr) = self.server_addr() {
            actions.push(self.hanging_get.open(addr, delay));
        }
    }

    fn hanging_get_failed(&mut self, actions: &mut Vec<IoAction>) {
        let attempts = self.hanging_get.record_failed_connect();
        if attempts >= self.config.max_reconnect_attempts.max(1) {
            warn!(attempts, "hanging get could not be reopened");
            self.abort(actions);
            return;
        }
        warn!(attempts, "hanging get failed; retrying");
        self.reopen_hanging_get(self.config.reconnect_delay(), actions);
    }

    fn begin_sign_out(&mut self, actions: &mut Vec<IoAction>) {
        self.state = SessionState::SigningOut;
        let (Some(me), Some(addr)) = (self.my_id, self.server_addr()) else {
            self.finish(actions);
            return;
        };
        match self
            .control
            .start(RequestKind::SignOut, &Request::SignOut { peer_id: me }, addr)
        {
            Ok(action) => actions.push(action),
            Err(e) => {
                warn!(error = %e, "cannot send sign-out");
                self.finish(actions);
            }
        }
    }

    /// Single teardown path: both sockets, registry, identity.
    fn teardown(&mut self, actions: &mut Vec<IoAction>) {
        actions.extend(self.control.reset());
        actions.extend(self.hanging_get.reset());
        self.peers.clear();
        self.my_id = None;
        self.server = None;
        self.state = SessionState::Disconnected;
        self.attempt += 1;
    }

    fn finish(&mut self, actions: &mut Vec<IoAction>) {
        self.teardown(actions);
        self.observer.on_disconnected();
    }

    fn abort(&mut self, actions: &mut Vec<IoAction>) {
        self.teardown(actions);
        self.observer.on_server_connection_failure();
        self.observer.on_disconnected();
    }
}
