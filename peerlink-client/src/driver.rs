//! Tokio host for the engine: resolver and TCP tasks report events over one channel; this loop is
//! the only code that touches the engine.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use peerlink_core::{
    ClientEvent, CloseReason, IoAction, Observer, PeerId, ResolveError, SendError, SendFailure,
    SessionState, SignalingClient, SocketId,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const READ_BUF_LEN: usize = 8 * 1024;

/// Completion reported by a resolver or socket task.
#[derive(Debug)]
pub enum IoEvent {
    Resolved {
        attempt: u64,
        result: Result<SocketAddr, ResolveError>,
    },
    Connected(SocketId),
    Data(SocketId, Vec<u8>),
    Closed(SocketId, CloseReason),
}

/// Requests from the application side.
#[derive(Debug)]
pub enum Command {
    Send {
        to: PeerId,
        message: String,
        reply: oneshot::Sender<Result<(), SendError>>,
    },
    HangUp {
        to: PeerId,
        reply: oneshot::Sender<Result<(), SendError>>,
    },
    Peers(oneshot::Sender<Vec<(PeerId, String)>>),
    SignOut,
    Close,
}

/// Forwards every callback as a [`ClientEvent`] over a channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self { tx }
    }

    fn forward(&self, event: ClientEvent) {
        let _ = self.tx.send(event);
    }
}

impl Observer for ChannelObserver {
    fn on_signed_in(&mut self) {
        self.forward(ClientEvent::SignedIn);
    }

    fn on_disconnected(&mut self) {
        self.forward(ClientEvent::Disconnected);
    }

    fn on_peer_connected(&mut self, id: PeerId, name: &str) {
        self.forward(ClientEvent::PeerConnected {
            id,
            name: name.to_string(),
        });
    }

    fn on_peer_disconnected(&mut self, id: PeerId) {
        self.forward(ClientEvent::PeerDisconnected { id });
    }

    fn on_message_from_peer(&mut self, id: PeerId, message: &str) {
        self.forward(ClientEvent::MessageFromPeer {
            id,
            message: message.to_string(),
        });
    }

    fn on_message_sent(&mut self, result: Result<(), SendFailure>) {
        self.forward(ClientEvent::MessageSent(result));
    }

    fn on_server_connection_failure(&mut self) {
        self.forward(ClientEvent::ServerConnectionFailure);
    }
}

struct SocketTask {
    writer: mpsc::UnboundedSender<Vec<u8>>,
    handle: JoinHandle<()>,
}

pub struct Driver<O> {
    client: SignalingClient<O>,
    events_tx: mpsc::UnboundedSender<IoEvent>,
    events_rx: mpsc::UnboundedReceiver<IoEvent>,
    sockets: HashMap<SocketId, SocketTask>,
}

impl<O: Observer> Driver<O> {
    pub fn new(client: SignalingClient<O>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            client,
            events_tx,
            events_rx,
            sockets: HashMap::new(),
        }
    }

    /// Connect, then serve I/O events and commands until the session is disconnected.
    /// Dropping the command sender closes the session. Returns the observer.
    pub async fn run(
        mut self,
        server: &str,
        port: u16,
        name: &str,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) -> anyhow::Result<O> {
        let actions = self.client.connect(server, port, name)?;
        self.perform(actions);
        let mut commands_open = true;
        while self.client.state() != SessionState::Disconnected {
            tokio::select! {
                Some(event) = self.events_rx.recv() => {
                    let actions = self.dispatch(event);
                    self.perform(actions);
                }
                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.command(command),
                    None => {
                        commands_open = false;
                        let actions = self.client.close();
                        self.perform(actions);
                    }
                },
            }
        }
        for (_, task) in self.sockets.drain() {
            task.handle.abort();
        }
        Ok(self.client.into_observer())
    }

    fn dispatch(&mut self, event: IoEvent) -> Vec<IoAction> {
        match event {
            IoEvent::Resolved { attempt, result } => self.client.on_resolved(attempt, result),
            IoEvent::Connected(socket) => self.client.on_connected(socket),
            IoEvent::Data(socket, bytes) => self.client.on_data(socket, &bytes),
            IoEvent::Closed(socket, reason) => {
                self.sockets.remove(&socket);
                self.client.on_closed(socket, reason)
            }
        }
    }

    fn command(&mut self, command: Command) {
        match command {
            Command::Send { to, message, reply } => {
                let result = self.client.send_to_peer(to, &message).map(|actions| {
                    self.perform(actions);
                });
                let _ = reply.send(result);
            }
            Command::HangUp { to, reply } => {
                let result = self.client.send_hang_up(to).map(|actions| {
                    self.perform(actions);
                });
                let _ = reply.send(result);
            }
            Command::Peers(reply) => {
                let peers = self
                    .client
                    .peers()
                    .iter()
                    .map(|(id, name)| (id, name.to_string()))
                    .collect();
                let _ = reply.send(peers);
            }
            Command::SignOut => match self.client.sign_out() {
                Ok(actions) => self.perform(actions),
                Err(e) => warn!(error = %e, "sign-out ignored"),
            },
            Command::Close => {
                let actions = self.client.close();
                self.perform(actions);
            }
        }
    }

    fn perform(&mut self, actions: Vec<IoAction>) {
        for action in actions {
            match action {
                IoAction::Resolve {
                    attempt,
                    host,
                    port,
                } => {
                    let events = self.events_tx.clone();
                    tokio::spawn(async move {
                        let result = resolve(&host, port).await;
                        let _ = events.send(IoEvent::Resolved { attempt, result });
                    });
                }
                IoAction::Connect {
                    socket,
                    addr,
                    delay,
                } => {
                    let (writer, outgoing) = mpsc::unbounded_channel();
                    let events = self.events_tx.clone();
                    let handle = tokio::spawn(run_socket(socket, addr, delay, outgoing, events));
                    if let Some(old) = self.sockets.insert(socket, SocketTask { writer, handle }) {
                        old.handle.abort();
                    }
                }
                IoAction::Send { socket, bytes } => match self.sockets.get(&socket) {
                    Some(task) => {
                        let _ = task.writer.send(bytes);
                    }
                    None => debug!(?socket, "send for unknown socket"),
                },
                IoAction::Close { socket } => {
                    if let Some(task) = self.sockets.remove(&socket) {
                        task.handle.abort();
                    }
                }
            }
        }
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, ResolveError> {
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| ResolveError::Lookup(e.to_string()))?;
    addrs
        .next()
        .ok_or_else(|| ResolveError::NotFound(host.to_string()))
}

/// One TCP connection: connect after `delay`, write what arrives on `outgoing`, report reads and
/// the final close.
async fn run_socket(
    socket: SocketId,
    addr: SocketAddr,
    delay: Duration,
    mut outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::UnboundedSender<IoEvent>,
) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    debug!(?socket, %addr, "connecting");
    let stream = match TcpStream::connect(addr).await {
        Ok(stream) => stream,
        Err(e) => {
            let reason = if e.kind() == std::io::ErrorKind::ConnectionRefused {
                CloseReason::Refused
            } else {
                CloseReason::Failed
            };
            debug!(?socket, error = %e, "connect failed");
            let _ = events.send(IoEvent::Closed(socket, reason));
            return;
        }
    };
    if events.send(IoEvent::Connected(socket)).is_err() {
        return;
    }
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = vec![0u8; READ_BUF_LEN];
    let reason = loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => break CloseReason::PeerClosed,
                Ok(n) => {
                    if events.send(IoEvent::Data(socket, buf[..n].to_vec())).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    debug!(?socket, error = %e, "read failed");
                    break CloseReason::Failed;
                }
            },
            Some(bytes) = outgoing.recv() => {
                if let Err(e) = writer.write_all(&bytes).await {
                    debug!(?socket, error = %e, "write failed");
                    break CloseReason::Failed;
                }
            }
        }
    };
    debug!(?socket, ?reason, "socket closed");
    let _ = events.send(IoEvent::Closed(socket, reason));
}
