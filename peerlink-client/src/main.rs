// peerlink-client: sign in to a signaling server and relay text messages from the console.

mod config;
mod console;
mod driver;

use std::path::PathBuf;

use clap::Parser;
use peerlink_core::{ClientEvent, SignalingClient};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::console::Input;
use crate::driver::{ChannelObserver, Command, Driver};

#[derive(Parser, Debug)]
#[command(name = "peerlink-client", version, about = "Signaling server client")]
struct Args {
    /// Server host name or address
    #[arg(short, long)]
    server: Option<String>,

    /// Server port (0 selects 8888)
    #[arg(short, long)]
    port: Option<u16>,

    /// Name announced to other peers
    #[arg(short, long)]
    name: Option<String>,

    /// Config file (default ~/.config/peerlink/config.toml, then /etc/peerlink/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut cfg = config::load(args.config.as_deref())?;
    if let Some(server) = args.server {
        cfg.server = server;
    }
    if let Some(port) = args.port {
        cfg.port = port;
    }
    if let Some(name) = args.name {
        cfg.name = name;
    }

    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cfg))
}

async fn run(cfg: Config) -> anyhow::Result<()> {
    let (event_tx, mut events) = mpsc::unbounded_channel();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let client = SignalingClient::with_config(ChannelObserver::new(event_tx), cfg.session.clone());
    info!(server = %cfg.server, port = cfg.port, name = %cfg.name, "starting");
    let mut session = tokio::spawn(async move {
        Driver::new(client)
            .run(&cfg.server, cfg.port, &cfg.name, cmd_rx)
            .await
    });

    println!("{}", console::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut shutdown = ShutdownSignals::new()?;
    let mut signals = 0u32;
    loop {
        tokio::select! {
            Some(event) = events.recv() => print_event(&event),
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match console::parse_input(&line) {
                    Ok(Some(input)) => handle_input(input, &cmd_tx).await,
                    Ok(None) => {}
                    Err(e) => println!("{}", e),
                },
                Ok(None) | Err(_) => {
                    stdin_open = false;
                    let _ = cmd_tx.send(Command::SignOut);
                }
            },
            _ = shutdown.recv() => {
                signals += 1;
                if signals == 1 {
                    info!("signal received; signing out");
                    let _ = cmd_tx.send(Command::SignOut);
                } else {
                    warn!("second signal; closing");
                    let _ = cmd_tx.send(Command::Close);
                }
            }
            joined = &mut session => {
                joined??;
                break;
            }
        }
    }
    while let Ok(event) = events.try_recv() {
        print_event(&event);
    }
    Ok(())
}

fn print_event(event: &ClientEvent) {
    println!("{}", console::render(event));
}

async fn handle_input(input: Input, commands: &mpsc::UnboundedSender<Command>) {
    match input {
        Input::Peers => {
            let (tx, rx) = oneshot::channel();
            if commands.send(Command::Peers(tx)).is_ok() {
                if let Ok(peers) = rx.await {
                    println!("{}", console::render_peers(&peers));
                }
            }
        }
        Input::Send { to, text } => {
            let (reply, rx) = oneshot::channel();
            if commands
                .send(Command::Send {
                    to,
                    message: text,
                    reply,
                })
                .is_ok()
            {
                if let Ok(Err(e)) = rx.await {
                    println!("cannot send: {}", e);
                }
            }
        }
        Input::Bye(to) => {
            let (reply, rx) = oneshot::channel();
            if commands.send(Command::HangUp { to, reply }).is_ok() {
                if let Ok(Err(e)) = rx.await {
                    println!("cannot hang up: {}", e);
                }
            }
        }
        Input::Quit => {
            let _ = commands.send(Command::SignOut);
        }
    }
}

/// Ctrl+C and SIGTERM listeners, registered once so a signal that arrives while the loop is
/// busy is still delivered on the next poll.
struct ShutdownSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(windows)]
    ctrl_c: tokio::signal::windows::CtrlC,
}

impl ShutdownSignals {
    fn new() -> anyhow::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            Ok(Self {
                interrupt: signal(SignalKind::interrupt())?,
                terminate: signal(SignalKind::terminate())?,
            })
        }
        #[cfg(windows)]
        {
            Ok(Self {
                ctrl_c: tokio::signal::windows::ctrl_c()?,
            })
        }
    }

    /// Wait for the next Ctrl+C or SIGTERM.
    async fn recv(&mut self) {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = self.interrupt.recv() => {}
                _ = self.terminate.recv() => {}
            }
        }
        #[cfg(windows)]
        {
            self.ctrl_c.recv().await;
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn raise_sigterm() {
        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .expect("run kill");
        assert!(status.success());
    }

    #[tokio::test]
    async fn signal_raised_while_busy_is_delivered() {
        let mut shutdown = ShutdownSignals::new().unwrap();
        // Not polling while the signal arrives, as when the loop awaits a command reply.
        raise_sigterm();
        tokio::time::sleep(Duration::from_millis(100)).await;
        timeout(Duration::from_secs(5), shutdown.recv())
            .await
            .expect("first signal lost");
        raise_sigterm();
        timeout(Duration::from_secs(5), shutdown.recv())
            .await
            .expect("second signal lost");
    }
}
