//! Interactive console: stdin command parsing and event rendering.

use anyhow::{anyhow, bail};
use peerlink_core::{ClientEvent, PeerId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Peers,
    Send { to: PeerId, text: String },
    Bye(PeerId),
    Quit,
}

pub const HELP: &str = "commands: peers | send <id> <text> | bye <id> | quit";

/// Parse one stdin line. Blank lines yield `None`.
pub fn parse_input(line: &str) -> anyhow::Result<Option<Input>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim_start();
    let input = match word {
        "peers" => Input::Peers,
        "quit" | "exit" => Input::Quit,
        "bye" => Input::Bye(parse_peer(rest)?),
        "send" => {
            let (id, text) = rest
                .split_once(' ')
                .ok_or_else(|| anyhow!("usage: send <id> <text>"))?;
            Input::Send {
                to: parse_peer(id)?,
                text: text.to_string(),
            }
        }
        other => bail!("unknown command {:?}; {}", other, HELP),
    };
    Ok(Some(input))
}

fn parse_peer(s: &str) -> anyhow::Result<PeerId> {
    s.trim()
        .parse()
        .map_err(|_| anyhow!("invalid peer id {:?}", s.trim()))
}

pub fn render(event: &ClientEvent) -> String {
    match event {
        ClientEvent::SignedIn => "signed in".to_string(),
        ClientEvent::Disconnected => "disconnected".to_string(),
        ClientEvent::PeerConnected { id, name } => format!("+ {} {}", id, name),
        ClientEvent::PeerDisconnected { id } => format!("- {}", id),
        ClientEvent::MessageFromPeer { id, message } => format!("[{}] {}", id, message),
        ClientEvent::MessageSent(Ok(())) => "sent".to_string(),
        ClientEvent::MessageSent(Err(e)) => format!("send failed: {}", e),
        ClientEvent::ServerConnectionFailure => "server connection failed".to_string(),
    }
}

pub fn render_peers(peers: &[(PeerId, String)]) -> String {
    if peers.is_empty() {
        return "no peers".to_string();
    }
    peers
        .iter()
        .map(|(id, name)| format!("{} {}", id, name))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerlink_core::SendFailure;

    #[test]
    fn parses_commands() {
        assert_eq!(parse_input("  ").unwrap(), None);
        assert_eq!(parse_input("peers").unwrap(), Some(Input::Peers));
        assert_eq!(parse_input("quit").unwrap(), Some(Input::Quit));
        assert_eq!(parse_input("bye 4").unwrap(), Some(Input::Bye(PeerId(4))));
        assert_eq!(
            parse_input("send 2 hello there").unwrap(),
            Some(Input::Send {
                to: PeerId(2),
                text: "hello there".into()
            })
        );
    }

    #[test]
    fn rejects_bad_commands() {
        assert!(parse_input("send 2").is_err());
        assert!(parse_input("send x hi").is_err());
        assert!(parse_input("bye").is_err());
        assert!(parse_input("dance").is_err());
    }

    #[test]
    fn renders_events() {
        assert_eq!(
            render(&ClientEvent::PeerConnected {
                id: PeerId(2),
                name: "alice".into()
            }),
            "+ 2 alice"
        );
        assert_eq!(
            render(&ClientEvent::MessageSent(Err(SendFailure::Rejected(500)))),
            "send failed: server answered with status 500"
        );
        assert_eq!(render_peers(&[]), "no peers");
        assert_eq!(
            render_peers(&[(PeerId(2), "alice".into()), (PeerId(3), "bob".into())]),
            "2 alice\n3 bob"
        );
    }
}
