//! Signaling wire protocol: peer identifiers, constants, and the requests the client sends.
//! Requests are HTTP/1.0, one per control connection.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default signaling server port.
pub const DEFAULT_PORT: u16 = 8888;

/// Message body a peer sends to hang up.
pub const BYE_MESSAGE: &str = "BYE";

/// Header the server uses to carry a peer id (own id on sign-in, sender id on delivery).
pub const PEER_ID_HEADER: &str = "Pragma";

/// Delay before retrying a refused connection.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Server-assigned peer identifier.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for PeerId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(PeerId)
    }
}

/// All client-to-server requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Announce `name`; response carries own id and the current peer list.
    SignIn { name: String },
    /// Hanging get: server answers when there is a notification for `peer_id`.
    Wait { peer_id: PeerId },
    /// Relay `body` to peer `to`.
    Message {
        from: PeerId,
        to: PeerId,
        body: String,
    },
    SignOut { peer_id: PeerId },
}

impl Request {
    /// Encode as raw request bytes.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Request::SignIn { name } => {
                format!("GET /sign_in?{} HTTP/1.0\r\n\r\n", encode_name(name)).into_bytes()
            }
            Request::Wait { peer_id } => {
                format!("GET /wait?peer_id={} HTTP/1.0\r\n\r\n", peer_id).into_bytes()
            }
            Request::Message { from, to, body } => {
                let mut out = format!(
                    "POST /message?peer_id={}&to={} HTTP/1.0\r\n\
                     Content-Length: {}\r\n\
                     Content-Type: text/plain\r\n\r\n",
                    from,
                    to,
                    body.len()
                )
                .into_bytes();
                out.extend_from_slice(body.as_bytes());
                out
            }
            Request::SignOut { peer_id } => {
                format!("GET /sign_out?peer_id={} HTTP/1.0\r\n\r\n", peer_id).into_bytes()
            }
        }
    }
}

/// Percent-encode everything outside `[A-Za-z0-9-._~@]` so the name cannot break the request line.
fn encode_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for b in name.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~' | b'@') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_in_request() {
        let req = Request::SignIn {
            name: "alice@host".into(),
        };
        assert_eq!(req.encode(), b"GET /sign_in?alice@host HTTP/1.0\r\n\r\n");
    }

    #[test]
    fn sign_in_name_is_escaped() {
        let req = Request::SignIn {
            name: "a b\r\nX".into(),
        };
        assert_eq!(req.encode(), b"GET /sign_in?a%20b%0D%0AX HTTP/1.0\r\n\r\n");
    }

    #[test]
    fn message_request_carries_length() {
        let req = Request::Message {
            from: PeerId(1),
            to: PeerId(2),
            body: "hello".into(),
        };
        let expected = b"POST /message?peer_id=1&to=2 HTTP/1.0\r\n\
Content-Length: 5\r\n\
Content-Type: text/plain\r\n\
\r\n\
hello";
        assert_eq!(req.encode(), expected.to_vec());
    }

    #[test]
    fn wait_and_sign_out_requests() {
        assert_eq!(
            Request::Wait { peer_id: PeerId(9) }.encode(),
            b"GET /wait?peer_id=9 HTTP/1.0\r\n\r\n"
        );
        assert_eq!(
            Request::SignOut { peer_id: PeerId(9) }.encode(),
            b"GET /sign_out?peer_id=9 HTTP/1.0\r\n\r\n"
        );
    }

    #[test]
    fn peer_id_parse() {
        assert_eq!("42".parse::<PeerId>().unwrap(), PeerId(42));
        assert!("x".parse::<PeerId>().is_err());
        assert_eq!(PeerId(5).to_string(), "5");
    }
}
