//! Response parsing: status line, headers, content length, peer-list entries.
//! Stateless; callers own the buffers.

use std::str::FromStr;

use crate::protocol::{PeerId, PEER_ID_HEADER};

/// Header block terminator.
pub const END_OF_HEADERS: &[u8] = b"\r\n\r\n";

/// Upper bound on a single response body (16 MiB).
pub const MAX_BODY_LEN: usize = 16 * 1024 * 1024;


/// Parsed response head. `eoh` is the offset of the blank-line delimiter; the body starts at `eoh + 4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub peer_id: Option<PeerId>,
    pub eoh: usize,
    pub content_length: usize,
    pub connection_close: bool,
}

impl ResponseHead {
    /// Offset of the first body byte.
    pub fn body_start(&self) -> usize {
        self.eoh + END_OF_HEADERS.len()
    }

    /// Total bytes this response occupies in the stream.
    pub fn total_len(&self) -> usize {
        self.body_start() + self.content_length
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// Error parsing a response head.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed response head: {0}")]
    MalformedHead(httparse::Error),
    #[error("response head incomplete at end of headers")]
    TruncatedHead,
    #[error("no content length specified by the server")]
    MissingContentLength,
    #[error("body of {0} bytes exceeds limit")]
    BodyTooLarge(usize),
    #[error("header block exceeds {0} bytes")]
    HeadTooLarge(usize),
}

/// Offset of the first `\r\n\r\n`, or None if the header block is not complete yet.
pub fn find_end_of_headers(buf: &[u8]) -> Option<usize> {
    find_from(buf, 0)
}

pub(crate) fn find_from(buf: &[u8], from: usize) -> Option<usize> {
    if from >= buf.len() {
        return None;
    }
    buf[from..]
        .windows(END_OF_HEADERS.len())
        .position(|w| w == END_OF_HEADERS)
        .map(|p| p + from)
}

/// Raw value of header `name` (case-sensitive, exact `Name: value` line) within `buf[..eoh]`.
/// The status line is never matched.
pub fn header_str<'a>(buf: &'a [u8], eoh: usize, name: &str) -> Option<&'a str> {
    let head = buf.get(..eoh)?;
    let head = std::str::from_utf8(head).ok()?;
    head.split("\r\n").skip(1).find_map(|line| {
        let rest = line.strip_prefix(name)?.strip_prefix(':')?;
        Some(rest.trim())
    })
}

/// Typed value of header `name`. None if absent or unparseable.
pub fn header_value<T: FromStr>(buf: &[u8], eoh: usize, name: &str) -> Option<T> {
    header_str(buf, eoh, name)?.parse().ok()
}

/// One httparse slot per line of the header block, so a valid head never overflows.
fn header_slots(buf: &[u8]) -> usize {
    let head = find_end_of_headers(buf).map_or(buf, |eoh| &buf[..eoh]);
    head.iter().filter(|&&b| b == b'\n').count() + 1
}

/// Status code of the leading status line. None if the line is not `HTTP/1.x NNN ...`.
pub fn response_status(buf: &[u8]) -> Option<u16> {
    let mut headers = vec![httparse::EMPTY_HEADER; header_slots(buf)];
    let mut resp = httparse::Response::new(&mut headers);
    match resp.parse(buf) {
        Ok(_) => resp.code,
        Err(_) => None,
    }
}

/// Parse the head of a server response. Ok(None) while the header block is incomplete.
///
/// The body is not required to be present; callers use `total_len` to decide how many more
/// bytes to accumulate. A missing `Content-Length` is an error rather than an empty body.
pub fn parse_server_response(buf: &[u8]) -> Result<Option<ResponseHead>, ParseError> {
    let Some(eoh) = find_end_of_headers(buf) else {
        return Ok(None);
    };
    let head_bytes = &buf[..eoh + END_OF_HEADERS.len()];
    let mut headers = vec![httparse::EMPTY_HEADER; header_slots(buf)];
    let mut resp = httparse::Response::new(&mut headers);
    let status = resp.parse(head_bytes).map_err(ParseError::MalformedHead)?;
    if status.is_partial() {
        return Err(ParseError::TruncatedHead);
    }
    let code = resp.code.ok_or(ParseError::TruncatedHead)?;

    let content_length: usize =
        header_value(buf, eoh, "Content-Length").ok_or(ParseError::MissingContentLength)?;
    if content_length > MAX_BODY_LEN {
        return Err(ParseError::BodyTooLarge(content_length));
    }
    let peer_id = header_value::<PeerId>(buf, eoh, PEER_ID_HEADER);
    let connection_close = header_str(buf, eoh, "Connection") == Some("close");

    Ok(Some(ResponseHead {
        status: code,
        peer_id,
        eoh,
        content_length,
        connection_close,
    }))
}

/// One `name,id,connected` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    pub name: String,
    pub id: PeerId,
    pub connected: bool,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum EntryError {
    #[error("missing field separator")]
    MissingSeparator,
    #[error("empty peer name")]
    EmptyName,
    #[error("invalid peer id {0:?}")]
    InvalidId(String),
    #[error("invalid connected flag {0:?}")]
    InvalidFlag(String),
}

/// Parse a single peer entry. Trailing `\r` and surrounding whitespace on the id/flag are ignored.
/// The flag accepts integers (non-zero is connected) and `true`/`false`.
pub fn parse_peer_entry(line: &str) -> Result<PeerEntry, EntryError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut fields = line.splitn(3, ',');
    let name = fields.next().unwrap_or_default();
    let id = fields.next().ok_or(EntryError::MissingSeparator)?;
    let flag = fields.next().ok_or(EntryError::MissingSeparator)?;
    if name.is_empty() {
        return Err(EntryError::EmptyName);
    }
    let id: PeerId = id
        .trim()
        .parse()
        .map_err(|_| EntryError::InvalidId(id.to_string()))?;
    let connected = parse_flag(flag.trim()).ok_or_else(|| EntryError::InvalidFlag(flag.to_string()))?;
    Ok(PeerEntry {
        name: name.to_string(),
        id,
        connected,
    })
}

fn parse_flag(s: &str) -> Option<bool> {
    if s.eq_ignore_ascii_case("true") {
        return Some(true);
    }
    if s.eq_ignore_ascii_case("false") {
        return Some(false);
    }
    s.parse::<i64>().ok().map(|n| n != 0)
}

/// Result of parsing a newline-delimited peer list: good entries plus skipped lines.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PeerList {
    pub entries: Vec<PeerEntry>,
    /// (zero-based line index, reason) for every malformed line.
    pub defects: Vec<(usize, EntryError)>,
}

/// Parse a peer-list body. Blank lines are ignored; a malformed line is recorded and skipped.
pub fn parse_peer_list(body: &str) -> PeerList {
    let mut list = PeerList::default();
    for (index, line) in body.split('\n').enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        match parse_peer_entry(line) {
            Ok(entry) => list.entries.push(entry),
            Err(e) => list.defects.push((index, e)),
        }
    }
    list
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIGN_IN: &[u8] = b"HTTP/1.1 200 Added\r\n\
Server: PeerConnectionTestServer/0.1\r\n\
Cache-Control: no-cache\r\n\
Connection: close\r\n\
Content-Type: text/plain\r\n\
Content-Length: 23\r\n\
Pragma: 7\r\n\
\r\n\
me,7,1\nalice,2,1\nbob,3\n";

    #[test]
    fn end_of_headers_found() {
        let eoh = find_end_of_headers(SIGN_IN).unwrap();
        assert_eq!(&SIGN_IN[eoh..eoh + 4], b"\r\n\r\n");
    }

    #[test]
    fn end_of_headers_not_yet() {
        assert_eq!(find_end_of_headers(b""), None);
        assert_eq!(find_end_of_headers(b"HTTP/1.1 200 OK\r\nPragma: 1\r\n"), None);
        assert_eq!(find_from(b"abc", 10), None);
    }

    #[test]
    fn header_lookup_is_exact_and_case_sensitive() {
        let eoh = find_end_of_headers(SIGN_IN).unwrap();
        assert_eq!(header_value::<usize>(SIGN_IN, eoh, "Content-Length"), Some(23));
        assert_eq!(header_value::<u32>(SIGN_IN, eoh, "Pragma"), Some(7));
        assert_eq!(header_str(SIGN_IN, eoh, "Connection"), Some("close"));
        assert_eq!(header_str(SIGN_IN, eoh, "content-length"), None);
        assert_eq!(header_str(SIGN_IN, eoh, "Content"), None);
        assert_eq!(header_str(SIGN_IN, eoh, "X-Missing"), None);
    }

    #[test]
    fn header_outside_head_is_ignored() {
        let buf = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nPragma: 5\r\n";
        let eoh = find_end_of_headers(buf).unwrap();
        assert_eq!(header_str(buf, eoh, "Pragma"), None);
    }

    #[test]
    fn malformed_numeric_header_is_unknown() {
        let buf = b"HTTP/1.1 200 OK\r\nContent-Length: ten\r\n\r\n";
        let eoh = find_end_of_headers(buf).unwrap();
        assert_eq!(header_value::<usize>(buf, eoh, "Content-Length"), None);
        assert_eq!(
            parse_server_response(buf),
            Err(ParseError::MissingContentLength)
        );
    }

    #[test]
    fn status_codes() {
        assert_eq!(response_status(SIGN_IN), Some(200));
        assert_eq!(response_status(b"HTTP/1.1 500 Oops\r\n\r\n"), Some(500));
        assert_eq!(response_status(b"HTTP/1.0 404 Not Found\r\n"), Some(404));
        assert_eq!(response_status(b"garbage line\r\n\r\n"), None);
        assert_eq!(response_status(b"HTTP/1.1 abc\r\n\r\n"), None);
        assert_eq!(response_status(b""), None);
    }

    #[test]
    fn server_response_head() {
        let head = parse_server_response(SIGN_IN).unwrap().unwrap();
        assert_eq!(head.status, 200);
        assert_eq!(head.peer_id, Some(PeerId(7)));
        assert_eq!(head.content_length, 23);
        assert!(head.connection_close);
        assert_eq!(head.total_len(), SIGN_IN.len());
        assert_eq!(&SIGN_IN[head.body_start()..], b"me,7,1\nalice,2,1\nbob,3\n");
    }

    #[test]
    fn server_response_partial_headers() {
        assert_eq!(parse_server_response(b""), Ok(None));
        assert_eq!(parse_server_response(&SIGN_IN[..40]), Ok(None));
    }

    #[test]
    fn server_response_without_content_length() {
        let buf = b"HTTP/1.1 200 OK\r\nPragma: 3\r\n\r\n";
        assert_eq!(
            parse_server_response(buf),
            Err(ParseError::MissingContentLength)
        );
    }

    #[test]
    fn server_response_explicit_zero_length() {
        let buf = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
        let head = parse_server_response(buf).unwrap().unwrap();
        assert_eq!(head.content_length, 0);
        assert_eq!(head.peer_id, None);
        assert!(!head.connection_close);
    }

    #[test]
    fn server_response_malformed_status() {
        let buf = b"NOT-HTTP\r\nContent-Length: 0\r\n\r\n";
        assert!(matches!(
            parse_server_response(buf),
            Err(ParseError::MalformedHead(_))
        ));
    }

    #[test]
    fn server_response_body_limit() {
        let buf = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", MAX_BODY_LEN + 1);
        assert_eq!(
            parse_server_response(buf.as_bytes()),
            Err(ParseError::BodyTooLarge(MAX_BODY_LEN + 1))
        );
    }

    #[test]
    fn server_response_with_many_headers() {
        let mut head = String::from("HTTP/1.1 200 OK\r\nPragma: 7\r\n");
        for i in 0..40 {
            head.push_str(&format!("X-Extra-{}: {}\r\n", i, i));
        }
        head.push_str("Content-Length: 0\r\n\r\n");
        assert_eq!(response_status(head.as_bytes()), Some(200));
        let parsed = parse_server_response(head.as_bytes()).unwrap().unwrap();
        assert_eq!(parsed.peer_id, Some(PeerId(7)));
        assert_eq!(parsed.content_length, 0);
    }

    #[test]
    fn peer_entry_forms() {
        assert_eq!(
            parse_peer_entry("alice,2,1").unwrap(),
            PeerEntry {
                name: "alice".into(),
                id: PeerId(2),
                connected: true
            }
        );
        assert!(!parse_peer_entry("bob,3,0").unwrap().connected);
        assert!(parse_peer_entry("carol,4,true\r").unwrap().connected);
        assert!(!parse_peer_entry("dave,5,false").unwrap().connected);
    }

    #[test]
    fn peer_entry_failures() {
        assert_eq!(parse_peer_entry("alice"), Err(EntryError::MissingSeparator));
        assert_eq!(parse_peer_entry("alice,2"), Err(EntryError::MissingSeparator));
        assert_eq!(parse_peer_entry(",2,1"), Err(EntryError::EmptyName));
        assert!(matches!(
            parse_peer_entry("alice,x,1"),
            Err(EntryError::InvalidId(_))
        ));
        assert!(matches!(
            parse_peer_entry("alice,-4,1"),
            Err(EntryError::InvalidId(_))
        ));
        assert!(matches!(
            parse_peer_entry("alice,2,maybe"),
            Err(EntryError::InvalidFlag(_))
        ));
    }

    #[test]
    fn peer_list_two_entries() {
        let list = parse_peer_list("alice,2,true\nbob,3,false\n");
        assert!(list.defects.is_empty());
        assert_eq!(list.entries.len(), 2);
        assert_eq!(list.entries[0].name, "alice");
        assert_eq!(list.entries[0].id, PeerId(2));
        assert!(list.entries[0].connected);
        assert_eq!(list.entries[1].name, "bob");
        assert_eq!(list.entries[1].id, PeerId(3));
        assert!(!list.entries[1].connected);
    }

    #[test]
    fn peer_list_skips_malformed_line() {
        let list = parse_peer_list("alice,2,true\nbob\n");
        assert_eq!(list.entries.len(), 1);
        assert_eq!(list.entries[0].name, "alice");
        assert_eq!(list.defects, vec![(1, EntryError::MissingSeparator)]);
    }

    #[test]
    fn peer_list_empty_and_unterminated() {
        assert_eq!(parse_peer_list(""), PeerList::default());
        let list = parse_peer_list("\r\nalice,2,1");
        assert_eq!(list.entries.len(), 1);
        assert!(list.defects.is_empty());
    }
}
