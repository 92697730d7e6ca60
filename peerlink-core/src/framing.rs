//! Incremental response assembly across socket reads.
//! Tracks how far the header terminator search has progressed and, once the head is parsed,
//! how many body bytes are still needed, so a growing buffer is never rescanned from the start.

use crate::parser::{self, ParseError, ResponseHead, END_OF_HEADERS};
use crate::protocol::PeerId;

/// Largest header block accepted before the terminator is seen.
pub const MAX_HEAD_LEN: usize = 64 * 1024;

/// A complete response: parsed head plus its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub head: ResponseHead,
    pub body: Vec<u8>,
}

impl Response {
    pub fn status(&self) -> u16 {
        self.head.status
    }

    pub fn peer_id(&self) -> Option<PeerId> {
        self.head.peer_id
    }

    /// Body as text; invalid UTF-8 is replaced rather than rejected.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Per-socket inbound buffer.
#[derive(Debug, Default)]
pub struct ResponseReader {
    buf: Vec<u8>,
    /// Bytes already searched for the header terminator.
    scanned: usize,
    head: Option<ResponseHead>,
}

impl ResponseReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes held but not yet returned as part of a response.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Body bytes still missing for the current response, once its head is known.
    pub fn needed(&self) -> Option<usize> {
        self.head
            .map(|h| h.total_len().saturating_sub(self.buf.len()))
    }

    /// Drop everything, including a partially parsed head.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.scanned = 0;
        self.head = None;
    }

    /// Take the next complete response off the front of the buffer.
    /// Ok(None) means more bytes are needed. After an error the reader should be cleared.
    pub fn next_response(&mut self) -> Result<Option<Response>, ParseError> {
        let head = match self.head {
            Some(head) => head,
            None => {
                // The terminator may straddle the previous scan boundary.
                let from = self.scanned.saturating_sub(END_OF_HEADERS.len() - 1);
                if parser::find_from(&self.buf, from).is_none() {
                    self.scanned = self.buf.len();
                    if self.buf.len() > MAX_HEAD_LEN {
                        return Err(ParseError::HeadTooLarge(MAX_HEAD_LEN));
                    }
                    return Ok(None);
                }
                match parser::parse_server_response(&self.buf)? {
                    Some(head) => {
                        self.head = Some(head);
                        head
                    }
                    None => return Ok(None),
                }
            }
        };

        let total = head.total_len();
        if self.buf.len() < total {
            return Ok(None);
        }
        let body = self.buf[head.body_start()..total].to_vec();
        self.buf.drain(..total);
        self.scanned = 0;
        self.head = None;
        Ok(Some(Response { head, body }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(peer: u32, body: &str) -> Vec<u8> {
        format!(
            "HTTP/1.1 200 OK\r\nPragma: {}\r\nContent-Length: {}\r\n\r\n{}",
            peer,
            body.len(),
            body
        )
        .into_bytes()
    }

    #[test]
    fn empty_reader_needs_more() {
        let mut r = ResponseReader::new();
        assert_eq!(r.next_response(), Ok(None));
        assert_eq!(r.needed(), None);
    }

    #[test]
    fn partial_headers_then_complete() {
        let bytes = response(3, "hi");
        let mut r = ResponseReader::new();
        r.push(&bytes[..10]);
        assert_eq!(r.next_response(), Ok(None));
        r.push(&bytes[10..]);
        let resp = r.next_response().unwrap().unwrap();
        assert_eq!(resp.peer_id(), Some(PeerId(3)));
        assert_eq!(resp.body, b"hi");
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn terminator_split_across_reads() {
        let bytes = response(4, "x");
        let eoh = parser::find_end_of_headers(&bytes).unwrap();
        let mut r = ResponseReader::new();
        r.push(&bytes[..eoh + 2]);
        assert_eq!(r.next_response(), Ok(None));
        r.push(&bytes[eoh + 2..]);
        assert_eq!(r.next_response().unwrap().unwrap().body, b"x");
    }

    #[test]
    fn body_shorter_than_content_length_is_incomplete() {
        let bytes = response(5, "hello world");
        let mut r = ResponseReader::new();
        r.push(&bytes[..bytes.len() - 4]);
        assert_eq!(r.next_response(), Ok(None));
        assert_eq!(r.needed(), Some(4));
        assert_eq!(r.next_response(), Ok(None));
        r.push(&bytes[bytes.len() - 4..]);
        let resp = r.next_response().unwrap().unwrap();
        assert_eq!(resp.body_text(), "hello world");
    }

    #[test]
    fn pipelined_responses_are_split() {
        let mut bytes = response(1, "a");
        bytes.extend(response(2, "bb"));
        bytes.extend_from_slice(b"HTTP/1.1 200");
        let mut r = ResponseReader::new();
        r.push(&bytes);
        assert_eq!(r.next_response().unwrap().unwrap().body, b"a");
        assert_eq!(r.next_response().unwrap().unwrap().body, b"bb");
        assert_eq!(r.next_response(), Ok(None));
        assert_eq!(r.buffered(), "HTTP/1.1 200".len());
    }

    #[test]
    fn missing_content_length_is_error() {
        let mut r = ResponseReader::new();
        r.push(b"HTTP/1.1 200 OK\r\nPragma: 1\r\n\r\nbody");
        assert_eq!(r.next_response(), Err(ParseError::MissingContentLength));
    }

    #[test]
    fn oversized_head_is_rejected() {
        let mut r = ResponseReader::new();
        r.push(&vec![b'a'; MAX_HEAD_LEN + 1]);
        assert_eq!(
            r.next_response(),
            Err(ParseError::HeadTooLarge(MAX_HEAD_LEN))
        );
    }

    #[test]
    fn clear_discards_partial_state() {
        let bytes = response(5, "hello");
        let mut r = ResponseReader::new();
        r.push(&bytes[..bytes.len() - 2]);
        assert_eq!(r.next_response(), Ok(None));
        r.clear();
        assert_eq!(r.buffered(), 0);
        assert_eq!(r.needed(), None);
        r.push(&response(6, "ok"));
        assert_eq!(r.next_response().unwrap().unwrap().peer_id(), Some(PeerId(6)));
    }
}
