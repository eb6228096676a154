//! RESP2 encoding and incremental decoding.
//!
//! The decoder works on a [`BytesMut`] read buffer and only consumes bytes once
//! a whole frame is available, so a partial read leaves the buffer untouched.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::proto::error::{Error, Result};
use crate::proto::frame::Frame;

const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

/// Appends the RESP encoding of `frame` to `dst`.
pub fn encode(frame: &Frame, dst: &mut BytesMut) {
    match frame {
        Frame::SimpleString(s) => put_line(dst, b'+', s),
        Frame::Error(e) => put_line(dst, b'-', e),
        Frame::Integer(n) => put_line(dst, b':', n.to_string().as_bytes()),
        Frame::BulkString(Some(data)) => {
            put_line(dst, b'$', data.len().to_string().as_bytes());
            dst.extend_from_slice(data);
            dst.extend_from_slice(b"\r\n");
        }
        Frame::BulkString(None) | Frame::Null => dst.extend_from_slice(b"$-1\r\n"),
        Frame::Array(items) => {
            put_line(dst, b'*', items.len().to_string().as_bytes());
            for item in items {
                encode(item, dst);
            }
        }
    }
}

fn put_line(dst: &mut BytesMut, prefix: u8, body: &[u8]) {
    dst.put_u8(prefix);
    dst.extend_from_slice(body);
    dst.extend_from_slice(b"\r\n");
}

/// Incremental RESP decoder.
#[derive(Debug)]
pub struct Decoder {
    max_frame_size: usize,
}

impl Decoder {
    /// Creates a decoder with the default 512 MB frame limit.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates a decoder rejecting bulk strings larger than `max_frame_size`.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Decodes one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` does not yet hold a complete frame; in
    /// that case nothing is consumed.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        match self.parse(&buf[..], 0)? {
            Some((frame, used)) => {
                buf.advance(used);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    fn parse(&self, src: &[u8], pos: usize) -> Result<Option<(Frame, usize)>> {
        let Some(&tag) = src.get(pos) else {
            return Ok(None);
        };
        let Some(line_end) = find_crlf(src, pos + 1) else {
            return Ok(None);
        };
        let line = &src[pos + 1..line_end];
        let next = line_end + 2;

        match tag {
            b'+' => Ok(Some((Frame::SimpleString(line.to_vec()), next))),
            b'-' => Ok(Some((Frame::Error(line.to_vec()), next))),
            b':' => Ok(Some((Frame::Integer(parse_int(line)?), next))),
            b'$' => {
                let len = parse_int(line)?;
                if len < 0 {
                    return Ok(Some((Frame::BulkString(None), next)));
                }
                let len = len as usize;
                if len > self.max_frame_size {
                    return Err(protocol("bulk string length exceeds maximum frame size"));
                }
                if src.len() < next + len + 2 {
                    return Ok(None);
                }
                let data = Bytes::copy_from_slice(&src[next..next + len]);
                Ok(Some((Frame::BulkString(Some(data)), next + len + 2)))
            }
            b'*' => {
                let len = parse_int(line)?;
                if len < 0 {
                    return Ok(Some((Frame::Null, next)));
                }
                let mut items = Vec::with_capacity((len as usize).min(1024));
                let mut cursor = next;
                for _ in 0..len {
                    match self.parse(src, cursor)? {
                        Some((item, used)) => {
                            items.push(item);
                            cursor = used;
                        }
                        None => return Ok(None),
                    }
                }
                Ok(Some((Frame::Array(items), cursor)))
            }
            other => Err(protocol(format!("unknown frame type: {}", other as char))),
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

fn find_crlf(src: &[u8], from: usize) -> Option<usize> {
    src.get(from..)?
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|i| from + i)
}

fn parse_int(line: &[u8]) -> Result<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| protocol("invalid integer in frame header"))
}

fn protocol(message: impl Into<String>) -> Error {
    Error::Protocol {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> Option<Frame> {
        let mut buf = BytesMut::from(input);
        Decoder::new().decode(&mut buf).unwrap()
    }

    #[test]
    fn test_decode_simple_and_error() {
        assert_eq!(decode_all(b"+OK\r\n"), Some(Frame::simple("OK")));
        assert_eq!(
            decode_all(b"-MOVED 3999 127.0.0.1:7001\r\n"),
            Some(Frame::Error(b"MOVED 3999 127.0.0.1:7001".to_vec()))
        );
    }

    #[test]
    fn test_decode_nested_array() {
        let frame = decode_all(b"*2\r\n:0\r\n*2\r\n$9\r\n127.0.0.1\r\n:7000\r\n").unwrap();
        assert_eq!(
            frame,
            Frame::Array(vec![
                Frame::Integer(0),
                Frame::Array(vec![Frame::bulk("127.0.0.1"), Frame::Integer(7000)]),
            ])
        );
    }

    #[test]
    fn test_partial_array_consumes_nothing() {
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nfoo\r\n$3\r\nba"[..]);
        let decoder = Decoder::new();
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 19);

        buf.extend_from_slice(b"r\r\n");
        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, Frame::Array(vec![Frame::bulk("foo"), Frame::bulk("bar")]));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_nulls() {
        assert_eq!(decode_all(b"$-1\r\n"), Some(Frame::BulkString(None)));
        assert_eq!(decode_all(b"*-1\r\n"), Some(Frame::Null));
    }

    #[test]
    fn test_bulk_exceeding_limit_is_rejected() {
        let mut buf = BytesMut::from(&b"$100\r\n"[..]);
        let result = Decoder::with_max_frame_size(10).decode(&mut buf);
        assert!(matches!(result, Err(Error::Protocol { .. })));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let mut buf = BytesMut::from(&b"?what\r\n"[..]);
        assert!(Decoder::new().decode(&mut buf).is_err());
    }

    #[test]
    fn test_encode_command_array() {
        let mut dst = BytesMut::new();
        encode(
            &Frame::Array(vec![Frame::bulk("GET"), Frame::bulk("key")]),
            &mut dst,
        );
        assert_eq!(&dst[..], b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
    }
}
