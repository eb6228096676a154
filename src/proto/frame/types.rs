use bytes::Bytes;

/// A RESP2 frame.
///
/// Replies from cluster nodes and the commands sent to them are both
/// represented as frames:
/// - SimpleString: status replies like "OK"
/// - Error: error replies, including `MOVED` and `ASK` redirects
/// - Integer: numeric replies
/// - BulkString: binary-safe string data
/// - Array: command arguments and multi-bulk replies
/// - Null: the nil reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Simple string (+OK).
    SimpleString(Vec<u8>),
    /// Error (-ERR).
    Error(Vec<u8>),
    /// Integer (:1000).
    Integer(i64),
    /// Bulk string ($6\r\nfoobar).
    BulkString(Option<Bytes>),
    /// Array (*2\r\n...).
    Array(Vec<Frame>),
    /// Null ($-1 or *-1).
    Null,
}

impl Frame {
    /// Builds a bulk string frame from anything convertible to [`Bytes`].
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Frame::BulkString(Some(data.into()))
    }

    /// Builds a simple string frame.
    pub fn simple(data: impl AsRef<[u8]>) -> Self {
        Frame::SimpleString(data.as_ref().to_vec())
    }

    /// Returns true for the `+OK` status reply.
    pub fn is_ok(&self) -> bool {
        matches!(self, Frame::SimpleString(s) if s == b"OK")
    }

    /// Returns true if this frame is Null or a nil bulk string.
    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null | Frame::BulkString(None))
    }

    /// Returns the integer payload, if this is an Integer frame.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Frame::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the elements of an Array frame.
    pub fn as_array(&self) -> Option<&[Frame]> {
        match self {
            Frame::Array(items) => Some(items),
            _ => None,
        }
    }
}
