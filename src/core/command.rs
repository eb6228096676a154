use std::time::Duration;

use bytes::Bytes;

use crate::cluster::{key_slot, RoutingKey};
use crate::proto::frame::Frame;
use crate::{Error, Result};

/// A command ready to be routed to a cluster node.
///
/// Commands are built with the builder pattern. Arguments added with
/// [`key`](Cmd::key) are remembered as key positions and decide which slot,
/// and therefore which node, the command is sent to.
///
/// # Example
///
/// ```
/// use slotwise::Cmd;
///
/// let cmd = Cmd::new("SET").key("user:{42}:name").arg("alice");
/// assert_eq!(cmd.name(), b"SET");
/// assert_eq!(cmd.keys().count(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    args: Vec<Bytes>,
    key_positions: Vec<usize>,
}

impl Cmd {
    /// Creates a new command with the given name.
    ///
    /// # Arguments
    ///
    /// * `name` - The command name (e.g., "GET", "SET", "DEL")
    #[inline]
    pub fn new(name: impl Into<Bytes>) -> Self {
        Self {
            args: vec![name.into()],
            key_positions: Vec::new(),
        }
    }

    /// Appends a non-key argument to the command.
    #[inline]
    pub fn arg<T: Into<Bytes>>(mut self, arg: T) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends a key argument to the command.
    #[inline]
    pub fn key<T: Into<Bytes>>(mut self, key: T) -> Self {
        self.key_positions.push(self.args.len());
        self.args.push(key.into());
        self
    }

    /// Returns the command name as sent on the wire.
    pub fn name(&self) -> &[u8] {
        &self.args[0]
    }

    /// Returns the first argument after the name, used to tell apart
    /// container commands such as `OBJECT ENCODING`.
    pub fn subcommand(&self) -> Option<&[u8]> {
        self.args.get(1).map(|b| b.as_ref())
    }

    /// Returns all arguments, name included.
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Iterates over the key arguments.
    pub fn keys(&self) -> impl Iterator<Item = &Bytes> {
        self.key_positions.iter().map(move |&i| &self.args[i])
    }

    /// Derives the routing key from the command keys.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CrossSlot`] if the keys hash to more than one slot.
    pub fn routing_key(&self) -> Result<RoutingKey> {
        let mut slot = None;
        for key in self.keys() {
            let next = key_slot(key);
            match slot {
                None => slot = Some(next),
                Some(current) if current != next => return Err(Error::CrossSlot),
                Some(_) => {}
            }
        }
        Ok(slot.map_or(RoutingKey::Keyless, RoutingKey::Slot))
    }

    /// Builds the RESP Array frame for this command.
    #[inline]
    pub fn to_frame(&self) -> Frame {
        Frame::Array(
            self.args
                .iter()
                .map(|b| Frame::BulkString(Some(b.clone())))
                .collect(),
        )
    }

    /// Converts the command into a RESP Array frame.
    #[inline]
    pub fn into_frame(self) -> Frame {
        Frame::Array(
            self.args
                .into_iter()
                .map(|b| Frame::BulkString(Some(b)))
                .collect(),
        )
    }
}

/// Creates a PING command.
#[inline]
pub fn ping() -> Cmd {
    Cmd::new("PING")
}

/// Creates a GET command.
#[inline]
pub fn get(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("GET").key(key)
}

/// Creates a SET command.
#[inline]
pub fn set(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Cmd {
    Cmd::new("SET").key(key).arg(value)
}

/// Creates a SET command with expiration.
#[inline]
pub fn set_with_expiry(key: impl Into<Bytes>, value: impl Into<Bytes>, expiry: Duration) -> Cmd {
    Cmd::new("SET")
        .key(key)
        .arg(value)
        .arg("PX")
        .arg(expiry.as_millis().to_string())
}

/// Creates a DEL command for a single key.
#[inline]
pub fn del(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("DEL").key(key)
}

/// Creates an EXISTS command over one or more keys.
#[inline]
pub fn exists<K: Into<Bytes>>(keys: impl IntoIterator<Item = K>) -> Cmd {
    keys.into_iter().fold(Cmd::new("EXISTS"), |cmd, key| cmd.key(key))
}

/// Creates an INCRBY command.
#[inline]
pub fn incr_by(key: impl Into<Bytes>, amount: i64) -> Cmd {
    Cmd::new("INCRBY").key(key).arg(amount.to_string())
}

/// Creates a FLUSHALL command.
#[inline]
pub fn flushall() -> Cmd {
    Cmd::new("FLUSHALL")
}

/// Checks a reply for a server error.
#[inline]
pub fn parse_frame_response(frame: Frame) -> Result<Frame> {
    match frame {
        Frame::Error(e) => Err(Error::Server {
            message: String::from_utf8_lossy(&e).into_owned(),
        }),
        _ => Ok(frame),
    }
}

/// Converts a reply to optional bytes.
#[inline]
pub fn frame_to_bytes(frame: Frame) -> Result<Option<Bytes>> {
    match frame {
        Frame::BulkString(b) => Ok(b),
        Frame::SimpleString(s) => Ok(Some(Bytes::from(s))),
        Frame::Null => Ok(None),
        Frame::Error(e) => Err(Error::Server {
            message: String::from_utf8_lossy(&e).into_owned(),
        }),
        _ => Err(Error::Protocol {
            message: "unexpected frame type".to_string(),
        }),
    }
}

/// Converts a reply to an integer.
#[inline]
pub fn frame_to_int(frame: Frame) -> Result<i64> {
    match frame {
        Frame::Integer(i) => Ok(i),
        Frame::Error(e) => Err(Error::Server {
            message: String::from_utf8_lossy(&e).into_owned(),
        }),
        _ => Err(Error::Protocol {
            message: "expected integer reply".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmd_into_frame() {
        let frame = get("mykey").into_frame();
        assert_eq!(
            frame,
            Frame::Array(vec![Frame::bulk("GET"), Frame::bulk("mykey")])
        );
    }

    #[test]
    fn test_to_frame_matches_into_frame() {
        let cmd = set("k", "v");
        assert_eq!(cmd.to_frame(), cmd.clone().into_frame());
    }

    #[test]
    fn test_keys_are_tracked() {
        let cmd = Cmd::new("SET").key("k").arg("v");
        let keys: Vec<_> = cmd.keys().cloned().collect();
        assert_eq!(keys, vec![Bytes::from("k")]);
        assert_eq!(cmd.subcommand(), Some(&b"k"[..]));
    }

    #[test]
    fn test_routing_key_keyless() {
        assert_eq!(ping().routing_key().unwrap(), RoutingKey::Keyless);
    }

    #[test]
    fn test_routing_key_single_key() {
        let cmd = get("foo");
        assert_eq!(cmd.routing_key().unwrap(), RoutingKey::Slot(key_slot(b"foo")));
    }

    #[test]
    fn test_routing_key_same_hash_tag() {
        let cmd = exists(["{user1000}.following", "{user1000}.followers"]);
        assert_eq!(
            cmd.routing_key().unwrap(),
            RoutingKey::Slot(key_slot(b"user1000"))
        );
    }

    #[test]
    fn test_routing_key_cross_slot() {
        let cmd = exists(["foo", "bar"]);
        assert!(matches!(cmd.routing_key(), Err(Error::CrossSlot)));
    }

    #[test]
    fn test_set_with_expiry_uses_millis() {
        let cmd = set_with_expiry("k", "v", Duration::from_secs(2));
        assert_eq!(cmd.args().last().unwrap(), &Bytes::from("2000"));
    }

    #[test]
    fn test_frame_to_bytes() {
        assert_eq!(frame_to_bytes(Frame::Null).unwrap(), None);
        assert_eq!(
            frame_to_bytes(Frame::bulk("v")).unwrap(),
            Some(Bytes::from("v"))
        );
        assert!(matches!(
            frame_to_bytes(Frame::Error(b"ERR x".to_vec())),
            Err(Error::Server { .. })
        ));
    }

    #[test]
    fn test_frame_to_int() {
        assert_eq!(frame_to_int(Frame::Integer(3)).unwrap(), 3);
        assert!(frame_to_int(Frame::Null).is_err());
    }
}
