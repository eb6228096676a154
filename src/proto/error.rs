use std::io;

use thiserror::Error;

use crate::cluster::NodeAddress;
use crate::proto::frame::Frame;

/// Result type alias for slotwise operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while routing and executing cluster commands.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An IO error occurred: the node is unreachable or the link broke.
    ///
    /// This is the only variant the executor treats as a connection failure.
    #[error("IO error: {source}")]
    Io {
        /// The underlying IO error.
        #[from]
        source: io::Error,
    },

    /// A protocol error occurred.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the error.
        message: String,
    },

    /// The server returned an error.
    #[error("server error: {message}")]
    Server {
        /// Error message from server.
        message: String,
    },

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of invalid argument.
        message: String,
    },

    /// Key moved to another node (permanent redirect).
    ///
    /// The slot for the requested key has been reassigned. The slot cache
    /// should be renewed and the command retried on the new owner.
    #[error("MOVED to slot {slot} at {address}")]
    Moved {
        /// The slot number (0-16383).
        slot: u16,
        /// The node now owning this slot.
        address: NodeAddress,
    },

    /// Temporary redirect during slot migration.
    ///
    /// The client should send `ASKING` to the target node, then the command.
    /// The slot cache must NOT be updated.
    #[error("ASK to slot {slot} at {address}")]
    Ask {
        /// The slot number (0-16383).
        slot: u16,
        /// The node temporarily importing this slot.
        address: NodeAddress,
    },

    /// The cluster reported `CLUSTERDOWN`.
    #[error("CLUSTERDOWN cluster is down")]
    ClusterDown,

    /// Keys of a multi-key command map to different slots.
    #[error("CROSSSLOT keys in multi-key operation map to different slots")]
    CrossSlot,

    /// Terminal failure of a cluster operation.
    ///
    /// Raised when retries are exhausted, the retry deadline passed, or the
    /// node set is unusable. Never retried by the executor.
    #[error("cluster operation failed: {message}")]
    ClusterOperation {
        /// Description of the failure.
        message: String,
        /// The last retryable error seen before giving up, if any.
        #[source]
        source: Option<Box<Error>>,
    },

    /// A broadcast command failed on at least one primary, or primaries
    /// disagreed on the reply.
    #[error("broadcast failed: {} of {} nodes errored or disagreed", failed_count(.replies), .replies.len())]
    Broadcast {
        /// Outcome per node, in iteration order.
        replies: Vec<(NodeAddress, Result<Frame>)>,
    },
}

fn failed_count(replies: &[(NodeAddress, Result<Frame>)]) -> usize {
    replies.iter().filter(|(_, r)| r.is_err()).count()
}

impl Error {
    /// Builds a terminal [`Error::ClusterOperation`] without a cause.
    pub fn cluster_operation(message: impl Into<String>) -> Self {
        Error::ClusterOperation {
            message: message.into(),
            source: None,
        }
    }

    /// Builds a terminal [`Error::ClusterOperation`] caused by `last`.
    pub fn cluster_operation_caused_by(message: impl Into<String>, last: Option<Error>) -> Self {
        Error::ClusterOperation {
            message: message.into(),
            source: last.map(Box::new),
        }
    }

    /// Returns true if the error means the node could not be reached or the
    /// connection broke mid-command.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Error::Io { .. })
    }

    /// Returns true for `MOVED` and `ASK` redirects.
    pub fn is_redirect(&self) -> bool {
        matches!(self, Error::Moved { .. } | Error::Ask { .. })
    }

    pub(crate) fn broken_pipe(message: &str) -> Self {
        Error::Io {
            source: io::Error::new(io::ErrorKind::BrokenPipe, message.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_io() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused");
        let error = Error::Io { source: io_err };
        assert!(error.to_string().contains("IO error"));
        assert!(error.is_connection_failure());
    }

    #[test]
    fn test_error_display_server() {
        let error = Error::Server {
            message: "ERR wrong type".to_string(),
        };
        assert_eq!(error.to_string(), "server error: ERR wrong type");
        assert!(!error.is_connection_failure());
    }

    #[test]
    fn test_redirect_classification() {
        let moved = Error::Moved {
            slot: 1,
            address: NodeAddress::new("127.0.0.1", 7001),
        };
        assert!(moved.is_redirect());
        assert!(!moved.is_connection_failure());
        assert_eq!(moved.to_string(), "MOVED to slot 1 at 127.0.0.1:7001");
    }

    #[test]
    fn test_cluster_operation_keeps_cause() {
        use std::error::Error as _;

        let cause = Error::broken_pipe("connection closed");
        let error = Error::cluster_operation_caused_by("No more cluster attempts left.", Some(cause));
        assert_eq!(
            error.to_string(),
            "cluster operation failed: No more cluster attempts left."
        );
        assert!(error.source().is_some());

        let bare = Error::cluster_operation("No cluster nodes available.");
        assert!(bare.source().is_none());
    }

    #[test]
    fn test_broadcast_display_counts_failures() {
        let error = Error::Broadcast {
            replies: vec![
                (NodeAddress::new("a", 1), Ok(Frame::simple("OK"))),
                (NodeAddress::new("b", 2), Err(Error::broken_pipe("down"))),
            ],
        };
        assert_eq!(
            error.to_string(),
            "broadcast failed: 1 of 2 nodes errored or disagreed"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::Other, "test");
        let error: Error = io_err.into();
        assert!(matches!(error, Error::Io { .. }));
    }
}
