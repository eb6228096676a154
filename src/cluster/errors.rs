//! Parsing of cluster error replies.
//!
//! Nodes answer with special error replies when a slot lives elsewhere:
//! - `MOVED <slot> <host>:<port>` - permanent redirect
//! - `ASK <slot> <host>:<port>` - temporary redirect during migration
//! - `CLUSTERDOWN` - the cluster cannot serve the slot

use super::address::NodeAddress;
use crate::Error;

/// Converts an error reply into a typed error.
///
/// Redirects whose target cannot be parsed fall back to [`Error::Server`].
pub fn parse_redis_error(error_msg: &[u8]) -> Error {
    let msg = String::from_utf8_lossy(error_msg);
    let msg = msg.trim();

    if let Some(stripped) = msg.strip_prefix("MOVED ") {
        if let Some((slot, address)) = parse_redirect(stripped) {
            return Error::Moved { slot, address };
        }
    }

    if let Some(stripped) = msg.strip_prefix("ASK ") {
        if let Some((slot, address)) = parse_redirect(stripped) {
            return Error::Ask { slot, address };
        }
    }

    if msg.starts_with("CLUSTERDOWN") {
        return Error::ClusterDown;
    }

    if msg.starts_with("CROSSSLOT") {
        return Error::CrossSlot;
    }

    Error::Server {
        message: msg.to_string(),
    }
}

/// Parses `"<slot> <host>:<port>"`.
fn parse_redirect(args: &str) -> Option<(u16, NodeAddress)> {
    let mut parts = args.split_whitespace();
    let slot: u16 = parts.next()?.parse().ok()?;
    let address = NodeAddress::parse(parts.next()?).ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((slot, address))
}
