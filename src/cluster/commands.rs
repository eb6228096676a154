//! Cluster management commands used for discovery and redirects.

use crate::core::command::Cmd;

/// Creates a CLUSTER SLOTS command.
///
/// The reply lists slot ranges with their primary and replica nodes.
pub fn cluster_slots() -> Cmd {
    Cmd::new("CLUSTER").arg("SLOTS")
}

/// Creates an ASKING command.
///
/// ASKING is a one-shot flag: it only lets the immediately following command
/// through on a node that is importing the slot.
pub fn asking() -> Cmd {
    Cmd::new("ASKING")
}

/// Creates a READONLY command, which allows reads from a replica connection.
pub fn readonly() -> Cmd {
    Cmd::new("READONLY")
}
