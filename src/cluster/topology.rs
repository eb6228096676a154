//! Slot ownership as reported by `CLUSTER SLOTS`.

use std::collections::BTreeSet;

use super::address::NodeAddress;
use super::slot::SLOT_COUNT;
use crate::proto::frame::Frame;
use crate::{Error, Result};

/// A range of hash slots served by one primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRange {
    /// First slot (inclusive).
    pub start: u16,
    /// Last slot (inclusive).
    pub end: u16,
    /// Primary serving the range.
    pub primary: NodeAddress,
    /// Replicas of the primary, in reply order.
    pub replicas: Vec<NodeAddress>,
}

impl SlotRange {
    /// Returns true if `slot` falls inside this range.
    pub fn contains(&self, slot: u16) -> bool {
        slot >= self.start && slot <= self.end
    }

    /// Returns the number of slots in the range.
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    /// Returns true if the range is inverted.
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// Snapshot of slot ownership.
///
/// Ranges are kept sorted by start slot so lookups can binary search.
#[derive(Debug, Clone, Default)]
pub struct ClusterTopology {
    slot_ranges: Vec<SlotRange>,
}

impl ClusterTopology {
    /// Creates an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a topology from explicit ranges.
    pub fn from_ranges(mut slot_ranges: Vec<SlotRange>) -> Self {
        slot_ranges.retain(|r| !r.is_empty());
        slot_ranges.sort_by_key(|r| r.start);
        Self { slot_ranges }
    }

    /// Returns the slot ranges sorted by start slot.
    pub fn slot_ranges(&self) -> &[SlotRange] {
        &self.slot_ranges
    }

    fn range_for_slot(&self, slot: u16) -> Option<&SlotRange> {
        let idx = self.slot_ranges.partition_point(|r| r.start <= slot);
        let range = self.slot_ranges.get(idx.checked_sub(1)?)?;
        range.contains(slot).then_some(range)
    }

    /// Returns the primary serving `slot`, if the slot is covered.
    pub fn primary_for_slot(&self, slot: u16) -> Option<&NodeAddress> {
        self.range_for_slot(slot).map(|r| &r.primary)
    }

    /// Returns the replicas serving `slot`.
    pub fn replicas_for_slot(&self, slot: u16) -> &[NodeAddress] {
        self.range_for_slot(slot)
            .map(|r| r.replicas.as_slice())
            .unwrap_or(&[])
    }

    /// Returns every distinct primary.
    pub fn primaries(&self) -> BTreeSet<NodeAddress> {
        self.slot_ranges.iter().map(|r| r.primary.clone()).collect()
    }

    /// Returns every distinct node, primaries and replicas alike.
    pub fn all_nodes(&self) -> BTreeSet<NodeAddress> {
        self.slot_ranges
            .iter()
            .flat_map(|r| std::iter::once(&r.primary).chain(r.replicas.iter()))
            .cloned()
            .collect()
    }

    /// Returns how many slots have an owner.
    pub fn covered_slots(&self) -> usize {
        self.slot_ranges.iter().map(SlotRange::len).sum()
    }

    /// Returns true if all 16384 slots have an owner.
    pub fn is_fully_covered(&self) -> bool {
        self.covered_slots() == SLOT_COUNT as usize
    }

    /// Parses a `CLUSTER SLOTS` reply.
    ///
    /// Each entry is `[start, end, [host, port, id?], replicas...]`. Entries
    /// that are not arrays or are too short are skipped; replicas that fail
    /// to parse are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the reply is not an array, a slot bound
    /// is out of range, or a primary entry is malformed.
    pub fn from_cluster_slots(frame: Frame) -> Result<Self> {
        let entries = match frame {
            Frame::Array(arr) => arr,
            _ => return Err(protocol("CLUSTER SLOTS response must be an array")),
        };

        let mut ranges = Vec::with_capacity(entries.len());
        for entry in entries {
            let entry = match entry {
                Frame::Array(arr) if arr.len() >= 3 => arr,
                _ => continue,
            };

            let start = parse_slot(&entry[0])?;
            let end = parse_slot(&entry[1])?;
            let primary = parse_node(&entry[2])?;
            let replicas = entry[3..].iter().filter_map(|f| parse_node(f).ok()).collect();

            ranges.push(SlotRange {
                start,
                end,
                primary,
                replicas,
            });
        }

        Ok(Self::from_ranges(ranges))
    }
}

fn protocol(message: &str) -> Error {
    Error::Protocol {
        message: message.to_string(),
    }
}

fn parse_slot(frame: &Frame) -> Result<u16> {
    match frame {
        Frame::Integer(n) if (0..SLOT_COUNT as i64).contains(n) => Ok(*n as u16),
        _ => Err(protocol("slot bound must be an integer in 0..16384")),
    }
}

fn parse_node(frame: &Frame) -> Result<NodeAddress> {
    let fields = match frame {
        Frame::Array(arr) if arr.len() >= 2 => arr,
        _ => return Err(protocol("node entry must be an array of at least 2 elements")),
    };

    let host = match &fields[0] {
        Frame::BulkString(Some(data)) => String::from_utf8_lossy(data).into_owned(),
        _ => return Err(protocol("node host must be a bulk string")),
    };

    let port = match &fields[1] {
        Frame::Integer(n) => u16::try_from(*n).map_err(|_| protocol("node port out of range"))?,
        _ => return Err(protocol("node port must be an integer")),
    };

    Ok(NodeAddress::new(host, port))
}
