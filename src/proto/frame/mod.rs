//! RESP frame types.
//!
//! This module defines the frame types exchanged with cluster nodes:
//! simple strings, errors, integers, bulk strings and arrays.

/// Frame type definitions.
pub mod types;

pub use types::Frame;
