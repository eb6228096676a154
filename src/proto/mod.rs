//! RESP (Redis Serialization Protocol) support.
//!
//! ## Modules
//!
//! - [`codec`] - Encoder and incremental decoder for RESP2
//! - [`error`] - The crate error type
//! - [`frame`] - Frame types representing RESP data structures

pub mod codec;
/// Error types.
pub mod error;
pub mod frame;
