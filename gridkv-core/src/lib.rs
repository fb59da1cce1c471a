//! Core types and wire protocol for the GridKV thin client.

#![warn(missing_docs)]

pub mod binary;
pub mod error;
pub mod protocol;

pub use binary::{BinaryObject, BinaryReader, BinaryWriter, ComplexObject, Value};
pub use error::{GridError, Result};
pub use protocol::{AffinityTopologyVersion, ProtocolVersion};
