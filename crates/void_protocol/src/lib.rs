//! # Void Protocol - Scene Update Wire Codec
//!
//! Splits scene updates into size-bounded packets and reassembles them on the
//! far side, and defines the messages participants exchange.
//!
//! ## Packet Layout
//!
//! ```text
//! +----------+-------------------------------+---------+
//! | seq: u32 | block fragments ...           | trailer |
//! +----------+-------------------------------+---------+
//!
//! block   := tag: u8 | len: u32 | body[len]   (body may continue in later packets)
//! trailer := 0xFE (more packets follow) | 0xFF (last packet)
//! ```
//!
//! All integers are little endian. Sequence numbers start at 1 for every
//! update. Blocks are written in the order flush info, actions, resources.
//!
//! ## Key Components
//!
//! - [`UpdatePacketizer`] - Writes one update into packets
//! - [`UpdateDepacketizer`] - Resumable decoder reassembling updates
//! - [`DistributionMessage`] - Commands exchanged between participants

pub mod depacketizer;
pub mod message;
pub mod packet;
pub mod packetizer;

pub use depacketizer::{DepacketizeResult, DepacketizerState, DepacketizerStats, UpdateDepacketizer};
pub use message::DistributionMessage;
pub use packet::{BlockKind, Trailer};
pub use packetizer::{PacketizerStats, UpdatePacketizer};

use thiserror::Error;
use void_resource::ContentHash;

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Packet capacity {capacity} too small, need at least {required} bytes")]
    CapacityTooSmall { capacity: usize, required: usize },

    #[error("Malformed packet: {0}")]
    Malformed(String),

    #[error("Resource {0} is not resident")]
    ResourceNotResident(ContentHash),

    #[error("Send aborted at packet {packet}")]
    SendAborted { packet: u32 },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for CodecError {
    fn from(e: bincode::Error) -> Self {
        CodecError::Serialization(e.to_string())
    }
}

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;
