//! Container errors

use thiserror::Error;

use super::{ChannelId, SchemaId};

/// Errors that can occur while writing or reading a container
#[derive(Error, Debug)]
pub enum ContainerError {
    /// Reading or writing the file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The schema key is taken by a schema with different data
    #[error("Schema '{name}' ({encoding}) is already registered with different data")]
    DuplicateSchema {
        /// Schema name
        name: String,
        /// Schema encoding
        encoding: String,
    },

    /// No schema with this id is registered
    #[error("Unknown schema id {0}")]
    UnknownSchema(SchemaId),

    /// No channel with this id is registered
    #[error("Unknown channel id {0}")]
    UnknownChannel(ChannelId),

    /// A message sequence did not increase on its channel
    #[error("Sequence {sequence} on channel {channel_id} does not follow {previous}")]
    NonMonotonicSequence {
        /// Channel of the message
        channel_id: ChannelId,
        /// Last sequence written on the channel
        previous: u32,
        /// Rejected sequence
        sequence: u32,
    },

    /// The id space of schemas or channels is exhausted
    #[error("Registry is full: no {0} ids left")]
    RegistryFull(&'static str),

    /// `open` was called on an open writer
    #[error("Writer is already open")]
    AlreadyOpen,

    /// The writer has no open file
    #[error("Writer is not open")]
    NotOpen,

    /// An earlier I/O failure left the file unusable
    #[error("Writer failed earlier in this session; terminate it instead")]
    Poisoned,

    /// The file does not start (or end) with the container magic
    #[error("Not a cloudlog container: bad magic")]
    InvalidMagic,

    /// The file was never finalized
    #[error("Container is incomplete: missing footer")]
    Incomplete,

    /// A record could not be parsed
    #[error("Corrupt record at offset {offset}: {reason}")]
    Corrupt {
        /// File offset of the record
        offset: u64,
        /// What was wrong with it
        reason: String,
    },

    /// A stored CRC does not match the bytes it covers
    #[error("CRC mismatch: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        /// CRC stored in the file
        expected: u32,
        /// CRC of the bytes read
        actual: u32,
    },
}

impl ContainerError {
    pub(crate) fn corrupt(offset: u64, reason: impl ToString) -> Self {
        ContainerError::Corrupt {
            offset,
            reason: reason.to_string(),
        }
    }
}
