//! Log Container
//!
//! A relational, append-only container for timestamped binary messages:
//! schemas describe payload layouts, channels bind a topic to a schema, and
//! messages belong to a channel.
//!
//! File layout:
//! ```text
//! MAGIC
//! Header
//! (Schema | Channel | Message | Metadata)*      data section
//! DataEnd
//! Schema* Channel* Statistics MessageIndex* MetadataIndex*   summary
//! SummaryOffset*
//! Footer
//! MAGIC
//! ```
//!
//! Records use MCAP-style framing (`opcode: u8 | length: u64 | content`).
//! A file without a footer and trailing magic is incomplete and can only be
//! recovered by a linear scan.

mod error;
pub mod reader;
pub mod records;
pub mod registry;
pub mod writer;

pub use error::ContainerError;
pub use reader::{LogReader, ScanReport};
pub use records::{
    Channel, DataEnd, Footer, Header, Message, MessageIndex, MessageIndexEntry, Metadata,
    MetadataIndex, Record, Schema, Statistics, SummaryOffset,
};
pub use registry::Registry;
pub use writer::{LogWriter, Sink, WriterOptions, WriterState};

/// Schema identifier; 0 means "no schema"
pub type SchemaId = u16;

/// Channel identifier
pub type ChannelId = u16;

/// Magic bytes at the start and end of every container
pub const MAGIC: [u8; 8] = [0x89, b'M', b'C', b'A', b'P', b'0', b'\r', b'\n'];

/// Default header profile
pub const DEFAULT_PROFILE: &str = "";

/// Library string written into the header
pub const LIBRARY: &str = concat!("cloudlog-core ", env!("CARGO_PKG_VERSION"));

/// Record opcodes
pub mod op {
    /// Header: profile and library
    pub const HEADER: u8 = 0x01;
    /// Footer: summary offsets and CRC
    pub const FOOTER: u8 = 0x02;
    /// Schema definition
    pub const SCHEMA: u8 = 0x03;
    /// Channel definition
    pub const CHANNEL: u8 = 0x04;
    /// Message on a channel
    pub const MESSAGE: u8 = 0x05;
    /// Per-channel message offsets
    pub const MESSAGE_INDEX: u8 = 0x07;
    /// Summary statistics
    pub const STATISTICS: u8 = 0x0B;
    /// Named key/value metadata
    pub const METADATA: u8 = 0x0C;
    /// Offset of a metadata record
    pub const METADATA_INDEX: u8 = 0x0D;
    /// Location of a summary group
    pub const SUMMARY_OFFSET: u8 = 0x0E;
    /// End of the data section
    pub const DATA_END: u8 = 0x0F;
}
