//! Container records
//!
//! Every record is framed as `opcode: u8 | length: u64 | content`. The
//! content layouts are listed next to each type below.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::Serialize;

use super::{op, ChannelId, SchemaId};
use crate::encoding::wire::{self, WireReader};
use crate::encoding::DecodeError;

/// Bytes taken by the opcode and length prefix of every record
pub const RECORD_PREFIX_LEN: usize = 1 + 8;

/// `profile: str | library: str`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Header {
    /// Profile naming the conventions the file follows (may be empty)
    pub profile: String,
    /// Name and version of the writing library
    pub library: String,
}

/// `summary_start: u64 | summary_offset_start: u64 | summary_crc: u32`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Footer {
    /// Offset of the first summary record, 0 when there is no summary
    pub summary_start: u64,
    /// Offset of the first summary offset record, 0 when absent
    pub summary_offset_start: u64,
    /// CRC32 from `summary_start` through `summary_offset_start`, 0 when unset
    pub summary_crc: u32,
}

/// Full length of a footer record
pub const FOOTER_RECORD_LEN: usize = RECORD_PREFIX_LEN + 8 + 8 + 4;

/// `id: u16 | name: str | encoding: str | data: u32 len + bytes`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schema {
    /// Assigned by the registry; ignored when registering
    pub id: SchemaId,
    /// Schema name (e.g. `foxglove.PointCloud`)
    pub name: String,
    /// Schema encoding (e.g. `flatbuffer`)
    pub encoding: String,
    /// Opaque descriptor bytes
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl Schema {
    /// Describe a schema to register
    pub fn new(name: impl Into<String>, encoding: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            encoding: encoding.into(),
            data: data.into(),
        }
    }
}

/// `id: u16 | schema_id: u16 | topic: str | message_encoding: str | metadata: map`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Channel {
    /// Assigned by the registry; ignored when registering
    pub id: ChannelId,
    /// Schema of every message on this channel, 0 for schemaless
    pub schema_id: SchemaId,
    /// Topic name
    pub topic: String,
    /// Encoding of message payloads
    pub message_encoding: String,
    /// Free-form channel metadata
    pub metadata: BTreeMap<String, String>,
}

impl Channel {
    /// Describe a channel to register
    pub fn new(
        topic: impl Into<String>,
        message_encoding: impl Into<String>,
        schema_id: SchemaId,
    ) -> Self {
        Self {
            id: 0,
            schema_id,
            topic: topic.into(),
            message_encoding: message_encoding.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// `channel_id: u16 | sequence: u32 | log_time: u64 | publish_time: u64 | data`
///
/// The payload runs to the end of the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message<'a> {
    /// Channel the message was published on
    pub channel_id: ChannelId,
    /// Per-channel sequence number
    pub sequence: u32,
    /// Time the message was recorded, nanoseconds
    pub log_time: u64,
    /// Time the message was published, nanoseconds
    pub publish_time: u64,
    /// Opaque payload
    pub data: Cow<'a, [u8]>,
}

impl<'a> Message<'a> {
    /// Detach the payload from the buffer it was read from
    pub fn into_owned(self) -> Message<'static> {
        Message {
            channel_id: self.channel_id,
            sequence: self.sequence,
            log_time: self.log_time,
            publish_time: self.publish_time,
            data: Cow::Owned(self.data.into_owned()),
        }
    }
}

/// One entry of a [`MessageIndex`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MessageIndexEntry {
    /// Log time of the message
    pub log_time: u64,
    /// Absolute file offset of the message record
    pub offset: u64,
}

/// `channel_id: u16 | entries: u32 byte len, (log_time: u64, offset: u64)*`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct MessageIndex {
    /// Channel the entries belong to
    pub channel_id: ChannelId,
    /// Entries in write order
    pub entries: Vec<MessageIndexEntry>,
}

/// Summary statistics of a finalized container
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Statistics {
    /// Messages in the data section
    pub message_count: u64,
    /// Registered schemas
    pub schema_count: u16,
    /// Registered channels
    pub channel_count: u32,
    /// Metadata records
    pub metadata_count: u32,
    /// Earliest message log time, 0 when empty
    pub message_start_time: u64,
    /// Latest message log time, 0 when empty
    pub message_end_time: u64,
    /// Messages per channel
    pub channel_message_counts: BTreeMap<ChannelId, u64>,
}

impl Statistics {
    /// Account for one written message
    pub(crate) fn record_message(&mut self, channel_id: ChannelId, log_time: u64) {
        if self.message_count == 0 {
            self.message_start_time = log_time;
            self.message_end_time = log_time;
        } else {
            self.message_start_time = self.message_start_time.min(log_time);
            self.message_end_time = self.message_end_time.max(log_time);
        }
        self.message_count += 1;
        *self.channel_message_counts.entry(channel_id).or_insert(0) += 1;
    }
}

/// `name: str | metadata: map`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metadata {
    /// Record name
    pub name: String,
    /// Key/value pairs
    pub metadata: BTreeMap<String, String>,
}

/// `offset: u64 | length: u64 | name: str`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataIndex {
    /// Offset of the metadata record
    pub offset: u64,
    /// Full length of the metadata record
    pub length: u64,
    /// Name of the metadata record
    pub name: String,
}

/// `group_opcode: u8 | group_start: u64 | group_length: u64`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SummaryOffset {
    /// Opcode of the records in the group
    pub group_opcode: u8,
    /// Offset of the first record of the group
    pub group_start: u64,
    /// Byte length of the group
    pub group_length: u64,
}

/// `data_section_crc: u32`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DataEnd {
    /// CRC32 of every byte before this record, 0 when unset
    pub data_section_crc: u32,
}

/// Any record found in a container
#[derive(Debug, Clone, PartialEq)]
pub enum Record<'a> {
    /// Start of the data section
    Header(Header),
    /// End of the file
    Footer(Footer),
    /// Schema definition
    Schema(Schema),
    /// Channel definition
    Channel(Channel),
    /// Message payload
    Message(Message<'a>),
    /// Message offsets of one channel
    MessageIndex(MessageIndex),
    /// Summary statistics
    Statistics(Statistics),
    /// Named metadata
    Metadata(Metadata),
    /// Metadata location
    MetadataIndex(MetadataIndex),
    /// Summary group location
    SummaryOffset(SummaryOffset),
    /// Closes the data section
    DataEnd(DataEnd),
    /// Records with opcodes this version does not know are skipped
    Unknown {
        /// Opcode as read
        opcode: u8,
    },
}

impl<'a> Record<'a> {
    /// Opcode of the record
    pub fn opcode(&self) -> u8 {
        match self {
            Record::Header(_) => op::HEADER,
            Record::Footer(_) => op::FOOTER,
            Record::Schema(_) => op::SCHEMA,
            Record::Channel(_) => op::CHANNEL,
            Record::Message(_) => op::MESSAGE,
            Record::MessageIndex(_) => op::MESSAGE_INDEX,
            Record::Statistics(_) => op::STATISTICS,
            Record::Metadata(_) => op::METADATA,
            Record::MetadataIndex(_) => op::METADATA_INDEX,
            Record::SummaryOffset(_) => op::SUMMARY_OFFSET,
            Record::DataEnd(_) => op::DATA_END,
            Record::Unknown { opcode } => *opcode,
        }
    }

    /// Append the framed record to `buf`
    pub fn encode(&self, buf: &mut Vec<u8>) {
        wire::put_u8(buf, self.opcode());
        let len = wire::begin_len64(buf);
        self.encode_content(buf);
        wire::end_len64(buf, len);
    }

    fn encode_content(&self, buf: &mut Vec<u8>) {
        match self {
            Record::Header(h) => {
                wire::put_str(buf, &h.profile);
                wire::put_str(buf, &h.library);
            }
            Record::Footer(f) => {
                wire::put_u64(buf, f.summary_start);
                wire::put_u64(buf, f.summary_offset_start);
                wire::put_u32(buf, f.summary_crc);
            }
            Record::Schema(s) => {
                wire::put_u16(buf, s.id);
                wire::put_str(buf, &s.name);
                wire::put_str(buf, &s.encoding);
                wire::put_bytes(buf, &s.data);
            }
            Record::Channel(c) => {
                wire::put_u16(buf, c.id);
                wire::put_u16(buf, c.schema_id);
                wire::put_str(buf, &c.topic);
                wire::put_str(buf, &c.message_encoding);
                put_map(buf, &c.metadata);
            }
            Record::Message(m) => {
                wire::put_u16(buf, m.channel_id);
                wire::put_u32(buf, m.sequence);
                wire::put_u64(buf, m.log_time);
                wire::put_u64(buf, m.publish_time);
                buf.extend_from_slice(&m.data);
            }
            Record::MessageIndex(index) => {
                wire::put_u16(buf, index.channel_id);
                let len = wire::begin_len32(buf);
                for entry in &index.entries {
                    wire::put_u64(buf, entry.log_time);
                    wire::put_u64(buf, entry.offset);
                }
                wire::end_len32(buf, len);
            }
            Record::Statistics(s) => {
                wire::put_u64(buf, s.message_count);
                wire::put_u16(buf, s.schema_count);
                wire::put_u32(buf, s.channel_count);
                wire::put_u32(buf, s.metadata_count);
                wire::put_u64(buf, s.message_start_time);
                wire::put_u64(buf, s.message_end_time);
                let len = wire::begin_len32(buf);
                for (&channel_id, &count) in &s.channel_message_counts {
                    wire::put_u16(buf, channel_id);
                    wire::put_u64(buf, count);
                }
                wire::end_len32(buf, len);
            }
            Record::Metadata(m) => {
                wire::put_str(buf, &m.name);
                put_map(buf, &m.metadata);
            }
            Record::MetadataIndex(m) => {
                wire::put_u64(buf, m.offset);
                wire::put_u64(buf, m.length);
                wire::put_str(buf, &m.name);
            }
            Record::SummaryOffset(s) => {
                wire::put_u8(buf, s.group_opcode);
                wire::put_u64(buf, s.group_start);
                wire::put_u64(buf, s.group_length);
            }
            Record::DataEnd(d) => {
                wire::put_u32(buf, d.data_section_crc);
            }
            Record::Unknown { .. } => {}
        }
    }

    /// Parse the content of a record with the given opcode
    pub fn decode(opcode: u8, content: &'a [u8]) -> Result<Self, DecodeError> {
        let mut r = WireReader::new(content);
        let record = match opcode {
            op::HEADER => Record::Header(Header {
                profile: r.string()?,
                library: r.string()?,
            }),
            op::FOOTER => Record::Footer(Footer {
                summary_start: r.u64()?,
                summary_offset_start: r.u64()?,
                summary_crc: r.u32()?,
            }),
            op::SCHEMA => Record::Schema(Schema {
                id: r.u16()?,
                name: r.string()?,
                encoding: r.string()?,
                data: r.bytes()?.to_vec(),
            }),
            op::CHANNEL => Record::Channel(Channel {
                id: r.u16()?,
                schema_id: r.u16()?,
                topic: r.string()?,
                message_encoding: r.string()?,
                metadata: read_map(&mut r)?,
            }),
            op::MESSAGE => Record::Message(Message {
                channel_id: r.u16()?,
                sequence: r.u32()?,
                log_time: r.u64()?,
                publish_time: r.u64()?,
                data: Cow::Borrowed(r.rest()),
            }),
            op::MESSAGE_INDEX => {
                let channel_id = r.u16()?;
                let mut entries_reader = WireReader::new(r.bytes()?);
                let mut entries = Vec::with_capacity(entries_reader.remaining() / 16);
                while entries_reader.remaining() > 0 {
                    entries.push(MessageIndexEntry {
                        log_time: entries_reader.u64()?,
                        offset: entries_reader.u64()?,
                    });
                }
                Record::MessageIndex(MessageIndex {
                    channel_id,
                    entries,
                })
            }
            op::STATISTICS => {
                let message_count = r.u64()?;
                let schema_count = r.u16()?;
                let channel_count = r.u32()?;
                let metadata_count = r.u32()?;
                let message_start_time = r.u64()?;
                let message_end_time = r.u64()?;
                let mut counts_reader = WireReader::new(r.bytes()?);
                let mut channel_message_counts = BTreeMap::new();
                while counts_reader.remaining() > 0 {
                    channel_message_counts.insert(counts_reader.u16()?, counts_reader.u64()?);
                }
                Record::Statistics(Statistics {
                    message_count,
                    schema_count,
                    channel_count,
                    metadata_count,
                    message_start_time,
                    message_end_time,
                    channel_message_counts,
                })
            }
            op::METADATA => Record::Metadata(Metadata {
                name: r.string()?,
                metadata: read_map(&mut r)?,
            }),
            op::METADATA_INDEX => Record::MetadataIndex(MetadataIndex {
                offset: r.u64()?,
                length: r.u64()?,
                name: r.string()?,
            }),
            op::SUMMARY_OFFSET => Record::SummaryOffset(SummaryOffset {
                group_opcode: r.u8()?,
                group_start: r.u64()?,
                group_length: r.u64()?,
            }),
            op::DATA_END => Record::DataEnd(DataEnd {
                data_section_crc: r.u32()?,
            }),
            opcode => return Ok(Record::Unknown { opcode }),
        };
        r.finish()?;
        Ok(record)
    }
}

fn put_map(buf: &mut Vec<u8>, map: &BTreeMap<String, String>) {
    let len = wire::begin_len32(buf);
    for (key, value) in map {
        wire::put_str(buf, key);
        wire::put_str(buf, value);
    }
    wire::end_len32(buf, len);
}

fn read_map(r: &mut WireReader<'_>) -> Result<BTreeMap<String, String>, DecodeError> {
    let mut entries = WireReader::new(r.bytes()?);
    let mut map = BTreeMap::new();
    while entries.remaining() > 0 {
        let key = entries.string()?;
        let value = entries.string()?;
        map.insert(key, value);
    }
    Ok(map)
}
