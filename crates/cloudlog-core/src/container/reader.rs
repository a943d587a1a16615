//! Container reader
//!
//! [`LogReader::open`] only accepts finalized files and uses the summary for
//! random access: each channel's message index points straight at the
//! message records. [`LogReader::scan`] walks any file record by record and
//! is how interrupted sessions are recovered.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher;
use serde::Serialize;
use tracing::debug;

use super::records::{
    DataEnd, Footer, Header, Message, MessageIndexEntry, Metadata, MetadataIndex, Record,
    Statistics, FOOTER_RECORD_LEN, RECORD_PREFIX_LEN,
};
use super::{Channel, ChannelId, ContainerError, Registry, Schema, SchemaId, MAGIC};

/// Length of a DataEnd record
const DATA_END_RECORD_LEN: usize = RECORD_PREFIX_LEN + 4;

/// Parse the record starting at `offset`; returns it and the offset after it
fn record_at(data: &[u8], offset: usize) -> Result<(Record<'_>, usize), ContainerError> {
    let truncated = || ContainerError::corrupt(offset as u64, "truncated record");

    let prefix = data
        .get(offset..offset + RECORD_PREFIX_LEN)
        .ok_or_else(truncated)?;
    let opcode = prefix[0];
    let len = LittleEndian::read_u64(&prefix[1..]);

    let start = offset + RECORD_PREFIX_LEN;
    let end = usize::try_from(len)
        .ok()
        .and_then(|len| start.checked_add(len))
        .filter(|&end| end <= data.len())
        .ok_or_else(truncated)?;

    let record = Record::decode(opcode, &data[start..end])
        .map_err(|e| ContainerError::corrupt(offset as u64, e))?;
    Ok((record, end))
}

/// Iterator over consecutive records; stops after a footer or the first error
pub struct Records<'a> {
    data: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> Records<'a> {
    fn new(data: &'a [u8], start: usize) -> Self {
        Self {
            data,
            pos: start,
            done: false,
        }
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<(u64, Record<'a>), ContainerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos >= self.data.len() {
            return None;
        }
        let offset = self.pos;
        match record_at(self.data, offset) {
            Ok((record, end)) => {
                self.pos = end;
                if matches!(record, Record::Footer(_)) {
                    self.done = true;
                }
                Some(Ok((offset as u64, record)))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Everything a linear scan could recover from a file
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Header record, if the file got that far
    pub header: Option<Header>,
    /// Schemas and channels found
    pub registry: Registry,
    /// Messages in file order
    pub messages: Vec<Message<'static>>,
    /// Metadata records in file order
    pub metadata: Vec<Metadata>,
    /// Statistics computed from the recovered messages
    pub statistics: Statistics,
    /// Footer and trailing magic present
    pub finalized: bool,
    /// Offset just past the last intact record
    pub valid_len: u64,
    /// Why the scan stopped early, if it did
    pub error: Option<String>,
}

/// Read-only view of a finalized container
#[derive(Debug)]
pub struct LogReader {
    data: Vec<u8>,
    header: Header,
    footer: Footer,
    data_end: Option<(usize, DataEnd)>,
    registry: Registry,
    statistics: Statistics,
    message_indexes: BTreeMap<ChannelId, Vec<MessageIndexEntry>>,
    metadata_indexes: Vec<MetadataIndex>,
}

/// Summary of a container, suitable for printing
#[derive(Debug, Clone, Serialize)]
pub struct ContainerSummary<'a> {
    /// Header record
    pub header: &'a Header,
    /// Statistics from the summary
    pub statistics: &'a Statistics,
    /// Schemas in id order
    pub schemas: Vec<&'a Schema>,
    /// Channels in id order
    pub channels: Vec<&'a Channel>,
}

impl LogReader {
    /// Open a finalized container
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ContainerError> {
        let data = fs::read(path.as_ref())?;
        debug!("Read {} bytes from {}", data.len(), path.as_ref().display());
        Self::from_bytes(data)
    }

    /// Parse a finalized container held in memory
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, ContainerError> {
        if data.len() < MAGIC.len() || data[..MAGIC.len()] != MAGIC {
            return Err(ContainerError::InvalidMagic);
        }
        let min_len = MAGIC.len() * 2 + FOOTER_RECORD_LEN;
        if data.len() < min_len || data[data.len() - MAGIC.len()..] != MAGIC {
            return Err(ContainerError::Incomplete);
        }

        let footer_offset = data.len() - MAGIC.len() - FOOTER_RECORD_LEN;
        let footer = match record_at(&data, footer_offset) {
            Ok((Record::Footer(footer), _)) => footer,
            _ => return Err(ContainerError::Incomplete),
        };

        let summary_start = footer.summary_start as usize;
        if summary_start > footer_offset {
            return Err(ContainerError::corrupt(
                footer_offset as u64,
                "summary starts after footer",
            ));
        }
        let summary_region_start = if summary_start == 0 {
            footer_offset
        } else {
            summary_start
        };

        if footer.summary_crc != 0 {
            let mut hasher = Hasher::new();
            hasher.update(&data[summary_region_start..footer_offset + FOOTER_RECORD_LEN - 4]);
            let actual = hasher.finalize();
            if actual != footer.summary_crc {
                return Err(ContainerError::CrcMismatch {
                    expected: footer.summary_crc,
                    actual,
                });
            }
        }

        let header = match record_at(&data, MAGIC.len())? {
            (Record::Header(header), _) => header,
            _ => {
                return Err(ContainerError::corrupt(
                    MAGIC.len() as u64,
                    "first record is not a header",
                ))
            }
        };

        let data_end = summary_region_start
            .checked_sub(DATA_END_RECORD_LEN)
            .and_then(|offset| match record_at(&data, offset) {
                Ok((Record::DataEnd(end), _)) => Some((offset, end)),
                _ => None,
            });

        let mut reader = Self {
            data,
            header,
            footer,
            data_end,
            registry: Registry::new(),
            statistics: Statistics::default(),
            message_indexes: BTreeMap::new(),
            metadata_indexes: Vec::new(),
        };

        let mut have_statistics = false;
        let mut have_indexes = false;
        if summary_start != 0 {
            let summary = &reader.data[..footer_offset];
            for item in Records::new(summary, summary_start) {
                let (_, record) = item?;
                match record {
                    Record::Schema(schema) => reader.registry.restore_schema(schema),
                    Record::Channel(channel) => reader.registry.restore_channel(channel),
                    Record::Statistics(stats) => {
                        reader.statistics = stats;
                        have_statistics = true;
                    }
                    Record::MessageIndex(index) => {
                        reader.message_indexes.insert(index.channel_id, index.entries);
                        have_indexes = true;
                    }
                    Record::MetadataIndex(index) => reader.metadata_indexes.push(index),
                    _ => {}
                }
            }
        }

        if !have_indexes {
            debug!("No message index in summary, rebuilding from data section");
            reader.rebuild_from_data_section(!have_statistics)?;
        }

        Ok(reader)
    }

    /// Walk any container record by record, tolerating a missing footer
    pub fn scan<P: AsRef<Path>>(path: P) -> Result<ScanReport, ContainerError> {
        let data = fs::read(path)?;
        Self::scan_bytes(&data)
    }

    /// In-memory form of [`LogReader::scan`]
    pub fn scan_bytes(data: &[u8]) -> Result<ScanReport, ContainerError> {
        if data.len() < MAGIC.len() || data[..MAGIC.len()] != MAGIC {
            return Err(ContainerError::InvalidMagic);
        }

        let mut report = ScanReport {
            valid_len: MAGIC.len() as u64,
            ..ScanReport::default()
        };
        let mut in_data_section = true;

        let mut records = Records::new(data, MAGIC.len());
        while let Some(item) = records.next() {
            let (_, record) = match item {
                Ok(item) => item,
                Err(e) => {
                    report.error = Some(e.to_string());
                    break;
                }
            };
            match record {
                Record::Header(header) => report.header = Some(header),
                Record::Schema(schema) => report.registry.restore_schema(schema),
                Record::Channel(channel) => report.registry.restore_channel(channel),
                Record::Message(message) if in_data_section => {
                    report
                        .statistics
                        .record_message(message.channel_id, message.log_time);
                    report.messages.push(message.into_owned());
                }
                Record::Metadata(metadata) if in_data_section => {
                    report.statistics.metadata_count += 1;
                    report.metadata.push(metadata);
                }
                Record::DataEnd(_) => in_data_section = false,
                Record::Footer(_) => {
                    let end = records.pos;
                    report.finalized = data.len() == end + MAGIC.len() && data[end..] == MAGIC;
                }
                _ => {}
            }
            report.valid_len = records.pos as u64;
        }

        report.statistics.schema_count = report.registry.schema_count() as u16;
        report.statistics.channel_count = report.registry.channel_count() as u32;
        Ok(report)
    }

    fn rebuild_from_data_section(&mut self, with_statistics: bool) -> Result<(), ContainerError> {
        let mut statistics = Statistics::default();
        let mut indexes: BTreeMap<ChannelId, Vec<MessageIndexEntry>> = BTreeMap::new();
        let mut metadata_indexes = Vec::new();

        let end = match self.data_end {
            Some((offset, _)) => offset,
            None => self.data.len(),
        };
        for item in Records::new(&self.data[..end], MAGIC.len()) {
            let (offset, record) = item?;
            match record {
                Record::Schema(schema) => self.registry.restore_schema(schema),
                Record::Channel(channel) => self.registry.restore_channel(channel),
                Record::Message(message) => {
                    statistics.record_message(message.channel_id, message.log_time);
                    indexes
                        .entry(message.channel_id)
                        .or_default()
                        .push(MessageIndexEntry {
                            log_time: message.log_time,
                            offset,
                        });
                }
                Record::Metadata(metadata) => {
                    statistics.metadata_count += 1;
                    let (_, next) = record_at(&self.data, offset as usize)?;
                    metadata_indexes.push(MetadataIndex {
                        offset,
                        length: (next - offset as usize) as u64,
                        name: metadata.name,
                    });
                }
                _ => {}
            }
        }

        for channel in self.registry.channels() {
            indexes.entry(channel.id).or_default();
        }
        self.message_indexes = indexes;
        if self.metadata_indexes.is_empty() {
            self.metadata_indexes = metadata_indexes;
        }
        if with_statistics {
            statistics.schema_count = self.registry.schema_count() as u16;
            statistics.channel_count = self.registry.channel_count() as u32;
            self.statistics = statistics;
        }
        Ok(())
    }

    /// Check the data section CRC recorded in the DataEnd record
    pub fn verify_data_crc(&self) -> Result<(), ContainerError> {
        let (offset, data_end) = match self.data_end {
            Some(found) => found,
            None => return Err(ContainerError::corrupt(0, "missing data end record")),
        };
        if data_end.data_section_crc == 0 {
            return Ok(());
        }
        let mut hasher = Hasher::new();
        hasher.update(&self.data[..offset]);
        let actual = hasher.finalize();
        if actual != data_end.data_section_crc {
            return Err(ContainerError::CrcMismatch {
                expected: data_end.data_section_crc,
                actual,
            });
        }
        Ok(())
    }

    /// Read the message record at an absolute file offset
    pub fn message_at(&self, offset: u64) -> Result<Message<'_>, ContainerError> {
        match record_at(&self.data, offset as usize)? {
            (Record::Message(message), _) => Ok(message),
            (other, _) => Err(ContainerError::corrupt(
                offset,
                format!("expected message record, found opcode {:#04x}", other.opcode()),
            )),
        }
    }

    /// All messages in file order
    pub fn messages(&self) -> impl Iterator<Item = Result<Message<'_>, ContainerError>> + '_ {
        self.entries_in_file_order(|_| true)
            .into_iter()
            .map(move |entry| self.message_at(entry.offset))
    }

    /// Messages with `start <= log_time <= end`, in file order
    pub fn messages_in_range(
        &self,
        start: u64,
        end: u64,
    ) -> impl Iterator<Item = Result<Message<'_>, ContainerError>> + '_ {
        self.entries_in_file_order(|e| e.log_time >= start && e.log_time <= end)
            .into_iter()
            .map(move |entry| self.message_at(entry.offset))
    }

    /// Messages of one channel in write order
    pub fn channel_messages(
        &self,
        channel_id: ChannelId,
    ) -> impl Iterator<Item = Result<Message<'_>, ContainerError>> + '_ {
        self.message_indexes
            .get(&channel_id)
            .into_iter()
            .flatten()
            .map(move |entry| self.message_at(entry.offset))
    }

    /// The `n`-th message written on a channel
    pub fn read_message(
        &self,
        channel_id: ChannelId,
        n: usize,
    ) -> Result<Option<Message<'_>>, ContainerError> {
        if self.registry.channel(channel_id).is_none() {
            return Err(ContainerError::UnknownChannel(channel_id));
        }
        match self.message_indexes.get(&channel_id).and_then(|e| e.get(n)) {
            Some(entry) => self.message_at(entry.offset).map(Some),
            None => Ok(None),
        }
    }

    /// Number of messages on a channel
    pub fn message_count(&self, channel_id: ChannelId) -> usize {
        self.message_indexes
            .get(&channel_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Index entries of a channel
    pub fn message_index(&self, channel_id: ChannelId) -> Option<&[MessageIndexEntry]> {
        self.message_indexes.get(&channel_id).map(Vec::as_slice)
    }

    /// Read a metadata record by name
    pub fn metadata(&self, name: &str) -> Result<Option<Metadata>, ContainerError> {
        let index = match self.metadata_indexes.iter().find(|m| m.name == name) {
            Some(index) => index,
            None => return Ok(None),
        };
        match record_at(&self.data, index.offset as usize)? {
            (Record::Metadata(metadata), _) => Ok(Some(metadata)),
            _ => Err(ContainerError::corrupt(index.offset, "expected metadata record")),
        }
    }

    /// Names of all metadata records
    pub fn metadata_names(&self) -> impl Iterator<Item = &str> {
        self.metadata_indexes.iter().map(|m| m.name.as_str())
    }

    /// Header record
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Footer record
    pub fn footer(&self) -> &Footer {
        &self.footer
    }

    /// Statistics from the summary, or rebuilt from the data section
    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// Schemas and channels of the file
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Schemas in id order
    pub fn schemas(&self) -> impl Iterator<Item = &Schema> {
        self.registry.schemas()
    }

    /// Channels in id order
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.registry.channels()
    }

    /// Schema by id
    pub fn schema(&self, id: SchemaId) -> Option<&Schema> {
        self.registry.schema(id)
    }

    /// Channel by id
    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.registry.channel(id)
    }

    /// Total file size in bytes
    pub fn file_len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Header, statistics and registry in one serializable value
    pub fn summary(&self) -> ContainerSummary<'_> {
        ContainerSummary {
            header: &self.header,
            statistics: &self.statistics,
            schemas: self.registry.schemas().collect(),
            channels: self.registry.channels().collect(),
        }
    }

    fn entries_in_file_order(
        &self,
        keep: impl Fn(&MessageIndexEntry) -> bool,
    ) -> Vec<MessageIndexEntry> {
        let mut entries: Vec<MessageIndexEntry> = self
            .message_indexes
            .values()
            .flatten()
            .copied()
            .filter(|e| keep(e))
            .collect();
        entries.sort_by_key(|e| e.offset);
        entries
    }
}
