//! Container writer
//!
//! Owns the output file for one recording session. Records are appended in
//! call order; `close` writes the summary (registry, statistics and message
//! indexes) and the footer that mark the file as finalized.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::records::{
    DataEnd, Footer, Header, Message, MessageIndex, MessageIndexEntry, Metadata, MetadataIndex,
    Record, Statistics, SummaryOffset, FOOTER_RECORD_LEN,
};
use super::{
    op, Channel, ChannelId, ContainerError, Registry, Schema, SchemaId, DEFAULT_PROFILE, LIBRARY,
    MAGIC,
};

/// Default size of the write buffer in bytes
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Byte sink a container is written to
pub trait Sink: Write + Send {
    /// Make written bytes durable
    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Sink for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

impl Sink for Vec<u8> {}

/// Writer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterOptions {
    /// Header profile
    pub profile: String,
    /// Header library string
    pub library: String,
    /// Write a summary section on close
    pub emit_summary: bool,
    /// Include a statistics record in the summary
    pub emit_statistics: bool,
    /// Include per-channel message indexes in the summary
    pub emit_message_indexes: bool,
    /// Write summary offset records after the summary
    pub emit_summary_offsets: bool,
    /// Compute the data section CRC written in the DataEnd record
    pub emit_data_crc: bool,
    /// Size of the in-memory write buffer
    pub buffer_size: usize,
    /// fsync the file after the footer is written
    pub sync_on_close: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            profile: DEFAULT_PROFILE.to_string(),
            library: LIBRARY.to_string(),
            emit_summary: true,
            emit_statistics: true,
            emit_message_indexes: true,
            emit_summary_offsets: true,
            emit_data_crc: true,
            buffer_size: DEFAULT_BUFFER_SIZE,
            sync_on_close: true,
        }
    }
}

/// Writer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriterState {
    /// No file open
    Closed,
    /// File open, header written, no messages yet
    Open,
    /// At least one message written
    Writing,
}

/// Writes one container file per session
pub struct LogWriter {
    state: WriterState,
    path: Option<PathBuf>,
    out: Option<BufWriter<Box<dyn Sink>>>,
    options: WriterOptions,
    registry: Registry,
    /// Bytes written so far, i.e. the offset of the next record
    position: u64,
    data_crc: Hasher,
    scratch: Vec<u8>,
    written_schemas: BTreeSet<SchemaId>,
    written_channels: BTreeSet<ChannelId>,
    message_indexes: BTreeMap<ChannelId, Vec<MessageIndexEntry>>,
    last_sequence: BTreeMap<ChannelId, u32>,
    statistics: Statistics,
    metadata_indexes: Vec<MetadataIndex>,
    /// Set after any I/O failure; the file can then only be terminated
    failed: bool,
}

impl Default for LogWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl LogWriter {
    /// Create a closed writer
    pub fn new() -> Self {
        Self {
            state: WriterState::Closed,
            path: None,
            out: None,
            options: WriterOptions::default(),
            registry: Registry::new(),
            position: 0,
            data_crc: Hasher::new(),
            scratch: Vec::new(),
            written_schemas: BTreeSet::new(),
            written_channels: BTreeSet::new(),
            message_indexes: BTreeMap::new(),
            last_sequence: BTreeMap::new(),
            statistics: Statistics::default(),
            metadata_indexes: Vec::new(),
            failed: false,
        }
    }

    /// Create a writer and open `path`
    pub fn create<P: AsRef<Path>>(path: P, options: WriterOptions) -> Result<Self, ContainerError> {
        let mut writer = Self::new();
        writer.open(path, options)?;
        Ok(writer)
    }

    /// Create the file and write the magic and header.
    ///
    /// If the header cannot be written the file is removed again.
    pub fn open<P: AsRef<Path>>(
        &mut self,
        path: P,
        options: WriterOptions,
    ) -> Result<(), ContainerError> {
        if self.state != WriterState::Closed {
            return Err(ContainerError::AlreadyOpen);
        }

        let path = path.as_ref();
        let file = File::create(path)?;
        if let Err(e) = self.open_with(path, file, options) {
            if let Err(rm) = fs::remove_file(path) {
                warn!("Failed to remove {}: {}", path.display(), rm);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Start a container on an already open `sink`.
    ///
    /// `path` names the file behind the sink; it is reported by `terminate`
    /// but never created or removed here.
    pub fn open_with<P, S>(
        &mut self,
        path: P,
        sink: S,
        options: WriterOptions,
    ) -> Result<(), ContainerError>
    where
        P: AsRef<Path>,
        S: Sink + 'static,
    {
        if self.state != WriterState::Closed {
            return Err(ContainerError::AlreadyOpen);
        }
        let path = path.as_ref();

        // Fresh session state: the registry lives exactly as long as the file
        let mut fresh = Self::new();
        let sink: Box<dyn Sink> = Box::new(sink);
        fresh.out = Some(BufWriter::with_capacity(options.buffer_size, sink));
        fresh.path = Some(path.to_path_buf());
        fresh.state = WriterState::Open;
        *self = fresh;

        let header = Record::Header(Header {
            profile: options.profile.clone(),
            library: options.library.clone(),
        });
        self.options = options;

        let opened = self
            .write_raw(&MAGIC, true)
            .and_then(|_| self.emit(&header).map(|_| ()));
        if let Err(e) = opened {
            self.out = None;
            self.path = None;
            self.state = WriterState::Closed;
            return Err(e);
        }

        info!("Opened log container {}", path.display());
        Ok(())
    }

    /// Register a schema and persist it the first time it is seen.
    ///
    /// The `id` field of `schema` is ignored; the assigned id is returned.
    pub fn add_schema(&mut self, schema: &Schema) -> Result<SchemaId, ContainerError> {
        self.ensure_writable()?;
        let id = self
            .registry
            .register_schema(&schema.name, &schema.encoding, &schema.data)?;

        if !self.written_schemas.contains(&id) {
            let stored = self
                .registry
                .schema(id)
                .cloned()
                .ok_or(ContainerError::UnknownSchema(id))?;
            self.emit(&Record::Schema(stored))?;
            self.written_schemas.insert(id);
            debug!(id, name = %schema.name, "Registered schema");
        }
        Ok(id)
    }

    /// Register a channel and persist it the first time it is seen.
    ///
    /// The `id` field of `channel` is ignored; the assigned id is returned.
    pub fn add_channel(&mut self, channel: &Channel) -> Result<ChannelId, ContainerError> {
        self.ensure_writable()?;
        let id = self.registry.register_channel(
            &channel.topic,
            &channel.message_encoding,
            channel.schema_id,
            &channel.metadata,
        )?;

        if !self.written_channels.contains(&id) {
            let stored = self
                .registry
                .channel(id)
                .cloned()
                .ok_or(ContainerError::UnknownChannel(id))?;
            self.emit(&Record::Channel(stored))?;
            self.written_channels.insert(id);
            debug!(id, topic = %channel.topic, "Registered channel");
        }
        Ok(id)
    }

    /// Append a message.
    ///
    /// The channel must be registered and sequence numbers must strictly
    /// increase per channel. Nothing is rolled back on an I/O failure; the
    /// session should be terminated.
    pub fn write(&mut self, message: &Message<'_>) -> Result<(), ContainerError> {
        self.ensure_writable()?;

        let channel_id = message.channel_id;
        if self.registry.channel(channel_id).is_none() {
            return Err(ContainerError::UnknownChannel(channel_id));
        }
        if let Some(&previous) = self.last_sequence.get(&channel_id) {
            if message.sequence <= previous {
                return Err(ContainerError::NonMonotonicSequence {
                    channel_id,
                    previous,
                    sequence: message.sequence,
                });
            }
        }

        let record = Record::Message(Message {
            channel_id,
            sequence: message.sequence,
            log_time: message.log_time,
            publish_time: message.publish_time,
            data: Cow::Borrowed(&message.data[..]),
        });
        let (offset, _) = self.emit(&record)?;

        self.message_indexes
            .entry(channel_id)
            .or_default()
            .push(MessageIndexEntry {
                log_time: message.log_time,
                offset,
            });
        self.statistics.record_message(channel_id, message.log_time);
        self.last_sequence.insert(channel_id, message.sequence);
        self.state = WriterState::Writing;
        Ok(())
    }

    /// Append a named key/value metadata record
    pub fn add_metadata(
        &mut self,
        name: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), ContainerError> {
        self.ensure_writable()?;
        let (offset, length) = self.emit(&Record::Metadata(Metadata {
            name: name.to_string(),
            metadata,
        }))?;
        self.metadata_indexes.push(MetadataIndex {
            offset,
            length,
            name: name.to_string(),
        });
        self.statistics.metadata_count += 1;
        Ok(())
    }

    /// Finalize the file: data end, summary, footer and closing magic.
    ///
    /// Returns the final statistics, or `None` if the writer was already
    /// closed.
    pub fn close(&mut self) -> Result<Option<Statistics>, ContainerError> {
        if self.state == WriterState::Closed {
            return Ok(None);
        }
        if self.failed {
            return Err(ContainerError::Poisoned);
        }

        let data_section_crc = if self.options.emit_data_crc {
            self.data_crc.clone().finalize()
        } else {
            0
        };
        self.emit(&Record::DataEnd(DataEnd { data_section_crc }))?;

        self.statistics.schema_count = self.registry.schema_count() as u16;
        self.statistics.channel_count = self.registry.channel_count() as u32;

        let summary_start = self.position;
        let (summary, summary_offset_len) = self.build_summary(summary_start);
        let footer = if summary.is_empty() {
            Footer::default()
        } else {
            let offsets_start = summary.len() - summary_offset_len;
            Footer {
                summary_start,
                summary_offset_start: if summary_offset_len > 0 {
                    summary_start + offsets_start as u64
                } else {
                    0
                },
                summary_crc: 0,
            }
        };

        let mut footer_bytes = Vec::with_capacity(FOOTER_RECORD_LEN);
        Record::Footer(footer).encode(&mut footer_bytes);
        let mut crc = Hasher::new();
        crc.update(&summary);
        crc.update(&footer_bytes[..FOOTER_RECORD_LEN - 4]);
        let summary_crc = crc.finalize();
        footer_bytes[FOOTER_RECORD_LEN - 4..].copy_from_slice(&summary_crc.to_le_bytes());

        self.write_raw(&summary, false)?;
        self.write_raw(&footer_bytes, false)?;
        self.write_raw(&MAGIC, false)?;
        self.finish_file()?;

        let path = self.path.take().unwrap_or_default();
        info!(
            messages = self.statistics.message_count,
            channels = self.statistics.channel_count,
            bytes = self.position,
            "Closed log container {}",
            path.display()
        );
        self.out = None;
        self.state = WriterState::Closed;
        Ok(Some(self.statistics.clone()))
    }

    /// Abandon the session without writing a footer.
    ///
    /// Buffered bytes are flushed on a best-effort basis. The file is left in
    /// place and returned so the caller can remove it; readers will report it
    /// as incomplete.
    pub fn terminate(&mut self) -> Option<PathBuf> {
        if self.state == WriterState::Closed {
            return None;
        }
        if let Some(mut out) = self.out.take() {
            if let Err(e) = out.flush() {
                warn!("Failed to flush terminated container: {e}");
            }
        }
        self.state = WriterState::Closed;
        let path = self.path.take();
        if let Some(path) = &path {
            warn!("Terminated log container {} without footer", path.display());
        }
        path
    }

    /// Current state
    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Whether a file is open
    pub fn is_open(&self) -> bool {
        self.state != WriterState::Closed
    }

    /// Path of the open file
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Schemas and channels registered so far
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Running statistics
    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// Bytes written so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Options of the current session
    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    fn ensure_writable(&self) -> Result<(), ContainerError> {
        if self.state == WriterState::Closed {
            return Err(ContainerError::NotOpen);
        }
        if self.failed {
            return Err(ContainerError::Poisoned);
        }
        Ok(())
    }

    /// Encode and write one data-section record; returns its offset and length
    fn emit(&mut self, record: &Record<'_>) -> Result<(u64, u64), ContainerError> {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        record.encode(&mut scratch);

        let offset = self.position;
        let result = self.write_raw(&scratch, true);
        let len = scratch.len() as u64;
        self.scratch = scratch;
        result.map(|_| (offset, len))
    }

    fn write_raw(&mut self, bytes: &[u8], data_section: bool) -> Result<(), ContainerError> {
        let out = self.out.as_mut().ok_or(ContainerError::NotOpen)?;
        if let Err(e) = out.write_all(bytes) {
            self.failed = true;
            return Err(e.into());
        }
        if data_section && self.options.emit_data_crc {
            self.data_crc.update(bytes);
        }
        self.position += bytes.len() as u64;
        Ok(())
    }

    fn finish_file(&mut self) -> Result<(), ContainerError> {
        let sync = self.options.sync_on_close;
        let out = self.out.as_mut().ok_or(ContainerError::NotOpen)?;
        let result = out
            .flush()
            .and_then(|_| if sync { out.get_mut().sync() } else { Ok(()) });
        if let Err(e) = result {
            self.failed = true;
            return Err(e.into());
        }
        Ok(())
    }

    /// Summary section bytes plus the length of its trailing summary offsets
    fn build_summary(&self, summary_start: u64) -> (Vec<u8>, usize) {
        let mut summary = Vec::new();
        if !self.options.emit_summary {
            return (summary, 0);
        }

        let mut groups = Vec::new();
        let mut group = |summary: &mut Vec<u8>, opcode: u8, records: Vec<Record<'static>>| {
            let start = summary.len();
            for record in &records {
                record.encode(summary);
            }
            if summary.len() > start {
                groups.push(SummaryOffset {
                    group_opcode: opcode,
                    group_start: summary_start + start as u64,
                    group_length: (summary.len() - start) as u64,
                });
            }
        };

        group(
            &mut summary,
            op::SCHEMA,
            self.registry.schemas().cloned().map(Record::Schema).collect(),
        );
        group(
            &mut summary,
            op::CHANNEL,
            self.registry.channels().cloned().map(Record::Channel).collect(),
        );
        if self.options.emit_statistics {
            group(
                &mut summary,
                op::STATISTICS,
                vec![Record::Statistics(self.statistics.clone())],
            );
        }
        if self.options.emit_message_indexes {
            // Every registered channel gets an index, even an empty one
            let indexes = self
                .registry
                .channels()
                .map(|channel| {
                    Record::MessageIndex(MessageIndex {
                        channel_id: channel.id,
                        entries: self
                            .message_indexes
                            .get(&channel.id)
                            .cloned()
                            .unwrap_or_default(),
                    })
                })
                .collect();
            group(&mut summary, op::MESSAGE_INDEX, indexes);
        }
        group(
            &mut summary,
            op::METADATA_INDEX,
            self.metadata_indexes
                .iter()
                .cloned()
                .map(Record::MetadataIndex)
                .collect(),
        );

        let offsets_start = summary.len();
        if self.options.emit_summary_offsets {
            for offset in groups {
                Record::SummaryOffset(offset).encode(&mut summary);
            }
        }
        let offsets_len = summary.len() - offsets_start;
        (summary, offsets_len)
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        if self.state == WriterState::Closed {
            return;
        }
        // A panicking owner never leaves a file that reads as finalized
        if self.failed || std::thread::panicking() {
            self.terminate();
        } else if let Err(e) = self.close() {
            warn!("Failed to finalize log container on drop: {e}");
            self.terminate();
        }
    }
}
