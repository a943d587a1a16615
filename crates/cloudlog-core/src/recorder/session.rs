//! Recording session lifecycle

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{RecorderConfig, RecorderError};
use crate::assets;
use crate::container::{
    Channel, ChannelId, ContainerError, LogWriter, Message, Schema, SchemaId, Sink, Statistics,
    LIBRARY,
};
use crate::encoding::{FieldLayout, PointCloudBuilder, Pose, Time};
use crate::sampler::{frame_scale, SphereSampler};

/// Name of the metadata record written at session start
pub const SESSION_METADATA: &str = "session";

/// Identity of an open session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Random session id, also stored in the file
    pub id: Uuid,
    /// Output file
    pub path: PathBuf,
    /// Wall-clock start time (T0)
    pub started_at: DateTime<Utc>,
    /// T0 in nanoseconds since the Unix epoch
    pub start_time: u64,
    /// Id of the point-cloud schema
    pub schema_id: SchemaId,
    /// Id of the point-cloud channel
    pub channel_id: ChannelId,
}

struct Session {
    info: SessionInfo,
    /// Schema registered for this session's channel
    schema: Schema,
    next_sequence: u32,
}

/// Records point-cloud frames into one container per session
pub struct Recorder {
    config: RecorderConfig,
    writer: LogWriter,
    layout: FieldLayout,
    builder: PointCloudBuilder,
    sampler: SphereSampler,
    session: Option<Session>,
    /// Reused per frame
    packed: Vec<u8>,
    points: Vec<f32>,
}

impl Recorder {
    /// Create an idle recorder
    pub fn new(config: RecorderConfig) -> Self {
        let layout = FieldLayout::xyz_f32();
        let frame_bytes = config.points_per_frame * layout.stride() as usize;
        Self {
            sampler: SphereSampler::new(config.seed),
            builder: PointCloudBuilder::with_capacity(frame_bytes + 256),
            packed: Vec::with_capacity(frame_bytes),
            points: Vec::with_capacity(config.points_per_frame * layout.field_count()),
            writer: LogWriter::new(),
            session: None,
            layout,
            config,
        }
    }

    /// Start a session writing to `path`.
    ///
    /// Creates the file, registers the point-cloud schema and channel and
    /// writes the session metadata record. On failure nothing is left on
    /// disk.
    pub fn open_session<P: AsRef<Path>>(&mut self, path: P) -> Result<&SessionInfo, RecorderError> {
        self.begin(path.as_ref(), None::<fs::File>)
    }

    /// Start a session on a sink the caller opened for `path`.
    ///
    /// Behaves like `open_session` once the sink is in place; `abort` and
    /// write failures still remove `path`.
    pub fn open_session_with<P, S>(
        &mut self,
        path: P,
        sink: S,
    ) -> Result<&SessionInfo, RecorderError>
    where
        P: AsRef<Path>,
        S: Sink + 'static,
    {
        self.begin(path.as_ref(), Some(sink))
    }

    fn begin<S: Sink + 'static>(
        &mut self,
        path: &Path,
        sink: Option<S>,
    ) -> Result<&SessionInfo, RecorderError> {
        if self.session.is_some() {
            return Err(RecorderError::AlreadyRecording);
        }

        let asset = assets::get(&self.config.schema_asset)
            .ok_or_else(|| RecorderError::MissingSchemaAsset(self.config.schema_asset.clone()))?;
        let schema = Schema::new(
            self.config.schema_name.as_str(),
            self.config.encoding.as_str(),
            asset.bytes,
        );

        let options = self.config.writer.clone();
        match sink {
            Some(sink) => self.writer.open_with(path, sink, options)?,
            None => self.writer.open(path, options)?,
        }

        match self.start(path, schema) {
            Ok(session) => {
                info!(
                    session = %session.info.id,
                    topic = %self.config.topic,
                    "Recording to {}",
                    path.display()
                );
                Ok(&self.session.insert(session).info)
            }
            Err(e) => {
                self.discard();
                Err(e)
            }
        }
    }

    fn start(&mut self, path: &Path, schema: Schema) -> Result<Session, RecorderError> {
        let schema_id = self.writer.add_schema(&schema)?;
        let channel = Channel::new(
            self.config.topic.as_str(),
            self.config.encoding.as_str(),
            schema_id,
        )
        .with_metadata("frame_id", self.config.frame_id.as_str());
        let channel_id = self.writer.add_channel(&channel)?;

        let started_at = Utc::now();
        let start_time = started_at
            .timestamp_nanos_opt()
            .and_then(|ns| u64::try_from(ns).ok())
            .unwrap_or_default();
        let id = Uuid::new_v4();

        let mut metadata = BTreeMap::new();
        metadata.insert("id".to_string(), id.to_string());
        metadata.insert(
            "started_at".to_string(),
            started_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
        );
        metadata.insert("library".to_string(), LIBRARY.to_string());
        self.writer.add_metadata(SESSION_METADATA, metadata)?;

        // A new session replays the same point sequence
        self.sampler = SphereSampler::new(self.config.seed);

        Ok(Session {
            info: SessionInfo {
                id,
                path: path.to_path_buf(),
                started_at,
                start_time,
                schema_id,
                channel_id,
            },
            schema,
            next_sequence: 0,
        })
    }

    /// Record one frame of points (`x, y, z` per point) at `log_time`.
    ///
    /// Sequence numbers are assigned from 0 without gaps. If the write fails
    /// the session is aborted, its file deleted, and the error returned.
    ///
    /// # Panics
    ///
    /// Panics if `points.len()` is not a multiple of 3.
    pub fn record_frame(&mut self, log_time: u64, points: &[f32]) -> Result<u32, RecorderError> {
        let (channel_id, sequence) = match &self.session {
            Some(session) => (session.info.channel_id, session.next_sequence),
            None => return Err(RecorderError::NotRecording),
        };

        self.layout.pack_into(points, &mut self.packed);
        let written = {
            let payload = self.builder.build(
                Time::from_nanos(log_time),
                &self.config.frame_id,
                &Pose::default(),
                &self.layout,
                &self.packed,
            );
            self.writer.write(&Message {
                channel_id,
                sequence,
                log_time,
                publish_time: log_time,
                data: Cow::Borrowed(payload),
            })
        };

        if let Err(e) = written {
            warn!("Failed to write frame {}: {}", sequence, e);
            self.abort();
            return Err(e.into());
        }

        if let Some(session) = self.session.as_mut() {
            session.next_sequence += 1;
        }
        debug!(
            sequence,
            points = points.len() / self.layout.field_count(),
            "Wrote frame"
        );
        Ok(sequence)
    }

    /// Sample and record synthetic frame `frame_index`, spaced from T0 by the
    /// configured interval.
    ///
    /// A log time past `u64::MAX` nanoseconds is rejected with
    /// `TimestampOverflow`; nothing is written and the session stays open.
    pub fn record_synthetic_frame(&mut self, frame_index: u32) -> Result<u32, RecorderError> {
        let start_time = match &self.session {
            Some(session) => session.info.start_time,
            None => return Err(RecorderError::NotRecording),
        };
        let log_time = u64::from(frame_index)
            .checked_mul(self.config.frame_interval_ns())
            .and_then(|offset| start_time.checked_add(offset))
            .ok_or(RecorderError::TimestampOverflow { frame_index })?;

        let mut points = std::mem::take(&mut self.points);
        points.clear();
        self.sampler
            .fill(&mut points, self.config.points_per_frame, frame_scale(frame_index));
        let result = self.record_frame(log_time, &points);
        self.points = points;
        result
    }

    /// Finalize the file and end the session
    pub fn close_session(&mut self) -> Result<Statistics, RecorderError> {
        let session = self.session.take().ok_or(RecorderError::NotRecording)?;
        match self.writer.close() {
            Ok(Some(statistics)) => {
                info!(
                    session = %session.info.id,
                    frames = session.next_sequence,
                    "Closed recording {}",
                    session.info.path.display()
                );
                Ok(statistics)
            }
            Ok(None) => Err(ContainerError::NotOpen.into()),
            Err(e) => {
                warn!("Failed to finalize {}: {}", session.info.path.display(), e);
                self.discard();
                Err(e.into())
            }
        }
    }

    /// Abandon the session and delete its file. Returns the deleted path.
    pub fn abort(&mut self) -> Option<PathBuf> {
        let session = self.session.take();
        let path = self.discard();
        if let Some(session) = session {
            warn!(
                session = %session.info.id,
                frames = session.next_sequence,
                "Aborted recording"
            );
        }
        path
    }

    /// Terminate the writer and remove whatever it wrote
    fn discard(&mut self) -> Option<PathBuf> {
        let path = self.writer.terminate()?;
        match fs::remove_file(&path) {
            Ok(()) => debug!("Removed partial container {}", path.display()),
            Err(e) => warn!("Failed to remove partial container {}: {}", path.display(), e),
        }
        Some(path)
    }

    /// Whether a session is open
    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// The open session
    pub fn session(&self) -> Option<&SessionInfo> {
        self.session.as_ref().map(|s| &s.info)
    }

    /// Schema registered by the open session
    pub fn schema(&self) -> Option<&Schema> {
        self.session.as_ref().map(|s| &s.schema)
    }

    /// Frames recorded in the open session
    pub fn frames_recorded(&self) -> u32 {
        self.session.as_ref().map_or(0, |s| s.next_sequence)
    }

    /// Recorder configuration
    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Point layout of every frame
    pub fn layout(&self) -> &FieldLayout {
        &self.layout
    }
}

/// Record `config.frames` synthetic frames into `path` and close the file
pub fn run_demo<P: AsRef<Path>>(
    config: RecorderConfig,
    path: P,
) -> Result<Statistics, RecorderError> {
    let frames = config.frames;
    let mut recorder = Recorder::new(config);
    recorder.open_session(path)?;
    for frame_index in 0..frames {
        if let Err(e) = recorder.record_synthetic_frame(frame_index) {
            recorder.abort();
            return Err(e);
        }
    }
    recorder.close_session()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{LogReader, WriterState};
    use tempfile::TempDir;

    fn small_config() -> RecorderConfig {
        RecorderConfig {
            points_per_frame: 10,
            frames: 3,
            ..RecorderConfig::default()
        }
    }

    #[test]
    fn test_record_requires_session() {
        let mut recorder = Recorder::new(small_config());
        assert!(matches!(
            recorder.record_frame(0, &[0.0, 0.0, 0.0]),
            Err(RecorderError::NotRecording)
        ));
        assert!(matches!(
            recorder.close_session(),
            Err(RecorderError::NotRecording)
        ));
        assert!(recorder.abort().is_none());
    }

    #[test]
    fn test_session_lifecycle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.mcap");
        let mut recorder = Recorder::new(small_config());

        let info = recorder.open_session(&path).unwrap().clone();
        assert_eq!(info.schema_id, 1);
        assert_eq!(info.channel_id, 0);
        assert!(recorder.is_recording());
        assert_eq!(recorder.schema().unwrap().name, "foxglove.PointCloud");
        assert!(matches!(
            recorder.open_session(&path),
            Err(RecorderError::AlreadyRecording)
        ));

        for i in 0..3 {
            assert_eq!(recorder.record_synthetic_frame(i).unwrap(), i);
        }
        let stats = recorder.close_session().unwrap();
        assert_eq!(stats.message_count, 3);
        assert_eq!(stats.metadata_count, 1);
        assert!(!recorder.is_recording());
        assert_eq!(recorder.writer.state(), WriterState::Closed);

        let reader = LogReader::open(&path).unwrap();
        let session = reader.metadata(SESSION_METADATA).unwrap().unwrap();
        assert_eq!(session.metadata["id"], info.id.to_string());
    }

    #[test]
    fn test_abort_deletes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("aborted.mcap");
        let mut recorder = Recorder::new(small_config());

        recorder.open_session(&path).unwrap();
        recorder.record_synthetic_frame(0).unwrap();
        assert!(path.exists());

        assert_eq!(recorder.abort(), Some(path.clone()));
        assert!(!path.exists());
        assert!(!recorder.is_recording());
    }

    #[test]
    fn test_missing_asset_creates_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("never.mcap");
        let mut recorder = Recorder::new(RecorderConfig {
            schema_asset: "foxglove.Nope".into(),
            ..small_config()
        });

        assert!(matches!(
            recorder.open_session(&path),
            Err(RecorderError::MissingSchemaAsset(_))
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_huge_interval_overflows_without_panic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("far.mcap");
        let mut recorder = Recorder::new(RecorderConfig {
            frame_interval_ms: 1_000_000_000_000,
            ..small_config()
        });
        recorder.open_session(&path).unwrap();

        let mut overflowed = None;
        for frame_index in 0..20 {
            match recorder.record_synthetic_frame(frame_index) {
                Ok(sequence) => assert_eq!(sequence, frame_index),
                Err(RecorderError::TimestampOverflow { frame_index }) => {
                    overflowed = Some(frame_index);
                    break;
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        let frame_index = overflowed.unwrap();
        assert!(frame_index > 0);

        // Nothing was written for the rejected frame and the session goes on
        assert!(recorder.is_recording());
        assert_eq!(recorder.frames_recorded(), frame_index);
        let stats = recorder.close_session().unwrap();
        assert_eq!(stats.message_count, u64::from(frame_index));
    }

    #[test]
    fn test_saturated_interval_rejects_second_frame() {
        let dir = TempDir::new().unwrap();
        let mut recorder = Recorder::new(RecorderConfig {
            frame_interval_ms: u64::MAX,
            ..small_config()
        });
        recorder.open_session(dir.path().join("max.mcap")).unwrap();
        assert_eq!(recorder.record_synthetic_frame(0).unwrap(), 0);
        assert!(matches!(
            recorder.record_synthetic_frame(1),
            Err(RecorderError::TimestampOverflow { frame_index: 1 })
        ));
    }

    #[test]
    fn test_sessions_restart_sequences() {
        let dir = TempDir::new().unwrap();
        let mut recorder = Recorder::new(small_config());

        for name in ["a.mcap", "b.mcap"] {
            recorder.open_session(dir.path().join(name)).unwrap();
            assert_eq!(recorder.record_frame(5, &[1.0, 2.0, 3.0]).unwrap(), 0);
            assert_eq!(recorder.record_frame(6, &[1.0, 2.0, 3.0]).unwrap(), 1);
            recorder.close_session().unwrap();
        }
    }
}
