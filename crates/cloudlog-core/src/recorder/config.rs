//! Recorder configuration

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::RecorderError;
use crate::container::WriterOptions;

/// Default topic and frame id of the demo cloud
pub const DEFAULT_TOPIC: &str = "pointcloud";

/// Name of the embedded point-cloud schema asset
pub const POINT_CLOUD_SCHEMA: &str = "foxglove.PointCloud";

/// Recording session settings
///
/// Every field has a default, so a config file only needs the values it
/// changes:
///
/// ```json
/// { "frames": 20, "points_per_frame": 5000, "writer": { "sync_on_close": false } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Topic of the point-cloud channel
    pub topic: String,
    /// Frame id written into every cloud
    pub frame_id: String,
    /// Name the schema is registered under
    pub schema_name: String,
    /// Embedded asset used as the schema descriptor
    pub schema_asset: String,
    /// Encoding tag of both the schema and the channel's messages
    pub encoding: String,
    /// Points generated per synthetic frame
    pub points_per_frame: usize,
    /// Frames recorded by the demo run
    pub frames: u32,
    /// Log time distance between synthetic frames
    pub frame_interval_ms: u64,
    /// Seed of the sphere sampler
    pub seed: u64,
    /// Container writer options
    pub writer: WriterOptions,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            frame_id: DEFAULT_TOPIC.to_string(),
            schema_name: POINT_CLOUD_SCHEMA.to_string(),
            schema_asset: POINT_CLOUD_SCHEMA.to_string(),
            encoding: "flatbuffer".to_string(),
            points_per_frame: 1000,
            frames: 100,
            frame_interval_ms: 100,
            seed: 0,
            writer: WriterOptions::default(),
        }
    }
}

impl RecorderConfig {
    /// Load a JSON config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, RecorderError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| RecorderError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| RecorderError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Frame spacing in nanoseconds
    pub fn frame_interval_ns(&self) -> u64 {
        self.frame_interval_ms.saturating_mul(1_000_000)
    }
}
