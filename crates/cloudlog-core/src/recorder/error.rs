//! Recorder errors

use std::path::PathBuf;

use thiserror::Error;

use crate::container::ContainerError;
use crate::encoding::DecodeError;

/// Errors that can occur during a recording session
#[derive(Error, Debug)]
pub enum RecorderError {
    /// Writing the container failed
    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    /// A point-cloud payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The config file could not be read
    #[error("Failed to read config {}: {source}", path.display())]
    ConfigIo {
        /// Config file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for a recorder config
    #[error("Invalid config {}: {source}", path.display())]
    ConfigParse {
        /// Config file
        path: PathBuf,
        /// Underlying parse error
        #[source]
        source: serde_json::Error,
    },

    /// No schema asset is embedded under this name
    #[error("Schema asset '{0}' is not embedded")]
    MissingSchemaAsset(String),

    /// The log time of a synthetic frame does not fit in 64-bit nanoseconds
    #[error("Log time of frame {frame_index} overflows")]
    TimestampOverflow {
        /// Frame that could not be timed
        frame_index: u32,
    },

    /// A session is already open
    #[error("Session is already recording")]
    AlreadyRecording,

    /// No session is open
    #[error("No recording session is open")]
    NotRecording,
}
