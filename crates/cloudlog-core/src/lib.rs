//! # CloudLog Core Library
//!
//! Structured, time-ordered binary telemetry logs of 3-D point clouds.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Field-packed point encoding and point-cloud message payloads
//! - A schema/channel registry with stable ids
//! - An MCAP-style container writer with index, statistics and footer
//! - A container reader with random access and crash recovery by scan
//! - A seeded sphere sampler and a recording session tying it all together
//!
//! ## Example
//!
//! ```rust,ignore
//! use cloudlog_core::prelude::*;
//!
//! let mut recorder = Recorder::new(RecorderConfig::default());
//! recorder.open_session("clouds.mcap")?;
//! for frame in 0..100 {
//!     recorder.record_synthetic_frame(frame)?;
//! }
//! let stats = recorder.close_session()?;
//!
//! let reader = LogReader::open("clouds.mcap")?;
//! for message in reader.messages() {
//!     let cloud = PointCloud::decode(&message?.data)?;
//!     println!("{} points", cloud.point_count());
//! }
//! ```

pub mod assets;
pub mod container;
pub mod encoding;
pub mod recorder;
pub mod sampler;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::container::{
        Channel, ContainerError, LogReader, LogWriter, Message, Schema, ScanReport, Statistics,
        WriterOptions,
    };
    pub use crate::encoding::{
        DecodeError, FieldLayout, NumericType, PointCloud, PointCloudBuilder, Pose, Time,
    };
    pub use crate::recorder::{Recorder, RecorderConfig, RecorderError};
    pub use crate::sampler::SphereSampler;
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
