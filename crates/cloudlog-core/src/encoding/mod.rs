//! Sample Encoding
//!
//! Field-packed point encoding and the point-cloud record that carries a
//! batch of points as one message payload.

pub mod cloud;
mod error;
pub mod field;
pub(crate) mod wire;

pub use cloud::{PointCloud, PointCloudBuilder, Pose, Quaternion, Time, Vector3};
pub use error::DecodeError;
pub use field::{FieldLayout, NumericType, PackedElementField};
