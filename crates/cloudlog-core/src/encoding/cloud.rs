//! Point-cloud records
//!
//! One [`PointCloud`] is the payload of one message. The record is laid out
//! in the order of the `foxglove.PointCloud` schema, little-endian:
//!
//! ```text
//! sec: u32 | nsec: u32
//! frame_id: u32 len + utf8
//! position: f64 x3 | orientation: f64 x4 (x, y, z, w)
//! point_stride: u32
//! field_count: u32, then per field: name (u32 len + utf8), offset: u32, type: u8
//! data: u32 len + bytes
//! ```

use serde::{Deserialize, Serialize};

use super::field::{FieldLayout, NumericType, PackedElementField};
use super::wire::{self, WireReader};
use super::DecodeError;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Seconds + nanoseconds timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Time {
    /// Whole seconds
    pub sec: u32,
    /// Nanoseconds within the second
    pub nsec: u32,
}

impl Time {
    /// Split a nanosecond timestamp
    pub fn from_nanos(nanos: u64) -> Self {
        Self {
            sec: (nanos / NANOS_PER_SEC) as u32,
            nsec: (nanos % NANOS_PER_SEC) as u32,
        }
    }

    /// Total nanoseconds
    pub fn as_nanos(&self) -> u64 {
        self.sec as u64 * NANOS_PER_SEC + self.nsec as u64
    }
}

/// 3-D vector
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    /// X component
    pub x: f64,
    /// Y component
    pub y: f64,
    /// Z component
    pub z: f64,
}

/// Rotation quaternion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    /// X component
    pub x: f64,
    /// Y component
    pub y: f64,
    /// Z component
    pub z: f64,
    /// Scalar component
    pub w: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        }
    }
}

/// Position and orientation of the cloud's origin in its frame
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    /// Origin position
    pub position: Vector3,
    /// Origin orientation
    pub orientation: Quaternion,
}

/// A decoded point-cloud record
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    /// Capture time
    pub timestamp: Time,
    /// Coordinate frame the points are expressed in
    pub frame_id: String,
    /// Origin of the points
    pub pose: Pose,
    /// Bytes per point
    pub point_stride: u32,
    /// Per-point field layout
    pub fields: Vec<PackedElementField>,
    /// Packed point bytes, `point_count * point_stride` long
    pub data: Vec<u8>,
}

impl PointCloud {
    /// Build a cloud from a layout and its packed data
    ///
    /// # Panics
    ///
    /// Panics if `data` is not a whole number of points.
    pub fn new(
        timestamp: Time,
        frame_id: impl Into<String>,
        pose: Pose,
        layout: &FieldLayout,
        data: Vec<u8>,
    ) -> Self {
        assert_whole_points(data.len(), layout.stride());
        Self {
            timestamp,
            frame_id: frame_id.into(),
            pose,
            point_stride: layout.stride(),
            fields: layout.fields().to_vec(),
            data,
        }
    }

    /// Number of points in the cloud
    pub fn point_count(&self) -> usize {
        match self.point_stride {
            0 => 0,
            stride => self.data.len() / stride as usize,
        }
    }

    /// Field layout, validated against the stride
    pub fn layout(&self) -> Result<FieldLayout, DecodeError> {
        FieldLayout::from_descriptors(self.fields.clone(), self.point_stride)
    }

    /// Decode every point's values, grouped by point
    pub fn values(&self) -> Result<Vec<f64>, DecodeError> {
        self.layout()?.unpack(&self.data)
    }

    /// Encode into a fresh buffer
    pub fn encode(&self) -> Vec<u8> {
        let mut builder = PointCloudBuilder::new();
        builder
            .build_parts(
                self.timestamp,
                &self.frame_id,
                &self.pose,
                self.point_stride,
                &self.fields,
                &self.data,
            )
            .to_vec()
    }

    /// Decode a record produced by [`PointCloudBuilder`]
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = WireReader::new(bytes);

        let timestamp = Time {
            sec: reader.u32()?,
            nsec: reader.u32()?,
        };
        let frame_id = reader.string()?;
        let pose = Pose {
            position: Vector3 {
                x: reader.f64()?,
                y: reader.f64()?,
                z: reader.f64()?,
            },
            orientation: Quaternion {
                x: reader.f64()?,
                y: reader.f64()?,
                z: reader.f64()?,
                w: reader.f64()?,
            },
        };
        let point_stride = reader.u32()?;

        let field_count = reader.u32()? as usize;
        // Each descriptor takes at least 9 bytes, so a bogus count fails fast
        let mut fields = Vec::with_capacity(field_count.min(reader.remaining() / 9));
        for _ in 0..field_count {
            let name = reader.string()?;
            let offset = reader.u32()?;
            let code = reader.u8()?;
            let numeric_type =
                NumericType::from_code(code).ok_or(DecodeError::InvalidNumericType(code))?;
            fields.push(PackedElementField {
                name,
                offset,
                numeric_type,
            });
        }

        let data = reader.bytes()?.to_vec();
        reader.finish()?;

        let whole_points = match point_stride {
            0 => data.is_empty(),
            stride => data.len() % stride as usize == 0,
        };
        if !whole_points {
            return Err(DecodeError::StrideMismatch {
                len: data.len(),
                stride: point_stride,
            });
        }

        Ok(Self {
            timestamp,
            frame_id,
            pose,
            point_stride,
            fields,
            data,
        })
    }
}

fn assert_whole_points(len: usize, stride: u32) {
    assert!(
        stride > 0 && len % stride as usize == 0,
        "{len} bytes of point data is not a whole number of {stride}-byte points"
    );
}

/// Reusable encoder for point-cloud records
///
/// The internal buffer is cleared and reused on every call, so one builder
/// serves a whole recording session without reallocating per frame.
#[derive(Debug, Default)]
pub struct PointCloudBuilder {
    buffer: Vec<u8>,
}

impl PointCloudBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a builder with room for `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Encode one frame. The returned slice is valid until the next call.
    ///
    /// # Panics
    ///
    /// Panics if `data` is not a whole number of points of `layout`.
    pub fn build(
        &mut self,
        timestamp: Time,
        frame_id: &str,
        pose: &Pose,
        layout: &FieldLayout,
        data: &[u8],
    ) -> &[u8] {
        assert_whole_points(data.len(), layout.stride());
        self.build_parts(
            timestamp,
            frame_id,
            pose,
            layout.stride(),
            layout.fields(),
            data,
        )
    }

    fn build_parts(
        &mut self,
        timestamp: Time,
        frame_id: &str,
        pose: &Pose,
        point_stride: u32,
        fields: &[PackedElementField],
        data: &[u8],
    ) -> &[u8] {
        let buf = &mut self.buffer;
        buf.clear();

        wire::put_u32(buf, timestamp.sec);
        wire::put_u32(buf, timestamp.nsec);
        wire::put_str(buf, frame_id);

        let Pose {
            position: p,
            orientation: q,
        } = pose;
        for v in [p.x, p.y, p.z, q.x, q.y, q.z, q.w] {
            wire::put_f64(buf, v);
        }

        wire::put_u32(buf, point_stride);
        wire::put_u32(buf, fields.len() as u32);
        for field in fields {
            wire::put_str(buf, &field.name);
            wire::put_u32(buf, field.offset);
            wire::put_u8(buf, field.numeric_type.code());
        }
        wire::put_bytes(buf, data);

        &self.buffer
    }

    /// Bytes currently reserved by the builder
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }
}
