//! Field-packed point encoding
//!
//! Every point in a batch shares one [`FieldLayout`]: an ordered list of
//! named numeric fields laid out back to back. Field offsets are the running
//! sum of the widths of the fields before them, and the stride is the sum of
//! all widths. Values are stored little-endian.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use super::DecodeError;

/// Numeric type of a packed field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum NumericType {
    /// Unset; never valid in a layout
    Unknown = 0,
    /// `u8`
    Uint8 = 1,
    /// `i8`
    Int8 = 2,
    /// `u16`
    Uint16 = 3,
    /// `i16`
    Int16 = 4,
    /// `u32`
    Uint32 = 5,
    /// `i32`
    Int32 = 6,
    /// `f32`
    Float32 = 7,
    /// `f64`
    Float64 = 8,
}

impl NumericType {
    /// Decode a wire type code
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => NumericType::Unknown,
            1 => NumericType::Uint8,
            2 => NumericType::Int8,
            3 => NumericType::Uint16,
            4 => NumericType::Int16,
            5 => NumericType::Uint32,
            6 => NumericType::Int32,
            7 => NumericType::Float32,
            8 => NumericType::Float64,
            _ => return None,
        })
    }

    /// Wire type code
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Width of one value in bytes (0 for `Unknown`)
    pub fn width(self) -> usize {
        match self {
            NumericType::Unknown => 0,
            NumericType::Uint8 | NumericType::Int8 => 1,
            NumericType::Uint16 | NumericType::Int16 => 2,
            NumericType::Uint32 | NumericType::Int32 | NumericType::Float32 => 4,
            NumericType::Float64 => 8,
        }
    }
}

/// Describes one named field inside a packed point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedElementField {
    /// Field name (e.g. "x")
    pub name: String,
    /// Byte offset from the start of the point
    pub offset: u32,
    /// Value type
    pub numeric_type: NumericType,
}

/// Ordered field descriptors plus the resulting per-point stride
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    fields: Vec<PackedElementField>,
    stride: u32,
}

impl FieldLayout {
    /// Build a layout from `(name, type)` pairs.
    ///
    /// # Panics
    ///
    /// Panics if `fields` is empty or contains `NumericType::Unknown`.
    pub fn new(fields: &[(&str, NumericType)]) -> Self {
        assert!(!fields.is_empty(), "field layout needs at least one field");

        let mut offset = 0u32;
        let fields = fields
            .iter()
            .map(|&(name, numeric_type)| {
                assert!(
                    numeric_type != NumericType::Unknown,
                    "field '{name}' has no numeric type"
                );
                let field = PackedElementField {
                    name: name.to_string(),
                    offset,
                    numeric_type,
                };
                offset += numeric_type.width() as u32;
                field
            })
            .collect();

        Self {
            fields,
            stride: offset,
        }
    }

    /// Three single-precision coordinates: x, y, z
    pub fn xyz_f32() -> Self {
        Self::new(&[
            ("x", NumericType::Float32),
            ("y", NumericType::Float32),
            ("z", NumericType::Float32),
        ])
    }

    /// Rebuild a layout from decoded descriptors, checking every field fits
    pub fn from_descriptors(
        fields: Vec<PackedElementField>,
        stride: u32,
    ) -> Result<Self, DecodeError> {
        for field in &fields {
            let end = field.offset as u64 + field.numeric_type.width() as u64;
            if field.numeric_type == NumericType::Unknown || end > stride as u64 {
                return Err(DecodeError::FieldOutOfBounds {
                    name: field.name.clone(),
                    offset: field.offset,
                    stride,
                });
            }
        }
        Ok(Self { fields, stride })
    }

    /// Field descriptors in declared order
    pub fn fields(&self) -> &[PackedElementField] {
        &self.fields
    }

    /// Bytes per point
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Number of fields per point
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Index of a field by name
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Pack point values grouped by point (`[x0, y0, z0, x1, y1, z1, ...]`)
    ///
    /// # Panics
    ///
    /// Panics if `values.len()` is not a multiple of the field count.
    pub fn pack<V: Copy + Into<f64>>(&self, values: &[V]) -> Vec<u8> {
        let mut out = Vec::new();
        self.pack_into(values, &mut out);
        out
    }

    /// Like [`FieldLayout::pack`] but reuses `out`, which is cleared first
    pub fn pack_into<V: Copy + Into<f64>>(&self, values: &[V], out: &mut Vec<u8>) {
        let field_count = self.fields.len();
        assert!(
            values.len() % field_count == 0,
            "{} values do not divide into points of {} fields",
            values.len(),
            field_count
        );

        let stride = self.stride as usize;
        let point_count = values.len() / field_count;
        out.clear();
        out.resize(point_count * stride, 0);

        for (point, chunk) in values.chunks_exact(field_count).enumerate() {
            let base = point * stride;
            for (field, &value) in self.fields.iter().zip(chunk) {
                let start = base + field.offset as usize;
                let end = start + field.numeric_type.width();
                write_value(&mut out[start..end], field.numeric_type, value.into());
            }
        }
    }

    /// Number of whole points in a packed buffer of `len` bytes
    pub fn point_count(&self, len: usize) -> Result<usize, DecodeError> {
        let stride = self.stride as usize;
        if stride == 0 || len % stride != 0 {
            return Err(DecodeError::StrideMismatch {
                len,
                stride: self.stride,
            });
        }
        Ok(len / stride)
    }

    /// Decode a packed buffer back into values grouped by point
    pub fn unpack(&self, data: &[u8]) -> Result<Vec<f64>, DecodeError> {
        let point_count = self.point_count(data.len())?;
        let mut values = Vec::with_capacity(point_count * self.fields.len());
        for point in data.chunks_exact(self.stride as usize) {
            for field in &self.fields {
                values.push(read_field(point, field));
            }
        }
        Ok(values)
    }

    /// Read one field of one point
    pub fn read_value(
        &self,
        data: &[u8],
        point: usize,
        field_index: usize,
    ) -> Result<Option<f64>, DecodeError> {
        let point_count = self.point_count(data.len())?;
        let field = match self.fields.get(field_index) {
            Some(f) if point < point_count => f,
            _ => return Ok(None),
        };
        let stride = self.stride as usize;
        Ok(Some(read_field(
            &data[point * stride..(point + 1) * stride],
            field,
        )))
    }
}

fn write_value(dst: &mut [u8], numeric_type: NumericType, value: f64) {
    match numeric_type {
        NumericType::Unknown => {}
        NumericType::Uint8 => dst[0] = value as u8,
        NumericType::Int8 => dst[0] = value as i8 as u8,
        NumericType::Uint16 => LittleEndian::write_u16(dst, value as u16),
        NumericType::Int16 => LittleEndian::write_i16(dst, value as i16),
        NumericType::Uint32 => LittleEndian::write_u32(dst, value as u32),
        NumericType::Int32 => LittleEndian::write_i32(dst, value as i32),
        NumericType::Float32 => LittleEndian::write_f32(dst, value as f32),
        NumericType::Float64 => LittleEndian::write_f64(dst, value),
    }
}

// `point` is exactly one stride long and the field is known to fit
fn read_field(point: &[u8], field: &PackedElementField) -> f64 {
    let src = &point[field.offset as usize..];
    match field.numeric_type {
        NumericType::Unknown => f64::NAN,
        NumericType::Uint8 => src[0] as f64,
        NumericType::Int8 => src[0] as i8 as f64,
        NumericType::Uint16 => LittleEndian::read_u16(src) as f64,
        NumericType::Int16 => LittleEndian::read_i16(src) as f64,
        NumericType::Uint32 => LittleEndian::read_u32(src) as f64,
        NumericType::Int32 => LittleEndian::read_i32(src) as f64,
        NumericType::Float32 => LittleEndian::read_f32(src) as f64,
        NumericType::Float64 => LittleEndian::read_f64(src),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_offsets_are_cumulative() {
        let layout = FieldLayout::new(&[
            ("x", NumericType::Float32),
            ("intensity", NumericType::Uint8),
            ("ring", NumericType::Uint16),
            ("t", NumericType::Float64),
        ]);

        let offsets: Vec<u32> = layout.fields().iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 4, 5, 7]);
        assert_eq!(layout.stride(), 15);
    }

    #[test]
    fn test_xyz_layout() {
        let layout = FieldLayout::xyz_f32();
        assert_eq!(layout.stride(), 12);
        assert_eq!(layout.field_count(), 3);
        assert_eq!(layout.field_index("z"), Some(2));
    }

    #[test]
    fn test_pack_little_endian() {
        let layout = FieldLayout::new(&[("a", NumericType::Uint16), ("b", NumericType::Int8)]);
        let packed = layout.pack(&[0x0102u16 as f64, -1.0, 3.0, 4.0]);
        assert_eq!(packed, vec![0x02, 0x01, 0xFF, 0x03, 0x00, 0x04]);
    }

    #[test]
    fn test_pack_mixed_types_roundtrip() {
        let layout = FieldLayout::new(&[
            ("x", NumericType::Float32),
            ("id", NumericType::Int32),
            ("w", NumericType::Float64),
        ]);
        let values = [1.5, -7.0, 0.125, 2.25, 42.0, -3.5];
        let packed = layout.pack(&values);

        assert_eq!(packed.len(), 2 * layout.stride() as usize);
        assert_eq!(layout.unpack(&packed).unwrap(), values.to_vec());
        assert_eq!(layout.read_value(&packed, 1, 1).unwrap(), Some(42.0));
        assert_eq!(layout.read_value(&packed, 2, 0).unwrap(), None);
    }

    #[test]
    fn test_pack_into_reuses_buffer() {
        let layout = FieldLayout::xyz_f32();
        let mut buf = vec![0xAA; 100];
        layout.pack_into(&[1.0f32, 2.0, 3.0], &mut buf);
        assert_eq!(buf.len(), 12);
    }

    #[test]
    #[should_panic]
    fn test_pack_rejects_partial_point() {
        FieldLayout::xyz_f32().pack(&[1.0f32, 2.0]);
    }

    #[test]
    #[should_panic]
    fn test_empty_layout_panics() {
        FieldLayout::new(&[]);
    }

    #[test]
    fn test_unpack_stride_mismatch() {
        let layout = FieldLayout::xyz_f32();
        assert!(matches!(
            layout.unpack(&[0u8; 13]),
            Err(DecodeError::StrideMismatch { len: 13, stride: 12 })
        ));
    }

    #[test]
    fn test_descriptors_out_of_bounds() {
        let fields = vec![PackedElementField {
            name: "x".into(),
            offset: 10,
            numeric_type: NumericType::Float32,
        }];
        assert!(FieldLayout::from_descriptors(fields, 12).is_err());
    }

    #[test]
    fn test_numeric_type_codes() {
        for code in 0..=8u8 {
            assert_eq!(NumericType::from_code(code).unwrap().code(), code);
        }
        assert_eq!(NumericType::from_code(9), None);
    }
}
