//! Decoding errors

use thiserror::Error;

/// Errors that can occur while decoding untrusted record bytes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The record ended before a field did
    #[error("Unexpected end of data: needed {needed} bytes, {available} available")]
    UnexpectedEof {
        /// Bytes the field needs
        needed: usize,
        /// Bytes left
        available: usize,
    },

    /// A string field is not UTF-8
    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8,

    /// A field carries an unknown numeric type code
    #[error("Unknown numeric type code: {0}")]
    InvalidNumericType(u8),

    /// A field does not fit inside one point
    #[error("Field '{name}' at offset {offset} does not fit in stride {stride}")]
    FieldOutOfBounds {
        /// Field name
        name: String,
        /// Field offset within a point
        offset: u32,
        /// Point stride
        stride: u32,
    },

    /// The point data is not a whole number of points
    #[error("Point data length {len} is not a multiple of stride {stride}")]
    StrideMismatch {
        /// Length of the point data
        len: usize,
        /// Point stride
        stride: u32,
    },

    /// Bytes remain after the last field
    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),
}
