//! Decoding errors.

use thiserror::Error;

/// Result alias for decoding operations.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Errors produced while unpacking a sector payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid protobuf payload: {0}")]
    Protobuf(#[from] prost::DecodeError),

    #[error("unsupported payload format version {0}")]
    UnsupportedFormat(u32),

    #[error("payload has no geometry body")]
    MissingBody,

    #[error("truncated {what}")]
    Truncated { what: &'static str },

    #[error("varint does not fit in 64 bits")]
    VarintOverflow,

    #[error("{what} buffer length {len} is not a multiple of {stride}")]
    InvalidLength {
        what: &'static str,
        len: usize,
        stride: usize,
    },

    #[error("non-finite {what} value at element {index}")]
    NonFinite { what: &'static str, index: usize },

    #[error("index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange { index: i64, vertex_count: usize },

    #[error("{what}: expected {expected}, found {actual}")]
    CountMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}
