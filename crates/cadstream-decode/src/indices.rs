//! Index unpacking.

use crate::error::{DecodeError, DecodeResult};
use crate::varint::{read_varint, zigzag_decode};

/// Unpack zigzag delta varint encoded triangle list indices.
///
/// Each varint is the signed difference to the previous index. The result
/// must describe whole triangles and reference only existing vertices.
pub fn unpack_indices(packed: &[u8], vertex_count: usize) -> DecodeResult<Vec<u32>> {
    let mut indices = Vec::with_capacity(packed.len());
    let mut pos = 0;
    let mut previous = 0i64;

    while pos < packed.len() {
        let delta = zigzag_decode(read_varint(packed, &mut pos)?);
        let index = previous
            .checked_add(delta)
            .ok_or(DecodeError::VarintOverflow)?;
        let in_range = usize::try_from(index).is_ok_and(|i| i < vertex_count);
        if !in_range {
            return Err(DecodeError::IndexOutOfRange {
                index,
                vertex_count,
            });
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        indices.push(index as u32);
        previous = index;
    }

    if indices.len() % 3 != 0 {
        return Err(DecodeError::InvalidLength {
            what: "triangle index",
            len: indices.len(),
            stride: 3,
        });
    }

    Ok(indices)
}
