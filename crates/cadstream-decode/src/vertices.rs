//! Vertex unpacking.

use glam::Vec3;

use crate::error::{DecodeError, DecodeResult};

const VERTEX_STRIDE: usize = 12;

/// Unpack little-endian f32 XYZ triplets.
///
/// Every component must be finite; a NaN or infinity is reported with the
/// index of the offending vertex instead of being passed to the renderer.
pub fn unpack_vertices(packed: &[u8]) -> DecodeResult<Vec<Vec3>> {
    if packed.len() % VERTEX_STRIDE != 0 {
        return Err(DecodeError::InvalidLength {
            what: "vertex",
            len: packed.len(),
            stride: VERTEX_STRIDE,
        });
    }

    packed
        .chunks_exact(VERTEX_STRIDE)
        .enumerate()
        .map(|(index, chunk)| {
            let v = Vec3::new(
                read_f32(&chunk[0..4]),
                read_f32(&chunk[4..8]),
                read_f32(&chunk[8..12]),
            );
            if v.is_finite() {
                Ok(v)
            } else {
                Err(DecodeError::NonFinite {
                    what: "vertex",
                    index,
                })
            }
        })
        .collect()
}

pub(crate) fn read_f32(bytes: &[u8]) -> f32 {
    f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
