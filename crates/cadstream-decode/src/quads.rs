//! Quad (simple geometry) unpacking.

use cadstream_proto::QuadGeometry;
use glam::Vec3;

use crate::Quad;
use crate::error::{DecodeError, DecodeResult};
use crate::vertices::read_f32;

/// Bytes per packed quad record: `[cx, cy, cz, nx, ny, nz, size]` as f32.
pub const QUAD_STRIDE: usize = 7 * 4;

/// Unpack the simple representation of a sector.
pub fn unpack_quads(geometry: &QuadGeometry) -> DecodeResult<Vec<Quad>> {
    if geometry.quads.len() % QUAD_STRIDE != 0 {
        return Err(DecodeError::InvalidLength {
            what: "quad",
            len: geometry.quads.len(),
            stride: QUAD_STRIDE,
        });
    }
    let count = geometry.quads.len() / QUAD_STRIDE;
    if geometry.colors.len() != count * 4 || geometry.tree_indices.len() != count {
        return Err(DecodeError::CountMismatch {
            what: "quad attribute count",
            expected: count,
            actual: geometry.tree_indices.len(),
        });
    }

    geometry
        .quads
        .chunks_exact(QUAD_STRIDE)
        .enumerate()
        .map(|(index, record)| {
            let f: Vec<f32> = record.chunks_exact(4).map(read_f32).collect();
            if f.iter().any(|v| !v.is_finite()) {
                return Err(DecodeError::NonFinite { what: "quad", index });
            }
            let c = &geometry.colors[4 * index..4 * index + 4];
            Ok(Quad {
                center: Vec3::new(f[0], f[1], f[2]),
                normal: Vec3::new(f[3], f[4], f[5]),
                size: f[6],
                color: [c[0], c[1], c[2], c[3]],
                tree_index: geometry.tree_indices[index],
            })
        })
        .collect()
}
