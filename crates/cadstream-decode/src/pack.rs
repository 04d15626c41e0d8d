//! Packing helpers, the inverse of the unpack functions.
//!
//! Used by fixture generators and tests to produce payloads in the wire
//! format this crate decodes.

use cadstream_proto::{QuadGeometry, SectorPayload, sector_payload};
use glam::Vec3;
use prost::Message;

use crate::Quad;
use crate::varint::{write_varint, zigzag_encode};

/// Pack vertices as little-endian f32 XYZ triplets.
#[must_use]
pub fn pack_vertices(vertices: &[Vec3]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vertices.len() * 12);
    for v in vertices {
        out.extend_from_slice(&v.x.to_le_bytes());
        out.extend_from_slice(&v.y.to_le_bytes());
        out.extend_from_slice(&v.z.to_le_bytes());
    }
    out
}

/// Pack indices as zigzag delta varints.
#[must_use]
pub fn pack_indices(indices: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(indices.len());
    let mut previous = 0i64;
    for &index in indices {
        let index = i64::from(index);
        write_varint(&mut out, zigzag_encode(index - previous));
        previous = index;
    }
    out
}

/// Pack quads into their wire message.
#[must_use]
pub fn pack_quads(quads: &[Quad]) -> QuadGeometry {
    let mut geometry = QuadGeometry::default();
    for quad in quads {
        for value in [
            quad.center.x,
            quad.center.y,
            quad.center.z,
            quad.normal.x,
            quad.normal.y,
            quad.normal.z,
            quad.size,
        ] {
            geometry.quads.extend_from_slice(&value.to_le_bytes());
        }
        geometry.colors.extend_from_slice(&quad.color);
        geometry.tree_indices.push(quad.tree_index);
    }
    geometry
}

/// Encode a complete sector payload at the current format version.
#[must_use]
pub fn encode_payload(sector_id: u32, body: sector_payload::Body) -> Vec<u8> {
    SectorPayload {
        format_version: cadstream_proto::FORMAT_VERSION,
        sector_id,
        body: Some(body),
    }
    .encode_to_vec()
}
