//! Decode streamed CAD sector payloads into CPU-side geometry buffers.
//!
//! This crate provides pure synchronous decoding functions for unpacking
//! sector payloads. All functions are designed to be called from any
//! threading context - the library user controls parallelism (the streaming
//! core runs them on a blocking worker pool).
//!
//! # Design principles
//!
//! - **Synchronous**: No async, no threading primitives
//! - **Validating**: Non-finite values and out-of-range indices are errors,
//!   never silently passed on to the renderer
//! - **CPU-side only**: Output buffers are plain vectors; uploading them is
//!   the caller's job
//!
//! # Key functions
//!
//! - [`decode_sector`]: Decode a complete protobuf sector payload
//! - [`unpack_vertices`]: Unpack little-endian XYZ vertex positions
//! - [`unpack_indices`]: Decode zigzag delta varint triangle indices
//! - [`unpack_quads`]: Unpack the simple (quad) representation
//! - [`create_offsets_array`]: Exclusive prefix sums for merged buffers

mod error;
mod mesh;
mod varint;

pub mod indices;
pub mod offsets;
pub mod pack;
pub mod quads;
pub mod vertices;

use std::collections::BTreeSet;

use cadstream_proto::{SectorPayload, sector_payload};
use glam::{Mat4, Vec3};
use prost::Message;

pub use error::{DecodeError, DecodeResult};
pub use indices::unpack_indices;
pub use offsets::create_offsets_array;
pub use quads::unpack_quads;
pub use varint::{read_varint, write_varint};
pub use vertices::unpack_vertices;

/// A merged triangle mesh with per-vertex attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct TriangleMesh {
    pub file_id: u32,
    pub vertices: Vec<Vec3>,
    pub indices: Vec<u32>,
    /// RGBA colour per vertex.
    pub colors: Vec<[u8; 4]>,
    /// Tree index (node) per vertex.
    pub tree_indices: Vec<u32>,
}

/// A template mesh and its placements.
#[derive(Debug, Clone, PartialEq)]
pub struct InstancedMesh {
    pub file_id: u32,
    pub vertices: Vec<Vec3>,
    pub indices: Vec<u32>,
    pub instances: Vec<Instance>,
}

/// One placement of a triangle range from an [`InstancedMesh`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instance {
    pub triangle_offset: u32,
    pub triangle_count: u32,
    pub matrix: Mat4,
    pub tree_index: u32,
    pub color: [u8; 4],
}

/// A single coloured quad of simple geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quad {
    pub center: Vec3,
    pub normal: Vec3,
    pub size: f32,
    pub color: [u8; 4],
    pub tree_index: u32,
}

/// Decoded detailed geometry of a sector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailedGeometry {
    pub triangle_meshes: Vec<TriangleMesh>,
    pub instanced_meshes: Vec<InstancedMesh>,
}

/// Decoded geometry of one sector at one level of detail.
#[derive(Debug, Clone, PartialEq)]
pub enum SectorGeometry {
    Detailed(DetailedGeometry),
    Quads(Vec<Quad>),
}

impl SectorGeometry {
    /// Approximate size of the CPU-side buffers in bytes.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        const VERTEX: usize = std::mem::size_of::<Vec3>();
        match self {
            Self::Detailed(detailed) => {
                let triangles: usize = detailed
                    .triangle_meshes
                    .iter()
                    .map(|m| m.vertices.len() * (VERTEX + 8) + m.indices.len() * 4)
                    .sum();
                let instanced: usize = detailed
                    .instanced_meshes
                    .iter()
                    .map(|m| {
                        m.vertices.len() * VERTEX
                            + m.indices.len() * 4
                            + m.instances.len() * std::mem::size_of::<Instance>()
                    })
                    .sum();
                triangles + instanced
            }
            Self::Quads(quads) => quads.len() * std::mem::size_of::<Quad>(),
        }
    }

    /// Number of draw calls needed to render this geometry.
    #[must_use]
    pub fn draw_calls(&self) -> usize {
        match self {
            Self::Detailed(detailed) => {
                let instanced: usize = detailed
                    .instanced_meshes
                    .iter()
                    .map(|m| {
                        m.instances
                            .iter()
                            .map(|i| i.triangle_offset)
                            .collect::<BTreeSet<_>>()
                            .len()
                    })
                    .sum();
                detailed.triangle_meshes.len() + instanced
            }
            Self::Quads(quads) => usize::from(!quads.is_empty()),
        }
    }

    /// All tree indices (model nodes) that have geometry in this sector.
    #[must_use]
    pub fn tree_indices(&self) -> BTreeSet<u32> {
        match self {
            Self::Detailed(detailed) => detailed
                .triangle_meshes
                .iter()
                .flat_map(|m| m.tree_indices.iter().copied())
                .chain(
                    detailed
                        .instanced_meshes
                        .iter()
                        .flat_map(|m| m.instances.iter().map(|i| i.tree_index)),
                )
                .collect(),
            Self::Quads(quads) => quads.iter().map(|q| q.tree_index).collect(),
        }
    }

    /// Whether the geometry contains nothing to draw.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.draw_calls() == 0
    }
}

/// Decode a protobuf [`SectorPayload`] into [`SectorGeometry`].
pub fn decode_sector(bytes: &[u8]) -> DecodeResult<SectorGeometry> {
    let payload = SectorPayload::decode(bytes)?;
    if payload.format_version != cadstream_proto::FORMAT_VERSION {
        return Err(DecodeError::UnsupportedFormat(payload.format_version));
    }

    match payload.body.ok_or(DecodeError::MissingBody)? {
        sector_payload::Body::Detailed(detailed) => {
            let triangle_meshes = detailed
                .triangle_meshes
                .iter()
                .map(mesh::finalize_triangle_mesh)
                .collect::<DecodeResult<Vec<_>>>()?;
            let instanced_meshes = detailed
                .instanced_meshes
                .iter()
                .map(mesh::finalize_instanced_mesh)
                .collect::<DecodeResult<Vec<_>>>()?;
            Ok(SectorGeometry::Detailed(DetailedGeometry {
                triangle_meshes,
                instanced_meshes,
            }))
        }
        sector_payload::Body::Quads(quads) => Ok(SectorGeometry::Quads(unpack_quads(&quads)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::{encode_payload, pack_indices, pack_quads, pack_vertices};
    use cadstream_proto::TriangleMeshFile;

    fn quad(tree_index: u32) -> Quad {
        Quad {
            center: Vec3::new(1.0, 2.0, 3.0),
            normal: Vec3::Z,
            size: 0.5,
            color: [10, 20, 30, 255],
            tree_index,
        }
    }

    #[test]
    fn decodes_quad_payload() {
        let bytes = encode_payload(
            4,
            sector_payload::Body::Quads(pack_quads(&[quad(1), quad(2)])),
        );
        let geometry = decode_sector(&bytes).unwrap();
        assert_eq!(geometry, SectorGeometry::Quads(vec![quad(1), quad(2)]));
        assert_eq!(geometry.draw_calls(), 1);
        assert_eq!(geometry.tree_indices().into_iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn decodes_detailed_payload() {
        let body = sector_payload::Body::Detailed(cadstream_proto::DetailedGeometry {
            triangle_meshes: vec![TriangleMeshFile {
                file_id: 0,
                vertices: pack_vertices(&[Vec3::ZERO, Vec3::X, Vec3::Y]),
                indices: pack_indices(&[0, 1, 2]),
                triangle_counts: vec![1],
                tree_indices: vec![42],
                colors: vec![1, 2, 3, 4],
            }],
            instanced_meshes: vec![],
        });
        let geometry = decode_sector(&encode_payload(9, body)).unwrap();
        assert_eq!(geometry.draw_calls(), 1);
        assert!(geometry.byte_size() > 0);
        assert!(geometry.tree_indices().contains(&42));
    }

    #[test]
    fn rejects_unknown_format_version() {
        let payload = SectorPayload {
            format_version: 99,
            sector_id: 0,
            body: None,
        };
        assert!(matches!(
            decode_sector(&payload.encode_to_vec()),
            Err(DecodeError::UnsupportedFormat(99))
        ));
    }

    #[test]
    fn rejects_payload_without_body() {
        let payload = SectorPayload {
            format_version: cadstream_proto::FORMAT_VERSION,
            sector_id: 0,
            body: None,
        };
        assert!(matches!(
            decode_sector(&payload.encode_to_vec()),
            Err(DecodeError::MissingBody)
        ));
    }

    #[test]
    fn garbage_is_a_protobuf_error() {
        assert!(matches!(
            decode_sector(&[0xff, 0xff, 0xff]),
            Err(DecodeError::Protobuf(_))
        ));
    }
}
