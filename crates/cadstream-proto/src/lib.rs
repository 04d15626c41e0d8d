//! Protobuf message types for streamed CAD sector payloads.
//!
//! A sector payload is either the detailed geometry of a sector (merged
//! triangle mesh files plus instanced meshes) or its simple representation,
//! a set of coloured quads. Bulk numeric data is carried in packed `bytes`
//! fields and unpacked by `cadstream-decode`.
//!
//! The messages are declared with `prost` derives directly so the crate has
//! no build-time dependency on `protoc`.

/// Current payload format version written by [`SectorPayload`] producers.
pub const FORMAT_VERSION: u32 = 1;

/// Top-level message stored in each sector file.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SectorPayload {
    /// Payload format version, see [`FORMAT_VERSION`].
    #[prost(uint32, tag = "1")]
    pub format_version: u32,
    /// Id of the sector this payload belongs to.
    #[prost(uint32, tag = "2")]
    pub sector_id: u32,
    #[prost(oneof = "sector_payload::Body", tags = "3, 4")]
    pub body: ::core::option::Option<sector_payload::Body>,
}

/// Nested types for [`SectorPayload`].
pub mod sector_payload {
    /// The geometry carried by a sector payload.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "3")]
        Detailed(super::DetailedGeometry),
        #[prost(message, tag = "4")]
        Quads(super::QuadGeometry),
    }
}

/// Full-fidelity geometry of a sector.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DetailedGeometry {
    #[prost(message, repeated, tag = "1")]
    pub triangle_meshes: ::prost::alloc::vec::Vec<TriangleMeshFile>,
    #[prost(message, repeated, tag = "2")]
    pub instanced_meshes: ::prost::alloc::vec::Vec<InstancedMeshFile>,
}

/// Several meshes merged into one vertex/index buffer.
///
/// `triangle_counts[i]` triangles belong to mesh `i`, in order. Each mesh
/// carries one tree index and one RGBA colour (4 bytes in `colors`).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TriangleMeshFile {
    #[prost(uint32, tag = "1")]
    pub file_id: u32,
    /// Little-endian f32 XYZ triplets.
    #[prost(bytes = "vec", tag = "2")]
    pub vertices: ::prost::alloc::vec::Vec<u8>,
    /// Zigzag delta varint encoded triangle list indices.
    #[prost(bytes = "vec", tag = "3")]
    pub indices: ::prost::alloc::vec::Vec<u8>,
    #[prost(uint32, repeated, tag = "4")]
    pub triangle_counts: ::prost::alloc::vec::Vec<u32>,
    #[prost(uint32, repeated, tag = "5")]
    pub tree_indices: ::prost::alloc::vec::Vec<u32>,
    #[prost(bytes = "vec", tag = "6")]
    pub colors: ::prost::alloc::vec::Vec<u8>,
}

/// A template mesh drawn once per instance.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InstancedMeshFile {
    #[prost(uint32, tag = "1")]
    pub file_id: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub vertices: ::prost::alloc::vec::Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub indices: ::prost::alloc::vec::Vec<u8>,
    #[prost(message, repeated, tag = "4")]
    pub instances: ::prost::alloc::vec::Vec<MeshInstance>,
}

/// One placement of a range of triangles from an [`InstancedMeshFile`].
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MeshInstance {
    #[prost(uint32, tag = "1")]
    pub triangle_offset: u32,
    #[prost(uint32, tag = "2")]
    pub triangle_count: u32,
    /// Column-major 4x4 instance matrix (16 values).
    #[prost(float, repeated, tag = "3")]
    pub matrix: ::prost::alloc::vec::Vec<f32>,
    #[prost(uint32, tag = "4")]
    pub tree_index: u32,
    /// RGBA packed as `0xRRGGBBAA`.
    #[prost(fixed32, tag = "5")]
    pub color: u32,
}

/// Simple representation of a sector: one quad per record.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QuadGeometry {
    /// Little-endian f32 records of `[cx, cy, cz, nx, ny, nz, size]`.
    #[prost(bytes = "vec", tag = "1")]
    pub quads: ::prost::alloc::vec::Vec<u8>,
    /// RGBA bytes, one entry per quad.
    #[prost(bytes = "vec", tag = "2")]
    pub colors: ::prost::alloc::vec::Vec<u8>,
    #[prost(uint32, repeated, tag = "3")]
    pub tree_indices: ::prost::alloc::vec::Vec<u32>,
}
