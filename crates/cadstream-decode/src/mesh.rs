//! Triangle and instanced mesh finalization.
//!
//! Merged mesh files store many logical meshes in one buffer. Finalizing a
//! file spreads each mesh's colour and tree index onto the vertices its
//! triangles reference, so the renderer can style nodes per vertex.

use cadstream_proto::{InstancedMeshFile, MeshInstance, TriangleMeshFile};
use glam::Mat4;

use crate::error::{DecodeError, DecodeResult};
use crate::indices::unpack_indices;
use crate::offsets::create_offsets_array;
use crate::vertices::unpack_vertices;
use crate::{Instance, InstancedMesh, TriangleMesh};

pub(crate) fn finalize_triangle_mesh(file: &TriangleMeshFile) -> DecodeResult<TriangleMesh> {
    let vertices = unpack_vertices(&file.vertices)?;
    let indices = unpack_indices(&file.indices, vertices.len())?;

    let mesh_count = file.triangle_counts.len();
    expect_count("tree index count", mesh_count, file.tree_indices.len())?;
    expect_count("colour byte count", mesh_count * 4, file.colors.len())?;

    let total_triangles: u64 = file.triangle_counts.iter().map(|&c| u64::from(c)).sum();
    expect_count(
        "triangle count",
        usize::try_from(total_triangles).unwrap_or(usize::MAX),
        indices.len() / 3,
    )?;

    let mut colors = vec![[0u8; 4]; vertices.len()];
    let mut tree_indices = vec![0u32; vertices.len()];
    let offsets = create_offsets_array(&file.triangle_counts);

    for (mesh, (&offset, &count)) in offsets.iter().zip(&file.triangle_counts).enumerate() {
        let color = [
            file.colors[4 * mesh],
            file.colors[4 * mesh + 1],
            file.colors[4 * mesh + 2],
            file.colors[4 * mesh + 3],
        ];
        let tree_index = file.tree_indices[mesh];
        #[allow(clippy::cast_possible_truncation)]
        let first = offset as usize * 3;
        let last = first + count as usize * 3;
        for &vertex in &indices[first..last] {
            colors[vertex as usize] = color;
            tree_indices[vertex as usize] = tree_index;
        }
    }

    Ok(TriangleMesh {
        file_id: file.file_id,
        vertices,
        indices,
        colors,
        tree_indices,
    })
}

pub(crate) fn finalize_instanced_mesh(file: &InstancedMeshFile) -> DecodeResult<InstancedMesh> {
    let vertices = unpack_vertices(&file.vertices)?;
    let indices = unpack_indices(&file.indices, vertices.len())?;
    let triangle_count = indices.len() / 3;

    let instances = file
        .instances
        .iter()
        .enumerate()
        .map(|(index, instance)| convert_instance(index, instance, triangle_count))
        .collect::<DecodeResult<Vec<_>>>()?;

    Ok(InstancedMesh {
        file_id: file.file_id,
        vertices,
        indices,
        instances,
    })
}

fn convert_instance(
    index: usize,
    instance: &MeshInstance,
    triangle_count: usize,
) -> DecodeResult<Instance> {
    expect_count("instance matrix length", 16, instance.matrix.len())?;
    if instance.matrix.iter().any(|v| !v.is_finite()) {
        return Err(DecodeError::NonFinite {
            what: "instance matrix",
            index,
        });
    }

    let end = u64::from(instance.triangle_offset) + u64::from(instance.triangle_count);
    if end > triangle_count as u64 {
        return Err(DecodeError::CountMismatch {
            what: "instance triangle range end",
            expected: triangle_count,
            actual: usize::try_from(end).unwrap_or(usize::MAX),
        });
    }

    let mut matrix = [0f32; 16];
    matrix.copy_from_slice(&instance.matrix);

    Ok(Instance {
        triangle_offset: instance.triangle_offset,
        triangle_count: instance.triangle_count,
        matrix: Mat4::from_cols_array(&matrix),
        tree_index: instance.tree_index,
        color: instance.color.to_be_bytes(),
    })
}

fn expect_count(what: &'static str, expected: usize, actual: usize) -> DecodeResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(DecodeError::CountMismatch {
            what,
            expected,
            actual,
        })
    }
}
