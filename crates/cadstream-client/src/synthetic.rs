//! Synthetic model generator.
//!
//! Writes an octree of sectors to disk in the layout [`FileFetcher`] reads:
//! a version 9 `scene.json` plus one detailed and one simple payload per
//! sector. Every sector holds a box at its centre; leaf sectors add a few
//! instanced bolts so both mesh kinds get exercised.

use std::fs;
use std::path::{Path, PathBuf};

use cadstream::fetch::MANIFEST_FILE_NAME;
use cadstream::proto::sector_payload::Body;
use cadstream::proto::{DetailedGeometry, InstancedMeshFile, MeshInstance, TriangleMeshFile};
use cadstream::{Aabb, FileFetcher, ModelId, VIEWER_TO_CDF};
use cadstream_decode::Quad;
use cadstream_decode::pack::{encode_payload, pack_indices, pack_quads, pack_vertices};
use glam::{DVec3, Mat4, Quat, Vec3};
use serde_json::{Value, json};

const BOX_INDICES: [u32; 36] = [
    0, 1, 2, 2, 3, 0, // -z
    4, 6, 5, 6, 4, 7, // +z
    0, 4, 5, 5, 1, 0, // -y
    3, 2, 6, 6, 7, 3, // +y
    0, 3, 7, 7, 4, 0, // -x
    1, 5, 6, 6, 2, 1, // +x
];

/// Shape of the generated model.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticSpec {
    /// Depth of the leaf sectors; the root is depth 0.
    pub depth: u32,
    /// Edge length of the root sector in metres.
    pub size: f64,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        Self {
            depth: 2,
            size: 200.0,
        }
    }
}

/// A generated model on disk.
#[derive(Debug, Clone)]
pub struct SyntheticModel {
    /// Directory to hand to [`FileFetcher::new`].
    pub root: PathBuf,
    pub model: ModelId,
    pub sectors: usize,
    /// Sum of all detailed payload sizes.
    pub detailed_bytes: u64,
}

/// Write a synthetic model under `root`.
pub fn generate(root: &Path, model: ModelId, spec: SyntheticSpec) -> cadstream::Result<SyntheticModel> {
    let files = FileFetcher::new(root);
    let dir = files.path(model, "");
    fs::create_dir_all(&dir)?;

    let half = DVec3::splat(spec.size * 0.5);
    let root_bounds = Aabb::new(-half, half)?;
    let mut writer = SectorWriter {
        files: &files,
        model,
        max_depth: spec.depth,
        sectors: Vec::new(),
        detailed_bytes: 0,
    };
    writer.write_subtree(root_bounds, 0, None, "0/")?;

    let manifest = json!({
        "version": 9,
        "maxTreeIndex": writer.sectors.len(),
        "unit": "Meters",
        "sectors": writer.sectors,
    });
    fs::write(
        files.path(model, MANIFEST_FILE_NAME),
        serde_json::to_vec_pretty(&manifest)?,
    )?;

    tracing::info!(
        "Generated synthetic model {} with {} sectors in {}",
        model,
        writer.sectors.len(),
        dir.display()
    );
    Ok(SyntheticModel {
        root: root.to_path_buf(),
        model,
        sectors: writer.sectors.len(),
        detailed_bytes: writer.detailed_bytes,
    })
}

struct SectorWriter<'a> {
    files: &'a FileFetcher,
    model: ModelId,
    max_depth: u32,
    sectors: Vec<Value>,
    detailed_bytes: u64,
}

impl SectorWriter<'_> {
    /// Write the sector covering `bounds` (viewer space) and its descendants.
    fn write_subtree(
        &mut self,
        bounds: Aabb,
        depth: u32,
        parent: Option<u64>,
        path: &str,
    ) -> cadstream::Result<()> {
        let id = self.sectors.len() as u64;
        #[allow(clippy::cast_possible_truncation)]
        let tree_index = id as u32 + 1;
        let leaf = depth == self.max_depth;

        // Payload geometry lives in model (CDF) space.
        let cdf_bounds = bounds.transformed(&VIEWER_TO_CDF);
        let center = cdf_bounds.center();
        let extent = cdf_bounds.size().min_element() * 0.25;

        let detailed = encode_payload(
            tree_index,
            Body::Detailed(detailed_geometry(id, tree_index, center, extent, leaf)),
        );
        #[allow(clippy::cast_possible_truncation)]
        let quad_size = (extent * 2.0) as f32;
        let simple = encode_payload(
            tree_index,
            Body::Quads(pack_quads(&[Quad {
                center: center.as_vec3(),
                normal: Vec3::Z,
                size: quad_size,
                color: sector_color(depth),
                tree_index,
            }])),
        );

        let detailed_name = format!("{id}.bin");
        let simple_name = format!("{id}.faces");
        fs::write(self.files.path(self.model, &detailed_name), &detailed)?;
        fs::write(self.files.path(self.model, &simple_name), &simple)?;
        self.detailed_bytes += detailed.len() as u64;

        let diagonal = 2.0 * extent * 3f64.sqrt();
        self.sectors.push(json!({
            "id": id,
            "parentId": parent.map_or(-1, |p| i64::try_from(p).unwrap_or(-1)),
            "path": path,
            "depth": depth,
            "boundingBox": {
                "min": { "x": cdf_bounds.min.x, "y": cdf_bounds.min.y, "z": cdf_bounds.min.z },
                "max": { "x": cdf_bounds.max.x, "y": cdf_bounds.max.y, "z": cdf_bounds.max.z },
            },
            "estimatedDrawCallCount": if leaf { 2 } else { 1 },
            "sectorFileName": detailed_name,
            "downloadSize": detailed.len(),
            "maxDiagonalLength": diagonal,
            "minDiagonalLength": if leaf { diagonal * 0.1 } else { diagonal },
            "facesFile": {
                "fileName": simple_name,
                "downloadSize": simple.len(),
            },
        }));

        if leaf {
            return Ok(());
        }
        for octant in 0..8u32 {
            let pick = |bit: u32, lo: f64, hi: f64| {
                if octant & bit == 0 { (lo, center_of(lo, hi)) } else { (center_of(lo, hi), hi) }
            };
            let (x0, x1) = pick(1, bounds.min.x, bounds.max.x);
            let (y0, y1) = pick(2, bounds.min.y, bounds.max.y);
            let (z0, z1) = pick(4, bounds.min.z, bounds.max.z);
            let child = Aabb::new(DVec3::new(x0, y0, z0), DVec3::new(x1, y1, z1))?;
            self.write_subtree(child, depth + 1, Some(id), &format!("{path}{octant}/"))?;
        }
        Ok(())
    }
}

fn center_of(lo: f64, hi: f64) -> f64 {
    (lo + hi) * 0.5
}

#[allow(clippy::cast_possible_truncation)]
fn sector_color(depth: u32) -> [u8; 4] {
    let shade = 255u32.saturating_sub(depth * 40) as u8;
    [shade, 180, 120, 255]
}

/// Axis-aligned box centred on `center` with half-size `extent`.
#[allow(clippy::cast_possible_truncation)]
fn box_vertices(center: DVec3, extent: f64) -> Vec<Vec3> {
    let c = center.as_vec3();
    let e = extent as f32;
    [
        (-1.0, -1.0, -1.0),
        (1.0, -1.0, -1.0),
        (1.0, 1.0, -1.0),
        (-1.0, 1.0, -1.0),
        (-1.0, -1.0, 1.0),
        (1.0, -1.0, 1.0),
        (1.0, 1.0, 1.0),
        (-1.0, 1.0, 1.0),
    ]
    .into_iter()
    .map(|(x, y, z)| c + Vec3::new(x, y, z) * e)
    .collect()
}

fn detailed_geometry(
    id: u64,
    tree_index: u32,
    center: DVec3,
    extent: f64,
    leaf: bool,
) -> DetailedGeometry {
    #[allow(clippy::cast_possible_truncation)]
    let file_id = id as u32;
    let body = TriangleMeshFile {
        file_id,
        vertices: pack_vertices(&box_vertices(center, extent)),
        indices: pack_indices(&BOX_INDICES),
        triangle_counts: vec![12],
        tree_indices: vec![tree_index],
        colors: vec![200, 200, 210, 255],
    };

    let mut instanced_meshes = Vec::new();
    if leaf {
        #[allow(clippy::cast_possible_truncation)]
        let scale = (extent * 0.1) as f32;
        let instances = [-1.0f32, 1.0]
            .into_iter()
            .map(|side| {
                let offset = Vec3::new(side * 1.5, 0.0, 0.0) * (scale * 10.0);
                let matrix = Mat4::from_scale_rotation_translation(
                    Vec3::splat(scale),
                    Quat::IDENTITY,
                    center.as_vec3() + offset,
                );
                MeshInstance {
                    triangle_offset: 0,
                    triangle_count: 12,
                    matrix: matrix.to_cols_array().to_vec(),
                    tree_index,
                    color: 0x8080_80ff,
                }
            })
            .collect();
        instanced_meshes.push(InstancedMeshFile {
            file_id: file_id + 1_000_000,
            vertices: pack_vertices(&box_vertices(DVec3::ZERO, 1.0)),
            indices: pack_indices(&BOX_INDICES),
            instances,
        });
    }

    DetailedGeometry {
        triangle_meshes: vec![body],
        instanced_meshes,
    }
}
