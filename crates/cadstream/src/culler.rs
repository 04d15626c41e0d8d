//! Camera-driven sector selection.
//!
//! A culler walks a model's sector tree and emits every sector worth loading
//! for the current camera, each with a priority and the level of detail it
//! should be loaded at. Culling is synchronous and never touches the network.

use std::collections::HashMap;

use glam::DMat4;
use serde::Deserialize;

use crate::camera::{CameraState, Plane};
use crate::coords::TransformedPoints;
use crate::metadata::{
    LevelOfDetail, ModelId, SectorCost, SectorId, SectorKey, SectorMetadata, SectorScene,
};

/// Read access to which sectors are currently resident, and at which level.
pub trait LoadedSectors {
    fn loaded_lod(&self, key: SectorKey) -> Option<LevelOfDetail>;
}

impl LoadedSectors for HashMap<SectorKey, LevelOfDetail> {
    fn loaded_lod(&self, key: SectorKey) -> Option<LevelOfDetail> {
        self.get(&key).copied()
    }
}

/// No sectors loaded.
impl LoadedSectors for () {
    fn loaded_lod(&self, _key: SectorKey) -> Option<LevelOfDetail> {
        None
    }
}

/// Everything a culling pass looks at.
pub struct DetermineSectorsInput<'a> {
    pub camera: &'a CameraState,
    pub scene: &'a SectorScene,
    pub model: ModelId,
    /// Placement of the model in the viewer scene, applied to sector bounds.
    pub model_matrix: DMat4,
    pub loaded: &'a dyn LoadedSectors,
    pub clipping_planes: &'a [Plane],
}

/// A sector selected by culling, not yet filtered by the budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateSector {
    pub model: ModelId,
    pub sector_id: SectorId,
    /// Higher is more important. Only meaningful relative to other candidates.
    pub priority: f64,
    pub lod: LevelOfDetail,
    pub depth: u32,
    /// Estimated cost at `lod`.
    pub cost: SectorCost,
}

impl CandidateSector {
    #[must_use]
    pub fn key(&self) -> SectorKey {
        SectorKey::new(self.model, self.sector_id)
    }
}

/// Selects the sectors to load for a camera.
pub trait SectorCuller: Send + Sync {
    /// Candidates ordered by priority (descending), then depth and sector id
    /// (ascending). Empty for an empty scene or an unusable camera.
    fn determine_sectors(&self, input: &DetermineSectorsInput<'_>) -> Vec<CandidateSector>;
}

/// Tuning for [`FrustumSectorCuller`].
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct CullerSettings {
    /// Sectors closer than this (metres) are always wanted in full detail.
    pub near_field_distance: f64,
    /// Priority added to near-field sectors. Above 1 they outrank any
    /// far-field sector, whose priority is bounded by its screen coverage.
    pub near_field_boost: f64,
    /// Screen coverage above which a sector is loaded at full detail.
    pub detail_screen_threshold: f64,
    /// Sectors (and their subtrees) covering less than this are skipped.
    pub min_screen_size: f64,
    /// Priority added to sectors already resident at the wanted level, so a
    /// stationary camera does not swap between equally ranked sectors.
    pub loaded_bonus: f64,
}

impl Default for CullerSettings {
    fn default() -> Self {
        Self {
            near_field_distance: 10.0,
            near_field_boost: 2.0,
            detail_screen_threshold: 0.1,
            min_screen_size: 0.001,
            loaded_bonus: 0.01,
        }
    }
}

/// Frustum and clipping-plane culler with a screen-size priority heuristic.
#[derive(Debug, Clone, Default)]
pub struct FrustumSectorCuller {
    settings: CullerSettings,
}

impl FrustumSectorCuller {
    #[must_use]
    pub fn new(settings: CullerSettings) -> Self {
        Self { settings }
    }

    #[must_use]
    pub fn settings(&self) -> &CullerSettings {
        &self.settings
    }

    fn choose_lod(&self, sector: &SectorMetadata, near_field: bool, coverage: f64) -> LevelOfDetail {
        let wants_detail = near_field || coverage > self.settings.detail_screen_threshold;
        match (
            sector.has_lod(LevelOfDetail::Simple),
            sector.has_lod(LevelOfDetail::Detailed),
        ) {
            (true, true) if !wants_detail => LevelOfDetail::Simple,
            (true, false) => LevelOfDetail::Simple,
            _ => LevelOfDetail::Detailed,
        }
    }
}

/// Whether any clipping plane has all `corners` behind it.
fn clipped(corners: &mut TransformedPoints<'_>, planes: &[Plane]) -> bool {
    planes.iter().any(|plane| {
        corners.restart();
        plane.all_behind(corners.by_ref())
    })
}

impl SectorCuller for FrustumSectorCuller {
    fn determine_sectors(&self, input: &DetermineSectorsInput<'_>) -> Vec<CandidateSector> {
        if input.scene.is_empty() {
            return Vec::new();
        }
        let Some(frustum) = input.camera.frustum() else {
            tracing::debug!("Degenerate camera {:?}, no sectors selected", input.camera);
            return Vec::new();
        };

        let settings = &self.settings;
        let mut candidates = Vec::new();
        let mut visited = 0usize;

        input.scene.traverse(|sector| {
            visited += 1;
            let bounds = sector.bounds.transformed(&input.model_matrix);
            if !frustum.intersects_aabb(&bounds) {
                return false;
            }
            let corners = bounds.corners();
            let mut points = TransformedPoints::new(&corners, DMat4::IDENTITY);
            if clipped(&mut points, input.clipping_planes) {
                return false;
            }

            let distance = bounds.distance_to(input.camera.position);
            let near_field = distance <= settings.near_field_distance;
            let coverage = input.camera.projected_size(&bounds);
            if !near_field && coverage < settings.min_screen_size {
                return false;
            }

            if sector.has_geometry() {
                let lod = self.choose_lod(sector, near_field, coverage);
                let key = SectorKey::new(input.model, sector.id);
                let mut priority = coverage;
                if near_field {
                    priority += settings.near_field_boost;
                }
                if input.loaded.loaded_lod(key) == Some(lod) {
                    priority += settings.loaded_bonus;
                }
                candidates.push(CandidateSector {
                    model: input.model,
                    sector_id: sector.id,
                    priority,
                    lod,
                    depth: sector.depth,
                    cost: input.scene.cost(sector.id, lod).unwrap_or_default(),
                });
            }
            true
        });

        sort_candidates(&mut candidates);
        tracing::debug!(
            "Culled model {}: {} candidates from {} visited sectors",
            input.model,
            candidates.len(),
            visited
        );
        candidates
    }
}

/// Priority descending, then depth and sector id ascending.
pub fn sort_candidates(candidates: &mut [CandidateSector]) {
    candidates.sort_by(|a, b| {
        b.priority
            .total_cmp(&a.priority)
            .then_with(|| a.depth.cmp(&b.depth))
            .then_with(|| a.model.cmp(&b.model))
            .then_with(|| a.sector_id.cmp(&b.sector_id))
    });
}

#[cfg(test)]
mod tests {
    use glam::DVec3;
    use serde_json::{Value, json};

    use super::*;
    use crate::manifest::parse_manifest;

    const MODEL: ModelId = ModelId::new(1, 1);

    /// Manifest sector with both levels; bounds given in viewer space.
    fn sector(id: u64, parent: i64, depth: u32, min: [f64; 3], max: [f64; 3]) -> Value {
        // Viewer (x, y, z) is CDF (x, -z, y).
        json!({
            "id": id,
            "parentId": parent,
            "depth": depth,
            "boundingBox": {
                "min": { "x": min[0], "y": -max[2], "z": min[1] },
                "max": { "x": max[0], "y": -min[2], "z": max[1] },
            },
            "estimatedDrawCallCount": 4,
            "sectorFileName": format!("{id}.bin"),
            "downloadSize": 1000,
            "facesFile": { "fileName": format!("{id}.faces"), "downloadSize": 100 },
        })
    }

    /// Root spanning [-100, 100]^3 with children along -Z.
    fn scene() -> SectorScene {
        parse_manifest(&json!({
            "version": 9,
            "sectors": [
                sector(0, -1, 0, [-100.0; 3], [100.0; 3]),
                sector(1, 0, 1, [-1.0, -1.0, -8.0], [1.0, 1.0, -6.0]),
                sector(2, 0, 1, [-20.0, -20.0, -90.0], [20.0, 20.0, -50.0]),
                sector(3, 0, 1, [-1.0, -1.0, 50.0], [1.0, 1.0, 52.0]),
            ],
        }))
        .unwrap()
    }

    fn run(
        culler: &FrustumSectorCuller,
        camera: &CameraState,
        scene: &SectorScene,
        loaded: &dyn LoadedSectors,
        planes: &[Plane],
    ) -> Vec<CandidateSector> {
        culler.determine_sectors(&DetermineSectorsInput {
            camera,
            scene,
            model: MODEL,
            model_matrix: DMat4::IDENTITY,
            loaded,
            clipping_planes: planes,
        })
    }

    fn ids(candidates: &[CandidateSector]) -> Vec<u64> {
        candidates.iter().map(|c| c.sector_id.0).collect()
    }

    #[test]
    fn empty_scene_yields_nothing() {
        let culler = FrustumSectorCuller::default();
        let scene = SectorScene::empty(9);
        assert!(run(&culler, &CameraState::default(), &scene, &(), &[]).is_empty());
    }

    #[test]
    fn degenerate_camera_yields_nothing() {
        let culler = FrustumSectorCuller::default();
        let camera = CameraState {
            near: -1.0,
            ..CameraState::default()
        };
        assert!(run(&culler, &camera, &scene(), &(), &[]).is_empty());
    }

    #[test]
    fn sectors_behind_camera_are_excluded() {
        let culler = FrustumSectorCuller::default();
        let candidates = run(&culler, &CameraState::default(), &scene(), &(), &[]);
        let ids = ids(&candidates);
        assert!(ids.contains(&1));
        assert!(ids.contains(&2));
        assert!(!ids.contains(&3));
    }

    #[test]
    fn near_sector_outranks_larger_distant_sector() {
        let culler = FrustumSectorCuller::default();
        let candidates = run(&culler, &CameraState::default(), &scene(), &(), &[]);
        let position = |id| candidates.iter().position(|c| c.sector_id == SectorId(id));
        assert!(position(1) < position(2));
        let near = candidates.iter().find(|c| c.sector_id == SectorId(1)).unwrap();
        assert_eq!(near.lod, LevelOfDetail::Detailed);
        assert_eq!(near.cost, SectorCost::new(1000, 4));
    }

    #[test]
    fn low_coverage_sector_uses_simple_geometry() {
        let culler = FrustumSectorCuller::new(CullerSettings {
            detail_screen_threshold: 1.0,
            ..CullerSettings::default()
        });
        let candidates = run(&culler, &CameraState::default(), &scene(), &(), &[]);
        let far = candidates.iter().find(|c| c.sector_id == SectorId(2)).unwrap();
        assert_eq!(far.lod, LevelOfDetail::Simple);
        assert_eq!(far.cost, SectorCost::new(100, 1));
    }

    #[test]
    fn culling_is_idempotent() {
        let culler = FrustumSectorCuller::default();
        let scene = scene();
        let camera = CameraState::looking_at(DVec3::new(3.0, 2.0, 5.0), DVec3::new(0.0, 0.0, -60.0));
        let first = run(&culler, &camera, &scene, &(), &[]);
        let second = run(&culler, &camera, &scene, &(), &[]);
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn output_is_sorted() {
        let culler = FrustumSectorCuller::default();
        let candidates = run(&culler, &CameraState::default(), &scene(), &(), &[]);
        for pair in candidates.windows(2) {
            assert!(pair[0].priority >= pair[1].priority);
        }
    }

    #[test]
    fn equal_priorities_order_coarser_sectors_first() {
        let culler = FrustumSectorCuller::default();
        // The camera sits inside the root and both children: full coverage, near field.
        let scene = parse_manifest(&json!({
            "version": 9,
            "sectors": [
                sector(0, -1, 0, [-100.0; 3], [100.0; 3]),
                sector(7, 0, 1, [-2.0; 3], [8.0; 3]),
                sector(4, 0, 1, [-5.0; 3], [5.0; 3]),
            ],
        }))
        .unwrap();
        let candidates = run(&culler, &CameraState::default(), &scene, &(), &[]);
        assert_eq!(ids(&candidates), vec![0, 4, 7]);
        assert!(
            candidates
                .iter()
                .all(|c| (c.priority - candidates[0].priority).abs() < 1e-12)
        );
    }

    #[test]
    fn sort_breaks_ties_by_depth_then_model_then_id() {
        let candidate = |model: ModelId, id: u64, depth: u32, priority: f64| CandidateSector {
            model,
            sector_id: SectorId(id),
            priority,
            lod: LevelOfDetail::Detailed,
            depth,
            cost: SectorCost::default(),
        };
        let other = ModelId::new(2, 1);
        let mut candidates = vec![
            candidate(MODEL, 9, 2, 1.0),
            candidate(other, 1, 1, 1.0),
            candidate(MODEL, 5, 1, 1.0),
            candidate(MODEL, 3, 1, 1.0),
            candidate(MODEL, 8, 0, 0.5),
            candidate(MODEL, 2, 3, 2.0),
        ];
        sort_candidates(&mut candidates);
        let order: Vec<(ModelId, u64)> = candidates
            .iter()
            .map(|c| (c.model, c.sector_id.0))
            .collect();
        assert_eq!(
            order,
            vec![
                (MODEL, 2),
                (MODEL, 3),
                (MODEL, 5),
                (other, 1),
                (MODEL, 9),
                (MODEL, 8),
            ]
        );
    }

    #[test]
    fn clipping_plane_removes_sector_entirely_behind_it() {
        let culler = FrustumSectorCuller::default();
        // Keep only z > -20: sector 2 (z in [-90, -50]) is fully behind.
        let plane = Plane::from_point_normal(DVec3::new(0.0, 0.0, -20.0), DVec3::Z).unwrap();
        let candidates = run(&culler, &CameraState::default(), &scene(), &(), &[plane]);
        let ids = ids(&candidates);
        assert!(ids.contains(&1));
        assert!(!ids.contains(&2));
    }

    #[test]
    fn partially_clipped_sector_is_kept() {
        let culler = FrustumSectorCuller::default();
        let plane = Plane::from_point_normal(DVec3::new(0.0, 0.0, -70.0), DVec3::Z).unwrap();
        let candidates = run(&culler, &CameraState::default(), &scene(), &(), &[plane]);
        assert!(ids(&candidates).contains(&2));
    }

    #[test]
    fn loaded_sectors_win_ties() {
        let culler = FrustumSectorCuller::default();
        let scene = parse_manifest(&json!({
            "version": 9,
            "sectors": [
                sector(0, -1, 0, [-100.0; 3], [100.0; 3]),
                sector(1, 0, 1, [-11.0, -1.0, -60.0], [-9.0, 1.0, -58.0]),
                sector(2, 0, 1, [9.0, -1.0, -60.0], [11.0, 1.0, -58.0]),
            ],
        }))
        .unwrap();

        let unloaded = run(&culler, &CameraState::default(), &scene, &(), &[]);
        let position = |c: &[CandidateSector], id| c.iter().position(|s| s.sector_id == SectorId(id));
        assert!(position(&unloaded, 1) < position(&unloaded, 2));

        let lod = unloaded
            .iter()
            .find(|c| c.sector_id == SectorId(2))
            .unwrap()
            .lod;
        let loaded: HashMap<SectorKey, LevelOfDetail> =
            [(SectorKey::new(MODEL, SectorId(2)), lod)].into_iter().collect();
        let with_loaded = run(&culler, &CameraState::default(), &scene, &loaded, &[]);
        assert!(position(&with_loaded, 2) < position(&with_loaded, 1));
    }

    #[test]
    fn model_matrix_moves_sectors() {
        let culler = FrustumSectorCuller::default();
        let scene = scene();
        let candidates = culler.determine_sectors(&DetermineSectorsInput {
            camera: &CameraState::default(),
            scene: &scene,
            model: MODEL,
            model_matrix: DMat4::from_translation(DVec3::new(0.0, 0.0, -200.0)),
            loaded: &(),
            clipping_planes: &[],
        });
        // Sector 3 now sits in front of the camera.
        assert!(ids(&candidates).contains(&3));
    }
}
