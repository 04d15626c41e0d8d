//! The sector scene model.
//!
//! A [`SectorScene`] holds the complete spatial tree of one model revision.
//! It is built once by the manifest parser, never mutated afterwards, and
//! shared read-only (via `Arc`) between the culler, the budget and the loader.

use std::collections::HashMap;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

use crate::coords::Aabb;

/// Identifier of a sector within one model revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SectorId(pub u64);

impl fmt::Display for SectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifies a model revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelId {
    pub model_id: u64,
    pub revision_id: u64,
}

impl ModelId {
    #[must_use]
    pub const fn new(model_id: u64, revision_id: u64) -> Self {
        Self {
            model_id,
            revision_id,
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.model_id, self.revision_id)
    }
}

/// Identifies a sector across all loaded models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectorKey {
    pub model: ModelId,
    pub sector: SectorId,
}

impl SectorKey {
    #[must_use]
    pub const fn new(model: ModelId, sector: SectorId) -> Self {
        Self { model, sector }
    }
}

impl fmt::Display for SectorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.model, self.sector)
    }
}

/// Geometry representation of a sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LevelOfDetail {
    /// Coloured quads approximating the sector.
    Simple,
    /// Full triangle and instanced meshes.
    Detailed,
}

impl fmt::Display for LevelOfDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple => f.write_str("simple"),
            Self::Detailed => f.write_str("detailed"),
        }
    }
}

/// Estimated cost of holding one sector at one level of detail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectorCost {
    pub download_size: u64,
    pub draw_calls: u64,
}

impl SectorCost {
    pub const ZERO: Self = Self {
        download_size: 0,
        draw_calls: 0,
    };

    #[must_use]
    pub const fn new(download_size: u64, draw_calls: u64) -> Self {
        Self {
            download_size,
            draw_calls,
        }
    }

    #[must_use]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self {
            download_size: self.download_size.saturating_sub(rhs.download_size),
            draw_calls: self.draw_calls.saturating_sub(rhs.draw_calls),
        }
    }
}

impl Add for SectorCost {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            download_size: self.download_size.saturating_add(rhs.download_size),
            draw_calls: self.draw_calls.saturating_add(rhs.draw_calls),
        }
    }
}

impl AddAssign for SectorCost {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for SectorCost {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

/// One downloadable representation of a sector.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailLevel {
    pub lod: LevelOfDetail,
    pub file_name: String,
    pub cost: SectorCost,
}

/// A node in the spatial tree.
#[derive(Debug, Clone, PartialEq)]
pub struct SectorMetadata {
    pub id: SectorId,
    pub parent_id: Option<SectorId>,
    pub path: String,
    pub depth: u32,
    /// Bounds in viewer space.
    pub bounds: Aabb,
    pub children: Vec<SectorId>,
    pub detail_levels: Vec<DetailLevel>,
    pub min_diagonal_length: Option<f64>,
    pub max_diagonal_length: Option<f64>,
}

impl SectorMetadata {
    /// The representation at `lod`, if the sector has one.
    #[must_use]
    pub fn detail_level(&self, lod: LevelOfDetail) -> Option<&DetailLevel> {
        self.detail_levels.iter().find(|level| level.lod == lod)
    }

    #[must_use]
    pub fn has_lod(&self, lod: LevelOfDetail) -> bool {
        self.detail_level(lod).is_some()
    }

    /// Whether the sector has any geometry to load at all.
    #[must_use]
    pub fn has_geometry(&self) -> bool {
        !self.detail_levels.is_empty()
    }
}

/// All sectors of one model revision, indexed by id.
#[derive(Debug, Clone)]
pub struct SectorScene {
    version: u32,
    max_tree_index: u64,
    unit: String,
    root: Option<SectorId>,
    sectors: HashMap<SectorId, SectorMetadata>,
    max_depth: u32,
    max_sector_size: u64,
}

impl SectorScene {
    /// A scene with no sectors.
    #[must_use]
    pub fn empty(version: u32) -> Self {
        Self {
            version,
            max_tree_index: 0,
            unit: "Meters".to_string(),
            root: None,
            sectors: HashMap::new(),
            max_depth: 0,
            max_sector_size: 0,
        }
    }

    /// Assemble a scene from validated sectors. Callers guarantee the tree
    /// invariants (single root, parents present, children linked).
    pub(crate) fn from_validated(
        version: u32,
        max_tree_index: u64,
        unit: String,
        root: Option<SectorId>,
        sectors: HashMap<SectorId, SectorMetadata>,
    ) -> Self {
        let max_depth = sectors.values().map(|s| s.depth).max().unwrap_or(0);
        let max_sector_size = sectors
            .values()
            .flat_map(|s| s.detail_levels.iter().map(|l| l.cost.download_size))
            .max()
            .unwrap_or(0);
        Self {
            version,
            max_tree_index,
            unit,
            root,
            sectors,
            max_depth,
            max_sector_size,
        }
    }

    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[must_use]
    pub fn max_tree_index(&self) -> u64 {
        self.max_tree_index
    }

    #[must_use]
    pub fn unit(&self) -> &str {
        &self.unit
    }

    #[must_use]
    pub fn root(&self) -> Option<&SectorMetadata> {
        self.root.and_then(|id| self.sectors.get(&id))
    }

    #[must_use]
    pub fn root_id(&self) -> Option<SectorId> {
        self.root
    }

    /// Deepest sector depth in the tree.
    #[must_use]
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Largest download size of any detail level in the tree.
    #[must_use]
    pub fn max_sector_size(&self) -> u64 {
        self.max_sector_size
    }

    #[must_use]
    pub fn get(&self, id: SectorId) -> Option<&SectorMetadata> {
        self.sectors.get(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }

    /// All sectors, in no particular order.
    pub fn sectors(&self) -> impl Iterator<Item = &SectorMetadata> {
        self.sectors.values()
    }

    /// Estimated cost of `id` at `lod`.
    #[must_use]
    pub fn cost(&self, id: SectorId, lod: LevelOfDetail) -> Option<SectorCost> {
        self.get(id)?.detail_level(lod).map(|level| level.cost)
    }

    /// Children of `id`. Empty for leaves and unknown ids.
    pub fn children(&self, id: SectorId) -> impl Iterator<Item = &SectorMetadata> {
        self.get(id)
            .into_iter()
            .flat_map(|s| s.children.iter())
            .filter_map(|child| self.sectors.get(child))
    }

    /// Walk from `id` up to the root, starting with `id` itself.
    pub fn ancestors(&self, id: SectorId) -> impl Iterator<Item = &SectorMetadata> {
        std::iter::successors(self.get(id), |s| s.parent_id.and_then(|p| self.get(p)))
    }

    /// Depth-first pre-order traversal from the root. `visit` returns whether
    /// to descend into the sector's children.
    pub fn traverse(&self, mut visit: impl FnMut(&SectorMetadata) -> bool) {
        let mut stack: Vec<&SectorMetadata> = self.root().into_iter().collect();
        while let Some(sector) = stack.pop() {
            if visit(sector) {
                stack.extend(
                    sector
                        .children
                        .iter()
                        .rev()
                        .filter_map(|child| self.sectors.get(child)),
                );
            }
        }
    }
}
