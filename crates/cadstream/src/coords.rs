//! Coordinate system conversion between CDF (Z-up) and viewer (Y-up) space.
//!
//! Every bounding box enters the core in CDF space and is converted exactly
//! once, at the manifest boundary. Everything downstream (culling, budget,
//! composition) works in viewer space.

use glam::{DMat4, DVec3, DVec4};
use serde::Deserialize;

use crate::error::{Error, Result};

/// CDF to viewer space: `(x, y, z) -> (x, z, -y)`.
pub const CDF_TO_VIEWER: DMat4 = DMat4::from_cols(
    DVec4::new(1.0, 0.0, 0.0, 0.0),
    DVec4::new(0.0, 0.0, -1.0, 0.0),
    DVec4::new(0.0, 1.0, 0.0, 0.0),
    DVec4::new(0.0, 0.0, 0.0, 1.0),
);

/// Viewer to CDF space: `(x, y, z) -> (x, -z, y)`.
pub const VIEWER_TO_CDF: DMat4 = DMat4::from_cols(
    DVec4::new(1.0, 0.0, 0.0, 0.0),
    DVec4::new(0.0, 0.0, 1.0, 0.0),
    DVec4::new(0.0, -1.0, 0.0, 0.0),
    DVec4::new(0.0, 0.0, 0.0, 1.0),
);

/// A point as it appears in a manifest: `{"x": .., "y": .., "z": ..}`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CdfPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl From<CdfPoint> for DVec3 {
    fn from(p: CdfPoint) -> Self {
        DVec3::new(p.x, p.y, p.z)
    }
}

/// An axis-aligned box in CDF space, as read from a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CdfBox {
    pub min: CdfPoint,
    pub max: CdfPoint,
}

/// Axis-aligned bounding box in viewer space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    /// Create a box, rejecting non-finite or inverted bounds.
    pub fn new(min: DVec3, max: DVec3) -> Result<Self> {
        if !min.is_finite() || !max.is_finite() {
            return Err(Error::MalformedGeometry(format!(
                "non-finite bounding box {min} - {max}"
            )));
        }
        if min.cmpgt(max).any() {
            return Err(Error::MalformedGeometry(format!(
                "inverted bounding box {min} - {max}"
            )));
        }
        Ok(Self { min, max })
    }

    /// Smallest box enclosing all points. `None` for an empty iterator.
    pub fn from_points(points: impl IntoIterator<Item = DVec3>) -> Option<Self> {
        let mut points = points.into_iter();
        let first = points.next()?;
        let (min, max) = points.fold((first, first), |(min, max), p| (min.min(p), max.max(p)));
        Some(Self { min, max })
    }

    /// The 8 corners of the box.
    #[must_use]
    pub fn corners(&self) -> [DVec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            DVec3::new(a.x, a.y, a.z),
            DVec3::new(b.x, a.y, a.z),
            DVec3::new(a.x, b.y, a.z),
            DVec3::new(b.x, b.y, a.z),
            DVec3::new(a.x, a.y, b.z),
            DVec3::new(b.x, a.y, b.z),
            DVec3::new(a.x, b.y, b.z),
            DVec3::new(b.x, b.y, b.z),
        ]
    }

    #[must_use]
    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    #[must_use]
    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }

    /// Length of the box diagonal.
    #[must_use]
    pub fn diagonal(&self) -> f64 {
        self.size().length()
    }

    /// Distance from `point` to the closest point of the box, 0 inside.
    #[must_use]
    pub fn distance_to(&self, point: DVec3) -> f64 {
        point.clamp(self.min, self.max).distance(point)
    }

    /// Whether `other` lies inside this box, allowing `tolerance` on each side.
    #[must_use]
    pub fn contains_box(&self, other: &Self, tolerance: f64) -> bool {
        other.min.cmpge(self.min - tolerance).all() && other.max.cmple(self.max + tolerance).all()
    }

    /// Axis-aligned box enclosing this box after transformation.
    #[must_use]
    pub fn transformed(&self, matrix: &DMat4) -> Self {
        let corners = self.corners();
        let mut points = TransformedPoints::new(&corners, *matrix);
        let first = points.next().unwrap_or(DVec3::ZERO);
        let (min, max) = points.fold((first, first), |(min, max), p| (min.min(p), max.max(p)));
        Self { min, max }
    }
}

/// Convert a manifest box from CDF space into a validated viewer-space box.
pub fn to_render_box(cdf: &CdfBox) -> Result<Aabb> {
    let source = Aabb::new(DVec3::from(cdf.min), DVec3::from(cdf.max))?;
    let a = CDF_TO_VIEWER.transform_point3(source.min);
    let b = CDF_TO_VIEWER.transform_point3(source.max);
    Aabb::new(a.min(b), a.max(b))
}

/// Per-model transform from CDF space into the shared viewer scene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelTransform {
    forward: DMat4,
    inverse: DMat4,
}

impl Default for ModelTransform {
    fn default() -> Self {
        Self {
            forward: CDF_TO_VIEWER,
            inverse: VIEWER_TO_CDF,
        }
    }
}

impl ModelTransform {
    /// Compose a viewer-space model placement with the CDF conversion.
    pub fn new(model_matrix: DMat4) -> Result<Self> {
        if !model_matrix.is_finite() {
            return Err(Error::MalformedGeometry(
                "model matrix has non-finite elements".to_string(),
            ));
        }
        let forward = model_matrix * CDF_TO_VIEWER;
        let determinant = forward.determinant();
        if !determinant.is_finite() || determinant.abs() < f64::EPSILON {
            return Err(Error::MalformedGeometry(
                "model matrix is not invertible".to_string(),
            ));
        }
        Ok(Self {
            forward,
            inverse: forward.inverse(),
        })
    }

    #[must_use]
    pub fn forward(&self) -> DMat4 {
        self.forward
    }

    #[must_use]
    pub fn inverse(&self) -> DMat4 {
        self.inverse
    }

    #[must_use]
    pub fn to_viewer(&self, cdf: DVec3) -> DVec3 {
        self.forward.transform_point3(cdf)
    }

    #[must_use]
    pub fn to_cdf(&self, viewer: DVec3) -> DVec3 {
        self.inverse.transform_point3(viewer)
    }
}

/// Lazily transforms a slice of points by a matrix.
///
/// The sequence is finite and restartable: [`restart`](Self::restart) rewinds
/// it, and [`retarget`](Self::retarget) swaps the matrix and rewinds without
/// touching the source points.
#[derive(Debug, Clone)]
pub struct TransformedPoints<'a> {
    points: &'a [DVec3],
    matrix: DMat4,
    cursor: usize,
}

impl<'a> TransformedPoints<'a> {
    #[must_use]
    pub fn new(points: &'a [DVec3], matrix: DMat4) -> Self {
        Self {
            points,
            matrix,
            cursor: 0,
        }
    }

    pub fn restart(&mut self) {
        self.cursor = 0;
    }

    pub fn retarget(&mut self, matrix: DMat4) {
        self.matrix = matrix;
        self.cursor = 0;
    }

    #[must_use]
    pub fn matrix(&self) -> DMat4 {
        self.matrix
    }
}

impl Iterator for TransformedPoints<'_> {
    type Item = DVec3;

    fn next(&mut self) -> Option<DVec3> {
        let point = self.points.get(self.cursor)?;
        self.cursor += 1;
        Some(self.matrix.transform_point3(*point))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.points.len() - self.cursor;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for TransformedPoints<'_> {}
