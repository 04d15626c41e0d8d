//! Camera snapshots and frustum geometry.
//!
//! The host hands the streamer one [`CameraState`] per frame. Everything the
//! culler needs (view-projection, frustum planes, projected sizes) is derived
//! from that snapshot.

use glam::{DMat3, DMat4, DQuat, DVec3, DVec4};

use crate::coords::Aabb;

/// Immutable camera snapshot in viewer space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraState {
    pub position: DVec3,
    pub rotation: DQuat,
    /// Vertical field of view in radians.
    pub fov_y: f64,
    /// Viewport width divided by height.
    pub aspect: f64,
    pub near: f64,
    pub far: f64,
}

impl Default for CameraState {
    fn default() -> Self {
        Self {
            position: DVec3::ZERO,
            rotation: DQuat::IDENTITY,
            fov_y: 60f64.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 10_000.0,
        }
    }
}

impl CameraState {
    /// A camera at `eye` looking at `target`, with Y up.
    #[must_use]
    pub fn looking_at(eye: DVec3, target: DVec3) -> Self {
        Self {
            position: eye,
            rotation: look_rotation(target - eye),
            ..Self::default()
        }
    }

    /// Whether the snapshot can produce a usable frustum.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.position.is_finite()
            && self.rotation.is_finite()
            && self.rotation.length_squared() > f64::EPSILON
            && self.fov_y.is_finite()
            && self.fov_y > 0.0
            && self.fov_y < std::f64::consts::PI
            && self.aspect.is_finite()
            && self.aspect > 0.0
            && self.near.is_finite()
            && self.near > 0.0
            && self.far.is_finite()
            && self.far > self.near
    }

    /// Direction the camera looks in.
    #[must_use]
    pub fn forward(&self) -> DVec3 {
        self.rotation.normalize() * DVec3::NEG_Z
    }

    #[must_use]
    pub fn view_matrix(&self) -> DMat4 {
        DMat4::from_rotation_translation(self.rotation.normalize(), self.position).inverse()
    }

    #[must_use]
    pub fn projection_matrix(&self) -> DMat4 {
        DMat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }

    #[must_use]
    pub fn view_projection(&self) -> DMat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// The view frustum, or `None` for a degenerate camera.
    #[must_use]
    pub fn frustum(&self) -> Option<Frustum> {
        if !self.is_valid() {
            return None;
        }
        Frustum::from_view_projection(&self.view_projection())
    }

    /// Approximate fraction of the viewport height covered by `bounds`,
    /// clamped to `[0, 1]`. A camera inside the box sees full coverage.
    #[must_use]
    pub fn projected_size(&self, bounds: &Aabb) -> f64 {
        let distance = bounds.distance_to(self.position);
        if distance <= 0.0 {
            return 1.0;
        }
        let radius = bounds.diagonal() * 0.5;
        let half_height = distance.max(self.near) * (self.fov_y * 0.5).tan();
        (radius / half_height).clamp(0.0, 1.0)
    }
}

/// Rotation that points the camera's -Z axis along `direction`.
fn look_rotation(direction: DVec3) -> DQuat {
    let forward = direction.normalize_or_zero();
    if forward == DVec3::ZERO {
        return DQuat::IDENTITY;
    }
    let up = if forward.dot(DVec3::Y).abs() > 0.999 {
        DVec3::Z
    } else {
        DVec3::Y
    };
    let right = forward.cross(up).normalize();
    let up = right.cross(forward);
    DQuat::from_mat3(&DMat3::from_cols(right, up, -forward))
}

/// A plane `normal . p + d = 0`. Points with positive signed distance are on
/// the front side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: DVec3,
    pub d: f64,
}

impl Plane {
    /// Build a plane, normalizing its equation. `None` for a zero normal.
    #[must_use]
    pub fn new(normal: DVec3, d: f64) -> Option<Self> {
        let length = normal.length();
        if !length.is_finite() || length < f64::EPSILON || !d.is_finite() {
            return None;
        }
        Some(Self {
            normal: normal / length,
            d: d / length,
        })
    }

    /// Plane through `point` facing `normal`.
    #[must_use]
    pub fn from_point_normal(point: DVec3, normal: DVec3) -> Option<Self> {
        Self::new(normal, -normal.dot(point))
    }

    fn from_vec4(v: DVec4) -> Option<Self> {
        Self::new(v.truncate(), v.w)
    }

    #[must_use]
    pub fn signed_distance(&self, point: DVec3) -> f64 {
        self.normal.dot(point) + self.d
    }

    /// Whether every point lies strictly behind the plane.
    pub fn all_behind(&self, points: impl IntoIterator<Item = DVec3>) -> bool {
        points.into_iter().all(|p| self.signed_distance(p) < 0.0)
    }
}

/// Six inward-facing frustum planes: left, right, bottom, top, near, far.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Extract planes from a view-projection matrix with a `[0, 1]` depth
    /// range (Gribb-Hartmann). `None` if any plane is degenerate.
    #[must_use]
    pub fn from_view_projection(m: &DMat4) -> Option<Self> {
        let (r0, r1, r2, r3) = (m.row(0), m.row(1), m.row(2), m.row(3));
        Some(Self {
            planes: [
                Plane::from_vec4(r3 + r0)?,
                Plane::from_vec4(r3 - r0)?,
                Plane::from_vec4(r3 + r1)?,
                Plane::from_vec4(r3 - r1)?,
                Plane::from_vec4(r2)?,
                Plane::from_vec4(r3 - r2)?,
            ],
        })
    }

    /// Conservative box test: `false` only when the box is fully outside one
    /// of the planes.
    #[must_use]
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.planes.iter().all(|plane| {
            let positive = DVec3::select(plane.normal.cmpge(DVec3::ZERO), aabb.max, aabb.min);
            plane.signed_distance(positive) >= 0.0
        })
    }

    #[must_use]
    pub fn contains_point(&self, point: DVec3) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.signed_distance(point) >= 0.0)
    }
}
