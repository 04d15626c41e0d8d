//! Scripted fly-through camera.
//!
//! Approaches a target while orbiting it, with distance-based speed scaling:
//! fast when far away, slow close to the model. Produces a
//! [`CameraState`] snapshot per frame for the streamer.

use cadstream::{Aabb, CameraState};
use glam::{DQuat, DVec3};

/// Minimum approach speed in metres per second.
pub const MIN_SPEED: f64 = 0.5;
/// Maximum approach speed in metres per second.
pub const MAX_SPEED: f64 = 25_000.0;

/// Settings for the scripted flight.
#[derive(Debug, Clone, Copy)]
pub struct CameraSettings {
    /// Speed multiplier applied to the distance-based speed.
    pub base_speed: f64,
    /// Orbit rate around the target in radians per second.
    pub orbit_rate: f64,
    /// Closest approach as a fraction of the starting distance.
    pub min_distance_factor: f64,
    /// Vertical field of view in degrees.
    pub fov_y_degrees: f64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            base_speed: 1.0,
            orbit_rate: 0.2,
            min_distance_factor: 0.05,
            fov_y_degrees: 60.0,
        }
    }
}

/// Camera flying toward and around a target point.
#[derive(Debug, Clone)]
pub struct FlightCamera {
    pub settings: CameraSettings,
    pub target: DVec3,
    pub position: DVec3,
    /// Current direction the camera is facing (normalized).
    pub direction: DVec3,
    min_distance: f64,
    far: f64,
}

impl FlightCamera {
    /// Start above and in front of `bounds`, looking at its centre.
    #[must_use]
    pub fn framing(bounds: &Aabb, settings: CameraSettings) -> Self {
        let target = bounds.center();
        let distance = bounds.diagonal().max(1.0);
        let position = target + DVec3::new(0.3, 0.5, 1.0).normalize() * distance * 1.5;
        Self {
            settings,
            target,
            position,
            direction: (target - position).normalize(),
            min_distance: distance * settings.min_distance_factor,
            far: distance * 10.0,
        }
    }

    #[must_use]
    pub fn distance(&self) -> f64 {
        self.position.distance(self.target)
    }

    /// Advance the flight by `dt` seconds.
    pub fn advance(&mut self, dt: f64) {
        let distance = self.distance();

        // Speed scales with distance: faster when far, slower when close.
        let speed = (distance * 0.25 * self.settings.base_speed).clamp(MIN_SPEED, MAX_SPEED);
        let step = (speed * dt).min((distance - self.min_distance).max(0.0));
        let toward = (self.target - self.position).normalize_or_zero();
        self.position += toward * step;

        let orbit = DQuat::from_rotation_y(self.settings.orbit_rate * dt);
        self.position = self.target + orbit * (self.position - self.target);
        self.direction = (self.target - self.position).normalize_or(self.direction);
    }

    /// Rotate the view by `yaw` and `pitch` radians around the Y-up frame.
    pub fn look(&mut self, yaw: f64, pitch: f64) {
        let up = DVec3::Y;

        // Prevent looking straight up or down.
        let overhead = self.direction.dot(up);
        let pitch = if (overhead > 0.99 && pitch > 0.0) || (overhead < -0.99 && pitch < 0.0) {
            0.0
        } else {
            pitch
        };

        let pitch_axis = self.direction.cross(up).normalize_or(DVec3::X);
        let yaw_rotation = DQuat::from_axis_angle(up, -yaw);
        let pitch_rotation = DQuat::from_axis_angle(pitch_axis, pitch);
        self.direction = (yaw_rotation * pitch_rotation * self.direction).normalize();
    }

    /// Snapshot for this frame.
    #[must_use]
    pub fn state(&self) -> CameraState {
        CameraState {
            fov_y: self.settings.fov_y_degrees.to_radians(),
            far: self.far,
            ..CameraState::looking_at(self.position, self.position + self.direction)
        }
    }
}
