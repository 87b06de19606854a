//! Per-client transmit/skip decisions.
//!
//! An object is sent when the client can hear it (inside the sound radius of
//! a playing 3D sound, or any playing 2D sound) or can see it (bounding
//! sphere against a fixed 90°×70° frustum derived from the client's last
//! reported orientation). Bootstrap snapshots bypass culling entirely.

use glam::{EulerRot, Quat, Vec3};

use crate::snapshot::{ObjectState, SoundRef};

pub const HORIZONTAL_FOV: f32 = 90.0 * std::f32::consts::PI / 180.0;
pub const VERTICAL_FOV: f32 = 70.0 * std::f32::consts::PI / 180.0;

/// Objects at most this big use the cheaper point test.
const POINT_TEST_RADIUS: f32 = 1.0;

/// The client's viewpoint as last reported in its input packets.
#[derive(Debug, Clone, Copy, Default)]
pub struct ViewState {
    pub position: Vec3,
    /// Euler angles (pitch, yaw, roll), matching object orientation.
    pub orientation: Vec3,
}

#[derive(Debug, Clone, Copy)]
pub struct Frustum {
    origin: Vec3,
    forward: Vec3,
    right: Vec3,
    up: Vec3,
    half_h: f32,
    half_v: f32,
}

impl Frustum {
    pub fn from_view(view: &ViewState) -> Self {
        let rot = Quat::from_euler(
            EulerRot::YXZ,
            view.orientation.y,
            view.orientation.x,
            view.orientation.z,
        );
        Self {
            origin: view.position,
            forward: rot * Vec3::NEG_Z,
            right: rot * Vec3::X,
            up: rot * Vec3::Y,
            half_h: HORIZONTAL_FOV / 2.0,
            half_v: VERTICAL_FOV / 2.0,
        }
    }

    /// Angular offsets of `point` from the view axis, horizontal and
    /// vertical. `None` when the point is behind the viewer.
    fn angles_to(&self, point: Vec3) -> Option<(f32, f32)> {
        let to = point - self.origin;
        let depth = to.dot(self.forward);
        if depth <= 0.0 {
            return None;
        }
        let h = to.dot(self.right).abs().atan2(depth);
        let v = to.dot(self.up).abs().atan2(depth);
        Some((h, v))
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        match self.angles_to(point) {
            Some((h, v)) => h <= self.half_h && v <= self.half_v,
            None => false,
        }
    }

    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        let distance = center.distance(self.origin);
        if distance <= radius {
            return true;
        }
        let Some((h, v)) = self.angles_to(center) else {
            // Behind the viewer; a sphere big enough to reach the origin
            // was caught above.
            return false;
        };
        let angular_radius = (radius / distance).clamp(-1.0, 1.0).asin();
        h - angular_radius <= self.half_h && v - angular_radius <= self.half_v
    }
}

/// Transmit/skip for one candidate object. The caller has already excluded
/// the client's own object and handles the bootstrap (cull-off) case.
pub fn should_transmit(state: &ObjectState, view: &ViewState, frustum: &Frustum) -> bool {
    match state.sound() {
        SoundRef::Spatial { radius, .. } => {
            if view.position.distance(state.position) <= radius as f32 {
                return true;
            }
        }
        // A 2D sound is audible regardless of distance.
        SoundRef::Flat { .. } => return true,
        SoundRef::None => {}
    }

    if state.view_radius <= POINT_TEST_RADIUS {
        frustum.contains_point(state.position)
    } else {
        frustum.intersects_sphere(state.position, state.view_radius)
    }
}
