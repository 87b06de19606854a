//! Time-based correction of authoritative updates.
//!
//! When a new authoritative position lands more than an epsilon away from
//! the rendered one, the replica eases toward it over a fixed window instead
//! of popping. Both endpoints of the active interval keep advancing with the
//! object's velocity, so dead reckoning never stalls while a correction
//! plays out. Orientation uses an angle-aware lerp wrapped to `[-π, π]`;
//! scale is plain linear.

use glam::Vec3;

/// Correction window in seconds.
pub const SMOOTHING_WINDOW: f32 = 0.1;

/// Corrections below this distance snap directly.
pub const SNAP_EPSILON: f32 = 0.01;

pub fn wrap_angle(a: f32) -> f32 {
    let mut wrapped = a % std::f32::consts::TAU;
    if wrapped > std::f32::consts::PI {
        wrapped -= std::f32::consts::TAU;
    } else if wrapped < -std::f32::consts::PI {
        wrapped += std::f32::consts::TAU;
    }
    wrapped
}

pub fn lerp_angle(from: f32, to: f32, t: f32) -> f32 {
    wrap_angle(from + wrap_angle(to - from) * t)
}

/// Eased vector channel (position, scale).
#[derive(Debug, Clone, Copy)]
pub struct VectorSmoother {
    from: Vec3,
    to: Vec3,
    elapsed: f32,
    active: bool,
}

impl Default for VectorSmoother {
    fn default() -> Self {
        Self {
            from: Vec3::ZERO,
            to: Vec3::ZERO,
            elapsed: 0.0,
            active: false,
        }
    }
}

impl VectorSmoother {
    pub fn snapped(value: Vec3) -> Self {
        Self {
            from: value,
            to: value,
            elapsed: 0.0,
            active: false,
        }
    }

    pub fn snap(&mut self, value: Vec3) {
        self.from = value;
        self.to = value;
        self.active = false;
    }

    /// Starts easing from the current rendered value toward `target`, or
    /// snaps when the discrepancy is negligible.
    pub fn retarget(&mut self, target: Vec3) {
        let current = self.current();
        if current.distance(target) <= SNAP_EPSILON {
            self.snap(target);
            return;
        }
        self.from = current;
        self.to = target;
        self.elapsed = 0.0;
        self.active = true;
    }

    /// Advances one render frame. `velocity` shifts both endpoints so the
    /// easing composes with extrapolated motion.
    pub fn advance(&mut self, dt: f32, velocity: Vec3) -> Vec3 {
        let drift = velocity * dt;
        self.from += drift;
        self.to += drift;
        if self.active {
            self.elapsed += dt;
            if self.elapsed >= SMOOTHING_WINDOW {
                self.active = false;
                self.from = self.to;
            }
        }
        self.current()
    }

    pub fn current(&self) -> Vec3 {
        if self.active {
            let k = (self.elapsed / SMOOTHING_WINDOW).clamp(0.0, 1.0);
            self.from.lerp(self.to, k)
        } else {
            self.to
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

/// Eased Euler-angle channel; each component lerps along the short way
/// around.
#[derive(Debug, Clone, Copy, Default)]
pub struct AngleSmoother {
    from: Vec3,
    to: Vec3,
    elapsed: f32,
    active: bool,
}

impl AngleSmoother {
    pub fn snap(&mut self, value: Vec3) {
        self.from = value;
        self.to = value;
        self.active = false;
    }

    pub fn retarget(&mut self, target: Vec3) {
        let current = self.current();
        let delta = Vec3::new(
            wrap_angle(target.x - current.x),
            wrap_angle(target.y - current.y),
            wrap_angle(target.z - current.z),
        );
        if delta.length() <= SNAP_EPSILON {
            self.snap(target);
            return;
        }
        self.from = current;
        self.to = target;
        self.elapsed = 0.0;
        self.active = true;
    }

    pub fn advance(&mut self, dt: f32) -> Vec3 {
        if self.active {
            self.elapsed += dt;
            if self.elapsed >= SMOOTHING_WINDOW {
                self.active = false;
                self.from = self.to;
            }
        }
        self.current()
    }

    pub fn current(&self) -> Vec3 {
        if !self.active {
            return self.to;
        }
        let k = (self.elapsed / SMOOTHING_WINDOW).clamp(0.0, 1.0);
        Vec3::new(
            lerp_angle(self.from.x, self.to.x, k),
            lerp_angle(self.from.y, self.to.y, k),
            lerp_angle(self.from.z, self.to.z, k),
        )
    }
}
