//! Boundary to the host scene.
//!
//! The core never touches a scene graph directly; everything goes through
//! [`SceneAdapter`]. The server samples authoritative state from it, the
//! client pokes reconstructed state back into it. 2D and 3D replicas are the
//! two variants of [`NodeKind`]; their shared behavior (velocity,
//! attachment, asset membership) lives in the replication layer, so no
//! deeper hierarchy exists.

mod memory;

pub use memory::{AudioPlayer, MemoryScene, SceneNode};

use glam::Vec3;

use crate::precache::PrecacheTables;
use crate::slot::SceneHandle;

/// Spatialized audio unit size as a fraction of the audible radius.
pub const SPATIAL_UNIT_SIZE_RATIO: f32 = 0.15;

/// Dimensionality of a replica, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Flat,
    Spatial,
}

impl NodeKind {
    pub fn is_2d(self) -> bool {
        matches!(self, Self::Flat)
    }
}

/// One server-side sample of a registered object, taken each tick.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneSample {
    pub position: Vec3,
    pub orientation: Vec3,
    pub scale: Vec3,
    pub velocity: Vec3,
    pub model_index: i16,
    pub animation_index: i16,
    pub particle_index: i16,
    /// Signed wire encoding: `-1` none, `>= 0` 3D index, `< -1` 2D.
    pub sound_index: i16,
    pub sound_radius: u8,
    pub view_radius: f32,
    pub blob: Option<Vec<u8>>,
}

impl Default for SceneSample {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Vec3::ZERO,
            scale: Vec3::ONE,
            velocity: Vec3::ZERO,
            model_index: -1,
            animation_index: -1,
            particle_index: -1,
            sound_index: -1,
            sound_radius: 0,
            view_radius: 0.0,
            blob: None,
        }
    }
}

/// The minimal surface the replication core requires from a host scene.
///
/// The scene is not assumed to be thread-safe; all calls happen on the
/// session's tick thread.
pub trait SceneAdapter {
    /// Server-side: sample the authoritative state of one object.
    /// `None` means the object no longer exists.
    fn sample(&self, handle: SceneHandle) -> Option<SceneSample>;

    /// Client-side: create a replica of the given dimensionality, parented
    /// to the scene root.
    fn instantiate(&mut self, kind: NodeKind) -> SceneHandle;

    fn destroy(&mut self, handle: SceneHandle);

    fn set_position(&mut self, handle: SceneHandle, position: Vec3);
    fn set_orientation(&mut self, handle: SceneHandle, orientation: Vec3);
    fn set_scale(&mut self, handle: SceneHandle, scale: Vec3);
    fn set_velocity(&mut self, handle: SceneHandle, velocity: Vec3);

    fn set_model(&mut self, handle: SceneHandle, index: i16);
    fn set_animation(&mut self, handle: SceneHandle, index: i16);
    fn set_particle(&mut self, handle: SceneHandle, index: i16);
    fn set_blob(&mut self, handle: SceneHandle, blob: &[u8]);

    /// 3D positional sound; players self-free on completion.
    fn play_spatial_sound(&mut self, handle: SceneHandle, index: u16, radius: u8);
    /// 2D sound, no spatialization.
    fn play_flat_sound(&mut self, handle: SceneHandle, index: u16);
    /// Stop and free every audio player attached to the object.
    fn stop_sounds(&mut self, handle: SceneHandle);

    /// Load every asset the given lists reference; called once, before the
    /// first object is created.
    fn precache(&mut self, tables: &PrecacheTables);

    /// Push transform/model/particle changes to any auxiliary viewports.
    fn propagate_to_viewports(&mut self);
}
