//! In-memory scene used by the host binaries and the test suite.
//!
//! Stands in for a real engine scene graph: a flat table of nodes with
//! transform state, asset indices, and attached audio players.

use std::collections::HashMap;

use glam::Vec3;

use super::{NodeKind, SceneAdapter, SceneSample, SPATIAL_UNIT_SIZE_RATIO};
use crate::precache::PrecacheTables;
use crate::slot::SceneHandle;

#[derive(Debug, Clone, PartialEq)]
pub enum AudioPlayer {
    Flat {
        index: u16,
    },
    Spatial {
        index: u16,
        max_distance: f32,
        unit_size: f32,
    },
}

#[derive(Debug, Clone)]
pub struct SceneNode {
    pub kind: NodeKind,
    pub position: Vec3,
    pub orientation: Vec3,
    pub scale: Vec3,
    pub velocity: Vec3,
    pub model_index: i16,
    pub animation_index: i16,
    pub particle_index: i16,
    pub sound_index: i16,
    pub sound_radius: u8,
    pub view_radius: f32,
    pub blob: Option<Vec<u8>>,
    pub audio: Vec<AudioPlayer>,
}

impl SceneNode {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
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
            audio: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryScene {
    nodes: HashMap<SceneHandle, SceneNode>,
    next_handle: SceneHandle,
    precached: Option<PrecacheTables>,
    viewport_syncs: u64,
}

impl MemoryScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host-side spawn with direct access to the node for setup.
    pub fn spawn(&mut self, kind: NodeKind) -> SceneHandle {
        self.next_handle += 1;
        let handle = self.next_handle;
        self.nodes.insert(handle, SceneNode::new(kind));
        handle
    }

    pub fn node(&self, handle: SceneHandle) -> Option<&SceneNode> {
        self.nodes.get(&handle)
    }

    pub fn node_mut(&mut self, handle: SceneHandle) -> Option<&mut SceneNode> {
        self.nodes.get_mut(&handle)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn precached_tables(&self) -> Option<&PrecacheTables> {
        self.precached.as_ref()
    }

    pub fn viewport_syncs(&self) -> u64 {
        self.viewport_syncs
    }

    fn with_node(&mut self, handle: SceneHandle, f: impl FnOnce(&mut SceneNode)) {
        if let Some(node) = self.nodes.get_mut(&handle) {
            f(node);
        }
    }
}

impl SceneAdapter for MemoryScene {
    fn sample(&self, handle: SceneHandle) -> Option<SceneSample> {
        self.nodes.get(&handle).map(|node| SceneSample {
            position: node.position,
            orientation: node.orientation,
            scale: node.scale,
            velocity: node.velocity,
            model_index: node.model_index,
            animation_index: node.animation_index,
            particle_index: node.particle_index,
            sound_index: node.sound_index,
            sound_radius: node.sound_radius,
            view_radius: node.view_radius,
            blob: node.blob.clone(),
        })
    }

    fn instantiate(&mut self, kind: NodeKind) -> SceneHandle {
        self.spawn(kind)
    }

    fn destroy(&mut self, handle: SceneHandle) {
        self.nodes.remove(&handle);
    }

    fn set_position(&mut self, handle: SceneHandle, position: Vec3) {
        self.with_node(handle, |n| n.position = position);
    }

    fn set_orientation(&mut self, handle: SceneHandle, orientation: Vec3) {
        self.with_node(handle, |n| n.orientation = orientation);
    }

    fn set_scale(&mut self, handle: SceneHandle, scale: Vec3) {
        self.with_node(handle, |n| n.scale = scale);
    }

    fn set_velocity(&mut self, handle: SceneHandle, velocity: Vec3) {
        self.with_node(handle, |n| n.velocity = velocity);
    }

    fn set_model(&mut self, handle: SceneHandle, index: i16) {
        self.with_node(handle, |n| n.model_index = index);
    }

    fn set_animation(&mut self, handle: SceneHandle, index: i16) {
        self.with_node(handle, |n| n.animation_index = index);
    }

    fn set_particle(&mut self, handle: SceneHandle, index: i16) {
        self.with_node(handle, |n| n.particle_index = index);
    }

    fn set_blob(&mut self, handle: SceneHandle, blob: &[u8]) {
        self.with_node(handle, |n| n.blob = Some(blob.to_vec()));
    }

    fn play_spatial_sound(&mut self, handle: SceneHandle, index: u16, radius: u8) {
        self.with_node(handle, |n| {
            n.audio.push(AudioPlayer::Spatial {
                index,
                max_distance: radius as f32,
                unit_size: SPATIAL_UNIT_SIZE_RATIO * radius as f32,
            });
        });
    }

    fn play_flat_sound(&mut self, handle: SceneHandle, index: u16) {
        self.with_node(handle, |n| n.audio.push(AudioPlayer::Flat { index }));
    }

    fn stop_sounds(&mut self, handle: SceneHandle) {
        self.with_node(handle, |n| n.audio.clear());
    }

    fn precache(&mut self, tables: &PrecacheTables) {
        self.precached = Some(tables.clone());
    }

    fn propagate_to_viewports(&mut self) {
        self.viewport_syncs += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_sample_destroy() {
        let mut scene = MemoryScene::new();
        let h = scene.spawn(NodeKind::Spatial);
        scene.set_position(h, Vec3::new(1.0, 2.0, 3.0));
        scene.set_model(h, 4);

        let sample = scene.sample(h).unwrap();
        assert_eq!(sample.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(sample.model_index, 4);
        assert_eq!(sample.scale, Vec3::ONE);

        scene.destroy(h);
        assert!(scene.sample(h).is_none());
    }

    #[test]
    fn spatial_sound_derives_unit_size() {
        let mut scene = MemoryScene::new();
        let h = scene.spawn(NodeKind::Spatial);
        scene.play_spatial_sound(h, 3, 20);

        let node = scene.node(h).unwrap();
        assert_eq!(
            node.audio[0],
            AudioPlayer::Spatial {
                index: 3,
                max_distance: 20.0,
                unit_size: 3.0,
            }
        );

        scene.stop_sounds(h);
        assert!(scene.node(h).unwrap().audio.is_empty());
    }

    #[test]
    fn handles_are_never_reused() {
        let mut scene = MemoryScene::new();
        let a = scene.spawn(NodeKind::Flat);
        scene.destroy(a);
        let b = scene.spawn(NodeKind::Flat);
        assert_ne!(a, b);
    }
}
