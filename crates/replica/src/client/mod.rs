//! Client-side reconstruction of the replicated world.
//!
//! Each snapshot datagram is decoded in full before anything is applied, so
//! a truncated packet is dropped without side effects and the frame cursor
//! never moves on bad data. Applied records create replicas on demand at the
//! server-assigned slot, poke decoded fields into the scene in wire order,
//! and keep per-object motion state (velocity, attachment, smoothing) for
//! the render-rate `update` pass.

pub mod smoothing;

use std::collections::HashMap;

use glam::Vec3;
use log::{debug, warn};

use crate::net::codec::{decode_object, CodecError, CodecParams, DecodedObject};
use crate::net::wire::PacketReader;
use crate::precache::PrecacheTables;
use crate::scene::{NodeKind, SceneAdapter};
use crate::slot::{SceneHandle, SlotTable};
use crate::snapshot::{FrameIndex, NetworkId, SoundRef};
use smoothing::{AngleSmoother, VectorSmoother};

/// Outcome of feeding one datagram to the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied(AppliedSnapshot),
    /// Frame not newer than the cursor; silently discarded.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedSnapshot {
    pub frame: FrameIndex,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

#[derive(Debug)]
struct Replica {
    handle: SceneHandle,
    attached_to: Option<u16>,
    velocity: Vec3,
    position: VectorSmoother,
    orientation: AngleSmoother,
    scale: VectorSmoother,
}

impl Replica {
    fn new(handle: SceneHandle) -> Self {
        Self {
            handle,
            attached_to: None,
            velocity: Vec3::ZERO,
            position: VectorSmoother::snapped(Vec3::ZERO),
            orientation: AngleSmoother::default(),
            scale: VectorSmoother::snapped(Vec3::ONE),
        }
    }
}

pub struct ClientReconciler {
    params: CodecParams,
    tables: PrecacheTables,
    slots: SlotTable,
    replicas: HashMap<u16, Replica>,
    last_frame: Option<FrameIndex>,
}

impl ClientReconciler {
    pub fn new(tables: PrecacheTables) -> Self {
        let params = CodecParams::with_widths(tables.widths());
        Self {
            params,
            tables,
            slots: SlotTable::new(),
            replicas: HashMap::new(),
            last_frame: None,
        }
    }

    pub fn tables(&self) -> &PrecacheTables {
        &self.tables
    }

    pub fn params(&self) -> &CodecParams {
        &self.params
    }

    /// Latest applied frame; what input packets acknowledge.
    pub fn last_frame(&self) -> Option<FrameIndex> {
        self.last_frame
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    pub fn handle_of(&self, id: NetworkId) -> Option<SceneHandle> {
        self.slots.get_at(id)
    }

    /// Applies one snapshot datagram. Stale frames are discarded whole; any
    /// decode error drops the datagram with the cursor untouched.
    pub fn apply_datagram(
        &mut self,
        bytes: &[u8],
        scene: &mut impl SceneAdapter,
    ) -> Result<ApplyOutcome, CodecError> {
        let mut r = PacketReader::new(bytes);
        let frame = FrameIndex::new(r.read_u24()?);
        if self.last_frame.is_some_and(|latest| !frame.newer_than(latest)) {
            return Ok(ApplyOutcome::Stale);
        }

        // Decode everything up front; apply only a fully valid datagram.
        let count = r.read_u16()?;
        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            records.push(decode_object(&mut r, &self.params)?);
        }
        let deleted_count = r.read_u16()?;
        let mut deleted = Vec::with_capacity(deleted_count as usize);
        for _ in 0..deleted_count {
            deleted.push(NetworkId::from_index(r.read_u16()? & NetworkId::INDEX_MASK));
        }

        self.last_frame = Some(frame);
        let mut applied = AppliedSnapshot {
            frame,
            created: 0,
            updated: 0,
            deleted: 0,
        };
        for record in records {
            if self.apply_record(&record, scene) {
                applied.created += 1;
            } else {
                applied.updated += 1;
            }
        }
        for id in deleted {
            if self.destroy_replica(id, scene) {
                applied.deleted += 1;
            }
        }
        Ok(ApplyOutcome::Applied(applied))
    }

    /// Applies the object section of the reliable init packet. The reader is
    /// positioned at the frame index; consumes through the last record.
    pub fn apply_bootstrap(
        &mut self,
        r: &mut PacketReader<'_>,
        scene: &mut impl SceneAdapter,
    ) -> Result<AppliedSnapshot, CodecError> {
        let frame = FrameIndex::new(r.read_u24()?);
        let count = r.read_u16()?;
        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            records.push(decode_object(&mut *r, &self.params)?);
        }

        self.last_frame = Some(frame);
        let mut applied = AppliedSnapshot {
            frame,
            created: 0,
            updated: 0,
            deleted: 0,
        };
        for record in records {
            if self.apply_record(&record, scene) {
                applied.created += 1;
            } else {
                applied.updated += 1;
            }
        }
        Ok(applied)
    }

    /// Returns true when the record created a fresh replica.
    fn apply_record(&mut self, record: &DecodedObject, scene: &mut impl SceneAdapter) -> bool {
        let index = record.id.index();
        let created = !self.replicas.contains_key(&index);
        if created {
            let kind = if record.id.is_2d() {
                NodeKind::Flat
            } else {
                NodeKind::Spatial
            };
            let handle = scene.instantiate(kind);
            self.slots.insert_at(NetworkId::from_index(index), handle);
            self.replicas.insert(index, Replica::new(handle));
            debug!("created replica {index} ({kind:?})");
        }
        let replica = self.replicas.get_mut(&index).expect("just ensured");
        let handle = replica.handle;

        if let Some(target) = record.attach {
            replica.attached_to = Some(target.index());
            replica.velocity = Vec3::ZERO;
            scene.set_velocity(handle, Vec3::ZERO);
        }
        if let Some(velocity) = record.fields.velocity {
            // kinematic motion and attachment are exclusive
            replica.attached_to = None;
            replica.velocity = velocity;
            scene.set_velocity(handle, velocity);
        }

        let attached = replica.attached_to.is_some();
        if let Some(position) = record.fields.position {
            if !attached {
                if created {
                    replica.position.snap(position);
                } else {
                    replica.position.retarget(position);
                }
            }
        }
        if let Some(orientation) = record.fields.orientation {
            if !attached {
                if created {
                    replica.orientation.snap(orientation);
                } else {
                    replica.orientation.retarget(orientation);
                }
            }
        }
        if let Some(scale) = record.fields.scale {
            if !attached {
                if created {
                    replica.scale.snap(scale);
                } else {
                    replica.scale.retarget(scale);
                }
            }
        }

        if let Some((sound_index, radius)) = record.fields.sound {
            match SoundRef::from_wire(sound_index, radius) {
                SoundRef::None => scene.stop_sounds(handle),
                SoundRef::Flat { index } => {
                    if (index as usize) < self.tables.sounds.len() {
                        scene.play_flat_sound(handle, index);
                    } else {
                        warn!("replica {}: 2d sound index {index} out of range", record.id.index());
                    }
                }
                SoundRef::Spatial { index, radius } => {
                    if (index as usize) < self.tables.sounds.len() {
                        scene.play_spatial_sound(handle, index, radius);
                    } else {
                        warn!("replica {}: sound index {index} out of range", record.id.index());
                    }
                }
            }
        }
        if let Some(model) = record.fields.model {
            if model == -1 || (model >= 0 && (model as usize) < self.tables.models.len()) {
                scene.set_model(handle, model);
            } else {
                warn!("replica {index}: model index {model} out of range");
            }
        }
        if let Some(animation) = record.fields.animation {
            if animation == -1
                || (animation >= 0 && (animation as usize) < self.tables.animations.len())
            {
                scene.set_animation(handle, animation);
            } else {
                warn!("replica {index}: animation index {animation} out of range");
            }
        }
        if let Some(particle) = record.fields.particle {
            if particle == -1
                || (particle >= 0 && (particle as usize) < self.tables.particles.len())
            {
                scene.set_particle(handle, particle);
            } else {
                warn!("replica {index}: particle index {particle} out of range");
            }
        }
        if let Some(blob) = &record.fields.blob {
            scene.set_blob(handle, blob);
        }

        created
    }

    fn destroy_replica(&mut self, id: NetworkId, scene: &mut impl SceneAdapter) -> bool {
        let Some(replica) = self.replicas.remove(&id.index()) else {
            // already gone; deletions may be redelivered
            return false;
        };
        scene.destroy(replica.handle);
        self.slots.remove_at(id);
        debug!("destroyed replica {}", id.index());
        true
    }

    /// Render-rate pass: dead reckoning plus smoothing for free objects,
    /// parent-transform copies for attached ones, then viewport propagation.
    pub fn update(&mut self, dt: f32, scene: &mut impl SceneAdapter) {
        let mut transforms: HashMap<u16, (Vec3, Vec3, Vec3)> = HashMap::new();

        for (&index, replica) in &mut self.replicas {
            if replica.attached_to.is_some() {
                continue;
            }
            let position = replica.position.advance(dt, replica.velocity);
            let orientation = replica.orientation.advance(dt);
            let scale = replica.scale.advance(dt, Vec3::ZERO);
            transforms.insert(index, (position, orientation, scale));
            scene.set_position(replica.handle, position);
            scene.set_orientation(replica.handle, orientation);
            scene.set_scale(replica.handle, scale);
        }

        for replica in self.replicas.values_mut() {
            let Some(parent) = replica.attached_to else {
                continue;
            };
            // A vanished or itself-attached parent just stops the copy.
            let Some(&(position, orientation, scale)) = transforms.get(&parent) else {
                continue;
            };
            replica.position.snap(position);
            replica.orientation.snap(orientation);
            replica.scale.snap(scale);
            scene.set_position(replica.handle, position);
            scene.set_orientation(replica.handle, orientation);
            scene.set_scale(replica.handle, scale);
        }

        scene.propagate_to_viewports();
    }

    /// Rendered position of a replica, if known.
    pub fn position_of(&self, id: NetworkId) -> Option<Vec3> {
        self.replicas.get(&id.index()).map(|r| r.position.current())
    }
}
