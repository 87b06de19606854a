//! Per-object delta encoding.
//!
//! One object record is a 3-byte header (16-bit network id + 8-bit field
//! mask) followed by the changed fields in a fixed order: velocity,
//! position, orientation, scale, sound, model, animation, particle, blob.
//! The id's top four bits are inline flags; lifted out and combined with the
//! field mask they form the effective 12-bit presence mask the decoder walks.
//!
//! Suppression policy:
//! - against a baseline, a field is omitted when strictly equal to it;
//! - with no baseline, a field is omitted when equal to its neutral default;
//! - position rides dead reckoning: when velocity is unsent but non-zero on
//!   a non-initial send, position is omitted too, and whenever velocity is
//!   sent position accompanies it to correct drift;
//! - an unattached object with nothing to say encodes to zero bytes, while
//!   an attached object always emits at least the header (with
//!   `IS_ATTACHED` cleared when the attach target is unchanged, so the
//!   decoder never re-reads a stale target id).

use glam::Vec3;
use thiserror::Error;

use crate::net::dirs::{byte_to_dir, dir_to_byte};
use crate::net::wire::{PacketReader, PacketWriter, WireError};
use crate::precache::IndexWidths;
use crate::snapshot::{NetworkId, ObjectState, MAX_BLOB_BYTES};

pub const OBJECT_HEADER_BYTES: usize = 3;
pub const ATTACH_ID_BYTES: usize = 2;

pub mod field_mask {
    pub const POSITION: u8 = 1 << 0;
    pub const ORIENTATION: u8 = 1 << 1;
    pub const VELOCITY: u8 = 1 << 2;
    pub const SCALE: u8 = 1 << 3;
    pub const SOUND: u8 = 1 << 4;
    pub const MODEL: u8 = 1 << 5;
    pub const ANIMATION: u8 = 1 << 6;
    pub const PARTICLE: u8 = 1 << 7;
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("object record truncated: {0}")]
    Truncated(#[from] WireError),
}

/// Precision for uncompressed vector fields, selected per field at session
/// build time. `Compressed` is not listed here: it is driven by the
/// per-object `COMPRESSED_ORIENT_AND_VEL` inline flag and only ever applies
/// to orientation and velocity on 3D objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VectorMode {
    #[default]
    Full,
    Half,
}

impl VectorMode {
    fn write(self, out: &mut PacketWriter, v: f32) {
        match self {
            Self::Full => out.write_f32(v),
            Self::Half => out.write_f16(v),
        }
    }

    fn read(self, r: &mut PacketReader<'_>) -> Result<f32, WireError> {
        match self {
            Self::Full => r.read_f32(),
            Self::Half => r.read_f16(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CodecParams {
    pub position: VectorMode,
    pub orientation: VectorMode,
    pub velocity: VectorMode,
    pub scale: VectorMode,
    pub widths: IndexWidths,
}

impl CodecParams {
    pub fn with_widths(widths: IndexWidths) -> Self {
        Self {
            widths,
            ..Self::default()
        }
    }
}

fn write_vec(out: &mut PacketWriter, v: Vec3, mode: VectorMode, is_2d: bool) {
    mode.write(out, v.x);
    mode.write(out, v.y);
    if !is_2d {
        mode.write(out, v.z);
    }
}

fn read_vec(r: &mut PacketReader<'_>, mode: VectorMode, is_2d: bool) -> Result<Vec3, WireError> {
    let x = mode.read(r)?;
    let y = mode.read(r)?;
    let z = if is_2d { 0.0 } else { mode.read(r)? };
    Ok(Vec3::new(x, y, z))
}

/// f16 magnitude + direction codebook byte.
fn write_compressed_vec(out: &mut PacketWriter, v: Vec3) {
    out.write_f16(v.length());
    out.write_u8(dir_to_byte(v));
}

fn read_compressed_vec(r: &mut PacketReader<'_>) -> Result<Vec3, WireError> {
    let magnitude = r.read_f16()?;
    let dir = byte_to_dir(r.read_u8()?);
    Ok(dir * magnitude)
}

/// Encodes the delta between `state` and `baseline` (or against neutral
/// defaults when `baseline` is `None`) into `out`. Returns the number of
/// bytes written; zero means the record was suppressed entirely.
pub fn encode_object(
    state: &ObjectState,
    baseline: Option<&ObjectState>,
    params: &CodecParams,
    out: &mut PacketWriter,
) -> usize {
    let start = out.len();
    let is_2d = state.id.is_2d();
    let compressed = state.id.has(NetworkId::COMPRESSED_ORIENT_AND_VEL) && !is_2d;
    let attached = state.attached_to.is_some();

    let neutral = ObjectState::new(state.id);
    let base = baseline.unwrap_or(&neutral);

    let mut mask = 0u8;
    if !attached {
        // A baseline that was attached needs an explicit velocity to tell
        // the peer to detach; transform pokes alone are ignored while the
        // replica still copies its parent.
        let was_attached = baseline.is_some_and(|b| b.attached_to.is_some());
        if state.velocity != base.velocity || was_attached {
            mask |= field_mask::VELOCITY | field_mask::POSITION;
        } else if state.position != base.position {
            let dead_reckoned = baseline.is_some() && state.velocity != Vec3::ZERO;
            if !dead_reckoned {
                mask |= field_mask::POSITION;
            }
        }
        if state.orientation != base.orientation {
            mask |= field_mask::ORIENTATION;
        }
        if state.scale != base.scale {
            mask |= field_mask::SCALE;
        }
    }
    if state.sound_index != base.sound_index || state.sound_radius != base.sound_radius {
        mask |= field_mask::SOUND;
    }
    if state.model_index != base.model_index {
        mask |= field_mask::MODEL;
    }
    if state.animation_index != base.animation_index {
        mask |= field_mask::ANIMATION;
    }
    if state.particle_index != base.particle_index {
        mask |= field_mask::PARTICLE;
    }

    let attach_changed = attached && state.attached_to != base.attached_to;
    let blob_changed = state.blob.is_some() && state.blob != base.blob;

    if mask == 0 && !attach_changed && !blob_changed && !attached {
        return 0;
    }

    let mut wire_id = state
        .id
        .without(NetworkId::IS_ATTACHED)
        .without(NetworkId::HAS_BLOB);
    if attach_changed {
        wire_id = wire_id.with(NetworkId::IS_ATTACHED);
    }
    if blob_changed {
        wire_id = wire_id.with(NetworkId::HAS_BLOB);
    }

    out.write_u16(wire_id.raw());
    out.write_u8(mask);

    if attach_changed {
        // Attachment short-circuit: target id right after the header,
        // transform fields never follow.
        let target = state.attached_to.expect("attach_changed implies attached");
        out.write_u16(target.index());
    }

    if mask & field_mask::VELOCITY != 0 {
        if compressed {
            write_compressed_vec(out, state.velocity);
        } else {
            write_vec(out, state.velocity, params.velocity, is_2d);
        }
    }
    if mask & field_mask::POSITION != 0 {
        write_vec(out, state.position, params.position, is_2d);
    }
    if mask & field_mask::ORIENTATION != 0 {
        if compressed {
            write_compressed_vec(out, state.orientation);
        } else if is_2d {
            params.orientation.write(out, state.orientation.y);
        } else {
            write_vec(out, state.orientation, params.orientation, false);
        }
    }
    if mask & field_mask::SCALE != 0 {
        write_vec(out, state.scale, params.scale, is_2d);
    }
    if mask & field_mask::SOUND != 0 {
        params.widths.sounds.write_index(out, state.sound_index);
        if state.sound_index > -1 {
            out.write_u8(state.sound_radius);
        }
    }
    if mask & field_mask::MODEL != 0 {
        params.widths.models.write_index(out, state.model_index);
    }
    if mask & field_mask::ANIMATION != 0 {
        params.widths.animations.write_index(out, state.animation_index);
    }
    if mask & field_mask::PARTICLE != 0 {
        params.widths.particles.write_index(out, state.particle_index);
    }
    if blob_changed {
        let blob = state.blob.as_deref().expect("blob_changed implies blob");
        let len = blob.len().min(MAX_BLOB_BYTES);
        out.write_u8(len as u8);
        out.write_bytes(&blob[..len]);
    }

    out.len() - start
}

/// Fields present in a decoded record. Absent fields are untouched on apply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedFields {
    pub velocity: Option<Vec3>,
    pub position: Option<Vec3>,
    pub orientation: Option<Vec3>,
    pub scale: Option<Vec3>,
    /// Wire sound index plus radius (zero unless the sound is 3D).
    pub sound: Option<(i16, u8)>,
    pub model: Option<i16>,
    pub animation: Option<i16>,
    pub particle: Option<i16>,
    pub blob: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedObject {
    /// Id as transmitted, inline flags included.
    pub id: NetworkId,
    pub mask: u8,
    pub attach: Option<NetworkId>,
    pub fields: DecodedFields,
}

/// Decodes one object record from `r`. The caller loops `object_count`
/// times; an underrun anywhere poisons the whole datagram.
pub fn decode_object(
    r: &mut PacketReader<'_>,
    params: &CodecParams,
) -> Result<DecodedObject, CodecError> {
    let id = NetworkId::from_raw(r.read_u16()?);
    let mask = r.read_u8()?;
    let is_2d = id.is_2d();
    let compressed = id.has(NetworkId::COMPRESSED_ORIENT_AND_VEL) && !is_2d;

    let attach = if id.has(NetworkId::IS_ATTACHED) {
        Some(NetworkId::from_index(
            r.read_u16()? & NetworkId::INDEX_MASK,
        ))
    } else {
        None
    };

    let mut fields = DecodedFields::default();

    if mask & field_mask::VELOCITY != 0 {
        fields.velocity = Some(if compressed {
            read_compressed_vec(r)?
        } else {
            read_vec(r, params.velocity, is_2d)?
        });
    }
    if mask & field_mask::POSITION != 0 {
        fields.position = Some(read_vec(r, params.position, is_2d)?);
    }
    if mask & field_mask::ORIENTATION != 0 {
        fields.orientation = Some(if compressed {
            read_compressed_vec(r)?
        } else if is_2d {
            Vec3::new(0.0, params.orientation.read(r)?, 0.0)
        } else {
            read_vec(r, params.orientation, false)?
        });
    }
    if mask & field_mask::SCALE != 0 {
        let mut scale = read_vec(r, params.scale, is_2d)?;
        if is_2d {
            scale.z = 1.0;
        }
        fields.scale = Some(scale);
    }
    if mask & field_mask::SOUND != 0 {
        let index = params.widths.sounds.read_index(r)?;
        let radius = if index > -1 { r.read_u8()? } else { 0 };
        fields.sound = Some((index, radius));
    }
    if mask & field_mask::MODEL != 0 {
        fields.model = Some(params.widths.models.read_index(r)?);
    }
    if mask & field_mask::ANIMATION != 0 {
        fields.animation = Some(params.widths.animations.read_index(r)?);
    }
    if mask & field_mask::PARTICLE != 0 {
        fields.particle = Some(params.widths.particles.read_index(r)?);
    }
    if id.has(NetworkId::HAS_BLOB) {
        let len = r.read_u8()? as usize;
        fields.blob = Some(r.read_bytes(len)?.to_vec());
    }

    Ok(DecodedObject { id, mask, attach, fields })
}

impl DecodedObject {
    /// Folds this record into an authoritative state. Velocity detaches
    /// before it applies; a fresh attach zeroes kinematic motion.
    pub fn apply(&self, state: &mut ObjectState) {
        if let Some(target) = self.attach {
            state.attached_to = Some(target);
            state.velocity = Vec3::ZERO;
        }
        if let Some(velocity) = self.fields.velocity {
            state.attached_to = None;
            state.velocity = velocity;
        }
        if let Some(position) = self.fields.position {
            state.position = position;
        }
        if let Some(orientation) = self.fields.orientation {
            state.orientation = orientation;
        }
        if let Some(scale) = self.fields.scale {
            state.scale = scale;
        }
        if let Some((index, radius)) = self.fields.sound {
            state.sound_index = index;
            state.sound_radius = radius;
        }
        if let Some(model) = self.fields.model {
            state.model_index = model;
        }
        if let Some(animation) = self.fields.animation {
            state.animation_index = animation;
        }
        if let Some(particle) = self.fields.particle {
            state.particle_index = particle;
        }
        if let Some(blob) = &self.fields.blob {
            state.blob = Some(blob.clone());
        }
    }
}
