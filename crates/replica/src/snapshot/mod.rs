//! Replicated world state: per-object records, per-frame snapshots, and the
//! 24-bit frame counter that orders them.

mod store;

pub use store::SnapshotStore;

use std::collections::HashMap;

use glam::Vec3;

/// Hard cap on replicated objects per session: the id namespace is 12 bits.
pub const MAX_OBJECTS: usize = 4096;

/// Largest opaque payload an object may carry.
pub const MAX_BLOB_BYTES: usize = 255;

const FRAME_MASK: u32 = 0x00FF_FFFF;
const FRAME_HALF: u32 = 0x0080_0000;

/// 16-bit composite object identifier.
///
/// Low 12 bits are the object index (0..4095); the top 4 bits carry inline
/// flags describing the object's shape rather than per-frame field presence:
/// `IS_2D` and `COMPRESSED_ORIENT_AND_VEL` are sticky from creation, while
/// `IS_ATTACHED` and `HAS_BLOB` are set per transmission when the respective
/// trailing sections follow the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkId(u16);

impl NetworkId {
    pub const INDEX_MASK: u16 = 0x0FFF;
    pub const IS_2D: u16 = 1 << 12;
    pub const COMPRESSED_ORIENT_AND_VEL: u16 = 1 << 13;
    pub const IS_ATTACHED: u16 = 1 << 14;
    pub const HAS_BLOB: u16 = 1 << 15;

    pub fn from_index(index: u16) -> Self {
        debug_assert!(index <= Self::INDEX_MASK);
        Self(index & Self::INDEX_MASK)
    }

    pub fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u16 {
        self.0
    }

    pub fn index(self) -> u16 {
        self.0 & Self::INDEX_MASK
    }

    pub fn has(self, flag: u16) -> bool {
        self.0 & flag != 0
    }

    pub fn with(self, flag: u16) -> Self {
        Self(self.0 | flag)
    }

    pub fn without(self, flag: u16) -> Self {
        Self(self.0 & !flag)
    }

    pub fn is_2d(self) -> bool {
        self.has(Self::IS_2D)
    }
}

/// Monotonic 24-bit frame counter with modular ordering.
///
/// At 20 Hz the counter wraps after roughly 9.7 days; every ordering
/// comparison in the engine goes through [`FrameIndex::newer_than`], which
/// interprets the 24-bit difference as signed, so cursors and GC stay
/// correct across the wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameIndex(u32);

impl Default for FrameIndex {
    fn default() -> Self {
        Self::ZERO
    }
}

impl FrameIndex {
    pub const ZERO: Self = Self(0);

    pub fn new(raw: u32) -> Self {
        Self(raw & FRAME_MASK)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1) & FRAME_MASK)
    }

    /// Signed modular distance `self - other` in frames.
    pub fn delta(self, other: Self) -> i32 {
        let diff = self.0.wrapping_sub(other.0) & FRAME_MASK;
        if diff >= FRAME_HALF {
            diff as i32 - (FRAME_MASK as i32 + 1)
        } else {
            diff as i32
        }
    }

    pub fn newer_than(self, other: Self) -> bool {
        self.delta(other) > 0
    }
}

/// Interpretation of the signed sound field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundRef {
    None,
    /// 3D positional sound: precache index plus audible radius in meters.
    Spatial { index: u16, radius: u8 },
    /// 2D sound, encoded on the wire as `-(index + 2)`.
    Flat { index: u16 },
}

impl SoundRef {
    pub fn from_wire(sound_index: i16, radius: u8) -> Self {
        if sound_index == -1 {
            Self::None
        } else if sound_index < -1 {
            Self::Flat {
                index: (-(sound_index + 2)) as u16,
            }
        } else {
            Self::Spatial {
                index: sound_index as u16,
                radius,
            }
        }
    }
}

/// Authoritative per-frame record of one replicated object.
///
/// `view_radius` never crosses the wire; it only feeds server-side culling.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectState {
    pub id: NetworkId,
    pub position: Vec3,
    /// Euler angles; 2D objects use only Y as their rotation angle.
    pub orientation: Vec3,
    pub scale: Vec3,
    pub velocity: Vec3,
    pub model_index: i16,
    pub animation_index: i16,
    pub particle_index: i16,
    pub sound_index: i16,
    pub sound_radius: u8,
    pub view_radius: f32,
    pub attached_to: Option<NetworkId>,
    pub blob: Option<Vec<u8>>,
}

impl ObjectState {
    pub fn new(id: NetworkId) -> Self {
        Self {
            id,
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
            attached_to: None,
            blob: None,
        }
    }

    pub fn is_2d(&self) -> bool {
        self.id.is_2d()
    }

    pub fn sound(&self) -> SoundRef {
        SoundRef::from_wire(self.sound_index, self.sound_radius)
    }

    pub fn set_spatial_sound(&mut self, index: u16, radius: u8) {
        self.sound_index = index as i16;
        self.sound_radius = radius;
    }

    pub fn set_flat_sound(&mut self, index: u16) {
        self.sound_index = -(index as i16) - 2;
        self.sound_radius = 0;
    }

    pub fn clear_sound(&mut self) {
        self.sound_index = -1;
        self.sound_radius = 0;
    }
}

/// One server frame: every replicated object's state plus the ids removed
/// during this frame.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub frame: FrameIndex,
    pub objects: Vec<ObjectState>,
    pub deleted: Vec<NetworkId>,
}

impl Snapshot {
    pub fn new(frame: FrameIndex) -> Self {
        Self {
            frame,
            objects: Vec::new(),
            deleted: Vec::new(),
        }
    }

    /// Index-keyed view for baseline lookups during delta encoding.
    pub fn by_index(&self) -> HashMap<u16, &ObjectState> {
        self.objects.iter().map(|o| (o.id.index(), o)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_packs_index_and_flags() {
        let id = NetworkId::from_index(0x0ABC)
            .with(NetworkId::IS_2D)
            .with(NetworkId::HAS_BLOB);
        assert_eq!(id.index(), 0x0ABC);
        assert!(id.is_2d());
        assert!(id.has(NetworkId::HAS_BLOB));
        assert!(!id.has(NetworkId::IS_ATTACHED));
        assert_eq!(id.without(NetworkId::HAS_BLOB).raw() & NetworkId::HAS_BLOB, 0);
    }

    #[test]
    fn frame_ordering_is_modular() {
        let near_wrap = FrameIndex::new(0x00FF_FFFE);
        let wrapped = near_wrap.next().next();
        assert_eq!(wrapped, FrameIndex::new(0));
        assert!(wrapped.newer_than(near_wrap));
        assert!(!near_wrap.newer_than(wrapped));
        assert_eq!(wrapped.delta(near_wrap), 2);
        assert_eq!(near_wrap.delta(wrapped), -2);
    }

    #[test]
    fn frame_ordering_is_antisymmetric_at_wrap() {
        let a = FrameIndex::new(0x00FF_FF00);
        let b = FrameIndex::new(0x0000_0100);
        assert!(b.newer_than(a));
        assert!(!a.newer_than(b));
        assert!(!a.newer_than(a));
    }

    #[test]
    fn sound_wire_encodings() {
        let mut s = ObjectState::new(NetworkId::from_index(1));
        assert_eq!(s.sound(), SoundRef::None);

        s.set_spatial_sound(4, 20);
        assert_eq!(s.sound_index, 4);
        assert_eq!(
            s.sound(),
            SoundRef::Spatial {
                index: 4,
                radius: 20
            }
        );

        s.set_flat_sound(0);
        assert_eq!(s.sound_index, -2);
        assert_eq!(s.sound(), SoundRef::Flat { index: 0 });

        s.set_flat_sound(7);
        assert_eq!(s.sound_index, -9);
        assert_eq!(s.sound(), SoundRef::Flat { index: 7 });

        s.clear_sound();
        assert_eq!(s.sound(), SoundRef::None);
    }

    #[test]
    fn neutral_defaults() {
        let s = ObjectState::new(NetworkId::from_index(9));
        assert_eq!(s.position, Vec3::ZERO);
        assert_eq!(s.scale, Vec3::ONE);
        assert_eq!(s.model_index, -1);
        assert!(s.blob.is_none());
        assert!(s.attached_to.is_none());
    }
}
