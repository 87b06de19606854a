//! Session-scoped asset name lists.
//!
//! The four precache lists (sounds, models, animations, particles) are
//! negotiated once during bootstrap and immutable afterwards. Wire indices
//! are list positions, carried signed so the `-1` ("none") and flat-sound
//! encodings round-trip; each list independently uses a 1-byte index while
//! every value it can produce fits an `i8`, and a 2-byte index beyond that.
//! The width is a derived property of the negotiated length, so no extra
//! negotiation bytes exist.

use serde::{Deserialize, Serialize};

use crate::net::wire::{PacketReader, PacketWriter, WireError};

/// On-wire width of a precache index field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexWidth {
    Narrow,
    Wide,
}

/// Largest list whose indices (0..=127) fit the signed narrow byte.
const NARROW_LIMIT: usize = 128;

/// The sound list loses one more slot: a flat sound at index `i` travels as
/// `-(i + 2)`, so index 126 is the last that fits an `i8` (as -128).
const NARROW_SOUND_LIMIT: usize = 127;

impl IndexWidth {
    pub fn for_len(len: usize) -> Self {
        if len <= NARROW_LIMIT {
            Self::Narrow
        } else {
            Self::Wide
        }
    }

    pub fn for_sound_len(len: usize) -> Self {
        if len <= NARROW_SOUND_LIMIT {
            Self::Narrow
        } else {
            Self::Wide
        }
    }

    pub fn bytes(self) -> usize {
        match self {
            Self::Narrow => 1,
            Self::Wide => 2,
        }
    }

    /// Indices are signed so the `-1` ("none") and 2D-sound encodings
    /// round-trip. The width derivation guarantees narrow values fit.
    pub fn write_index(self, out: &mut PacketWriter, v: i16) {
        match self {
            Self::Narrow => {
                debug_assert!(i8::try_from(v).is_ok(), "narrow index {v} out of range");
                out.write_i8(v as i8);
            }
            Self::Wide => out.write_i16(v),
        }
    }

    pub fn read_index(self, r: &mut PacketReader<'_>) -> Result<i16, WireError> {
        match self {
            Self::Narrow => Ok(r.read_i8()? as i16),
            Self::Wide => r.read_i16(),
        }
    }
}

/// Per-list index widths, derived from [`PrecacheTables`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexWidths {
    pub sounds: IndexWidth,
    pub models: IndexWidth,
    pub animations: IndexWidth,
    pub particles: IndexWidth,
}

impl Default for IndexWidths {
    fn default() -> Self {
        Self {
            sounds: IndexWidth::Narrow,
            models: IndexWidth::Narrow,
            animations: IndexWidth::Narrow,
            particles: IndexWidth::Narrow,
        }
    }
}

/// The four ordered asset-name lists. Names are opaque UTF-8; the only
/// reserved byte on the wire is the null terminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecacheTables {
    pub sounds: Vec<String>,
    pub models: Vec<String>,
    pub animations: Vec<String>,
    pub particles: Vec<String>,
}

impl PrecacheTables {
    pub fn widths(&self) -> IndexWidths {
        IndexWidths {
            sounds: IndexWidth::for_sound_len(self.sounds.len()),
            models: IndexWidth::for_len(self.models.len()),
            animations: IndexWidth::for_len(self.animations.len()),
            particles: IndexWidth::for_len(self.particles.len()),
        }
    }

    pub fn add_sound(&mut self, name: impl Into<String>) -> i16 {
        Self::push(&mut self.sounds, name)
    }

    pub fn add_model(&mut self, name: impl Into<String>) -> i16 {
        Self::push(&mut self.models, name)
    }

    pub fn add_animation(&mut self, name: impl Into<String>) -> i16 {
        Self::push(&mut self.animations, name)
    }

    pub fn add_particle(&mut self, name: impl Into<String>) -> i16 {
        Self::push(&mut self.particles, name)
    }

    fn push(list: &mut Vec<String>, name: impl Into<String>) -> i16 {
        list.push(name.into());
        (list.len() - 1) as i16
    }

    /// Serializes all four lists in bootstrap order.
    pub fn write(&self, out: &mut PacketWriter) {
        for list in [&self.sounds, &self.models, &self.animations, &self.particles] {
            out.write_u16(list.len() as u16);
            for name in list {
                out.write_cstr(name);
            }
        }
    }

    pub fn read(r: &mut PacketReader<'_>) -> Result<Self, WireError> {
        let mut lists: [Vec<String>; 4] = Default::default();
        for list in &mut lists {
            let count = r.read_u16()?;
            list.reserve(count as usize);
            for _ in 0..count {
                list.push(r.read_cstr()?);
            }
        }
        let [sounds, models, animations, particles] = lists;
        Ok(Self {
            sounds,
            models,
            animations,
            particles,
        })
    }
}
