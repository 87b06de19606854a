//! Scene-handle ↔ network-id mapping.
//!
//! A fixed 4096-entry open-addressed table. The slot position *is* the
//! 12-bit network id, so entries never move once placed: removal leaves a
//! tombstone instead of compacting the probe chain, keeping later lookups of
//! collided keys correct while ids stay stable for the session.

use thiserror::Error;

use crate::snapshot::{NetworkId, MAX_OBJECTS};

/// Opaque host scene handle.
pub type SceneHandle = u64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlotError {
    #[error("slot table is full ({MAX_OBJECTS} ids in use)")]
    Full,
    #[error("handle not present in slot table")]
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Empty,
    Tombstone,
    Occupied(SceneHandle),
}

#[derive(Debug)]
pub struct SlotTable {
    slots: Vec<Slot>,
    len: usize,
}

impl Default for SlotTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotTable {
    pub fn new() -> Self {
        Self {
            slots: vec![Slot::Empty; MAX_OBJECTS],
            len: 0,
        }
    }

    /// XOR-fold of the handle's 12-bit chunks.
    fn hash(handle: SceneHandle) -> usize {
        let mut acc = 0u64;
        let mut h = handle;
        while h != 0 {
            acc ^= h & 0x0FFF;
            h >>= 12;
        }
        acc as usize
    }

    /// Assigns a fresh id for `handle`, probing linearly with wraparound.
    /// Tombstones on the probe path are reused.
    pub fn insert(&mut self, handle: SceneHandle) -> Result<NetworkId, SlotError> {
        let start = Self::hash(handle);
        let mut first_tombstone = None;
        for step in 0..MAX_OBJECTS {
            let at = (start + step) % MAX_OBJECTS;
            match self.slots[at] {
                Slot::Empty => {
                    let at = first_tombstone.unwrap_or(at);
                    self.slots[at] = Slot::Occupied(handle);
                    self.len += 1;
                    return Ok(NetworkId::from_index(at as u16));
                }
                Slot::Tombstone => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(at);
                    }
                }
                Slot::Occupied(existing) if existing == handle => {
                    return Ok(NetworkId::from_index(at as u16));
                }
                Slot::Occupied(_) => {}
            }
        }
        if let Some(at) = first_tombstone {
            self.slots[at] = Slot::Occupied(handle);
            self.len += 1;
            return Ok(NetworkId::from_index(at as u16));
        }
        Err(SlotError::Full)
    }

    /// Client-side: mirrors the server's assignment at a fixed index.
    pub fn insert_at(&mut self, id: NetworkId, handle: SceneHandle) {
        let at = id.index() as usize;
        if !matches!(self.slots[at], Slot::Occupied(_)) {
            self.len += 1;
        }
        self.slots[at] = Slot::Occupied(handle);
    }

    /// Follows the probe sequence; stops at the first empty slot.
    pub fn find(&self, handle: SceneHandle) -> Result<NetworkId, SlotError> {
        let start = Self::hash(handle);
        for step in 0..MAX_OBJECTS {
            let at = (start + step) % MAX_OBJECTS;
            match self.slots[at] {
                Slot::Empty => return Err(SlotError::NotFound),
                Slot::Tombstone => {}
                Slot::Occupied(existing) => {
                    if existing == handle {
                        return Ok(NetworkId::from_index(at as u16));
                    }
                }
            }
        }
        Err(SlotError::NotFound)
    }

    pub fn get_at(&self, id: NetworkId) -> Option<SceneHandle> {
        match self.slots[id.index() as usize] {
            Slot::Occupied(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn remove_at(&mut self, id: NetworkId) -> Option<SceneHandle> {
        let at = id.index() as usize;
        match self.slots[at] {
            Slot::Occupied(handle) => {
                self.slots[at] = Slot::Tombstone;
                self.len -= 1;
                Some(handle)
            }
            _ => None,
        }
    }

    pub fn remove(&mut self, handle: SceneHandle) -> Result<NetworkId, SlotError> {
        let id = self.find(handle)?;
        self.remove_at(id);
        Ok(id)
    }

    pub fn contains(&self, id: NetworkId) -> bool {
        matches!(self.slots[id.index() as usize], Slot::Occupied(_))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Occupied entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (NetworkId, SceneHandle)> + '_ {
        self.slots.iter().enumerate().filter_map(|(at, slot)| match slot {
            Slot::Occupied(handle) => Some((NetworkId::from_index(at as u16), *handle)),
            _ => None,
        })
    }
}
