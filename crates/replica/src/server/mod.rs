//! Authoritative side: samples the scene into per-frame snapshots and turns
//! them into per-client delta datagrams.
//!
//! The replicator owns the slot table, the snapshot history, and the
//! per-object replication metadata (sticky id flags, attachment). Client
//! cursors hold everything known about one peer: its ack, its input
//! sequence, its viewpoint, and deletions still owed to it.

use std::collections::{HashMap, HashSet};

use glam::Vec3;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::net::codec::{encode_object, CodecParams};
use crate::net::packets::{PlayerInput, MAX_DATAGRAM_BYTES};
use crate::net::stats::NetworkStats;
use crate::net::wire::PacketWriter;
use crate::precache::PrecacheTables;
use crate::scene::SceneAdapter;
use crate::slot::{SceneHandle, SlotError, SlotTable};
use crate::snapshot::{FrameIndex, NetworkId, ObjectState, Snapshot, SnapshotStore};
use crate::visibility::{should_transmit, Frustum, ViewState};

pub const DEFAULT_TICK_RATE: u32 = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub tick_rate: u32,
    pub max_clients: usize,
    pub snapshot_history: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            max_clients: 16,
            snapshot_history: 1024,
        }
    }
}

/// Creation-time replication traits of an object.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplicaFlags {
    pub is_2d: bool,
    /// Quantize orientation and velocity through the direction codebook.
    pub compressed: bool,
}

#[derive(Debug, Clone, Copy)]
struct ObjectMeta {
    id: NetworkId,
    attached_to: Option<NetworkId>,
}

/// A deletion owed to one client until an ack proves delivery.
#[derive(Debug, Clone, Copy)]
struct DeferredDeletion {
    id: NetworkId,
    first_sent: Option<FrameIndex>,
}

/// Everything the server tracks about one connected client.
#[derive(Debug)]
pub struct ClientCursor {
    pub player_index: u8,
    pub last_acked: Option<FrameIndex>,
    pub input_sequence: u32,
    pub udp_confirmed: bool,
    pub ready_for_game: bool,
    /// The scene object representing this player, excluded from its own
    /// deltas.
    pub player_object: Option<NetworkId>,
    pub view: Option<ViewState>,
    /// Traffic counters for this client alone.
    pub stats: NetworkStats,
    latest_input: Option<PlayerInput>,
    deferred_deletions: Vec<DeferredDeletion>,
    /// Where the next datagram resumes scanning snapshot objects, so
    /// budget-deferred objects are reached on later ticks.
    scan_start: usize,
}

impl ClientCursor {
    pub fn new(player_index: u8) -> Self {
        Self {
            player_index,
            last_acked: None,
            input_sequence: 0,
            udp_confirmed: false,
            ready_for_game: false,
            player_object: None,
            view: None,
            stats: NetworkStats::default(),
            latest_input: None,
            deferred_deletions: Vec::new(),
            scan_start: 0,
        }
    }

    /// Applies one input packet. Stale sequences are dropped wholesale; a
    /// stale embedded ack can never regress the cursor.
    pub fn accept_input(&mut self, input: PlayerInput) -> bool {
        if input.sequence <= self.input_sequence {
            return false;
        }
        self.input_sequence = input.sequence;
        self.observe_ack(input.acked_frame);
        self.view = Some(ViewState {
            position: input.position,
            orientation: input.orientation,
        });
        self.latest_input = Some(input);
        true
    }

    pub fn observe_ack(&mut self, frame: FrameIndex) {
        if self.last_acked.is_none_or(|acked| frame.newer_than(acked)) {
            self.last_acked = Some(frame);
        }
    }

    /// The most recent accepted input, consumed by the host to drive the
    /// player's scene object.
    pub fn take_input(&mut self) -> Option<PlayerInput> {
        self.latest_input.take()
    }
}

pub struct ServerReplicator {
    tables: PrecacheTables,
    params: CodecParams,
    slots: SlotTable,
    meta: HashMap<u16, ObjectMeta>,
    store: SnapshotStore,
    pending_deletions: Vec<NetworkId>,
    frame: FrameIndex,
}

impl ServerReplicator {
    pub fn new(tables: PrecacheTables, config: &ServerConfig) -> Self {
        let params = CodecParams::with_widths(tables.widths());
        Self {
            tables,
            params,
            slots: SlotTable::new(),
            meta: HashMap::new(),
            store: SnapshotStore::with_max_frames(config.snapshot_history),
            pending_deletions: Vec::new(),
            frame: FrameIndex::ZERO,
        }
    }

    pub fn tables(&self) -> &PrecacheTables {
        &self.tables
    }

    pub fn params(&self) -> &CodecParams {
        &self.params
    }

    pub fn latest_frame(&self) -> Option<FrameIndex> {
        self.store.latest().map(|s| s.frame)
    }

    /// Whether a baseline for `frame` still exists (false after GC).
    pub fn baseline_available(&self, frame: FrameIndex) -> bool {
        self.store.find(frame).is_some()
    }

    pub fn object_count(&self) -> usize {
        self.slots.len()
    }

    /// Brings a scene object under replication. Failure means the 4096-id
    /// budget is exhausted, which is fatal to the session.
    pub fn register(
        &mut self,
        handle: SceneHandle,
        flags: ReplicaFlags,
    ) -> Result<NetworkId, SlotError> {
        let slot = self.slots.insert(handle)?;
        let mut id = slot;
        if flags.is_2d {
            id = id.with(NetworkId::IS_2D);
        }
        if flags.compressed {
            id = id.with(NetworkId::COMPRESSED_ORIENT_AND_VEL);
        }
        self.meta.insert(slot.index(), ObjectMeta {
            id,
            attached_to: None,
        });
        Ok(id)
    }

    /// Stops replicating an object; the id enters the next frame's deletion
    /// list.
    pub fn unregister(&mut self, handle: SceneHandle) -> Result<NetworkId, SlotError> {
        let id = self.slots.remove(handle)?;
        self.meta.remove(&id.index());
        self.pending_deletions.push(NetworkId::from_index(id.index()));
        Ok(id)
    }

    pub fn id_of(&self, handle: SceneHandle) -> Option<NetworkId> {
        let slot = self.slots.find(handle).ok()?;
        self.meta.get(&slot.index()).map(|m| m.id)
    }

    /// Parents `handle`'s replication to `parent` by network id. While
    /// attached, transform fields stop flowing and the client copies the
    /// parent's transform.
    pub fn attach(&mut self, handle: SceneHandle, parent: SceneHandle) -> Result<(), SlotError> {
        let slot = self.slots.find(handle)?;
        let parent_id = self.slots.find(parent)?;
        let meta = self.meta.get_mut(&slot.index()).ok_or(SlotError::NotFound)?;
        meta.attached_to = Some(NetworkId::from_index(parent_id.index()));
        Ok(())
    }

    pub fn detach(&mut self, handle: SceneHandle) -> Result<(), SlotError> {
        let slot = self.slots.find(handle)?;
        let meta = self.meta.get_mut(&slot.index()).ok_or(SlotError::NotFound)?;
        meta.attached_to = None;
        Ok(())
    }

    /// Samples every registered object into `Snapshot(t)` and appends it to
    /// the history. Objects the scene no longer knows are unregistered and
    /// recorded as deletions in this frame.
    pub fn build_snapshot(&mut self, scene: &impl SceneAdapter) -> FrameIndex {
        self.frame = self.frame.next();
        let mut snapshot = Snapshot::new(self.frame);

        let mut vanished: Vec<SceneHandle> = Vec::new();
        for (slot, handle) in self.slots.iter() {
            let Some(meta) = self.meta.get(&slot.index()) else {
                continue;
            };
            let Some(sample) = scene.sample(handle) else {
                vanished.push(handle);
                continue;
            };
            let mut state = ObjectState::new(meta.id);
            state.position = sample.position;
            state.orientation = sample.orientation;
            state.scale = sample.scale;
            state.velocity = sample.velocity;
            state.model_index = sample.model_index;
            state.animation_index = sample.animation_index;
            state.particle_index = sample.particle_index;
            state.sound_index = sample.sound_index;
            state.sound_radius = sample.sound_radius;
            state.view_radius = sample.view_radius;
            state.attached_to = meta.attached_to;
            state.blob = sample.blob;
            snapshot.objects.push(state);
        }
        for handle in vanished {
            let _ = self.unregister(handle);
        }

        snapshot.deleted = std::mem::take(&mut self.pending_deletions);
        self.store.append(snapshot);
        self.frame
    }

    /// Encodes the latest snapshot for one client: baseline lookup,
    /// visibility filter, delta records under the 1400-byte budget, then the
    /// aggregated deletion list. Objects that miss the budget wait for a
    /// later tick; deletions that miss it are deferred on the cursor until
    /// an ack proves delivery.
    pub fn encode_datagram(&self, cursor: &mut ClientCursor) -> Option<Vec<u8>> {
        let snapshot = self.store.latest()?;
        let frame = snapshot.frame;

        let baseline = cursor.last_acked.and_then(|acked| self.store.find(acked));
        if cursor.last_acked.is_some() && baseline.is_none() {
            debug!(
                "client {}: baseline {:?} collected, falling back to full encode",
                cursor.player_index, cursor.last_acked
            );
        }
        let baseline_objects = baseline.map(|s| s.by_index());

        // Deletions owed: the un-acked frame window plus anything deferred
        // from earlier over-budget datagrams.
        if let Some(acked) = cursor.last_acked {
            cursor
                .deferred_deletions
                .retain(|d| d.first_sent.is_none_or(|first| first.newer_than(acked)));
        }
        let mut deleted: Vec<NetworkId> = Vec::new();
        let mut seen: HashSet<u16> = HashSet::new();
        for old in self.store.range_after(cursor.last_acked, frame) {
            for &id in &old.deleted {
                if seen.insert(id.index()) {
                    deleted.push(id);
                }
            }
        }
        for d in &cursor.deferred_deletions {
            if seen.insert(d.id.index()) {
                deleted.push(d.id);
            }
        }

        let deletion_budget = (MAX_DATAGRAM_BYTES - crate::net::SNAPSHOT_HEADER_BYTES - 2) / 2;
        let overflow: Vec<NetworkId> = deleted.split_off(deleted.len().min(deletion_budget));
        let deletion_bytes = 2 + 2 * deleted.len();

        let frustum = cursor.view.as_ref().map(Frustum::from_view);

        let mut w = PacketWriter::with_capacity(MAX_DATAGRAM_BYTES);
        w.write_u24(frame.get());
        let count_at = w.len();
        w.write_u16(0);

        let mut count: u16 = 0;
        let total = snapshot.objects.len();
        let scan_start = if cursor.scan_start < total {
            cursor.scan_start
        } else {
            0
        };
        let mut resume_at = 0;
        for step in 0..total {
            let at = (scan_start + step) % total;
            let state = &snapshot.objects[at];
            if cursor
                .player_object
                .is_some_and(|own| own.index() == state.id.index())
            {
                continue;
            }
            if let (Some(view), Some(frustum)) = (&cursor.view, &frustum) {
                if !should_transmit(state, view, frustum) {
                    continue;
                }
            }
            let object_baseline = baseline_objects
                .as_ref()
                .and_then(|m| m.get(&state.id.index()).copied());

            let start = w.len();
            let written = encode_object(state, object_baseline, &self.params, &mut w);
            if written == 0 {
                continue;
            }
            if w.len() + deletion_bytes > MAX_DATAGRAM_BYTES {
                w.truncate(start);
                debug!(
                    "client {}: datagram budget reached at {} objects, deferring the rest",
                    cursor.player_index, count
                );
                resume_at = at;
                break;
            }
            count += 1;
        }
        cursor.scan_start = resume_at;
        w.patch_u16(count_at, count);

        w.write_u16(deleted.len() as u16);
        let mut written: HashSet<u16> = HashSet::with_capacity(deleted.len());
        for id in &deleted {
            w.write_u16(id.index());
            written.insert(id.index());
        }

        // Bookkeeping for at-least-once deletion delivery.
        for d in &mut cursor.deferred_deletions {
            if written.contains(&d.id.index()) && d.first_sent.is_none() {
                d.first_sent = Some(frame);
            }
        }
        for id in overflow {
            let known = cursor
                .deferred_deletions
                .iter()
                .any(|d| d.id.index() == id.index());
            if !known {
                cursor.deferred_deletions.push(DeferredDeletion {
                    id,
                    first_sent: None,
                });
            }
        }

        debug_assert!(w.len() <= MAX_DATAGRAM_BYTES);
        Some(w.into_vec())
    }

    /// Full-state encoding for the reliable init packet: no baseline, no
    /// culling, the player's own object omitted. Returns the frame the
    /// records describe.
    pub fn encode_bootstrap(
        &self,
        exclude: Option<NetworkId>,
        out: &mut PacketWriter,
    ) -> Option<FrameIndex> {
        let snapshot = self.store.latest()?;
        out.write_u24(snapshot.frame.get());
        let count_at = out.len();
        out.write_u16(0);
        let mut count: u16 = 0;
        for state in &snapshot.objects {
            if exclude.is_some_and(|own| own.index() == state.id.index()) {
                continue;
            }
            if encode_object(state, None, &self.params, out) > 0 {
                count += 1;
            }
        }
        out.patch_u16(count_at, count);
        Some(snapshot.frame)
    }

    /// Drops history no cursor can still need. Clients that have never
    /// acked hold everything back (the store's own bound still applies).
    pub fn collect_garbage<'a>(&mut self, acks: impl Iterator<Item = &'a ClientCursor>) {
        let mut min: Option<FrameIndex> = None;
        let mut any_unacked = false;
        let mut any_client = false;
        for cursor in acks {
            any_client = true;
            match cursor.last_acked {
                None => any_unacked = true,
                Some(acked) => {
                    min = Some(match min {
                        Some(m) if m.newer_than(acked) => acked,
                        Some(m) => m,
                        None => acked,
                    });
                }
            }
        }
        if any_unacked {
            return;
        }
        match (any_client, min, self.store.latest().map(|s| s.frame)) {
            (true, Some(min), _) => self.store.gc(min),
            (false, _, Some(latest)) => self.store.gc(latest),
            _ => {}
        }
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &SnapshotStore {
        &self.store
    }
}

/// Drives the player's scene object from its latest input.
pub fn apply_input_to_scene(
    scene: &mut impl SceneAdapter,
    handle: SceneHandle,
    input: &PlayerInput,
) {
    scene.set_position(handle, input.position);
    scene.set_orientation(handle, input.orientation);
    scene.set_velocity(handle, Vec3::ZERO);
}
