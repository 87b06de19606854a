//! Authoritative client/server state replication.
//!
//! One peer runs the simulation and streams delta-compressed, bit-packed
//! snapshots of up to 4096 scene objects to the others over an unreliable
//! datagram channel, after a reliable bootstrap that carries the precache
//! lists and the initial full snapshot. Clients mirror whatever the server
//! reports, dead-reckon between snapshots, and smooth corrections over a
//! 100 ms window.
//!
//! The host scene stays behind the [`scene::SceneAdapter`] boundary; the
//! core is single-threaded and pumped cooperatively from the host's loop.

pub mod client;
pub mod net;
pub mod precache;
pub mod scene;
pub mod server;
pub mod session;
pub mod slot;
pub mod snapshot;
pub mod visibility;

pub use client::{ApplyOutcome, AppliedSnapshot, ClientReconciler};
pub use net::{
    CodecParams, NetworkStats, PacketReader, PacketWriter, PeerAddr, PlayerInput, VectorMode,
    MAX_DATAGRAM_BYTES,
};
pub use precache::{IndexWidth, IndexWidths, PrecacheTables};
pub use scene::{MemoryScene, NodeKind, SceneAdapter, SceneSample};
pub use server::{
    ClientCursor, ReplicaFlags, ServerConfig, ServerReplicator, DEFAULT_TICK_RATE,
};
pub use session::{ClientSession, ServerEvent, ServerSession, SessionError};
pub use slot::{SceneHandle, SlotError, SlotTable};
pub use snapshot::{
    FrameIndex, NetworkId, ObjectState, Snapshot, SnapshotStore, SoundRef, MAX_OBJECTS,
};
pub use visibility::{Frustum, ViewState};
