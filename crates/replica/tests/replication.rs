//! Full-session scenarios: a server and a client wired over in-memory
//! channels, exercising bootstrap, steady-state deltas, loss, attachment,
//! and deletion end to end.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use glam::Vec3;

use replica::net::channel::{MemoryDatagramSocket, MemoryListener, MemoryStream, PeerAddr};
use replica::scene::SceneAdapter;
use replica::{
    ClientSession, MemoryScene, NetworkId, NodeKind, PrecacheTables, ReplicaFlags, SceneHandle,
    ServerConfig, ServerEvent, ServerSession, SlotError,
};

const TICK: Duration = Duration::from_millis(50);
const SERVER_ADDR: u32 = 1;
const CLIENT_ADDR: u32 = 2;

/// A viewpoint from which every test object is inside the 90°×70° frustum.
const OVERLOOK: Vec3 = Vec3::new(0.0, 0.0, 500.0);

fn tables() -> PrecacheTables {
    let mut t = PrecacheTables::default();
    t.add_sound("sfx/hum.ogg");
    t.add_sound("sfx/boom.ogg");
    t.add_model("models/cube.glb");
    t.add_model("models/sphere.glb");
    t.add_model("models/rocket.glb");
    t.add_model("models/crate.glb");
    t.add_animation("anim/idle");
    t.add_particle("fx/trail");
    t
}

struct Pair {
    server: ServerSession<MemoryListener, MemoryDatagramSocket>,
    client: ClientSession<MemoryStream, MemoryDatagramSocket>,
    server_scene: MemoryScene,
    client_scene: MemoryScene,
    /// While non-zero, outgoing server datagrams are discarded.
    drop_snapshots: Arc<AtomicU32>,
}

impl Pair {
    fn new() -> Self {
        let (listener, connector) = MemoryListener::new(SERVER_ADDR);
        let mut server_udp = MemoryDatagramSocket::new(SERVER_ADDR);
        let mut client_udp = MemoryDatagramSocket::new(CLIENT_ADDR);
        MemoryDatagramSocket::link(&mut server_udp, &mut client_udp);

        let drop_snapshots = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&drop_snapshots);
        server_udp.set_drop_filter(Box::new(move |_| {
            if counter.load(Ordering::SeqCst) == 0 {
                return false;
            }
            counter.fetch_sub(1, Ordering::SeqCst);
            true
        }));

        let server = ServerSession::new(listener, server_udp, tables(), ServerConfig::default());
        let stream = connector.connect(CLIENT_ADDR).unwrap();
        let client = ClientSession::new(stream, client_udp, PeerAddr::Local(SERVER_ADDR));

        Self {
            server,
            client,
            server_scene: MemoryScene::new(),
            client_scene: MemoryScene::new(),
            drop_snapshots,
        }
    }

    fn spawn_registered(&mut self, position: Vec3) -> SceneHandle {
        let handle = self.server_scene.spawn(NodeKind::Spatial);
        self.server_scene.set_position(handle, position);
        self.server
            .replicator_mut()
            .register(handle, ReplicaFlags::default())
            .unwrap();
        handle
    }

    /// One 50 ms turn for both peers, server first, binding any newly
    /// connected player to a fresh player object.
    fn turn(&mut self) {
        self.server.pump(&mut self.server_scene, TICK).unwrap();
        let events: Vec<ServerEvent> = self.server.drain_events().collect();
        for event in events {
            if let ServerEvent::ClientConnected { player_index } = event {
                let handle = self.server_scene.spawn(NodeKind::Spatial);
                let id = self
                    .server
                    .replicator_mut()
                    .register(handle, ReplicaFlags::default())
                    .unwrap();
                self.server.bind_player(player_index, id);
            }
        }
        self.client.pump(&mut self.client_scene, TICK).unwrap();
    }

    /// Runs turns until the client has bootstrapped and the server has both
    /// the ready ack and the UDP endpoint.
    fn establish(&mut self) {
        for _ in 0..10 {
            self.turn();
            if self.client.is_ready() {
                let idx = self.client.player_index().unwrap();
                if self
                    .server
                    .cursor(idx)
                    .is_some_and(|c| c.ready_for_game && c.udp_confirmed)
                {
                    return;
                }
            }
        }
        panic!("session failed to establish");
    }

    /// Sends one input (from the overlook viewpoint) and lets the server
    /// ingest it without ticking.
    fn ack_latest(&mut self) {
        self.client.send_input(OVERLOOK, Vec3::ZERO).unwrap();
        self.server
            .pump(&mut self.server_scene, Duration::ZERO)
            .unwrap();
    }

    fn client_position(&self, id: NetworkId) -> Option<Vec3> {
        self.client.reconciler()?.position_of(id)
    }

    fn client_handle(&self, id: NetworkId) -> Option<SceneHandle> {
        self.client.reconciler()?.handle_of(id)
    }
}

#[test]
fn s1_single_static_cube_bootstrap() {
    let mut pair = Pair::new();
    let cube = pair.spawn_registered(Vec3::new(10.0, 0.0, 5.0));
    pair.server_scene.set_model(cube, 3);
    let cube_id = pair.server.replicator().id_of(cube).unwrap();

    pair.establish();

    // client scene: the cube and nothing else (the player's own object is
    // excluded from the init packet)
    assert_eq!(pair.client_scene.len(), 1);
    let handle = pair.client_handle(cube_id).unwrap();
    let node = pair.client_scene.node(handle).unwrap();
    assert_eq!(node.position, Vec3::new(10.0, 0.0, 5.0));
    assert_eq!(node.model_index, 3);
    assert_eq!(node.scale, Vec3::ONE);
    assert!(pair.client_scene.precached_tables().is_some());
}

#[test]
fn s2_dead_reckoned_projectile() {
    let mut pair = Pair::new();
    pair.establish();

    // spawn the projectile after bootstrap so it arrives via a datagram
    let projectile = pair.spawn_registered(Vec3::ZERO);
    pair.server_scene
        .set_velocity(projectile, Vec3::new(100.0, 0.0, 0.0));
    let id = pair.server.replicator().id_of(projectile).unwrap();

    // server tick sends position+velocity; client applies at t=0
    pair.server.pump(&mut pair.server_scene, TICK).unwrap();
    pair.client
        .pump(&mut pair.client_scene, Duration::ZERO)
        .unwrap();
    assert_eq!(pair.client_position(id), Some(Vec3::ZERO));
    pair.ack_latest();

    // the server moves the projectile exactly as dead reckoning predicts;
    // the next snapshot carries neither position nor velocity for it
    let sent_before = pair.server.stats().bytes_sent;
    pair.server_scene
        .set_position(projectile, Vec3::new(5.0, 0.0, 0.0));
    pair.server.pump(&mut pair.server_scene, TICK).unwrap();
    let snapshot_bytes = pair.server.stats().bytes_sent - sent_before;
    assert_eq!(
        snapshot_bytes,
        replica::net::SNAPSHOT_HEADER_BYTES as u64 + 2,
        "quiescent snapshot should be header + empty deletion list"
    );

    // one tick of client time: local integration reproduces the motion
    pair.client.pump(&mut pair.client_scene, TICK).unwrap();
    let position = pair.client_position(id).unwrap();
    assert!((position.x - 5.0).abs() < 0.1, "{position:?}");
}

#[test]
fn s3_lossy_delivery_and_gc() {
    let mut pair = Pair::new();
    let mover = pair.spawn_registered(Vec3::new(1.0, 0.0, 0.0));
    let id = pair.server.replicator().id_of(mover).unwrap();
    pair.establish();

    pair.ack_latest();
    let acked = pair.server.cursor(0).unwrap().last_acked.unwrap();

    // the next two snapshots vanish in transit; the third arrives
    pair.drop_snapshots.store(2, Ordering::SeqCst);
    for step in 1..=3 {
        pair.server_scene
            .set_position(mover, Vec3::new(1.0 + step as f32, 0.0, 0.0));
        pair.server.pump(&mut pair.server_scene, TICK).unwrap();
        pair.client
            .pump(&mut pair.client_scene, Duration::ZERO)
            .unwrap();
    }

    let applied = pair.client.last_applied().unwrap();
    assert_eq!(applied.frame.delta(acked), 3, "only the third datagram landed");

    // the delta was encoded against the still-acked old baseline, so the
    // surviving datagram alone reconstructs the latest position (after the
    // 100 ms correction window plays out)
    pair.client.pump(&mut pair.client_scene, TICK).unwrap();
    pair.client.pump(&mut pair.client_scene, TICK).unwrap();
    let position = pair.client_position(id).unwrap();
    assert!((position - Vec3::new(4.0, 0.0, 0.0)).length() < 1e-3, "{position:?}");

    // server never advanced the cursor while datagrams were lost
    assert_eq!(pair.server.cursor(0).unwrap().last_acked, Some(acked));
    assert!(pair.server.replicator().baseline_available(acked));

    // the ack flows; frames at and before it stay, older ones are collected
    pair.ack_latest();
    assert_eq!(
        pair.server.cursor(0).unwrap().last_acked,
        Some(applied.frame)
    );
    pair.server.pump(&mut pair.server_scene, TICK).unwrap();
    assert!(!pair.server.replicator().baseline_available(acked));
    assert!(pair.server.replicator().baseline_available(applied.frame));
}

#[test]
fn s4_attachment_transition() {
    let mut pair = Pair::new();
    let carrier = pair.spawn_registered(Vec3::new(50.0, 0.0, 0.0));
    let rocket = pair.spawn_registered(Vec3::ZERO);
    pair.server_scene
        .set_velocity(rocket, Vec3::new(10.0, 0.0, 0.0));
    let carrier_id = pair.server.replicator().id_of(carrier).unwrap();
    let rocket_id = pair.server.replicator().id_of(rocket).unwrap();
    pair.establish();
    pair.ack_latest();

    // attach: the rocket stops advertising its own transform
    pair.server
        .replicator_mut()
        .attach(rocket, carrier)
        .unwrap();
    pair.server_scene.set_velocity(rocket, Vec3::ZERO);
    pair.server.pump(&mut pair.server_scene, TICK).unwrap();
    pair.client.pump(&mut pair.client_scene, TICK).unwrap();

    let rocket_pos = pair.client_position(rocket_id).unwrap();
    let carrier_pos = pair.client_position(carrier_id).unwrap();
    assert_eq!(rocket_pos, carrier_pos, "attached replica copies its parent");
    pair.ack_latest();

    // detach with fresh velocity: kinematic motion resumes
    pair.server.replicator_mut().detach(rocket).unwrap();
    pair.server_scene
        .set_position(rocket, Vec3::new(50.0, 0.0, 0.0));
    pair.server_scene
        .set_velocity(rocket, Vec3::new(20.0, 0.0, 0.0));
    pair.server.pump(&mut pair.server_scene, TICK).unwrap();
    pair.client.pump(&mut pair.client_scene, TICK).unwrap();
    pair.client.pump(&mut pair.client_scene, TICK).unwrap();

    let rocket_pos = pair.client_position(rocket_id).unwrap();
    assert!(rocket_pos.x > 50.0, "{rocket_pos:?}");
}

#[test]
fn s5_sound_on_destroyed_object() {
    let mut pair = Pair::new();
    pair.establish();
    pair.ack_latest();

    let emitter = pair.spawn_registered(Vec3::new(2.0, 0.0, 0.0));
    let id = pair.server.replicator().id_of(emitter).unwrap();
    if let Some(node) = pair.server_scene.node_mut(emitter) {
        node.sound_index = 1;
        node.sound_radius = 20;
    }
    pair.server.pump(&mut pair.server_scene, TICK).unwrap();
    pair.client.pump(&mut pair.client_scene, TICK).unwrap();

    let handle = pair.client_handle(id).unwrap();
    assert_eq!(
        pair.client_scene.node(handle).unwrap().audio.len(),
        1,
        "3d player instantiated"
    );
    pair.ack_latest();

    // destroy on the server; the deletion block reaches the client
    pair.server_scene.destroy(emitter);
    pair.server.pump(&mut pair.server_scene, TICK).unwrap();
    pair.client.pump(&mut pair.client_scene, TICK).unwrap();

    assert!(pair.client_scene.node(handle).is_none());
    assert_eq!(pair.client_handle(id), None, "slot freed");

    // later snapshots never mention the id again
    pair.ack_latest();
    pair.server.pump(&mut pair.server_scene, TICK).unwrap();
    let before = pair.client.last_applied().unwrap();
    pair.client.pump(&mut pair.client_scene, TICK).unwrap();
    let after = pair.client.last_applied().unwrap();
    assert!(after.frame.newer_than(before.frame));
    assert_eq!(after.deleted, 0);
}

#[test]
fn slot_exhaustion_is_fatal() {
    let mut pair = Pair::new();
    for _ in 0..replica::MAX_OBJECTS {
        let h = pair.server_scene.spawn(NodeKind::Spatial);
        pair.server
            .replicator_mut()
            .register(h, ReplicaFlags::default())
            .unwrap();
    }
    let h = pair.server_scene.spawn(NodeKind::Spatial);
    assert_eq!(
        pair.server
            .replicator_mut()
            .register(h, ReplicaFlags::default()),
        Err(SlotError::Full)
    );
}

#[test]
fn deferred_objects_arrive_across_ticks() {
    let mut pair = Pair::new();
    pair.establish();

    // a burst of new objects whose first full records exceed one datagram
    for i in 0..120 {
        let h = pair.spawn_registered(Vec3::new(i as f32, 0.0, 0.0));
        pair.server_scene.set_model(h, (i % 4) as i16);
        pair.server_scene.set_scale(h, Vec3::splat(2.0));
        pair.server_scene
            .set_orientation(h, Vec3::new(0.0, 0.5, 0.0));
    }

    // no acks: the server full-sends from a rotating scan offset, so every
    // object lands within a few bounded datagrams
    for _ in 0..6 {
        pair.server.pump(&mut pair.server_scene, TICK).unwrap();
        assert!(pair.server.stats().last_snapshot_bytes <= replica::MAX_DATAGRAM_BYTES);
        pair.client
            .pump(&mut pair.client_scene, Duration::ZERO)
            .unwrap();
    }

    assert_eq!(pair.client.reconciler().unwrap().replica_count(), 120);
}

#[test]
fn flat_compressed_and_blob_objects_replicate() {
    let mut pair = Pair::new();

    // a 2D sprite: position in the plane, a single rotation angle
    let sprite = pair.server_scene.spawn(NodeKind::Flat);
    pair.server_scene.set_position(sprite, Vec3::new(4.0, 9.0, 0.0));
    pair.server_scene
        .set_orientation(sprite, Vec3::new(0.0, 1.25, 0.0));
    let sprite_id = pair
        .server
        .replicator_mut()
        .register(sprite, ReplicaFlags { is_2d: true, compressed: false })
        .unwrap();

    // a codebook-compressed mover
    let dart = pair.server_scene.spawn(NodeKind::Spatial);
    pair.server_scene
        .set_velocity(dart, Vec3::new(30.0, 10.0, -5.0));
    let dart_id = pair
        .server
        .replicator_mut()
        .register(dart, ReplicaFlags { is_2d: false, compressed: true })
        .unwrap();

    // an opaque payload rider
    let courier = pair.spawn_registered(Vec3::new(2.0, 0.0, 0.0));
    pair.server_scene.set_blob(courier, &[0xAB, 0xCD, 0xEF]);
    let courier_id = pair.server.replicator().id_of(courier).unwrap();

    pair.establish();

    let sprite_handle = pair.client_handle(sprite_id).unwrap();
    let sprite_node = pair.client_scene.node(sprite_handle).unwrap();
    assert_eq!(sprite_node.kind, NodeKind::Flat);
    assert_eq!(sprite_node.position, Vec3::new(4.0, 9.0, 0.0));
    assert_eq!(sprite_node.orientation, Vec3::new(0.0, 1.25, 0.0));

    // direction-quantized velocity lands within the codebook tolerance
    let dart_handle = pair.client_handle(dart_id).unwrap();
    let velocity = pair.client_scene.node(dart_handle).unwrap().velocity;
    let truth = Vec3::new(30.0, 10.0, -5.0);
    let angle = velocity
        .normalize()
        .dot(truth.normalize())
        .clamp(-1.0, 1.0)
        .acos();
    assert!(angle <= replica::net::dirs::MAX_ANGULAR_ERROR, "{velocity:?}");
    assert!((velocity.length() - truth.length()).abs() / truth.length() < 0.01);

    let courier_handle = pair.client_handle(courier_id).unwrap();
    assert_eq!(
        pair.client_scene.node(courier_handle).unwrap().blob.as_deref(),
        Some(&[0xAB, 0xCD, 0xEF][..])
    );
}

#[test]
fn two_clients_see_each_other() {
    let (listener, connector) = MemoryListener::new(SERVER_ADDR);
    let mut server_udp = MemoryDatagramSocket::new(SERVER_ADDR);
    let mut udp_a = MemoryDatagramSocket::new(10);
    let mut udp_b = MemoryDatagramSocket::new(11);
    MemoryDatagramSocket::link(&mut server_udp, &mut udp_a);
    MemoryDatagramSocket::link(&mut server_udp, &mut udp_b);

    let mut server = ServerSession::new(listener, server_udp, tables(), ServerConfig::default());
    let mut client_a = ClientSession::new(
        connector.connect(10).unwrap(),
        udp_a,
        PeerAddr::Local(SERVER_ADDR),
    );
    let mut client_b = ClientSession::new(
        connector.connect(11).unwrap(),
        udp_b,
        PeerAddr::Local(SERVER_ADDR),
    );

    let mut server_scene = MemoryScene::new();
    let mut scene_a = MemoryScene::new();
    let mut scene_b = MemoryScene::new();

    for _ in 0..10 {
        server.pump(&mut server_scene, TICK).unwrap();
        let events: Vec<ServerEvent> = server.drain_events().collect();
        for event in events {
            if let ServerEvent::ClientConnected { player_index } = event {
                let handle = server_scene.spawn(NodeKind::Spatial);
                server_scene
                    .set_position(handle, Vec3::new(player_index as f32 * 10.0, 0.0, 0.0));
                let id = server
                    .replicator_mut()
                    .register(handle, ReplicaFlags::default())
                    .unwrap();
                server.bind_player(player_index, id);
            }
        }
        client_a.pump(&mut scene_a, TICK).unwrap();
        client_b.pump(&mut scene_b, TICK).unwrap();
        client_a.send_input(OVERLOOK, Vec3::ZERO).unwrap();
        client_b.send_input(OVERLOOK, Vec3::ZERO).unwrap();
    }

    assert!(client_a.is_ready() && client_b.is_ready());
    // each client's scene holds exactly one foreign object: the other player
    assert_eq!(scene_a.len(), 1);
    assert_eq!(scene_b.len(), 1);
}
