//! Wire-level properties exercised through the public API: lossy-mode error
//! bounds, index-width derivation across a full session, and blob limits.

use std::time::Duration;

use glam::Vec3;

use replica::net::channel::{MemoryDatagramSocket, MemoryListener, PeerAddr};
use replica::net::codec::{decode_object, encode_object, VectorMode};
use replica::net::dirs::MAX_ANGULAR_ERROR;
use replica::net::{CodecParams, PacketReader, PacketWriter};
use replica::scene::SceneAdapter;
use replica::{
    ClientSession, MemoryScene, NetworkId, NodeKind, ObjectState, PrecacheTables, ReplicaFlags,
    ServerConfig, ServerEvent, ServerSession,
};

#[test]
fn half_mode_bounds_relative_error_for_2d() {
    let params = CodecParams {
        position: VectorMode::Half,
        orientation: VectorMode::Half,
        velocity: VectorMode::Half,
        scale: VectorMode::Half,
        ..CodecParams::default()
    };
    let mut state = ObjectState::new(NetworkId::from_index(1).with(NetworkId::IS_2D));
    state.position = Vec3::new(812.5, -33.25, 0.0);
    state.orientation = Vec3::new(0.0, 2.25, 0.0);
    state.velocity = Vec3::new(-14.75, 9.5, 0.0);

    let mut w = PacketWriter::new();
    encode_object(&state, None, &params, &mut w);
    let decoded = decode_object(&mut PacketReader::new(w.as_slice()), &params).unwrap();

    let position = decoded.fields.position.unwrap();
    for (got, want) in [
        (position.x, state.position.x),
        (position.y, state.position.y),
        (decoded.fields.orientation.unwrap().y, 2.25),
        (decoded.fields.velocity.unwrap().x, -14.75),
    ] {
        assert!(
            ((got - want) / want).abs() <= 1.0 / 1024.0,
            "{got} vs {want}"
        );
    }
    // 2D carries no Z anywhere
    assert_eq!(position.z, 0.0);
    assert_eq!(decoded.fields.velocity.unwrap().z, 0.0);
}

#[test]
fn compressed_mode_bounds_direction_error() {
    let params = CodecParams::default();
    let id = NetworkId::from_index(2).with(NetworkId::COMPRESSED_ORIENT_AND_VEL);

    // a deterministic spread of directions and magnitudes
    for i in 0..50 {
        let t = i as f32 * 0.37;
        let dir = Vec3::new(t.sin(), (t * 1.7).cos(), (t * 0.9).sin() - 0.5);
        let magnitude = 0.5 + i as f32 * 3.0;
        let mut state = ObjectState::new(id);
        state.velocity = dir.normalize() * magnitude;

        let mut w = PacketWriter::new();
        encode_object(&state, None, &params, &mut w);
        let decoded = decode_object(&mut PacketReader::new(w.as_slice()), &params).unwrap();
        let got = decoded.fields.velocity.unwrap();

        let angle = got
            .normalize()
            .dot(state.velocity.normalize())
            .clamp(-1.0, 1.0)
            .acos();
        assert!(angle <= MAX_ANGULAR_ERROR, "{angle} rad at i={i}");
        assert!((got.length() - magnitude).abs() / magnitude <= 1.0 / 512.0);
    }
}

#[test]
fn compressed_zero_velocity_is_exact() {
    let params = CodecParams::default();
    let id = NetworkId::from_index(3).with(NetworkId::COMPRESSED_ORIENT_AND_VEL);
    let mut baseline = ObjectState::new(id);
    baseline.velocity = Vec3::new(1.0, 0.0, 0.0);
    let mut state = baseline.clone();
    state.velocity = Vec3::ZERO;

    let mut w = PacketWriter::new();
    encode_object(&state, Some(&baseline), &params, &mut w);
    let decoded = decode_object(&mut PacketReader::new(w.as_slice()), &params).unwrap();
    assert_eq!(decoded.fields.velocity, Some(Vec3::ZERO));
}

#[test]
fn blob_carries_up_to_255_bytes() {
    let params = CodecParams::default();
    let payload: Vec<u8> = (0..=254u8).collect();
    let mut state = ObjectState::new(NetworkId::from_index(4));
    state.blob = Some(payload.clone());

    let mut w = PacketWriter::new();
    encode_object(&state, None, &params, &mut w);
    let decoded = decode_object(&mut PacketReader::new(w.as_slice()), &params).unwrap();
    assert_eq!(decoded.fields.blob.as_deref(), Some(payload.as_slice()));
}

#[test]
fn wide_model_indices_flow_through_a_full_session() {
    let mut tables = PrecacheTables::default();
    tables.add_sound("sfx/one.ogg");
    for i in 0..300 {
        tables.add_model(format!("models/m{i}.glb"));
    }

    let (listener, connector) = MemoryListener::new(1);
    let mut server_udp = MemoryDatagramSocket::new(1);
    let mut client_udp = MemoryDatagramSocket::new(2);
    MemoryDatagramSocket::link(&mut server_udp, &mut client_udp);

    let mut server = ServerSession::new(listener, server_udp, tables, ServerConfig::default());
    let mut client = ClientSession::new(
        connector.connect(2).unwrap(),
        client_udp,
        PeerAddr::Local(1),
    );
    let mut server_scene = MemoryScene::new();
    let mut client_scene = MemoryScene::new();

    let exotic = server_scene.spawn(NodeKind::Spatial);
    server_scene.set_position(exotic, Vec3::new(1.0, 0.0, 0.0));
    server_scene.set_model(exotic, 299);
    let exotic_id = server
        .replicator_mut()
        .register(exotic, ReplicaFlags::default())
        .unwrap();

    let tick = Duration::from_millis(50);
    for _ in 0..10 {
        server.pump(&mut server_scene, tick).unwrap();
        let events: Vec<ServerEvent> = server.drain_events().collect();
        for event in events {
            if let ServerEvent::ClientConnected { player_index } = event {
                let handle = server_scene.spawn(NodeKind::Spatial);
                let id = server
                    .replicator_mut()
                    .register(handle, ReplicaFlags::default())
                    .unwrap();
                server.bind_player(player_index, id);
            }
        }
        client.pump(&mut client_scene, tick).unwrap();
        if client.is_ready() {
            break;
        }
    }
    assert!(client.is_ready());

    let handle = client.reconciler().unwrap().handle_of(exotic_id).unwrap();
    assert_eq!(client_scene.node(handle).unwrap().model_index, 299);

    // and a later delta with a different wide index still decodes
    server_scene.set_model(exotic, 256);
    server.pump(&mut server_scene, tick).unwrap();
    client.pump(&mut client_scene, tick).unwrap();
    assert_eq!(client_scene.node(handle).unwrap().model_index, 256);
}

#[test]
fn sound_radius_byte_only_follows_spatial_sounds() {
    let params = CodecParams::default();

    let mut spatial = ObjectState::new(NetworkId::from_index(5));
    spatial.set_spatial_sound(3, 42);
    let mut w = PacketWriter::new();
    encode_object(&spatial, None, &params, &mut w);
    // header + i8 index + u8 radius
    assert_eq!(w.len(), 5);

    let mut flat = ObjectState::new(NetworkId::from_index(5));
    flat.set_flat_sound(3);
    let mut w = PacketWriter::new();
    encode_object(&flat, None, &params, &mut w);
    assert_eq!(w.len(), 4);
    let decoded = decode_object(&mut PacketReader::new(w.as_slice()), &params).unwrap();
    assert_eq!(decoded.fields.sound, Some((-5, 0)));
}
