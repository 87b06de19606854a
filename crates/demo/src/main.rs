//! The `both` role: one process hosting the authoritative session and a
//! mirroring client, wired by dependency injection of in-memory channels.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use glam::Vec3;
use log::info;

use replica::net::channel::{MemoryDatagramSocket, MemoryListener, PeerAddr};
use replica::net::simulator::{LinkConditions, SimulatedDatagramSocket};
use replica::scene::SceneAdapter;
use replica::{
    ClientSession, MemoryScene, NodeKind, PrecacheTables, ReplicaFlags, ServerConfig, ServerEvent,
    ServerSession,
};

const SERVER_ADDR: u32 = 1;
const CLIENT_ADDR: u32 = 2;

#[derive(Parser)]
#[command(name = "replica-demo")]
#[command(about = "Loopback server+client demo")]
struct Args {
    /// Simulated seconds to run.
    #[arg(long, default_value_t = 5)]
    seconds: u64,

    /// Number of orbiting objects in the world.
    #[arg(long, default_value_t = 32)]
    objects: u32,

    /// Fraction of server datagrams to drop (0.0..=1.0).
    #[arg(long, default_value_t = 0.0)]
    loss: f32,

    /// Seed for the loss pattern.
    #[arg(long, default_value_t = 1)]
    seed: u32,
}

fn tables() -> PrecacheTables {
    let mut tables = PrecacheTables::default();
    tables.add_sound("sfx/orbit.ogg");
    tables.add_model("models/player.glb");
    tables.add_model("models/asteroid.glb");
    tables.add_particle("fx/sparkle");
    tables
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let (listener, connector) = MemoryListener::new(SERVER_ADDR);
    let mut server_udp = MemoryDatagramSocket::new(SERVER_ADDR);
    let mut client_udp = MemoryDatagramSocket::new(CLIENT_ADDR);
    MemoryDatagramSocket::link(&mut server_udp, &mut client_udp);

    let conditions = LinkConditions {
        loss: args.loss.clamp(0.0, 1.0),
        ..LinkConditions::default()
    };
    let (server_udp, link) = SimulatedDatagramSocket::wrap(server_udp, conditions, args.seed);

    let mut server = ServerSession::new(listener, server_udp, tables(), ServerConfig::default());
    let stream = connector.connect(CLIENT_ADDR).context("loopback dial")?;
    let mut client = ClientSession::new(stream, client_udp, PeerAddr::Local(SERVER_ADDR));

    let mut server_scene = MemoryScene::new();
    let mut client_scene = MemoryScene::new();

    let mut asteroids = Vec::new();
    for i in 0..args.objects {
        let handle = server_scene.spawn(NodeKind::Spatial);
        let angle = i as f32 / args.objects.max(1) as f32 * std::f32::consts::TAU;
        server_scene.set_position(
            handle,
            Vec3::new(angle.cos() * 30.0, 0.0, angle.sin() * 30.0),
        );
        server_scene.set_model(handle, 1);
        server
            .replicator_mut()
            .register(handle, ReplicaFlags::default())
            .context("asteroid registration")?;
        asteroids.push((handle, angle));
    }

    let tick = Duration::from_millis(50);
    let steps = args.seconds * 20;
    let mut player = None;

    for step in 0..steps {
        // orbit the asteroids so deltas keep flowing
        let t = step as f32 * 0.05;
        for &(handle, phase) in &asteroids {
            let angle = phase + t * 0.3;
            server_scene.set_position(
                handle,
                Vec3::new(angle.cos() * 30.0, 0.0, angle.sin() * 30.0),
            );
        }

        server.pump(&mut server_scene, tick)?;
        let events: Vec<ServerEvent> = server.drain_events().collect();
        for event in events {
            match event {
                ServerEvent::ClientConnected { player_index } => {
                    let handle = server_scene.spawn(NodeKind::Spatial);
                    server_scene.set_model(handle, 0);
                    let id = server
                        .replicator_mut()
                        .register(handle, ReplicaFlags::default())
                        .context("player registration")?;
                    server.bind_player(player_index, id);
                    player = Some(handle);
                }
                ServerEvent::ClientReady { player_index } => {
                    info!("loopback client ready as player {player_index}");
                }
                ServerEvent::ClientDisconnected { .. } => {}
            }
        }
        if let (Some(handle), Some(input)) = (player, server.take_input(0)) {
            server_scene.set_position(handle, input.position);
            server_scene.set_orientation(handle, input.orientation);
        }

        client.pump(&mut client_scene, tick)?;
        if client.is_ready() {
            // stand back far enough to keep the whole orbit in view
            client.send_input(Vec3::new(0.0, 0.0, 120.0), Vec3::ZERO)?;
        }
    }

    let server_stats = *server.stats();
    let client_stats = *client.stats();
    info!(
        "server: {} datagrams out ({} bytes), last snapshot {} bytes, max {} bytes, {} simulated losses",
        server_stats.datagrams_sent,
        server_stats.bytes_sent,
        server_stats.last_snapshot_bytes,
        server_stats.max_snapshot_bytes,
        link.dropped()
    );
    info!(
        "client: {} datagrams in ({} bytes), {} replicas mirrored",
        client_stats.datagrams_received,
        client_stats.bytes_received,
        client_scene.len()
    );

    anyhow::ensure!(
        client_scene.len() == args.objects as usize,
        "client mirrored {} of {} objects",
        client_scene.len(),
        args.objects
    );
    info!("loopback demo completed over {} simulated seconds", args.seconds);
    Ok(())
}
