use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use glam::Vec3;
use log::info;

use replica::net::channel::{TcpAcceptor, UdpChannel};
use replica::scene::SceneAdapter;
use replica::server::apply_input_to_scene;
use replica::{
    MemoryScene, NodeKind, PrecacheTables, ReplicaFlags, SceneHandle, ServerConfig, ServerEvent,
    ServerSession,
};

#[derive(Parser)]
#[command(name = "replica-server")]
#[command(about = "Authoritative replication server")]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Reliable (bootstrap) listen port.
    #[arg(long, default_value_t = 27960)]
    tcp_port: u16,

    /// Unreliable (snapshot) listen port.
    #[arg(long, default_value_t = 27961)]
    udp_port: u16,

    #[arg(long, default_value_t = 16)]
    max_clients: usize,

    #[arg(long, default_value_t = replica::DEFAULT_TICK_RATE)]
    tick_rate: u32,
}

fn demo_tables() -> PrecacheTables {
    let mut tables = PrecacheTables::default();
    tables.add_sound("sfx/ambient_hum.ogg");
    tables.add_sound("sfx/pickup.ogg");
    tables.add_model("models/player.glb");
    tables.add_model("models/crate.glb");
    tables.add_model("models/pillar.glb");
    tables.add_animation("anim/idle");
    tables.add_animation("anim/run");
    tables.add_particle("fx/dust");
    tables
}

/// A handful of static world objects so a connecting client sees something.
fn populate_world(
    scene: &mut MemoryScene,
    session: &mut ServerSession<TcpAcceptor, UdpChannel>,
) -> Result<()> {
    for i in 0..8 {
        let handle = scene.spawn(NodeKind::Spatial);
        let angle = i as f32 / 8.0 * std::f32::consts::TAU;
        scene.set_position(handle, Vec3::new(angle.cos() * 20.0, 0.0, angle.sin() * 20.0));
        scene.set_model(handle, if i % 2 == 0 { 1 } else { 2 });
        if let Some(node) = scene.node_mut(handle) {
            node.view_radius = 2.0;
        }
        session
            .replicator_mut()
            .register(handle, ReplicaFlags::default())
            .context("world object registration")?;
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let listener = TcpAcceptor::bind((args.bind.as_str(), args.tcp_port))
        .with_context(|| format!("binding tcp {}:{}", args.bind, args.tcp_port))?;
    let udp = UdpChannel::bind((args.bind.as_str(), args.udp_port))
        .with_context(|| format!("binding udp {}:{}", args.bind, args.udp_port))?;
    info!(
        "listening on {} (reliable) / {} (unreliable)",
        listener.local_addr()?,
        udp.local_addr()?
    );

    let config = ServerConfig {
        tick_rate: args.tick_rate,
        max_clients: args.max_clients,
        ..ServerConfig::default()
    };
    let mut session = ServerSession::new(listener, udp, demo_tables(), config);
    let mut scene = MemoryScene::new();
    populate_world(&mut scene, &mut session)?;

    let mut players: HashMap<u8, SceneHandle> = HashMap::new();
    let mut last_pump = Instant::now();

    loop {
        let now = Instant::now();
        let elapsed = now - last_pump;
        last_pump = now;

        session.pump(&mut scene, elapsed)?;

        let events: Vec<ServerEvent> = session.drain_events().collect();
        for event in events {
            match event {
                ServerEvent::ClientConnected { player_index } => {
                    let handle = scene.spawn(NodeKind::Spatial);
                    scene.set_model(handle, 0);
                    if let Some(node) = scene.node_mut(handle) {
                        node.view_radius = 1.0;
                    }
                    let id = session
                        .replicator_mut()
                        .register(handle, ReplicaFlags::default())
                        .context("player registration")?;
                    session.bind_player(player_index, id);
                    players.insert(player_index, handle);
                    info!("player {player_index} spawned as object {}", id.index());
                }
                ServerEvent::ClientReady { player_index } => {
                    info!("player {player_index} entered the game");
                }
                ServerEvent::ClientDisconnected { player_index } => {
                    if let Some(handle) = players.remove(&player_index) {
                        let _ = session.replicator_mut().unregister(handle);
                        scene.destroy(handle);
                    }
                    info!("player {player_index} left");
                }
            }
        }

        let indices: Vec<u8> = players.keys().copied().collect();
        for player_index in indices {
            if let Some(input) = session.take_input(player_index) {
                if let Some(&handle) = players.get(&player_index) {
                    apply_input_to_scene(&mut scene, handle, &input);
                }
            }
        }

        thread::sleep(Duration::from_millis(1));
    }
}
