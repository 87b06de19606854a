use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use glam::Vec3;
use log::info;

use replica::net::channel::{PeerAddr, TcpChannel, UdpChannel};
use replica::{ClientSession, MemoryScene};

#[derive(Parser)]
#[command(name = "replica-client")]
#[command(about = "Headless replication client")]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server reliable (bootstrap) port.
    #[arg(long, default_value_t = 27960)]
    tcp_port: u16,

    /// Server unreliable (snapshot) port.
    #[arg(long, default_value_t = 27961)]
    udp_port: u16,

    /// Input send rate in Hz.
    #[arg(long, default_value_t = 20)]
    input_rate: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let tcp_addr: SocketAddr = format!("{}:{}", args.host, args.tcp_port)
        .parse()
        .context("reliable endpoint")?;
    let udp_addr: SocketAddr = format!("{}:{}", args.host, args.udp_port)
        .parse()
        .context("unreliable endpoint")?;

    let stream = TcpChannel::connect(tcp_addr).context("connecting reliable channel")?;
    let udp = UdpChannel::bind("0.0.0.0:0").context("binding unreliable channel")?;
    info!("connected to {tcp_addr}, datagrams via {}", udp.local_addr()?);

    let mut session = ClientSession::new(stream, udp, PeerAddr::Socket(udp_addr));
    let mut scene = MemoryScene::new();

    let input_interval = Duration::from_secs_f64(1.0 / args.input_rate.max(1) as f64);
    let mut last_pump = Instant::now();
    let mut last_input = Instant::now();
    let mut last_report = Instant::now();
    let start = Instant::now();
    let mut announced = false;

    loop {
        let now = Instant::now();
        let elapsed = now - last_pump;
        last_pump = now;

        session.pump(&mut scene, elapsed)?;

        if session.is_ready() && !announced {
            announced = true;
            info!(
                "in game as player {} with {} replicas",
                session.player_index().unwrap_or(0),
                scene.len()
            );
        }

        if session.is_ready() && now - last_input >= input_interval {
            last_input = now;
            // wander in a slow circle so visibility and inputs get exercise
            let t = start.elapsed().as_secs_f32() * 0.2;
            let position = Vec3::new(t.cos() * 5.0, 1.7, t.sin() * 5.0);
            let orientation = Vec3::new(0.0, t, 0.0);
            session.send_input(position, orientation)?;
        }

        if now - last_report >= Duration::from_secs(5) {
            last_report = now;
            let stats = session.stats();
            info!(
                "replicas={} rx={} datagrams ({} bytes) dropped={}",
                scene.len(),
                stats.datagrams_received,
                stats.bytes_received,
                stats.datagrams_dropped
            );
        }

        thread::sleep(Duration::from_millis(1));
    }
}
