use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use log::{debug, info, warn};

use crate::net::channel::{DatagramSocket, PeerAddr, ReliableListener, ReliableStream};
use crate::net::packets::{datagram, reliable, PlayerInput, MAX_INPUT_BYTES};
use crate::net::stats::NetworkStats;
use crate::net::wire::{PacketReader, PacketWriter};
use crate::precache::PrecacheTables;
use crate::scene::SceneAdapter;
use crate::server::{ClientCursor, ServerConfig, ServerReplicator};
use crate::session::SessionError;
use crate::snapshot::NetworkId;

/// Callback writing the application-specific init-packet prefix. Returns the
/// number of bytes written.
pub type InitPrefixWriter = Box<dyn FnMut(&mut PacketWriter) -> usize>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerEvent {
    ClientConnected { player_index: u8 },
    ClientReady { player_index: u8 },
    ClientDisconnected { player_index: u8 },
}

struct ClientLink<S> {
    stream: S,
    tcp_peer: PeerAddr,
    cursor: ClientCursor,
    udp_addr: Option<PeerAddr>,
    init_sent: bool,
}

/// The authoritative session: accepts reliable connections, learns UDP
/// endpoints from bootstrap probes, runs the 20 Hz snapshot loop, and feeds
/// accepted inputs back to the host.
pub struct ServerSession<L: ReliableListener, D: DatagramSocket> {
    listener: L,
    udp: D,
    replicator: ServerReplicator,
    config: ServerConfig,
    clients: HashMap<u8, ClientLink<L::Stream>>,
    events: VecDeque<ServerEvent>,
    prefix_writer: Option<InitPrefixWriter>,
    accumulator: Duration,
    tick_duration: Duration,
    stats: NetworkStats,
}

impl<L: ReliableListener, D: DatagramSocket> ServerSession<L, D> {
    pub fn new(listener: L, udp: D, tables: PrecacheTables, config: ServerConfig) -> Self {
        let tick_duration = Duration::from_secs_f64(1.0 / config.tick_rate as f64);
        Self {
            listener,
            udp,
            replicator: ServerReplicator::new(tables, &config),
            config,
            clients: HashMap::new(),
            events: VecDeque::new(),
            prefix_writer: None,
            accumulator: Duration::ZERO,
            tick_duration,
            stats: NetworkStats::default(),
        }
    }

    pub fn set_init_prefix_writer(&mut self, writer: InitPrefixWriter) {
        self.prefix_writer = Some(writer);
    }

    pub fn replicator(&self) -> &ServerReplicator {
        &self.replicator
    }

    pub fn replicator_mut(&mut self) -> &mut ServerReplicator {
        &mut self.replicator
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.events.drain(..)
    }

    pub fn cursor(&self, player_index: u8) -> Option<&ClientCursor> {
        self.clients.get(&player_index).map(|l| &l.cursor)
    }

    /// Declares which replicated object represents this player; required
    /// before the init packet goes out, and excluded from the player's own
    /// deltas from then on.
    pub fn bind_player(&mut self, player_index: u8, id: NetworkId) {
        if let Some(link) = self.clients.get_mut(&player_index) {
            link.cursor.player_object = Some(id);
        }
    }

    /// Latest accepted input for a player, if a new one arrived.
    pub fn take_input(&mut self, player_index: u8) -> Option<PlayerInput> {
        self.clients
            .get_mut(&player_index)
            .and_then(|l| l.cursor.take_input())
    }

    /// Forcibly removes a client. Dropping its stream closes the reliable
    /// channel; the peer observes the closure on its next pump.
    pub fn kick(&mut self, player_index: u8) -> bool {
        if self.clients.remove(&player_index).is_none() {
            return false;
        }
        info!("client {player_index} kicked");
        self.events
            .push_back(ServerEvent::ClientDisconnected { player_index });
        true
    }

    /// One cooperative turn: drain the network, advance the 20 Hz clock, and
    /// emit whatever the clock owes. `elapsed` is wall time since the last
    /// pump.
    pub fn pump(
        &mut self,
        scene: &mut impl SceneAdapter,
        elapsed: Duration,
    ) -> Result<(), SessionError> {
        self.accept_new()?;
        self.poll_streams();
        self.poll_datagrams()?;

        self.accumulator += elapsed;
        while self.accumulator >= self.tick_duration {
            self.accumulator -= self.tick_duration;
            self.tick(scene);
        }

        self.send_pending_inits();
        Ok(())
    }

    fn accept_new(&mut self) -> Result<(), SessionError> {
        while let Some(stream) = self.listener.accept()? {
            if self.clients.len() >= self.config.max_clients {
                warn!("rejecting connection from {}: server full", stream.peer());
                continue; // dropping the stream closes it
            }
            let Some(player_index) =
                (0..self.config.max_clients as u8).find(|i| !self.clients.contains_key(i))
            else {
                continue;
            };
            let tcp_peer = stream.peer();
            info!("client {player_index} connected from {tcp_peer}");
            self.clients.insert(player_index, ClientLink {
                stream,
                tcp_peer,
                cursor: ClientCursor::new(player_index),
                udp_addr: None,
                init_sent: false,
            });
            self.events
                .push_back(ServerEvent::ClientConnected { player_index });
        }
        Ok(())
    }

    fn poll_streams(&mut self) {
        let mut dead: Vec<u8> = Vec::new();
        for (&player_index, link) in self.clients.iter_mut() {
            match link.stream.poll_payloads() {
                Ok(payloads) => {
                    for payload in payloads {
                        match payload.first() {
                            Some(&reliable::CLIENT_ACK) if payload.len() >= 2 => {
                                if payload[1] != player_index {
                                    warn!(
                                        "client {player_index} acked with wrong index {}",
                                        payload[1]
                                    );
                                    continue;
                                }
                                if !link.cursor.ready_for_game {
                                    link.cursor.ready_for_game = true;
                                    info!("client {player_index} ready");
                                    self.events
                                        .push_back(ServerEvent::ClientReady { player_index });
                                }
                            }
                            _ => debug!("client {player_index}: unknown reliable packet"),
                        }
                    }
                }
                Err(e) => {
                    info!("client {player_index} disconnected: {e}");
                    dead.push(player_index);
                }
            }
        }
        for player_index in dead {
            self.clients.remove(&player_index);
            self.events
                .push_back(ServerEvent::ClientDisconnected { player_index });
        }
    }

    fn poll_datagrams(&mut self) -> Result<(), SessionError> {
        for (bytes, from) in self.udp.poll()? {
            self.stats.record_received(bytes.len());
            match bytes.first() {
                Some(&datagram::UDP_HERE) if bytes.len() == 1 => {
                    self.learn_udp_endpoint(from);
                }
                Some(&datagram::PLAYER_INPUT) if bytes.len() <= MAX_INPUT_BYTES => {
                    let mut r = PacketReader::new(&bytes[1..]);
                    match PlayerInput::decode(&mut r) {
                        Ok(input) => self.handle_input(input, from),
                        Err(e) => {
                            debug!("dropping malformed input from {from}: {e}");
                            self.stats.record_dropped();
                        }
                    }
                }
                _ => debug!("ignoring unknown datagram from {from}"),
            }
        }
        Ok(())
    }

    /// The probe is a single type byte; pair it with the bootstrapping TCP
    /// peer on the same host that has no endpoint yet.
    fn learn_udp_endpoint(&mut self, from: PeerAddr) {
        let link = self
            .clients
            .values_mut()
            .find(|l| l.udp_addr.is_none() && l.tcp_peer.same_host(&from));
        if let Some(link) = link {
            debug!("client {}: udp endpoint {from}", link.cursor.player_index);
            link.udp_addr = Some(from);
            link.cursor.udp_confirmed = true;
        }
    }

    fn handle_input(&mut self, input: PlayerInput, from: PeerAddr) {
        let Some(link) = self.clients.get_mut(&input.player_index) else {
            debug!("input for unknown player {}", input.player_index);
            return;
        };
        if link.udp_addr.is_none() {
            link.udp_addr = Some(from);
            link.cursor.udp_confirmed = true;
        }
        if !link.cursor.accept_input(input) {
            debug!(
                "client {}: stale input sequence {}",
                input.player_index, input.sequence
            );
        }
    }

    fn tick(&mut self, scene: &mut impl SceneAdapter) {
        self.replicator.build_snapshot(scene);

        for link in self.clients.values_mut() {
            if !link.cursor.ready_for_game {
                continue;
            }
            let Some(udp_addr) = link.udp_addr else {
                continue;
            };
            let Some(bytes) = self.replicator.encode_datagram(&mut link.cursor) else {
                continue;
            };
            self.stats.record_snapshot(bytes.len());
            link.cursor.stats.record_snapshot(bytes.len());
            match self.udp.send_to(&bytes, udp_addr) {
                Ok(()) => {
                    self.stats.record_sent(bytes.len());
                    link.cursor.stats.record_sent(bytes.len());
                }
                Err(e) => warn!(
                    "failed to send snapshot to client {}: {e}",
                    link.cursor.player_index
                ),
            }
        }

        self.replicator
            .collect_garbage(self.clients.values().map(|l| &l.cursor));
    }

    fn send_pending_inits(&mut self) {
        if self.replicator.latest_frame().is_none() {
            return;
        }
        let mut dead: Vec<u8> = Vec::new();
        for (&player_index, link) in self.clients.iter_mut() {
            if link.init_sent || link.cursor.player_object.is_none() {
                continue;
            }
            let mut w = PacketWriter::new();
            if let Some(prefix) = &mut self.prefix_writer {
                let written = prefix(&mut w);
                debug_assert_eq!(written, w.len());
            }
            w.write_u8(player_index);
            self.replicator.tables().write(&mut w);
            if self
                .replicator
                .encode_bootstrap(link.cursor.player_object, &mut w)
                .is_none()
            {
                continue;
            }
            if w.len() > crate::net::MAX_RELIABLE_PAYLOAD {
                warn!(
                    "client {player_index}: init packet of {} bytes exceeds the reliable frame bound",
                    w.len()
                );
                dead.push(player_index);
                continue;
            }
            match link.stream.send_payload(w.as_slice()) {
                Ok(()) => {
                    info!("client {player_index}: init packet sent ({} bytes)", w.len());
                    link.init_sent = true;
                }
                Err(e) => {
                    info!("client {player_index} disconnected during init: {e}");
                    dead.push(player_index);
                }
            }
        }
        for player_index in dead {
            self.clients.remove(&player_index);
            self.events
                .push_back(ServerEvent::ClientDisconnected { player_index });
        }
    }
}
