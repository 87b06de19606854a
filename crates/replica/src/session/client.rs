use std::time::Duration;

use glam::Vec3;
use log::{debug, info, warn};

use crate::client::{ApplyOutcome, AppliedSnapshot, ClientReconciler};
use crate::net::channel::{DatagramSocket, PeerAddr, ReliableStream};
use crate::net::codec::CodecError;
use crate::net::packets::{datagram, reliable, PlayerInput};
use crate::net::stats::NetworkStats;
use crate::net::wire::{PacketReader, PacketWriter};
use crate::precache::PrecacheTables;
use crate::scene::SceneAdapter;
use crate::session::SessionError;

/// Callback consuming the application-specific init-packet prefix before
/// the core parses the rest.
pub type InitPrefixReader = Box<dyn FnMut(&mut PacketReader<'_>)>;

const PROBE_INTERVAL: Duration = Duration::from_millis(50);

/// The mirroring session: dials the server, replays the init packet into
/// the scene, probes until the server knows our UDP endpoint, then applies
/// snapshot datagrams at whatever rate they arrive.
pub struct ClientSession<S: ReliableStream, D: DatagramSocket> {
    stream: S,
    udp: D,
    server_udp: PeerAddr,
    reconciler: Option<ClientReconciler>,
    player_index: Option<u8>,
    prefix_reader: Option<InitPrefixReader>,
    got_snapshot: bool,
    probe_accumulator: Duration,
    input_sequence: u32,
    last_applied: Option<AppliedSnapshot>,
    stats: NetworkStats,
}

impl<S: ReliableStream, D: DatagramSocket> ClientSession<S, D> {
    pub fn new(stream: S, udp: D, server_udp: PeerAddr) -> Self {
        Self {
            stream,
            udp,
            server_udp,
            reconciler: None,
            player_index: None,
            prefix_reader: None,
            got_snapshot: false,
            // fire the first probe immediately
            probe_accumulator: PROBE_INTERVAL,
            input_sequence: 0,
            last_applied: None,
            stats: NetworkStats::default(),
        }
    }

    pub fn set_init_prefix_reader(&mut self, reader: InitPrefixReader) {
        self.prefix_reader = Some(reader);
    }

    pub fn is_ready(&self) -> bool {
        self.reconciler.is_some()
    }

    pub fn player_index(&self) -> Option<u8> {
        self.player_index
    }

    pub fn reconciler(&self) -> Option<&ClientReconciler> {
        self.reconciler.as_ref()
    }

    pub fn last_applied(&self) -> Option<AppliedSnapshot> {
        self.last_applied
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    /// One cooperative turn: reliable reads (init packet), datagram drain,
    /// bootstrap probing, and the render-rate reconciler update.
    pub fn pump(
        &mut self,
        scene: &mut impl SceneAdapter,
        elapsed: Duration,
    ) -> Result<(), SessionError> {
        for payload in self.stream.poll_payloads()? {
            if self.reconciler.is_none() {
                self.parse_init(&payload, scene)?;
            } else {
                debug!("ignoring unexpected reliable payload after bootstrap");
            }
        }

        for (bytes, from) in self.udp.poll()? {
            if !from.same_host(&self.server_udp) {
                debug!("ignoring datagram from unexpected peer {from}");
                continue;
            }
            self.stats.record_received(bytes.len());
            self.apply_snapshot(&bytes, scene);
        }

        if !self.got_snapshot {
            self.probe_accumulator += elapsed;
            while self.probe_accumulator >= PROBE_INTERVAL {
                self.probe_accumulator -= PROBE_INTERVAL;
                self.udp.send_to(&[datagram::UDP_HERE], self.server_udp)?;
                self.stats.record_sent(1);
            }
        }

        if let Some(reconciler) = &mut self.reconciler {
            reconciler.update(elapsed.as_secs_f32(), scene);
        }
        Ok(())
    }

    fn parse_init(
        &mut self,
        payload: &[u8],
        scene: &mut impl SceneAdapter,
    ) -> Result<(), SessionError> {
        let mut r = PacketReader::new(payload);
        if let Some(prefix) = &mut self.prefix_reader {
            prefix(&mut r);
        }
        let player_index = r.read_u8().map_err(CodecError::from)?;
        let tables = PrecacheTables::read(&mut r).map_err(CodecError::from)?;
        scene.precache(&tables);

        let mut reconciler = ClientReconciler::new(tables);
        let applied = reconciler.apply_bootstrap(&mut r, scene)?;
        info!(
            "bootstrapped as player {player_index}: frame {}, {} objects",
            applied.frame.get(),
            applied.created
        );

        self.stream
            .send_payload(&[reliable::CLIENT_ACK, player_index])?;
        self.player_index = Some(player_index);
        self.last_applied = Some(applied);
        self.reconciler = Some(reconciler);
        Ok(())
    }

    fn apply_snapshot(&mut self, bytes: &[u8], scene: &mut impl SceneAdapter) {
        let Some(reconciler) = &mut self.reconciler else {
            // Snapshots can race the init packet; drop them until bootstrapped.
            debug!("snapshot before bootstrap, dropped");
            return;
        };
        match reconciler.apply_datagram(bytes, scene) {
            Ok(ApplyOutcome::Applied(applied)) => {
                self.got_snapshot = true;
                self.last_applied = Some(applied);
            }
            Ok(ApplyOutcome::Stale) => debug!("stale snapshot dropped"),
            Err(e) => {
                warn!("dropping undecodable snapshot datagram: {e}");
                self.stats.record_dropped();
            }
        }
    }

    /// Sends this frame's input, carrying the snapshot ack. No-op before
    /// bootstrap completes.
    pub fn send_input(&mut self, position: Vec3, orientation: Vec3) -> Result<(), SessionError> {
        let (Some(player_index), Some(reconciler)) = (self.player_index, &self.reconciler) else {
            return Ok(());
        };
        let Some(acked_frame) = reconciler.last_frame() else {
            return Ok(());
        };
        self.input_sequence += 1;
        let input = PlayerInput {
            player_index,
            sequence: self.input_sequence,
            acked_frame,
            position,
            orientation,
        };
        let mut w = PacketWriter::new();
        input.encode(&mut w);
        self.udp.send_to(w.as_slice(), self.server_udp)?;
        self.stats.record_sent(w.len());
        Ok(())
    }
}
