//! Deterministic network-condition simulation for tests and the loopback
//! demo: seeded packet loss plus tick-quantized delay and jitter, wrapped
//! around any [`DatagramSocket`].
//!
//! Time is a logical tick counter advanced through the shared
//! [`SimulatorControl`] handle, so test runs replay identically for a given
//! seed.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io;
use std::sync::{Arc, Mutex};

use crate::net::channel::{DatagramSocket, PeerAddr};

/// xorshift32; all sequences are reproducible from the seed.
#[derive(Debug, Clone)]
pub struct SeededRandom {
    state: u32,
}

impl SeededRandom {
    /// Seed 0 is treated as 1 to avoid the degenerate all-zero sequence.
    pub fn new(seed: u32) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    /// Uniform float in `[0, 1)`.
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 / (1u32 << 24) as f32
    }

    /// Uniform integer in `[0, max)`; 0 when `max` is 0.
    pub fn next_int(&mut self, max: u32) -> u32 {
        ((self.next_u32() as u64 * max as u64) >> 32) as u32
    }

    pub fn next_bool(&mut self, probability: f32) -> bool {
        self.next_f32() < probability
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LinkConditions {
    /// Fraction of datagrams dropped, 0.0..=1.0.
    pub loss: f32,
    /// Base delivery delay in ticks.
    pub delay_ticks: u32,
    /// Additional uniform random delay in `[0, jitter_ticks]`.
    pub jitter_ticks: u32,
}

#[derive(Debug)]
struct DelayedDatagram {
    release_tick: u64,
    /// Tie-breaker preserving send order at equal release ticks.
    sequence: u64,
    payload: Vec<u8>,
    peer: PeerAddr,
}

impl PartialEq for DelayedDatagram {
    fn eq(&self, other: &Self) -> bool {
        self.release_tick == other.release_tick && self.sequence == other.sequence
    }
}

impl Eq for DelayedDatagram {}

impl PartialOrd for DelayedDatagram {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedDatagram {
    fn cmp(&self, other: &Self) -> Ordering {
        // reverse for a min-heap
        other
            .release_tick
            .cmp(&self.release_tick)
            .then(other.sequence.cmp(&self.sequence))
    }
}

#[derive(Debug)]
struct SimState {
    conditions: LinkConditions,
    rng: SeededRandom,
    tick: u64,
    next_sequence: u64,
    in_flight: BinaryHeap<DelayedDatagram>,
    dropped: u64,
}

/// Shared handle for advancing simulated time and adjusting conditions
/// while the wrapped socket is owned by a session.
#[derive(Clone)]
pub struct SimulatorControl {
    state: Arc<Mutex<SimState>>,
}

impl SimulatorControl {
    pub fn advance(&self, ticks: u64) {
        let mut state = self.state.lock().expect("simulator state");
        state.tick += ticks;
    }

    pub fn set_conditions(&self, conditions: LinkConditions) {
        let mut state = self.state.lock().expect("simulator state");
        state.conditions = conditions;
    }

    pub fn dropped(&self) -> u64 {
        self.state.lock().expect("simulator state").dropped
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().expect("simulator state").in_flight.len()
    }
}

/// A [`DatagramSocket`] that loses and delays outgoing datagrams according
/// to deterministic [`LinkConditions`]. Incoming traffic is untouched.
pub struct SimulatedDatagramSocket<D: DatagramSocket> {
    inner: D,
    state: Arc<Mutex<SimState>>,
}

impl<D: DatagramSocket> SimulatedDatagramSocket<D> {
    pub fn wrap(inner: D, conditions: LinkConditions, seed: u32) -> (Self, SimulatorControl) {
        let state = Arc::new(Mutex::new(SimState {
            conditions,
            rng: SeededRandom::new(seed),
            tick: 0,
            next_sequence: 0,
            in_flight: BinaryHeap::new(),
            dropped: 0,
        }));
        let control = SimulatorControl {
            state: Arc::clone(&state),
        };
        (Self { inner, state }, control)
    }

    /// Hands due datagrams to the wrapped socket.
    fn flush_due(&mut self) -> io::Result<()> {
        let due: Vec<DelayedDatagram> = {
            let mut state = self.state.lock().expect("simulator state");
            let now = state.tick;
            let mut due = Vec::new();
            while state
                .in_flight
                .peek()
                .is_some_and(|d| d.release_tick <= now)
            {
                due.push(state.in_flight.pop().expect("peeked"));
            }
            due
        };
        for datagram in due {
            self.inner.send_to(&datagram.payload, datagram.peer)?;
        }
        Ok(())
    }
}

impl<D: DatagramSocket> DatagramSocket for SimulatedDatagramSocket<D> {
    fn send_to(&mut self, payload: &[u8], peer: PeerAddr) -> io::Result<()> {
        let deliver_now = {
            let mut state = self.state.lock().expect("simulator state");
            let loss = state.conditions.loss;
            if state.rng.next_bool(loss) {
                state.dropped += 1;
                return Ok(());
            }
            let jitter = state.conditions.jitter_ticks;
            let delay =
                state.conditions.delay_ticks as u64 + state.rng.next_int(jitter + 1) as u64;
            if delay == 0 {
                true
            } else {
                let release_tick = state.tick + delay;
                let sequence = state.next_sequence;
                state.next_sequence += 1;
                state.in_flight.push(DelayedDatagram {
                    release_tick,
                    sequence,
                    payload: payload.to_vec(),
                    peer,
                });
                false
            }
        };
        if deliver_now {
            self.inner.send_to(payload, peer)?;
        }
        Ok(())
    }

    fn poll(&mut self) -> io::Result<Vec<(Vec<u8>, PeerAddr)>> {
        self.flush_due()?;
        self.inner.poll()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::channel::MemoryDatagramSocket;

    fn linked_pair() -> (MemoryDatagramSocket, MemoryDatagramSocket) {
        let mut a = MemoryDatagramSocket::new(1);
        let mut b = MemoryDatagramSocket::new(2);
        MemoryDatagramSocket::link(&mut a, &mut b);
        (a, b)
    }

    #[test]
    fn seeded_sequences_replay() {
        let mut a = SeededRandom::new(42);
        let mut b = SeededRandom::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
        let mut c = SeededRandom::new(43);
        assert_ne!(SeededRandom::new(42).next_u32(), c.next_u32());
    }

    #[test]
    fn zero_seed_is_not_degenerate() {
        let mut rng = SeededRandom::new(0);
        assert_ne!(rng.next_u32(), 0);
    }

    #[test]
    fn next_f32_stays_in_unit_range() {
        let mut rng = SeededRandom::new(7);
        for _ in 0..1000 {
            let v = rng.next_f32();
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn lossless_zero_delay_passes_through() {
        let (a, mut b) = linked_pair();
        let (mut sim, _control) = SimulatedDatagramSocket::wrap(a, LinkConditions::default(), 1);
        sim.send_to(b"x", PeerAddr::Local(2)).unwrap();
        assert_eq!(b.poll().unwrap().len(), 1);
    }

    #[test]
    fn total_loss_drops_everything() {
        let (a, mut b) = linked_pair();
        let conditions = LinkConditions {
            loss: 1.0,
            ..LinkConditions::default()
        };
        let (mut sim, control) = SimulatedDatagramSocket::wrap(a, conditions, 9);
        for _ in 0..10 {
            sim.send_to(b"x", PeerAddr::Local(2)).unwrap();
        }
        assert!(b.poll().unwrap().is_empty());
        assert_eq!(control.dropped(), 10);
    }

    #[test]
    fn partial_loss_is_deterministic_for_a_seed() {
        let run = |seed| {
            let (a, mut b) = linked_pair();
            let conditions = LinkConditions {
                loss: 0.5,
                ..LinkConditions::default()
            };
            let (mut sim, _control) = SimulatedDatagramSocket::wrap(a, conditions, seed);
            for i in 0..32u8 {
                sim.send_to(&[i], PeerAddr::Local(2)).unwrap();
            }
            let arrived: Vec<u8> = b
                .poll()
                .unwrap()
                .into_iter()
                .map(|(bytes, _)| bytes[0])
                .collect();
            arrived
        };
        let first = run(1234);
        assert_eq!(first, run(1234));
        assert!(!first.is_empty() && first.len() < 32);
    }

    #[test]
    fn delayed_datagrams_release_in_order() {
        let (a, mut b) = linked_pair();
        let conditions = LinkConditions {
            delay_ticks: 2,
            ..LinkConditions::default()
        };
        let (mut sim, control) = SimulatedDatagramSocket::wrap(a, conditions, 5);
        sim.send_to(b"one", PeerAddr::Local(2)).unwrap();
        sim.send_to(b"two", PeerAddr::Local(2)).unwrap();

        sim.poll().unwrap();
        assert!(b.poll().unwrap().is_empty(), "still in flight");
        assert_eq!(control.in_flight(), 2);

        control.advance(2);
        sim.poll().unwrap();
        let arrived = b.poll().unwrap();
        assert_eq!(arrived.len(), 2);
        assert_eq!(arrived[0].0, b"one".to_vec());
        assert_eq!(arrived[1].0, b"two".to_vec());
    }

    #[test]
    fn jitter_spreads_release_ticks() {
        let (a, mut b) = linked_pair();
        let conditions = LinkConditions {
            delay_ticks: 1,
            jitter_ticks: 3,
            ..LinkConditions::default()
        };
        let (mut sim, control) = SimulatedDatagramSocket::wrap(a, conditions, 77);
        for i in 0..16u8 {
            sim.send_to(&[i], PeerAddr::Local(2)).unwrap();
        }
        let mut arrivals = Vec::new();
        for tick in 0..6 {
            control.advance(1);
            sim.poll().unwrap();
            let count = b.poll().unwrap().len();
            arrivals.push((tick, count));
        }
        let total: usize = arrivals.iter().map(|(_, c)| c).sum();
        assert_eq!(total, 16, "everything arrives within delay+jitter");
    }
}
