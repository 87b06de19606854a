//! Packet type bytes and the fixed-layout client input packet.
//!
//! Snapshot datagrams (server→client) carry no type byte; the direction of
//! the unreliable channel disambiguates them. Client→server datagrams lead
//! with a type byte: `UDP_HERE` during bootstrap, `PLAYER_INPUT` afterwards.

use glam::Vec3;

use crate::net::wire::{PacketReader, PacketWriter, WireError};
use crate::snapshot::FrameIndex;

/// Hard ceiling for one snapshot datagram.
pub const MAX_DATAGRAM_BYTES: usize = 1400;

/// Hard ceiling for one client input datagram.
pub const MAX_INPUT_BYTES: usize = 1024;

/// Snapshot datagram prelude: frame index (u24) + object count (u16).
pub const SNAPSHOT_HEADER_BYTES: usize = 5;

/// Client→server datagram type bytes.
pub mod datagram {
    /// One-byte bootstrap probe so the server learns the UDP endpoint.
    pub const UDP_HERE: u8 = 0;
    pub const PLAYER_INPUT: u8 = 1;
}

/// Client→server reliable-channel type bytes.
pub mod reliable {
    /// Two bytes: type + player_index, acknowledging the init packet.
    pub const CLIENT_ACK: u8 = 0;
}

/// Per-frame client input. The embedded `acked_frame` is the sole snapshot
/// acknowledgement mechanism; `sequence` makes redelivered or reordered
/// copies droppable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerInput {
    pub player_index: u8,
    pub sequence: u32,
    pub acked_frame: FrameIndex,
    pub position: Vec3,
    pub orientation: Vec3,
}

impl PlayerInput {
    /// Writes the full datagram, type byte included.
    pub fn encode(&self, out: &mut PacketWriter) {
        out.write_u8(datagram::PLAYER_INPUT);
        out.write_u8(self.player_index);
        out.write_u32(self.sequence);
        out.write_u24(self.acked_frame.get());
        for v in [self.position, self.orientation] {
            out.write_f32(v.x);
            out.write_f32(v.y);
            out.write_f32(v.z);
        }
    }

    /// Decodes the body; the caller has already consumed the type byte.
    pub fn decode(r: &mut PacketReader<'_>) -> Result<Self, WireError> {
        let player_index = r.read_u8()?;
        let sequence = r.read_u32()?;
        let acked_frame = FrameIndex::new(r.read_u24()?);
        let mut vecs = [Vec3::ZERO; 2];
        for v in &mut vecs {
            v.x = r.read_f32()?;
            v.y = r.read_f32()?;
            v.z = r.read_f32()?;
        }
        Ok(Self {
            player_index,
            sequence,
            acked_frame,
            position: vecs[0],
            orientation: vecs[1],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_roundtrip() {
        let input = PlayerInput {
            player_index: 3,
            sequence: 4242,
            acked_frame: FrameIndex::new(0x00ABCDEF),
            position: Vec3::new(1.0, 2.0, 3.0),
            orientation: Vec3::new(0.1, -0.5, 0.0),
        };

        let mut w = PacketWriter::new();
        input.encode(&mut w);
        assert!(w.len() <= MAX_INPUT_BYTES);

        let mut r = PacketReader::new(w.as_slice());
        assert_eq!(r.read_u8().unwrap(), datagram::PLAYER_INPUT);
        let back = PlayerInput::decode(&mut r).unwrap();
        assert_eq!(back, input);
        assert!(r.is_empty());
    }

    #[test]
    fn truncated_input_is_rejected() {
        let input = PlayerInput {
            player_index: 0,
            sequence: 1,
            acked_frame: FrameIndex::ZERO,
            position: Vec3::ZERO,
            orientation: Vec3::ZERO,
        };
        let mut w = PacketWriter::new();
        input.encode(&mut w);
        let bytes = w.as_slice();
        let mut r = PacketReader::new(&bytes[1..bytes.len() - 1]);
        assert!(PlayerInput::decode(&mut r).is_err());
    }
}
