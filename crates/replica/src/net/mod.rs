pub mod channel;
pub mod codec;
pub mod dirs;
pub mod framing;
pub mod packets;
pub mod simulator;
pub mod stats;
pub mod wire;

pub use channel::{
    DatagramSocket, MemoryConnector, MemoryDatagramSocket, MemoryListener, MemoryStream,
    PeerAddr, ReliableListener, ReliableStream, StreamError, TcpAcceptor, TcpChannel, UdpChannel,
};
pub use codec::{
    decode_object, encode_object, CodecError, CodecParams, DecodedFields, DecodedObject,
    VectorMode, ATTACH_ID_BYTES, OBJECT_HEADER_BYTES,
};
pub use framing::{frame_payload, FramingError, StreamAssembler, MAX_RELIABLE_PAYLOAD};
pub use packets::{PlayerInput, MAX_DATAGRAM_BYTES, MAX_INPUT_BYTES, SNAPSHOT_HEADER_BYTES};
pub use simulator::{LinkConditions, SeededRandom, SimulatedDatagramSocket, SimulatorControl};
pub use stats::NetworkStats;
pub use wire::{PacketReader, PacketWriter, WireError};
