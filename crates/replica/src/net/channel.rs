//! Channel seams for the two transports the engine needs: an unreliable
//! datagram socket and a reliable ordered byte stream.
//!
//! Socket-backed implementations wrap non-blocking `UdpSocket` /
//! `TcpStream`; each `poll` drains everything currently queued and never
//! blocks the tick. The in-memory implementations serve the single-process
//! `both` role and the test suite, including deterministic packet loss via a
//! caller-supplied drop filter.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::mpsc::{self, Receiver, Sender};

use thiserror::Error;

use crate::net::framing::{frame_payload, FramingError, StreamAssembler};
use crate::net::packets::MAX_DATAGRAM_BYTES;

/// Endpoint identity across both transport families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerAddr {
    Socket(SocketAddr),
    /// In-memory endpoint id.
    Local(u32),
}

impl PeerAddr {
    /// Same-host comparison, used to pair a UDP-HERE probe with the TCP
    /// connection it belongs to (the probe carries no client id).
    pub fn same_host(&self, other: &PeerAddr) -> bool {
        match (self, other) {
            (PeerAddr::Socket(a), PeerAddr::Socket(b)) => a.ip() == b.ip(),
            (PeerAddr::Local(a), PeerAddr::Local(b)) => a == b,
            _ => false,
        }
    }
}

impl std::fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerAddr::Socket(addr) => write!(f, "{addr}"),
            PeerAddr::Local(id) => write!(f, "local#{id}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream closed by peer")]
    Closed,
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error("stream i/o: {0}")]
    Io(#[from] io::Error),
}

/// Unreliable, unordered, message-oriented transport.
pub trait DatagramSocket {
    fn send_to(&mut self, payload: &[u8], peer: PeerAddr) -> io::Result<()>;
    /// Drains every queued datagram.
    fn poll(&mut self) -> io::Result<Vec<(Vec<u8>, PeerAddr)>>;
}

/// Reliable ordered transport carrying length-prefixed payloads.
pub trait ReliableStream {
    fn peer(&self) -> PeerAddr;
    fn send_payload(&mut self, payload: &[u8]) -> io::Result<()>;
    /// Drains complete payloads. Any error means the connection is dead.
    fn poll_payloads(&mut self) -> Result<Vec<Vec<u8>>, StreamError>;
}

pub trait ReliableListener {
    type Stream: ReliableStream;
    fn accept(&mut self) -> io::Result<Option<Self::Stream>>;
}

// ---------------------------------------------------------------------------
// Socket-backed implementations
// ---------------------------------------------------------------------------

pub struct UdpChannel {
    socket: UdpSocket,
    recv_buf: [u8; MAX_DATAGRAM_BYTES + 64],
}

impl UdpChannel {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            recv_buf: [0u8; MAX_DATAGRAM_BYTES + 64],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl DatagramSocket for UdpChannel {
    fn send_to(&mut self, payload: &[u8], peer: PeerAddr) -> io::Result<()> {
        let PeerAddr::Socket(addr) = peer else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "udp channel needs a socket address",
            ));
        };
        self.socket.send_to(payload, addr)?;
        Ok(())
    }

    fn poll(&mut self) -> io::Result<Vec<(Vec<u8>, PeerAddr)>> {
        let mut datagrams = Vec::new();
        loop {
            match self.socket.recv_from(&mut self.recv_buf) {
                Ok((size, from)) => {
                    datagrams.push((self.recv_buf[..size].to_vec(), PeerAddr::Socket(from)));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(datagrams)
    }
}

pub struct TcpChannel {
    stream: TcpStream,
    peer: PeerAddr,
    assembler: StreamAssembler,
    outbox: Vec<u8>,
    read_buf: [u8; 4096],
}

impl TcpChannel {
    pub fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        Self::from_stream(stream)
    }

    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let peer = PeerAddr::Socket(stream.peer_addr()?);
        Ok(Self {
            stream,
            peer,
            assembler: StreamAssembler::new(),
            outbox: Vec::new(),
            read_buf: [0u8; 4096],
        })
    }

    /// Pushes buffered bytes; retains whatever the socket will not take yet.
    fn flush(&mut self) -> io::Result<()> {
        while !self.outbox.is_empty() {
            match self.stream.write(&self.outbox) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.outbox.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl ReliableStream for TcpChannel {
    fn peer(&self) -> PeerAddr {
        self.peer
    }

    fn send_payload(&mut self, payload: &[u8]) -> io::Result<()> {
        self.outbox.extend_from_slice(&frame_payload(payload));
        self.flush()
    }

    fn poll_payloads(&mut self) -> Result<Vec<Vec<u8>>, StreamError> {
        self.flush()?;
        loop {
            match self.stream.read(&mut self.read_buf) {
                Ok(0) => return Err(StreamError::Closed),
                Ok(n) => self.assembler.extend(&self.read_buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(StreamError::Io(e)),
            }
        }
        let mut payloads = Vec::new();
        while let Some(payload) = self.assembler.next_payload()? {
            payloads.push(payload);
        }
        Ok(payloads)
    }
}

pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl ReliableListener for TcpAcceptor {
    type Stream = TcpChannel;

    fn accept(&mut self) -> io::Result<Option<TcpChannel>> {
        match self.listener.accept() {
            Ok((stream, _)) => Ok(Some(TcpChannel::from_stream(stream)?)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

type DropFilter = Box<dyn FnMut(&[u8]) -> bool + Send>;

pub struct MemoryDatagramSocket {
    addr: PeerAddr,
    inbox_tx: Sender<(Vec<u8>, PeerAddr)>,
    inbox_rx: Receiver<(Vec<u8>, PeerAddr)>,
    links: HashMap<PeerAddr, Sender<(Vec<u8>, PeerAddr)>>,
    drop_filter: Option<DropFilter>,
}

impl MemoryDatagramSocket {
    pub fn new(addr: u32) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::channel();
        Self {
            addr: PeerAddr::Local(addr),
            inbox_tx,
            inbox_rx,
            links: HashMap::new(),
            drop_filter: None,
        }
    }

    pub fn addr(&self) -> PeerAddr {
        self.addr
    }

    /// Outgoing datagrams for which the filter returns true are discarded,
    /// simulating loss deterministically.
    pub fn set_drop_filter(&mut self, filter: DropFilter) {
        self.drop_filter = Some(filter);
    }

    pub fn clear_drop_filter(&mut self) {
        self.drop_filter = None;
    }

    /// Wires two sockets so each can send to the other's address.
    pub fn link(a: &mut MemoryDatagramSocket, b: &mut MemoryDatagramSocket) {
        a.links.insert(b.addr, b.inbox_tx.clone());
        b.links.insert(a.addr, a.inbox_tx.clone());
    }
}

impl DatagramSocket for MemoryDatagramSocket {
    fn send_to(&mut self, payload: &[u8], peer: PeerAddr) -> io::Result<()> {
        if let Some(filter) = &mut self.drop_filter {
            if filter(payload) {
                return Ok(());
            }
        }
        let Some(tx) = self.links.get(&peer) else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("no memory link to {peer}"),
            ));
        };
        // A dropped receiver behaves like an unreachable host: silence.
        let _ = tx.send((payload.to_vec(), self.addr));
        Ok(())
    }

    fn poll(&mut self) -> io::Result<Vec<(Vec<u8>, PeerAddr)>> {
        let mut datagrams = Vec::new();
        while let Ok(item) = self.inbox_rx.try_recv() {
            datagrams.push(item);
        }
        Ok(datagrams)
    }
}

pub struct MemoryStream {
    peer: PeerAddr,
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    assembler: StreamAssembler,
}

impl MemoryStream {
    /// A connected pair of stream ends; bytes written on one side come out
    /// of the other, preserving order.
    pub fn pair(a_addr: u32, b_addr: u32) -> (MemoryStream, MemoryStream) {
        let (tx_ab, rx_ab) = mpsc::channel();
        let (tx_ba, rx_ba) = mpsc::channel();
        let a = MemoryStream {
            peer: PeerAddr::Local(b_addr),
            tx: tx_ab,
            rx: rx_ba,
            assembler: StreamAssembler::new(),
        };
        let b = MemoryStream {
            peer: PeerAddr::Local(a_addr),
            tx: tx_ba,
            rx: rx_ab,
            assembler: StreamAssembler::new(),
        };
        (a, b)
    }
}

impl ReliableStream for MemoryStream {
    fn peer(&self) -> PeerAddr {
        self.peer
    }

    fn send_payload(&mut self, payload: &[u8]) -> io::Result<()> {
        self.tx
            .send(frame_payload(payload))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"))
    }

    fn poll_payloads(&mut self) -> Result<Vec<Vec<u8>>, StreamError> {
        loop {
            match self.rx.try_recv() {
                Ok(bytes) => self.assembler.extend(&bytes),
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    // Drain what already arrived before reporting closure.
                    if self.assembler.buffered() == 0 {
                        return Err(StreamError::Closed);
                    }
                    break;
                }
            }
        }
        let mut payloads = Vec::new();
        while let Some(payload) = self.assembler.next_payload()? {
            payloads.push(payload);
        }
        Ok(payloads)
    }
}

pub struct MemoryListener {
    rx: Receiver<MemoryStream>,
}

/// Client-side handle for dialing a [`MemoryListener`].
#[derive(Clone)]
pub struct MemoryConnector {
    tx: Sender<MemoryStream>,
    server_addr: u32,
}

impl MemoryListener {
    pub fn new(server_addr: u32) -> (MemoryListener, MemoryConnector) {
        let (tx, rx) = mpsc::channel();
        (
            MemoryListener { rx },
            MemoryConnector { tx, server_addr },
        )
    }
}

impl MemoryConnector {
    pub fn connect(&self, client_addr: u32) -> io::Result<MemoryStream> {
        let (client_end, server_end) = MemoryStream::pair(client_addr, self.server_addr);
        self.tx
            .send(server_end)
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "listener gone"))?;
        Ok(client_end)
    }
}

impl ReliableListener for MemoryListener {
    type Stream = MemoryStream;

    fn accept(&mut self) -> io::Result<Option<MemoryStream>> {
        Ok(self.rx.try_recv().ok())
    }
}
