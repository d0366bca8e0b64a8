use std::collections::VecDeque;
use std::io::{self, IoSlice, Read, Write};
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::sync::Arc;

use mio::event::Source;
use mio::{Interest, Registry, Token};
use throttle_store::ConnectionId;
use tracing::{debug, warn};

/// Either side of the one transport a running instance exposes: TCP or a
/// local stream socket, picked at startup by which CLI flag was given.
pub enum Socket {
    Tcp(mio::net::TcpStream),
    Unix(mio::net::UnixStream),
}

impl Socket {
    fn as_source(&mut self) -> &mut dyn Source {
        match self {
            Socket::Tcp(s) => s,
            Socket::Unix(s) => s,
        }
    }

    pub fn set_nodelay(&self) {
        if let Socket::Tcp(s) = self {
            let _ = s.set_nodelay(true);
        }
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Socket::Tcp(s) => s.read(buf),
            Socket::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Socket::Tcp(s) => s.write(buf),
            Socket::Unix(s) => s.write(buf),
        }
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        match self {
            Socket::Tcp(s) => s.write_vectored(bufs),
            Socket::Unix(s) => s.write_vectored(bufs),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Grows to hold whatever frame is currently being assembled; reset to
/// empty once a frame is handed to the caller.
const RX_INITIAL_CAP: usize = 4 * 1024;

#[derive(Debug, PartialEq, Eq)]
pub enum ConnState {
    Alive,
    Disconnected,
}

/// One live client connection: framing, backlogged writes, and the
/// bookkeeping the registry needs to report a `ConnectionMeta` record.
///
/// Inbound bytes accumulate in `rx_buf`. A complete frame's length is only
/// knowable once enough of its header has arrived — `size_of` is retried
/// against the buffered tail on every read until it resolves.
///
/// Outbound: `enqueue` writes immediately when the socket is ready; any
/// unwritten remainder (or anything arriving while the backlog is
/// non-empty) is queued as an `Arc<Vec<u8>>` plus an in-progress byte
/// offset, so the same allocation backs both a live connection's write and
/// any further `Peer::enqueue` fan-out.
pub struct Connection {
    socket: Socket,
    pub peer_addr: Option<SocketAddr>,
    pub id: ConnectionId,
    token: Token,

    rx_buf: Vec<u8>,

    send_backlog: VecDeque<(Arc<Vec<u8>>, usize)>,
    writable_armed: bool,
}

impl Connection {
    pub fn new(socket: Socket, peer_addr: Option<SocketAddr>, id: ConnectionId) -> Self {
        socket.set_nodelay();
        Connection {
            socket,
            peer_addr,
            id,
            token: Token(0),
            rx_buf: Vec::with_capacity(RX_INITIAL_CAP),
            send_backlog: VecDeque::new(),
            writable_armed: false,
        }
    }

    pub fn raw_fd(&self) -> i32 {
        match &self.socket {
            Socket::Tcp(s) => s.as_raw_fd(),
            Socket::Unix(s) => s.as_raw_fd(),
        }
    }

    pub fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        self.token = token;
        registry.register(self.socket.as_source(), token, Interest::READABLE)
    }

    /// Reads everything currently available and invokes `on_frame` for each
    /// complete request frame assembled, in arrival order. Returns
    /// `Disconnected` as soon as the peer is gone or a framing error makes
    /// the stream unrecoverable.
    pub fn poll_read<F>(&mut self, readable: bool, mut on_frame: F) -> ConnState
    where
        F: FnMut(&[u8]),
    {
        if !readable {
            return ConnState::Alive;
        }

        let mut scratch = [0u8; 16 * 1024];
        loop {
            match self.socket.read(&mut scratch) {
                Ok(0) => return ConnState::Disconnected,
                Ok(n) => self.rx_buf.extend_from_slice(&scratch[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    debug!(?err, "connection read failed");
                    return ConnState::Disconnected;
                }
            }
        }

        loop {
            let Some(&opcode_byte) = self.rx_buf.first() else { break };
            let opcode = match throttle_protocol::Opcode::from_u8(opcode_byte) {
                Ok(op) => op,
                Err(err) => {
                    warn!(?err, "unknown opcode, dropping connection");
                    return ConnState::Disconnected;
                }
            };
            let Some(frame_len) = throttle_protocol::size_of(opcode, &self.rx_buf[1..]) else {
                break;
            };
            if self.rx_buf.len() < frame_len {
                break;
            }
            on_frame(&self.rx_buf[..frame_len]);
            self.rx_buf.drain(..frame_len);
        }

        ConnState::Alive
    }

    /// Drains whatever is backlogged once the socket reports writable.
    pub fn poll_write(&mut self, registry: &Registry, writable: bool) -> ConnState {
        if writable { self.drain_backlog(registry) } else { ConnState::Alive }
    }

    /// Writes `payload` now if the backlog is empty and the kernel accepts
    /// it whole; otherwise backlogs it (sharing the same allocation, no
    /// copy) and arms writable interest.
    pub fn enqueue(&mut self, registry: &Registry, payload: Arc<Vec<u8>>) -> ConnState {
        if !self.send_backlog.is_empty() {
            self.send_backlog.push_back((payload, 0));
            return self.arm_writable(registry);
        }

        match self.socket.write(&payload) {
            Ok(n) if n == payload.len() => ConnState::Alive,
            Ok(n) => {
                self.send_backlog.push_back((payload, n));
                self.arm_writable(registry)
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.send_backlog.push_back((payload, 0));
                self.arm_writable(registry)
            }
            Err(err) => {
                warn!(?err, "connection write failed");
                ConnState::Disconnected
            }
        }
    }

    fn drain_backlog(&mut self, registry: &Registry) -> ConnState {
        while let Some((payload, offset)) = self.send_backlog.front_mut() {
            match self.socket.write(&payload[*offset..]) {
                Ok(0) => return ConnState::Disconnected,
                Ok(n) => {
                    *offset += n;
                    if *offset >= payload.len() {
                        self.send_backlog.pop_front();
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    debug!(?err, "backlog write failed");
                    return ConnState::Disconnected;
                }
            }
        }

        if self.send_backlog.is_empty() && self.writable_armed {
            if let Err(err) = registry.reregister(self.socket.as_source(), self.token, Interest::READABLE) {
                debug!(?err, "reregister readable-only failed");
                return ConnState::Disconnected;
            }
            self.writable_armed = false;
        }

        ConnState::Alive
    }

    fn arm_writable(&mut self, registry: &Registry) -> ConnState {
        if !self.writable_armed {
            if let Err(err) =
                registry.reregister(self.socket.as_source(), self.token, Interest::READABLE | Interest::WRITABLE)
            {
                debug!(?err, "reregister writable failed");
                return ConnState::Disconnected;
            }
            self.writable_armed = true;
        }
        ConnState::Alive
    }

    pub fn close(&mut self, registry: &Registry) {
        let _ = registry.deregister(self.socket.as_source());
        if let Socket::Tcp(s) = &self.socket {
            let _ = s.shutdown(std::net::Shutdown::Both);
        }
    }
}
