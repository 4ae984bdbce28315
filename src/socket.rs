//! Timeout-aware sockets for the media and bulk paths.
//!
//! Two flavours: [`MediaSocket`] wraps a connectionless datagram socket and
//! guarantees neither ordering nor delivery; [`BulkSocket`] wraps a reliable
//! byte stream with 4-byte length framing and is used only for bulk and
//! control traffic (discovery, clipboard).
//!
//! Both flavours restart a receive interrupted by a signal with the
//! *remaining* time of the original timeout, never the full timeout. A
//! non-positive remainder returns `Timeout` without another syscall.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::SocketError;

/// Receive buffer sized for a full sealed datagram.
pub const RECV_BUFFER_SIZE: usize = 2048;

/// Upper bound on a single bulk frame (clipboard payloads and discovery).
pub const MAX_BULK_FRAME: usize = 4 * 1024 * 1024;

/// Kernel receive buffer requested for the media socket, large enough to
/// absorb a full burst-paced frame while the receive thread is busy.
const MEDIA_SO_RCVBUF: usize = 1024 * 1024;

/// How long a blocking receive waits before giving the caller a chance to
/// check shutdown flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeout {
    /// Block until data arrives.
    Blocking,
    /// Return immediately when no data is queued.
    NonBlocking,
    /// Block for at most this long.
    After(Duration),
}

fn map_io_error(err: io::Error) -> SocketError {
    match err.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => SocketError::Timeout,
        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset | ErrorKind::NotConnected => {
            SocketError::Closed
        }
        _ => SocketError::Io(err),
    }
}

/// Connectionless datagram socket for media segments.
pub struct MediaSocket {
    socket: UdpSocket,
    timeout: RecvTimeout,
}

impl MediaSocket {
    /// Bind a datagram socket on `addr` with a deep kernel receive buffer.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_recv_buffer_size(MEDIA_SO_RCVBUF)?;
        socket.bind(&addr.into())?;

        let socket: UdpSocket = socket.into();
        let mut media = MediaSocket {
            socket,
            timeout: RecvTimeout::Blocking,
        };
        media.set_timeout(RecvTimeout::Blocking)?;
        Ok(media)
    }

    /// Local address the socket is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Configure the receive timeout for subsequent `recv` calls.
    pub fn set_timeout(&mut self, timeout: RecvTimeout) -> io::Result<()> {
        match timeout {
            RecvTimeout::Blocking => {
                self.socket.set_nonblocking(false)?;
                self.socket.set_read_timeout(None)?;
            }
            RecvTimeout::NonBlocking => {
                self.socket.set_nonblocking(true)?;
            }
            RecvTimeout::After(d) => {
                self.socket.set_nonblocking(false)?;
                self.socket.set_read_timeout(Some(d.max(Duration::from_millis(1))))?;
            }
        }
        self.timeout = timeout;
        Ok(())
    }

    /// Send one datagram to `peer`.
    pub fn send_to(&self, peer: SocketAddr, bytes: &[u8]) -> Result<usize, SocketError> {
        self.socket.send_to(bytes, peer).map_err(map_io_error)
    }

    /// Receive one datagram, honouring the configured timeout.
    ///
    /// A signal interrupting the wait resumes with the remaining time; once
    /// the deadline has passed the call returns `Timeout` without touching
    /// the socket again.
    pub fn recv(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), SocketError> {
        let deadline = match self.timeout {
            RecvTimeout::After(d) => Some(Instant::now() + d),
            _ => None,
        };

        let mut shortened = false;
        let result = loop {
            match self.socket.recv_from(buf) {
                Ok((len, peer)) => break Ok((len, peer)),
                Err(err) if err.kind() == ErrorKind::Interrupted => {
                    if let Some(deadline) = deadline {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        if remaining.is_zero() {
                            break Err(SocketError::Timeout);
                        }
                        if let Err(err) = self.socket.set_read_timeout(Some(remaining)) {
                            break Err(SocketError::Io(err));
                        }
                        shortened = true;
                    }
                }
                Err(err) => break Err(map_io_error(err)),
            }
        };

        // An interrupt shortened the kernel timeout to the remainder; put
        // the configured value back for the next call.
        if shortened {
            if let RecvTimeout::After(d) = self.timeout {
                let _ = self
                    .socket
                    .set_read_timeout(Some(d.max(Duration::from_millis(1))));
            }
        }
        result
    }

    /// Clone the underlying handle for use on a second thread.
    pub fn try_clone(&self) -> io::Result<MediaSocket> {
        Ok(MediaSocket {
            socket: self.socket.try_clone()?,
            timeout: self.timeout,
        })
    }
}

/// Reliable byte-stream socket with length framing for bulk transfers.
///
/// Every frame is prefixed with its length as a big-endian u32 so a stream
/// reader can re-frame the payload.
pub struct BulkSocket {
    stream: TcpStream,
    timeout: RecvTimeout,
}

impl BulkSocket {
    /// Connect to `peer`, waiting at most `connect_timeout`.
    pub fn connect(peer: SocketAddr, connect_timeout: Duration) -> io::Result<Self> {
        let stream = TcpStream::connect_timeout(&peer, connect_timeout)?;
        stream.set_nodelay(true)?;
        Ok(BulkSocket {
            stream,
            timeout: RecvTimeout::Blocking,
        })
    }

    /// Wrap an accepted stream.
    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        Ok(BulkSocket {
            stream,
            timeout: RecvTimeout::Blocking,
        })
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// Configure the receive timeout for subsequent `recv_framed` calls.
    pub fn set_timeout(&mut self, timeout: RecvTimeout) -> io::Result<()> {
        match timeout {
            RecvTimeout::Blocking => {
                self.stream.set_nonblocking(false)?;
                self.stream.set_read_timeout(None)?;
            }
            RecvTimeout::NonBlocking => {
                self.stream.set_nonblocking(true)?;
            }
            RecvTimeout::After(d) => {
                self.stream.set_nonblocking(false)?;
                self.stream.set_read_timeout(Some(d.max(Duration::from_millis(1))))?;
            }
        }
        self.timeout = timeout;
        Ok(())
    }

    /// Write one length-prefixed frame.
    pub fn send_framed(&mut self, payload: &[u8]) -> Result<(), SocketError> {
        if payload.len() > MAX_BULK_FRAME {
            return Err(SocketError::Io(io::Error::new(
                ErrorKind::InvalidInput,
                "bulk frame exceeds maximum size",
            )));
        }
        let len = (payload.len() as u32).to_be_bytes();
        self.stream.write_all(&len).map_err(map_io_error)?;
        self.stream.write_all(payload).map_err(map_io_error)?;
        Ok(())
    }

    /// Read one length-prefixed frame, honouring the configured timeout.
    ///
    /// The timeout covers the whole frame: interrupts and partial reads
    /// resume with the remaining time of the original deadline.
    pub fn recv_framed(&mut self) -> Result<Vec<u8>, SocketError> {
        let deadline = match self.timeout {
            RecvTimeout::After(d) => Some(Instant::now() + d),
            _ => None,
        };

        let mut len_buf = [0u8; 4];
        self.read_full(&mut len_buf, deadline)?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_BULK_FRAME {
            return Err(SocketError::Io(io::Error::new(
                ErrorKind::InvalidData,
                "bulk frame length exceeds maximum size",
            )));
        }

        let mut payload = vec![0u8; len];
        self.read_full(&mut payload, deadline)?;
        Ok(payload)
    }

    fn read_full(&mut self, buf: &mut [u8], deadline: Option<Instant>) -> Result<(), SocketError> {
        let mut filled = 0;
        while filled < buf.len() {
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(SocketError::Timeout);
                }
                self.stream
                    .set_read_timeout(Some(remaining))
                    .map_err(SocketError::Io)?;
            }
            match self.stream.read(&mut buf[filled..]) {
                Ok(0) => return Err(SocketError::Closed),
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(map_io_error(err)),
            }
        }
        Ok(())
    }

    /// Shut down both directions of the stream.
    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

/// Listener for incoming bulk connections.
pub struct BulkListener {
    listener: TcpListener,
}

impl BulkListener {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(8)?;

        let listener: TcpListener = socket.into();
        listener.set_nonblocking(true)?;
        Ok(BulkListener { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept one connection, polling for at most `timeout`.
    ///
    /// Polling keeps the accept loop responsive to shutdown flags without
    /// asynchronous cancellation.
    pub fn accept_timeout(&self, timeout: Duration) -> Result<(BulkSocket, SocketAddr), SocketError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false).map_err(SocketError::Io)?;
                    return Ok((BulkSocket::from_stream(stream)?, peer));
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(SocketError::Timeout);
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(map_io_error(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_media_socket_roundtrip() {
        let mut rx = MediaSocket::bind(loopback()).unwrap();
        rx.set_timeout(RecvTimeout::After(Duration::from_millis(500))).unwrap();
        let tx = MediaSocket::bind(loopback()).unwrap();

        tx.send_to(rx.local_addr().unwrap(), b"datagram").unwrap();

        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let (len, peer) = rx.recv(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"datagram");
        assert_eq!(peer.port(), tx.local_addr().unwrap().port());
    }

    #[test]
    fn test_media_socket_timeout() {
        let mut rx = MediaSocket::bind(loopback()).unwrap();
        rx.set_timeout(RecvTimeout::After(Duration::from_millis(20))).unwrap();

        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let start = Instant::now();
        match rx.recv(&mut buf) {
            Err(SocketError::Timeout) => {}
            other => panic!("expected timeout, got {:?}", other.map(|_| ())),
        }
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_media_socket_nonblocking() {
        let mut rx = MediaSocket::bind(loopback()).unwrap();
        rx.set_timeout(RecvTimeout::NonBlocking).unwrap();

        let mut buf = [0u8; RECV_BUFFER_SIZE];
        assert!(matches!(rx.recv(&mut buf), Err(SocketError::Timeout)));
    }

    #[test]
    fn test_bulk_framed_roundtrip() {
        let listener = BulkListener::bind(loopback()).unwrap();
        let addr = listener.local_addr().unwrap();

        let client = std::thread::spawn(move || {
            let mut socket = BulkSocket::connect(addr, Duration::from_secs(1)).unwrap();
            socket.send_framed(b"first frame").unwrap();
            socket.send_framed(b"").unwrap();
            socket.set_timeout(RecvTimeout::After(Duration::from_secs(1))).unwrap();
            socket.recv_framed().unwrap()
        });

        let (mut server, _) = listener.accept_timeout(Duration::from_secs(1)).unwrap();
        server.set_timeout(RecvTimeout::After(Duration::from_secs(1))).unwrap();
        assert_eq!(server.recv_framed().unwrap(), b"first frame");
        assert_eq!(server.recv_framed().unwrap(), b"");
        server.send_framed(b"reply").unwrap();

        assert_eq!(client.join().unwrap(), b"reply");
    }

    #[test]
    fn test_bulk_closed_on_eof() {
        let listener = BulkListener::bind(loopback()).unwrap();
        let addr = listener.local_addr().unwrap();

        let client = std::thread::spawn(move || {
            let socket = BulkSocket::connect(addr, Duration::from_secs(1)).unwrap();
            socket.shutdown();
        });

        let (mut server, _) = listener.accept_timeout(Duration::from_secs(1)).unwrap();
        server.set_timeout(RecvTimeout::After(Duration::from_secs(1))).unwrap();
        assert!(matches!(server.recv_framed(), Err(SocketError::Closed)));
        client.join().unwrap();
    }

    #[test]
    fn test_bulk_recv_timeout() {
        let listener = BulkListener::bind(loopback()).unwrap();
        let addr = listener.local_addr().unwrap();

        let _client = BulkSocket::connect(addr, Duration::from_secs(1)).unwrap();
        let (mut server, _) = listener.accept_timeout(Duration::from_secs(1)).unwrap();
        server.set_timeout(RecvTimeout::After(Duration::from_millis(20))).unwrap();

        assert!(matches!(server.recv_framed(), Err(SocketError::Timeout)));
    }

    #[test]
    fn test_accept_timeout() {
        let listener = BulkListener::bind(loopback()).unwrap();
        assert!(matches!(
            listener.accept_timeout(Duration::from_millis(20)),
            Err(SocketError::Timeout)
        ));
    }
}
