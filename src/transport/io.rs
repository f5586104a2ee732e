//! Peer I/O abstraction
//!
//! `PeerIo` lets the upgrade, data and relay phases treat a plaintext socket
//! and a TLS stream the same way. `PeerChannel` adds deadline-bounded reads
//! on top, reporting silence and disconnects as `Wait` outcomes instead of
//! errors.

use super::observation::Wait;
use bytes::{Bytes, BytesMut};
use openssl::ssl::SslStream;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

const READ_CHUNK: usize = 4096;

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
}

impl PollEvents {
    pub(crate) fn mask(self) -> libc::c_short {
        match self {
            PollEvents::Read => libc::POLLIN,
            PollEvents::Write => libc::POLLOUT,
        }
    }
}

/// Operations shared by plaintext and TLS peers
pub trait PeerIo: AsRawFd {
    /// Read data from the peer
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write data to the peer
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Close the connection
    fn close(&mut self) -> io::Result<()>;

    /// Bytes already decoded and waiting to be read
    fn pending(&self) -> usize {
        0
    }

    /// Wait until the peer is ready for `events`.
    ///
    /// Returns false on timeout.
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> io::Result<bool> {
        if events == PollEvents::Read && self.pending() > 0 {
            return Ok(true);
        }
        let mut fds = [libc::pollfd {
            fd: self.as_raw_fd(),
            events: events.mask(),
            revents: 0,
        }];
        Ok(poll_fds(&mut fds, timeout)? > 0)
    }
}

/// Poll a set of descriptors, returning how many are ready.
///
/// An interrupted poll reports zero ready descriptors.
pub(crate) fn poll_fds(fds: &mut [libc::pollfd], timeout: Option<Duration>) -> io::Result<usize> {
    let timeout_ms = match timeout {
        // Round up so sub-millisecond remainders do not spin
        Some(d) => ((d.as_micros() + 999) / 1000).min(i32::MAX as u128) as i32,
        None => -1,
    };

    let result = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };

    if result < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(0);
        }
        return Err(err);
    }

    Ok(result as usize)
}

/// Plaintext TCP peer
pub struct PlainIo {
    stream: TcpStream,
}

impl PlainIo {
    pub fn new(stream: TcpStream) -> Self {
        PlainIo { stream }
    }

    pub fn into_stream(self) -> TcpStream {
        self.stream
    }
}

impl AsRawFd for PlainIo {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

impl PeerIo for PlainIo {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn close(&mut self) -> io::Result<()> {
        self.stream.shutdown(Shutdown::Both)
    }
}

/// TLS peer over an established `SslStream`
pub struct TlsIo {
    stream: SslStream<TcpStream>,
}

impl TlsIo {
    pub fn new(stream: SslStream<TcpStream>) -> Self {
        TlsIo { stream }
    }

    pub fn stream(&self) -> &SslStream<TcpStream> {
        &self.stream
    }
}

impl AsRawFd for TlsIo {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.get_ref().as_raw_fd()
    }
}

impl PeerIo for TlsIo {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn close(&mut self) -> io::Result<()> {
        // A peer that already left makes close_notify fail; that is fine
        let _ = self.stream.shutdown();
        self.stream.get_ref().shutdown(Shutdown::Both)
    }

    fn pending(&self) -> usize {
        self.stream.ssl().pending()
    }
}

/// Deadline-bounded reader and writer over a `PeerIo`
pub struct PeerChannel<S: PeerIo> {
    io: S,
    timeout: Duration,
    buffer: BytesMut,
}

impl<S: PeerIo> PeerChannel<S> {
    pub fn new(io: S, timeout: Duration) -> Self {
        PeerChannel {
            io,
            timeout,
            buffer: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Bytes read from the peer but not yet consumed
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Wait up to the channel timeout for the next chunk of data
    pub fn read_chunk(&mut self) -> io::Result<Wait<Bytes>> {
        if self.buffer.is_empty() {
            let deadline = Instant::now() + self.timeout;
            match self.fill(deadline)? {
                Wait::Completed(_) => {}
                Wait::TimedOut => return Ok(Wait::TimedOut),
                Wait::PeerClosed => return Ok(Wait::PeerClosed),
            }
        }
        Ok(Wait::Completed(self.buffer.split().freeze()))
    }

    /// Read one CRLF or LF terminated line, without its terminator.
    ///
    /// The whole line must arrive within the channel timeout. A line longer
    /// than `max_len` is returned truncated.
    pub fn read_line(&mut self, max_len: usize) -> io::Result<Wait<String>> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
                let line = self.buffer.split_to(pos + 1);
                return Ok(Wait::Completed(decode_line(&line)));
            }
            if self.buffer.len() >= max_len {
                let line = self.buffer.split_to(max_len);
                return Ok(Wait::Completed(decode_line(&line)));
            }
            match self.fill(deadline)? {
                Wait::Completed(_) => {}
                Wait::TimedOut => return Ok(Wait::TimedOut),
                Wait::PeerClosed => return Ok(Wait::PeerClosed),
            }
        }
    }

    /// Write all of `data`, waiting up to the channel timeout whenever the
    /// peer stops accepting bytes
    pub fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        write_all(&mut self.io, data, self.timeout)
    }

    pub fn get_ref(&self) -> &S {
        &self.io
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.io
    }

    /// Release the underlying I/O, dropping any unconsumed bytes
    pub fn into_inner(self) -> S {
        self.io
    }

    fn fill(&mut self, deadline: Instant) -> io::Result<Wait<usize>> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !self.io.poll(PollEvents::Read, Some(remaining))? {
                if Instant::now() >= deadline {
                    return Ok(Wait::TimedOut);
                }
                continue;
            }

            match self.io.read(&mut chunk) {
                Ok(0) => return Ok(Wait::PeerClosed),
                Ok(n) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    return Ok(Wait::Completed(n));
                }
                Err(e) => match e.kind() {
                    io::ErrorKind::Interrupted => {}
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                        if Instant::now() >= deadline {
                            return Ok(Wait::TimedOut);
                        }
                    }
                    io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof => return Ok(Wait::PeerClosed),
                    _ => return Err(e),
                },
            }
        }
    }
}

/// Write all of `data` to a possibly non-blocking peer.
///
/// Fails with `TimedOut` if the peer accepts nothing for `stall`.
pub(crate) fn write_all<S: PeerIo>(io: &mut S, mut data: &[u8], stall: Duration) -> io::Result<()> {
    while !data.is_empty() {
        match io.write(data) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => data = &data[n..],
            Err(e) => match e.kind() {
                io::ErrorKind::Interrupted => {}
                io::ErrorKind::WouldBlock => {
                    if !io.poll(PollEvents::Write, Some(stall))? {
                        return Err(io::ErrorKind::TimedOut.into());
                    }
                }
                _ => return Err(e),
            },
        }
    }
    Ok(())
}

fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    while end > 0 && matches!(raw[end - 1], b'\r' | b'\n') {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}
