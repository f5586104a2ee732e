//! Probe transport
//!
//! Listens for the client under audit, optionally walks it through a
//! plaintext STARTTLS upgrade, runs the TLS handshake with the scenario's
//! configuration, then waits for (and optionally forwards) application
//! data. Each session ends in an [`Observation`].
//!
//! # Architecture
//!
//! 1. `ProbeTransport::listen` binds the endpoint
//! 2. `ProbeTransport::accept` waits for one client, honoring cancellation
//! 3. `PeerSession::run` drives upgrade, handshake and data phases
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//! use std::sync::Arc;
//! use tlsaudit::config::EndpointConfig;
//! use tlsaudit::forge::{self, CertSpec};
//! use tlsaudit::tls::ProbeTlsConfig;
//! use tlsaudit::transport::ProbeTransport;
//!
//! let credential = Arc::new(forge::synthesize(&CertSpec::new("www.example.com")).unwrap());
//! let tls = ProbeTlsConfig::builder(credential).build().unwrap();
//! let transport = ProbeTransport::listen(&EndpointConfig::default(), tls).unwrap();
//! let observation = transport.probe_once(&AtomicBool::new(false)).unwrap();
//! println!("{}", observation);
//! ```

pub mod io;
pub mod observation;
pub mod relay;
pub mod session;
pub mod starttls;

pub use observation::{Observation, RelayReport, Wait};
pub use session::PeerSession;
pub use starttls::Upgrade;

use crate::config::EndpointConfig;
use crate::tls::{ProbeTlsConfig, TlsError};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// How often a blocked accept re-checks for cancellation
const ACCEPT_SLICE: Duration = Duration::from_millis(100);

const LISTEN_BACKLOG: i32 = 128;

/// Transport errors
///
/// These are local failures; anything the peer does is an `Observation`.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),
}

/// A bound listener serving one TLS configuration
pub struct ProbeTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
    tls: ProbeTlsConfig,
    endpoint: EndpointConfig,
}

impl ProbeTransport {
    /// Bind the endpoint's listen address
    pub fn listen(endpoint: &EndpointConfig, tls: ProbeTlsConfig) -> Result<Self, TransportError> {
        let addr = endpoint.listen_socket_addr();
        let listener = bind(addr).map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        tracing::info!(%local_addr, protocols = %tls.protocols(), "listening");

        Ok(ProbeTransport {
            listener,
            local_addr,
            tls,
            endpoint: endpoint.clone(),
        })
    }

    /// Address actually bound, with the OS-assigned port when 0 was asked
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for one client.
    ///
    /// Returns `Ok(None)` when `cancel` is raised or the endpoint's accept
    /// timeout passes first.
    pub fn accept(&self, cancel: &AtomicBool) -> Result<Option<PeerSession>, TransportError> {
        let deadline = self.endpoint.accept_timeout.map(|t| Instant::now() + t);

        loop {
            if cancel.load(Ordering::Acquire) {
                tracing::debug!("accept cancelled");
                return Ok(None);
            }

            let slice = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        tracing::info!("no client before accept timeout");
                        return Ok(None);
                    }
                    remaining.min(ACCEPT_SLICE)
                }
                None => ACCEPT_SLICE,
            };

            let mut fds = [libc::pollfd {
                fd: self.listener.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            }];
            if io::poll_fds(&mut fds, Some(slice)).map_err(TransportError::Accept)? == 0 {
                continue;
            }

            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false)?;
                    tracing::info!(%peer, "client connected");
                    return Ok(Some(PeerSession::new(
                        stream,
                        peer,
                        self.tls.clone(),
                        self.endpoint.clone(),
                    )));
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock
                            | std::io::ErrorKind::Interrupted
                            | std::io::ErrorKind::ConnectionAborted
                    ) => {}
                Err(e) => return Err(TransportError::Accept(e)),
            }
        }
    }

    /// Accept one client and run its session; `NoPeer` if none arrived
    pub fn probe_once(&self, cancel: &AtomicBool) -> Result<Observation, TransportError> {
        match self.accept(cancel)? {
            Some(session) => session.run(),
            None => Ok(Observation::NoPeer),
        }
    }
}

fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}
