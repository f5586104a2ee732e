//! One client session: upgrade, handshake, data

use super::io::{PeerChannel, PeerIo, PlainIo, TlsIo};
use super::observation::{Observation, Wait};
use super::relay::relay;
use super::starttls::{negotiate, Upgrade};
use super::TransportError;
use crate::config::EndpointConfig;
use crate::tls::handshake::{self, HandshakeOutcome};
use crate::tls::ProbeTlsConfig;
use std::net::{SocketAddr, TcpStream};

/// An accepted client connection, ready to be probed
pub struct PeerSession {
    stream: TcpStream,
    peer: SocketAddr,
    tls: ProbeTlsConfig,
    endpoint: EndpointConfig,
}

impl PeerSession {
    pub(crate) fn new(
        stream: TcpStream,
        peer: SocketAddr,
        tls: ProbeTlsConfig,
        endpoint: EndpointConfig,
    ) -> Self {
        PeerSession {
            stream,
            peer,
            tls,
            endpoint,
        }
    }

    /// Drive the session through its phases and record what happened.
    ///
    /// Peer behavior never produces an `Err`; only local failures do.
    pub fn run(self) -> Result<Observation, TransportError> {
        let PeerSession {
            stream,
            peer,
            tls,
            endpoint,
        } = self;

        let _ = stream.set_nodelay(true);

        let mut upgrade = PeerChannel::new(PlainIo::new(stream), endpoint.upgrade_timeout);
        match negotiate(endpoint.starttls, &mut upgrade) {
            Ok(Upgrade::Ready) => {}
            Ok(Upgrade::Refused(outcome)) => {
                tracing::info!(%peer, ?outcome, "upgrade failed");
                let _ = upgrade.get_mut().close();
                return Ok(Observation::UpgradeFailed { peer, outcome });
            }
            Err(e) => {
                tracing::info!(%peer, error = %e, "upgrade aborted");
                let _ = upgrade.get_mut().close();
                return Ok(Observation::UpgradeFailed {
                    peer,
                    outcome: Wait::PeerClosed,
                });
            }
        }
        let stream = upgrade.into_inner().into_stream();

        let (stream, summary) = match handshake::accept(&tls, stream, endpoint.handshake_timeout)? {
            HandshakeOutcome::Completed { stream, summary } => (stream, summary),
            HandshakeOutcome::Failed(failure) => {
                tracing::info!(
                    %peer,
                    reason = %failure.reason,
                    alert = ?failure.alert,
                    negotiated = failure.negotiated,
                    "handshake failed"
                );
                return Ok(Observation::HandshakeFailed { peer, failure });
            }
            HandshakeOutcome::TimedOut => {
                tracing::info!(%peer, "handshake timed out");
                return Ok(Observation::HandshakeTimedOut { peer });
            }
        };

        tracing::info!(
            %peer,
            version = %summary.version,
            cipher = %summary.cipher,
            "handshake completed"
        );

        // The socket is still non-blocking from the handshake, so the wait
        // below is bounded by its own deadline rather than per-read timeouts
        let mut channel = PeerChannel::new(TlsIo::new(stream), endpoint.wait_data_timeout);
        let data = match channel.read_chunk() {
            Ok(data) => data,
            Err(e) => {
                // TLS-level errors mid-stream mean the peer tore the session down
                tracing::debug!(%peer, error = %e, "read after handshake failed");
                Wait::PeerClosed
            }
        };

        match &data {
            Wait::Completed(bytes) => tracing::info!(%peer, bytes = bytes.len(), "received data"),
            Wait::TimedOut => tracing::info!(%peer, "no data before timeout"),
            Wait::PeerClosed => tracing::info!(%peer, "closed without sending data"),
        }

        let relay = match (&data, endpoint.forward) {
            (Wait::Completed(first), Some(target)) => Some(relay(
                channel.get_mut(),
                target,
                first,
                endpoint.wait_data_timeout,
            )),
            _ => None,
        };

        let _ = channel.get_mut().close();

        Ok(Observation::Established {
            peer,
            summary,
            data,
            relay,
        })
    }
}
