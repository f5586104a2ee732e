//! What the transport saw during one session

use crate::tls::{HandshakeFailure, HandshakeSummary};
use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;

/// Outcome of a bounded wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wait<T> {
    Completed(T),
    TimedOut,
    PeerClosed,
}

impl<T> Wait<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Wait::Completed(_))
    }

    pub fn completed(&self) -> Option<&T> {
        match self {
            Wait::Completed(value) => Some(value),
            Wait::TimedOut | Wait::PeerClosed => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Wait<U> {
        match self {
            Wait::Completed(value) => Wait::Completed(f(value)),
            Wait::TimedOut => Wait::TimedOut,
            Wait::PeerClosed => Wait::PeerClosed,
        }
    }
}

/// Byte counts of a forwarded session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayReport {
    /// Bytes relayed from the TLS peer to the forward target
    pub to_target: u64,
    /// Bytes relayed from the forward target back to the TLS peer
    pub to_peer: u64,
    /// Why relaying stopped, if it was not a clean close or idle timeout
    pub error: Option<String>,
}

/// Record of one probe session.
///
/// Phases run strictly in order (upgrade, handshake, data), so each variant
/// implies every earlier phase succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// No client connected before the accept deadline
    NoPeer,
    /// The plaintext upgrade did not reach the TLS handshake.
    /// `Completed` carries the unexpected command the peer sent.
    UpgradeFailed { peer: SocketAddr, outcome: Wait<String> },
    HandshakeFailed {
        peer: SocketAddr,
        failure: HandshakeFailure,
    },
    HandshakeTimedOut { peer: SocketAddr },
    /// The handshake completed; `data` is the first application data wait
    Established {
        peer: SocketAddr,
        summary: HandshakeSummary,
        data: Wait<Bytes>,
        relay: Option<RelayReport>,
    },
}

impl Observation {
    pub fn peer(&self) -> Option<SocketAddr> {
        match self {
            Observation::NoPeer => None,
            Observation::UpgradeFailed { peer, .. }
            | Observation::HandshakeFailed { peer, .. }
            | Observation::HandshakeTimedOut { peer }
            | Observation::Established { peer, .. } => Some(*peer),
        }
    }
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Observation::NoPeer => f.write_str("no client connected"),
            Observation::UpgradeFailed { peer, outcome } => match outcome {
                Wait::Completed(line) => {
                    write!(f, "{}: upgrade refused, unexpected command {:?}", peer, line)
                }
                Wait::TimedOut => write!(f, "{}: upgrade timed out", peer),
                Wait::PeerClosed => write!(f, "{}: closed during upgrade", peer),
            },
            Observation::HandshakeFailed { peer, failure } => {
                write!(f, "{}: handshake failed ({})", peer, failure.reason)?;
                if let Some(alert) = &failure.alert {
                    write!(f, ", alert \"{}\"", alert)?;
                }
                if failure.negotiated {
                    f.write_str(", after negotiation")?;
                }
                Ok(())
            }
            Observation::HandshakeTimedOut { peer } => write!(f, "{}: handshake timed out", peer),
            Observation::Established {
                peer,
                summary,
                data,
                relay,
            } => {
                write!(f, "{}: {} {}", peer, summary.version, summary.cipher)?;
                match data {
                    Wait::Completed(bytes) => write!(f, ", {} bytes received", bytes.len())?,
                    Wait::TimedOut => f.write_str(", no data before timeout")?,
                    Wait::PeerClosed => f.write_str(", closed without data")?,
                }
                if let Some(relay) = relay {
                    write!(
                        f,
                        ", relayed {}/{} bytes",
                        relay.to_target, relay.to_peer
                    )?;
                }
                Ok(())
            }
        }
    }
}
