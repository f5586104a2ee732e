//! TLS handshake driving and failure analysis
//!
//! The handshake itself is performed by `Ssl::accept()`; this module drives
//! it over a non-blocking socket against a single deadline and turns the
//! result into an outcome a classifier can reason about. A failed or timed
//! out handshake is an observation, not an error: only local setup problems
//! are returned as `Err`.

use super::config::{ProbeTlsConfig, TlsError};
use super::summary::HandshakeSummary;
use crate::transport::io::{poll_fds, PollEvents};
use openssl::ssl::{ErrorCode, HandshakeError, Ssl, SslRef, SslStream};
use serde::Serialize;
use std::io;
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::time::{Duration, Instant};

/// Default handshake timeout
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Alerts a client sends when it rejects the server certificate
const CERTIFICATE_ALERTS: &[&str] = &[
    "bad certificate",
    "unsupported certificate",
    "certificate revoked",
    "certificate expired",
    "certificate unknown",
    "unknown ca",
];

/// How a server-side handshake ended
pub enum HandshakeOutcome {
    Completed {
        stream: SslStream<TcpStream>,
        summary: HandshakeSummary,
    },
    Failed(HandshakeFailure),
    TimedOut,
}

/// Details of a failed handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandshakeFailure {
    /// OpenSSL reason for the failure
    pub reason: String,
    /// Alert description the client sent, if any (e.g. "unknown ca")
    pub alert: Option<String>,
    /// The client closed the connection without completing the handshake
    pub peer_closed: bool,
    /// Protocol and cipher were agreed before the handshake broke down
    pub negotiated: bool,
}

impl HandshakeFailure {
    fn from_error(ssl: &SslRef, error: &openssl::ssl::Error) -> Self {
        let reasons: Vec<String> = error
            .ssl_error()
            .map(|stack| {
                stack
                    .errors()
                    .iter()
                    .filter_map(|e| e.reason().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let alert = reasons.iter().find_map(|r| {
            r.find("alert ")
                .map(|at| r[at + "alert ".len()..].trim().to_string())
        });

        let peer_closed = match error.code() {
            ErrorCode::ZERO_RETURN => true,
            ErrorCode::SYSCALL => error.io_error().map_or(true, |e| {
                matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionReset
                        | io::ErrorKind::ConnectionAborted
                        | io::ErrorKind::BrokenPipe
                        | io::ErrorKind::UnexpectedEof
                )
            }),
            _ => reasons.iter().any(|r| r.contains("unexpected eof")),
        };

        let certificate_rejected = alert
            .as_deref()
            .map_or(false, |a| CERTIFICATE_ALERTS.contains(&a));

        let reason = if reasons.is_empty() {
            match error.io_error() {
                Some(e) => e.to_string(),
                None if peer_closed => "connection closed by peer".to_string(),
                None => error.to_string(),
            }
        } else {
            reasons.join("; ")
        };

        HandshakeFailure {
            reason,
            alert,
            peer_closed,
            negotiated: ssl.current_cipher().is_some() || certificate_rejected,
        }
    }
}

/// Run the server side of a handshake on `stream`, bounded by `timeout`.
///
/// The socket is switched to non-blocking mode and stays that way, so the
/// whole handshake shares one deadline however the client paces its bytes.
pub fn accept(
    config: &ProbeTlsConfig,
    stream: TcpStream,
    timeout: Duration,
) -> Result<HandshakeOutcome, TlsError> {
    let deadline = Instant::now() + timeout;
    stream.set_nonblocking(true)?;

    let ssl = Ssl::new(&config.ctx)?;
    let mut attempt = ssl.accept(stream);

    loop {
        match attempt {
            Ok(stream) => {
                let summary = HandshakeSummary::from_ssl(stream.ssl());
                return Ok(HandshakeOutcome::Completed { stream, summary });
            }
            Err(HandshakeError::SetupFailure(stack)) => return Err(TlsError::OpenSsl(stack)),
            Err(HandshakeError::Failure(mid)) => {
                return Ok(HandshakeOutcome::Failed(HandshakeFailure::from_error(
                    mid.ssl(),
                    mid.error(),
                )));
            }
            Err(HandshakeError::WouldBlock(mid)) => {
                let events = if mid.error().code() == ErrorCode::WANT_WRITE {
                    PollEvents::Write
                } else {
                    PollEvents::Read
                };
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Ok(HandshakeOutcome::TimedOut);
                }
                wait_ready(mid.get_ref(), events, remaining)?;
                attempt = mid.handshake();
            }
        }
    }
}

fn wait_ready(stream: &TcpStream, events: PollEvents, timeout: Duration) -> io::Result<bool> {
    let mut fds = [libc::pollfd {
        fd: stream.as_raw_fd(),
        events: events.mask(),
        revents: 0,
    }];
    Ok(poll_fds(&mut fds, Some(timeout))? > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forge::{synthesize, CertSpec};
    use crate::tls::{ClientConfig, ProbeTlsConfig, ProtocolRange, TlsVersion};
    use std::io::Write;
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::thread;

    fn probe(range: ProtocolRange) -> ProbeTlsConfig {
        let bundle = synthesize(&CertSpec::new("www.example.com")).unwrap();
        ProbeTlsConfig::builder(Arc::new(bundle))
            .protocols(range)
            .build()
            .unwrap()
    }

    #[test]
    fn test_trickling_client_times_out_at_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let config = probe(ProtocolRange::any());

        // A handshake record header announcing 512 bytes, then one byte at a
        // time, each well inside the handshake timeout
        let trickle = thread::spawn(move || {
            let mut tcp = TcpStream::connect(addr).unwrap();
            if tcp.write_all(&[0x16, 0x03, 0x01, 0x02, 0x00]).is_err() {
                return;
            }
            for _ in 0..40 {
                thread::sleep(Duration::from_millis(100));
                if tcp.write_all(&[0x01]).is_err() {
                    return;
                }
            }
        });

        let (tcp, _) = listener.accept().unwrap();
        let start = Instant::now();
        let outcome = accept(&config, tcp, Duration::from_millis(500)).unwrap();
        let elapsed = start.elapsed();

        assert!(matches!(outcome, HandshakeOutcome::TimedOut));
        assert!(elapsed >= Duration::from_millis(450), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(1500), "elapsed {:?}", elapsed);
        trickle.join().unwrap();
    }

    #[test]
    fn test_completed_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let config = probe(ProtocolRange::exactly(TlsVersion::Tls12));

        let client = thread::spawn(move || {
            let client = ClientConfig::builder()
                .version(TlsVersion::Tls12)
                .servername("www.example.com")
                .build()
                .unwrap();
            let tcp = TcpStream::connect(addr).unwrap();
            let mut tls = client.connect(tcp).unwrap();
            tls.write_all(b"ping").unwrap();
        });

        let (tcp, _) = listener.accept().unwrap();
        match accept(&config, tcp, Duration::from_secs(5)).unwrap() {
            HandshakeOutcome::Completed { summary, .. } => {
                assert_eq!(summary.version, "TLSv1.2");
                assert_eq!(summary.servername.as_deref(), Some("www.example.com"));
            }
            HandshakeOutcome::Failed(f) => panic!("handshake failed: {:?}", f),
            HandshakeOutcome::TimedOut => panic!("handshake timed out"),
        }

        client.join().unwrap();
    }

    #[test]
    fn test_verifying_client_rejects_self_signed() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let config = probe(ProtocolRange::exactly(TlsVersion::Tls12));

        let client = thread::spawn(move || {
            let client = ClientConfig::builder()
                .version(TlsVersion::Tls12)
                .verify_peer(true)
                .build()
                .unwrap();
            let tcp = TcpStream::connect(addr).unwrap();
            assert!(client.connect(tcp).is_err());
        });

        let (tcp, _) = listener.accept().unwrap();
        match accept(&config, tcp, Duration::from_secs(5)).unwrap() {
            HandshakeOutcome::Failed(failure) => {
                assert!(failure.negotiated, "failure: {:?}", failure);
            }
            HandshakeOutcome::Completed { .. } => panic!("verifying client accepted self-signed"),
            HandshakeOutcome::TimedOut => panic!("handshake timed out"),
        }

        client.join().unwrap();
    }

    #[test]
    fn test_version_mismatch_is_not_negotiated() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let config = probe(ProtocolRange::exactly(TlsVersion::Tls13));

        let client = thread::spawn(move || {
            let client = ClientConfig::builder()
                .version(TlsVersion::Tls12)
                .build()
                .unwrap();
            let tcp = TcpStream::connect(addr).unwrap();
            assert!(client.connect(tcp).is_err());
        });

        let (tcp, _) = listener.accept().unwrap();
        match accept(&config, tcp, Duration::from_secs(5)).unwrap() {
            HandshakeOutcome::Failed(failure) => assert!(!failure.negotiated),
            HandshakeOutcome::Completed { .. } => panic!("out-of-range client completed"),
            HandshakeOutcome::TimedOut => panic!("handshake timed out"),
        }

        client.join().unwrap();
    }

    #[test]
    fn test_silent_client_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let config = probe(ProtocolRange::any());

        let _tcp = TcpStream::connect(addr).unwrap();
        let (tcp, _) = listener.accept().unwrap();

        let outcome = accept(&config, tcp, Duration::from_millis(200)).unwrap();
        assert!(matches!(outcome, HandshakeOutcome::TimedOut));
    }

    #[test]
    fn test_closing_client_is_peer_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let config = probe(ProtocolRange::any());

        drop(TcpStream::connect(addr).unwrap());
        let (tcp, _) = listener.accept().unwrap();

        match accept(&config, tcp, Duration::from_secs(2)).unwrap() {
            HandshakeOutcome::Failed(failure) => {
                assert!(failure.peer_closed);
                assert!(!failure.negotiated);
            }
            HandshakeOutcome::Completed { .. } => panic!("empty connection completed"),
            HandshakeOutcome::TimedOut => panic!("closed connection timed out"),
        }
    }
}
