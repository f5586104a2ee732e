//! Forwarding decrypted traffic to a plaintext target

use super::io::{poll_fds, write_all, PeerIo};
use super::observation::RelayReport;
use super::starttls::is_disconnect;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::fd::AsRawFd;
use std::time::Duration;

const RELAY_CHUNK: usize = 16 * 1024;

/// Floor for the target connect timeout
const MIN_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Floor for the idle timeout, so a zero data wait still forwards replies
const MIN_RELAY_IDLE: Duration = Duration::from_millis(500);

/// Relay between `peer` and a fresh connection to `target` until either side
/// closes or both stay silent for `idle`.
///
/// `first` is data already read from the peer; it is sent to the target
/// before anything else.
pub fn relay<S: PeerIo>(
    peer: &mut S,
    target: SocketAddr,
    first: &[u8],
    idle: Duration,
) -> RelayReport {
    let mut report = RelayReport::default();
    let idle = idle.max(MIN_RELAY_IDLE);

    let connect_timeout = idle.max(MIN_CONNECT_TIMEOUT);
    let mut upstream = match TcpStream::connect_timeout(&target, connect_timeout) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(%target, error = %e, "failed to connect to forward target");
            report.error = Some(format!("connect to {}: {}", target, e));
            return report;
        }
    };
    let _ = upstream.set_nodelay(true);

    if let Err(e) = pump(&mut report, peer, &mut upstream, first, idle) {
        if !is_disconnect(&e) {
            report.error = Some(e.to_string());
        }
    }

    let _ = upstream.shutdown(Shutdown::Both);
    tracing::debug!(
        %target,
        to_target = report.to_target,
        to_peer = report.to_peer,
        "relay finished"
    );
    report
}

fn pump<S: PeerIo>(
    report: &mut RelayReport,
    peer: &mut S,
    upstream: &mut TcpStream,
    first: &[u8],
    idle: Duration,
) -> io::Result<()> {
    upstream.write_all(first)?;
    report.to_target += first.len() as u64;

    let mut buf = vec![0u8; RELAY_CHUNK];
    loop {
        let (peer_ready, upstream_ready) = if peer.pending() > 0 {
            (true, false)
        } else {
            let mut fds = [
                libc::pollfd {
                    fd: peer.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    fd: upstream.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
            ];
            if poll_fds(&mut fds, Some(idle))? == 0 {
                tracing::debug!("relay idle timeout");
                return Ok(());
            }
            (fds[0].revents != 0, fds[1].revents != 0)
        };

        if peer_ready {
            let n = match peer.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                // Partial TLS record on a non-blocking peer
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => 0,
                Err(e) => return Err(e),
            };
            if n > 0 {
                upstream.write_all(&buf[..n])?;
                report.to_target += n as u64;
            }
        }

        if upstream_ready {
            let n = upstream.read(&mut buf)?;
            if n == 0 {
                return Ok(());
            }
            write_all(peer, &buf[..n], idle)?;
            report.to_peer += n as u64;
        }
    }
}
