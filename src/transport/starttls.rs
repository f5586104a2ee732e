//! Plaintext upgrade dialogs for SMTP and FTP
//!
//! The probe plays just enough of each server to get a client to the point
//! where it asks to switch to TLS. Anything else the client insists on
//! sending before that ends the upgrade.

use super::io::{PeerChannel, PeerIo};
use super::observation::Wait;
use crate::config::StartTlsProtocol;
use std::io;

/// Longest command line accepted during an upgrade
const MAX_LINE: usize = 1024;

/// Commands answered before giving up on an upgrade
const MAX_COMMANDS: usize = 32;

/// How an upgrade dialog ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upgrade {
    /// The client asked for TLS and was told to go ahead
    Ready,
    /// The client never asked; `Completed` carries the offending command
    Refused(Wait<String>),
}

enum Reply {
    Continue(&'static str),
    Upgrade(&'static str),
    Refuse(&'static str),
}

/// Run the plaintext dialog for `protocol` on `channel`.
///
/// `StartTlsProtocol::None` is immediately `Ready`.
pub fn negotiate<S: PeerIo>(
    protocol: StartTlsProtocol,
    channel: &mut PeerChannel<S>,
) -> io::Result<Upgrade> {
    let (greeting, respond): (&str, fn(&str, &str) -> Reply) = match protocol {
        StartTlsProtocol::None => return Ok(Upgrade::Ready),
        StartTlsProtocol::Smtp => ("220 localhost ESMTP ready\r\n", smtp_reply),
        StartTlsProtocol::Ftp => ("220 FTP server ready\r\n", ftp_reply),
    };

    if !send(channel, greeting)? {
        return Ok(Upgrade::Refused(Wait::PeerClosed));
    }

    for _ in 0..MAX_COMMANDS {
        let line = match channel.read_line(MAX_LINE)? {
            Wait::Completed(line) => line,
            Wait::TimedOut => return Ok(Upgrade::Refused(Wait::TimedOut)),
            Wait::PeerClosed => return Ok(Upgrade::Refused(Wait::PeerClosed)),
        };

        let (verb, arg) = split_command(&line);
        tracing::debug!(?protocol, command = %verb, "upgrade command");

        match respond(&verb, arg) {
            Reply::Continue(text) => {
                if !send(channel, text)? {
                    return Ok(Upgrade::Refused(Wait::PeerClosed));
                }
            }
            Reply::Upgrade(text) => {
                if !send(channel, text)? {
                    return Ok(Upgrade::Refused(Wait::PeerClosed));
                }
                if channel.buffered() > 0 {
                    // Nothing may follow the upgrade command in the clear
                    tracing::warn!(
                        bytes = channel.buffered(),
                        "client sent data before the TLS handshake"
                    );
                    return Ok(Upgrade::Refused(Wait::Completed(line)));
                }
                return Ok(Upgrade::Ready);
            }
            Reply::Refuse(text) => {
                // Best effort; the client may already be gone
                let _ = channel.write_all(text.as_bytes());
                return Ok(Upgrade::Refused(Wait::Completed(line)));
            }
        }
    }

    Ok(Upgrade::Refused(Wait::TimedOut))
}

/// Write a reply; false if the peer has gone away
fn send<S: PeerIo>(channel: &mut PeerChannel<S>, text: &str) -> io::Result<bool> {
    match channel.write_all(text.as_bytes()) {
        Ok(()) => Ok(true),
        Err(e) if is_disconnect(&e) => Ok(false),
        Err(e) => Err(e),
    }
}

pub(crate) fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
    )
}

fn split_command(line: &str) -> (String, &str) {
    let line = line.trim();
    match line.split_once(char::is_whitespace) {
        Some((verb, arg)) => (verb.to_ascii_uppercase(), arg.trim()),
        None => (line.to_ascii_uppercase(), ""),
    }
}

fn smtp_reply(verb: &str, _arg: &str) -> Reply {
    match verb {
        "EHLO" => Reply::Continue("250-localhost\r\n250-PIPELINING\r\n250 STARTTLS\r\n"),
        "HELO" => Reply::Continue("250 localhost\r\n"),
        "NOOP" | "RSET" => Reply::Continue("250 OK\r\n"),
        "STARTTLS" => Reply::Upgrade("220 Ready to start TLS\r\n"),
        "QUIT" => Reply::Refuse("221 Bye\r\n"),
        _ => Reply::Refuse("530 Must issue a STARTTLS command first\r\n"),
    }
}

fn ftp_reply(verb: &str, arg: &str) -> Reply {
    match verb {
        "AUTH" => match arg.to_ascii_uppercase().as_str() {
            "TLS" | "TLS-C" | "SSL" => Reply::Upgrade("234 AUTH TLS successful\r\n"),
            _ => Reply::Continue("504 Unsupported security mechanism\r\n"),
        },
        "FEAT" => Reply::Continue("211-Features:\r\n AUTH TLS\r\n PBSZ\r\n PROT\r\n211 End\r\n"),
        "SYST" => Reply::Continue("215 UNIX Type: L8\r\n"),
        "NOOP" => Reply::Continue("200 OK\r\n"),
        "QUIT" => Reply::Refuse("221 Goodbye\r\n"),
        _ => Reply::Refuse("530 Please login with AUTH TLS first\r\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::io::PlainIo;
    use std::io::{BufRead, BufReader, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;
    use std::time::Duration;

    fn serve(
        protocol: StartTlsProtocol,
        timeout: Duration,
    ) -> (thread::JoinHandle<Upgrade>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut channel = PeerChannel::new(PlainIo::new(stream), timeout);
            negotiate(protocol, &mut channel).unwrap()
        });
        (server, TcpStream::connect(addr).unwrap())
    }

    fn expect_reply(reader: &mut BufReader<TcpStream>, code: &str) {
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            if line.starts_with(' ') {
                continue;
            }
            assert!(line.starts_with(code), "expected {}, got {:?}", code, line);
            // Continuation lines carry '-' after the code
            if line.as_bytes().get(3) != Some(&b'-') {
                return;
            }
        }
    }

    #[test]
    fn test_split_command() {
        assert_eq!(split_command("ehlo client.local"), ("EHLO".to_string(), "client.local"));
        assert_eq!(split_command("STARTTLS"), ("STARTTLS".to_string(), ""));
        assert_eq!(split_command("auth   tls "), ("AUTH".to_string(), "tls"));
    }

    #[test]
    fn test_no_protocol_is_ready() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let _client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, _) = listener.accept().unwrap();
        let mut channel = PeerChannel::new(PlainIo::new(stream), Duration::from_millis(10));
        assert_eq!(
            negotiate(StartTlsProtocol::None, &mut channel).unwrap(),
            Upgrade::Ready
        );
    }

    #[test]
    fn test_smtp_starttls() {
        let (server, client) = serve(StartTlsProtocol::Smtp, Duration::from_secs(2));
        let mut writer = client.try_clone().unwrap();
        let mut reader = BufReader::new(client);

        expect_reply(&mut reader, "220");
        writer.write_all(b"EHLO client.local\r\n").unwrap();
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let last = line.as_bytes().get(3) == Some(&b' ');
            lines.push(line);
            if last {
                break;
            }
        }
        assert!(lines.iter().any(|l| l.contains("STARTTLS")));

        writer.write_all(b"STARTTLS\r\n").unwrap();
        expect_reply(&mut reader, "220");

        assert_eq!(server.join().unwrap(), Upgrade::Ready);
    }

    #[test]
    fn test_smtp_mail_without_starttls_is_refused() {
        let (server, client) = serve(StartTlsProtocol::Smtp, Duration::from_secs(2));
        let mut writer = client.try_clone().unwrap();
        let mut reader = BufReader::new(client);

        expect_reply(&mut reader, "220");
        writer.write_all(b"HELO client\r\n").unwrap();
        expect_reply(&mut reader, "250");
        writer.write_all(b"MAIL FROM:<a@b>\r\n").unwrap();

        assert_eq!(
            server.join().unwrap(),
            Upgrade::Refused(Wait::Completed("MAIL FROM:<a@b>".to_string()))
        );
    }

    #[test]
    fn test_ftp_auth_tls() {
        let (server, client) = serve(StartTlsProtocol::Ftp, Duration::from_secs(2));
        let mut writer = client.try_clone().unwrap();
        let mut reader = BufReader::new(client);

        expect_reply(&mut reader, "220");
        writer.write_all(b"FEAT\r\n").unwrap();
        expect_reply(&mut reader, "211");
        writer.write_all(b"AUTH TLS\r\n").unwrap();
        expect_reply(&mut reader, "234");

        assert_eq!(server.join().unwrap(), Upgrade::Ready);
    }

    #[test]
    fn test_ftp_user_before_auth_is_refused() {
        let (server, client) = serve(StartTlsProtocol::Ftp, Duration::from_secs(2));
        let mut writer = client.try_clone().unwrap();
        let mut reader = BufReader::new(client);

        expect_reply(&mut reader, "220");
        writer.write_all(b"USER anonymous\r\n").unwrap();

        assert_eq!(
            server.join().unwrap(),
            Upgrade::Refused(Wait::Completed("USER anonymous".to_string()))
        );
    }

    #[test]
    fn test_silent_client_times_out() {
        let (server, client) = serve(StartTlsProtocol::Smtp, Duration::from_millis(100));
        assert_eq!(server.join().unwrap(), Upgrade::Refused(Wait::TimedOut));
        drop(client);
    }

    #[test]
    fn test_closed_client() {
        let (server, client) = serve(StartTlsProtocol::Ftp, Duration::from_secs(2));
        drop(client);
        assert_eq!(server.join().unwrap(), Upgrade::Refused(Wait::PeerClosed));
    }
}
