//! Run configuration
//!
//! A settings object filled once (usually from the command line) and then
//! read by every scenario. Setters validate their input and return
//! `ConfigError` instead of silently falling back to a default.

use crate::forge::{self, CredentialBundle, CredentialError};
use crate::tls::{CertInfo, ClientConfig};
use openssl::x509::X509;
use std::fs::{self, OpenOptions};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default listen port
pub const DEFAULT_LISTEN_PORT: u16 = 8443;

/// Default wait for application data after a handshake
pub const DEFAULT_WAIT_DATA_TIMEOUT_MS: u64 = 5000;

/// Default timeout for the plaintext upgrade phase
pub const DEFAULT_UPGRADE_TIMEOUT_MS: u64 = 5000;

/// Common name used when nothing better is known
pub const DEFAULT_COMMON_NAME: &str = "www.example.com";

const PEER_CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {field}: {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("port out of range: {0}")]
    InvalidPort(i64),

    #[error("timeout must be non-negative: {0}")]
    NegativeTimeout(i64),

    #[error("no usable cipher in \"{0}\"")]
    EmptyCipherSet(String),

    #[error("credential file rejected: {0}")]
    Credential(#[from] CredentialError),

    #[error("{0} is not a writable file")]
    NotWritable(PathBuf),

    #[error("failed to capture certificate chain from {0}")]
    PeerCapture(String),
}

/// Plaintext protocol spoken before the TLS handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartTlsProtocol {
    #[default]
    None,
    /// SMTP `STARTTLS`
    Smtp,
    /// FTP `AUTH TLS`
    Ftp,
}

impl FromStr for StartTlsProtocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, ConfigError> {
        match s {
            "smtp" => Ok(StartTlsProtocol::Smtp),
            "ftp" => Ok(StartTlsProtocol::Ftp),
            _ => Err(ConfigError::InvalidValue {
                field: "starttls protocol",
                value: s.to_string(),
            }),
        }
    }
}

/// Where and how the probe transport listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub listen_addr: IpAddr,
    /// 0 asks the OS for an ephemeral port
    pub listen_port: u16,
    pub forward: Option<SocketAddr>,
    pub starttls: StartTlsProtocol,
    pub wait_data_timeout: Duration,
    pub upgrade_timeout: Duration,
    pub handshake_timeout: Duration,
    /// `None` waits for a client indefinitely
    pub accept_timeout: Option<Duration>,
}

impl EndpointConfig {
    pub fn listen_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_addr, self.listen_port)
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig {
            listen_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            listen_port: DEFAULT_LISTEN_PORT,
            forward: None,
            starttls: StartTlsProtocol::None,
            wait_data_timeout: Duration::from_millis(DEFAULT_WAIT_DATA_TIMEOUT_MS),
            upgrade_timeout: Duration::from_millis(DEFAULT_UPGRADE_TIMEOUT_MS),
            handshake_timeout: Duration::from_secs(
                crate::tls::handshake::DEFAULT_HANDSHAKE_TIMEOUT_SECS,
            ),
            accept_timeout: None,
        }
    }
}

/// Certificate chain captured from a target server
#[derive(Debug, Clone)]
pub struct PeerChain {
    pub target: String,
    pub certs: Vec<X509>,
}

impl PeerChain {
    /// Common name of the server's leaf certificate
    pub fn leaf_subject(&self) -> Option<String> {
        self.certs
            .first()
            .map(|cert| CertInfo::from_x509(cert).subject)
    }
}

/// Settings for a test run
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    endpoint: EndpointConfig,
    user_cn: Option<String>,
    server: Option<PeerChain>,
    user_cert_path: Option<PathBuf>,
    user_key_path: Option<PathBuf>,
    user_ca_cert_path: Option<PathBuf>,
    user_ca_key_path: Option<PathBuf>,
    loop_tests: bool,
    selected_tests: Vec<u32>,
    output_report: Option<PathBuf>,
}

impl RunConfig {
    pub fn new() -> Self {
        RunConfig::default()
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    pub fn endpoint_mut(&mut self) -> &mut EndpointConfig {
        &mut self.endpoint
    }

    pub fn set_listen_address(&mut self, addr: IpAddr) {
        self.endpoint.listen_addr = addr;
    }

    pub fn set_listen_port(&mut self, port: i64) -> Result<(), ConfigError> {
        self.endpoint.listen_port =
            u16::try_from(port).map_err(|_| ConfigError::InvalidPort(port))?;
        Ok(())
    }

    /// Wait for application data after the handshake, in milliseconds
    pub fn set_wait_data_timeout(&mut self, millis: i64) -> Result<(), ConfigError> {
        let millis = u64::try_from(millis).map_err(|_| ConfigError::NegativeTimeout(millis))?;
        self.endpoint.wait_data_timeout = Duration::from_millis(millis);
        Ok(())
    }

    pub fn set_forward_addr(&mut self, addr: &str) -> Result<(), ConfigError> {
        let resolved = addr
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "forward address",
                value: addr.to_string(),
            })?;
        self.endpoint.forward = Some(resolved);
        Ok(())
    }

    pub fn set_starttls(&mut self, proto: &str) -> Result<(), ConfigError> {
        self.endpoint.starttls = proto.parse()?;
        Ok(())
    }

    pub fn set_user_cn(&mut self, cn: impl Into<String>) {
        let cn = cn.into();
        self.user_cn = if cn.is_empty() { None } else { Some(cn) };
    }

    pub fn user_cn(&self) -> Option<&str> {
        self.user_cn.as_deref()
    }

    /// Common name for synthesized certificates: the user's choice, then the
    /// captured server's leaf, then `www.example.com`
    pub fn target_common_name(&self) -> String {
        self.user_cn
            .clone()
            .or_else(|| self.server.as_ref().and_then(PeerChain::leaf_subject))
            .unwrap_or_else(|| DEFAULT_COMMON_NAME.to_string())
    }

    /// Connect to `addr` (`host[:port]`, port 443 by default) and keep the
    /// certificate chain it presents.
    ///
    /// Network, handshake and input failures all surface as one
    /// `PeerCapture` error.
    pub fn set_server_addr(&mut self, addr: &str) -> Result<(), ConfigError> {
        match capture_peer_chain(addr) {
            Some(certs) => {
                tracing::info!(server = addr, chain_len = certs.len(), "captured server chain");
                self.server = Some(PeerChain {
                    target: addr.to_string(),
                    certs,
                });
                Ok(())
            }
            None => {
                tracing::warn!(server = addr, "failed to connect to server");
                Err(ConfigError::PeerCapture(addr.to_string()))
            }
        }
    }

    pub fn server(&self) -> Option<&PeerChain> {
        self.server.as_ref()
    }

    pub fn set_user_cert_path(&mut self, path: impl Into<PathBuf>) -> Result<(), ConfigError> {
        let path = path.into();
        forge::load(&path)?;
        self.user_cert_path = Some(path);
        Ok(())
    }

    pub fn set_user_key_path(&mut self, path: impl Into<PathBuf>) -> Result<(), ConfigError> {
        let path = path.into();
        forge::load_key(&path)?;
        self.user_key_path = Some(path);
        Ok(())
    }

    pub fn set_user_ca_cert_path(&mut self, path: impl Into<PathBuf>) -> Result<(), ConfigError> {
        let path = path.into();
        forge::load(&path)?;
        self.user_ca_cert_path = Some(path);
        Ok(())
    }

    pub fn set_user_ca_key_path(&mut self, path: impl Into<PathBuf>) -> Result<(), ConfigError> {
        let path = path.into();
        forge::load_key(&path)?;
        self.user_ca_key_path = Some(path);
        Ok(())
    }

    pub fn user_cert_path(&self) -> Option<&Path> {
        self.user_cert_path.as_deref()
    }

    /// User certificate paired with the user key.
    ///
    /// `Ok(None)` when no certificate was configured. The files are read
    /// again on every call.
    pub fn user_credential(&self) -> Result<Option<CredentialBundle>, CredentialError> {
        load_pair(self.user_cert_path.as_deref(), self.user_key_path.as_deref())
    }

    /// User CA certificate paired with the user CA key
    pub fn user_ca_credential(&self) -> Result<Option<CredentialBundle>, CredentialError> {
        load_pair(
            self.user_ca_cert_path.as_deref(),
            self.user_ca_key_path.as_deref(),
        )
    }

    pub fn set_loop_tests(&mut self, enabled: bool) {
        self.loop_tests = enabled;
    }

    pub fn loop_tests(&self) -> bool {
        self.loop_tests
    }

    /// Restrict the run to these scenario ids; empty runs every scenario
    pub fn set_selected_tests(&mut self, ids: Vec<u32>) {
        self.selected_tests = ids;
    }

    pub fn selected_tests(&self) -> &[u32] {
        &self.selected_tests
    }

    /// Report destination; must be (or become) a writable regular file
    pub fn set_output_report(&mut self, path: impl Into<PathBuf>) -> Result<(), ConfigError> {
        let path = path.into();
        check_writable(&path)?;
        self.output_report = Some(path);
        Ok(())
    }

    pub fn output_report(&self) -> Option<&Path> {
        self.output_report.as_deref()
    }
}

fn load_pair(
    cert: Option<&Path>,
    key: Option<&Path>,
) -> Result<Option<CredentialBundle>, CredentialError> {
    let Some(cert) = cert else {
        return Ok(None);
    };
    let bundle = forge::load(cert)?;
    let bundle = match key {
        Some(key) => bundle.with_key(forge::load_key(key)?),
        None => bundle,
    };
    Ok(Some(bundle))
}

fn check_writable(path: &Path) -> Result<(), ConfigError> {
    let not_writable = || ConfigError::NotWritable(path.to_path_buf());

    match fs::metadata(path) {
        Ok(meta) => {
            if !meta.is_file() || meta.permissions().readonly() {
                return Err(not_writable());
            }
            OpenOptions::new()
                .append(true)
                .open(path)
                .map_err(|_| not_writable())?;
        }
        Err(_) => {
            // Probe by creating the file, then remove it again
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .map_err(|_| not_writable())?;
            let _ = fs::remove_file(path);
        }
    }
    Ok(())
}

fn split_target(addr: &str) -> Option<(String, u16)> {
    let addr = addr
        .trim()
        .trim_start_matches("https://")
        .trim_end_matches('/');
    if addr.is_empty() {
        return None;
    }

    if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = match tail.strip_prefix(':') {
            Some(port) => port.parse().ok()?,
            None if tail.is_empty() => 443,
            None => return None,
        };
        return Some((host.to_string(), port));
    }

    match addr.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => Some((host.to_string(), port.parse().ok()?)),
        Some(_) => Some((addr.to_string(), 443)),
        None => Some((addr.to_string(), 443)),
    }
}

fn capture_peer_chain(addr: &str) -> Option<Vec<X509>> {
    let (host, port) = split_target(addr)?;
    let sockaddr = (host.as_str(), port).to_socket_addrs().ok()?.next()?;

    let client = ClientConfig::builder()
        .servername(host.clone())
        .build()
        .ok()?;

    let tcp = TcpStream::connect_timeout(&sockaddr, PEER_CAPTURE_TIMEOUT).ok()?;
    tcp.set_read_timeout(Some(PEER_CAPTURE_TIMEOUT)).ok()?;
    tcp.set_write_timeout(Some(PEER_CAPTURE_TIMEOUT)).ok()?;

    let mut tls = client.connect(tcp).ok()?;

    let certs: Vec<X509> = match tls.ssl().peer_cert_chain() {
        Some(chain) => chain.iter().map(|cert| cert.to_owned()).collect(),
        None => tls.ssl().peer_certificate().into_iter().collect(),
    };
    let _ = tls.shutdown();

    if certs.is_empty() {
        None
    } else {
        Some(certs)
    }
}
