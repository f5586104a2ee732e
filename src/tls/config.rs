//! TLS configuration
//!
//! This module provides configuration builders for the probe (server) side
//! and for the client side used by harnesses and peer-certificate capture.
//! The probe side deliberately runs at OpenSSL security level 0 so that
//! legacy protocol versions and weak cipher suites can actually be offered.

use super::ciphers::CipherSet;
use crate::forge::CredentialBundle;
use openssl::ssl::{SslContext, SslContextBuilder, SslMethod, SslVerifyMode, SslVersion};
use openssl::x509::X509;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TlsVersion {
    /// SSL 2.0 (not implemented by any supported OpenSSL)
    Ssl2,
    /// SSL 3.0 (deprecated, usually compiled out)
    Ssl3,
    /// TLS 1.0
    Tls10,
    /// TLS 1.1
    Tls11,
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl FromStr for TlsVersion {
    type Err = TlsError;

    /// Parse TLS version from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self, TlsError> {
        match s.to_uppercase().as_str() {
            "SSLV2" | "SSL2" => Ok(TlsVersion::Ssl2),
            "SSLV3" | "SSL3" => Ok(TlsVersion::Ssl3),
            "TLSV1.0" | "TLS1.0" | "TLSV1" | "TLS1" => Ok(TlsVersion::Tls10),
            "TLSV1.1" | "TLS1.1" => Ok(TlsVersion::Tls11),
            "TLSV1.2" | "TLS1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsVersion::Tls13),
            _ => Err(TlsError::InvalidVersion(s.to_string())),
        }
    }
}

impl TlsVersion {
    /// OpenSSL protocol version constant, if OpenSSL can speak it
    pub fn to_openssl_version(self) -> Option<SslVersion> {
        match self {
            TlsVersion::Ssl2 => None,
            TlsVersion::Ssl3 => Some(SslVersion::SSL3),
            TlsVersion::Tls10 => Some(SslVersion::TLS1),
            TlsVersion::Tls11 => Some(SslVersion::TLS1_1),
            TlsVersion::Tls12 => Some(SslVersion::TLS1_2),
            TlsVersion::Tls13 => Some(SslVersion::TLS1_3),
        }
    }

    /// Get version as string
    pub fn as_str(self) -> &'static str {
        match self {
            TlsVersion::Ssl2 => "SSLv2",
            TlsVersion::Ssl3 => "SSLv3",
            TlsVersion::Tls10 => "TLSv1.0",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol version constraint. `None` bounds are left to OpenSSL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProtocolRange {
    pub min: Option<TlsVersion>,
    pub max: Option<TlsVersion>,
}

impl ProtocolRange {
    pub fn any() -> Self {
        ProtocolRange::default()
    }

    pub fn exactly(version: TlsVersion) -> Self {
        ProtocolRange {
            min: Some(version),
            max: Some(version),
        }
    }

    pub fn at_least(version: TlsVersion) -> Self {
        ProtocolRange {
            min: Some(version),
            max: None,
        }
    }

    pub fn at_most(version: TlsVersion) -> Self {
        ProtocolRange {
            min: None,
            max: Some(version),
        }
    }

    pub fn contains(&self, version: TlsVersion) -> bool {
        self.min.map_or(true, |min| version >= min) && self.max.map_or(true, |max| version <= max)
    }

    fn apply(&self, ctx: &mut SslContextBuilder) -> Result<(), TlsError> {
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(TlsError::InvalidConfig(format!(
                    "empty protocol range {}..{}",
                    min, max
                )));
            }
        }
        ctx.set_min_proto_version(self.min.map(openssl_version).transpose()?)?;
        ctx.set_max_proto_version(self.max.map(openssl_version).transpose()?)?;
        Ok(())
    }
}

impl fmt::Display for ProtocolRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.min, self.max) {
            (Some(min), Some(max)) if min == max => write!(f, "{} exactly", min),
            (Some(min), Some(max)) => write!(f, "{} to {}", min, max),
            (Some(min), None) => write!(f, "{} or above", min),
            (None, Some(max)) => write!(f, "{} or below", max),
            (None, None) => f.write_str("any version"),
        }
    }
}

fn openssl_version(version: TlsVersion) -> Result<SslVersion, TlsError> {
    version
        .to_openssl_version()
        .ok_or(TlsError::UnsupportedVersion(version))
}

/// Client certificate verification mode (server-side)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientVerify {
    /// Don't request client certificates
    #[default]
    None,
    /// Request a client certificate but accept whatever arrives
    Request,
    /// Require a client certificate that verifies against the trust anchors
    Require,
}

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TLS version: {0}")]
    InvalidVersion(String),

    #[error("{0} is not supported by the linked OpenSSL")]
    UnsupportedVersion(TlsVersion),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
}

/// Probe (server side) TLS configuration, immutable after building
#[derive(Clone)]
pub struct ProbeTlsConfig {
    pub(crate) ctx: SslContext,
    pub(crate) protocols: ProtocolRange,
    pub(crate) ciphers: Option<CipherSet>,
    pub(crate) credential: Arc<CredentialBundle>,
    pub(crate) client_verify: ClientVerify,
}

impl ProbeTlsConfig {
    /// Create a probe configuration builder presenting `credential`
    pub fn builder(credential: Arc<CredentialBundle>) -> ProbeConfigBuilder {
        ProbeConfigBuilder {
            credential,
            protocols: ProtocolRange::any(),
            ciphers: None,
            client_verify: ClientVerify::None,
            trust: Vec::new(),
        }
    }

    pub fn protocols(&self) -> ProtocolRange {
        self.protocols
    }

    pub fn ciphers(&self) -> Option<&CipherSet> {
        self.ciphers.as_ref()
    }

    pub fn credential(&self) -> &Arc<CredentialBundle> {
        &self.credential
    }

    pub fn client_verify(&self) -> ClientVerify {
        self.client_verify
    }
}

/// Probe configuration builder
pub struct ProbeConfigBuilder {
    credential: Arc<CredentialBundle>,
    protocols: ProtocolRange,
    ciphers: Option<CipherSet>,
    client_verify: ClientVerify,
    trust: Vec<X509>,
}

impl ProbeConfigBuilder {
    pub fn protocols(mut self, range: ProtocolRange) -> Self {
        self.protocols = range;
        self
    }

    /// Restrict the offered cipher suites (TLS <= 1.2)
    pub fn ciphers(mut self, ciphers: CipherSet) -> Self {
        self.ciphers = Some(ciphers);
        self
    }

    pub fn client_verify(mut self, mode: ClientVerify) -> Self {
        self.client_verify = mode;
        self
    }

    /// Trust anchor for client certificate verification
    pub fn trust(mut self, cert: X509) -> Self {
        self.trust.push(cert);
        self
    }

    /// Build the probe configuration
    pub fn build(self) -> Result<ProbeTlsConfig, TlsError> {
        let mut ctx = SslContextBuilder::new(SslMethod::tls_server())?;
        ctx.set_security_level(0);

        self.protocols.apply(&mut ctx)?;

        if let Some(ciphers) = &self.ciphers {
            ctx.set_cipher_list(&ciphers.to_openssl_list())?;
        }

        let key = self.credential.key().ok_or_else(|| {
            TlsError::Certificate(format!(
                "credential for {} has no private key",
                self.credential.subject()
            ))
        })?;
        ctx.set_certificate(self.credential.leaf())?;
        for cert in &self.credential.chain()[1..] {
            ctx.add_extra_chain_cert(cert.clone())?;
        }
        ctx.set_private_key(key).map_err(|e| {
            TlsError::Certificate(format!("private key does not match certificate: {}", e))
        })?;
        ctx.check_private_key().map_err(|e| {
            TlsError::Certificate(format!("private key does not match certificate: {}", e))
        })?;

        for cert in &self.trust {
            ctx.cert_store_mut().add_cert(cert.clone())?;
        }

        match self.client_verify {
            ClientVerify::None => ctx.set_verify(SslVerifyMode::NONE),
            // Ask for a certificate, keep the handshake going whatever it is
            ClientVerify::Request => ctx.set_verify_callback(SslVerifyMode::PEER, |_, _| true),
            ClientVerify::Require => {
                ctx.set_verify(SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT)
            }
        }

        Ok(ProbeTlsConfig {
            ctx: ctx.build(),
            protocols: self.protocols,
            ciphers: self.ciphers,
            credential: self.credential,
            client_verify: self.client_verify,
        })
    }
}

/// Client side TLS configuration
#[derive(Clone)]
pub struct ClientConfig {
    pub(crate) ctx: SslContext,
    pub(crate) servername: Option<String>,
}

impl ClientConfig {
    /// Create a new client configuration builder
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder {
            protocols: ProtocolRange::any(),
            cipher_list: None,
            servername: None,
            verify_peer: false,
            trust: Vec::new(),
            certificate: None,
            security_level: None,
        }
    }

    /// Connect to a server with TLS
    pub fn connect(
        &self,
        stream: std::net::TcpStream,
    ) -> Result<openssl::ssl::SslStream<std::net::TcpStream>, TlsError> {
        let mut ssl = openssl::ssl::Ssl::new(&self.ctx)?;

        if let Some(ref servername) = self.servername {
            ssl.set_hostname(servername)?;
        }

        ssl.connect(stream)
            .map_err(|e| TlsError::HandshakeFailed(format!("Connection failed: {}", e)))
    }
}

/// Client configuration builder
pub struct ClientConfigBuilder {
    protocols: ProtocolRange,
    cipher_list: Option<String>,
    servername: Option<String>,
    verify_peer: bool,
    trust: Vec<X509>,
    certificate: Option<Arc<CredentialBundle>>,
    security_level: Option<u32>,
}

impl ClientConfigBuilder {
    /// Set TLS version (both min and max)
    pub fn version(mut self, version: TlsVersion) -> Self {
        self.protocols = ProtocolRange::exactly(version);
        self
    }

    pub fn protocols(mut self, range: ProtocolRange) -> Self {
        self.protocols = range;
        self
    }

    /// Set cipher list (for TLS <= 1.2)
    pub fn cipher_list(mut self, ciphers: impl Into<String>) -> Self {
        self.cipher_list = Some(ciphers.into());
        self
    }

    /// Set SNI servername
    pub fn servername(mut self, name: impl Into<String>) -> Self {
        self.servername = Some(name.into());
        self
    }

    /// Enable/disable peer certificate verification
    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.verify_peer = verify;
        self
    }

    /// Add a trusted root for peer verification
    pub fn trust(mut self, cert: X509) -> Self {
        self.trust.push(cert);
        self
    }

    /// Present `credential` when the server asks for a client certificate
    pub fn certificate(mut self, credential: Arc<CredentialBundle>) -> Self {
        self.certificate = Some(credential);
        self
    }

    /// Override the OpenSSL security level (0 permits legacy parameters)
    pub fn security_level(mut self, level: u32) -> Self {
        self.security_level = Some(level);
        self
    }

    /// Build the TLS configuration
    pub fn build(self) -> Result<ClientConfig, TlsError> {
        let mut ctx = SslContextBuilder::new(SslMethod::tls_client())?;

        if let Some(level) = self.security_level {
            ctx.set_security_level(level);
        }
        self.protocols.apply(&mut ctx)?;

        if let Some(ciphers) = &self.cipher_list {
            ctx.set_cipher_list(ciphers)?;
        }

        for cert in self.trust {
            ctx.cert_store_mut().add_cert(cert)?;
        }

        if let Some(credential) = &self.certificate {
            let key = credential.key().ok_or_else(|| {
                TlsError::Certificate(format!(
                    "client credential for {} has no private key",
                    credential.subject()
                ))
            })?;
            ctx.set_certificate(credential.leaf())?;
            for cert in &credential.chain()[1..] {
                ctx.add_extra_chain_cert(cert.clone())?;
            }
            ctx.set_private_key(key)?;
        }

        ctx.set_verify(if self.verify_peer {
            SslVerifyMode::PEER
        } else {
            SslVerifyMode::NONE
        });

        Ok(ClientConfig {
            ctx: ctx.build(),
            servername: self.servername,
        })
    }
}
