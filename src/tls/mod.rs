//! TLS support for the probe transport
//!
//! This module wraps OpenSSL for the server side of a probe connection and
//! for the client side used by harnesses and peer-certificate capture.
//!
//! # Architecture
//!
//! 1. `ProbeTlsConfig` defines what the probe offers (versions, ciphers,
//!    credential, client verification)
//! 2. `handshake::accept` runs one server handshake and reports how it ended
//! 3. `CipherSet` turns a cipher class into names the linked OpenSSL knows
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use tlsaudit::forge::{self, CertSpec};
//! use tlsaudit::tls::{CipherClass, ProbeTlsConfig, ProtocolRange, TlsVersion};
//!
//! let credential = Arc::new(forge::synthesize(&CertSpec::new("www.example.com")).unwrap());
//! let config = ProbeTlsConfig::builder(credential)
//!     .protocols(ProtocolRange::exactly(TlsVersion::Tls12))
//!     .ciphers(CipherClass::Medium.cipher_set().unwrap())
//!     .build()
//!     .unwrap();
//! ```

pub mod cert;
pub mod ciphers;
pub mod config;
pub mod handshake;
pub mod summary;

pub use cert::CertInfo;
pub use ciphers::{CipherClass, CipherSet};
pub use config::{
    ClientConfig, ClientConfigBuilder, ClientVerify, ProbeConfigBuilder, ProbeTlsConfig,
    ProtocolRange, TlsError, TlsVersion,
};
pub use handshake::{HandshakeFailure, HandshakeOutcome};
pub use summary::HandshakeSummary;

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;
