//! Scenario engine
//!
//! A scenario installs one probe configuration, waits for one client, and
//! maps what the transport observed to a [`ResultCode`] through a fixed
//! decision table. Scenarios are stateless; every execution configures from
//! scratch and produces exactly one result.

pub mod catalog;
pub mod runner;

pub use catalog::{catalog, find, CertificateTrustTest, CertSource, ProtocolTest, Subject};
pub use runner::{run_scenario, spawn_scenario, ScenarioHandle};

use crate::config::{ConfigError, RunConfig};
use crate::forge::CredentialError;
use crate::tls::{ProbeTlsConfig, TlsError};
use crate::transport::{Observation, TransportError};
use serde::Serialize;
use std::fmt;

/// Outcome of one scenario execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    /// The client behaved correctly (refused what it should refuse)
    Success,
    /// The client completed a handshake with weak protocol parameters
    ProtoAccepted,
    /// The client completed a handshake with an untrusted certificate
    CertAccepted,
    /// The client sent application data over an untrusted channel
    DataIntercepted,
    /// The scenario could not be set up
    NotReady,
    /// Nothing conclusive happened in time
    Undefined,
}

impl ResultCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultCode::Success => "SUCCESS",
            ResultCode::ProtoAccepted => "PROTO_ACCEPTED",
            ResultCode::CertAccepted => "CERT_ACCEPTED",
            ResultCode::DataIntercepted => "DATA_INTERCEPTED",
            ResultCode::NotReady => "NOT_READY",
            ResultCode::Undefined => "UNDEFINED",
        }
    }

    /// The client did something it should not have
    pub fn is_finding(self) -> bool {
        match self {
            ResultCode::ProtoAccepted | ResultCode::CertAccepted | ResultCode::DataIntercepted => {
                true
            }
            ResultCode::Success | ResultCode::NotReady | ResultCode::Undefined => false,
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the presented credential came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialOrigin {
    /// Manufactured for this execution; no client has reason to trust it
    Synthesized,
    /// Loaded from the user's certificate files
    UserSupplied,
}

/// Everything a scenario installs on the transport
#[derive(Clone)]
pub struct ProbeSetup {
    pub tls: ProbeTlsConfig,
    pub origin: CredentialOrigin,
}

/// Reasons a scenario cannot run
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("no {0} configured")]
    MissingCredential(&'static str),
}

/// One test case
pub trait Scenario: Send + Sync {
    fn id(&self) -> u32;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Build the probe configuration for one execution.
    ///
    /// Must not touch the network.
    fn configure(&self, config: &RunConfig) -> Result<ProbeSetup, SetupError>;

    /// Map an observation to a result code
    fn classify(&self, setup: &ProbeSetup, observation: &Observation) -> ResultCode;
}
