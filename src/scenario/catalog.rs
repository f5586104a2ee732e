//! The fixed catalog of test cases
//!
//! Two families cover everything: certificate trust tests present a
//! credential the client should refuse, protocol tests offer a protocol
//! version and cipher class the client should refuse.

use super::{CredentialOrigin, ProbeSetup, ResultCode, Scenario, SetupError};
use crate::config::{RunConfig, DEFAULT_COMMON_NAME};
use crate::forge::{self, CertSpec, CredentialBundle, Defect, Signer, Validity};
use crate::tls::{CipherClass, CipherSet, ProbeTlsConfig, ProtocolRange, TlsVersion};
use crate::transport::{Observation, Wait};
use std::sync::Arc;

/// Common name a synthesized certificate claims
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    /// The user's common name or the captured server's
    Target,
    /// A name unrelated to the target
    ExampleCom,
}

impl Subject {
    fn common_name(self, config: &RunConfig) -> String {
        match self {
            Subject::Target => config.target_common_name(),
            Subject::ExampleCom => DEFAULT_COMMON_NAME.to_string(),
        }
    }
}

/// Credential a certificate trust test presents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertSource {
    /// The user's certificate and key as they are
    User,
    SelfSigned(Subject),
    /// Issued by the user's (end-entity) certificate
    SignedByUser(Subject),
    SignedByUserCa(Subject),
    Expired,
    NotYetValid,
    /// Self-signed for the target, carrying a forge defect
    Defective(Defect),
}

/// Presents a certificate the client should not trust
pub struct CertificateTrustTest {
    id: u32,
    name: &'static str,
    description: &'static str,
    source: CertSource,
}

impl CertificateTrustTest {
    pub fn new(id: u32, name: &'static str, description: &'static str, source: CertSource) -> Self {
        CertificateTrustTest {
            id,
            name,
            description,
            source,
        }
    }

    pub fn source(&self) -> CertSource {
        self.source
    }

    fn credential(
        &self,
        config: &RunConfig,
    ) -> Result<(CredentialBundle, CredentialOrigin), SetupError> {
        let target = || Subject::Target.common_name(config);

        let bundle = match self.source {
            CertSource::User => {
                return Ok((user_credential(config)?, CredentialOrigin::UserSupplied));
            }
            CertSource::SelfSigned(subject) => {
                forge::synthesize(&CertSpec::new(subject.common_name(config)))?
            }
            CertSource::SignedByUser(subject) => {
                let issuer = user_credential(config)?;
                forge::synthesize(
                    &CertSpec::new(subject.common_name(config)).signed_by(Signer::from(issuer)),
                )?
            }
            CertSource::SignedByUserCa(subject) => {
                let issuer = config
                    .user_ca_credential()?
                    .ok_or(SetupError::MissingCredential("user CA certificate"))?;
                if issuer.key().is_none() {
                    return Err(SetupError::MissingCredential("user CA key"));
                }
                forge::synthesize(
                    &CertSpec::new(subject.common_name(config)).signed_by(Signer::from(issuer)),
                )?
            }
            CertSource::Expired => {
                forge::synthesize(&CertSpec::new(target()).validity(Validity::expired()))?
            }
            CertSource::NotYetValid => {
                forge::synthesize(&CertSpec::new(target()).validity(Validity::not_yet_valid()))?
            }
            CertSource::Defective(Defect::BrokenChain) => {
                let authority = forge::synthesize(&CertSpec::authority("Audit Root CA"))?;
                forge::synthesize(
                    &CertSpec::new(target())
                        .signed_by(Signer::from(authority))
                        .defect(Defect::BrokenChain),
                )?
            }
            CertSource::Defective(defect) => {
                forge::synthesize(&CertSpec::new(target()).defect(defect))?
            }
        };

        Ok((bundle, CredentialOrigin::Synthesized))
    }
}

impl Scenario for CertificateTrustTest {
    fn id(&self) -> u32 {
        self.id
    }

    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn configure(&self, config: &RunConfig) -> Result<ProbeSetup, SetupError> {
        let (bundle, origin) = self.credential(config)?;
        let tls = ProbeTlsConfig::builder(Arc::new(bundle)).build()?;
        Ok(ProbeSetup { tls, origin })
    }

    fn classify(&self, _setup: &ProbeSetup, observation: &Observation) -> ResultCode {
        match observation {
            Observation::NoPeer
            | Observation::UpgradeFailed { .. }
            | Observation::HandshakeTimedOut { .. } => ResultCode::Undefined,
            Observation::HandshakeFailed { .. } => ResultCode::Success,
            Observation::Established { data, .. } => match data {
                Wait::Completed(_) => ResultCode::DataIntercepted,
                Wait::TimedOut | Wait::PeerClosed => ResultCode::CertAccepted,
            },
        }
    }
}

/// Offers one protocol version, optionally restricted to one cipher class
pub struct ProtocolTest {
    id: u32,
    name: &'static str,
    description: &'static str,
    version: TlsVersion,
    cipher_spec: Option<String>,
}

impl ProtocolTest {
    pub fn new(
        id: u32,
        name: &'static str,
        description: &'static str,
        version: TlsVersion,
        ciphers: Option<CipherClass>,
    ) -> Self {
        ProtocolTest {
            id,
            name,
            description,
            version,
            cipher_spec: ciphers.map(|class| class.spec().to_string()),
        }
    }

    /// Replace the cipher class with an explicit colon-delimited list
    pub fn with_cipher_spec(mut self, spec: impl Into<String>) -> Self {
        self.cipher_spec = Some(spec.into());
        self
    }

    pub fn version(&self) -> TlsVersion {
        self.version
    }
}

impl Scenario for ProtocolTest {
    fn id(&self) -> u32 {
        self.id
    }

    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn configure(&self, config: &RunConfig) -> Result<ProbeSetup, SetupError> {
        let ciphers = self
            .cipher_spec
            .as_deref()
            .map(CipherSet::parse)
            .transpose()?;

        let (bundle, origin) = match config.user_credential()? {
            Some(bundle) if bundle.key().is_none() => {
                return Err(SetupError::MissingCredential("user key"))
            }
            Some(bundle) => (bundle, CredentialOrigin::UserSupplied),
            None => (
                forge::synthesize(&CertSpec::new(config.target_common_name()))?,
                CredentialOrigin::Synthesized,
            ),
        };

        let mut builder = ProbeTlsConfig::builder(Arc::new(bundle))
            .protocols(ProtocolRange::exactly(self.version));
        if let Some(ciphers) = ciphers {
            builder = builder.ciphers(ciphers);
        }

        Ok(ProbeSetup {
            tls: builder.build()?,
            origin,
        })
    }

    fn classify(&self, setup: &ProbeSetup, observation: &Observation) -> ResultCode {
        match observation {
            Observation::NoPeer
            | Observation::UpgradeFailed { .. }
            | Observation::HandshakeTimedOut { .. } => ResultCode::Undefined,
            // Refusing the certificate after agreeing on protocol and cipher
            // still means the weak parameters were acceptable
            Observation::HandshakeFailed { failure, .. } => {
                if failure.negotiated {
                    ResultCode::ProtoAccepted
                } else {
                    ResultCode::Success
                }
            }
            Observation::Established { .. } => match setup.origin {
                CredentialOrigin::Synthesized => ResultCode::CertAccepted,
                CredentialOrigin::UserSupplied => ResultCode::ProtoAccepted,
            },
        }
    }
}

fn user_credential(config: &RunConfig) -> Result<CredentialBundle, SetupError> {
    let bundle = config
        .user_credential()?
        .ok_or(SetupError::MissingCredential("user certificate"))?;
    if bundle.key().is_none() {
        return Err(SetupError::MissingCredential("user key"));
    }
    Ok(bundle)
}

/// Every scenario, ordered by id
pub fn catalog() -> Vec<Box<dyn Scenario>> {
    use CertSource::*;
    use CipherClass::{Export, Low, Medium};
    use Subject::{ExampleCom, Target};

    let trust = |id: u32,
                 name: &'static str,
                 description: &'static str,
                 source: CertSource|
     -> Box<dyn Scenario> {
        Box::new(CertificateTrustTest::new(id, name, description, source))
    };
    let protocol = |id: u32,
                    name: &'static str,
                    description: &'static str,
                    version: TlsVersion,
                    class: Option<CipherClass>|
     -> Box<dyn Scenario> {
        Box::new(ProtocolTest::new(id, name, description, version, class))
    };

    vec![
        trust(1, "custom certificate trust", "certificate from the user's files", User),
        trust(
            2,
            "self-signed certificate for target domain",
            "self-signed certificate for the target common name",
            SelfSigned(Target),
        ),
        trust(
            3,
            "self-signed certificate for invalid domain",
            "self-signed certificate for www.example.com",
            SelfSigned(ExampleCom),
        ),
        trust(
            4,
            "custom certificate for target domain",
            "target common name signed by the user's certificate",
            SignedByUser(Target),
        ),
        trust(
            5,
            "custom certificate for invalid domain",
            "www.example.com signed by the user's certificate",
            SignedByUser(ExampleCom),
        ),
        trust(
            6,
            "CA-signed certificate for target domain",
            "target common name signed by the user's CA",
            SignedByUserCa(Target),
        ),
        trust(
            7,
            "CA-signed certificate for invalid domain",
            "www.example.com signed by the user's CA",
            SignedByUserCa(ExampleCom),
        ),
        protocol(8, "SSLv2 protocol", "only SSLv2 offered", TlsVersion::Ssl2, None),
        protocol(9, "SSLv3 protocol", "only SSLv3 offered", TlsVersion::Ssl3, None),
        protocol(
            10,
            "SSLv3 EXPORT ciphers",
            "SSLv3 with EXPORT grade ciphers",
            TlsVersion::Ssl3,
            Some(Export),
        ),
        protocol(
            11,
            "SSLv3 LOW ciphers",
            "SSLv3 with LOW grade ciphers",
            TlsVersion::Ssl3,
            Some(Low),
        ),
        protocol(
            12,
            "SSLv3 MEDIUM ciphers",
            "SSLv3 with MEDIUM grade ciphers",
            TlsVersion::Ssl3,
            Some(Medium),
        ),
        protocol(13, "TLS 1.0 protocol", "only TLS 1.0 offered", TlsVersion::Tls10, None),
        protocol(
            14,
            "TLS 1.0 EXPORT ciphers",
            "TLS 1.0 with EXPORT grade ciphers",
            TlsVersion::Tls10,
            Some(Export),
        ),
        protocol(
            15,
            "TLS 1.0 LOW ciphers",
            "TLS 1.0 with LOW grade ciphers",
            TlsVersion::Tls10,
            Some(Low),
        ),
        protocol(
            16,
            "TLS 1.0 MEDIUM ciphers",
            "TLS 1.0 with MEDIUM grade ciphers",
            TlsVersion::Tls10,
            Some(Medium),
        ),
        protocol(
            17,
            "TLS 1.1 EXPORT ciphers",
            "TLS 1.1 with EXPORT grade ciphers",
            TlsVersion::Tls11,
            Some(Export),
        ),
        protocol(
            18,
            "TLS 1.1 LOW ciphers",
            "TLS 1.1 with LOW grade ciphers",
            TlsVersion::Tls11,
            Some(Low),
        ),
        protocol(
            19,
            "TLS 1.1 MEDIUM ciphers",
            "TLS 1.1 with MEDIUM grade ciphers",
            TlsVersion::Tls11,
            Some(Medium),
        ),
        protocol(
            20,
            "TLS 1.2 EXPORT ciphers",
            "TLS 1.2 with EXPORT grade ciphers",
            TlsVersion::Tls12,
            Some(Export),
        ),
        protocol(
            21,
            "TLS 1.2 LOW ciphers",
            "TLS 1.2 with LOW grade ciphers",
            TlsVersion::Tls12,
            Some(Low),
        ),
        protocol(
            22,
            "TLS 1.2 MEDIUM ciphers",
            "TLS 1.2 with MEDIUM grade ciphers",
            TlsVersion::Tls12,
            Some(Medium),
        ),
        trust(23, "expired certificate", "self-signed certificate whose validity ended", Expired),
        trust(
            24,
            "not yet valid certificate",
            "self-signed certificate whose validity has not begun",
            NotYetValid,
        ),
        trust(
            25,
            "wrong key usage",
            "certificate limited to CA and client authentication usage",
            Defective(Defect::WrongKeyUsage),
        ),
        trust(
            26,
            "broken chain",
            "leaf shipped with an unrelated CA instead of its issuer",
            Defective(Defect::BrokenChain),
        ),
    ]
}

/// Look up one scenario by id
pub fn find(id: u32) -> Option<Box<dyn Scenario>> {
    catalog().into_iter().find(|scenario| scenario.id() == id)
}
