//! Credential forge
//!
//! This module manufactures the certificates and private keys that probe
//! scenarios present to a connecting client. Credentials can be loaded from
//! PEM files or synthesized on demand, optionally with deliberate defects
//! (wrong key usage, broken chain, foreign signature, damaged encoding).
//!
//! # Examples
//!
//! ```no_run
//! use tlsaudit::forge::{self, CertSpec, Validity};
//!
//! let ca = forge::synthesize(&CertSpec::authority("Probe Root CA")).unwrap();
//! let leaf = forge::synthesize(
//!     &CertSpec::new("www.example.com")
//!         .validity(Validity::expired())
//!         .signed_by(ca.into()),
//! )
//! .unwrap();
//! assert_eq!(leaf.chain().len(), 2);
//! ```

pub mod pem;
pub mod synth;

pub use pem::{load, load_key};
pub use synth::synthesize;

use openssl::asn1::Asn1Time;
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use std::cmp::Ordering;
use std::sync::Arc;

/// Result type for credential operations
pub type Result<T> = std::result::Result<T, CredentialError>;

/// Credential loading and synthesis errors
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificate found in {0}")]
    EmptyChain(String),

    #[error("failed to parse private key from {0}")]
    InvalidKey(String),

    #[error("signer has no private key: {0}")]
    SignerWithoutKey(String),

    #[error("invalid validity window: {0}")]
    InvalidValidity(String),
}

/// Key algorithm and size for synthesized credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySpec {
    /// RSA with the given modulus size in bits
    Rsa(u32),
    /// ECDSA over NIST P-256
    EcP256,
}

impl Default for KeySpec {
    fn default() -> Self {
        KeySpec::Rsa(2048)
    }
}

/// Certificate validity window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    /// Valid from now for the given number of days
    DaysFromNow(u32),
    /// Explicit bounds as unix timestamps (seconds)
    Explicit { not_before: i64, not_after: i64 },
}

impl Validity {
    const DAY: i64 = 86_400;

    /// A window that ended yesterday
    pub fn expired() -> Self {
        let now = unix_now();
        Validity::Explicit {
            not_before: now - 365 * Self::DAY,
            not_after: now - Self::DAY,
        }
    }

    /// A window that starts a month from now
    pub fn not_yet_valid() -> Self {
        let now = unix_now();
        Validity::Explicit {
            not_before: now + 30 * Self::DAY,
            not_after: now + 395 * Self::DAY,
        }
    }

    pub(crate) fn to_asn1(self) -> Result<(Asn1Time, Asn1Time)> {
        match self {
            Validity::DaysFromNow(days) => {
                Ok((Asn1Time::days_from_now(0)?, Asn1Time::days_from_now(days)?))
            }
            Validity::Explicit {
                not_before,
                not_after,
            } => {
                if not_after <= not_before {
                    return Err(CredentialError::InvalidValidity(format!(
                        "not_after ({}) must be later than not_before ({})",
                        not_after, not_before
                    )));
                }
                Ok((Asn1Time::from_unix(not_before)?, Asn1Time::from_unix(not_after)?))
            }
        }
    }
}

impl Default for Validity {
    fn default() -> Self {
        Validity::DaysFromNow(365)
    }
}

/// Deliberate defects a synthesized credential can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Defect {
    /// The bundled private key does not belong to the leaf
    MismatchedKey,
    /// Leaf key usage allows only certificate signing, EKU is clientAuth
    WrongKeyUsage,
    /// Leaf carries no basic constraints, key usage, EKU or SAN
    OmitExtensions,
    /// Chain carries an unrelated CA instead of the issuer
    BrokenChain,
    /// Leaf signature is made with a key that is not the signer's
    ForeignSignature,
    /// Serialized PEM is damaged and does not parse back
    CorruptEncoding,
}

/// Who signs a synthesized certificate
#[derive(Clone)]
pub enum Signer {
    SelfSigned,
    /// A CA bundle; its leaf certificate and key issue the new certificate
    Authority(Arc<CredentialBundle>),
}

impl From<CredentialBundle> for Signer {
    fn from(bundle: CredentialBundle) -> Self {
        Signer::Authority(Arc::new(bundle))
    }
}

impl From<Arc<CredentialBundle>> for Signer {
    fn from(bundle: Arc<CredentialBundle>) -> Self {
        Signer::Authority(bundle)
    }
}

/// Request for a synthesized credential
#[derive(Clone)]
pub struct CertSpec {
    pub common_name: String,
    pub organization: Option<String>,
    pub validity: Validity,
    pub key: KeySpec,
    pub signer: Signer,
    pub is_ca: bool,
    pub defects: Vec<Defect>,
}

impl CertSpec {
    /// Self-signed end-entity certificate for `common_name`
    pub fn new(common_name: impl Into<String>) -> Self {
        CertSpec {
            common_name: common_name.into(),
            organization: None,
            validity: Validity::default(),
            key: KeySpec::default(),
            signer: Signer::SelfSigned,
            is_ca: false,
            defects: Vec::new(),
        }
    }

    /// Self-signed CA certificate
    pub fn authority(common_name: impl Into<String>) -> Self {
        CertSpec {
            is_ca: true,
            ..CertSpec::new(common_name)
        }
    }

    pub fn organization(mut self, org: impl Into<String>) -> Self {
        self.organization = Some(org.into());
        self
    }

    pub fn validity(mut self, validity: Validity) -> Self {
        self.validity = validity;
        self
    }

    pub fn key(mut self, key: KeySpec) -> Self {
        self.key = key;
        self
    }

    pub fn signed_by(mut self, signer: Signer) -> Self {
        self.signer = signer;
        self
    }

    pub fn defect(mut self, defect: Defect) -> Self {
        if !self.defects.contains(&defect) {
            self.defects.push(defect);
        }
        self
    }

    pub fn has_defect(&self, defect: Defect) -> bool {
        self.defects.contains(&defect)
    }
}

/// A certificate chain (leaf first) plus an optional private key
#[derive(Clone)]
pub struct CredentialBundle {
    chain: Vec<X509>,
    key: Option<PKey<Private>>,
    defects: Vec<Defect>,
}

impl std::fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("subject", &self.subject())
            .field("chain_len", &self.chain.len())
            .field("has_key", &self.key.is_some())
            .field("defects", &self.defects)
            .finish()
    }
}

impl CredentialBundle {
    /// Assemble a bundle from parts. Fails on an empty chain.
    pub fn new(chain: Vec<X509>, key: Option<PKey<Private>>) -> Result<Self> {
        if chain.is_empty() {
            return Err(CredentialError::EmptyChain("<memory>".to_string()));
        }
        Ok(CredentialBundle {
            chain,
            key,
            defects: Vec::new(),
        })
    }

    pub(crate) fn with_defects(mut self, defects: Vec<Defect>) -> Self {
        self.defects = defects;
        self
    }

    /// Replace the private key (for pairing a certificate file with a key file)
    pub fn with_key(mut self, key: PKey<Private>) -> Self {
        self.key = Some(key);
        self
    }

    /// Leaf certificate
    pub fn leaf(&self) -> &X509 {
        &self.chain[0]
    }

    /// Full chain, leaf first
    pub fn chain(&self) -> &[X509] {
        &self.chain
    }

    pub fn key(&self) -> Option<&PKey<Private>> {
        self.key.as_ref()
    }

    pub fn defects(&self) -> &[Defect] {
        &self.defects
    }

    pub fn has_defect(&self, defect: Defect) -> bool {
        self.defects.contains(&defect)
    }

    /// Common name of the leaf
    pub fn subject(&self) -> String {
        crate::tls::CertInfo::from_x509(self.leaf()).subject
    }

    /// Whether the private key belongs to the leaf certificate
    pub fn key_matches_leaf(&self) -> bool {
        let Some(key) = &self.key else {
            return false;
        };
        self.leaf()
            .public_key()
            .map(|public| public.public_eq(key))
            .unwrap_or(false)
    }

    /// Whether each certificate is signed by the next one in the chain.
    /// A single self-signed certificate verifies against itself.
    pub fn verify_chain(&self) -> bool {
        for (i, cert) in self.chain.iter().enumerate() {
            let issuer = self.chain.get(i + 1).unwrap_or(cert);
            let verified = issuer
                .public_key()
                .and_then(|public| cert.verify(&public))
                .unwrap_or(false);
            if !verified {
                return false;
            }
        }
        true
    }

    pub fn is_expired(&self) -> bool {
        compare_now(self.leaf().not_after()) == Some(Ordering::Less)
    }

    pub fn is_not_yet_valid(&self) -> bool {
        compare_now(self.leaf().not_before()) == Some(Ordering::Greater)
    }
}

fn compare_now(time: &openssl::asn1::Asn1TimeRef) -> Option<Ordering> {
    let now = Asn1Time::days_from_now(0).ok()?;
    time.compare(&now).ok()
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defect_builder_dedups() {
        let spec = CertSpec::new("example.com")
            .defect(Defect::WrongKeyUsage)
            .defect(Defect::WrongKeyUsage);
        assert_eq!(spec.defects, vec![Defect::WrongKeyUsage]);
        assert!(spec.has_defect(Defect::WrongKeyUsage));
        assert!(!spec.has_defect(Defect::BrokenChain));
    }

    #[test]
    fn test_validity_windows() {
        let now = unix_now();
        match Validity::expired() {
            Validity::Explicit { not_after, .. } => assert!(not_after < now),
            other => panic!("unexpected window {:?}", other),
        }
        match Validity::not_yet_valid() {
            Validity::Explicit { not_before, .. } => assert!(not_before > now),
            other => panic!("unexpected window {:?}", other),
        }
    }

    #[test]
    fn test_inverted_validity_rejected() {
        let window = Validity::Explicit {
            not_before: 2_000_000_000,
            not_after: 1_000_000_000,
        };
        assert!(matches!(
            window.to_asn1(),
            Err(CredentialError::InvalidValidity(_))
        ));
    }

    #[test]
    fn test_empty_bundle_rejected() {
        assert!(matches!(
            CredentialBundle::new(Vec::new(), None),
            Err(CredentialError::EmptyChain(_))
        ));
    }
}
