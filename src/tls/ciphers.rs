//! Cipher classes and cipher set parsing
//!
//! Each class is a colon-delimited list of OpenSSL cipher names. Parsing a
//! class keeps only the names the linked OpenSSL recognises, so the same
//! scenario degrades gracefully across builds. An empty result is an error.

use crate::config::ConfigError;
use openssl::ssl::{SslContextBuilder, SslMethod};
use std::fmt;
use std::str::FromStr;

pub const CIPHERS_EXPORT: &str = "EXP-RC4-MD5:EXP-RC2-CBC-MD5:EXP-DES-CBC-SHA:\
EXP-EDH-RSA-DES-CBC-SHA:EXP-EDH-DSS-DES-CBC-SHA:EXP-ADH-DES-CBC-SHA:EXP-ADH-RC4-MD5";

pub const CIPHERS_LOW: &str = "DES-CBC-SHA:EDH-RSA-DES-CBC-SHA:EDH-DSS-DES-CBC-SHA:\
ADH-DES-CBC-SHA:DES-CBC-MD5";

pub const CIPHERS_MEDIUM: &str = "DES-CBC3-SHA:ECDHE-RSA-DES-CBC3-SHA:EDH-RSA-DES-CBC3-SHA:\
ECDHE-ECDSA-DES-CBC3-SHA:SEED-SHA:DHE-RSA-SEED-SHA:IDEA-CBC-SHA:RC4-SHA:RC4-MD5:\
ECDHE-RSA-RC4-SHA:ECDHE-ECDSA-RC4-SHA";

pub const CIPHERS_HIGH: &str = "ECDHE-RSA-AES256-GCM-SHA384:ECDHE-ECDSA-AES256-GCM-SHA384:\
ECDHE-RSA-AES128-GCM-SHA256:ECDHE-ECDSA-AES128-GCM-SHA256:ECDHE-RSA-CHACHA20-POLY1305:\
ECDHE-ECDSA-CHACHA20-POLY1305:DHE-RSA-AES256-GCM-SHA384:DHE-RSA-AES128-GCM-SHA256:\
AES256-GCM-SHA384:AES128-GCM-SHA256:AES256-SHA256:AES128-SHA256:AES256-SHA:AES128-SHA";

/// Cipher strength class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherClass {
    Export,
    Low,
    Medium,
    High,
}

impl CipherClass {
    /// Colon-delimited cipher names of this class
    pub fn spec(self) -> &'static str {
        match self {
            CipherClass::Export => CIPHERS_EXPORT,
            CipherClass::Low => CIPHERS_LOW,
            CipherClass::Medium => CIPHERS_MEDIUM,
            CipherClass::High => CIPHERS_HIGH,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CipherClass::Export => "EXPORT",
            CipherClass::Low => "LOW",
            CipherClass::Medium => "MEDIUM",
            CipherClass::High => "HIGH",
        }
    }

    /// Parse this class into the ciphers the linked OpenSSL supports
    pub fn cipher_set(self) -> Result<CipherSet, ConfigError> {
        CipherSet::parse(self.spec())
    }
}

impl fmt::Display for CipherClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CipherClass {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, ConfigError> {
        match s.to_ascii_uppercase().as_str() {
            "EXPORT" => Ok(CipherClass::Export),
            "LOW" => Ok(CipherClass::Low),
            "MEDIUM" => Ok(CipherClass::Medium),
            "HIGH" => Ok(CipherClass::High),
            _ => Err(ConfigError::InvalidValue {
                field: "cipher class",
                value: s.to_string(),
            }),
        }
    }
}

/// Ordered, de-duplicated, non-empty set of cipher names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherSet {
    names: Vec<String>,
}

impl CipherSet {
    /// Parse a colon-delimited cipher list.
    ///
    /// Names OpenSSL does not recognise are dropped; an empty result is a
    /// configuration error.
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let mut names: Vec<String> = Vec::new();

        for name in spec.split(':').map(str::trim).filter(|n| !n.is_empty()) {
            if names.iter().any(|n| n == name) {
                continue;
            }
            if is_supported(name) {
                names.push(name.to_string());
            } else {
                tracing::trace!(cipher = name, "cipher not supported by OpenSSL, skipped");
            }
        }

        if names.is_empty() {
            return Err(ConfigError::EmptyCipherSet(spec.to_string()));
        }
        Ok(CipherSet { names })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always false for a parsed set; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Cipher list string for `SSL_CTX_set_cipher_list`
    pub fn to_openssl_list(&self) -> String {
        self.names.join(":")
    }
}

fn is_supported(name: &str) -> bool {
    let Ok(mut ctx) = SslContextBuilder::new(SslMethod::tls()) else {
        return false;
    };
    ctx.set_security_level(0);
    ctx.set_cipher_list(name).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_high_class_not_empty() {
        let set = CipherClass::High.cipher_set().unwrap();
        assert!(!set.is_empty());
        assert!(set.contains("AES128-SHA") || set.contains("ECDHE-RSA-AES128-GCM-SHA256"));
    }

    #[test]
    fn test_medium_class_is_never_silently_empty() {
        match CipherClass::Medium.cipher_set() {
            Ok(set) => assert!(!set.is_empty()),
            Err(err) => assert!(matches!(err, ConfigError::EmptyCipherSet(_))),
        }
    }

    #[test]
    fn test_unknown_names_dropped() {
        let set = CipherSet::parse("NOT-A-CIPHER:AES128-SHA:ALSO-BOGUS").unwrap();
        assert_eq!(set.names(), &["AES128-SHA".to_string()]);
    }

    #[test]
    fn test_duplicates_and_blanks_collapsed() {
        let set = CipherSet::parse("AES128-SHA: :AES128-SHA:AES256-SHA:").unwrap();
        assert_eq!(set.to_openssl_list(), "AES128-SHA:AES256-SHA");
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_empty_set_is_error() {
        let result = CipherSet::parse("BOGUS-ONE:BOGUS-TWO");
        assert!(matches!(result, Err(ConfigError::EmptyCipherSet(_))));
        assert!(CipherSet::parse("").is_err());
    }

    #[test]
    fn test_class_from_str() {
        assert_eq!("medium".parse::<CipherClass>().unwrap(), CipherClass::Medium);
        assert_eq!("HIGH".parse::<CipherClass>().unwrap(), CipherClass::High);
        assert!("ultra".parse::<CipherClass>().is_err());
    }
}
