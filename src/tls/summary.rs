//! Negotiated session parameters
//!
//! Populated from a completed (or failed) handshake so classifiers and
//! reports can state what the peer actually agreed to.

use super::cert::{get_cert_chain, CertInfo};
use openssl::ssl::{NameType, SslRef};
use serde::Serialize;

/// Parameters of a completed handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandshakeSummary {
    /// Negotiated protocol version (e.g., "TLSv1.2")
    pub version: String,

    /// Negotiated cipher suite
    pub cipher: String,

    /// SNI servername the client asked for
    pub servername: Option<String>,

    /// Client certificate chain, if one was sent
    pub client_chain: Vec<CertInfo>,
}

impl HandshakeSummary {
    /// Create a summary from an SSL connection
    pub fn from_ssl(ssl: &SslRef) -> Self {
        HandshakeSummary {
            version: ssl.version_str().to_string(),
            cipher: ssl
                .current_cipher()
                .map(|c| c.name().to_string())
                .unwrap_or_else(|| "<undef>".to_string()),
            servername: ssl.servername(NameType::HOST_NAME).map(|s| s.to_string()),
            client_chain: get_cert_chain(ssl),
        }
    }
}

impl Default for HandshakeSummary {
    fn default() -> Self {
        HandshakeSummary {
            version: "<undef>".to_string(),
            cipher: "<undef>".to_string(),
            servername: None,
            client_chain: Vec::new(),
        }
    }
}
