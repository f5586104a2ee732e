//! Certificate handling and parsing
//!
//! This module extracts printable information from X.509 certificates so
//! observations and reports can name what a peer presented.

use openssl::nid::Nid;
use openssl::ssl::SslRef;
use openssl::x509::{X509NameRef, X509Ref};
use serde::Serialize;

/// Certificate information
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertInfo {
    /// Certificate subject (Common Name)
    pub subject: String,
    /// Certificate issuer (Common Name)
    pub issuer: String,
    /// Subject Alternative Names (DNS names and IP addresses)
    pub subject_alt_names: Vec<String>,
}

impl CertInfo {
    /// Extract certificate information from an X.509 certificate
    pub fn from_x509(cert: &X509Ref) -> Self {
        CertInfo {
            subject: Self::get_cn(cert.subject_name()),
            issuer: Self::get_cn(cert.issuer_name()),
            subject_alt_names: Self::get_subject_alt_names(cert),
        }
    }

    /// Get Common Name from X509_NAME
    fn get_cn(name: &X509NameRef) -> String {
        name.entries_by_nid(Nid::COMMONNAME)
            .next()
            .and_then(|entry| entry.data().as_utf8().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| "<undef>".to_string())
    }

    fn get_subject_alt_names(cert: &X509Ref) -> Vec<String> {
        let mut names = Vec::new();

        if let Some(san_ext) = cert.subject_alt_names() {
            for name in san_ext {
                if let Some(dns) = name.dnsname() {
                    names.push(format!("DNS:{}", dns));
                } else if let Some(ip) = name.ipaddress() {
                    match ip.len() {
                        4 => names.push(format!("IP:{}.{}.{}.{}", ip[0], ip[1], ip[2], ip[3])),
                        16 => {
                            let mut octets = [0u8; 16];
                            octets.copy_from_slice(ip);
                            names.push(format!("IP:{}", std::net::Ipv6Addr::from(octets)));
                        }
                        _ => {}
                    }
                }
            }
        }

        names
    }
}

/// Certificate chain the peer presented, leaf first
pub fn get_cert_chain(ssl: &SslRef) -> Vec<CertInfo> {
    let mut chain = Vec::new();

    if let Some(peer_cert) = ssl.peer_certificate() {
        chain.push(CertInfo::from_x509(&peer_cert));
    }

    // On the server side the stack excludes the leaf; on the client side it
    // includes it, so skip a repeat of the leaf.
    if let Some(cert_chain) = ssl.peer_cert_chain() {
        for cert in cert_chain {
            let info = CertInfo::from_x509(cert);
            if chain.first() != Some(&info) {
                chain.push(info);
            }
        }
    }

    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forge::{synthesize, CertSpec};

    #[test]
    fn test_cert_info_from_synthesized() {
        let bundle = synthesize(&CertSpec::new("example.com").organization("Probe Org")).unwrap();
        let info = CertInfo::from_x509(bundle.leaf());

        assert_eq!(info.subject, "example.com");
        assert_eq!(info.issuer, "example.com"); // Self-signed
        assert_eq!(info.subject_alt_names, vec!["DNS:example.com".to_string()]);
    }

    #[test]
    fn test_get_cn_missing() {
        let name = openssl::x509::X509NameBuilder::new().unwrap().build();
        assert_eq!(CertInfo::get_cn(&name), "<undef>");
    }

    #[test]
    fn test_ipv6_san() {
        let bundle = synthesize(&CertSpec::new("::1")).unwrap();
        let info = CertInfo::from_x509(bundle.leaf());
        assert_eq!(info.subject_alt_names, vec!["IP:::1".to_string()]);
    }
}
