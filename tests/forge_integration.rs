//! Credential storage integration tests
//!
//! Bundles written by the forge must load back intact, and loading must
//! reject files that carry no usable material.

use std::fs;
use tempfile::TempDir;

use tlsaudit::forge::{self, CertSpec, CredentialError, Defect, KeySpec, Signer};

#[test]
fn test_round_trip_self_signed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("leaf.pem");

    let bundle = forge::synthesize(&CertSpec::new("www.example.com")).unwrap();
    bundle.write(&path).unwrap();

    let loaded = forge::load(&path).unwrap();
    assert_eq!(loaded.chain().len(), bundle.chain().len());
    assert_eq!(loaded.subject(), "www.example.com");
    assert!(loaded.key_matches_leaf());
}

#[test]
fn test_round_trip_authority_chain() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("chain.pem");

    let ca = forge::synthesize(&CertSpec::authority("Audit Test CA")).unwrap();
    let leaf = forge::synthesize(
        &CertSpec::new("mail.example.net")
            .key(KeySpec::EcP256)
            .signed_by(Signer::from(ca)),
    )
    .unwrap();
    leaf.write(&path).unwrap();

    let loaded = forge::load(&path).unwrap();
    assert_eq!(loaded.chain().len(), 2);
    assert!(loaded.key_matches_leaf());
    assert!(loaded.verify_chain());
}

#[test]
fn test_round_trip_keeps_mismatched_key() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mismatch.pem");

    let bundle = forge::synthesize(&CertSpec::new("www.example.com").defect(Defect::MismatchedKey))
        .unwrap();
    bundle.write(&path).unwrap();

    let loaded = forge::load(&path).unwrap();
    assert_eq!(loaded.chain().len(), 1);
    assert!(loaded.key().is_some());
    assert!(!loaded.key_matches_leaf());
}

#[test]
fn test_repeated_loads_are_equivalent() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("leaf.pem");

    forge::synthesize(&CertSpec::new("repeat.example.com"))
        .unwrap()
        .write(&path)
        .unwrap();

    let first = forge::load(&path).unwrap();
    let second = forge::load(&path).unwrap();
    assert_eq!(first.chain().len(), second.chain().len());
    assert_eq!(first.subject(), second.subject());
    assert_eq!(
        first.leaf().to_der().unwrap(),
        second.leaf().to_der().unwrap()
    );
}

#[test]
fn test_corrupt_encoding_does_not_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("corrupt.pem");

    forge::synthesize(&CertSpec::new("www.example.com").defect(Defect::CorruptEncoding))
        .unwrap()
        .write(&path)
        .unwrap();

    assert!(forge::load(&path).is_err());
}

#[test]
fn test_missing_file() {
    let dir = TempDir::new().unwrap();
    match forge::load(dir.path().join("absent.pem")) {
        Err(CredentialError::Io { .. }) => {}
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("loaded a file that does not exist"),
    }
}

#[test]
fn test_file_without_certificates() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.pem");
    fs::write(&path, "not a certificate\n").unwrap();

    assert!(matches!(forge::load(&path), Err(CredentialError::EmptyChain(_))));
}

#[test]
fn test_separate_key_file() {
    let dir = TempDir::new().unwrap();
    let cert_path = dir.path().join("cert.pem");
    let key_path = dir.path().join("key.pem");

    let bundle = forge::synthesize(&CertSpec::new("www.example.com")).unwrap();
    fs::write(&cert_path, bundle.leaf().to_pem().unwrap()).unwrap();
    let key_pem = bundle.key().unwrap().private_key_to_pem_pkcs8().unwrap();
    fs::write(&key_path, key_pem).unwrap();

    let certs_only = forge::load(&cert_path).unwrap();
    assert!(certs_only.key().is_none());

    let key = forge::load_key(&key_path).unwrap();
    assert!(certs_only.with_key(key).key_matches_leaf());

    assert!(matches!(
        forge::load_key(&cert_path),
        Err(CredentialError::InvalidKey(_))
    ));
}
