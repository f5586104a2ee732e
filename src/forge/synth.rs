//! Certificate and key synthesis

use super::{CertSpec, CredentialBundle, CredentialError, Defect, KeySpec, Result, Signer};
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
    SubjectKeyIdentifier,
};
use openssl::x509::{X509Builder, X509Name, X509NameBuilder, X509NameRef, X509Ref, X509};
use std::net::IpAddr;

/// Synthesize a credential bundle.
///
/// Key material and the serial number are fresh on every call.
pub fn synthesize(spec: &CertSpec) -> Result<CredentialBundle> {
    let key = generate_key(spec.key)?;
    let name = build_name(spec)?;
    let (not_before, not_after) = spec.validity.to_asn1()?;

    let mut builder = X509Builder::new()?;
    builder.set_version(2)?;
    let serial = fresh_serial()?.to_asn1_integer()?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(&name)?;
    builder.set_pubkey(&key)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;

    let issuer: Option<(&X509Ref, &PKey<Private>)> = match &spec.signer {
        Signer::SelfSigned => None,
        Signer::Authority(ca) => {
            let ca_key = ca
                .key()
                .ok_or_else(|| CredentialError::SignerWithoutKey(ca.subject()))?;
            Some((ca.leaf(), ca_key))
        }
    };

    match issuer {
        Some((ca_cert, _)) => builder.set_issuer_name(ca_cert.subject_name())?,
        None => builder.set_issuer_name(&name)?,
    }

    if !spec.has_defect(Defect::OmitExtensions) {
        append_extensions(&mut builder, spec, issuer.map(|(cert, _)| cert))?;
    }

    let signing_key = if spec.has_defect(Defect::ForeignSignature) {
        generate_key(spec.key)?
    } else {
        match issuer {
            Some((_, ca_key)) => ca_key.clone(),
            None => key.clone(),
        }
    };
    builder.sign(&signing_key, MessageDigest::sha256())?;
    let cert = builder.build();

    let mut chain = vec![cert];
    if let Signer::Authority(ca) = &spec.signer {
        if spec.has_defect(Defect::BrokenChain) {
            chain.push(unrelated_authority(ca.leaf().subject_name())?);
        } else {
            chain.extend(ca.chain().iter().cloned());
        }
    } else if spec.has_defect(Defect::BrokenChain) {
        chain.push(unrelated_authority(&name)?);
    }

    let bundle_key = if spec.has_defect(Defect::MismatchedKey) {
        generate_key(spec.key)?
    } else {
        key
    };

    tracing::debug!(
        cn = %spec.common_name,
        ca = spec.is_ca,
        chain_len = chain.len(),
        defects = ?spec.defects,
        "synthesized credential"
    );

    Ok(CredentialBundle::new(chain, Some(bundle_key))?.with_defects(spec.defects.clone()))
}

fn generate_key(spec: KeySpec) -> Result<PKey<Private>> {
    let key = match spec {
        KeySpec::Rsa(bits) => PKey::from_rsa(Rsa::generate(bits)?)?,
        KeySpec::EcP256 => {
            let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
            PKey::from_ec_key(EcKey::generate(&group)?)?
        }
    };
    Ok(key)
}

fn fresh_serial() -> Result<BigNum> {
    let mut serial = BigNum::new()?;
    serial.rand(159, MsbOption::MAYBE_ZERO, false)?;
    Ok(serial)
}

fn build_name(spec: &CertSpec) -> Result<X509Name> {
    let mut name = X509NameBuilder::new()?;
    if let Some(org) = &spec.organization {
        name.append_entry_by_nid(Nid::ORGANIZATIONNAME, org)?;
    }
    name.append_entry_by_nid(Nid::COMMONNAME, &spec.common_name)?;
    Ok(name.build())
}

fn append_extensions(
    builder: &mut X509Builder,
    spec: &CertSpec,
    issuer: Option<&X509Ref>,
) -> Result<()> {
    if spec.is_ca {
        builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
        builder.append_extension(
            KeyUsage::new()
                .critical()
                .key_cert_sign()
                .crl_sign()
                .digital_signature()
                .build()?,
        )?;
    } else if spec.has_defect(Defect::WrongKeyUsage) {
        builder.append_extension(BasicConstraints::new().build()?)?;
        builder.append_extension(KeyUsage::new().critical().key_cert_sign().crl_sign().build()?)?;
        builder.append_extension(ExtendedKeyUsage::new().client_auth().build()?)?;
    } else {
        builder.append_extension(BasicConstraints::new().build()?)?;
        builder.append_extension(
            KeyUsage::new()
                .critical()
                .digital_signature()
                .key_encipherment()
                .build()?,
        )?;
        builder.append_extension(ExtendedKeyUsage::new().server_auth().client_auth().build()?)?;
    }

    let subject_key_id = SubjectKeyIdentifier::new().build(&builder.x509v3_context(issuer, None))?;
    builder.append_extension(subject_key_id)?;

    if issuer.is_some() {
        let authority_key_id = AuthorityKeyIdentifier::new()
            .keyid(false)
            .issuer(false)
            .build(&builder.x509v3_context(issuer, None))?;
        builder.append_extension(authority_key_id)?;
    }

    if !spec.is_ca {
        let mut san = SubjectAlternativeName::new();
        if spec.common_name.parse::<IpAddr>().is_ok() {
            san.ip(&spec.common_name);
        } else {
            san.dns(&spec.common_name);
        }
        let san = san.build(&builder.x509v3_context(issuer, None))?;
        builder.append_extension(san)?;
    }

    Ok(())
}

/// A throwaway CA that carries the given subject but was never the issuer.
fn unrelated_authority(subject: &X509NameRef) -> Result<X509> {
    let key = generate_key(KeySpec::default())?;
    let (not_before, not_after) = super::Validity::default().to_asn1()?;

    let mut builder = X509Builder::new()?;
    builder.set_version(2)?;
    let serial = fresh_serial()?.to_asn1_integer()?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(subject)?;
    builder.set_issuer_name(subject)?;
    builder.set_pubkey(&key)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;
    builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
    builder.sign(&key, MessageDigest::sha256())?;
    Ok(builder.build())
}
