//! Integration tests for certificate evidence and policy verdicts.
//!
//! These tests exercise the path a TLS verifier takes: mint a certificate
//! with one provider, extract its evidence, and judge it with a policy.

use keystead_identity::{
    extract_evidence, AttestationType, CertAndKey, FakeQuotePolicy, FakeQuoteProvider, Policy,
    PolicyError, UserClaims,
};

#[test]
fn test_allow_listed_image_passes() {
    let cert = CertAndKey::generate(&FakeQuoteProvider::new([0x10; 32])).unwrap();
    let policy = FakeQuotePolicy::with_allowed_images([[0x10; 32], [0x11; 32]]);

    let evidence = extract_evidence(cert.cert_der()).unwrap();
    let data = policy.validate(&evidence.quote, &evidence.claims).unwrap();

    assert_eq!(data.attestation_type, AttestationType::Fake);
    assert_eq!(data.image_hash_hex(), "10".repeat(32));
}

#[test]
fn test_foreign_image_rejected() {
    let cert = CertAndKey::generate(&FakeQuoteProvider::new([0x20; 32])).unwrap();
    let policy = FakeQuotePolicy::with_allowed_images([[0x10; 32]]);

    let evidence = extract_evidence(cert.cert_der()).unwrap();
    assert_eq!(
        policy.validate(&evidence.quote, &evidence.claims),
        Err(PolicyError::ImageNotAllowed {
            image_hash: "20".repeat(32)
        })
    );
}

#[test]
fn test_quote_transplanted_onto_other_key_rejected() {
    let cert = CertAndKey::generate(&FakeQuoteProvider::new([0x10; 32])).unwrap();
    let evidence = extract_evidence(cert.cert_der()).unwrap();

    let attacker = UserClaims::new([0xEE; 32]);
    assert_eq!(
        FakeQuotePolicy::new().validate(&evidence.quote, &attacker),
        Err(PolicyError::ClaimsMismatch)
    );
}
