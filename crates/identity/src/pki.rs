//! Self-signed attested certificates.
//!
//! Each endpoint mints a fresh Ed25519 certificate whose private X.509
//! extension carries a [`Quote`] over the certificate key. The peer's
//! verifier extracts the quote and the raw subject public key again with
//! [`extract_evidence`] and hands both to its [`Policy`](crate::Policy).

use rcgen::{CertificateParams, CustomExtension, DistinguishedName, DnType, KeyPair};
use tracing::debug;
use x509_parser::{oid_registry::Oid, prelude::FromDer};

use crate::attestation::{Quote, QuoteProvider, UserClaims};
use crate::error::{IdentityResult, PolicyError};

/// OID of the extension carrying the quote (private enterprise arc).
pub const QUOTE_EXTENSION_OID: &[u64] = &[1, 3, 6, 1, 4, 1, 59124, 1, 1];

/// Subject alternative name the certificates are issued for.
pub const DEFAULT_SERVER_NAME: &str = "127.0.0.1";

/// Certificate, PKCS#8 private key and the claims the quote covers.
#[derive(Clone)]
pub struct CertAndKey {
    cert_der: Vec<u8>,
    key_der: Vec<u8>,
    claims: UserClaims,
}

impl CertAndKey {
    /// Mint a self-signed certificate carrying a quote from `provider`.
    pub fn generate(provider: &dyn QuoteProvider) -> IdentityResult<Self> {
        let key_pair = KeyPair::generate_for(&rcgen::PKCS_ED25519)?;
        let claims = UserClaims::from_raw_public_key(key_pair.public_key_raw())?;
        let quote = provider.quote(&claims)?;

        let mut params = CertificateParams::new(vec![DEFAULT_SERVER_NAME.to_string()])?;
        let mut name = DistinguishedName::new();
        name.push(DnType::CommonName, "keystead attested endpoint");
        params.distinguished_name = name;
        params
            .custom_extensions
            .push(CustomExtension::from_oid_content(
                QUOTE_EXTENSION_OID,
                quote.into_bytes(),
            ));

        let cert = params.self_signed(&key_pair)?;
        debug!(pubkey = %hex::encode(claims.public_key), "Minted attested certificate");

        Ok(Self {
            cert_der: cert.der().to_vec(),
            key_der: key_pair.serialize_der(),
            claims,
        })
    }

    pub fn cert_der(&self) -> &[u8] {
        &self.cert_der
    }

    /// PKCS#8 encoded private key.
    pub fn key_der(&self) -> &[u8] {
        &self.key_der
    }

    pub fn claims(&self) -> &UserClaims {
        &self.claims
    }
}

impl std::fmt::Debug for CertAndKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertAndKey")
            .field("pubkey", &hex::encode(self.claims.public_key))
            .finish_non_exhaustive()
    }
}

/// Evidence recovered from a peer certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEvidence {
    pub quote: Quote,
    pub claims: UserClaims,
}

/// Parse `cert_der` and pull out the quote extension and subject key.
pub fn extract_evidence(cert_der: &[u8]) -> Result<PeerEvidence, PolicyError> {
    let (_, cert) = x509_parser::certificate::X509Certificate::from_der(cert_der)
        .map_err(|e| PolicyError::MissingEvidence(format!("X.509 parse failure: {e}")))?;

    let oid = Oid::from(QUOTE_EXTENSION_OID)
        .map_err(|_| PolicyError::MissingEvidence("invalid quote extension oid".to_string()))?;
    let extension = cert
        .extensions()
        .iter()
        .find(|extension| extension.oid == oid)
        .ok_or_else(|| PolicyError::MissingEvidence("no quote extension".to_string()))?;

    let claims = UserClaims::from_raw_public_key(&cert.public_key().subject_public_key.data)?;

    Ok(PeerEvidence {
        quote: Quote::from_bytes(extension.value.to_vec()),
        claims,
    })
}
