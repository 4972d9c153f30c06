//! Attestation evidence, policies and verified peer identities.
//!
//! A peer proves what it runs by presenting a [`Quote`] over its
//! [`UserClaims`] (the TLS certificate key). The service never inspects raw
//! evidence itself; an injected [`Policy`] decides whether a quote is
//! acceptable and what [`AttestationData`] it establishes.
//!
//! # Security Properties
//!
//! - The quote is bound to the certificate key through the claims digest,
//!   so evidence cannot be replayed under another TLS key
//! - Policies are invoked exactly once per channel establishment
//! - A rejected quote never yields an [`AttestedPeerInfo`]

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{IdentityError, IdentityResult, PolicyError};

/// Domain separation tag for the claims digest.
const CLAIMS_DIGEST_CONTEXT: &str = "keystead 2024 attestation user claims v1";

/// Opaque attestation evidence as carried in the peer certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote(Vec<u8>);

impl Quote {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// Claims a quote is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserClaims {
    /// Raw Ed25519 public key of the peer's TLS certificate
    #[serde(with = "hex::serde")]
    pub public_key: [u8; 32],
}

impl UserClaims {
    pub fn new(public_key: [u8; 32]) -> Self {
        Self { public_key }
    }

    /// Build claims from a raw subject public key.
    pub fn from_raw_public_key(raw: &[u8]) -> Result<Self, PolicyError> {
        let public_key: [u8; 32] = raw.try_into().map_err(|_| {
            PolicyError::MissingEvidence(format!(
                "expected a 32-byte Ed25519 certificate key, got {} bytes",
                raw.len()
            ))
        })?;
        Ok(Self { public_key })
    }

    /// Digest a quote must commit to.
    pub fn digest(&self) -> [u8; 32] {
        blake3::derive_key(CLAIMS_DIGEST_CONTEXT, &self.public_key)
    }
}

/// Kind of attestation that produced an [`AttestationData`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttestationType {
    /// No attestation performed
    None,
    /// Development quotes from [`FakeQuoteProvider`]
    Fake,
}

impl fmt::Display for AttestationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttestationType::None => f.write_str("none"),
            AttestationType::Fake => f.write_str("fake"),
        }
    }
}

/// What a policy established about a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationData {
    pub attestation_type: AttestationType,
    /// Hash of the image the peer runs; zero when unattested
    #[serde(with = "hex::serde")]
    pub image_hash: [u8; 32],
}

impl AttestationData {
    pub fn new(attestation_type: AttestationType, image_hash: [u8; 32]) -> Self {
        Self {
            attestation_type,
            image_hash,
        }
    }

    /// Data for an unattested peer.
    pub fn empty() -> Self {
        Self::new(AttestationType::None, [0u8; 32])
    }

    pub fn is_empty(&self) -> bool {
        self.attestation_type == AttestationType::None
    }

    /// Hex image hash, as compared against allow-lists.
    pub fn image_hash_hex(&self) -> String {
        hex::encode(self.image_hash)
    }

    /// `type:<first 8 bytes of the image hash>..`
    pub fn short_description(&self) -> String {
        format!(
            "{}:{}..",
            self.attestation_type,
            hex::encode(&self.image_hash[..8])
        )
    }
}

/// Verified identity of the peer on one established channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedPeerInfo {
    pub attestation: AttestationData,
    pub claims: UserClaims,
    pub source: SocketAddr,
    pub destination: SocketAddr,
}

impl AttestedPeerInfo {
    pub fn image_hash(&self) -> &[u8; 32] {
        &self.attestation.image_hash
    }
}

impl fmt::Display for AttestedPeerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AttestedPeerInfo{{src={}, dst={}, type={}, image_hash={}.., pubkey={}}}",
            self.source,
            self.destination,
            self.attestation.attestation_type,
            hex::encode(&self.attestation.image_hash[..8]),
            hex::encode(self.claims.public_key),
        )
    }
}

/// Attestation policy capability.
pub trait Policy: fmt::Debug + Send + Sync {
    /// Decide whether `quote` over `claims` is acceptable.
    fn validate(&self, quote: &Quote, claims: &UserClaims) -> Result<AttestationData, PolicyError>;
}

/// Shared policy handle.
pub type PolicyRef = Arc<dyn Policy>;

/// Produces evidence for the local certificate.
pub trait QuoteProvider: Send + Sync {
    fn quote(&self, claims: &UserClaims) -> IdentityResult<Quote>;
}

/// JSON body of a development quote.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FakeQuote {
    #[serde(with = "hex::serde")]
    image_hash: [u8; 32],
    #[serde(with = "hex::serde")]
    claims_digest: [u8; 32],
}

/// Emits development quotes declaring a fixed image hash.
#[derive(Debug, Clone)]
pub struct FakeQuoteProvider {
    image_hash: [u8; 32],
}

impl FakeQuoteProvider {
    pub fn new(image_hash: [u8; 32]) -> Self {
        Self { image_hash }
    }

    pub fn image_hash(&self) -> &[u8; 32] {
        &self.image_hash
    }
}

impl QuoteProvider for FakeQuoteProvider {
    fn quote(&self, claims: &UserClaims) -> IdentityResult<Quote> {
        let body = FakeQuote {
            image_hash: self.image_hash,
            claims_digest: claims.digest(),
        };
        let bytes = serde_json::to_vec(&body).map_err(|e| IdentityError::Quote(e.to_string()))?;
        Ok(Quote::from_bytes(bytes))
    }
}

/// Accepts development quotes bound to the presented claims.
#[derive(Debug, Clone, Default)]
pub struct FakeQuotePolicy {
    /// Accepted image hashes; `None` accepts any image
    allowed_images: Option<HashSet<[u8; 32]>>,
}

impl FakeQuotePolicy {
    /// Policy accepting any image whose quote binds the claims.
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy additionally restricted to `images`.
    pub fn with_allowed_images(images: impl IntoIterator<Item = [u8; 32]>) -> Self {
        Self {
            allowed_images: Some(images.into_iter().collect()),
        }
    }
}

impl Policy for FakeQuotePolicy {
    fn validate(&self, quote: &Quote, claims: &UserClaims) -> Result<AttestationData, PolicyError> {
        let body: FakeQuote = serde_json::from_slice(quote.as_bytes())
            .map_err(|e| PolicyError::MalformedQuote(e.to_string()))?;

        if body.claims_digest != claims.digest() {
            warn!(
                pubkey = %hex::encode(claims.public_key),
                "Quote is not bound to the certificate key"
            );
            return Err(PolicyError::ClaimsMismatch);
        }

        if let Some(allowed) = &self.allowed_images {
            if !allowed.contains(&body.image_hash) {
                let image_hash = hex::encode(body.image_hash);
                warn!(image_hash = %image_hash, "Image not on allow-list");
                return Err(PolicyError::ImageNotAllowed { image_hash });
            }
        }

        let data = AttestationData::new(AttestationType::Fake, body.image_hash);
        debug!(attestation = %data.short_description(), "Quote accepted");
        Ok(data)
    }
}

/// Accepts every peer without looking at its evidence. Local testing only.
#[derive(Debug, Clone, Copy, Default)]
pub struct InsecurePolicy;

impl Policy for InsecurePolicy {
    fn validate(&self, _quote: &Quote, _claims: &UserClaims) -> Result<AttestationData, PolicyError> {
        Ok(AttestationData::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims() -> UserClaims {
        UserClaims::new([0x42; 32])
    }

    #[test]
    fn test_fake_quote_accepted() {
        let provider = FakeQuoteProvider::new([0xAA; 32]);
        let quote = provider.quote(&claims()).unwrap();

        let data = FakeQuotePolicy::new().validate(&quote, &claims()).unwrap();
        assert_eq!(data.attestation_type, AttestationType::Fake);
        assert_eq!(data.image_hash, [0xAA; 32]);
        assert!(!data.is_empty());
        assert_eq!(data.short_description(), "fake:aaaaaaaaaaaaaaaa..");
    }

    #[test]
    fn test_quote_bound_to_claims() {
        let provider = FakeQuoteProvider::new([0xAA; 32]);
        let quote = provider.quote(&claims()).unwrap();

        let other = UserClaims::new([0x43; 32]);
        assert_eq!(
            FakeQuotePolicy::new().validate(&quote, &other),
            Err(PolicyError::ClaimsMismatch)
        );
    }

    #[test]
    fn test_allow_list_enforced() {
        let quote = FakeQuoteProvider::new([0xBB; 32]).quote(&claims()).unwrap();
        let policy = FakeQuotePolicy::with_allowed_images([[0xAA; 32]]);

        assert!(matches!(
            policy.validate(&quote, &claims()),
            Err(PolicyError::ImageNotAllowed { .. })
        ));
    }

    #[test]
    fn test_malformed_quote_rejected() {
        let quote = Quote::from_bytes(b"not a quote".to_vec());
        assert!(matches!(
            FakeQuotePolicy::new().validate(&quote, &claims()),
            Err(PolicyError::MalformedQuote(_))
        ));
    }

    #[test]
    fn test_insecure_policy_returns_empty() {
        let data = InsecurePolicy
            .validate(&Quote::from_bytes(Vec::new()), &claims())
            .unwrap();
        assert!(data.is_empty());
    }

    #[test]
    fn test_claims_from_raw_key_length() {
        assert!(UserClaims::from_raw_public_key(&[1u8; 32]).is_ok());
        assert!(UserClaims::from_raw_public_key(&[1u8; 65]).is_err());
    }

    #[test]
    fn test_peer_info_display() {
        let info = AttestedPeerInfo {
            attestation: AttestationData::new(AttestationType::Fake, [0x01; 32]),
            claims: UserClaims::new([0x02; 32]),
            source: "10.0.0.1:4000".parse().unwrap(),
            destination: "10.0.0.2:5000".parse().unwrap(),
        };
        let text = info.to_string();
        assert!(text.starts_with("AttestedPeerInfo{src=10.0.0.1:4000, dst=10.0.0.2:5000, type=fake"));
        assert!(text.contains("image_hash=0101010101010101.."));
        assert!(text.ends_with(&format!("pubkey={}}}", "02".repeat(32))));
    }
}
