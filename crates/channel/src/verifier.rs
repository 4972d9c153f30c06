//! Certificate verifiers that defer trust to an attestation policy.
//!
//! rustls calls these during the handshake instead of chain validation.
//! Each verifier extracts the quote and claims from the peer certificate,
//! runs the [`Policy`](keystead_identity::Policy), and resolves the
//! connection's one-shot outcome with either the [`AttestedPeerInfo`] or
//! the rejection. Handshake signatures are still checked normally, so the
//! peer must hold the private key of the certificate it presented.

use keystead_identity::{extract_evidence, AttestedPeerInfo, PolicyError, PolicyRef};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{CertificateError, DigitallySignedStruct, DistinguishedName, SignatureScheme};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{info, warn};

/// Verdict delivered to the establishing task.
pub type PeerOutcome = Result<AttestedPeerInfo, PolicyError>;

/// Addresses recorded in the resulting [`AttestedPeerInfo`].
///
/// `source` is the side that initiated the connection, `destination` the
/// side that accepted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionAddrs {
    pub source: SocketAddr,
    pub destination: SocketAddr,
}

/// Runs the policy once per connection and reports the verdict.
#[derive(Debug)]
pub struct PolicyAdapter {
    policy: PolicyRef,
    addrs: ConnectionAddrs,
    outcome: Mutex<Option<oneshot::Sender<PeerOutcome>>>,
}

impl PolicyAdapter {
    /// Create an adapter and the receiver its verdict arrives on.
    pub fn new(policy: PolicyRef, addrs: ConnectionAddrs) -> (Arc<Self>, oneshot::Receiver<PeerOutcome>) {
        let (tx, rx) = oneshot::channel();
        let adapter = Arc::new(Self {
            policy,
            addrs,
            outcome: Mutex::new(Some(tx)),
        });
        (adapter, rx)
    }

    fn judge(&self, end_entity: &CertificateDer<'_>) -> PeerOutcome {
        let evidence = extract_evidence(end_entity.as_ref())?;
        let attestation = self.policy.validate(&evidence.quote, &evidence.claims)?;
        Ok(AttestedPeerInfo {
            attestation,
            claims: evidence.claims,
            source: self.addrs.source,
            destination: self.addrs.destination,
        })
    }

    /// Judge the peer certificate and resolve the outcome channel.
    fn check(&self, end_entity: &CertificateDer<'_>) -> Result<(), rustls::Error> {
        let outcome = self.judge(end_entity);
        let accepted = outcome.is_ok();

        match &outcome {
            Ok(peer) => info!(peer = %peer, "Peer attestation accepted"),
            Err(e) => warn!(
                source = %self.addrs.source,
                destination = %self.addrs.destination,
                error = %e,
                "Peer attestation rejected"
            ),
        }

        let sender = self
            .outcome
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(sender) = sender {
            // Receiver gone means the establishing task already gave up.
            let _ = sender.send(outcome);
        }

        if accepted {
            Ok(())
        } else {
            Err(rustls::Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure,
            ))
        }
    }
}

/// Client-side verifier of the server certificate.
#[derive(Debug)]
pub struct AttestedServerVerifier {
    adapter: Arc<PolicyAdapter>,
    algorithms: WebPkiSupportedAlgorithms,
}

impl AttestedServerVerifier {
    pub fn new(adapter: Arc<PolicyAdapter>, algorithms: WebPkiSupportedAlgorithms) -> Self {
        Self {
            adapter,
            algorithms,
        }
    }
}

impl ServerCertVerifier for AttestedServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        self.adapter.check(end_entity)?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

/// Server-side verifier of the client certificate. Client auth is mandatory.
#[derive(Debug)]
pub struct AttestedClientVerifier {
    adapter: Arc<PolicyAdapter>,
    algorithms: WebPkiSupportedAlgorithms,
}

impl AttestedClientVerifier {
    pub fn new(adapter: Arc<PolicyAdapter>, algorithms: WebPkiSupportedAlgorithms) -> Self {
        Self {
            adapter,
            algorithms,
        }
    }
}

impl ClientCertVerifier for AttestedClientVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        true
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        self.adapter.check(end_entity)?;
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
