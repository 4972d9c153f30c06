//! Attested TLS channel establishment.
//!
//! [`wrap_tls_client`] and [`wrap_tls_server`] take any raw duplex stream,
//! run a mutually authenticated TLS 1.3 handshake whose certificate checks
//! are delegated to the attestation policy, and hand back a plaintext
//! in-memory pipe together with the verified [`AttestedPeerInfo`]. A relay
//! task mirrors the pipe onto the TLS stream.
//!
//! The call either returns both the pipe and the peer identity or fails as
//! a whole; no unverified pipe is ever exposed.

use keystead_identity::{AttestedPeerInfo, CertAndKey, PolicyRef, DEFAULT_SERVER_NAME};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::{ClientConfig, ServerConfig};
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, info, warn};

use crate::error::{ChannelError, ChannelResult};
use crate::relay::{spawn_relay, RelayStats};
use crate::verifier::{
    AttestedClientVerifier, AttestedServerVerifier, ConnectionAddrs, PeerOutcome, PolicyAdapter,
};

/// Default bound on a whole establishment call.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default capacity of the plaintext pipe.
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// Tunables for channel establishment.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub handshake_timeout: Duration,
    /// Name the client expects the server certificate to be issued for
    pub server_name: String,
    pub pipe_capacity: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            server_name: DEFAULT_SERVER_NAME.to_string(),
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
        }
    }
}

/// Local certificate, peer policy and options shared by every connection.
#[derive(Clone)]
pub struct AttestedTlsContext {
    cert: CertAndKey,
    policy: PolicyRef,
    options: ChannelOptions,
    provider: Arc<CryptoProvider>,
}

impl AttestedTlsContext {
    pub fn new(cert: CertAndKey, policy: PolicyRef) -> Self {
        Self {
            cert,
            policy,
            options: ChannelOptions::default(),
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        }
    }

    pub fn with_options(mut self, options: ChannelOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    pub fn cert(&self) -> &CertAndKey {
        &self.cert
    }

    fn chain(&self) -> Vec<CertificateDer<'static>> {
        vec![CertificateDer::from(self.cert.cert_der().to_vec())]
    }

    fn private_key(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.cert.key_der().to_vec()))
    }

    fn client_config(&self, adapter: Arc<PolicyAdapter>) -> ChannelResult<ClientConfig> {
        let verifier = Arc::new(AttestedServerVerifier::new(
            adapter,
            self.provider.signature_verification_algorithms,
        ));
        let config = ClientConfig::builder_with_provider(self.provider.clone())
            .with_protocol_versions(&[&rustls::version::TLS13])?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_client_auth_cert(self.chain(), self.private_key())?;
        Ok(config)
    }

    fn server_config(&self, adapter: Arc<PolicyAdapter>) -> ChannelResult<ServerConfig> {
        let verifier = Arc::new(AttestedClientVerifier::new(
            adapter,
            self.provider.signature_verification_algorithms,
        ));
        let config = ServerConfig::builder_with_provider(self.provider.clone())
            .with_protocol_versions(&[&rustls::version::TLS13])?
            .with_client_cert_verifier(verifier)
            .with_single_cert(self.chain(), self.private_key())?;
        Ok(config)
    }
}

impl std::fmt::Debug for AttestedTlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttestedTlsContext")
            .field("cert", &self.cert)
            .field("policy", &self.policy)
            .field("options", &self.options)
            .finish()
    }
}

/// Established channel: plaintext pipe plus verified peer.
#[derive(Debug)]
pub struct AttestedChannel {
    /// Plaintext side of the channel
    pub stream: DuplexStream,
    pub peer: AttestedPeerInfo,
    relay: JoinHandle<RelayStats>,
}

impl AttestedChannel {
    /// Split into the pipe and the peer identity, leaving the relay running.
    pub fn into_parts(self) -> (DuplexStream, AttestedPeerInfo) {
        (self.stream, self.peer)
    }

    /// Close the pipe and wait for the relay to drain.
    pub async fn close(self) -> io::Result<RelayStats> {
        drop(self.stream);
        self.relay
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

/// Establish the client side of an attested channel over `stream`.
pub async fn wrap_tls_client<S>(
    ctx: &AttestedTlsContext,
    stream: S,
    addrs: ConnectionAddrs,
) -> ChannelResult<AttestedChannel>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (adapter, outcome) = PolicyAdapter::new(ctx.policy.clone(), addrs);
    let connector = TlsConnector::from(Arc::new(ctx.client_config(adapter)?));
    let server_name = ServerName::try_from(ctx.options.server_name.clone())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    establish(ctx, outcome, async move {
        connector.connect(server_name, stream).await
    })
    .await
}

/// Establish the server side of an attested channel over `stream`.
pub async fn wrap_tls_server<S>(
    ctx: &AttestedTlsContext,
    stream: S,
    addrs: ConnectionAddrs,
) -> ChannelResult<AttestedChannel>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (adapter, outcome) = PolicyAdapter::new(ctx.policy.clone(), addrs);
    let acceptor = TlsAcceptor::from(Arc::new(ctx.server_config(adapter)?));

    establish(ctx, outcome, async move { acceptor.accept(stream).await }).await
}

async fn establish<T, F>(
    ctx: &AttestedTlsContext,
    outcome: oneshot::Receiver<PeerOutcome>,
    handshake: F,
) -> ChannelResult<AttestedChannel>
where
    F: Future<Output = io::Result<T>>,
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let deadline = ctx.options.handshake_timeout;
    match tokio::time::timeout(deadline, complete(ctx, outcome, handshake)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(timeout = ?deadline, "Attested handshake timed out");
            Err(ChannelError::HandshakeTimeout(deadline))
        }
    }
}

async fn complete<T, F>(
    ctx: &AttestedTlsContext,
    mut outcome: oneshot::Receiver<PeerOutcome>,
    handshake: F,
) -> ChannelResult<AttestedChannel>
where
    F: Future<Output = io::Result<T>>,
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let tls = match handshake.await {
        Ok(tls) => tls,
        Err(e) => {
            // A policy rejection surfaces as a generic handshake error.
            if let Ok(Err(rejection)) = outcome.try_recv() {
                return Err(ChannelError::Attestation(rejection));
            }
            debug!(error = %e, "TLS handshake failed");
            return Err(ChannelError::Io(e));
        }
    };

    let peer = match outcome.try_recv() {
        Ok(Ok(peer)) => peer,
        Ok(Err(rejection)) => return Err(ChannelError::Attestation(rejection)),
        Err(_) => return Err(ChannelError::PeerUnverified),
    };

    let (app_side, relay_side) = tokio::io::duplex(ctx.options.pipe_capacity);
    let relay = spawn_relay(tls, relay_side);

    info!(peer = %peer, "Attested channel established");
    Ok(AttestedChannel {
        stream: app_side,
        peer,
        relay,
    })
}
