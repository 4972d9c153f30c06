//! Client used by proxies and workers to fetch their keys.

use keystead_channel::{wrap_tls_client, AttestedTlsContext, ConnectionAddrs};
use keystead_identity::AttestedPeerInfo;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{KeyManagerError, KeyManagerResult};
use crate::key::Role;
use crate::protocol::{read_frame, write_frame, KeyRequest, KeyResponse, PrivateKeyEntry};

/// Connects to a key manager over attested TLS.
#[derive(Debug, Clone)]
pub struct KeyManagerClient {
    tls: AttestedTlsContext,
}

impl KeyManagerClient {
    pub fn new(tls: AttestedTlsContext) -> Self {
        Self { tls }
    }

    /// Open a TCP connection to `addr` and attest it.
    pub async fn connect(&self, addr: SocketAddr) -> KeyManagerResult<KeyManagerConnection> {
        let stream = TcpStream::connect(addr).await?;
        let addrs = ConnectionAddrs {
            source: stream.local_addr()?,
            destination: stream.peer_addr()?,
        };
        self.connect_stream(stream, addrs).await
    }

    /// Attest an already established byte stream.
    pub async fn connect_stream<S>(&self, stream: S, addrs: ConnectionAddrs) -> KeyManagerResult<KeyManagerConnection>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let channel = wrap_tls_client(&self.tls, stream, addrs).await?;
        let (pipe, peer) = channel.into_parts();
        Ok(KeyManagerConnection { pipe, peer })
    }
}

/// An attested connection to a key manager.
#[derive(Debug)]
pub struct KeyManagerConnection {
    pipe: DuplexStream,
    peer: AttestedPeerInfo,
}

impl KeyManagerConnection {
    /// Identity of the key manager.
    pub fn peer(&self) -> &AttestedPeerInfo {
        &self.peer
    }

    /// Send one request and wait for its response.
    pub async fn request(&mut self, request: KeyRequest) -> KeyManagerResult<Vec<PrivateKeyEntry>> {
        write_frame(&mut self.pipe, &request).await?;
        let response: KeyResponse = read_frame(&mut self.pipe).await?.ok_or_else(|| {
            KeyManagerError::Protocol("connection closed before response".to_string())
        })?;
        match response {
            KeyResponse::Keys { keys } => {
                debug!(?request, count = keys.len(), "Received keys");
                Ok(keys)
            }
            KeyResponse::Error { code, message } => Err(KeyManagerError::Remote { code, message }),
        }
    }

    pub async fn get_keys(&mut self, role: Role) -> KeyManagerResult<Vec<PrivateKeyEntry>> {
        self.request(KeyRequest::for_role(role)).await
    }

    pub async fn get_proxy_private_keys(&mut self) -> KeyManagerResult<Vec<PrivateKeyEntry>> {
        self.get_keys(Role::Proxy).await
    }

    pub async fn get_worker_private_keys(&mut self) -> KeyManagerResult<Vec<PrivateKeyEntry>> {
        self.get_keys(Role::Worker).await
    }
}
