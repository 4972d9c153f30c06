//! Key manager service: maintenance ticker and attested query listener.

use keystead_channel::{wrap_tls_server, AttestedTlsContext, ConnectionAddrs};
use keystead_store::{KvBackend, SqliteBackend};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::admin::AdminOps;
use crate::config_source::ConfigSourceRef;
use crate::error::{KeyManagerError, KeyManagerResult};
use crate::lifecycle::{with_manager_blocking, KeyLifecycleManager, ReconcileReport, SharedManager};
use crate::protocol::{decode_request, read_frame_body, write_frame, KeyResponse};
use crate::query::KeyQueryService;

/// Default period between reconcile runs.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(10);

/// Pause after a failed accept, e.g. when file descriptors run out.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The running key manager.
pub struct KeyManagerService<B: KvBackend = SqliteBackend> {
    manager: SharedManager<B>,
    query: KeyQueryService<B>,
    admin: AdminOps<B>,
    tls: AttestedTlsContext,
    reconcile_interval: Duration,
}

impl<B: KvBackend + 'static> KeyManagerService<B> {
    pub fn new(
        manager: KeyLifecycleManager<B>,
        source: ConfigSourceRef,
        tls: AttestedTlsContext,
        check_hashes: bool,
    ) -> Self {
        let manager = manager.into_shared();
        Self {
            query: KeyQueryService::new(manager.clone(), source.clone(), check_hashes),
            admin: AdminOps::new(manager.clone(), source, check_hashes),
            manager,
            tls,
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
        }
    }

    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }

    pub fn manager(&self) -> SharedManager<B> {
        self.manager.clone()
    }

    pub fn query(&self) -> &KeyQueryService<B> {
        &self.query
    }

    pub fn admin(&self) -> AdminOps<B> {
        self.admin.clone()
    }

    pub async fn reconcile_once(&self) -> KeyManagerResult<ReconcileReport> {
        with_manager_blocking(&self.manager, |manager| manager.reconcile()).await
    }

    /// Reconcile every interval until a fatal error occurs.
    ///
    /// Non-fatal failures are logged and retried on the next tick.
    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<KeyManagerError> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let period = service.reconcile_interval;
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match service.reconcile_once().await {
                    Ok(report) => debug!(?report, "Reconcile finished"),
                    Err(e) if e.is_fatal() => {
                        error!(error = %e, "Fatal error during reconcile");
                        return e;
                    }
                    Err(e) => warn!(error = %e, "Reconcile failed"),
                }
            }
        })
    }

    /// Accept attested query connections until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> KeyManagerResult<()> {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "Key manager listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let service = Arc::clone(&self);
                    let addrs = ConnectionAddrs {
                        source: peer_addr,
                        destination: local_addr,
                    };
                    tokio::spawn(async move {
                        if let Err(e) = service.handle_connection(stream, addrs).await {
                            warn!(peer = %peer_addr, error = %e, "Connection closed with error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    /// Run the service: first reconcile, then maintenance and listener.
    ///
    /// Returns only on a fatal maintenance error or a listener failure.
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> KeyManagerResult<()> {
        let report = self.reconcile_once().await?;
        info!(generated = report.generated.len(), "Initial reconcile finished");

        let maintenance = self.spawn_maintenance();
        tokio::select! {
            fatal = maintenance => match fatal {
                Ok(e) => Err(e),
                Err(join) => Err(KeyManagerError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    join,
                ))),
            },
            served = Arc::clone(&self).serve(listener) => served,
        }
    }

    /// Establish an attested channel over `stream` and answer requests on it.
    pub async fn handle_connection<S>(&self, stream: S, addrs: ConnectionAddrs) -> KeyManagerResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let channel = wrap_tls_server(&self.tls, stream, addrs).await?;
        let (mut pipe, peer) = channel.into_parts();

        while let Some(body) = read_frame_body(&mut pipe).await? {
            let response: KeyResponse = match decode_request(&body) {
                Ok(request) => {
                    debug!(?request, peer = %peer, "Key request");
                    self.query.handle(request, &peer).await
                }
                Err(rejection) => {
                    warn!(peer = %peer, len = body.len(), "Malformed key request");
                    rejection
                }
            };
            write_frame(&mut pipe, &response).await?;
        }
        debug!(peer = %peer, "Peer closed connection");
        Ok(())
    }
}
