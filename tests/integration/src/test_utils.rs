//! Shared fixtures for the end-to-end tests

use keystead_channel::{AttestedTlsContext, ChannelOptions};
use keystead_core::ManualClock;
use keystead_identity::{CertAndKey, FakeQuotePolicy, FakeQuoteProvider, PolicyRef};
use keystead_keymanager::{
    ContractSnapshot, KeyLifecycleManager, KeyManagerClient, KeyManagerService, StaticConfigSource,
};
use keystead_store::SignedRecordStore;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const MACHINE_SEED: [u8; 32] = [0x5E; 32];
pub const MANAGER_IMAGE: [u8; 32] = [0x11; 32];
pub const PROXY_IMAGE: [u8; 32] = [0xA0; 32];
pub const WORKER_IMAGE: [u8; 32] = [0xB0; 32];
pub const ROGUE_IMAGE: [u8; 32] = [0xEE; 32];

/// Fixed start time for every scenario.
pub const START: i64 = 1_760_000_000;

/// Install a test-writer subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("keystead_keymanager=debug,keystead_channel=debug")
        .with_test_writer()
        .try_init();
}

pub fn temp_db_path() -> PathBuf {
    std::env::temp_dir().join(format!("keystead_it_{}.db", uuid::Uuid::new_v4()))
}

/// Contract admitting [`PROXY_IMAGE`] for proxies and [`WORKER_IMAGE`] for workers.
pub fn contract(version: u32) -> ContractSnapshot {
    ContractSnapshot {
        version,
        proxy_hashes: [PROXY_IMAGE].into_iter().collect(),
        worker_hashes: [WORKER_IMAGE].into_iter().collect(),
        synced_at: Some(START),
    }
}

/// TLS context presenting a fake quote for `image_hash`.
pub fn tls_context(image_hash: [u8; 32], policy: PolicyRef) -> AttestedTlsContext {
    let cert = CertAndKey::generate(&FakeQuoteProvider::new(image_hash))
        .expect("certificate generation");
    AttestedTlsContext::new(cert, policy).with_options(ChannelOptions {
        handshake_timeout: Duration::from_secs(5),
        ..ChannelOptions::default()
    })
}

/// Client running `image_hash` that only trusts [`MANAGER_IMAGE`].
pub fn client(image_hash: [u8; 32]) -> KeyManagerClient {
    KeyManagerClient::new(tls_context(
        image_hash,
        Arc::new(FakeQuotePolicy::with_allowed_images([MANAGER_IMAGE])),
    ))
}

pub fn open_manager(db_path: &Path, source: Arc<StaticConfigSource>, clock: &ManualClock) -> KeyLifecycleManager {
    let store = SignedRecordStore::open(db_path, &MACHINE_SEED).expect("open store");
    KeyLifecycleManager::open(store, source, Arc::new(clock.clone())).expect("load key set")
}

/// A key manager listening on a loopback port.
pub struct TestNode {
    pub addr: SocketAddr,
    pub service: Arc<KeyManagerService>,
    pub source: Arc<StaticConfigSource>,
    pub clock: ManualClock,
    pub db_path: PathBuf,
    handle: JoinHandle<()>,
}

impl TestNode {
    /// Start a node that accepts any fake quote.
    pub async fn start(check_hashes: bool) -> Self {
        Self::start_with_policy(check_hashes, Arc::new(FakeQuotePolicy::new())).await
    }

    pub async fn start_with_policy(check_hashes: bool, policy: PolicyRef) -> Self {
        init_tracing();
        let db_path = temp_db_path();
        let clock = ManualClock::new(START);
        let source = Arc::new(StaticConfigSource::new(contract(1)));
        let manager = open_manager(&db_path, source.clone(), &clock);

        let service = Arc::new(
            KeyManagerService::new(
                manager,
                source.clone(),
                tls_context(MANAGER_IMAGE, policy),
                check_hashes,
            )
            .with_reconcile_interval(Duration::from_secs(3600)),
        );

        // Initialize before listening so scenarios start from a known key set.
        service.reconcile_once().await.expect("initial reconcile");
        assert!(service.manager().lock().await.is_initialized());

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let runner = Arc::clone(&service);
        let handle = tokio::spawn(async move {
            if let Err(e) = runner.serve(listener).await {
                tracing::error!(error = %e, "test node stopped");
            }
        });

        Self {
            addr,
            service,
            source,
            clock,
            db_path,
            handle,
        }
    }

    pub async fn stop(self) {
        self.handle.abort();
        let _ = self.handle.await;
        drop(self.service);
        std::fs::remove_file(&self.db_path).ok();
    }
}
