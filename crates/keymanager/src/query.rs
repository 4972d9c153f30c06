//! Key query service.
//!
//! Answers "give me the keys for role X" for an attested peer. With hash
//! checking enabled the peer's attested image hash must be on the role's
//! allow-list before the key set is looked at.

use keystead_identity::AttestedPeerInfo;
use keystead_store::{KvBackend, SqliteBackend};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config_source::ConfigSourceRef;
use crate::key::Role;
use crate::lifecycle::SharedManager;
use crate::protocol::{ErrorCode, KeyRequest, KeyResponse, PrivateKeyEntry};

/// Reasons a query is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("image {image_hash} is not allowed to fetch {role} keys")]
    Unauthorized { role: Role, image_hash: String },

    #[error("unknown request")]
    UnknownRequest,

    /// Service cannot answer yet
    #[error("{0}")]
    Failure(String),
}

impl QueryError {
    pub fn code(&self) -> ErrorCode {
        match self {
            QueryError::Unauthorized { .. } => ErrorCode::Unauthorized,
            QueryError::UnknownRequest => ErrorCode::UnknownRequest,
            QueryError::Failure(_) => ErrorCode::Failure,
        }
    }
}

impl From<QueryError> for KeyResponse {
    fn from(err: QueryError) -> Self {
        KeyResponse::error(err.code(), err.to_string())
    }
}

/// Serves private keys to attested proxies and workers.
pub struct KeyQueryService<B: KvBackend = SqliteBackend> {
    manager: SharedManager<B>,
    source: ConfigSourceRef,
    check_hashes: bool,
}

impl<B: KvBackend> Clone for KeyQueryService<B> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            source: self.source.clone(),
            check_hashes: self.check_hashes,
        }
    }
}

impl<B: KvBackend> KeyQueryService<B> {
    pub fn new(manager: SharedManager<B>, source: ConfigSourceRef, check_hashes: bool) -> Self {
        Self {
            manager,
            source,
            check_hashes,
        }
    }

    pub fn check_hashes(&self) -> bool {
        self.check_hashes
    }

    /// Every live key for `role` as `(valid_until, private_key)` entries.
    pub async fn get_keys_for_role(
        &self,
        role: Role,
        requester: &AttestedPeerInfo,
    ) -> Result<Vec<PrivateKeyEntry>, QueryError> {
        if self.check_hashes && !self.source.snapshot().has_hash(role, requester.image_hash()) {
            let image_hash = requester.attestation.image_hash_hex();
            warn!(role = %role, peer = %requester, "Unauthorized key request");
            return Err(QueryError::Unauthorized { role, image_hash });
        }

        let manager = self.manager.lock().await;
        if !manager.is_initialized() {
            return Err(QueryError::Failure(
                "key manager is not initialized".to_string(),
            ));
        }

        let keys: Vec<PrivateKeyEntry> = manager
            .keys_for_role(role)
            .into_iter()
            .map(|key| PrivateKeyEntry {
                valid_until: key.valid_until,
                private_key: *key.seed().as_bytes(),
            })
            .collect();
        debug!(role = %role, count = keys.len(), peer = %requester, "Served keys");
        Ok(keys)
    }

    /// Dispatch one wire request.
    pub async fn handle(&self, request: KeyRequest, requester: &AttestedPeerInfo) -> KeyResponse {
        let Some(role) = request.role() else {
            return QueryError::UnknownRequest.into();
        };
        match self.get_keys_for_role(role, requester).await {
            Ok(keys) => KeyResponse::Keys { keys },
            Err(err) => err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_source::{ContractSnapshot, StaticConfigSource};
    use crate::lifecycle::KeyLifecycleManager;
    use keystead_core::ManualClock;
    use keystead_crypto::RecordSigner;
    use keystead_identity::{AttestationData, AttestationType, UserClaims};
    use keystead_store::{MemoryBackend, SignedRecordStore};
    use std::sync::Arc;

    const WORKER_IMAGE: [u8; 32] = [0xB0; 32];
    const PROXY_IMAGE: [u8; 32] = [0xA0; 32];

    fn peer(image_hash: [u8; 32]) -> AttestedPeerInfo {
        AttestedPeerInfo {
            attestation: AttestationData::new(AttestationType::Fake, image_hash),
            claims: UserClaims::new([0x01; 32]),
            source: "127.0.0.1:40000".parse().unwrap(),
            destination: "127.0.0.1:9000".parse().unwrap(),
        }
    }

    fn service(check_hashes: bool, reconcile: bool) -> KeyQueryService<MemoryBackend> {
        let source = Arc::new(StaticConfigSource::new(ContractSnapshot {
            version: 1,
            proxy_hashes: [PROXY_IMAGE].into_iter().collect(),
            worker_hashes: [WORKER_IMAGE].into_iter().collect(),
            synced_at: None,
        }));
        let store = SignedRecordStore::new(
            MemoryBackend::new(),
            RecordSigner::from_seed(&[5u8; 32]).unwrap(),
        );
        let mut manager =
            KeyLifecycleManager::open(store, source.clone(), Arc::new(ManualClock::new(1_000)))
                .unwrap();
        if reconcile {
            manager.reconcile().unwrap();
        }
        KeyQueryService::new(manager.into_shared(), source, check_hashes)
    }

    #[tokio::test]
    async fn test_allow_listed_worker_gets_worker_keys() {
        let service = service(true, true);
        let keys = service
            .get_keys_for_role(Role::Worker, &peer(WORKER_IMAGE))
            .await
            .unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].valid_until, 1_000 + crate::key::KEY_TTL_SECS);
    }

    #[tokio::test]
    async fn test_unlisted_identity_is_unauthorized() {
        let service = service(true, true);
        let response = service
            .handle(KeyRequest::GetWorkerPrivateKeys, &peer(PROXY_IMAGE))
            .await;
        assert!(matches!(
            response,
            KeyResponse::Error {
                code: ErrorCode::Unauthorized,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unchecked_hashes_serve_any_peer() {
        let service = service(false, true);
        let keys = service
            .get_keys_for_role(Role::Proxy, &peer([0xFF; 32]))
            .await
            .unwrap();
        assert_eq!(keys.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_request() {
        let service = service(false, true);
        let response = service.handle(KeyRequest::Unknown, &peer(WORKER_IMAGE)).await;
        assert!(matches!(
            response,
            KeyResponse::Error {
                code: ErrorCode::UnknownRequest,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_queries_fail_before_first_reconcile() {
        let service = service(true, false);
        let err = service
            .get_keys_for_role(Role::Worker, &peer(WORKER_IMAGE))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Failure);
    }
}
