//! Key distribution over attested TLS
//!
//! # Test Scenarios
//!
//! 1. **Role Fetch**: admitted proxies and workers receive exactly their role's keys
//! 2. **Cross-Role Request**: a proxy asking for worker keys is unauthorized
//! 3. **Rotation**: expired keys stop being served after the next reconcile
//! 4. **Open Mode**: with hash checks off any attested peer is served
//! 5. **Operator Commands**: keys generated through admin ops are served at once
//! 6. **Malformed Frames**: undecodable requests get a rejection, not a hangup
//! 7. **Service Run**: `run` initializes before it accepts any connection

use crate::test_utils::{
    client, contract, open_manager, temp_db_path, tls_context, TestNode, MANAGER_IMAGE,
    PROXY_IMAGE, ROGUE_IMAGE, START, WORKER_IMAGE,
};
use keystead_channel::{wrap_tls_client, ConnectionAddrs};
use keystead_core::ManualClock;
use keystead_crypto::derive_public_key;
use keystead_identity::FakeQuotePolicy;
use keystead_keymanager::protocol::{read_frame, write_frame};
use keystead_keymanager::{
    ErrorCode, KeyManagerError, KeyManagerService, KeyRequest, KeyResponse, Role,
    StaticConfigSource, KEY_TTL_SECS,
};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

async fn live_public_keys(node: &TestNode, role: Role) -> Vec<[u8; 32]> {
    let manager = node.service.manager();
    let manager = manager.lock().await;
    manager
        .keys_for_role(role)
        .into_iter()
        .map(|key| *key.public_key())
        .collect()
}

#[tokio::test]
async fn test_proxy_and_worker_receive_their_keys() {
    let node = TestNode::start(true).await;

    let mut proxy = client(PROXY_IMAGE).connect(node.addr).await.unwrap();
    let proxy_keys = proxy.get_proxy_private_keys().await.unwrap();
    assert_eq!(proxy_keys.len(), 1);
    assert_eq!(proxy_keys[0].valid_until, START + KEY_TTL_SECS);
    assert_eq!(
        vec![derive_public_key(&proxy_keys[0].private_key)],
        live_public_keys(&node, Role::Proxy).await
    );

    let mut worker = client(WORKER_IMAGE).connect(node.addr).await.unwrap();
    let worker_keys = worker.get_worker_private_keys().await.unwrap();
    assert_eq!(worker_keys.len(), 1);
    assert_eq!(
        vec![derive_public_key(&worker_keys[0].private_key)],
        live_public_keys(&node, Role::Worker).await
    );
    assert_ne!(proxy_keys[0].private_key, worker_keys[0].private_key);

    node.stop().await;
}

#[tokio::test]
async fn test_connection_serves_repeated_requests() {
    let node = TestNode::start(true).await;

    let mut proxy = client(PROXY_IMAGE).connect(node.addr).await.unwrap();
    let first = proxy.get_proxy_private_keys().await.unwrap();
    let second = proxy.get_proxy_private_keys().await.unwrap();
    assert_eq!(first, second);

    node.stop().await;
}

#[tokio::test]
async fn test_cross_role_and_unknown_requests_are_refused() {
    let node = TestNode::start(true).await;

    let mut proxy = client(PROXY_IMAGE).connect(node.addr).await.unwrap();
    let err = proxy.get_worker_private_keys().await.unwrap_err();
    assert!(matches!(
        err,
        KeyManagerError::Remote {
            code: ErrorCode::Unauthorized,
            ..
        }
    ));

    let err = proxy.request(KeyRequest::Unknown).await.unwrap_err();
    assert!(matches!(
        err,
        KeyManagerError::Remote {
            code: ErrorCode::UnknownRequest,
            ..
        }
    ));

    // The connection survives refused requests.
    assert_eq!(proxy.get_proxy_private_keys().await.unwrap().len(), 1);

    let mut rogue = client(ROGUE_IMAGE).connect(node.addr).await.unwrap();
    for role in [Role::Proxy, Role::Worker] {
        let err = rogue.get_keys(role).await.unwrap_err();
        assert!(matches!(
            err,
            KeyManagerError::Remote {
                code: ErrorCode::Unauthorized,
                ..
            }
        ));
    }

    node.stop().await;
}

#[tokio::test]
async fn test_expired_keys_are_rotated_out() {
    let node = TestNode::start(true).await;

    let mut worker = client(WORKER_IMAGE).connect(node.addr).await.unwrap();
    let before = worker.get_worker_private_keys().await.unwrap();
    assert_eq!(before.len(), 1);

    node.clock.advance(KEY_TTL_SECS);
    let report = node.service.reconcile_once().await.unwrap();
    assert_eq!(report.expired.len(), 2);
    assert_eq!(report.generated.len(), 2);

    let after = worker.get_worker_private_keys().await.unwrap();
    assert_eq!(after.len(), 1);
    assert_ne!(after[0].private_key, before[0].private_key);
    assert_eq!(after[0].valid_until, START + 2 * KEY_TTL_SECS);

    node.stop().await;
}

#[tokio::test]
async fn test_hash_checks_disabled_serves_any_peer() {
    let node = TestNode::start(false).await;

    let mut rogue = client(ROGUE_IMAGE).connect(node.addr).await.unwrap();
    assert_eq!(rogue.get_proxy_private_keys().await.unwrap().len(), 1);
    assert_eq!(rogue.get_worker_private_keys().await.unwrap().len(), 1);

    node.stop().await;
}

#[tokio::test]
async fn test_operator_generated_key_is_served() {
    let node = TestNode::start(true).await;
    let admin = node.service.admin();

    let reply = admin.generate_key("proxy").await.unwrap();
    assert!(reply.starts_with("generated proxy key "));

    let mut proxy = client(PROXY_IMAGE).connect(node.addr).await.unwrap();
    assert_eq!(proxy.get_proxy_private_keys().await.unwrap().len(), 2);

    let removed = reply.trim_start_matches("generated proxy key ");
    assert_eq!(
        admin.remove_key(removed).await.unwrap(),
        format!("removed key {removed}")
    );
    assert_eq!(proxy.get_proxy_private_keys().await.unwrap().len(), 1);

    let status = admin.status().await;
    assert!(status.initialized);
    assert_eq!(status.keys.len(), 2);
    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["keys"].as_array().map(Vec::len), Some(2));

    node.stop().await;
}

#[tokio::test]
async fn test_malformed_frame_is_rejected_and_connection_survives() {
    let node = TestNode::start(true).await;

    let stream = TcpStream::connect(node.addr).await.unwrap();
    let addrs = ConnectionAddrs {
        source: stream.local_addr().unwrap(),
        destination: node.addr,
    };
    let ctx = tls_context(
        PROXY_IMAGE,
        Arc::new(FakeQuotePolicy::with_allowed_images([MANAGER_IMAGE])),
    );
    let (mut pipe, _peer) = wrap_tls_client(&ctx, stream, addrs)
        .await
        .unwrap()
        .into_parts();

    let malformed_requests = [
        serde_json::json!({"bogus": true}),
        serde_json::json!("getProxyPrivateKeys"),
    ];
    for malformed in malformed_requests {
        write_frame(&mut pipe, &malformed).await.unwrap();
        let response: KeyResponse = read_frame(&mut pipe)
            .await
            .unwrap()
            .expect("rejection before close");
        assert!(matches!(
            response,
            KeyResponse::Error {
                code: ErrorCode::UnknownRequest,
                ..
            }
        ));
    }

    write_frame(&mut pipe, &KeyRequest::GetProxyPrivateKeys).await.unwrap();
    let response: KeyResponse = read_frame(&mut pipe).await.unwrap().unwrap();
    assert!(matches!(response, KeyResponse::Keys { ref keys } if keys.len() == 1));

    node.stop().await;
}

#[tokio::test]
async fn test_run_initializes_before_serving() {
    let db_path = temp_db_path();
    let clock = ManualClock::new(START);
    let source = Arc::new(StaticConfigSource::new(contract(1)));
    let manager = open_manager(&db_path, source.clone(), &clock);
    let service = Arc::new(KeyManagerService::new(
        manager,
        source,
        tls_context(MANAGER_IMAGE, Arc::new(FakeQuotePolicy::new())),
        true,
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(Arc::clone(&service).run(listener));

    let mut worker = client(WORKER_IMAGE).connect(addr).await.unwrap();
    assert_eq!(worker.get_worker_private_keys().await.unwrap().len(), 1);
    assert!(service.manager().lock().await.is_initialized());

    handle.abort();
    let _ = handle.await;
    std::fs::remove_file(db_path).ok();
}
