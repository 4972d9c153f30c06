//! Attestation at the channel boundary
//!
//! A peer that fails its policy never reaches the query handler. A peer
//! that passes an insecure policy carries no image hash and is only served
//! when hash checks are off.

use crate::test_utils::{client, tls_context, TestNode, PROXY_IMAGE, WORKER_IMAGE};
use keystead_channel::ChannelError;
use keystead_identity::{FakeQuotePolicy, InsecurePolicy, PolicyError};
use keystead_keymanager::{ErrorCode, KeyManagerClient, KeyManagerError};
use std::sync::Arc;

#[tokio::test]
async fn test_client_rejects_unexpected_manager_image() {
    let node = TestNode::start(true).await;

    let suspicious = KeyManagerClient::new(tls_context(
        PROXY_IMAGE,
        Arc::new(FakeQuotePolicy::with_allowed_images([[0x42; 32]])),
    ));
    let err = suspicious.connect(node.addr).await.unwrap_err();
    assert!(matches!(
        err,
        KeyManagerError::Channel(ChannelError::Attestation(PolicyError::ImageNotAllowed { .. }))
    ));

    // The manager keeps serving honest peers.
    let mut proxy = client(PROXY_IMAGE).connect(node.addr).await.unwrap();
    assert_eq!(proxy.get_proxy_private_keys().await.unwrap().len(), 1);

    node.stop().await;
}

#[tokio::test]
async fn test_manager_policy_rejects_client_before_any_request() {
    let node = TestNode::start_with_policy(
        true,
        Arc::new(FakeQuotePolicy::with_allowed_images([WORKER_IMAGE])),
    )
    .await;

    // In TLS 1.3 the client may finish before the server checks its
    // certificate, so the rejection shows up on connect or on first use.
    match client(PROXY_IMAGE).connect(node.addr).await {
        Err(err) => assert!(matches!(err, KeyManagerError::Channel(_))),
        Ok(mut conn) => assert!(conn.get_proxy_private_keys().await.is_err()),
    }

    let mut worker = client(WORKER_IMAGE).connect(node.addr).await.unwrap();
    assert_eq!(worker.get_worker_private_keys().await.unwrap().len(), 1);

    node.stop().await;
}

#[tokio::test]
async fn test_insecure_peer_has_no_image_hash() {
    let node = TestNode::start_with_policy(true, Arc::new(InsecurePolicy)).await;

    let mut proxy = client(PROXY_IMAGE).connect(node.addr).await.unwrap();
    let err = proxy.get_proxy_private_keys().await.unwrap_err();
    assert!(matches!(
        err,
        KeyManagerError::Remote {
            code: ErrorCode::Unauthorized,
            ..
        }
    ));

    node.stop().await;

    let open = TestNode::start_with_policy(false, Arc::new(InsecurePolicy)).await;
    let mut proxy = client(PROXY_IMAGE).connect(open.addr).await.unwrap();
    assert_eq!(proxy.get_proxy_private_keys().await.unwrap().len(), 1);
    open.stop().await;
}
