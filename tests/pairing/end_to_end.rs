use serde_json::{json, Value};

use passlink::{Error, IdCollisionPolicy, RuntimeAction, SessionEvent, StorageArea};
use passlink_crypto::{base64_encode, hex_decode, verify_session};
use passlink_protocol::{
    checksum, open_payload, seal_payload, split_chunks, ChunkOutcome, CloseReason,
    InboundTransfer, InitTransferPayload, ProtocolError, PullOutcome, PullRequest,
    PullRequestKind, SessionConfig, SessionState, SocketAction,
};

use crate::common::{local_hello, login, settle, Harness};

fn source_vault() -> Value {
    json!({
        "id": "v1",
        "name": "Personal",
        "items": [
            login("a8f5f167-0000-4000-8000-000000000001", 2, 1700000000001, "correct horse"),
            login("a8f5f167-0000-4000-8000-000000000002", 2, 1700000000002, "battery staple"),
            login("a8f5f167-0000-4000-8000-000000000003", 2, 1700000000003, "tr0ub4dor&3"),
        ],
        "tags": [{"id": "t-1", "name": "Work", "color": "#3366ff", "position": 0}]
    })
}

#[tokio::test]
async fn handshake_then_three_chunk_vault_sync() {
    let mut harness = Harness::new(IdCollisionPolicy::Reject);
    let mut events = harness.ctx.bus.subscribe();
    let config = SessionConfig::new("u-1", local_hello()).expect_session("S1");
    let (driver, _handle, mut peer) = harness.spawn(config);

    // HELLO(D1)
    let hello_id = peer
        .send(SocketAction::Hello, crate::common::peer_hello("D1"))
        .await;
    let hello = peer.expect(SocketAction::Hello).await;
    assert_eq!(hello.id, hello_id);
    assert_eq!(hello.payload["deviceId"], "browser-1");

    // CHALLENGE(K, S1)
    let challenge_id = peer
        .send(SocketAction::Challenge, peer.challenge_payload("S1"))
        .await;
    let reply = peer.expect(SocketAction::Challenge).await;
    assert_eq!(reply.id, challenge_id);
    let reply = peer.finish_handshake(&reply);
    assert_eq!(reply.signature.len(), 128);
    assert!(reply.signature.chars().all(|c| c.is_ascii_hexdigit()));
    assert!(verify_session(
        &harness.identity.public_key_jwk,
        &peer.ephemeral.public_key_bytes(),
        "S1",
        &hex_decode(&reply.signature).unwrap(),
    ));

    // INIT_TRANSFER(3)
    let vault = source_vault();
    let sealed = seal_payload(&vault, peer.key()).unwrap();
    let chunks = split_chunks(&sealed, sealed.len().div_ceil(3));
    assert_eq!(chunks.len(), 3);
    peer.send(
        SocketAction::InitTransfer,
        json!({"totalChunks": 3, "sha256": checksum(&sealed)}),
    )
    .await;
    peer.expect(SocketAction::InitTransferConfirmed).await;

    // Chunks 0, 1, 2.
    for (index, chunk) in chunks.iter().enumerate() {
        peer.send(
            SocketAction::TransferChunk,
            json!({"chunkIndex": index, "data": base64_encode(chunk)}),
        )
        .await;
        if index < 2 {
            let confirmed = peer.expect(SocketAction::TransferChunkConfirmed).await;
            assert_eq!(confirmed.payload["chunkIndex"], index);
        }
    }
    peer.expect(SocketAction::TransferCompleted).await;

    peer.send(SocketAction::CloseWithSuccess, json!({})).await;
    let reason = driver.await.unwrap().unwrap();
    assert_eq!(reason, CloseReason::Completed);

    // The reconstructed vault is what the peer sent.
    let stored = harness
        .cache()
        .decrypted_vault("u-1", "v1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(serde_json::to_value(&stored).unwrap(), vault);

    let device = harness.ctx.devices.get_by_uuid("u-1").await.unwrap();
    assert_eq!(device.id, "D1");
    assert_eq!(device.vaults[0].name, "Personal");

    let synced = harness
        .drain_messages()
        .into_iter()
        .find(|m| m.action == RuntimeAction::VaultSynced)
        .unwrap();
    assert_eq!(synced.payload["itemCount"], 3);

    let mut saw_ready = false;
    let mut saw_sync = false;
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::StateChanged { state: SessionState::Ready, .. } => saw_ready = true,
            SessionEvent::VaultSynced { item_count, .. } => saw_sync = item_count == 3,
            _ => {}
        }
    }
    assert!(saw_ready && saw_sync);
}

#[tokio::test]
async fn device_mismatch_closes_with_error() {
    let mut harness = Harness::new(IdCollisionPolicy::Reject);
    let config = SessionConfig::new("u-1", local_hello()).expect_device("D1");
    let (driver, _handle, mut peer) = harness.spawn(config);

    let hello_id = peer
        .send(SocketAction::Hello, crate::common::peer_hello("D2"))
        .await;
    let close = peer.expect(SocketAction::CloseWithError).await;
    assert_eq!(close.id, hello_id);
    assert_eq!(close.payload, json!({"errorCode": "DEVICE_MISMATCH"}));

    let err = driver.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Protocol(ProtocolError::DeviceMismatch { .. })));
    assert!(harness.ctx.devices.list().await.is_empty());

    let status = harness.drain_messages();
    assert_eq!(status.last().unwrap().payload, json!("CONNECTION_ERROR"));
}

#[tokio::test]
async fn out_of_order_chunk_aborts_without_applying() {
    let harness = Harness::new(IdCollisionPolicy::Reject);
    let (driver, _handle, mut peer) = harness.spawn(SessionConfig::new("u-1", local_hello()));
    peer.pair("D1", "S1").await;

    let sealed = seal_payload(&source_vault(), peer.key()).unwrap();
    let chunks = split_chunks(&sealed, sealed.len().div_ceil(3));
    peer.send(SocketAction::InitTransfer, json!({"totalChunks": 3})).await;
    peer.expect(SocketAction::InitTransferConfirmed).await;
    peer.send(
        SocketAction::TransferChunk,
        json!({"chunkIndex": 1, "data": base64_encode(&chunks[1])}),
    )
    .await;

    let close = peer.expect(SocketAction::CloseWithError).await;
    assert_eq!(close.payload["errorCode"], "CHUNK_ORDER");
    assert!(driver.await.unwrap().is_err());
    assert!(harness.cache().items("u-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn malformed_hello_is_protocol_violation() {
    let harness = Harness::new(IdCollisionPolicy::Reject);
    let (driver, _handle, mut peer) = harness.spawn(SessionConfig::new("u-1", local_hello()));
    peer.send(SocketAction::Hello, json!({"unexpected": true})).await;

    let close = peer.expect(SocketAction::CloseWithError).await;
    assert_eq!(close.payload["errorCode"], "PAYLOAD_INVALID");
    assert!(matches!(
        driver.await.unwrap(),
        Err(Error::Protocol(ProtocolError::InvalidPayload(_)))
    ));
}

#[tokio::test]
async fn outbound_payload_streams_with_acks() {
    let harness = Harness::new(IdCollisionPolicy::Reject);
    let config = SessionConfig::new("u-1", local_hello()).with_max_chunk_size(64);
    let (driver, handle, mut peer) = harness.spawn(config);
    peer.pair("D1", "S1").await;

    let entries: Vec<String> = (0..20).map(|_| uuid::Uuid::new_v4().to_string()).collect();
    let payload = json!({"kind": "vault-update", "items": entries});
    handle.send_payload(payload.clone()).unwrap();

    let init = peer.expect(SocketAction::InitTransfer).await;
    let init_payload: InitTransferPayload = init.parse_payload().unwrap();
    assert!(init_payload.total_chunks > 1);
    let mut inbound = InboundTransfer::new(&init_payload).unwrap();
    peer.send_with_id(&init.id, SocketAction::InitTransferConfirmed, json!({}))
        .await;

    let sealed = loop {
        let chunk = peer.expect(SocketAction::TransferChunk).await;
        let index = chunk.payload["chunkIndex"].as_u64().unwrap() as u32;
        let data = passlink_crypto::base64_decode(chunk.payload["data"].as_str().unwrap()).unwrap();
        match inbound.accept(index, data).unwrap() {
            ChunkOutcome::Acknowledge(i) => {
                peer.send_with_id(
                    &chunk.id,
                    SocketAction::TransferChunkConfirmed,
                    json!({"chunkIndex": i}),
                )
                .await;
            }
            ChunkOutcome::Complete(sealed) => break sealed,
        }
    };
    let received: Value = open_payload(&sealed, peer.key()).unwrap();
    assert_eq!(received, payload);

    peer.send(SocketAction::TransferCompleted, json!({})).await;
    handle.close(true).unwrap();
    peer.expect(SocketAction::CloseWithSuccess).await;
    assert_eq!(driver.await.unwrap().unwrap(), CloseReason::Completed);
}

#[tokio::test]
async fn inline_pull_requests_resolve_by_id() {
    let harness = Harness::new(IdCollisionPolicy::Reject);
    let (driver, handle, mut peer) = harness.spawn(SessionConfig::new("u-1", local_hello()));
    peer.pair("D1", "S1").await;

    let secret_request = PullRequest::for_item(PullRequestKind::ItemSecret, "D1", "v1", "i-top");
    let item_request = PullRequest::for_item(PullRequestKind::Item, "D1", "v1", "i-new");
    let secret_pull = tokio::spawn({
        let handle = handle.clone();
        let request = secret_request.clone();
        async move { handle.pull(request).await }
    });
    let item_pull = tokio::spawn({
        let handle = handle.clone();
        let request = item_request.clone();
        async move { handle.pull(request).await }
    });

    let mut seen = Vec::new();
    for _ in 0..2 {
        let frame = peer.expect(SocketAction::PullRequest).await;
        assert_eq!(frame.payload["requestId"], frame.id);
        seen.push(frame.id);
    }
    seen.sort();
    let mut expected = vec![secret_request.request_id.clone(), item_request.request_id.clone()];
    expected.sort();
    assert_eq!(seen, expected);

    // Answer in the opposite order they were issued.
    let item = login("i-new", 2, 5, "fresh");
    peer.send(
        SocketAction::PullRequestAction,
        json!({
            "requestId": item_request.request_id,
            "status": "ACCEPT",
            "data": base64_encode(&seal_payload(&item, peer.key()).unwrap()),
        }),
    )
    .await;
    let completed = peer.expect(SocketAction::PullRequestCompleted).await;
    assert_eq!(completed.payload["requestId"], item_request.request_id.as_str());

    let secret = json!({"password": "never-cached"});
    peer.send(
        SocketAction::PullRequestAction,
        json!({
            "requestId": secret_request.request_id,
            "status": "ACCEPT",
            "data": base64_encode(&seal_payload(&secret, peer.key()).unwrap()),
        }),
    )
    .await;
    peer.expect(SocketAction::PullRequestCompleted).await;

    assert_eq!(item_pull.await.unwrap().unwrap(), PullOutcome::Data(item));
    assert_eq!(secret_pull.await.unwrap().unwrap(), PullOutcome::Data(secret));

    // The pulled item was merged; the revealed secret went nowhere else.
    let items = harness.cache().decrypted_items("u-1").await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].secrets().password.as_deref(), Some("fresh"));
    for (_, _, value) in harness.storage.snapshot() {
        assert!(!value.to_string().contains("never-cached"));
    }

    handle.close(true).unwrap();
    assert_eq!(driver.await.unwrap().unwrap(), CloseReason::Completed);
}

#[tokio::test]
async fn pending_pull_aborted_on_disconnect() {
    let harness = Harness::new(IdCollisionPolicy::Reject);
    let (driver, handle, mut peer) = harness.spawn(SessionConfig::new("u-1", local_hello()));
    peer.pair("D1", "S1").await;

    let pull = tokio::spawn({
        let handle = handle.clone();
        async move { handle.pull(PullRequest::new(PullRequestKind::Vault, "D1")).await }
    });
    peer.expect(SocketAction::PullRequest).await;
    drop(peer);

    assert_eq!(pull.await.unwrap().unwrap(), PullOutcome::Aborted);
    assert_eq!(driver.await.unwrap().unwrap(), CloseReason::Disconnected);
    // Session keys never touch storage.
    assert!(harness.storage.keys(StorageArea::Session).is_empty());
}

#[tokio::test(start_paused = true)]
async fn silent_peer_times_out_handshake() {
    let mut harness = Harness::new(IdCollisionPolicy::Reject);
    let (driver, _handle, mut peer) = harness.spawn(SessionConfig::new("u-1", local_hello()));

    let result = driver.await.unwrap();
    assert!(matches!(result, Err(Error::Timeout("handshake"))));
    assert_eq!(result.unwrap_err().user_status(), passlink::UserStatus::Timeout);

    let close = peer.expect(SocketAction::CloseWithError).await;
    assert_eq!(close.payload["errorCode"], "TIMEOUT");
    let status = harness.drain_messages();
    assert_eq!(status.last().unwrap().payload, json!("TIMEOUT"));
}

#[tokio::test(start_paused = true)]
async fn idle_session_times_out() {
    let harness = Harness::new(IdCollisionPolicy::Reject);
    let (driver, _handle, mut peer) = harness.spawn(SessionConfig::new("u-1", local_hello()));
    peer.pair("D1", "S1").await;

    assert!(matches!(driver.await.unwrap(), Err(Error::Timeout("idle"))));
    peer.expect(SocketAction::CloseWithError).await;
}

#[tokio::test]
async fn pull_issued_mid_transfer_waits_for_it() {
    let harness = Harness::new(IdCollisionPolicy::Reject);
    let (driver, handle, mut peer) = harness.spawn(SessionConfig::new("u-1", local_hello()));
    peer.pair("D1", "S1").await;

    let sealed = seal_payload(&source_vault(), peer.key()).unwrap();
    let chunks = split_chunks(&sealed, sealed.len().div_ceil(2));
    peer.send(SocketAction::InitTransfer, json!({"totalChunks": 2})).await;
    peer.expect(SocketAction::InitTransferConfirmed).await;
    peer.send(
        SocketAction::TransferChunk,
        json!({"chunkIndex": 0, "data": base64_encode(&chunks[0])}),
    )
    .await;
    peer.expect(SocketAction::TransferChunkConfirmed).await;

    let request = PullRequest::new(PullRequestKind::Vault, "D1");
    let pull = tokio::spawn({
        let handle = handle.clone();
        let request = request.clone();
        async move { handle.pull(request).await }
    });
    settle().await;

    peer.send(
        SocketAction::TransferChunk,
        json!({"chunkIndex": 1, "data": base64_encode(&chunks[1])}),
    )
    .await;
    peer.expect(SocketAction::TransferCompleted).await;

    // The queued pull goes out once the transfer is done.
    let sent = peer.expect(SocketAction::PullRequest).await;
    assert_eq!(sent.id, request.request_id);
    peer.send(
        SocketAction::PullRequestAction,
        json!({"requestId": request.request_id, "status": "CANCEL"}),
    )
    .await;
    peer.expect(SocketAction::PullRequestCompleted).await;
    assert_eq!(pull.await.unwrap().unwrap(), PullOutcome::Cancelled);

    assert_eq!(harness.cache().items("u-1").await.unwrap().len(), 3);
    handle.close(true).unwrap();
    assert_eq!(driver.await.unwrap().unwrap(), CloseReason::Completed);
}

#[tokio::test]
async fn duplicate_pull_id_is_refused() {
    let harness = Harness::new(IdCollisionPolicy::Reject);
    let (driver, handle, mut peer) = harness.spawn(SessionConfig::new("u-1", local_hello()));
    peer.pair("D1", "S1").await;

    let request = PullRequest::new(PullRequestKind::Vault, "D1");
    let first = tokio::spawn({
        let handle = handle.clone();
        let request = request.clone();
        async move { handle.pull(request).await }
    });
    peer.expect(SocketAction::PullRequest).await;

    let second = handle.pull(request.clone()).await;
    assert!(matches!(second, Err(Error::Validation(_))));

    // The first caller still gets its answer.
    peer.send(
        SocketAction::PullRequestAction,
        json!({"requestId": request.request_id, "status": "CANCEL"}),
    )
    .await;
    peer.expect(SocketAction::PullRequestCompleted).await;
    assert_eq!(first.await.unwrap().unwrap(), PullOutcome::Cancelled);

    handle.close(true).unwrap();
    assert_eq!(driver.await.unwrap().unwrap(), CloseReason::Completed);
}
