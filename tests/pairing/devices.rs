use serde_json::json;

use passlink::{Error, IdCollisionPolicy, StorageArea};
use passlink_protocol::{CloseReason, SessionConfig, SocketAction};

use crate::common::{local_hello, peer_hello, Harness};

#[tokio::test]
async fn reconnect_with_new_id_updates_same_record() {
    let harness = Harness::new(IdCollisionPolicy::Reject);

    let (driver, handle, mut peer) = harness.spawn(SessionConfig::new("u-1", local_hello()));
    peer.pair("D1", "S1").await;
    handle.close(true).unwrap();
    assert_eq!(driver.await.unwrap().unwrap(), CloseReason::Completed);

    let (driver, handle, mut peer) = harness.spawn(SessionConfig::new("u-1", local_hello()));
    peer.pair("D1-renamed", "S2").await;
    handle.close(true).unwrap();
    assert_eq!(driver.await.unwrap().unwrap(), CloseReason::Completed);

    let devices = harness.ctx.devices.list().await;
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].uuid, "u-1");
    assert_eq!(devices[0].id, "D1-renamed");
}

#[tokio::test]
async fn colliding_id_rejected_by_default() {
    let harness = Harness::new(IdCollisionPolicy::Reject);
    let (driver, handle, mut peer) = harness.spawn(SessionConfig::new("u-1", local_hello()));
    peer.pair("D1", "S1").await;
    handle.close(true).unwrap();
    driver.await.unwrap().unwrap();

    // A different paired device claims the same id.
    let (driver, _handle, mut peer) = harness.spawn(SessionConfig::new("u-2", local_hello()));
    peer.send(SocketAction::Hello, peer_hello("D1")).await;
    let close = peer.expect(SocketAction::CloseWithError).await;
    assert_eq!(close.payload, json!({}));

    let err = driver.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::DeviceCollision { ref existing_uuid, .. } if existing_uuid == "u-1"));
    let devices = harness.ctx.devices.list().await;
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].uuid, "u-1");
}

#[tokio::test]
async fn colliding_id_overwrites_when_configured() {
    let harness = Harness::new(IdCollisionPolicy::Overwrite);
    let (driver, handle, mut peer) = harness.spawn(SessionConfig::new("u-1", local_hello()));
    peer.pair("D1", "S1").await;
    handle.close(true).unwrap();
    driver.await.unwrap().unwrap();

    let (driver, handle, mut peer) = harness.spawn(SessionConfig::new("u-2", local_hello()));
    peer.pair("D1", "S2").await;
    handle.close(true).unwrap();
    driver.await.unwrap().unwrap();

    let devices = harness.ctx.devices.list().await;
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].uuid, "u-2");
    assert_eq!(devices[0].id, "D1");
}

#[tokio::test]
async fn unpair_forgets_device_and_cache() {
    let harness = Harness::new(IdCollisionPolicy::Reject);
    let (driver, handle, mut peer) = harness.spawn(SessionConfig::new("u-1", local_hello()));
    peer.pair("D1", "S1").await;
    handle.close(true).unwrap();
    driver.await.unwrap().unwrap();

    harness.cache().forget_device("u-1").await.unwrap();
    assert!(harness.ctx.devices.remove("u-1").await.unwrap());

    assert!(harness.ctx.devices.list().await.is_empty());
    assert!(harness.ctx.keystore.load("u-1").await.unwrap().is_none());
    assert!(harness
        .storage
        .keys(StorageArea::Local)
        .iter()
        .all(|key| !key.contains("u-1")));
}
