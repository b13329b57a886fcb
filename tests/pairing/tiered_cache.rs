use std::sync::Arc;
use std::time::Duration;

use passlink::protocol::HelloPayload;
use passlink::{
    ChannelMessenger, IdCollisionPolicy, ItemSecrets, KeepPasswordState, Passlink,
    PasslinkConfig, SecurityTier, StorageArea, Vault,
};

use crate::common::{login, peer_hello, settle, Harness, RETENTION};

fn vault(values: Vec<serde_json::Value>) -> Vault {
    serde_json::from_value(serde_json::json!({
        "id": "v1",
        "name": "Personal",
        "items": values,
        "tags": []
    }))
    .unwrap()
}

fn keep(item_id: &str, password: &str) -> KeepPasswordState {
    KeepPasswordState {
        device_uuid: "u-1".into(),
        item_id: item_id.into(),
        secrets: ItemSecrets::password(password),
    }
}

async fn cached_password(harness: &Harness, item_id: &str) -> Option<String> {
    harness
        .cache()
        .decrypted_items("u-1")
        .await
        .unwrap()
        .into_iter()
        .find(|item| item.id() == item_id)
        .and_then(|item| item.secrets().password.clone())
}

/// Harness with the alarm loop running.
fn running() -> Harness {
    let mut harness = Harness::new(IdCollisionPolicy::Reject);
    let fired = harness.fired.take().unwrap();
    tokio::spawn(harness.cache().run_alarms(fired));
    harness
}

#[tokio::test(start_paused = true)]
async fn highly_secret_forgotten_after_retention() {
    let harness = running();
    let cache = harness.cache();
    cache
        .replace_vault("u-1", vault(vec![login("high", 1, 1, "")]))
        .await
        .unwrap();
    cache.keep_password(keep("high", "h1gh")).await.unwrap();
    assert_eq!(cached_password(&harness, "high").await.as_deref(), Some("h1gh"));

    tokio::time::advance(RETENTION - Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(cached_password(&harness, "high").await.as_deref(), Some("h1gh"));

    tokio::time::advance(Duration::from_secs(2)).await;
    settle().await;
    assert_eq!(cached_password(&harness, "high").await, None);
    assert_eq!(cache.pending_alarms(), 0);
    assert!(harness.storage.keys(StorageArea::Session).is_empty());
    let stored = cache.items("u-1").await.unwrap();
    assert!(stored[0].meta().sealed_secret.is_none());
}

#[tokio::test(start_paused = true)]
async fn rekeep_restarts_the_window() {
    let harness = running();
    let cache = harness.cache();
    cache
        .replace_vault("u-1", vault(vec![login("high", 1, 1, "")]))
        .await
        .unwrap();
    cache.keep_password(keep("high", "first")).await.unwrap();

    tokio::time::advance(Duration::from_secs(100)).await;
    settle().await;
    cache.keep_password(keep("high", "second")).await.unwrap();
    assert_eq!(harness.alarms.pending(), 1);

    // Past the first alarm's original deadline.
    tokio::time::advance(Duration::from_secs(100)).await;
    settle().await;
    assert_eq!(cached_password(&harness, "high").await.as_deref(), Some("second"));

    tokio::time::advance(Duration::from_secs(81)).await;
    settle().await;
    assert_eq!(cached_password(&harness, "high").await, None);
}

#[tokio::test(start_paused = true)]
async fn reset_cancels_pending_alarm() {
    let harness = running();
    let cache = harness.cache();
    cache
        .replace_vault("u-1", vault(vec![login("high", 1, 1, "")]))
        .await
        .unwrap();
    cache.keep_password(keep("high", "h1gh")).await.unwrap();
    cache.password_reset("u-1", "high").await.unwrap();
    assert_eq!(harness.alarms.pending(), 0);

    // Re-reveal after the reset; the cancelled alarm must not take it.
    cache.keep_password(keep("high", "again")).await.unwrap();
    tokio::time::advance(RETENTION - Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(cached_password(&harness, "high").await.as_deref(), Some("again"));
}

#[tokio::test]
async fn top_secret_never_persisted() {
    let harness = running();
    let cache = harness.cache();
    cache
        .replace_vault("u-1", vault(vec![login("top", 0, 1, "t0p-secret"), login("low", 2, 1, "l0w")]),
        )
        .await
        .unwrap();
    assert!(cache.keep_password(keep("top", "t0p-secret")).await.is_err());

    for item in cache.decrypted_items("u-1").await.unwrap() {
        if item.tier() == SecurityTier::TopSecret {
            assert!(!item.has_plaintext_secret());
            assert!(item.meta().sealed_secret.is_none());
        }
    }
    assert_eq!(cached_password(&harness, "low").await.as_deref(), Some("l0w"));
}

#[tokio::test]
async fn browser_restart_drops_revealed_secrets() {
    let harness = running();
    let cache = harness.cache();
    cache
        .replace_vault("u-1", vault(vec![login("high", 1, 1, ""), login("low", 2, 1, "l0w")]))
        .await
        .unwrap();
    cache.keep_password(keep("high", "h1gh")).await.unwrap();

    harness.storage.clear_area(StorageArea::Session);
    assert_eq!(cached_password(&harness, "high").await, None);
    assert_eq!(cached_password(&harness, "low").await.as_deref(), Some("l0w"));
}

#[tokio::test(start_paused = true)]
async fn failed_auto_forget_is_retried() {
    let harness = running();
    let cache = harness.cache();
    cache
        .replace_vault("u-1", vault(vec![login("high", 1, 1, "")]))
        .await
        .unwrap();
    cache.keep_password(keep("high", "h1gh")).await.unwrap();

    harness.storage.set_fail_writes(StorageArea::Local, true);
    tokio::time::advance(RETENTION + Duration::from_secs(1)).await;
    settle().await;

    // The item key is gone even though the vault could not be rewritten.
    assert_eq!(cached_password(&harness, "high").await, None);
    assert!(harness.storage.keys(StorageArea::Session).is_empty());
    assert_eq!(cache.pending_alarms(), 1);
    assert!(cache.items("u-1").await.unwrap()[0].meta().sealed_secret.is_some());

    harness.storage.set_fail_writes(StorageArea::Local, false);
    tokio::time::advance(Duration::from_secs(11)).await;
    settle().await;
    assert_eq!(cache.pending_alarms(), 0);
    assert_eq!(harness.alarms.pending(), 0);
    assert!(cache.items("u-1").await.unwrap()[0].meta().sealed_secret.is_none());
}

#[tokio::test]
async fn restart_sweeps_orphaned_secrets() {
    let harness = running();
    let hello: HelloPayload = serde_json::from_value(peer_hello("D1")).unwrap();
    harness.ctx.devices.device_update("u-1", &hello).await.unwrap();
    let cache = harness.cache();
    cache
        .replace_vault("u-1", vault(vec![login("high", 1, 1, ""), login("low", 2, 1, "l0w")]))
        .await
        .unwrap();
    cache.keep_password(keep("high", "h1gh")).await.unwrap();

    // Browser restart: session storage and alarms are gone.
    harness.storage.clear_area(StorageArea::Session);
    let (messenger, _messages) = ChannelMessenger::new();
    let restarted = Passlink::new(
        &PasslinkConfig::default(),
        harness.identity.clone(),
        harness.storage.clone(),
        Arc::new(messenger),
    );
    let alarms = restarted.start().await.unwrap();

    let items = restarted.context().cache.items("u-1").await.unwrap();
    assert!(items.iter().all(|item| item.meta().sealed_secret.is_none()));
    assert_eq!(items[1].secrets().password.as_deref(), Some("l0w"));
    alarms.abort();
}
