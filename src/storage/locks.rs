use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per name, created on first use.
///
/// Serializes read-modify-write sequences against the same storage key.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `name`. Entries nobody holds or waits on are
    /// dropped on the way, so the map only tracks names in use.
    pub async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(name.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of tracked names.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_name_serializes() {
        let locks = Arc::new(KeyLocks::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let guard = locks.lock("d1").await;
        let task = {
            let locks = locks.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("d1").await;
                order.lock().push("second");
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        order.lock().push("first");
        drop(guard);
        task.await.unwrap();

        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn released_names_are_pruned() {
        let locks = KeyLocks::new();
        for i in 0..100 {
            let _guard = locks.lock(&format!("device-{i}")).await;
        }
        let held = locks.lock("held").await;
        assert_eq!(locks.len(), 1);

        drop(held);
        let _other = locks.lock("other").await;
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn different_names_independent() {
        let locks = KeyLocks::new();
        let _a = locks.lock("a").await;
        let _b = locks.lock("b").await;
    }
}
