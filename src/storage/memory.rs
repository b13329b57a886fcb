use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use super::{Storage, StorageArea};
use crate::error::{Result, StorageError};

/// In-process storage. Used for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    local: RwLock<HashMap<String, Value>>,
    session: RwLock<HashMap<String, Value>>,
    failing: RwLock<HashSet<StorageArea>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn area(&self, area: StorageArea) -> &RwLock<HashMap<String, Value>> {
        match area {
            StorageArea::Local => &self.local,
            StorageArea::Session => &self.session,
        }
    }

    /// Drop everything in one area. Clearing `Session` models a browser
    /// restart.
    pub fn clear_area(&self, area: StorageArea) {
        self.area(area).write().clear();
    }

    /// Make writes to `area` fail until turned off again.
    pub fn set_fail_writes(&self, area: StorageArea, fail: bool) {
        let mut failing = self.failing.write();
        if fail {
            failing.insert(area);
        } else {
            failing.remove(&area);
        }
    }

    pub fn keys(&self, area: StorageArea) -> Vec<String> {
        let mut keys: Vec<String> = self.area(area).read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Every value in both areas, for scanning persisted content in tests.
    pub fn snapshot(&self) -> Vec<(StorageArea, String, Value)> {
        let mut out = Vec::new();
        for area in [StorageArea::Local, StorageArea::Session] {
            for (key, value) in self.area(area).read().iter() {
                out.push((area, key.clone(), value.clone()));
            }
        }
        out
    }

    fn check_writable(&self, area: StorageArea) -> Result<()> {
        if self.failing.read().contains(&area) {
            return Err(StorageError::Backend(format!("{area:?} write rejected")).into());
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, area: StorageArea, key: &str) -> Result<Option<Value>> {
        Ok(self.area(area).read().get(key).cloned())
    }

    async fn set(&self, area: StorageArea, key: &str, value: Value) -> Result<()> {
        self.check_writable(area)?;
        self.area(area).write().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, area: StorageArea, key: &str) -> Result<()> {
        self.check_writable(area)?;
        self.area(area).write().remove(key);
        Ok(())
    }

    async fn remove_many(&self, area: StorageArea, keys: &[String]) -> Result<()> {
        self.check_writable(area)?;
        let mut map = self.area(area).write();
        for key in keys {
            map.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{load, save};
    use serde_json::json;

    #[tokio::test]
    async fn areas_are_separate() {
        let storage = MemoryStorage::new();
        storage.set(StorageArea::Local, "k", json!(1)).await.unwrap();
        storage.set(StorageArea::Session, "k", json!(2)).await.unwrap();

        storage.clear_area(StorageArea::Session);
        assert_eq!(storage.get(StorageArea::Local, "k").await.unwrap(), Some(json!(1)));
        assert_eq!(storage.get(StorageArea::Session, "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn typed_helpers() {
        let storage = MemoryStorage::new();
        save(&storage, StorageArea::Local, "list", &vec!["a", "b"]).await.unwrap();
        let list: Option<Vec<String>> = load(&storage, StorageArea::Local, "list").await.unwrap();
        assert_eq!(list.unwrap(), vec!["a", "b"]);

        storage.set(StorageArea::Local, "bad", json!("x")).await.unwrap();
        let err = load::<Vec<String>>(&storage, StorageArea::Local, "bad").await.unwrap_err();
        assert!(err.to_string().contains("bad"));
    }

    #[tokio::test]
    async fn failing_writes() {
        let storage = MemoryStorage::new();
        storage.set_fail_writes(StorageArea::Local, true);
        assert!(storage.set(StorageArea::Local, "k", json!(1)).await.is_err());
        storage.set(StorageArea::Session, "k", json!(1)).await.unwrap();
        storage.set_fail_writes(StorageArea::Local, false);
        storage.set(StorageArea::Local, "k", json!(1)).await.unwrap();
        storage
            .remove_many(StorageArea::Local, &["k".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert!(storage.keys(StorageArea::Local).is_empty());
    }
}
