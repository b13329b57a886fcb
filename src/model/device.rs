use serde::{Deserialize, Serialize};

use passlink_protocol::{HelloPayload, VaultRef};

/// A paired peer, persisted under the `devices` key.
///
/// `uuid` is assigned locally at first pairing and never changes; `id` is
/// whatever the peer currently calls itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub uuid: String,
    pub name: String,
    pub platform: String,
    /// Epoch milliseconds.
    pub updated_at: i64,
    #[serde(default)]
    pub vaults: Vec<VaultRef>,
}

impl Device {
    pub fn from_hello(uuid: impl Into<String>, hello: &HelloPayload) -> Self {
        Self {
            id: hello.device_id.clone(),
            uuid: uuid.into(),
            name: hello.name.clone(),
            platform: hello.platform.clone(),
            updated_at: chrono::Utc::now().timestamp_millis(),
            vaults: hello.vaults.clone(),
        }
    }

    /// Refresh the peer-supplied fields from a new `HELLO`.
    pub fn apply_hello(&mut self, hello: &HelloPayload) {
        self.id = hello.device_id.clone();
        self.name = hello.name.clone();
        self.platform = hello.platform.clone();
        self.vaults = hello.vaults.clone();
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_from_hello() {
        let hello: HelloPayload = serde_json::from_value(serde_json::json!({
            "deviceId": "D1",
            "name": "Pixel",
            "platform": "android",
            "vaults": [{"id": "v1", "name": "Personal"}]
        }))
        .unwrap();
        let mut device = Device::from_hello("u-1", &hello);
        assert_eq!(device.id, "D1");
        assert_eq!(device.vaults.len(), 1);
        assert!(device.updated_at > 0);

        let renamed = HelloPayload {
            device_id: "D2".into(),
            vaults: vec![],
            ..hello
        };
        device.apply_hello(&renamed);
        assert_eq!(device.uuid, "u-1");
        assert_eq!(device.id, "D2");
        assert!(device.vaults.is_empty());

        let json = serde_json::to_value(&device).unwrap();
        assert!(json.get("updatedAt").is_some());
    }
}
