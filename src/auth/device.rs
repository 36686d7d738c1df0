// Device description sent with refresh requests

use anyhow::Result;
use serde::Serialize;
use uuid::Uuid;

use crate::store::KeyValueStore;

/// Store key for the stable per-installation device id
pub const DEVICE_ID_KEY: &str = "device_id";

/// `deviceInfo` payload of the refresh endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_id: String,
    pub fingerprint: String,
    pub platform: String,
    pub client_version: String,
}

impl DeviceInfo {
    /// Describe this machine, creating and persisting a device id on first use
    pub fn detect(store: &dyn KeyValueStore) -> Result<Self> {
        Ok(Self {
            device_id: load_or_create_device_id(store)?,
            fingerprint: machine_fingerprint(),
            platform: std::env::consts::OS.to_string(),
            client_version: client_version(),
        })
    }

    /// Description with a throwaway device id, for when the store is unusable
    pub fn ephemeral() -> Self {
        Self {
            device_id: Uuid::new_v4().to_string(),
            fingerprint: machine_fingerprint(),
            platform: std::env::consts::OS.to_string(),
            client_version: client_version(),
        }
    }
}

fn client_version() -> String {
    format!("taskdeck-session/{}", env!("CARGO_PKG_VERSION"))
}

fn load_or_create_device_id(store: &dyn KeyValueStore) -> Result<String> {
    if let Some(id) = store.get(DEVICE_ID_KEY)? {
        if !id.is_empty() {
            return Ok(id);
        }
    }

    let id = Uuid::new_v4().to_string();
    store.set(DEVICE_ID_KEY, &id)?;
    tracing::debug!("Registered new device id: {}", id);
    Ok(id)
}

/// Hash of the hostname, so the raw name never leaves the machine
fn machine_fingerprint() -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    let mut hasher = DefaultHasher::new();
    hostname.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}
