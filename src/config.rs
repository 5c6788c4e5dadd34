//! Persistent configuration: device identity, upstream URL, and the current
//! network target, all sourced from `appsettings.json` next to the binary.
//!
//! The file is treated as an opaque [`serde_json::Value`] tree rather than a
//! fully typed struct: only `SenderReceiverSet.NCBIP` is ever mutated by this
//! crate, and every other key — however unrelated to provisioning — must
//! survive a write unchanged. Round-tripping through `Value` is what actually
//! guarantees that; a typed struct would silently drop unknown fields.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};

const NCBIP_POINTER: &str = "/SenderReceiverSet/NCBIP";

/// Device identity parsed out of `appsettings.json` for convenience.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub owner_id: String,
    pub upstream_url: String,
}

impl DeviceIdentity {
    /// Hotspot SSID derived from the device id: `NCBEdge_<last6(DID)>`,
    /// where `last6` is taken after stripping non-alphanumeric separators
    /// (e.g. `EDGE-00AB-CD12` -> `EDGE00ABCD12` -> `ABCD12`), not the raw
    /// byte tail of the DID.
    pub fn hotspot_ssid(&self) -> String {
        let alnum: String = self.device_id.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
        let tail = if alnum.len() > 6 { &alnum[alnum.len() - 6..] } else { alnum.as_str() };
        format!("NCBEdge_{tail}")
    }

    /// Bluetooth service UUID derived from the device id: a fixed prefix plus
    /// an 8-hex-digit hash of the full DID.
    pub fn bluetooth_service_uuid(&self) -> String {
        format!("12345678-1234-5678-1234-56789abc{:08x}", hash8(&self.device_id))
    }
}

/// Simple, stable string hash used only for UUID derivation — not a
/// cryptographic hash, just deterministic and cheap (FNV-1a).
fn hash8(s: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for b in s.bytes() {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Live handle on `appsettings.json`: owns the parsed tree and the path it
/// was loaded from, and knows how to re-serialize itself after a targeted
/// mutation.
pub struct AppSettings {
    path: PathBuf,
    tree: Value,
}

impl AppSettings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let raw = std::fs::read_to_string(&path)?;
        let tree: Value = serde_json::from_str(&raw)?;
        Ok(Self { path, tree })
    }

    pub fn device_identity(&self) -> Result<DeviceIdentity> {
        let device_id = self
            .tree
            .get("DeviceId")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::Config("appsettings.json missing DeviceId".to_string()))?
            .to_string();
        let owner_id = self
            .tree
            .get("OwnerId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let upstream_url = self
            .tree
            .get("UpstreamUrl")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(DeviceIdentity { device_id, owner_id, upstream_url })
    }

    pub fn ncbip(&self) -> Option<&str> {
        self.tree.pointer(NCBIP_POINTER).and_then(Value::as_str)
    }

    /// Overwrite `SenderReceiverSet.NCBIP` in place and persist. Every other
    /// key in the tree, known or unknown to this crate, is preserved.
    pub fn set_ncbip(&mut self, ncbip: &str) -> Result<()> {
        if let Some(slot) = self.tree.pointer_mut(NCBIP_POINTER) {
            *slot = Value::String(ncbip.to_string());
        } else {
            let sender_receiver_set = self
                .tree
                .as_object_mut()
                .expect("appsettings.json root is not an object")
                .entry("SenderReceiverSet")
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            sender_receiver_set["NCBIP"] = Value::String(ncbip.to_string());
        }
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        let serialized = serde_json::to_string_pretty(&self.tree)?;
        std::fs::write(&self.path, serialized)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hotspot_ssid_derivation() {
        let id = DeviceIdentity {
            device_id: "EDGE-00AB-CD12".to_string(),
            owner_id: String::new(),
            upstream_url: String::new(),
        };
        assert_eq!(id.hotspot_ssid(), "NCBEdge_ABCD12");
    }

    #[test]
    fn bluetooth_uuid_has_fixed_prefix() {
        let id = DeviceIdentity {
            device_id: "EDGE-00AB-CD12".to_string(),
            owner_id: String::new(),
            upstream_url: String::new(),
        };
        let uuid = id.bluetooth_service_uuid();
        assert!(uuid.starts_with("12345678-1234-5678-1234-56789abc"));
        assert_eq!(uuid.len(), "12345678-1234-5678-1234-56789abc".len() + 8);
    }

    #[test]
    fn set_ncbip_preserves_unrelated_keys() {
        let path = std::env::temp_dir().join(format!("appsettings_test_{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{"DeviceId":"EDGE-1","OwnerId":"owner-1","UpstreamUrl":"https://ncb.example","UnrelatedThing":{"Nested":42},"SenderReceiverSet":{"NCBIP":"10.0.0.1","OtherField":"keep-me"}}"#,
        )
        .unwrap();

        let mut settings = AppSettings::load(&path).unwrap();
        settings.set_ncbip("192.168.1.50").unwrap();

        let reloaded = AppSettings::load(&path).unwrap();
        assert_eq!(reloaded.ncbip(), Some("192.168.1.50"));
        assert_eq!(reloaded.tree.pointer("/UnrelatedThing/Nested").unwrap(), 42);
        assert_eq!(
            reloaded.tree.pointer("/SenderReceiverSet/OtherField").unwrap(),
            "keep-me"
        );

        std::fs::remove_file(&path).ok();
    }
}
