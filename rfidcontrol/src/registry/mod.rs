//! Card and device registries.
//!
//! The core only sees the [`CardRegistry`] and [`DeviceRegistry`] traits;
//! the JSON-file implementations persist every write immediately.

mod cards;
mod devices;

pub use cards::JsonCardRegistry;
pub use devices::JsonDeviceRegistry;

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::errors::{ControlError, Result};
use crate::model::{Card, Device};

/// Card id → card lookup.
pub trait CardRegistry: Send + Sync {
    fn get(&self, id: &str) -> Option<Card>;
    fn list(&self) -> HashMap<String, Card>;
    /// Inserts or replaces the card stored under `card.id`.
    fn add(&self, card: Card) -> Result<()>;
    /// Returns false when no card was stored under `id`.
    fn remove(&self, id: &str) -> Result<bool>;
}

/// Receivers known by name.
pub trait DeviceRegistry: Send + Sync {
    fn get_by_name(&self, name: &str) -> Option<Device>;
    /// Snapshot sorted by name.
    fn list(&self) -> Vec<Device>;
    /// Updates the device with the same name in place, or appends it.
    fn upsert(&self, device: Device) -> Result<()>;
    /// Fails when a device with the same name already exists.
    fn add(&self, device: Device) -> Result<()>;
    fn remove(&self, name: &str) -> Result<bool>;
}

/// Reads a JSON file, creating it when missing. An empty file yields the
/// default value.
fn load_json_file<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ControlError::registry(format!("{}: {}", path.display(), e)))?;

    let data = std::fs::read(path)
        .map_err(|e| ControlError::registry(format!("{}: {}", path.display(), e)))?;
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(&data)
        .map_err(|e| ControlError::registry(format!("{}: {}", path.display(), e)))
}

fn save_json_file<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value).map_err(ControlError::registry)?;
    std::fs::write(path, data)
        .map_err(|e| ControlError::registry(format!("{}: {}", path.display(), e)))
}
