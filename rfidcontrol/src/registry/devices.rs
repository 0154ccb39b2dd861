use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info};

use super::{DeviceRegistry, load_json_file, save_json_file};
use crate::errors::{ControlError, Result};
use crate::model::Device;

/// Receivers stored as a JSON array.
#[derive(Debug)]
pub struct JsonDeviceRegistry {
    path: PathBuf,
    devices: Mutex<Vec<Device>>,
}

impl JsonDeviceRegistry {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let devices: Vec<Device> = load_json_file(&path)?;
        info!(file = %path.display(), count = devices.len(), "Device registry loaded");
        Ok(Self {
            path,
            devices: Mutex::new(devices),
        })
    }

    fn devices(&self) -> MutexGuard<'_, Vec<Device>> {
        self.devices.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DeviceRegistry for JsonDeviceRegistry {
    fn get_by_name(&self, name: &str) -> Option<Device> {
        self.devices().iter().find(|d| d.name == name).cloned()
    }

    fn list(&self) -> Vec<Device> {
        let mut devices = self.devices().clone();
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        devices
    }

    fn upsert(&self, device: Device) -> Result<()> {
        device.validate()?;
        let mut devices = self.devices();
        match devices.iter_mut().find(|d| d.name == device.name) {
            Some(existing) => {
                debug!(device = %device.name, "Updating device");
                *existing = device;
            }
            None => {
                info!(device = %device.name, "New device registered");
                devices.push(device);
            }
        }
        save_json_file(&self.path, &*devices)
    }

    fn add(&self, device: Device) -> Result<()> {
        device.validate()?;
        let mut devices = self.devices();
        if devices.iter().any(|d| d.name == device.name) {
            return Err(ControlError::validation(
                "device",
                format!("{} already exists", device.name),
            ));
        }
        devices.push(device);
        save_json_file(&self.path, &*devices)
    }

    fn remove(&self, name: &str) -> Result<bool> {
        let mut devices = self.devices();
        let before = devices.len();
        devices.retain(|d| d.name != name);
        if devices.len() == before {
            return Ok(false);
        }
        save_json_file(&self.path, &*devices)?;
        Ok(true)
    }
}
