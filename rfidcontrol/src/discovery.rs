//! Cast receiver discovery over mDNS.
//!
//! Receivers announce `_googlecast._tcp.local.`; the TXT record carries the
//! friendly name (`fn`), model (`md`) and a stable id (`id`).

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, trace, warn};

use crate::cast::DEFAULT_CAST_PORT;
use crate::errors::{ControlError, Result};
use crate::model::Device;

pub const CAST_SERVICE_TYPE: &str = "_googlecast._tcp.local.";

/// One bounded discovery run.
#[async_trait]
pub trait DeviceBrowser: Send + Sync {
    /// Sends every receiver seen to `found` until `duration` has elapsed.
    ///
    /// The sender is dropped when the sweep ends.
    async fn sweep(&self, duration: Duration, found: mpsc::Sender<Device>) -> Result<()>;
}

/// [`DeviceBrowser`] backed by the `mdns-sd` daemon.
#[derive(Debug, Default, Clone)]
pub struct MdnsBrowser;

impl MdnsBrowser {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DeviceBrowser for MdnsBrowser {
    async fn sweep(&self, duration: Duration, found: mpsc::Sender<Device>) -> Result<()> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| ControlError::protocol(format!("mDNS daemon failed to start: {e}")))?;
        let events = match daemon.browse(CAST_SERVICE_TYPE) {
            Ok(events) => events,
            Err(e) => {
                let _ = daemon.shutdown();
                return Err(ControlError::protocol(format!("mDNS browse failed: {e}")));
            }
        };

        let deadline = Instant::now() + duration;
        loop {
            match timeout_at(deadline, events.recv_async()).await {
                Err(_) => break,
                Ok(Err(e)) => {
                    warn!(error = %e, "mDNS browse channel closed");
                    break;
                }
                Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                    let Some(device) = device_from_service(&info) else {
                        debug!(service = %info.get_fullname(), "Cast service without IPv4 address");
                        continue;
                    };
                    debug!(device = %device.name, address = ?device.address, "Cast receiver resolved");
                    if found.send(device).await.is_err() {
                        break;
                    }
                }
                Ok(Ok(event)) => trace!(?event, "mDNS event"),
            }
        }

        if let Err(e) = daemon.stop_browse(CAST_SERVICE_TYPE) {
            debug!(error = %e, "Failed to stop mDNS browse cleanly");
        }
        let _ = daemon.shutdown();
        Ok(())
    }
}

/// Instance name from a full service name, `"Kitchen._googlecast._tcp.local."` → `"Kitchen"`.
pub fn instance_name(fullname: &str) -> String {
    let trimmed = fullname.trim();
    trimmed
        .strip_suffix(&format!(".{CAST_SERVICE_TYPE}"))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(trimmed)
        .trim_matches('.')
        .to_string()
}

/// Builds a registry entry from a resolved service. Needs an IPv4 address.
pub fn device_from_service(info: &ServiceInfo) -> Option<Device> {
    let address = info.get_addresses_v4().into_iter().min().copied()?;

    let properties: HashMap<String, String> = info
        .get_properties()
        .iter()
        .map(|p| (p.key().to_string(), p.val_str().to_string()))
        .collect();

    let name = info
        .get_property_val_str("fn")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| instance_name(info.get_fullname()));

    let port = match info.get_port() {
        0 => DEFAULT_CAST_PORT,
        port => port,
    };

    Some(Device {
        name,
        address: Some(IpAddr::V4(address)),
        port,
        info: properties,
    })
}
