//! Single live receiver session and bounded discovery sweeps.
//!
//! [`SessionManager`] owns at most one [`CastLink`]. Opening a session to
//! another device closes the current one first; a link found disconnected is
//! reopened lazily on the next command. Discovery runs as one spawned sweep
//! at a time, guarded by an atomic flag.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

use crate::cast::{CastConnector, CastLink, MediaItem};
use crate::discovery::DeviceBrowser;
use crate::errors::{ControlError, Result};
use crate::model::{
    Action, Card, CastStatus, ClientAction, ClientSummary, ControlReply, Device, PlayReport,
    PlaybackState,
};
use crate::registry::DeviceRegistry;

/// Extra time granted to a sweep task over its nominal duration.
const SWEEP_GRACE: Duration = Duration::from_secs(2);

struct Session {
    device: Device,
    link: Arc<dyn CastLink>,
}

/// Resets the discovery flag however the sweep task ends.
struct DiscoveryGuard(Arc<AtomicBool>);

impl Drop for DiscoveryGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SessionManager {
    devices: Arc<dyn DeviceRegistry>,
    connector: Arc<dyn CastConnector>,
    browser: Arc<dyn DeviceBrowser>,
    session: Mutex<Option<Session>>,
    discovering: Arc<AtomicBool>,
    discovery_duration: Duration,
}

impl SessionManager {
    pub fn new(
        devices: Arc<dyn DeviceRegistry>,
        connector: Arc<dyn CastConnector>,
        browser: Arc<dyn DeviceBrowser>,
        discovery_duration: Duration,
    ) -> Self {
        Self {
            devices,
            connector,
            browser,
            session: Mutex::new(None),
            discovering: Arc::new(AtomicBool::new(false)),
            discovery_duration,
        }
    }

    pub fn devices(&self) -> &Arc<dyn DeviceRegistry> {
        &self.devices
    }

    pub fn is_discovering(&self) -> bool {
        self.discovering.load(Ordering::SeqCst)
    }

    /// Starts a sweep with the configured duration.
    pub fn discover(&self) -> bool {
        self.start_discovery(self.discovery_duration)
    }

    /// Spawns one discovery sweep lasting `timeout`.
    ///
    /// Returns false, without side effects, when a sweep is already running.
    pub fn start_discovery(&self, timeout: Duration) -> bool {
        if self
            .discovering
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Discovery already running");
            return false;
        }

        let guard = DiscoveryGuard(self.discovering.clone());
        let devices = self.devices.clone();
        let browser = self.browser.clone();

        tokio::spawn(async move {
            let _guard = guard;
            info!(duration_secs = timeout.as_secs(), "Discovery started");

            let (tx, mut rx) = mpsc::channel::<Device>(16);
            let browse = browser.sweep(timeout, tx);
            let upsert = async {
                let mut count = 0usize;
                while let Some(device) = rx.recv().await {
                    match devices.upsert(device) {
                        Ok(()) => count += 1,
                        Err(e) => error!(error = %e, "Failed to register discovered device"),
                    }
                }
                count
            };

            match tokio::time::timeout(timeout + SWEEP_GRACE, async {
                tokio::join!(browse, upsert)
            })
            .await
            {
                Ok((Ok(()), count)) => info!(updates = count, "Discovery complete"),
                Ok((Err(e), count)) => {
                    warn!(error = %e, updates = count, "Discovery ended with an error")
                }
                Err(_) => warn!("Discovery sweep overran its deadline"),
            }
        });

        true
    }

    /// Plays `card` on its target receiver.
    ///
    /// Fails when the receiver is unknown or unreachable, triggering a
    /// discovery sweep in both cases. Once the receiver is reached, content
    /// failures are only reported in the returned [`PlayReport`].
    pub async fn play_card(&self, card: &Card) -> Result<PlayReport> {
        let Some(device) = self.devices.get_by_name(&card.chromecast) else {
            warn!(card = %card.name, device = %card.chromecast, "Target device not registered");
            self.discover();
            return Err(ControlError::device_not_found(&card.chromecast));
        };

        let link = self.open_session(&device).await?;
        let mut report = PlayReport {
            device: device.name.clone(),
            ..Default::default()
        };

        let mut links = card.media_links.iter();
        let Some(first) = links.next() else {
            warn!(card = %card.name, "Card has no media links");
            return Ok(report);
        };

        let item = MediaItem::from_link(first).with_title(&card.name);
        match link.load(&item).await {
            Ok(()) => report.media_loaded = true,
            Err(e) => {
                error!(card = %card.name, media = %item.content_id, error = %e, "Failed to load media");
                report.errors.push(e.to_string());
            }
        }

        let queued: Vec<MediaItem> = links.map(MediaItem::from_link).collect();
        if !queued.is_empty() {
            match link.queue_insert(&queued).await {
                Ok(()) => report.queued = queued.len(),
                Err(e) => {
                    error!(card = %card.name, error = %e, "Failed to queue media items");
                    report.errors.push(e.to_string());
                }
            }
        }

        info!(
            card = %card.name,
            device = %device.name,
            loaded = report.media_loaded,
            queued = report.queued,
            "Card playing"
        );
        Ok(report)
    }

    /// Returns a connected link to `device`, replacing any other session.
    async fn open_session(&self, device: &Device) -> Result<Arc<dyn CastLink>> {
        let mut session = self.session.lock().await;

        if let Some(current) = session.as_ref() {
            if current.device == *device && current.link.is_connected() {
                debug!(device = %device.name, "Reusing open session");
                return Ok(current.link.clone());
            }
        }

        if let Some(old) = session.take() {
            info!(device = %old.device.name, "Closing previous session");
            old.link.close().await;
        }

        match self.connector.connect(device).await {
            Ok(link) => {
                info!(device = %device.name, "Session opened");
                *session = Some(Session {
                    device: device.clone(),
                    link: link.clone(),
                });
                Ok(link)
            }
            Err(e) => {
                drop(session);
                error!(device = %device.name, error = %e, "Failed to connect");
                self.discover();
                Err(as_unreachable(&device.name, e))
            }
        }
    }

    /// Link of the live session, reconnecting a stale one.
    async fn live_link(&self) -> Result<Arc<dyn CastLink>> {
        let mut session = self.session.lock().await;
        let Some(current) = session.as_mut() else {
            return Err(ControlError::NoSession);
        };
        if current.link.is_connected() {
            return Ok(current.link.clone());
        }

        let device = self
            .devices
            .get_by_name(&current.device.name)
            .unwrap_or_else(|| current.device.clone());
        debug!(device = %device.name, "Reconnecting stale session");
        match self.connector.connect(&device).await {
            Ok(link) => {
                current.device = device;
                current.link = link.clone();
                Ok(link)
            }
            Err(e) => {
                drop(session);
                error!(device = %device.name, error = %e, "Failed to reconnect");
                self.discover();
                Err(as_unreachable(&device.name, e))
            }
        }
    }

    /// Executes a control request against the live session.
    ///
    /// The action name is validated before anything else.
    pub async fn client_control(&self, request: &ClientAction) -> Result<ControlReply> {
        let action: Action = request.action.parse()?;
        if action == Action::SetVolume && !request.volume.is_finite() {
            return Err(ControlError::validation("volume", request.volume));
        }

        let link = self.live_link().await?;
        let result = match action {
            Action::Stop | Action::Pause => {
                if !link.media_state().await?.is_active() {
                    debug!(%action, "Nothing playing, command skipped");
                    return Ok(ControlReply::Skipped);
                }
                if action == Action::Stop {
                    link.stop().await
                } else {
                    link.pause().await
                }
            }
            Action::Play => link.play().await,
            Action::Next => link.queue_next().await,
            Action::Prev => link.queue_prev().await,
            Action::SetVolume => link.set_volume(request.volume.clamp(0.0, 1.0)).await,
            Action::GetVolume => {
                let volume = link.volume().await?;
                debug!(level = volume.level, "Receiver volume");
                return Ok(ControlReply::Volume {
                    level: volume.level,
                    muted: volume.muted,
                });
            }
        };

        match result {
            Ok(()) => {
                debug!(%action, device = %link.device_name(), "Command sent");
                Ok(ControlReply::Done)
            }
            Err(e) => {
                error!(%action, error = %e, "Media control failed");
                Err(e)
            }
        }
    }

    pub async fn control(&self, action: Action) -> Result<ControlReply> {
        self.client_control(&ClientAction::new(action)).await
    }

    pub async fn set_volume(&self, level: f64) -> Result<()> {
        self.client_control(&ClientAction::set_volume(level))
            .await
            .map(|_| ())
    }

    /// Receiver volume level in `0.0..=1.0`.
    pub async fn volume(&self) -> Result<f64> {
        match self.control(Action::GetVolume).await? {
            ControlReply::Volume { level, .. } => Ok(level),
            other => Err(ControlError::protocol(format!(
                "unexpected reply to getvolume: {other:?}"
            ))),
        }
    }

    pub async fn media_state(&self) -> Result<PlaybackState> {
        self.live_link().await?.media_state().await
    }

    /// Snapshot of the live session; the default value without one.
    pub async fn cast_status(&self) -> CastStatus {
        let link = {
            let session = self.session.lock().await;
            match session.as_ref() {
                Some(current) if current.link.is_connected() => current.link.clone(),
                _ => return CastStatus::default(),
            }
        };
        link.status().await.unwrap_or_else(|e| {
            debug!(error = %e, "Cast status unavailable");
            CastStatus::default()
        })
    }

    /// Known receivers sorted by name, with status for the live one.
    pub async fn clients(&self) -> Vec<ClientSummary> {
        let live = self
            .session
            .lock()
            .await
            .as_ref()
            .map(|s| s.device.name.clone());
        let status = match live {
            Some(_) => Some(self.cast_status().await),
            None => None,
        };

        self.devices
            .list()
            .into_iter()
            .map(|device| {
                let mut summary = ClientSummary {
                    name: device.name.clone(),
                    address: device.address.map(|a| a.to_string()).unwrap_or_default(),
                    port: device.port,
                    ..Default::default()
                };
                if let (Some(name), Some(status)) = (&live, &status) {
                    if *name == device.name {
                        summary.status = status.status_text.clone();
                        summary.media_status = status.media_status.clone();
                        summary.media_data = status.media_title.clone();
                        summary.volume = status.volume;
                    }
                }
                summary
            })
            .collect()
    }

    /// Name of the device holding the live session.
    pub async fn current_device(&self) -> Option<String> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.device.name.clone())
    }

    /// Closes the live session, if any.
    pub async fn stop_session(&self) {
        if let Some(old) = self.session.lock().await.take() {
            info!(device = %old.device.name, "Closing session");
            old.link.close().await;
        }
    }
}

fn as_unreachable(name: &str, err: ControlError) -> ControlError {
    match err {
        ControlError::DeviceUnreachable(_, _) => err,
        other => ControlError::device_unreachable(name, other),
    }
}
