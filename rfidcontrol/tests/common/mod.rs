#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rfidcontrol::cast::MediaItem;
use rfidcontrol::model::Volume;
use rfidcontrol::{
    Card, CardId, CardReader, CastConnector, CastLink, CastStatus, ControlError, Device,
    DeviceBrowser, DeviceRegistry, Hardware, InputLines, JsonCardRegistry, JsonDeviceRegistry,
    MediaLink, OutputLines, PlaybackState, Result, SessionManager,
};
use tokio::sync::mpsc;

/// Delay applied to the calls listed in [`FakeConnector::slow`].
pub const SLOW_CALL: Duration = Duration::from_secs(5);

pub struct FakeLink {
    name: String,
    slow: HashSet<String>,
    pub connected: AtomicBool,
    pub calls: Mutex<Vec<String>>,
    pub state: Mutex<PlaybackState>,
    pub volume: Mutex<Volume>,
}

impl FakeLink {
    pub fn new(name: &str) -> Self {
        Self::with_slow_calls(name, HashSet::new())
    }

    pub fn with_slow_calls(name: &str, slow: HashSet<String>) -> Self {
        Self {
            name: name.to_string(),
            slow,
            connected: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
            state: Mutex::new(PlaybackState::Idle),
            volume: Mutex::new(Volume {
                level: 0.4,
                muted: false,
            }),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, call: &str) -> bool {
        self.calls().iter().any(|c| c == call)
    }

    pub fn set_state(&self, state: PlaybackState) {
        *self.state.lock().unwrap() = state;
    }

    async fn stall(&self, call: &str) {
        if self.slow.contains(call) {
            tokio::time::sleep(SLOW_CALL).await;
        }
    }

    fn record(&self, call: impl Into<String>) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ControlError::Disconnected(self.name.clone()));
        }
        self.calls.lock().unwrap().push(call.into());
        Ok(())
    }
}

#[async_trait]
impl CastLink for FakeLink {
    fn device_name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn load(&self, item: &MediaItem) -> Result<()> {
        self.record(format!("load:{}", item.content_id))?;
        self.set_state(PlaybackState::Playing);
        Ok(())
    }

    async fn queue_insert(&self, items: &[MediaItem]) -> Result<()> {
        let ids: Vec<&str> = items.iter().map(|i| i.content_id.as_str()).collect();
        self.record(format!("queue:{}", ids.join(",")))
    }

    async fn play(&self) -> Result<()> {
        self.record("play")
    }

    async fn pause(&self) -> Result<()> {
        self.record("pause")
    }

    async fn stop(&self) -> Result<()> {
        self.stall("stop").await;
        self.record("stop")
    }

    async fn queue_next(&self) -> Result<()> {
        self.record("next")
    }

    async fn queue_prev(&self) -> Result<()> {
        self.record("prev")
    }

    async fn set_volume(&self, level: f64) -> Result<()> {
        self.record(format!("set_volume:{level:.2}"))?;
        *self.volume.lock().unwrap() = Volume {
            level,
            muted: false,
        };
        Ok(())
    }

    async fn volume(&self) -> Result<Volume> {
        self.stall("volume").await;
        Ok(*self.volume.lock().unwrap())
    }

    async fn media_state(&self) -> Result<PlaybackState> {
        Ok(self.state.lock().unwrap().clone())
    }

    async fn status(&self) -> Result<CastStatus> {
        let volume = *self.volume.lock().unwrap();
        Ok(CastStatus {
            display_name: "Default Media Receiver".to_string(),
            status_text: "Ready To Cast".to_string(),
            media_status: self.state.lock().unwrap().as_str().to_string(),
            media_title: String::new(),
            volume: volume.level,
            muted: volume.muted,
        })
    }

    async fn close(&self) {
        self.calls.lock().unwrap().push("close".to_string());
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// Hands out a fresh [`FakeLink`] per connect.
#[derive(Default)]
pub struct FakeConnector {
    links: Mutex<HashMap<String, Arc<FakeLink>>>,
    pub connects: Mutex<Vec<String>>,
    pub unreachable: Mutex<HashSet<String>>,
    /// Link calls answered after [`SLOW_CALL`].
    pub slow: Mutex<HashSet<String>>,
}

impl FakeConnector {
    pub fn link(&self, name: &str) -> Option<Arc<FakeLink>> {
        self.links.lock().unwrap().get(name).cloned()
    }

    pub fn connects(&self) -> Vec<String> {
        self.connects.lock().unwrap().clone()
    }

    pub fn slow_down(&self, call: &str) {
        self.slow.lock().unwrap().insert(call.to_string());
    }

    pub fn refuse(&self, name: &str) {
        self.unreachable.lock().unwrap().insert(name.to_string());
    }
}

#[async_trait]
impl CastConnector for FakeConnector {
    async fn connect(&self, device: &Device) -> Result<Arc<dyn CastLink>> {
        self.connects.lock().unwrap().push(device.name.clone());
        if self.unreachable.lock().unwrap().contains(&device.name) {
            return Err(ControlError::device_unreachable(
                &device.name,
                "connection refused",
            ));
        }
        let slow = self.slow.lock().unwrap().clone();
        let link = Arc::new(FakeLink::with_slow_calls(&device.name, slow));
        self.links
            .lock()
            .unwrap()
            .insert(device.name.clone(), link.clone());
        Ok(link as Arc<dyn CastLink>)
    }
}

/// Reports a fixed set of receivers, then waits out the sweep.
#[derive(Default)]
pub struct FakeBrowser {
    pub devices: Mutex<Vec<Device>>,
    pub sweeps: AtomicUsize,
}

impl FakeBrowser {
    pub fn with_devices(devices: Vec<Device>) -> Self {
        Self {
            devices: Mutex::new(devices),
            sweeps: AtomicUsize::new(0),
        }
    }

    pub fn sweeps(&self) -> usize {
        self.sweeps.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceBrowser for FakeBrowser {
    async fn sweep(&self, duration: Duration, found: mpsc::Sender<Device>) -> Result<()> {
        self.sweeps.fetch_add(1, Ordering::SeqCst);
        let devices = self.devices.lock().unwrap().clone();
        for device in devices {
            if found.send(device).await.is_err() {
                return Ok(());
            }
        }
        tokio::time::sleep(duration).await;
        Ok(())
    }
}

/// Returns queued ids, then times out.
#[derive(Default)]
pub struct FakeReader {
    pub ids: Mutex<VecDeque<CardId>>,
    pub reads: AtomicUsize,
}

impl FakeReader {
    pub fn push(&self, id: CardId) {
        self.ids.lock().unwrap().push_back(id);
    }
}

#[async_trait]
impl CardReader for FakeReader {
    async fn read_card_id(&self, timeout: Duration) -> Result<CardId> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let next = self.ids.lock().unwrap().pop_front();
        match next {
            Some(id) => Ok(id),
            None => {
                tokio::time::sleep(timeout).await;
                Err(ControlError::timeout("card read"))
            }
        }
    }
}

pub struct FakeInputs {
    pub values: Mutex<Vec<u8>>,
}

impl FakeInputs {
    pub fn new(values: &[u8]) -> Self {
        Self {
            values: Mutex::new(values.to_vec()),
        }
    }

    pub fn set(&self, values: &[u8]) {
        *self.values.lock().unwrap() = values.to_vec();
    }
}

impl InputLines for FakeInputs {
    fn read_values(&self) -> Result<Vec<u8>> {
        Ok(self.values.lock().unwrap().clone())
    }
}

pub struct FakeOutputs {
    pub values: Mutex<Vec<u8>>,
    pub writes: Mutex<Vec<Vec<u8>>>,
}

impl FakeOutputs {
    pub fn new(values: &[u8]) -> Self {
        Self {
            values: Mutex::new(values.to_vec()),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn current(&self) -> Vec<u8> {
        self.values.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }
}

impl OutputLines for FakeOutputs {
    fn write_values(&self, values: &[u8]) -> Result<()> {
        *self.values.lock().unwrap() = values.to_vec();
        self.writes.lock().unwrap().push(values.to_vec());
        Ok(())
    }

    fn read_values(&self) -> Result<Vec<u8>> {
        Ok(self.current())
    }
}

pub struct Rig {
    pub hardware: Hardware,
    pub encoder: Arc<FakeInputs>,
    pub sensor: Arc<FakeInputs>,
    pub leds: Arc<FakeOutputs>,
    pub reset: Arc<FakeOutputs>,
    pub reader: Arc<FakeReader>,
}

pub fn rig() -> Rig {
    let encoder = Arc::new(FakeInputs::new(&[0, 0]));
    let sensor = Arc::new(FakeInputs::new(&[0]));
    let leds = Arc::new(FakeOutputs::new(&[1, 1, 1]));
    let reset = Arc::new(FakeOutputs::new(&[0]));
    let reader = Arc::new(FakeReader::default());
    let hardware = Hardware {
        encoder: encoder.clone(),
        card_sensor: sensor.clone(),
        leds: leds.clone(),
        reader_reset: reset.clone(),
        reader: reader.clone(),
    };
    Rig {
        hardware,
        encoder,
        sensor,
        leds,
        reset,
        reader,
    }
}

pub struct Receivers {
    pub session: Arc<SessionManager>,
    pub devices: Arc<JsonDeviceRegistry>,
    pub connector: Arc<FakeConnector>,
    pub browser: Arc<FakeBrowser>,
}

/// Session manager over a registry file in `dir`, preloaded with `known`.
/// The browser reports `discoverable` on every sweep.
pub fn receivers(dir: &Path, known: Vec<Device>, discoverable: Vec<Device>) -> Receivers {
    let devices = Arc::new(JsonDeviceRegistry::open(dir.join("casts.json")).unwrap());
    for device in known {
        devices.upsert(device).unwrap();
    }
    let connector = Arc::new(FakeConnector::default());
    let browser = Arc::new(FakeBrowser::with_devices(discoverable));
    let session = Arc::new(SessionManager::new(
        devices.clone(),
        connector.clone(),
        browser.clone(),
        Duration::from_millis(300),
    ));
    Receivers {
        session,
        devices,
        connector,
        browser,
    }
}

pub fn device(name: &str, ip: &str) -> Device {
    Device::new(name, ip.parse::<IpAddr>().unwrap(), 8009)
}

pub fn card(id: &str, name: &str, chromecast: &str, links: &[&str]) -> Card {
    Card {
        id: id.to_string(),
        name: name.to_string(),
        media_links: links
            .iter()
            .map(|l| MediaLink {
                link: l.to_string(),
                content_type: "audio/mpeg".to_string(),
            })
            .collect(),
        chromecast: chromecast.to_string(),
        maxvolume: 1.0,
    }
}

pub fn cards(dir: &Path, cards: Vec<Card>) -> Arc<JsonCardRegistry> {
    use rfidcontrol::CardRegistry;
    let registry = Arc::new(JsonCardRegistry::open(dir.join("cards.json")).unwrap());
    for card in cards {
        registry.add(card).unwrap();
    }
    registry
}

/// Polls `condition` every few milliseconds for up to two seconds.
pub async fn wait_for(condition: impl Fn() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
