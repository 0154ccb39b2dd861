use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::frame::{CastMessage, MAX_FRAME_LEN};
use super::tls::receiver_tls_config;
use super::{
    CastConnector, CastLink, DEFAULT_MEDIA_RECEIVER_APP_ID, MediaItem, NAMESPACE_CONNECTION,
    NAMESPACE_HEARTBEAT, NAMESPACE_MEDIA, NAMESPACE_RECEIVER,
};
use crate::errors::{ControlError, Result};
use crate::model::{CastStatus, Device, PlaybackState, Volume};

const RECEIVER_ID: &str = "receiver-0";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Reply types reporting a failed request.
const ERROR_REPLIES: &[&str] = &[
    "LAUNCH_ERROR",
    "LOAD_FAILED",
    "LOAD_CANCELLED",
    "INVALID_REQUEST",
    "INVALID_PLAYER_STATE",
    "INVALID_MEDIA_SESSION_ID",
];

type Stream = TlsStream<TcpStream>;

/// Receiver and media state as last reported by the receiver.
#[derive(Debug, Default)]
struct LinkState {
    transport_id: Option<String>,
    session_id: Option<String>,
    media_session_id: Option<i64>,
    player_state: PlaybackState,
    media_title: String,
    display_name: String,
    status_text: String,
    volume: Volume,
}

impl LinkState {
    fn apply_receiver_status(&mut self, payload: &Value) {
        let status = &payload["status"];
        if let Some(level) = status["volume"]["level"].as_f64() {
            self.volume.level = level;
        }
        if let Some(muted) = status["volume"]["muted"].as_bool() {
            self.volume.muted = muted;
        }

        let app = status["applications"].as_array().and_then(|apps| {
            apps.iter()
                .find(|app| app["appId"].as_str() == Some(DEFAULT_MEDIA_RECEIVER_APP_ID))
        });
        match app {
            Some(app) => {
                self.transport_id = app["transportId"].as_str().map(str::to_string);
                self.session_id = app["sessionId"].as_str().map(str::to_string);
                self.display_name = app["displayName"].as_str().unwrap_or_default().to_string();
                self.status_text = app["statusText"].as_str().unwrap_or_default().to_string();
            }
            None if status.get("applications").is_some() => {
                self.transport_id = None;
                self.session_id = None;
                self.media_session_id = None;
                self.player_state = PlaybackState::Idle;
                self.display_name.clear();
                self.status_text.clear();
            }
            None => {}
        }
    }

    fn apply_media_status(&mut self, payload: &Value) {
        let Some(entries) = payload["status"].as_array() else {
            return;
        };
        match entries.first() {
            Some(entry) => {
                if let Some(id) = entry["mediaSessionId"].as_i64() {
                    self.media_session_id = Some(id);
                }
                if let Some(state) = entry["playerState"].as_str() {
                    self.player_state = PlaybackState::from_cast_state(state);
                }
                if let Some(title) = entry["media"]["metadata"]["title"].as_str() {
                    self.media_title = title.to_string();
                }
            }
            None => {
                self.media_session_id = None;
                self.player_state = PlaybackState::Idle;
            }
        }
    }
}

struct Shared {
    device_name: String,
    sender_id: String,
    writer: tokio::sync::Mutex<WriteHalf<Stream>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
    state: Mutex<LinkState>,
    next_request_id: AtomicU64,
    connected: AtomicBool,
    cancel: CancellationToken,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Value>>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn disconnected(&self) -> ControlError {
        ControlError::Disconnected(self.device_name.clone())
    }

    fn mark_disconnected(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            debug!(device = %self.device_name, "Cast link closed");
        }
        // Dropping the senders wakes every waiting request.
        self.pending().clear();
        self.cancel.cancel();
    }

    async fn send(&self, destination: &str, namespace: &str, payload: &Value) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(self.disconnected());
        }
        let frame =
            CastMessage::new(&self.sender_id, destination, namespace, payload.to_string())
                .encode()?;
        trace!(device = %self.device_name, namespace, %payload, "Cast send");

        let mut writer = self.writer.lock().await;
        let written = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            warn!(device = %self.device_name, error = %e, "Cast write failed");
            drop(writer);
            self.mark_disconnected();
            return Err(self.disconnected());
        }
        Ok(())
    }

    async fn request(&self, destination: &str, namespace: &str, mut payload: Value) -> Result<Value> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        payload["requestId"] = json!(request_id);
        let kind = payload["type"].as_str().unwrap_or("request").to_string();

        let (tx, rx) = oneshot::channel();
        self.pending().insert(request_id, tx);

        if let Err(e) = self.send(destination, namespace, &payload).await {
            self.pending().remove(&request_id);
            return Err(e);
        }

        let reply = match timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(self.disconnected()),
            Err(_) => {
                self.pending().remove(&request_id);
                return Err(ControlError::timeout(&format!("cast {kind}")));
            }
        };

        let reply_type = reply["type"].as_str().unwrap_or_default();
        if ERROR_REPLIES.contains(&reply_type) {
            let reason = reply["reason"].as_str().unwrap_or("no reason given");
            return Err(ControlError::protocol(format!(
                "{kind} rejected with {reply_type}: {reason}"
            )));
        }
        Ok(reply)
    }

    async fn dispatch(&self, message: CastMessage) {
        let payload: Value = match serde_json::from_str(&message.payload) {
            Ok(value) => value,
            Err(e) => {
                debug!(namespace = %message.namespace, error = %e, "Ignoring non-JSON cast payload");
                return;
            }
        };
        trace!(device = %self.device_name, namespace = %message.namespace, %payload, "Cast receive");

        match (message.namespace.as_str(), payload["type"].as_str()) {
            (NAMESPACE_HEARTBEAT, Some("PING")) => {
                if let Err(e) = self
                    .send(&message.source_id, NAMESPACE_HEARTBEAT, &json!({"type": "PONG"}))
                    .await
                {
                    debug!(error = %e, "Failed to answer PING");
                }
                return;
            }
            (NAMESPACE_RECEIVER, Some("RECEIVER_STATUS")) => {
                self.state().apply_receiver_status(&payload);
            }
            (NAMESPACE_MEDIA, Some("MEDIA_STATUS")) => {
                self.state().apply_media_status(&payload);
            }
            (NAMESPACE_CONNECTION, Some("CLOSE")) => {
                let mut state = self.state();
                if state.transport_id.as_deref() == Some(message.source_id.as_str()) {
                    debug!(device = %self.device_name, "Receiver application closed the channel");
                    state.transport_id = None;
                    state.session_id = None;
                    state.media_session_id = None;
                    state.player_state = PlaybackState::Idle;
                }
            }
            _ => {}
        }

        if let Some(request_id) = payload["requestId"].as_u64().filter(|id| *id != 0) {
            if let Some(tx) = self.pending().remove(&request_id) {
                let _ = tx.send(payload);
            }
        }
    }
}

async fn read_frame(reader: &mut ReadHalf<Stream>) -> Result<CastMessage> {
    let len = reader
        .read_u32()
        .await
        .map_err(|e| ControlError::protocol(format!("read failed: {e}")))? as usize;
    if len > MAX_FRAME_LEN {
        return Err(ControlError::protocol(format!("frame of {len} bytes refused")));
    }
    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| ControlError::protocol(format!("read failed: {e}")))?;
    CastMessage::decode(&body)
}

async fn read_loop(shared: Arc<Shared>, mut reader: ReadHalf<Stream>) {
    loop {
        let frame = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            frame = read_frame(&mut reader) => frame,
        };
        match frame {
            Ok(message) => shared.dispatch(message).await,
            Err(e) => {
                debug!(device = %shared.device_name, error = %e, "Cast reader stopped");
                break;
            }
        }
    }
    shared.mark_disconnected();
}

async fn heartbeat_loop(shared: Arc<Shared>) {
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = ticker.tick() => {
                if shared
                    .send(RECEIVER_ID, NAMESPACE_HEARTBEAT, &json!({"type": "PING"}))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    }
}

/// Cast v2 connection to one receiver running the Default Media Receiver.
pub struct CastClient {
    shared: Arc<Shared>,
}

impl CastClient {
    /// Connects, launches (or joins) the media receiver application and
    /// opens its transport channel.
    pub async fn connect(device: &Device) -> Result<Self> {
        let name = device.name.as_str();
        let address = device
            .address
            .ok_or_else(|| ControlError::device_unreachable(name, "no address"))?;
        let socket = SocketAddr::new(address, device.port);

        let tcp = timeout(CONNECT_TIMEOUT, TcpStream::connect(socket))
            .await
            .map_err(|_| ControlError::device_unreachable(name, "connect timed out"))?
            .map_err(|e| ControlError::device_unreachable(name, e))?;
        let _ = tcp.set_nodelay(true);

        let connector = TlsConnector::from(receiver_tls_config()?);
        let stream = timeout(
            CONNECT_TIMEOUT,
            connector.connect(ServerName::IpAddress(address.into()), tcp),
        )
        .await
        .map_err(|_| ControlError::device_unreachable(name, "TLS handshake timed out"))?
        .map_err(|e| ControlError::device_unreachable(name, e))?;

        let (reader, writer) = tokio::io::split(stream);
        let shared = Arc::new(Shared {
            device_name: device.name.clone(),
            sender_id: format!("sender-{}", uuid::Uuid::new_v4().simple()),
            writer: tokio::sync::Mutex::new(writer),
            pending: Mutex::new(HashMap::new()),
            state: Mutex::new(LinkState::default()),
            next_request_id: AtomicU64::new(1),
            connected: AtomicBool::new(true),
            cancel: CancellationToken::new(),
        });
        tokio::spawn(read_loop(shared.clone(), reader));
        tokio::spawn(heartbeat_loop(shared.clone()));

        let client = CastClient { shared };
        client
            .shared
            .send(RECEIVER_ID, NAMESPACE_CONNECTION, &json!({"type": "CONNECT", "origin": {}}))
            .await?;
        if let Err(e) = client.join_media_receiver().await {
            client.shared.mark_disconnected();
            return Err(e);
        }
        debug!(device = %name, %socket, "Connected to cast receiver");
        Ok(client)
    }

    async fn join_media_receiver(&self) -> Result<()> {
        let status = self
            .shared
            .request(RECEIVER_ID, NAMESPACE_RECEIVER, json!({"type": "GET_STATUS"}))
            .await?;
        self.shared.state().apply_receiver_status(&status);

        if self.shared.state().transport_id.is_none() {
            debug!(device = %self.shared.device_name, "Launching default media receiver");
            let status = self
                .shared
                .request(
                    RECEIVER_ID,
                    NAMESPACE_RECEIVER,
                    json!({"type": "LAUNCH", "appId": DEFAULT_MEDIA_RECEIVER_APP_ID}),
                )
                .await?;
            self.shared.state().apply_receiver_status(&status);
        }

        let transport = self.transport_id()?;
        self.shared
            .send(&transport, NAMESPACE_CONNECTION, &json!({"type": "CONNECT", "origin": {}}))
            .await
    }

    fn transport_id(&self) -> Result<String> {
        self.shared
            .state()
            .transport_id
            .clone()
            .ok_or_else(|| ControlError::protocol("media receiver is not running"))
    }

    async fn media_session_id(&self, transport: &str) -> Result<i64> {
        if let Some(id) = self.shared.state().media_session_id {
            return Ok(id);
        }
        let status = self
            .shared
            .request(transport, NAMESPACE_MEDIA, json!({"type": "GET_STATUS"}))
            .await?;
        self.shared.state().apply_media_status(&status);
        self.shared
            .state()
            .media_session_id
            .ok_or_else(|| ControlError::protocol("no media session"))
    }

    async fn media_command(&self, kind: &str, extra: Value) -> Result<()> {
        let transport = self.transport_id()?;
        let media_session_id = self.media_session_id(&transport).await?;
        let mut payload = json!({"type": kind, "mediaSessionId": media_session_id});
        if let (Some(target), Value::Object(fields)) = (payload.as_object_mut(), extra) {
            target.extend(fields);
        }
        self.shared
            .request(&transport, NAMESPACE_MEDIA, payload)
            .await
            .map(|_| ())
    }

    async fn receiver_status(&self) -> Result<()> {
        let status = self
            .shared
            .request(RECEIVER_ID, NAMESPACE_RECEIVER, json!({"type": "GET_STATUS"}))
            .await?;
        self.shared.state().apply_receiver_status(&status);
        Ok(())
    }

    async fn refresh_media_status(&self) -> Result<()> {
        let Some(transport) = self.shared.state().transport_id.clone() else {
            return Ok(());
        };
        let status = self
            .shared
            .request(&transport, NAMESPACE_MEDIA, json!({"type": "GET_STATUS"}))
            .await?;
        self.shared.state().apply_media_status(&status);
        Ok(())
    }
}

impl Drop for CastClient {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

#[async_trait]
impl CastLink for CastClient {
    fn device_name(&self) -> &str {
        &self.shared.device_name
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn load(&self, item: &MediaItem) -> Result<()> {
        let transport = self.transport_id()?;
        let session_id = self.shared.state().session_id.clone();
        let payload = json!({
            "type": "LOAD",
            "sessionId": session_id,
            "media": item,
            "autoplay": true,
            "currentTime": 0,
        });
        let reply = self
            .shared
            .request(&transport, NAMESPACE_MEDIA, payload)
            .await?;
        self.shared.state().apply_media_status(&reply);
        Ok(())
    }

    async fn queue_insert(&self, items: &[MediaItem]) -> Result<()> {
        let items: Vec<Value> = items
            .iter()
            .map(|media| {
                json!({
                    "media": media,
                    "autoplay": true,
                    "startTime": 0,
                    "preloadTime": 5,
                })
            })
            .collect();
        self.media_command("QUEUE_INSERT", json!({"items": items}))
            .await
    }

    async fn play(&self) -> Result<()> {
        self.media_command("PLAY", json!({})).await
    }

    async fn pause(&self) -> Result<()> {
        self.media_command("PAUSE", json!({})).await
    }

    async fn stop(&self) -> Result<()> {
        self.media_command("STOP", json!({})).await
    }

    async fn queue_next(&self) -> Result<()> {
        self.media_command("QUEUE_UPDATE", json!({"jump": 1})).await
    }

    async fn queue_prev(&self) -> Result<()> {
        self.media_command("QUEUE_UPDATE", json!({"jump": -1})).await
    }

    async fn set_volume(&self, level: f64) -> Result<()> {
        let level = level.clamp(0.0, 1.0);
        self.shared
            .request(
                RECEIVER_ID,
                NAMESPACE_RECEIVER,
                json!({"type": "SET_VOLUME", "volume": {"level": level}}),
            )
            .await?;
        let reply = self
            .shared
            .request(
                RECEIVER_ID,
                NAMESPACE_RECEIVER,
                json!({"type": "SET_VOLUME", "volume": {"muted": false}}),
            )
            .await?;
        self.shared.state().apply_receiver_status(&reply);
        Ok(())
    }

    async fn volume(&self) -> Result<Volume> {
        self.receiver_status().await?;
        Ok(self.shared.state().volume)
    }

    async fn media_state(&self) -> Result<PlaybackState> {
        self.refresh_media_status().await?;
        Ok(self.shared.state().player_state.clone())
    }

    async fn status(&self) -> Result<CastStatus> {
        self.receiver_status().await?;
        self.refresh_media_status().await?;
        let state = self.shared.state();
        Ok(CastStatus {
            display_name: state.display_name.clone(),
            status_text: state.status_text.clone(),
            media_status: state.player_state.as_str().to_string(),
            media_title: state.media_title.clone(),
            volume: state.volume.level,
            muted: state.volume.muted,
        })
    }

    async fn close(&self) {
        if self.is_connected() {
            let close = json!({"type": "CLOSE"});
            let transport = self.shared.state().transport_id.clone();
            if let Some(transport) = transport {
                let _ = self.shared.send(&transport, NAMESPACE_CONNECTION, &close).await;
            }
            let _ = self.shared.send(RECEIVER_ID, NAMESPACE_CONNECTION, &close).await;
        }
        self.shared.mark_disconnected();
    }
}

/// Opens [`CastClient`] links.
#[derive(Debug, Default, Clone)]
pub struct TlsCastConnector;

#[async_trait]
impl CastConnector for TlsCastConnector {
    async fn connect(&self, device: &Device) -> Result<Arc<dyn CastLink>> {
        Ok(Arc::new(CastClient::connect(device).await?))
    }
}
