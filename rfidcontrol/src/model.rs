use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ControlError;

/// Identifier read from a card, kept as raw bytes and rendered as hex.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CardId(Vec<u8>);

impl CardId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Registry key for this card.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for CardId {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.len() % 2 != 0 {
            return Err(ControlError::validation("card id", s));
        }
        (0..s.len())
            .step_by(2)
            .map(|i| {
                s.get(i..i + 2)
                    .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                    .ok_or_else(|| ControlError::validation("card id", s))
            })
            .collect::<Result<Vec<u8>, _>>()
            .map(CardId)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MediaLink {
    pub link: String,
    #[serde(default)]
    pub content_type: String,
}

/// A playable card: media links and the receiver they play on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub media_links: Vec<MediaLink>,
    /// Friendly name of the target receiver.
    pub chromecast: String,
    #[serde(default = "default_max_volume")]
    pub maxvolume: f64,
}

fn default_max_volume() -> f64 {
    1.0
}

impl Card {
    /// Upper volume bound in percent, `maxvolume` clamped to `[0, 1]`.
    pub fn max_volume_percent(&self) -> u32 {
        let max = if self.maxvolume.is_finite() {
            self.maxvolume.clamp(0.0, 1.0)
        } else {
            1.0
        };
        (max * 100.0).round() as u32
    }
}

/// A cast receiver as stored in the device registry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    #[serde(rename = "IPAddr")]
    pub address: Option<IpAddr>,
    #[serde(rename = "Port")]
    pub port: u16,
    #[serde(rename = "Info", default)]
    pub info: HashMap<String, String>,
}

impl Device {
    pub fn new(name: &str, address: IpAddr, port: u16) -> Self {
        Self {
            name: name.to_string(),
            address: Some(address),
            port,
            info: HashMap::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ControlError> {
        if self.name.trim().is_empty() {
            return Err(ControlError::validation("device", "empty name"));
        }
        if self.address.is_none() {
            return Err(ControlError::validation(
                "device",
                format!("{} has no address", self.name),
            ));
        }
        if self.port == 0 {
            return Err(ControlError::validation(
                "device",
                format!("{} has no port", self.name),
            ));
        }
        Ok(())
    }

    /// Friendly name advertised by the receiver, falling back to the key.
    pub fn display_name(&self) -> &str {
        self.info
            .get("fn")
            .map(String::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.name)
    }
}

/// Transport and volume commands accepted by the session manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Play,
    Pause,
    Stop,
    Next,
    Prev,
    SetVolume,
    GetVolume,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Play => "play",
            Action::Pause => "pause",
            Action::Stop => "stop",
            Action::Next => "next",
            Action::Prev => "prev",
            Action::SetVolume => "setvolume",
            Action::GetVolume => "getvolume",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "play" => Ok(Action::Play),
            "pause" => Ok(Action::Pause),
            "stop" => Ok(Action::Stop),
            "next" => Ok(Action::Next),
            "prev" => Ok(Action::Prev),
            "setvolume" => Ok(Action::SetVolume),
            "getvolume" => Ok(Action::GetVolume),
            other => Err(ControlError::validation("action", format!("unknown command {other}"))),
        }
    }
}

/// Control request as received from the API.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientAction {
    pub action: String,
    #[serde(default)]
    pub volume: f64,
}

impl ClientAction {
    pub fn new(action: Action) -> Self {
        Self {
            action: action.as_str().to_string(),
            volume: 0.0,
        }
    }

    pub fn set_volume(level: f64) -> Self {
        Self {
            action: Action::SetVolume.as_str().to_string(),
            volume: level,
        }
    }
}

/// Media player state reported by a receiver.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing,
    Paused,
    Buffering,
    Unknown(String),
}

impl PlaybackState {
    pub fn from_cast_state(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "IDLE" | "" => PlaybackState::Idle,
            "PLAYING" => PlaybackState::Playing,
            "PAUSED" => PlaybackState::Paused,
            "BUFFERING" => PlaybackState::Buffering,
            _ => PlaybackState::Unknown(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PlaybackState::Idle => "IDLE",
            PlaybackState::Playing => "PLAYING",
            PlaybackState::Paused => "PAUSED",
            PlaybackState::Buffering => "BUFFERING",
            PlaybackState::Unknown(s) => s.as_str(),
        }
    }

    /// A media session is loaded and not idle.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PlaybackState::Playing | PlaybackState::Paused | PlaybackState::Buffering
        )
    }
}

/// Receiver volume as reported by the platform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub level: f64,
    pub muted: bool,
}

/// Snapshot of the live session. All-default when nothing is playing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CastStatus {
    pub display_name: String,
    pub status_text: String,
    pub media_status: String,
    pub media_title: String,
    pub volume: f64,
    pub muted: bool,
}

/// One entry of the client list exposed by the API.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientSummary {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub status: String,
    pub media_status: String,
    pub media_data: String,
    pub volume: f64,
}

/// Outcome of a successful `play_card`.
///
/// The receiver was reached; content problems are reported separately.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PlayReport {
    pub device: String,
    pub media_loaded: bool,
    pub queued: usize,
    pub errors: Vec<String>,
}

/// Result of a control command.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ControlReply {
    Done,
    /// Conditional command not sent because nothing is playing.
    Skipped,
    Volume { level: f64, muted: bool },
}
