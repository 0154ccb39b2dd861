//! Cast receiver control.
//!
//! [`CastConnector`] opens a [`CastLink`] to a registered [`Device`]; the
//! session manager only talks to receivers through these two traits.
//! [`CastClient`] is the TLS implementation of the Cast v2 protocol.

mod client;
pub mod frame;
mod tls;

pub use client::{CastClient, TlsCastConnector};

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::Result;
use crate::model::{CastStatus, Device, MediaLink, PlaybackState, Volume};

pub const NAMESPACE_CONNECTION: &str = "urn:x-cast:com.google.cast.tp.connection";
pub const NAMESPACE_HEARTBEAT: &str = "urn:x-cast:com.google.cast.tp.heartbeat";
pub const NAMESPACE_RECEIVER: &str = "urn:x-cast:com.google.cast.receiver";
pub const NAMESPACE_MEDIA: &str = "urn:x-cast:com.google.cast.media";

/// Default Media Receiver application.
pub const DEFAULT_MEDIA_RECEIVER_APP_ID: &str = "CC1AD845";

/// Default port of cast receivers.
pub const DEFAULT_CAST_PORT: u16 = 8009;

/// Media descriptor sent in LOAD and QUEUE_INSERT requests.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub content_id: String,
    pub stream_type: String,
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MediaMetadata>,
}

/// Music track metadata (`metadataType` 3).
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadata {
    pub metadata_type: u8,
    pub title: String,
    pub artist: String,
}

impl MediaItem {
    pub fn from_link(link: &MediaLink) -> Self {
        Self {
            content_id: link.link.clone(),
            stream_type: "BUFFERED".to_string(),
            content_type: link.content_type.clone(),
            metadata: None,
        }
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.metadata = Some(MediaMetadata {
            metadata_type: 3,
            title: title.to_string(),
            artist: title.to_string(),
        });
        self
    }
}

/// A live control connection to one receiver.
#[async_trait]
pub trait CastLink: Send + Sync {
    /// Registry name of the receiver.
    fn device_name(&self) -> &str;

    /// False once the underlying connection is gone.
    fn is_connected(&self) -> bool;

    /// Replaces the current content with `item` and starts playback.
    async fn load(&self, item: &MediaItem) -> Result<()>;

    /// Appends `items` to the current queue, in order.
    async fn queue_insert(&self, items: &[MediaItem]) -> Result<()>;

    async fn play(&self) -> Result<()>;
    async fn pause(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    async fn queue_next(&self) -> Result<()>;
    async fn queue_prev(&self) -> Result<()>;

    /// Sets the receiver level (`0.0..=1.0`) and clears mute.
    async fn set_volume(&self, level: f64) -> Result<()>;
    async fn volume(&self) -> Result<Volume>;

    async fn media_state(&self) -> Result<PlaybackState>;
    async fn status(&self) -> Result<CastStatus>;

    /// Closes the connection. Further commands fail with `Disconnected`.
    async fn close(&self);
}

/// Opens links to receivers.
#[async_trait]
pub trait CastConnector: Send + Sync {
    async fn connect(&self, device: &Device) -> Result<Arc<dyn CastLink>>;
}
