//! Shared controllers handed to the player and the API.

use std::sync::Arc;
use std::time::Duration;

use crate::button::HoldThresholds;
use crate::registry::{CardRegistry, DeviceRegistry};
use crate::session::SessionManager;

/// Timings and limits of the card cycle.
#[derive(Clone, Debug)]
pub struct PlayerSettings {
    pub read_timeout: Duration,
    /// Overall budget of the play retry loop.
    pub play_timeout: Duration,
    pub play_retry_interval: Duration,
    pub retry_blink_period: Duration,
    pub encoder_poll: Duration,
    pub volume_step: u32,
    /// Volume used when the receiver level cannot be read before the first card.
    pub default_volume: u32,
    pub thresholds: HoldThresholds,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(2),
            play_timeout: Duration::from_secs(10),
            play_retry_interval: Duration::from_secs(1),
            retry_blink_period: Duration::from_millis(500),
            encoder_poll: Duration::from_millis(1),
            volume_step: 5,
            default_volume: 50,
            thresholds: HoldThresholds::default(),
        }
    }
}

pub struct PlayerContext {
    pub cards: Arc<dyn CardRegistry>,
    pub session: Arc<SessionManager>,
    pub settings: PlayerSettings,
}

impl PlayerContext {
    /// Builds the context and starts the initial discovery sweep.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        cards: Arc<dyn CardRegistry>,
        session: Arc<SessionManager>,
        settings: PlayerSettings,
    ) -> Arc<Self> {
        session.discover();
        Arc::new(Self {
            cards,
            session,
            settings,
        })
    }

    pub fn devices(&self) -> &Arc<dyn DeviceRegistry> {
        self.session.devices()
    }
}
