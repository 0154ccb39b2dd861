pub mod api;
pub mod logs;

use std::time::Duration;

use rfidconfig::Config;
use rfidcontrol::{HoldThresholds, PlayerSettings};
use rfidgpio::GpioPins;

/// Card cycle settings from the `player` section.
pub fn player_settings(config: &Config) -> PlayerSettings {
    let ms = Duration::from_millis;
    PlayerSettings {
        read_timeout: ms(config.get_read_timeout_ms()),
        play_timeout: ms(config.get_play_timeout_ms()),
        play_retry_interval: ms(config.get_play_retry_interval_ms()),
        encoder_poll: ms(config.get_encoder_poll_ms().max(1)),
        volume_step: config.get_volume_step().clamp(1, 100) as u32,
        default_volume: config.get_default_volume().min(100) as u32,
        thresholds: HoldThresholds {
            next: ms(config.get_next_threshold_ms()),
            prev: ms(config.get_prev_threshold_ms()),
            ignore: ms(config.get_ignore_threshold_ms()),
        },
        ..PlayerSettings::default()
    }
}

/// GPIO wiring from the `hardware` section.
pub fn gpio_pins(config: &Config) -> GpioPins {
    GpioPins {
        chip: config.get_gpio_chip(),
        card_sensor: config.get_card_sensor_pin(),
        button: config.get_button_pin(),
        encoder: config.get_encoder_pins(),
        leds: config.get_led_pins(),
        reader_reset: config.get_reader_reset_pin(),
        button_debounce: Duration::from_millis(config.get_button_debounce_ms()),
    }
}

pub fn discovery_duration(config: &Config) -> Duration {
    Duration::from_secs(config.get_discovery_sweep_secs().max(1))
}
