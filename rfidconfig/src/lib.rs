//! # RFID player configuration
//!
//! YAML configuration for the card player:
//! - an embedded default configuration (`rfidplayer.yaml`)
//! - merged with `config.yaml` from the configuration directory
//! - overridden by `RFIDPLAYER_CONFIG__SECTION__KEY=value` environment variables
//! - exposed through typed getters that fall back to defaults
//!
//! ## Usage
//!
//! ```no_run
//! use rfidconfig::Config;
//!
//! let config = Config::load_config("")?;
//! let port = config.get_http_port();
//! let pins = config.get_encoder_pins();
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};
use tracing::{info, warn};

const DEFAULT_CONFIG: &str = include_str!("rfidplayer.yaml");

const ENV_CONFIG_DIR: &str = "RFIDPLAYER_CONFIG";
const ENV_PREFIX: &str = "RFIDPLAYER_CONFIG__";
const LOCAL_CONFIG_DIR: &str = ".rfidplayer";

const DEFAULT_HTTP_ADDRESS: &str = "0.0.0.0";
const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;
const DEFAULT_CARDS_FILE: &str = "cards.json";
const DEFAULT_CASTS_FILE: &str = "casts.json";
const DEFAULT_GPIO_CHIP: &str = "/dev/gpiochip0";
const DEFAULT_SERIAL_DEVICE: &str = "/dev/serial0";

/// Generates a getter/setter pair for an unsigned integer with a default.
macro_rules! impl_u64_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> u64 {
            match self.get_value($path) {
                Ok(Value::Number(n)) if n.is_u64() => n.as_u64().unwrap_or($default),
                Ok(Value::String(s)) => s.trim().parse().unwrap_or($default),
                _ => $default,
            }
        }

        pub fn $setter(&self, value: u64) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value)))
        }
    };
}

/// Generates a getter/setter pair for a GPIO line offset.
macro_rules! impl_pin_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> u32 {
            match self.get_value($path) {
                Ok(Value::Number(n)) => n
                    .as_u64()
                    .and_then(|v| u32::try_from(v).ok())
                    .unwrap_or($default),
                _ => $default,
            }
        }

        pub fn $setter(&self, pin: u32) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(pin)))
        }
    };
}

/// Generates a getter/setter pair for a list of GPIO line offsets.
macro_rules! impl_pins_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Vec<u32> {
            match self.get_value($path) {
                Ok(Value::Sequence(seq)) => {
                    let pins: Option<Vec<u32>> = seq
                        .iter()
                        .map(|v| v.as_u64().and_then(|p| u32::try_from(p).ok()))
                        .collect();
                    match pins {
                        Some(pins) if pins.len() == $default.len() => pins,
                        _ => {
                            warn!(path = ?$path, "Invalid pin list, using defaults");
                            $default.to_vec()
                        }
                    }
                }
                _ => $default.to_vec(),
            }
        }

        pub fn $setter(&self, pins: &[u32]) -> Result<()> {
            let seq = pins
                .iter()
                .map(|p| Value::Number(Number::from(*p)))
                .collect();
            self.set_value($path, Value::Sequence(seq))
        }
    };
}

/// Generates a getter/setter pair for a string value with a default.
macro_rules! impl_string_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> String {
            match self.get_value($path) {
                Ok(Value::String(s)) if !s.trim().is_empty() => s,
                _ => $default.to_string(),
            }
        }

        pub fn $setter(&self, value: String) -> Result<()> {
            self.set_value($path, Value::String(value))
        }
    };
}

/// Generates a getter/setter pair for a boolean value with a default.
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> bool {
            match self.get_value($path) {
                Ok(Value::Bool(b)) => b,
                _ => $default,
            }
        }

        pub fn $setter(&self, value: bool) -> Result<()> {
            self.set_value($path, Value::Bool(value))
        }
    };
}

/// Configuration manager for the RFID player.
///
/// Values live in a YAML tree guarded by a mutex; every setter writes the
/// whole tree back to `config.yaml`.
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: String,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(self.data().clone()),
        }
    }
}

impl Config {
    fn find_config_dir(directory: &str) -> String {
        if !directory.is_empty() {
            return directory.to_string();
        }

        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return env_path;
        }

        if Path::new(LOCAL_CONFIG_DIR).exists() {
            return LOCAL_CONFIG_DIR.to_string();
        }

        if let Some(home) = home_dir() {
            let home_config = home.join(LOCAL_CONFIG_DIR);
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        LOCAL_CONFIG_DIR.to_string()
    }

    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!("{} is not a directory", path.display()));
        }

        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;
        fs::read_dir(path)?;

        Ok(())
    }

    /// Determines and validates the configuration directory.
    ///
    /// Lookup order: the `directory` argument if not empty, the
    /// `RFIDPLAYER_CONFIG` environment variable, `.rfidplayer` in the
    /// current directory, then `.rfidplayer` in the home directory.
    /// The directory is created when missing.
    pub fn config_dir(directory: &str) -> Result<String> {
        let dir_path = Self::find_config_dir(directory);
        Self::validate_config_dir(Path::new(&dir_path))?;
        Ok(dir_path)
    }

    /// Loads the configuration from `directory` (or the default lookup).
    ///
    /// The embedded defaults are merged with `config.yaml`, keys are
    /// lower-cased, environment overrides are applied, and the merged tree
    /// is saved back so that the file always lists every known key.
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        info!(config_dir = %config_dir, "Using config directory");

        let path = Path::new(&config_dir)
            .join("config.yaml")
            .to_string_lossy()
            .to_string();

        let mut default_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        let yaml_data = if let Ok(data) = fs::read(&path) {
            info!(config_file = %path, "Loaded config file");
            data
        } else {
            info!(config_file = %path, "Config file not found, using default embedded config");
            DEFAULT_CONFIG.as_bytes().to_vec()
        };

        // An empty file parses as Null and leaves the defaults untouched.
        let external_value: Value = serde_yaml::from_slice(&yaml_data)?;
        if !external_value.is_null() {
            merge_yaml(&mut default_value, &external_value);
        }
        let mut config_value = Self::lower_keys_value(default_value);

        Self::apply_env_overrides(&mut config_value);

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(config_value),
        };

        config.save()?;
        Ok(config)
    }

    fn data(&self) -> MutexGuard<'_, Value> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Directory holding `config.yaml`.
    pub fn dir(&self) -> &str {
        &self.config_dir
    }

    /// Saves the current configuration to `config.yaml`.
    pub fn save(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&*self.data())?;
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    /// Sets a value at `path` (e.g. `&["host", "http_port"]`) and saves.
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.data();
            Self::set_value_internal(&mut data, path, value)?;
        }
        self.save()
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key_value = Value::String(path[0].to_lowercase());
            if path.len() == 1 {
                map.insert(key_value, value);
            } else {
                let entry = map
                    .entry(key_value)
                    .or_insert(Value::Mapping(Mapping::new()));
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Gets the value at `path`, failing when the path does not exist.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data();
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                match map.get(Value::String(key.to_lowercase())) {
                    Some(next) => current = next,
                    None => return Err(anyhow!("Path {} does not exist", path[..=i].join("."))),
                }
            } else {
                return Err(anyhow!("Path {} is not a mapping", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    fn apply_env_overrides(config: &mut Value) {
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                let key_path = stripped.split("__").collect::<Vec<_>>();
                let yaml_value = Self::convert_env_value(&value);
                if let Err(err) = Self::set_value_internal(config, &key_path, yaml_value) {
                    warn!(env_var = %key, error = %err, "Ignoring config override");
                }
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        serde_yaml::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()))
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    let key = match k {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    new_map.insert(key, Self::lower_keys_value(v));
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    /// Resolves a data file path, relative paths being anchored in the
    /// configuration directory. Parent directories are created.
    pub fn resolve_data_file(&self, file: &str) -> Result<PathBuf> {
        let path = Path::new(file);
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.config_dir).join(path)
        };
        if let Some(parent) = absolute.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                info!(directory = %parent.display(), "Created data directory");
            }
        }
        Ok(absolute)
    }

    /// HTTP port of the API server.
    pub fn get_http_port(&self) -> u16 {
        match self.get_value(&["host", "http_port"]) {
            Ok(Value::Number(n)) => match n.as_u64().map(u16::try_from) {
                Some(Ok(port)) => port,
                _ => {
                    warn!("Invalid HTTP port {}, using default {}", n, DEFAULT_HTTP_PORT);
                    DEFAULT_HTTP_PORT
                }
            },
            Ok(Value::String(s)) => s.trim().parse().unwrap_or_else(|_| {
                warn!("Invalid HTTP port '{}', using default {}", s, DEFAULT_HTTP_PORT);
                DEFAULT_HTTP_PORT
            }),
            _ => DEFAULT_HTTP_PORT,
        }
    }

    pub fn set_http_port(&self, port: u16) -> Result<()> {
        self.set_value(&["host", "http_port"], Value::Number(Number::from(port)))
    }

    impl_string_config!(
        get_http_address,
        set_http_address,
        &["host", "http_address"],
        DEFAULT_HTTP_ADDRESS
    );

    impl_string_config!(
        get_log_min_level,
        set_log_min_level,
        &["host", "logger", "min_level"],
        DEFAULT_LOG_MIN_LEVEL
    );

    impl_bool_config!(
        get_log_enable_console,
        set_log_enable_console,
        &["host", "logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
    );

    impl_string_config!(
        get_cards_file,
        set_cards_file,
        &["storage", "cards_file"],
        DEFAULT_CARDS_FILE
    );

    impl_string_config!(
        get_casts_file,
        set_casts_file,
        &["storage", "casts_file"],
        DEFAULT_CASTS_FILE
    );

    impl_string_config!(
        get_gpio_chip,
        set_gpio_chip,
        &["hardware", "gpio_chip"],
        DEFAULT_GPIO_CHIP
    );

    impl_pin_config!(
        get_card_sensor_pin,
        set_card_sensor_pin,
        &["hardware", "card_sensor_pin"],
        17
    );

    impl_pin_config!(get_button_pin, set_button_pin, &["hardware", "button_pin"], 5);

    impl_pin_config!(
        get_reader_reset_pin,
        set_reader_reset_pin,
        &["hardware", "reader_reset_pin"],
        26
    );

    impl_pins_config!(
        get_encoder_pins,
        set_encoder_pins,
        &["hardware", "encoder_pins"],
        [22u32, 27]
    );

    impl_pins_config!(
        get_led_pins,
        set_led_pins,
        &["hardware", "led_pins"],
        [19u32, 13, 6]
    );

    impl_u64_config!(
        get_button_debounce_ms,
        set_button_debounce_ms,
        &["hardware", "button_debounce_ms"],
        10
    );

    impl_string_config!(
        get_serial_device,
        set_serial_device,
        &["hardware", "serial", "device"],
        DEFAULT_SERIAL_DEVICE
    );

    impl_u64_config!(
        get_serial_baud_rate,
        set_serial_baud_rate,
        &["hardware", "serial", "baud_rate"],
        9600
    );

    impl_u64_config!(
        get_read_timeout_ms,
        set_read_timeout_ms,
        &["player", "read_timeout_ms"],
        2000
    );

    impl_u64_config!(
        get_play_timeout_ms,
        set_play_timeout_ms,
        &["player", "play_timeout_ms"],
        10000
    );

    impl_u64_config!(
        get_play_retry_interval_ms,
        set_play_retry_interval_ms,
        &["player", "play_retry_interval_ms"],
        1000
    );

    impl_u64_config!(
        get_encoder_poll_ms,
        set_encoder_poll_ms,
        &["player", "encoder_poll_ms"],
        1
    );

    impl_u64_config!(get_volume_step, set_volume_step, &["player", "volume_step"], 5);

    impl_u64_config!(
        get_default_volume,
        set_default_volume,
        &["player", "default_volume"],
        50
    );

    impl_u64_config!(
        get_next_threshold_ms,
        set_next_threshold_ms,
        &["player", "button", "next_threshold_ms"],
        1000
    );

    impl_u64_config!(
        get_prev_threshold_ms,
        set_prev_threshold_ms,
        &["player", "button", "prev_threshold_ms"],
        3000
    );

    impl_u64_config!(
        get_ignore_threshold_ms,
        set_ignore_threshold_ms,
        &["player", "button", "ignore_threshold_ms"],
        6000
    );

    impl_u64_config!(
        get_discovery_sweep_secs,
        set_discovery_sweep_secs,
        &["discovery", "sweep_duration_secs"],
        30
    );
}

/// Recursively merges `external` into `default`.
///
/// Mappings are merged key by key; scalars and sequences are replaced.
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}
