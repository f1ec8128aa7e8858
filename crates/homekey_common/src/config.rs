use std::env;
use std::path::PathBuf;
use std::time::Duration;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub structured: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct NfcSettings {
    /// Device path or port of the contactless front-end (e.g. `/dev/ttyUSB0` or `usb:...`).
    #[serde(alias = "path")]
    pub port: String,
    /// Driver identifier, passed through to whichever frontend implementation is wired up.
    pub driver: String,
    /// Whether to prepend the Apple ECP broadcast frame to each sense call.
    #[serde(default = "default_true")]
    pub broadcast: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigitalKeyFlow {
    Fast,
    Standard,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HomeKeySettings {
    /// Path of the file-backed store, used when `use_api_repository` is `false`.
    #[serde(default = "default_persist_path")]
    pub persist: String,
    /// Sets `flag2` in the ECP broadcast frame.
    #[serde(default = "default_true")]
    pub express: bool,
    #[serde(default)]
    pub finish: HardwareFinishColor,
    #[serde(default = "default_flow")]
    pub flow: DigitalKeyFlow,
    /// Minimum duration of one NFC polling iteration when no target is sensed, in seconds.
    #[serde(default = "default_throttle_polling")]
    pub throttle_polling: f64,
    #[serde(default)]
    pub use_api_repository: bool,
    pub api_base_url: String,
    pub api_secret: Option<String>,
    /// Preserves the source implementation's counter-intuitive `DUPLICATE` status on
    /// successful `add_device_credential` creation (see DESIGN.md).
    #[serde(default = "default_true")]
    pub compat_duplicate_on_add: bool,
}

impl HomeKeySettings {
    pub fn throttle_polling_duration(&self) -> Duration {
        Duration::from_secs_f64(self.throttle_polling.max(0.0))
    }
}

fn default_persist_path() -> String {
    "homekey.json".to_string()
}

fn default_true() -> bool {
    true
}

fn default_flow() -> DigitalKeyFlow {
    DigitalKeyFlow::Fast
}

fn default_throttle_polling() -> f64 {
    0.15
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HardwareFinishColor {
    Tan,
    Gold,
    Silver,
    #[default]
    Black,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HapSettings {
    pub port: u16,
    pub persist: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub nfc: NfcSettings,
    pub homekey: HomeKeySettings,
    pub hap: HapSettings,
}

impl Settings {
    /// Load settings from `configuration.json` in the current directory (or
    /// `CARGO_MANIFEST_DIR` when run through cargo), overridable through
    /// `HOMEKEY__<SECTION>__<KEY>` environment variables.
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = env::var("CARGO_MANIFEST_DIR").map(PathBuf::from).unwrap_or_default();

        Config::builder()
            .add_source(File::from(config_path.join("configuration.json")).required(false))
            .add_source(
                Environment::with_prefix("homekey")
                    .separator("__")
                    .prefix_separator("_")
                    .list_separator(","),
            )
            .build()?
            .try_deserialize()
    }
}
