use crate::domain::models::DeviceFilter;
use crate::infrastructure::bluetooth::protocol::{self, UartProfile};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "facelink_uart".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,

    // Device selection
    #[serde(default = "default_true")]
    pub accept_all_devices: bool,
    #[serde(default)]
    pub device_name_prefixes: Vec<String>,
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,

    // UART profile
    #[serde(default = "default_service_uuid")]
    pub ble_service_uuid: String,
    #[serde(default = "default_rx_uuid")]
    pub ble_rx_char_uuid: String,
    #[serde(default = "default_tx_uuid")]
    pub ble_tx_char_uuid: String,
    #[serde(default = "default_true")]
    pub write_with_response: bool,

    // Streaming
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_false")]
    pub append_newline: bool,
    #[serde(default = "default_false")]
    pub strict_ascii_inbound: bool,

    // Reconnection
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            accept_all_devices: true,
            device_name_prefixes: Vec::new(),
            scan_timeout_ms: default_scan_timeout_ms(),
            ble_service_uuid: default_service_uuid(),
            ble_rx_char_uuid: default_rx_uuid(),
            ble_tx_char_uuid: default_tx_uuid(),
            write_with_response: true,
            tick_interval_ms: default_tick_interval_ms(),
            append_newline: false,
            strict_ascii_inbound: false,
            auto_reconnect: true,
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl Settings {
    /// Prefix filtering wins whenever prefixes are configured.
    pub fn device_filter(&self) -> DeviceFilter {
        if self.accept_all_devices && self.device_name_prefixes.is_empty() {
            DeviceFilter::AcceptAll
        } else {
            DeviceFilter::NamePrefixes(self.device_name_prefixes.clone())
        }
    }

    pub fn uart_profile(&self) -> anyhow::Result<UartProfile> {
        let parse = |field: &str, value: &str| {
            protocol::parse_uuid(value).map_err(|e| anyhow::anyhow!("{}: {}", field, e))
        };
        Ok(UartProfile {
            service: parse("ble_service_uuid", &self.ble_service_uuid)?,
            write_char: parse("ble_rx_char_uuid", &self.ble_rx_char_uuid)?,
            notify_char: parse("ble_tx_char_uuid", &self.ble_tx_char_uuid)?,
        })
    }

    /// Reject configurations that can never stream.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.uart_profile()?;
        if self.tick_interval_ms == 0 {
            anyhow::bail!("tick_interval_ms must be greater than zero");
        }
        if !self.accept_all_devices && self.device_name_prefixes.is_empty() {
            anyhow::bail!("device_name_prefixes is empty while accept_all_devices is off");
        }
        Ok(())
    }
}

fn default_service_uuid() -> String {
    protocol::SERVICE_UUID.to_string()
}
fn default_rx_uuid() -> String {
    protocol::RX_CHAR_UUID.to_string()
}
fn default_tx_uuid() -> String {
    protocol::TX_CHAR_UUID.to_string()
}
fn default_scan_timeout_ms() -> u64 {
    10_000
}
fn default_tick_interval_ms() -> u64 {
    100
}
fn default_reconnect_delay_ms() -> u64 {
    2_000
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();

        Ok(Self {
            settings,
            settings_path,
        })
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("FaceLinkUart");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &PathBuf) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    /// Write defaults out on first run so the file can be edited.
    pub fn ensure_saved(&self) -> anyhow::Result<()> {
        if !self.settings_path.exists() {
            self.save()?;
        }
        Ok(())
    }

    pub fn path(&self) -> &PathBuf {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }
}
