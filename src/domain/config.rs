use serde::{Deserialize, Serialize};
use std::time::Duration;

/// ReplCom configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplComConfig {
    /// Global configuration
    #[serde(default)]
    pub global: GlobalConfig,
    /// Device configurations
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

/// Global configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Default log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Baud rate used when a port is given without one
    #[serde(default = "default_baud_rate")]
    pub default_baud_rate: u32,
    /// Upper bound for a single marker scan in milliseconds (0 = wait forever)
    #[serde(default)]
    pub scan_timeout_ms: u64,
    /// Interrupt whatever is running before entering raw mode
    #[serde(default = "default_interrupt_before_raw")]
    pub interrupt_before_raw: bool,
}

/// Device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device name
    pub name: String,
    /// Device description
    #[serde(default)]
    pub description: String,
    /// Serial link settings
    pub serial: SerialSettings,
}

/// Serial link settings. The baud rate is the only value most boards care about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialSettings {
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: ParityConfig,
    #[serde(default)]
    pub flow_control: FlowControlConfig,
}

/// Parity configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParityConfig {
    #[default]
    None,
    Odd,
    Even,
}

/// Flow control configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControlConfig {
    #[default]
    None,
    Hardware,
    Software,
}

/// Options that shape how a session talks to the device.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub scan_timeout: Option<Duration>,
    pub interrupt_before_raw: bool,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_interrupt_before_raw() -> bool {
    true
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            default_baud_rate: default_baud_rate(),
            scan_timeout_ms: 0,
            interrupt_before_raw: default_interrupt_before_raw(),
        }
    }
}

impl GlobalConfig {
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            scan_timeout: (self.scan_timeout_ms > 0)
                .then(|| Duration::from_millis(self.scan_timeout_ms)),
            interrupt_before_raw: self.interrupt_before_raw,
        }
    }
}

impl ReplComConfig {
    /// Look up a configured device by name.
    pub fn find_device(&self, name: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|device| device.name == name)
    }
}

impl SerialSettings {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: ParityConfig::None,
            flow_control: FlowControlConfig::None,
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        GlobalConfig::default().session_options()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_serialization() {
        let config = ReplComConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let _deserialized: ReplComConfig = toml::from_str(&toml_str).unwrap();
    }

    #[test]
    fn test_device_config_defaults() {
        let toml_str = r#"
            [[devices]]
            name = "pico"

            [devices.serial]
            port = "/dev/ttyACM0"
        "#;

        let config: ReplComConfig = toml::from_str(toml_str).unwrap();
        let device = config.find_device("pico").unwrap();
        assert_eq!(device.serial, SerialSettings::new("/dev/ttyACM0", 115_200));
        assert_eq!(config.global.log_level, "info");
        assert!(config.find_device("esp32").is_none());
    }

    #[test]
    fn test_session_options_timeout() {
        let mut global = GlobalConfig::default();
        assert_eq!(global.session_options().scan_timeout, None);
        assert!(global.session_options().interrupt_before_raw);

        global.scan_timeout_ms = 2500;
        assert_eq!(
            global.session_options().scan_timeout,
            Some(Duration::from_millis(2500))
        );
    }
}
