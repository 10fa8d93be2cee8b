use crate::domain::{
    config::{DeviceConfig, GlobalConfig, ReplComConfig, SerialSettings},
    error::{ReplComError, ReplComResult},
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const CONFIG_DIR: &str = "replcom";
const PROJECT_DIR: &str = ".replcom";
const CONFIG_FILE: &str = "config.toml";

/// Configuration manager
///
/// Global settings come from `~/.config/replcom/config.toml`. Devices from the
/// nearest `.replcom/config.toml` above the working directory are appended to
/// the global ones, and replace a global device of the same name.
pub struct ConfigManager {
    global_config_path: PathBuf,
    project_config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Create new configuration manager
    pub fn new() -> ReplComResult<Self> {
        let global_config_path = Self::default_global_config_path()?;
        let project_config_path = std::env::current_dir()
            .ok()
            .and_then(|dir| Self::find_project_config_path(&dir));

        Ok(Self {
            global_config_path,
            project_config_path,
        })
    }

    /// Manager reading from explicit locations.
    pub fn with_paths(global_config_path: PathBuf, project_config_path: Option<PathBuf>) -> Self {
        Self {
            global_config_path,
            project_config_path,
        }
    }

    /// Load configuration from files
    pub fn load_config(&self) -> ReplComResult<ReplComConfig> {
        let mut config = ReplComConfig::default();

        if self.global_config_path.exists() {
            debug!("Loading global config from {}", self.global_config_path.display());
            config = self.load_config_from_path(&self.global_config_path)?;
        }

        if let Some(project_path) = &self.project_config_path {
            if project_path.exists() {
                debug!("Loading project config from {}", project_path.display());
                let project_config = self.load_config_from_path(project_path)?;
                for device in project_config.devices {
                    config.devices.retain(|existing| existing.name != device.name);
                    config.devices.push(device);
                }
            }
        }

        Ok(config)
    }

    /// Write the global settings and devices to the global config file.
    pub fn save_global_config(&self, config: &ReplComConfig) -> ReplComResult<()> {
        if let Some(parent) = self.global_config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ReplComError::Config {
                message: format!("Failed to create config directory: {}", e),
            })?;
        }
        self.save_config_to_path(&self.global_config_path, config)
    }

    fn default_global_config_path() -> ReplComResult<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| ReplComError::Config {
            message: "Could not determine home directory".to_string(),
        })?;

        Ok(home.join(".config").join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Find project configuration path by walking up directory tree
    pub fn find_project_config_path(start: &Path) -> Option<PathBuf> {
        let mut path = start;
        loop {
            let config_path = path.join(PROJECT_DIR).join(CONFIG_FILE);
            if config_path.exists() {
                return Some(config_path);
            }
            path = path.parent()?;
        }
    }

    /// Load configuration from specific path
    pub fn load_config_from_path(&self, path: &Path) -> ReplComResult<ReplComConfig> {
        let content = fs::read_to_string(path).map_err(|e| ReplComError::Config {
            message: format!("Failed to read config file {}: {}", path.display(), e),
        })?;

        toml::from_str(&content).map_err(|e| ReplComError::Config {
            message: format!("Failed to parse config file {}: {}", path.display(), e),
        })
    }

    /// Save configuration to specific path
    pub fn save_config_to_path(&self, path: &Path, config: &ReplComConfig) -> ReplComResult<()> {
        let content = toml::to_string_pretty(config).map_err(|e| ReplComError::Config {
            message: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(path, content).map_err(|e| ReplComError::Config {
            message: format!("Failed to write config file {}: {}", path.display(), e),
        })
    }

    /// Create a starter project configuration under `path`.
    pub fn init_project_config(&self, path: &Path) -> ReplComResult<PathBuf> {
        let config_dir = path.join(PROJECT_DIR);
        let config_file = config_dir.join(CONFIG_FILE);

        if config_file.exists() {
            return Err(ReplComError::Config {
                message: "Project configuration already exists".to_string(),
            });
        }

        fs::create_dir_all(&config_dir).map_err(|e| ReplComError::Config {
            message: format!("Failed to create {} directory: {}", PROJECT_DIR, e),
        })?;

        let default_config = ReplComConfig {
            global: GlobalConfig::default(),
            devices: vec![DeviceConfig {
                name: "pico".to_string(),
                description: "Example board running MicroPython".to_string(),
                serial: SerialSettings::new("/dev/ttyACM0", 115_200),
            }],
        };

        self.save_config_to_path(&config_file, &default_config)?;
        Ok(config_file)
    }

    /// Get the current project config path (if any)
    pub fn project_config_path(&self) -> Option<&PathBuf> {
        self.project_config_path.as_ref()
    }

    /// Get the global config path
    pub fn global_config_path(&self) -> &PathBuf {
        &self.global_config_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_missing_files_give_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_paths(temp_dir.path().join("none.toml"), None);
        let config = manager.load_config().unwrap();

        assert_eq!(config.global.log_level, "info");
        assert_eq!(config.global.scan_timeout_ms, 0);
        assert!(config.devices.is_empty());
    }

    #[test]
    fn test_project_devices_override_global() {
        let temp_dir = TempDir::new().unwrap();
        let global = temp_dir.path().join("global").join(CONFIG_FILE);
        let project = temp_dir.path().join(PROJECT_DIR).join(CONFIG_FILE);
        write(
            &global,
            r#"
[global]
log_level = "debug"

[[devices]]
name = "pico"
serial = { port = "/dev/ttyACM0" }

[[devices]]
name = "esp"
serial = { port = "/dev/ttyUSB0", baud_rate = 460800 }
"#,
        );
        write(
            &project,
            r#"
[[devices]]
name = "pico"
serial = { port = "/dev/ttyACM1" }
"#,
        );

        let manager = ConfigManager::with_paths(global, Some(project));
        let config = manager.load_config().unwrap();

        assert_eq!(config.global.log_level, "debug");
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.find_device("pico").unwrap().serial.port, "/dev/ttyACM1");
        assert_eq!(config.find_device("esp").unwrap().serial.baud_rate, 460_800);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let global = temp_dir.path().join(CONFIG_FILE);
        write(&global, "[global\nlog_level = ");

        let manager = ConfigManager::with_paths(global, None);
        assert!(matches!(
            manager.load_config(),
            Err(ReplComError::Config { .. })
        ));
    }

    #[test]
    fn test_init_project_config() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_paths(temp_dir.path().join("global.toml"), None);

        let config_file = manager.init_project_config(temp_dir.path()).unwrap();
        assert_eq!(config_file, temp_dir.path().join(".replcom").join("config.toml"));

        let content = fs::read_to_string(&config_file).unwrap();
        let config: ReplComConfig = toml::from_str(&content).unwrap();
        assert_eq!(config.devices.len(), 1);
        assert!(manager.init_project_config(temp_dir.path()).is_err());
    }

    #[test]
    fn test_find_project_config_walks_up() {
        let temp_dir = TempDir::new().unwrap();
        let project = temp_dir.path().join(PROJECT_DIR).join(CONFIG_FILE);
        write(&project, "");
        let nested = temp_dir.path().join("src").join("lib");
        fs::create_dir_all(&nested).unwrap();

        assert_eq!(ConfigManager::find_project_config_path(&nested), Some(project));
    }

    #[test]
    fn test_save_global_config_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let global = temp_dir.path().join("nested").join(CONFIG_FILE);
        let manager = ConfigManager::with_paths(global, None);

        let mut config = ReplComConfig::default();
        config.global.scan_timeout_ms = 2_000;
        manager.save_global_config(&config).unwrap();

        assert_eq!(manager.load_config().unwrap().global.scan_timeout_ms, 2_000);
    }
}
