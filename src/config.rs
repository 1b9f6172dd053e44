//! Config modules for the broker.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub socket: SocketConfig,
    /// Input device locations.
    ///
    /// ```toml
    /// [devices]
    /// input_dir = "/dev/input"
    /// gpio = "/dev/input/gpio-keys"
    /// keypad = "/dev/input/keypad"
    /// eci = "/dev/input/eci"
    /// power_button = "/dev/input/pwrbutton"
    /// ```
    #[serde(default)]
    pub devices: DevicesConfig,
}

impl AppConfig {
    pub fn from_toml_str(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<std::path::Path>>(
        path: P,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = Self::from_toml_str(&contents)
            .map_err(|e| format!("Failed to parse config file: {e}"))?;
        Ok(config)
    }

    /// Load configuration with fallback to defaults
    pub fn load_or_default() -> Self {
        // Try to load from standard locations in order: CWD > .config > /etc
        let config_paths = [
            PathBuf::from("qmkeyd.toml"),
            dirs::config_dir()
                .map(|config_dir| config_dir.join("qmkeyd.toml"))
                .unwrap_or_else(|| PathBuf::from("qmkeyd.toml")),
            PathBuf::from("/etc/qmkeyd/qmkeyd.toml"),
        ];

        Self::load_first_existing(&config_paths)
    }

    /// Loads the first file in `paths` that exists. Later paths are not tried,
    /// even when that file fails to parse.
    fn load_first_existing(paths: &[PathBuf]) -> Self {
        let Some(path) = paths.iter().find(|path| path.exists()) else {
            tracing::info!("No configuration file found, using defaults");
            return Self::default();
        };
        match Self::from_file(path) {
            Ok(config) => {
                tracing::info!("Loaded configuration from: {}", path.display());
                config
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SocketConfig {
    #[serde(default = "default_socket_path")]
    pub path: PathBuf,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            path: default_socket_path(),
        }
    }
}

fn default_socket_path() -> PathBuf {
    // QMKEYD_SOCKET wins over the built-in path, for the broker and clients alike
    qmkeys::default_socket_path()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DevicesConfig {
    /// Directory watched for hotplugged accessories
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,
    #[serde(default = "default_gpio")]
    pub gpio: PathBuf,
    #[serde(default = "default_keypad")]
    pub keypad: PathBuf,
    #[serde(default = "default_eci")]
    pub eci: PathBuf,
    #[serde(default = "default_power_button")]
    pub power_button: PathBuf,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            gpio: default_gpio(),
            keypad: default_keypad(),
            eci: default_eci(),
            power_button: default_power_button(),
        }
    }
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("/dev/input")
}

fn default_gpio() -> PathBuf {
    PathBuf::from("/dev/input/gpio-keys")
}

fn default_keypad() -> PathBuf {
    PathBuf::from("/dev/input/keypad")
}

fn default_eci() -> PathBuf {
    PathBuf::from("/dev/input/eci")
}

fn default_power_button() -> PathBuf {
    PathBuf::from("/dev/input/pwrbutton")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();
        assert_eq!(config.devices.input_dir, PathBuf::from("/dev/input"));
        assert_eq!(config.devices.gpio, PathBuf::from("/dev/input/gpio-keys"));
        assert_eq!(config.devices.keypad, PathBuf::from("/dev/input/keypad"));
        assert_eq!(config.devices.eci, PathBuf::from("/dev/input/eci"));
        assert_eq!(
            config.devices.power_button,
            PathBuf::from("/dev/input/pwrbutton")
        );
    }

    #[test]
    fn test_custom_socket_path() {
        let toml_str = r#"
            [socket]
            path = "/run/qmkeyd.sock"
        "#;
        let config = AppConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.socket.path, PathBuf::from("/run/qmkeyd.sock"));
    }

    #[test]
    fn test_partial_devices_section_keeps_defaults() {
        let toml_str = r#"
            [devices]
            keypad = "/dev/input/event3"
        "#;
        let config = AppConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.devices.keypad, PathBuf::from("/dev/input/event3"));
        assert_eq!(config.devices.gpio, PathBuf::from("/dev/input/gpio-keys"));
        assert_eq!(config.devices.input_dir, PathBuf::from("/dev/input"));
    }

    #[test]
    fn test_empty_config_is_default() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.devices.eci, PathBuf::from("/dev/input/eci"));
    }

    #[test]
    fn test_unknown_field_type_is_an_error() {
        let toml_str = r#"
            [socket]
            path = 42
        "#;
        assert!(AppConfig::from_toml_str(toml_str).is_err());
    }

    fn config_file(name: &str, contents: &str) -> PathBuf {
        let file = format!("qmkeyd_config_{}_{}.toml", name, std::process::id());
        let path = std::env::temp_dir().join(file);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_broken_first_file_falls_back_to_defaults_once() {
        let broken = config_file("broken", "[socket]\npath = 42\n");
        let valid = config_file("valid", "[devices]\neci = \"/dev/input/event4\"\n");

        let config = AppConfig::load_first_existing(&[broken.clone(), valid.clone()]);
        assert_eq!(config.devices.eci, PathBuf::from("/dev/input/eci"));
        assert!(logs_contain("Using defaults."));
        assert!(!logs_contain("No configuration file found"));

        let _ = std::fs::remove_file(&broken);
        let _ = std::fs::remove_file(&valid);
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_first_existing_file_wins() {
        let missing = std::env::temp_dir().join("qmkeyd_config_missing.toml");
        let valid = config_file("first", "[devices]\neci = \"/dev/input/event4\"\n");

        let config = AppConfig::load_first_existing(&[missing, valid.clone()]);
        assert_eq!(config.devices.eci, PathBuf::from("/dev/input/event4"));
        assert!(logs_contain("Loaded configuration from"));

        let _ = std::fs::remove_file(&valid);
    }
}
