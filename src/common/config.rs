//! User settings file handling
//!
//! Global defaults shared by every script run from this machine. Values set
//! in a script's own `config` block take precedence.

use serde::Deserialize;

use super::paths::config_path;
use super::Result;

/// Main settings structure
#[derive(Debug, Deserialize, Default)]
pub struct Settings {
    /// Default step settings
    #[serde(default)]
    pub defaults: Defaults,

    /// Connection settings
    #[serde(default)]
    pub connection: ConnectionSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Default step settings
#[derive(Debug, Deserialize, Default)]
pub struct Defaults {
    /// Think duration used when neither the step nor the script gives one
    #[serde(default)]
    pub think_secs: Option<f64>,
}

/// Connection settings
#[derive(Debug, Deserialize)]
pub struct ConnectionSettings {
    /// Size of the buffer used for each read from the connection
    #[serde(default = "default_read_buffer")]
    pub read_buffer_bytes: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            read_buffer_bytes: default_read_buffer(),
        }
    }
}

/// 64 KiB per read
pub fn default_read_buffer() -> usize {
    64 * 1024
}

/// Logging settings
#[derive(Debug, Deserialize, Default)]
pub struct LoggingSettings {
    /// Also write logs to the log directory
    #[serde(default)]
    pub file: bool,
}

impl Settings {
    /// Load settings from the default settings file
    ///
    /// Returns default settings if the file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    super::Error::FileRead {
                        path: path.display().to_string(),
                        error: e.to_string(),
                    }
                })?;
                return Self::parse(&content);
            }
        }
        Ok(Self::default())
    }

    /// Parse settings from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let settings: Self =
            toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.connection.read_buffer_bytes == 0 {
            return Err(super::Error::Config(
                "connection.read_buffer_bytes must be greater than zero".into(),
            ));
        }
        if let Some(secs) = self.defaults.think_secs {
            if std::time::Duration::try_from_secs_f64(secs).is_err() {
                return Err(super::Error::Config(format!(
                    "defaults.think_secs must be a non-negative number, got {}",
                    secs
                )));
            }
        }
        Ok(())
    }
}
