use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::serial::interface::BAUD_RATE;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Host-side session timing and link parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Interval between GET_STATUS heartbeats
    pub poll_interval_ms: u64,
    /// Silence after which a connected session is reported stale
    pub stale_threshold_ms: u64,
    /// Wait after opening the port for the board's boot greeting
    pub stabilization_ms: u64,
    /// Read timeout for commands the firmware answers
    pub response_timeout_ms: u64,
    /// Read window after commands the firmware does not answer
    pub ack_window_ms: u64,
    /// Read timeout when collecting the boot greeting
    pub boot_read_timeout_ms: u64,
    pub read_buffer_size: usize,
    pub baud_rate: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            stale_threshold_ms: 5000,
            stabilization_ms: 3000,
            response_timeout_ms: 500,
            ack_window_ms: 50,
            boot_read_timeout_ms: 100,
            read_buffer_size: 64,
            baud_rate: BAUD_RATE,
        }
    }
}

impl SessionConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: SessionConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        log::info!("Loaded session config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 || self.response_timeout_ms == 0 {
            return Err(ConfigError::Invalid("poll interval and response timeout must be non-zero".to_string()));
        }
        if self.stale_threshold_ms <= self.poll_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "stale threshold ({} ms) must exceed poll interval ({} ms)",
                self.stale_threshold_ms, self.poll_interval_ms
            )));
        }
        // A blocked read must end before the next poll so disconnect stays bounded
        if self.response_timeout_ms > self.poll_interval_ms || self.ack_window_ms > self.poll_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "read timeouts must not exceed poll interval ({} ms)",
                self.poll_interval_ms
            )));
        }
        if self.read_buffer_size < 8 {
            return Err(ConfigError::Invalid(format!(
                "read buffer of {} bytes cannot hold a response frame",
                self.read_buffer_size
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_millis(self.stale_threshold_ms)
    }

    pub fn stabilization(&self) -> Duration {
        Duration::from_millis(self.stabilization_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn ack_window(&self) -> Duration {
        Duration::from_millis(self.ack_window_ms)
    }

    pub fn boot_read_timeout(&self) -> Duration {
        Duration::from_millis(self.boot_read_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.stale_threshold(), Duration::from_secs(5));
        assert_eq!(config.stabilization(), Duration::from_secs(3));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SessionConfig = serde_json::from_str(r#"{ "stale_threshold_ms": 3000 }"#).unwrap();
        assert_eq!(config.stale_threshold_ms, 3000);
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.baud_rate, 115200);
    }

    #[test]
    fn test_validation_rejects_bad_timing() {
        let config = SessionConfig { stale_threshold_ms: 1000, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = SessionConfig { response_timeout_ms: 2000, ..Default::default() };
        assert!(config.validate().is_err());

        let config = SessionConfig { read_buffer_size: 4, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("powerpack-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "poll_interval_ms": 500, "stale_threshold_ms": 2500 }"#).unwrap();
        let config = SessionConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.stale_threshold_ms, 2500);
    }
}
