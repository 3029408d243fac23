use clap::ArgMatches;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::modbus::engine::{RequestOptions, DEFAULT_ATTEMPTS, DEFAULT_TIMEOUT};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Connection settings
    pub serial_port: String,
    pub baud_rate: u32,
    pub parity: ParityConfig,

    // Request engine tuning
    pub response_timeout_ms: u64,
    pub attempt_count: u32,

    // Connectivity probing
    pub ping_timeout_ms: u64,
    pub ping_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ParityConfig {
    None,
    Even,
    Odd,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial_port: "/dev/ttyS0".to_string(),
            baud_rate: 9600,
            parity: ParityConfig::None,
            response_timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            attempt_count: DEFAULT_ATTEMPTS,
            ping_timeout_ms: crate::modbus::client::PING_TIMEOUT.as_millis() as u64,
            ping_attempts: crate::modbus::client::PING_ATTEMPTS,
        }
    }
}

impl Config {
    pub fn from_matches(matches: &ArgMatches) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = if let Some(path) = matches.get_one::<String>("config") {
            Self::from_file(path)?
        } else {
            Self::default()
        };

        // Command line overrides
        if let Some(port) = matches.get_one::<String>("port") {
            config.serial_port = port.clone();
        }
        if let Some(baud) = matches.get_one::<String>("baud") {
            config.baud_rate = baud.parse()?;
        }
        if let Some(timeout) = matches.get_one::<String>("timeout") {
            config.response_timeout_ms = timeout.parse()?;
        }
        if let Some(attempts) = matches.get_one::<String>("attempts") {
            config.attempt_count = attempts.parse()?;
        }

        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn request_options(&self) -> RequestOptions {
        RequestOptions::new(
            self.attempt_count,
            Duration::from_millis(self.response_timeout_ms),
        )
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_engine_defaults() {
        let config = Config::default();
        assert_eq!(config.response_timeout_ms, 500);
        assert_eq!(config.attempt_count, 5);
        assert_eq!(config.ping_timeout_ms, 100);
        assert_eq!(config.ping_attempts, 10);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.serial_port, config.serial_port);
        assert_eq!(parsed.baud_rate, config.baud_rate);
        assert_eq!(parsed.attempt_count, config.attempt_count);
    }
}
