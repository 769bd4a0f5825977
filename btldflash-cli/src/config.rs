//! Configuration file support for btldflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (BTLDFLASH_BAUD)
//! 3. Local config file (./btldflash.toml)
//! 4. Global config file (~/.config/btldflash/config.toml)
//!
//! `--config PATH` replaces the local and global files.

use btldflash::port::{DEFAULT_BAUD, DEFAULT_READ_TIMEOUT};
use btldflash::session::{DEFAULT_ACK_TIMEOUT, DEFAULT_HANDSHAKE_ATTEMPTS, HANDSHAKE_BYTE_DELAY};
use btldflash::{ParseOptions, SerialConfig, SessionConfig};
use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local configuration file name.
pub const LOCAL_CONFIG_FILE: &str = "btldflash.toml";

/// Serial link configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SerialSection {
    /// Baud rate.
    pub baud: Option<u32>,
    /// Per-read timeout in milliseconds.
    pub timeout_ms: Option<u64>,
}

/// Handshake configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandshakeSection {
    /// Attempts before giving up (0 = forever).
    pub max_attempts: Option<u32>,
    /// Delay between greeting bytes in milliseconds.
    pub byte_delay_ms: Option<u64>,
}

/// Acknowledgment configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AckSection {
    /// How long to wait for a device status in milliseconds.
    pub timeout_ms: Option<u64>,
}

/// Firmware source configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceSection {
    /// Verify hex record checksums.
    #[serde(default)]
    pub verify_checksums: bool,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Serial link settings.
    #[serde(default)]
    pub serial: SerialSection,
    /// Handshake settings.
    #[serde(default)]
    pub handshake: HandshakeSection,
    /// Acknowledgment settings.
    #[serde(default)]
    pub ack: AckSection,
    /// Source parsing settings.
    #[serde(default)]
    pub source: SourceSection,
}

/// Overrides coming from the command line or environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub baud: Option<u32>,
    pub handshake_attempts: Option<u32>,
    pub ack_timeout_ms: Option<u64>,
    pub verify_checksums: bool,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub serial: SerialConfig,
    pub session: SessionConfig,
    pub parse: ParseOptions,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "btldflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.serial.baud.is_some() {
            self.serial.baud = other.serial.baud;
        }
        if other.serial.timeout_ms.is_some() {
            self.serial.timeout_ms = other.serial.timeout_ms;
        }
        if other.handshake.max_attempts.is_some() {
            self.handshake.max_attempts = other.handshake.max_attempts;
        }
        if other.handshake.byte_delay_ms.is_some() {
            self.handshake.byte_delay_ms = other.handshake.byte_delay_ms;
        }
        if other.ack.timeout_ms.is_some() {
            self.ack.timeout_ms = other.ack.timeout_ms;
        }
        if other.source.verify_checksums {
            self.source.verify_checksums = true;
        }
    }

    /// Combine file settings with command-line overrides.
    pub fn resolve(&self, port_name: &str, overrides: &Overrides) -> Settings {
        let serial = SerialConfig::new(
            port_name,
            overrides
                .baud
                .or(self.serial.baud)
                .unwrap_or(DEFAULT_BAUD),
        )
        .with_timeout(
            self.serial
                .timeout_ms
                .map_or(DEFAULT_READ_TIMEOUT, Duration::from_millis),
        );

        let session = SessionConfig {
            max_handshake_attempts: overrides
                .handshake_attempts
                .or(self.handshake.max_attempts)
                .unwrap_or(DEFAULT_HANDSHAKE_ATTEMPTS),
            handshake_byte_delay: self
                .handshake
                .byte_delay_ms
                .map_or(HANDSHAKE_BYTE_DELAY, Duration::from_millis),
            ack_timeout: overrides
                .ack_timeout_ms
                .or(self.ack.timeout_ms)
                .map_or(DEFAULT_ACK_TIMEOUT, Duration::from_millis),
        };

        let parse = ParseOptions {
            verify_checksums: overrides.verify_checksums || self.source.verify_checksums,
        };

        Settings {
            serial,
            session,
            parse,
        }
    }
}
