//! Configuration handling for the STUN responder.
//!
//! This module reads configuration from an optional YAML file and
//! environment variables; command line flags are applied by `main`.

use anyhow::{Context, Result};
use federation_stun::{Credentials, ParticipantConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Default STUN port
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3478";

/// Default interval between statistics log lines
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Responder configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponderConfig {
    /// UDP address to bind
    pub listen_addr: String,
    /// Local short-term credential username
    pub username: Option<String>,
    /// Local short-term credential password
    pub password: Option<String>,
    /// Interval between statistics log lines
    pub stats_interval: Duration,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            username: None,
            password: None,
            stats_interval: DEFAULT_STATS_INTERVAL,
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    stun: Option<StunSection>,
}

#[derive(Debug, Deserialize)]
struct StunSection {
    listen_addr: Option<String>,
    username: Option<String>,
    password: Option<String>,
    stats_interval: Option<String>,
}

impl ResponderConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Self {
        let mut config = Self::default();

        match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root_config) => {
                    config.apply_root_config(root_config);
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => warn!(
                    "Failed to parse config file {:?}, using defaults: {}",
                    config_path.as_ref(),
                    e
                ),
            },
            Err(_) => warn!(
                "Config file {:?} not found, using defaults",
                config_path.as_ref()
            ),
        }

        config.apply_environment_overrides();
        config
    }

    fn apply_root_config(&mut self, root_config: RootConfig) {
        let Some(stun) = root_config.stun else {
            return;
        };

        if let Some(listen_addr) = stun.listen_addr {
            self.listen_addr = listen_addr;
        }
        if stun.username.is_some() {
            self.username = stun.username;
        }
        if stun.password.is_some() {
            self.password = stun.password;
        }
        if let Some(interval) = stun.stats_interval {
            match humantime::parse_duration(&interval) {
                Ok(interval) => self.stats_interval = interval,
                Err(e) => warn!("Ignoring stats_interval {:?}: {}", interval, e),
            }
        }
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides(&mut self) {
        if let Ok(listen_addr) = std::env::var("STUN_LISTEN_ADDR") {
            info!("Listen address overridden by environment: {}", listen_addr);
            self.listen_addr = listen_addr;
        }

        if let Ok(username) = std::env::var("STUN_USERNAME") {
            info!("Username overridden by environment: {}", username);
            self.username = Some(username);
        }

        if let Ok(password) = std::env::var("STUN_PASSWORD") {
            info!("Password overridden by environment");
            self.password = Some(password);
        }
    }

    /// Parsed listen address
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen_addr
            .parse()
            .with_context(|| format!("invalid listen address {:?}", self.listen_addr))
    }

    /// Participant configuration; credentials need both username and password
    pub fn participant_config(&self) -> ParticipantConfig {
        let credentials = match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            (None, None) => None,
            _ => {
                warn!("Username and password must both be set, running without credentials");
                None
            }
        };
        ParticipantConfig { credentials }
    }
}
