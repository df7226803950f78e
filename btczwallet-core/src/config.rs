//! Wallet configuration, loaded from an optional TOML file.

use crate::{platform, Result, WalletError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime settings for a wallet session. Every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub database_path: PathBuf,
    pub socks_proxy: String,
    pub tor_control_addr: String,
    pub tor_control_password: Option<String>,
    pub bootstrap_poll_ms: u64,
    pub request_timeout_secs: u64,
    /// Lowest server protocol version this client talks to.
    pub min_server_version: String,
    pub intervals: LoopIntervals,
    pub stream_enabled: bool,
    pub stream_path: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            database_path: platform::get_default_database_path(),
            socks_proxy: "socks5h://127.0.0.1:9050".to_string(),
            tor_control_addr: "127.0.0.1:9051".to_string(),
            tor_control_password: None,
            bootstrap_poll_ms: 100,
            request_timeout_secs: 60,
            min_server_version: "1.4.6".to_string(),
            intervals: LoopIntervals::default(),
            stream_enabled: false,
            stream_path: "/stream".to_string(),
        }
    }
}

/// Sleep intervals for the reconciliation loops, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopIntervals {
    pub status_secs: u64,
    pub balance_secs: u64,
    pub transactions_secs: u64,
    pub book_secs: u64,
    pub contacts_secs: u64,
    pub messages_secs: u64,
    pub identity_balance_secs: u64,
    pub mining_secs: u64,
    /// Upper bound of the random delay added to every sleep.
    pub jitter_ms: u64,
}

impl Default for LoopIntervals {
    fn default() -> Self {
        Self {
            status_secs: 30,
            balance_secs: 10,
            transactions_secs: 15,
            book_secs: 10,
            contacts_secs: 10,
            messages_secs: 10,
            identity_balance_secs: 10,
            mining_secs: 60,
            jitter_ms: 0,
        }
    }
}

impl LoopIntervals {
    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }
}

impl WalletConfig {
    /// Load a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            WalletError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Load from the platform config directory.
    pub fn load_default() -> Result<Self> {
        Self::load(&platform::get_default_config_path())
    }

    pub fn bootstrap_poll_interval(&self) -> Duration {
        Duration::from_millis(self.bootstrap_poll_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
