use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use courier_core::UpdateInterval;
use serde::Deserialize;

use crate::route::DEFAULT_ROUTE_CAPACITY;
use crate::source::PositionOptions;

/// Environment variable that overrides `backend.token`.
pub const TOKEN_ENV: &str = "COURIER_TOKEN";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub tracking: TrackingConfig,
    pub server: ServerConfig,
    pub source: SourceConfig,
    pub battery: BatteryConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the backend API, e.g. `https://api.example.com/api`
    pub base_url: String,
    /// Bearer token for the driver account
    pub token: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/api".to_string(),
            token: None,
            timeout_secs: 10,
        }
    }
}

impl BackendConfig {
    /// Token from the environment, falling back to the file.
    pub fn resolve_token(&self) -> Option<String> {
        std::env::var(TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.token.clone())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Seconds between updates the backend should expect: 10, 30 or 60
    #[serde(rename = "interval_secs")]
    pub interval: UpdateInterval,
    /// Resume tracking when the backend still reports the driver online
    pub auto_resume: bool,
    /// Attach the battery level to outgoing samples
    pub battery: bool,
    /// End an active session on `PositionUnavailable`/`Timeout` watch errors
    pub stop_on_transient_watch_error: bool,
    /// Go offline when the process shuts down mid-session
    pub offline_on_shutdown: bool,
    pub initial_fix_timeout_secs: u64,
    /// Oldest cached fix accepted as the initial fix
    pub initial_fix_max_age_secs: u64,
    pub route_capacity: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            interval: UpdateInterval::default(),
            auto_resume: true,
            battery: true,
            stop_on_transient_watch_error: true,
            offline_on_shutdown: true,
            initial_fix_timeout_secs: 15,
            initial_fix_max_age_secs: 0,
            route_capacity: DEFAULT_ROUTE_CAPACITY,
        }
    }
}

impl TrackingConfig {
    /// Bare tracker: no auto-resume, no battery sampling.
    pub fn minimal() -> Self {
        Self {
            auto_resume: false,
            battery: false,
            ..Self::default()
        }
    }

    pub fn initial_fix_options(&self) -> PositionOptions {
        PositionOptions::initial_fix(
            Duration::from_secs(self.initial_fix_timeout_secs),
            Duration::from_secs(self.initial_fix_max_age_secs),
        )
    }

    pub fn watch_options(&self) -> PositionOptions {
        PositionOptions::watch(Duration::from_secs(self.initial_fix_timeout_secs))
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address for the local HTTP API to listen on
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([127, 0, 0, 1], 8082)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceConfig {
    Simulated {
        start_lat: f64,
        start_lng: f64,
        /// Milliseconds between simulated fixes
        interval_ms: u64,
        speed_mps: f64,
    },
    /// Fixes are pushed in through `POST /fixes`.
    Feed,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Simulated {
            start_lat: -1.2921,
            start_lng: 36.8219,
            interval_ms: 2000,
            speed_mps: 8.0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BatteryConfig {
    #[default]
    None,
    Sysfs {
        /// Power supply directory, e.g. `/sys/class/power_supply/BAT0`
        path: PathBuf,
        #[serde(default = "default_battery_poll")]
        poll_secs: u64,
    },
}

fn default_battery_poll() -> u64 {
    60
}

impl Config {
    pub fn load(path: &Path) -> color_eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
