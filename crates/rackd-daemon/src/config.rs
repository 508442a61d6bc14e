//! Configuration loading and validation

use anyhow::{bail, Result};
use rackd_cluster::{BreakerConfig, ClusterConfig};
use rackd_discovery::parser::{DEFAULT_IGNORED_MODELS, DEFAULT_MAKE, DEFAULT_MODEL_PREFIX};
use rackd_discovery::provider::Credentials;
use rackd_discovery::{ScannerConfig, SimulatedResource};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub scanner: ScannerSection,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub rack: RackSection,
    #[serde(default, rename = "simulated_device")]
    pub simulated_devices: Vec<SimulatedResource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for the status API
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Scan passes per second
    #[serde(default = "default_scan_rate")]
    pub scan_rate_hz: f64,
    /// Delay before retrying a reconciliation the breaker gave up on
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_secs: u64,
    /// Where the rack identity is persisted
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            scan_rate_hz: default_scan_rate(),
            reconnect_interval_secs: default_reconnect_interval(),
            state_path: default_state_path(),
        }
    }
}

impl DaemonConfig {
    /// Period between scan passes; unusable rates fall back to the default
    pub fn scan_interval(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.scan_rate_hz)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or_else(|| Duration::from_secs_f64(1.0 / default_scan_rate()))
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_scan_rate() -> f64 {
    0.2 // one pass every 5 seconds
}

fn default_reconnect_interval() -> u64 {
    30
}

fn default_state_path() -> PathBuf {
    PathBuf::from("./rackd-state.json")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerSection {
    /// Run periodic scans
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Host running the configuration service
    #[serde(default = "default_target")]
    pub target: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_make")]
    pub make: String,
    #[serde(default = "default_model_prefix")]
    pub model_prefix: String,
    #[serde(default = "default_ignored_models")]
    pub ignored_models: Vec<String>,
    #[serde(default = "default_true")]
    pub include_chassis: bool,
    #[serde(default)]
    pub expert_names: Vec<String>,
    /// Seconds a disconnected device stays listed; unset keeps it forever
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: Option<i64>,
}

impl Default for ScannerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            target: default_target(),
            username: None,
            password: None,
            timeout_ms: default_timeout(),
            make: default_make(),
            model_prefix: default_model_prefix(),
            ignored_models: default_ignored_models(),
            include_chassis: true,
            expert_names: Vec::new(),
            stale_after_secs: default_stale_after(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_target() -> String {
    "localhost".to_string()
}

fn default_timeout() -> u64 {
    10_000
}

fn default_stale_after() -> Option<i64> {
    Some(3_600)
}

fn default_make() -> String {
    DEFAULT_MAKE.to_string()
}

fn default_model_prefix() -> String {
    DEFAULT_MODEL_PREFIX.to_string()
}

fn default_ignored_models() -> Vec<String> {
    DEFAULT_IGNORED_MODELS.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RackSection {
    /// Name used when registering a new rack (defaults to the host name)
    #[serde(default)]
    pub name: Option<String>,
}

impl Config {
    /// Convert to ScannerConfig
    pub fn to_scanner_config(&self) -> ScannerConfig {
        let credentials = match (&self.scanner.username, &self.scanner.password) {
            (Some(username), password) => Some(Credentials {
                username: username.clone(),
                password: password.clone().unwrap_or_default(),
            }),
            (None, _) => None,
        };
        ScannerConfig {
            target: self.scanner.target.clone(),
            credentials,
            timeout_ms: self.scanner.timeout_ms,
            make: self.scanner.make.clone(),
            model_prefix: self.scanner.model_prefix.clone(),
            ignored_models: self.scanner.ignored_models.clone(),
            include_chassis: self.scanner.include_chassis,
            expert_names: self.scanner.expert_names.clone(),
        }
    }

    /// Name for racks registered by this host
    pub fn rack_name(&self) -> String {
        if let Some(name) = self.rack.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        host_name()
    }

    pub fn validate(&self) -> Result<()> {
        let rate = self.daemon.scan_rate_hz;
        if !(rate.is_finite() && rate > 0.0) || Duration::try_from_secs_f64(1.0 / rate).is_err() {
            bail!("daemon.scan_rate_hz must be a positive rate, got {}", rate);
        }
        if let Some(secs) = self.scanner.stale_after_secs {
            if secs < 0 {
                bail!("scanner.stale_after_secs must not be negative, got {}", secs);
            }
        }
        let scale = self.breaker.scale;
        if !scale.is_finite() || scale < 1.0 {
            bail!("breaker.scale must be a finite value of at least 1.0, got {}", scale);
        }
        if self.breaker.base_interval_ms > self.breaker.max_interval_ms {
            bail!(
                "breaker.base_interval_ms ({}) exceeds breaker.max_interval_ms ({})",
                self.breaker.base_interval_ms,
                self.breaker.max_interval_ms
            );
        }
        let now = Instant::now();
        if now.checked_add(Duration::from_millis(self.breaker.max_interval_ms)).is_none() {
            bail!("breaker.max_interval_ms is too large: {}", self.breaker.max_interval_ms);
        }
        if now.checked_add(self.daemon.reconnect_interval()).is_none() {
            bail!(
                "daemon.reconnect_interval_secs is too large: {}",
                self.daemon.reconnect_interval_secs
            );
        }
        Ok(())
    }
}

fn host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "rackd".to_string())
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        config
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Config::default()
    };
    config.validate()?;
    Ok(config)
}
