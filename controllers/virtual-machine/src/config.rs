//! # Controller Configuration
//!
//! Settings are resolved in three layers: built-in defaults, an optional YAML
//! file named by `CONTROLLER_CONFIG`, then environment variables. The refresh
//! token is only ever read from `VRA_REFRESH_TOKEN`.

use crate::error::ControllerError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_VRA_URL: &str = "https://vra.local";
pub const DEFAULT_REQUEUE_SECS: u64 = 20;
pub const DEFAULT_MAX_REQUEUE_SECS: u64 = 300;
pub const DEFAULT_RESYNC_SECS: u64 = 600;
pub const DEFAULT_PROBE_PORT: u16 = 8081;
pub const DEFAULT_CONCURRENCY: u16 = 4;

/// Optional project config file
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileConfig {
    pub url: Option<String>,
    pub insecure: Option<bool>,
    pub watch_namespace: Option<String>,
    pub requeue_seconds: Option<u64>,
    pub max_requeue_seconds: Option<u64>,
    pub resync_seconds: Option<u64>,
    pub probe_port: Option<u16>,
    pub concurrency: Option<u16>,
}

impl FileConfig {
    pub fn from_path(path: &Path) -> Result<Self, ControllerError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ControllerError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ControllerError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
            .map_err(|e| ControllerError::InvalidConfig(format!("invalid config file: {}", e)))
    }
}

/// Resolved controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Aria Automation base URL
    pub vra_url: String,
    /// Refresh token exchanged for a bearer token at login
    pub refresh_token: String,
    /// Skip TLS verification of the Aria Automation endpoint
    pub insecure: bool,
    /// Namespace to watch, `None` for all namespaces
    pub watch_namespace: Option<String>,
    /// Fixed delay for polling in-flight requests; also the first error backoff
    pub requeue: Duration,
    /// Ceiling of the error backoff
    pub max_requeue: Duration,
    /// Steady-state resync interval for Running machines
    pub resync: Duration,
    /// Port of the /healthz and /readyz server
    pub probe_port: u16,
    /// Maximum concurrent reconciliations
    pub concurrency: u16,
}

impl ControllerConfig {
    /// Load from `CONTROLLER_CONFIG` (if set) and the process environment
    pub fn load() -> Result<Self, ControllerError> {
        let file = match std::env::var("CONTROLLER_CONFIG") {
            Ok(path) if !path.is_empty() => FileConfig::from_path(Path::new(&path))?,
            _ => FileConfig::default(),
        };
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Merge a file config with variables from `lookup`, env taking precedence
    pub fn resolve<F>(file: FileConfig, lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let refresh_token = lookup("VRA_REFRESH_TOKEN")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ControllerError::InvalidConfig(
                    "VRA_REFRESH_TOKEN environment variable is required".to_string(),
                )
            })?;

        let vra_url = lookup("VRA_URL")
            .or(file.url)
            .unwrap_or_else(|| DEFAULT_VRA_URL.to_string());
        let insecure = match lookup("VRA_INSECURE") {
            Some(v) => parse_bool("VRA_INSECURE", &v)?,
            None => file.insecure.unwrap_or(false),
        };
        let watch_namespace = lookup("WATCH_NAMESPACE")
            .or(file.watch_namespace)
            .filter(|ns| !ns.is_empty());

        let requeue = parse_or("REQUEUE_SECONDS", &lookup, file.requeue_seconds, DEFAULT_REQUEUE_SECS)?;
        let max_requeue = parse_or(
            "MAX_REQUEUE_SECONDS",
            &lookup,
            file.max_requeue_seconds,
            DEFAULT_MAX_REQUEUE_SECS,
        )?;
        let resync = parse_or("RESYNC_SECONDS", &lookup, file.resync_seconds, DEFAULT_RESYNC_SECS)?;
        let probe_port = parse_or("PROBE_PORT", &lookup, file.probe_port, DEFAULT_PROBE_PORT)?;
        let concurrency = parse_or(
            "RECONCILE_CONCURRENCY",
            &lookup,
            file.concurrency,
            DEFAULT_CONCURRENCY,
        )?;

        let config = Self {
            vra_url,
            refresh_token,
            insecure,
            watch_namespace,
            requeue: Duration::from_secs(requeue),
            max_requeue: Duration::from_secs(max_requeue),
            resync: Duration::from_secs(resync),
            probe_port,
            concurrency,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ControllerError> {
        if !(self.vra_url.starts_with("https://") || self.vra_url.starts_with("http://")) {
            return Err(ControllerError::InvalidConfig(format!(
                "VRA_URL must be an http(s) URL, got {:?}",
                self.vra_url
            )));
        }
        if self.requeue.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "REQUEUE_SECONDS must be greater than zero".to_string(),
            ));
        }
        if self.max_requeue < self.requeue {
            return Err(ControllerError::InvalidConfig(format!(
                "MAX_REQUEUE_SECONDS ({}) must not be below REQUEUE_SECONDS ({})",
                self.max_requeue.as_secs(),
                self.requeue.as_secs()
            )));
        }
        if self.resync.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "RESYNC_SECONDS must be greater than zero".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(ControllerError::InvalidConfig(
                "RECONCILE_CONCURRENCY must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_or<T, F>(key: &str, lookup: &F, file: Option<T>, default: T) -> Result<T, ControllerError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ControllerError::InvalidConfig(format!("{key} has invalid value {raw:?}"))),
        None => Ok(file.unwrap_or(default)),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ControllerError> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        _ => Err(ControllerError::InvalidConfig(format!(
            "{key} has invalid value {raw:?}"
        ))),
    }
}
