//! Client configuration loading
//!
//! Each setting is resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! The reviewer identity has no compiled default: mutating calls are
//! attributed to the signed-in reviewer, so it must come from one of the
//! first three sources.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_API_URL: &str = "DQR_API_URL";
pub const ENV_EVENTS_URL: &str = "DQR_EVENTS_URL";
pub const ENV_IDENTITY: &str = "DQR_IDENTITY";
pub const ENV_TOKEN: &str = "DQR_TOKEN";
pub const ENV_CONFIG_FILE: &str = "DQR_CONFIG";

const DEFAULT_API_URL: &str = "http://127.0.0.1:8080";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RECONNECT_INITIAL_MS: u64 = 500;
const DEFAULT_RECONNECT_MAX_MS: u64 = 30_000;

/// Settings as they appear in `config.toml`; every field is optional
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub api_url: Option<String>,
    pub events_url: Option<String>,
    pub identity: Option<String>,
    pub token: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub reconnect_initial_ms: Option<u64>,
    pub reconnect_max_ms: Option<u64>,
}

impl TomlConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid config file {}: {}", path.display(), e)))
    }
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub api_url: Option<String>,
    pub events_url: Option<String>,
    pub identity: Option<String>,
    pub token: Option<String>,
    pub config_file: Option<PathBuf>,
}

/// Fully resolved client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the review backend (no trailing slash)
    pub api_url: String,
    /// Server-Sent Events endpoint carrying invalidation signals
    pub events_url: String,
    /// Reviewer identity sent as approver/rejector
    pub identity: String,
    /// Bearer token for mutating calls
    pub token: Option<String>,
    pub request_timeout: Duration,
    /// First reconnect delay after the push channel drops
    pub reconnect_initial: Duration,
    /// Upper bound for the doubling reconnect delay
    pub reconnect_max: Duration,
}

impl ClientConfig {
    /// Resolve configuration from CLI overrides, environment, TOML file and defaults
    pub fn resolve(cli: &ConfigOverrides) -> Result<Self> {
        let toml_config = match cli
            .config_file
            .clone()
            .or_else(|| std::env::var(ENV_CONFIG_FILE).ok().map(PathBuf::from))
        {
            // An explicitly named file must exist and parse
            Some(path) => TomlConfig::from_file(&path)?,
            None => match locate_config_file() {
                Some(path) => match TomlConfig::from_file(&path) {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::warn!("Ignoring config file {}: {}", path.display(), e);
                        TomlConfig::default()
                    }
                },
                None => TomlConfig::default(),
            },
        };

        Self::from_sources(cli, &toml_config)
    }

    /// Merge already-loaded sources (CLI beats env beats TOML beats defaults)
    pub fn from_sources(cli: &ConfigOverrides, file: &TomlConfig) -> Result<Self> {
        let api_url = pick(cli.api_url.as_deref(), ENV_API_URL, file.api_url.as_deref())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_url = api_url.trim_end_matches('/').to_string();

        let events_url = pick(cli.events_url.as_deref(), ENV_EVENTS_URL, file.events_url.as_deref())
            .unwrap_or_else(|| format!("{}/events", api_url));

        let identity = pick(cli.identity.as_deref(), ENV_IDENTITY, file.identity.as_deref())
            .ok_or_else(|| {
                Error::Config(format!(
                    "Reviewer identity not configured (use --identity, {} or `identity` in config.toml)",
                    ENV_IDENTITY
                ))
            })?;

        let token = pick(cli.token.as_deref(), ENV_TOKEN, file.token.as_deref());

        let reconnect_initial = Duration::from_millis(
            file.reconnect_initial_ms.unwrap_or(DEFAULT_RECONNECT_INITIAL_MS),
        );
        let reconnect_max =
            Duration::from_millis(file.reconnect_max_ms.unwrap_or(DEFAULT_RECONNECT_MAX_MS));
        if reconnect_initial.is_zero() || reconnect_max < reconnect_initial {
            return Err(Error::Config(format!(
                "reconnect_max_ms ({}) must be >= reconnect_initial_ms ({}) > 0",
                reconnect_max.as_millis(),
                reconnect_initial.as_millis()
            )));
        }

        Ok(Self {
            api_url,
            events_url,
            identity,
            token,
            request_timeout: Duration::from_secs(
                file.request_timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            reconnect_initial,
            reconnect_max,
        })
    }
}

/// First non-empty value among CLI, environment and file
fn pick(cli: Option<&str>, env_var_name: &str, file: Option<&str>) -> Option<String> {
    // Priority 1: Command-line argument
    if let Some(value) = cli.filter(|v| !v.trim().is_empty()) {
        return Some(value.trim().to_string());
    }

    // Priority 2: Environment variable
    if let Ok(value) = std::env::var(env_var_name) {
        if !value.trim().is_empty() {
            return Some(value.trim().to_string());
        }
    }

    // Priority 3: TOML config file
    file.filter(|v| !v.trim().is_empty())
        .map(|v| v.trim().to_string())
}

/// Default configuration file path for the platform, if one exists
fn locate_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("dqr").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc/dqr/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}
