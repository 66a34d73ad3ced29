//! Configuration loading for pledge.
//!
//! ```toml
//! [event_loop]
//! clock = "system"              # or "virtual"
//! unhandled_rejection = "abort" # or "warn"
//! max_microtasks_per_checkpoint = 100000
//!
//! [fetch]
//! user_agent = "pledge/0.1"
//! timeout_seconds = 30
//!
//! [logging]
//! level = "info"
//! file = "~/.pledge/logs/pledge.log"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use serde::Deserialize;
use thiserror::Error;

use pledge_engine::LoopConfig;
use pledge_fetch::FetchConfig;
use pledge_types::{ClockKind, UnhandledRejectionPolicy};

/// Overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "PLEDGE_CONFIG";

#[derive(Debug, Default, Deserialize)]
pub struct PledgeConfig {
    pub event_loop: Option<EventLoopConfig>,
    pub fetch: Option<FetchSection>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path.as_path(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct EventLoopConfig {
    /// "system" or "virtual". Unknown values fall back to "system".
    pub clock: Option<String>,
    #[serde(default)]
    pub unhandled_rejection: UnhandledRejectionPolicy,
    pub max_microtasks_per_checkpoint: Option<usize>,
    pub io_worker_threads: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FetchSection {
    pub user_agent: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: Option<String>,
    /// Log file path. `~` and `${VAR}` are expanded.
    pub file: Option<String>,
}

/// Replace `${VAR}` with the variable's value; unset variables become empty.
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let Some(end_rel) = rest[start + 2..].find('}') else {
            break;
        };
        let end = start + 2 + end_rel;
        out.push_str(&rest[..start]);
        let var = &rest[start + 2..end];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &rest[end + 1..];
    }

    out.push_str(rest);
    out
}

fn expand_path(value: &str) -> PathBuf {
    let expanded = expand_env_vars(value);
    if let Some(stripped) = expanded.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    PathBuf::from(expanded)
}

impl PledgeConfig {
    /// Load from [`config_path`]. A missing file is `Ok(None)`.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file");
            return Ok(None);
        }

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    #[must_use]
    pub fn loop_config(&self) -> LoopConfig {
        let mut config = LoopConfig::default();
        let Some(section) = &self.event_loop else {
            return config;
        };

        if let Some(raw) = section.clock.as_deref() {
            let raw = expand_env_vars(raw);
            match ClockKind::parse(&raw) {
                Some(kind) => config.clock = kind,
                None => tracing::warn!(clock = %raw, "Unknown clock, using system"),
            }
        }
        config.unhandled_rejection = section.unhandled_rejection;
        match section.max_microtasks_per_checkpoint {
            Some(0) => tracing::warn!("max_microtasks_per_checkpoint must be positive, ignoring"),
            Some(limit) => config.max_microtasks_per_checkpoint = limit,
            None => {}
        }
        if let Some(threads) = section.io_worker_threads.filter(|n| *n > 0) {
            config.io_worker_threads = threads;
        }
        config
    }

    #[must_use]
    pub fn fetch_config(&self) -> FetchConfig {
        let mut config = FetchConfig::default();
        let Some(section) = &self.fetch else {
            return config;
        };

        if let Some(agent) = section.user_agent.as_deref() {
            let agent = expand_env_vars(agent);
            if !agent.trim().is_empty() {
                config.user_agent = agent;
            }
        }
        if let Some(secs) = section.timeout_seconds {
            config.timeout = Duration::from_secs(secs);
        }
        config
    }

    #[must_use]
    pub fn log_level(&self) -> Option<&str> {
        self.logging.as_ref()?.level.as_deref()
    }

    #[must_use]
    pub fn log_file(&self) -> Option<PathBuf> {
        self.logging.as_ref()?.file.as_deref().map(expand_path)
    }
}

/// `$PLEDGE_CONFIG` if set, otherwise `~/.pledge/config.toml`.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".pledge").join("config.toml"))
}
