//! Process configuration
//!
//! Loaded once at startup from a RON file, or JSON when the file name ends
//! in `.json`. The JSON form accepts the legacy `config.json` spelling
//! (`Beanstalk`, `From`, `User`, ...).

use std::{
    io,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use smtpw_common::{ConfigError, TenantRegistry};
use smtpw_delivery::WorkerConfig;
use thiserror::Error;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "SMTPW_CONFIG";

fn default_tube() -> String {
    "email".to_string()
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read config from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid RON in {}: {source}", path.display())]
    Ron {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },

    #[error("Invalid JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{origin} points to non-existent file: {}", path.display())]
    Missing { origin: &'static str, path: PathBuf },

    #[error("No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{tried}")]
    NotFound { tried: String },

    #[error("Missing queue address (beanstalk)")]
    NoQueue,

    #[error("Missing tube name")]
    NoTube,

    #[error(transparent)]
    Tenant(#[from] ConfigError),
}

/// Everything the worker needs to start
#[derive(Debug, Deserialize)]
pub struct Config {
    /// beanstalkd address, `host` or `host:port`
    #[serde(alias = "Beanstalk")]
    pub beanstalk: String,

    #[serde(default = "default_tube", alias = "Tube")]
    pub tube: String,

    /// Sender identities, keyed by the name jobs put in `From`
    #[serde(alias = "From")]
    pub from: TenantRegistry,

    #[serde(default, alias = "Worker")]
    pub worker: WorkerConfig,
}

impl Config {
    /// Read, parse and validate the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, does not parse, or fails
    /// validation.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::parse(path, &content)?;
        config.validate()?;
        Ok(config)
    }

    fn parse(path: &Path, content: &str) -> Result<Self, LoadError> {
        let json = path
            .extension()
            .is_some_and(|extension| extension.eq_ignore_ascii_case("json"));

        if json {
            serde_json::from_str(content).map_err(|source| LoadError::Json {
                path: path.to_path_buf(),
                source,
            })
        } else {
            ron::from_str(content).map_err(|source| LoadError::Ron {
                path: path.to_path_buf(),
                source,
            })
        }
    }

    /// Check the queue settings and every sender identity.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.beanstalk.trim().is_empty() {
            return Err(LoadError::NoQueue);
        }

        if self.tube.trim().is_empty() {
            return Err(LoadError::NoTube);
        }

        self.from.validate()?;
        Ok(())
    }
}

fn default_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("./smtpw.config.ron"),
        PathBuf::from("/etc/smtpw/smtpw.config.ron"),
    ]
}

/// Find the configuration file using the following precedence:
/// 1. `explicit` (the `-c` flag)
/// 2. `SMTPW_CONFIG` environment variable
/// 3. ./smtpw.config.ron (current working directory)
/// 4. /etc/smtpw/smtpw.config.ron (system-wide config)
///
/// # Errors
///
/// Returns an error if an explicitly named file does not exist, or if none
/// of the default locations holds one.
pub fn locate(explicit: Option<PathBuf>) -> Result<PathBuf, LoadError> {
    let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
    resolve(explicit, from_env, &default_paths())
}

fn resolve(
    explicit: Option<PathBuf>,
    from_env: Option<PathBuf>,
    defaults: &[PathBuf],
) -> Result<PathBuf, LoadError> {
    let named = explicit
        .map(|path| ("--config", path))
        .or_else(|| from_env.map(|path| (CONFIG_ENV, path)));

    if let Some((origin, path)) = named {
        if path.exists() {
            return Ok(path);
        }
        return Err(LoadError::Missing { origin, path });
    }

    if let Some(path) = defaults.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let tried = defaults
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(LoadError::NotFound { tried })
}
