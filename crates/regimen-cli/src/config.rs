//! Configuration file management for regimen.
//!
//! Provides a TOML-based config file at `~/.config/regimen/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use regimen_core::OrphanPolicy;
use regimen_db::config::DbConfig;

/// Default deadline for a single engine operation.
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default)]
    pub engine: EngineSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_timeout_secs")]
    pub operation_timeout_secs: u64,
    #[serde(default)]
    pub orphan_policy: OrphanPolicy,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
            orphan_policy: OrphanPolicy::default(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    DEFAULT_OPERATION_TIMEOUT_SECS
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the regimen config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/regimen` or `~/.config/regimen`,
/// also on macOS.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("regimen");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("regimen")
}

/// Return the path to the regimen config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    // The database URL may carry a password.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Engine knobs shared by the CLI commands and the HTTP handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub operation_timeout: Duration,
    pub orphan_policy: OrphanPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(DEFAULT_OPERATION_TIMEOUT_SECS),
            orphan_policy: OrphanPolicy::default(),
        }
    }
}

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct RegimenConfig {
    pub db_config: DbConfig,
    pub engine: EngineSettings,
}

impl RegimenConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - DB URL: `cli_db_url` > `REGIMEN_DATABASE_URL` > `database.url` > `DbConfig::DEFAULT_URL`
    /// - Timeout: `REGIMEN_OPERATION_TIMEOUT_SECS` > `engine.operation_timeout_secs` > 30
    /// - Orphan policy: `REGIMEN_ORPHAN_POLICY` > `engine.orphan_policy` > `purge_pending`
    /// - Pool size: `REGIMEN_DB_MAX_CONNECTIONS` > 10
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        let file_config = load_config().ok();

        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var("REGIMEN_DATABASE_URL") {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };

        let timeout_secs = if let Ok(raw) = std::env::var("REGIMEN_OPERATION_TIMEOUT_SECS") {
            raw.trim()
                .parse::<u64>()
                .with_context(|| format!("REGIMEN_OPERATION_TIMEOUT_SECS is not a number: {raw:?}"))?
        } else if let Some(ref cfg) = file_config {
            cfg.engine.operation_timeout_secs
        } else {
            DEFAULT_OPERATION_TIMEOUT_SECS
        };
        if timeout_secs == 0 {
            anyhow::bail!("operation timeout must be at least one second");
        }

        let orphan_policy = if let Ok(raw) = std::env::var("REGIMEN_ORPHAN_POLICY") {
            raw.parse::<OrphanPolicy>()
                .map_err(anyhow::Error::msg)
                .context("REGIMEN_ORPHAN_POLICY")?
        } else if let Some(ref cfg) = file_config {
            cfg.engine.orphan_policy
        } else {
            OrphanPolicy::default()
        };

        Ok(Self {
            db_config: DbConfig::new(db_url)
                .with_max_connections(DbConfig::from_env().max_connections),
            engine: EngineSettings {
                operation_timeout: Duration::from_secs(timeout_secs),
                orphan_policy,
            },
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
