//! Client configuration.
//!
//! Config file lives at `~/.config/blackholio/client.toml`. Values resolve as
//! CLI flags (or their env vars) > config file > defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::credentials::CredentialStore;

/// Default service address.
pub const DEFAULT_SERVER_URL: &str = blackholio_sdk::client::DEFAULT_URI;
/// Default module name.
pub const DEFAULT_MODULE_NAME: &str = blackholio_sdk::client::DEFAULT_MODULE_NAME;
pub const DEFAULT_BORDER_THICKNESS: f32 = 2.0;
pub const DEFAULT_BORDER_MATERIAL: &str = "border";
pub const DEFAULT_FRAME_RATE: u32 = 60;

/// Border bars only sit flush with a finite, positive thickness.
pub fn valid_thickness(thickness: f32) -> bool {
    thickness.is_finite() && thickness > 0.0
}

#[derive(Debug, Clone, Parser)]
#[command(name = "blackholio-client", about = "Blackholio arena client")]
pub struct Cli {
    /// Service address.
    #[arg(long, env = "BLACKHOLIO_SERVER")]
    pub server: Option<String>,
    /// Module name on the service.
    #[arg(long, env = "BLACKHOLIO_MODULE")]
    pub module: Option<String>,
    /// Thickness of the arena border bars.
    #[arg(long)]
    pub border_thickness: Option<f32>,
    /// Material assigned to border bars.
    #[arg(long)]
    pub border_material: Option<String>,
    /// Update cycles per second.
    #[arg(long)]
    pub frame_rate: Option<u32>,
    /// World size seeded into the in-process module.
    #[arg(long, default_value_t = blackholio_sdk::loopback::DEFAULT_WORLD_SIZE)]
    pub world_size: u64,
    /// Preferences file holding the auth token.
    #[arg(long)]
    pub prefs: Option<PathBuf>,
    /// Config file (default: ~/.config/blackholio/client.toml).
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Disconnect and exit once the arena is built.
    #[arg(long)]
    pub exit_after_setup: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("can't read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("bad config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Persisted settings (client.toml). Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileConfig {
    pub server: Option<String>,
    pub module: Option<String>,
    pub border_thickness: Option<f32>,
    pub border_material: Option<String>,
    pub frame_rate: Option<u32>,
    pub prefs: Option<PathBuf>,
}

impl FileConfig {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("blackholio")
            .join("client.toml")
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let body = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&body).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Effective settings after merging every source.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub server_url: String,
    pub module_name: String,
    pub border_thickness: f32,
    pub border_material: String,
    pub frame_rate: u32,
    pub prefs_path: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            module_name: DEFAULT_MODULE_NAME.to_string(),
            border_thickness: DEFAULT_BORDER_THICKNESS,
            border_material: DEFAULT_BORDER_MATERIAL.to_string(),
            frame_rate: DEFAULT_FRAME_RATE,
            prefs_path: CredentialStore::default_path(),
        }
    }
}

impl ClientConfig {
    /// Merge: CLI overrides > config file > defaults.
    pub fn merge(cli: &Cli, file: &FileConfig) -> Self {
        let defaults = Self::default();
        Self {
            server_url: cli
                .server
                .clone()
                .or_else(|| file.server.clone())
                .unwrap_or(defaults.server_url),
            module_name: cli
                .module
                .clone()
                .or_else(|| file.module.clone())
                .unwrap_or(defaults.module_name),
            border_thickness: cli
                .border_thickness
                .filter(|t| valid_thickness(*t))
                .or(file.border_thickness.filter(|t| valid_thickness(*t)))
                .unwrap_or(defaults.border_thickness),
            border_material: cli
                .border_material
                .clone()
                .or_else(|| file.border_material.clone())
                .unwrap_or(defaults.border_material),
            frame_rate: cli
                .frame_rate
                .or(file.frame_rate)
                .filter(|fps| *fps > 0)
                .unwrap_or(defaults.frame_rate),
            prefs_path: cli
                .prefs
                .clone()
                .or_else(|| file.prefs.clone())
                .unwrap_or(defaults.prefs_path),
        }
    }

    /// Time between update cycles.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.frame_rate.max(1)))
    }
}
