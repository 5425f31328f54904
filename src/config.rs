//! YAML configuration loading and validation.
//!
//! The config file names what to back up, where snapshots live, and the
//! retention/preflight knobs. Unless `--config` points somewhere else it
//! is searched at `$XDG_CONFIG_HOME/timevault.yaml`, then
//! `/etc/timevault.yaml`.
//!
//! ```yaml
//! source:
//!   - /home/alice
//!   - /etc
//! destination: nas:/volume1/tm
//! exclude:
//!   - "*.cache"
//!   - node_modules
//! smart_remove:
//!   keep_all: 1
//!   keep_one_per_day: 7
//!   keep_one_per_week: 4
//!   keep_one_per_month: 12
//! free_space:
//!   min_space: 1024
//!   min_inodes: 100000
//! ```

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::preflight::FreeSpaceRequirement;
use crate::retention::RetentionPolicy;
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::{Path, PathBuf};

/// Base name of the config file in the search locations.
pub const CONFIG_BASENAME: &str = "timevault.yaml";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Source trees to snapshot; a single string is accepted for one
    /// source.
    #[serde(deserialize_with = "one_or_many")]
    pub source: Vec<String>,
    /// Snapshot store root, local path or `user@host:path`.
    pub destination: String,
    /// Glob patterns excluded at every directory depth.
    #[serde(default, deserialize_with = "one_or_many")]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub smart_remove: RetentionPolicy,
    #[serde(default)]
    pub free_space: FreeSpaceRequirement,
    /// Remote-shell override handed to the transfer tool verbatim
    /// (`rsync -e`). Empty means the tool's default remote protocol.
    #[serde(default)]
    pub rsh_command: Option<String>,
}

/// Accept either a scalar string or a sequence of strings.
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

/// Config file locations probed when `--config` is not given.
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    let xdg = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")));
    if let Some(dir) = xdg {
        paths.push(dir.join(CONFIG_BASENAME));
    }
    paths.push(Path::new("/etc").join(CONFIG_BASENAME));
    paths
}

impl Config {
    /// Load and validate a config, either from the explicit path or from
    /// the first existing default location.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_path(path);
        }
        for path in default_config_paths() {
            if path.exists() {
                return Self::from_path(&path);
            }
        }
        Err(Error::Config {
            reason: format!(
                "no config file found; pass --config or create one of: {}",
                default_config_paths()
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::Config {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::parse(&text).map_err(|e| match e {
            Error::Config { reason } => Error::Config {
                reason: format!("{}: {reason}", path.display()),
            },
            other => other,
        })
    }

    /// Parse and validate config text.
    pub fn parse(text: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(text).map_err(|e| Error::Config { reason: e.to_string() })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.source.is_empty() {
            return Err(Error::Config {
                reason: "at least one source is required".into(),
            });
        }
        if self.destination.trim().is_empty() {
            return Err(Error::Config {
                reason: "destination must not be empty".into(),
            });
        }

        let sources = self.source_endpoints();
        let remote_sources = sources.iter().filter(|s| s.is_remote()).count();
        if remote_sources != 0 && remote_sources != sources.len() {
            return Err(Error::Config {
                reason: "sources must be all local or all remote".into(),
            });
        }
        if remote_sources > 0 && self.destination_endpoint().is_remote() {
            return Err(Error::Config {
                reason: "remote-to-remote transfers are not supported; \
                         at most one side may be remote"
                    .into(),
            });
        }
        Ok(())
    }

    pub fn source_endpoints(&self) -> Vec<Endpoint> {
        self.source.iter().map(|s| Endpoint::parse(s)).collect()
    }

    pub fn destination_endpoint(&self) -> Endpoint {
        Endpoint::parse(&self.destination)
    }
}
