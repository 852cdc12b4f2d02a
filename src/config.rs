//! Settings file loading and runtime options.
//!
//! The YAML settings file is read once at process start into [`Config`], which is
//! then passed by reference to every component that needs it.

use crate::constants::{
    APP_DIR, DEFAULT_GIT_USER, DEFAULT_REMOTE_COMMAND, SETTINGS_FILE, SYSTEM_SETTINGS_PATH,
};
use crate::error::ConfigError;
use crate::git::{self, GitLogger};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A named server entry from the `Servers` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServerAlias {
    /// Alias name, filled in from the table key after loading.
    #[serde(skip)]
    pub name: String,
    #[serde(rename = "url", deserialize_with = "one_or_many")]
    pub urls: Vec<String>,
    #[serde(rename = "env")]
    pub environment: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub group: String,
    /// OS user that git runs as on this host.
    #[serde(default)]
    pub git_user: Option<String>,
    /// Per-server SSH login, overriding the operator's remote user.
    #[serde(default)]
    pub ssh_user: Option<String>,
}

impl ServerAlias {
    #[must_use]
    pub fn git_user(&self) -> &str {
        self.git_user.as_deref().unwrap_or(DEFAULT_GIT_USER)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EmailSettings {
    #[serde(default)]
    pub email_host: String,
    #[serde(default)]
    pub email_from: String,
    /// Recipient forwarded to remote hosts for branch-change notices.
    #[serde(default)]
    pub email_to: String,
}

/// Everything read from the settings file, plus runtime verbosity.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Config {
    #[serde(default, deserialize_with = "null_as_default")]
    pub servers: BTreeMap<String, ServerAlias>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub server_groups: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub environments: Vec<String>,
    #[serde(default)]
    pub default_dir: Option<PathBuf>,
    #[serde(default)]
    pub merge_dir: Option<PathBuf>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub repositories: Vec<String>,
    #[serde(default)]
    pub git_server: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub email_settings: EmailSettings,
    #[serde(default)]
    pub remote_command: Option<String>,
    /// Settings file the remote command is told to read. Without it the remote
    /// side searches its own defaults.
    #[serde(default)]
    pub remote_config: Option<String>,

    /// Controls the verbosity level of CLI output.
    #[serde(skip)]
    pub verbosity: Verbosity,
}

impl Config {
    /// Loads the settings file at `path`, or the first default location that
    /// exists when `None`.
    pub fn load_or_default_path(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Self::load(&Self::search_path()?),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        tracing::info!(path = %path.display(), "Loading settings");

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&content).map_err(|e| match e {
            ConfigError::Yaml { source, .. } => ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;

        tracing::debug!(
            servers = config.servers.len(),
            repositories = config.repositories.len(),
            "Settings loaded"
        );
        Ok(config)
    }

    /// Parses and validates settings from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yaml::from_str(content).map_err(|source| ConfigError::Yaml {
            path: PathBuf::new(),
            source,
        })?;
        for (name, server) in &mut config.servers {
            server.name.clone_from(name);
        }
        config.validate()?;
        Ok(config)
    }

    /// `~/.config/gpull/settings.yaml` on every platform.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(home.join(".config").join(APP_DIR).join(SETTINGS_FILE))
    }

    /// The per-user settings file, else `/etc/gpull/settings.yaml`. Under
    /// `sudo` HOME points at root's home, so remote runs rely on the latter.
    pub fn search_path() -> Result<PathBuf, ConfigError> {
        let system = PathBuf::from(SYSTEM_SETTINGS_PATH);
        let candidates = match Self::default_path() {
            Ok(home) => vec![home, system],
            Err(_) => vec![system],
        };
        match first_existing(&candidates) {
            Some(found) => Ok(found.to_path_buf()),
            None => Err(ConfigError::NotFound(candidates.into_iter().next().unwrap_or_default())),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, server) in &self.servers {
            if server.urls.is_empty() {
                return Err(ConfigError::InvalidServer {
                    alias: name.clone(),
                    reason: "no url configured".to_string(),
                });
            }
            if server.environment.is_empty() {
                return Err(ConfigError::InvalidServer {
                    alias: name.clone(),
                    reason: "no env configured".to_string(),
                });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Directory pulled when no path is given; the working directory if unset.
    #[must_use]
    pub fn default_dir(&self) -> PathBuf {
        self.default_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn merge_dir(&self) -> Result<&Path, ConfigError> {
        self.merge_dir
            .as_deref()
            .ok_or(ConfigError::MissingKey("MergeDir"))
    }

    pub fn git_server(&self) -> Result<&str, ConfigError> {
        self.git_server
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingKey("GitServer"))
    }

    #[must_use]
    pub fn remote_command(&self) -> &str {
        self.remote_command
            .as_deref()
            .unwrap_or(DEFAULT_REMOTE_COMMAND)
    }

    #[must_use]
    pub fn is_verbose(&self) -> bool {
        self.verbosity == Verbosity::Verbose
    }

    /// Returns the appropriate git logger based on verbosity settings.
    ///
    /// Config only chooses which callback runs; the loggers themselves live in
    /// the git module.
    #[must_use]
    pub fn git_logger(&self) -> GitLogger {
        if self.is_verbose() {
            git::verbose_logger
        } else {
            git::no_op_logger
        }
    }
}

/// Verbosity level for CLI output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

impl Verbosity {
    #[must_use]
    pub fn from_flags(quiet: bool, verbose: bool) -> Self {
        match (quiet, verbose) {
            (true, _) => Verbosity::Quiet,
            (false, true) => Verbosity::Verbose,
            (false, false) => Verbosity::Normal,
        }
    }
}

fn first_existing(candidates: &[PathBuf]) -> Option<&Path> {
    candidates.iter().map(PathBuf::as_path).find(|p| p.is_file())
}

/// Treats an explicit YAML `null` the same as a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts either `url: host` or `url: [host, ...]`.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
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
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
    })
}
