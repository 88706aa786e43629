// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! gitgov-config
//!
//! The two configuration layers under `.gitgov/`: the shared project
//! configuration (`config.json`, synced) and the per-machine session state
//! (`.session.json`, LOCAL_ONLY). Both managers fall back to defaults with
//! a warning when the file is missing or unreadable, so a half-initialized
//! repository never blocks read paths.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// File name of the shared project configuration.
pub const CONFIG_FILE: &str = "config.json";
/// File name of the local session state.
pub const SESSION_FILE: &str = ".session.json";
/// Default state branch name.
pub const DEFAULT_STATE_BRANCH: &str = "gitgov-state";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading or saving.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("config file not found: {path}")]
    NotFound {
        /// Path that was requested.
        path: PathBuf,
    },

    /// The file exists but is not valid JSON for the expected shape.
    #[error("failed to parse {path}: {reason}")]
    Parse {
        /// Path of the offending file.
        path: PathBuf,
        /// Parse error detail.
        reason: String,
    },

    /// Reading or writing the file failed.
    #[error("io error on {path}: {source}")]
    Io {
        /// Path of the offending file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Project configuration
// ---------------------------------------------------------------------------

/// `.gitgov/config.json` — shared across all participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitgovConfig {
    /// Record protocol version this repository speaks.
    pub protocol_version: String,
    /// Stable project identifier.
    pub project_id: String,
    /// Human-readable project name.
    pub project_name: String,
    /// ID of the root cycle, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cycle: Option<String>,
    /// State-branch settings.
    #[serde(default)]
    pub state: StateSection,
}

impl GitgovConfig {
    /// A minimal configuration for a freshly initialized project.
    #[must_use]
    pub fn new(project_id: impl Into<String>, project_name: impl Into<String>) -> Self {
        Self {
            protocol_version: "1.0".into(),
            project_id: project_id.into(),
            project_name: project_name.into(),
            root_cycle: None,
            state: StateSection::default(),
        }
    }
}

/// The `state` section of the project configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSection {
    /// Name of the shared state branch.
    pub branch: String,
    /// Project-level defaults for background machinery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<StateDefaults>,
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            branch: DEFAULT_STATE_BRANCH.into(),
            defaults: None,
        }
    }
}

/// Project-level defaults nested under `state.defaults`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDefaults {
    /// Defaults for the pull scheduler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_scheduler: Option<PullSchedulerDefaults>,
}

/// Pull-scheduler defaults a project can ship for its participants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullSchedulerDefaults {
    /// Whether the scheduler starts enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_enabled: Option<bool>,
    /// Seconds between background pulls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_interval_seconds: Option<u64>,
    /// Keep ticking through transient network errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_on_network_error: Option<bool>,
    /// Stop the scheduler when a conflict is detected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_on_conflict: Option<bool>,
}

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// `.gitgov/.session.json` — per-machine, never synced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// The actor this machine operates as.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    /// Session-level scheduler overrides; highest-priority config layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_scheduler: Option<PullSchedulerDefaults>,
}

// ---------------------------------------------------------------------------
// Managers
// ---------------------------------------------------------------------------

/// Loads and saves the shared project configuration.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    gitgov_dir: PathBuf,
}

impl ConfigManager {
    /// Manager rooted at a `.gitgov/` directory.
    #[must_use]
    pub fn new(gitgov_dir: impl Into<PathBuf>) -> Self {
        Self {
            gitgov_dir: gitgov_dir.into(),
        }
    }

    /// Path of `config.json`.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.gitgov_dir.join(CONFIG_FILE)
    }

    /// Load the configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NotFound`] when the file is missing,
    /// [`ConfigError::Parse`] when it is malformed.
    pub async fn load(&self) -> Result<GitgovConfig, ConfigError> {
        read_json(&self.path()).await
    }

    /// Load the configuration, falling back to `fallback` (with a warning)
    /// when the file is missing or malformed.
    pub async fn load_or(&self, fallback: GitgovConfig) -> GitgovConfig {
        match self.load().await {
            Ok(config) => config,
            Err(err) => {
                warn!(error = %err, "config load failed; using defaults");
                fallback
            }
        }
    }

    /// Write the configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] when the file cannot be written.
    pub async fn save(&self, config: &GitgovConfig) -> Result<(), ConfigError> {
        write_json(&self.path(), config).await
    }
}

/// Loads and saves the local session state.
#[derive(Debug, Clone)]
pub struct SessionManager {
    gitgov_dir: PathBuf,
}

impl SessionManager {
    /// Manager rooted at a `.gitgov/` directory.
    #[must_use]
    pub fn new(gitgov_dir: impl Into<PathBuf>) -> Self {
        Self {
            gitgov_dir: gitgov_dir.into(),
        }
    }

    /// Path of `.session.json`.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.gitgov_dir.join(SESSION_FILE)
    }

    /// Load the session, falling back to an empty one when the file is
    /// missing. Malformed sessions also fall back, with a warning.
    pub async fn load(&self) -> SessionState {
        match read_json::<SessionState>(&self.path()).await {
            Ok(session) => session,
            Err(ConfigError::NotFound { .. }) => SessionState::default(),
            Err(err) => {
                warn!(error = %err, "session load failed; starting empty");
                SessionState::default()
            }
        }
    }

    /// Write the session state.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] when the file cannot be written.
    pub async fn save(&self, session: &SessionState) -> Result<(), ConfigError> {
        write_json(&self.path(), session).await
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        Err(err) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: err,
            });
        }
    };
    serde_json::from_str(&text).map_err(|err| ConfigError::Parse {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    let text = serde_json::to_string_pretty(value).map_err(|err| ConfigError::Parse {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    tokio::fs::write(path, text).await.map_err(io_err)
}
