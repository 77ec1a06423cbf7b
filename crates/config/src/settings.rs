// Fixture settings
// Loaded from ~/.config/dbfixture/config.toml or an explicit --config file

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use dbfixture_engine::{FixtureError, FixtureResult, LoadStrategy};

fn default_connection_name() -> String {
    "default".to_string()
}

/// One named database connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// SQLite database file
    pub path: PathBuf,

    /// Strategy the engine starts with; datasets may still override it
    #[serde(default)]
    pub load_strategy: Option<LoadStrategy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureSettings {
    /// Connection used when none is named on the command line
    #[serde(default = "default_connection_name")]
    pub default_connection: String,

    /// Directory relative dataset paths resolve against
    #[serde(default)]
    pub dataset_dir: Option<PathBuf>,

    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionSettings>,
}

impl FixtureSettings {
    /// Get the settings file path
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dbfixture");
        config_dir.join("config.toml")
    }

    pub fn from_toml(input: &str) -> FixtureResult<Self> {
        let settings: FixtureSettings = toml::from_str(input)
            .map_err(|e| FixtureError::Configuration(format!("cannot parse settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load_from(path: &Path) -> FixtureResult<Self> {
        let contents = fs::read_to_string(path).map_err(|e| FixtureError::io(path, e))?;
        let settings = Self::from_toml(&contents).map_err(|e| match e {
            FixtureError::Configuration(msg) => {
                FixtureError::Configuration(format!("{}: {msg}", path.display()))
            }
            other => other,
        })?;
        tracing::debug!(
            path = %path.display(),
            connections = settings.connections.len(),
            "settings loaded"
        );
        Ok(settings)
    }

    /// Load the user's settings file from [`Self::config_path`].
    pub fn load() -> FixtureResult<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Err(FixtureError::Configuration(format!(
                "no settings file at {}",
                path.display()
            )));
        }
        Self::load_from(&path)
    }

    pub fn validate(&self) -> FixtureResult<()> {
        if self.connections.is_empty() {
            return Err(FixtureError::Configuration(
                "at least one connection is required".into(),
            ));
        }

        for (name, conn) in &self.connections {
            if name.trim().is_empty() {
                return Err(FixtureError::Configuration(
                    "connection names must not be empty".into(),
                ));
            }
            if conn.path.as_os_str().is_empty() {
                return Err(FixtureError::Configuration(format!(
                    "connection '{name}' has an empty path"
                )));
            }
        }

        if !self.connections.contains_key(&self.default_connection) {
            return Err(FixtureError::Configuration(format!(
                "default connection '{}' is not configured",
                self.default_connection
            )));
        }

        Ok(())
    }

    pub fn connection(&self, name: &str) -> FixtureResult<&ConnectionSettings> {
        self.connections.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.connections.keys().map(String::as_str).collect();
            FixtureError::Configuration(format!(
                "unknown connection '{name}' (configured: {})",
                known.join(", ")
            ))
        })
    }

    /// `path` as given when absolute, else under `dataset_dir` if one is set.
    pub fn dataset_path(&self, path: &Path) -> PathBuf {
        match &self.dataset_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}
