use anyhow::{Context, Result};
use garden_core::conversation::DEFAULT_OWNER_ID;
use garden_query::QueryConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GardenConfig {
    pub database_path: Option<PathBuf>,
    pub owner_id: String,
    pub enable_pii: bool,
    /// Overrides `query.default_model` when set.
    pub default_model: Option<String>,
    pub log_level: String,
    pub query: QueryConfig,
}

impl Default for GardenConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            owner_id: DEFAULT_OWNER_ID.to_string(),
            enable_pii: true,
            default_model: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            query: QueryConfig::default(),
        }
    }
}

impl GardenConfig {
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| state_dir().join("garden/garden.db"))
    }

    pub fn query_config(&self) -> QueryConfig {
        let mut query = self.query.clone();
        if let Some(model) = self
            .default_model
            .as_deref()
            .filter(|model| !model.trim().is_empty())
        {
            query.default_model = model.to_string();
        }
        query
    }

    /// Applies `GARDEN_DB_PATH` and `GARDEN_OWNER_ID` style overrides read
    /// through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("GARDEN_DB_PATH").filter(|value| !value.trim().is_empty()) {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(owner_id) = lookup("GARDEN_OWNER_ID").filter(|value| !value.trim().is_empty())
        {
            self.owner_id = owner_id;
        }
    }
}

/// Missing file means defaults; a file that exists but does not parse is an
/// error.
pub fn load_config(path: &Path) -> Result<GardenConfig> {
    if !path.exists() {
        return Ok(GardenConfig::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("failed to parse config {}", path.display()))
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = env::var("GARDEN_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    config_dir().join("garden/config.toml")
}

fn config_dir() -> PathBuf {
    if let Ok(path) = env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(path);
    }
    home_dir().join(".config")
}

fn state_dir() -> PathBuf {
    if let Ok(path) = env::var("XDG_STATE_HOME") {
        return PathBuf::from(path);
    }
    home_dir().join(".local/state")
}

fn home_dir() -> PathBuf {
    env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}
