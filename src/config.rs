use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::catalog::{ColumnCatalog, DEFAULT_TABLE};

/// Settings read from the optional YAML config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: PathBuf,
    pub table: String,
    /// Logical field name to physical column name overrides.
    pub columns: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: PathBuf::from("lottery.db"),
            table: DEFAULT_TABLE.to_string(),
            columns: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("Opening config file {path:?}"))?;
        let config: Config =
            serde_yaml::from_str(&raw).with_context(|| format!("Parsing config file {path:?}"))?;
        ensure!(
            !config.table.trim().is_empty(),
            "Config file {path:?} sets an empty table name"
        );
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let serialized = serde_yaml::to_string(self).context("Serializing config")?;
        fs::write(path, serialized).with_context(|| format!("Writing config file {path:?}"))
    }

    /// Loads `path` when given, then applies command-line overrides.
    pub fn resolve(path: Option<&Path>, database: Option<&Path>, table: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        if let Some(database) = database {
            config.database = database.to_path_buf();
        }
        if let Some(table) = table.map(str::trim).filter(|t| !t.is_empty()) {
            config.table = table.to_string();
        }
        Ok(config)
    }

    pub fn catalog(&self) -> Result<ColumnCatalog> {
        ColumnCatalog::with_overrides(&self.columns).context("Applying column overrides")
    }
}
