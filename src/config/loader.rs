use super::{get_global_cadence_dir, CadenceConfig};
use crate::error::{CadenceError, ErrorCode, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Name of the project-local configuration file
pub const CONFIG_FILE_NAME: &str = "cadence.toml";

/// Resolves, reads and validates the configuration file
pub struct ConfigLoader {
    explicit: Option<PathBuf>,
    search_dir: PathBuf,
}

impl ConfigLoader {
    /// Loader that honours an explicit `--config` path when given
    pub fn new(explicit: Option<PathBuf>) -> Self {
        Self {
            explicit,
            search_dir: PathBuf::from("."),
        }
    }

    /// Look for `cadence.toml` in `dir` instead of the working directory
    pub fn with_search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_dir = dir.into();
        self
    }

    /// First existing candidate: explicit path, local file, global file
    pub fn resolve_path(&self) -> Result<Option<PathBuf>> {
        if let Some(path) = &self.explicit {
            if !path.exists() {
                return Err(CadenceError::config_with_code(
                    ErrorCode::CONFIG_NOT_FOUND,
                    format!("Configuration file not found: {}", path.display()),
                ));
            }
            return Ok(Some(path.clone()));
        }

        let local = self.search_dir.join(CONFIG_FILE_NAME);
        if local.exists() {
            return Ok(Some(local));
        }

        if let Ok(global_dir) = get_global_cadence_dir() {
            let global = global_dir.join(CONFIG_FILE_NAME);
            if global.exists() {
                return Ok(Some(global));
            }
        }

        Ok(None)
    }

    /// Load, apply environment overrides and validate
    pub async fn load(&self) -> Result<CadenceConfig> {
        let mut config = match self.resolve_path()? {
            Some(path) => {
                debug!("Loading configuration from {}", path.display());
                Self::read_file(&path).await?
            }
            None => {
                debug!("No configuration file found, using defaults");
                CadenceConfig::default()
            }
        };

        config.merge_env_vars();
        config.validate()?;
        Ok(config)
    }

    async fn read_file(path: &Path) -> Result<CadenceConfig> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            CadenceError::config(format!("Failed to read {}", path.display())).with_source(e)
        })?;
        parse_config(&content).map_err(|e| e.with_context(path.display()))
    }
}

/// Parse TOML configuration text
pub fn parse_config(content: &str) -> Result<CadenceConfig> {
    toml::from_str(content).map_err(|e| {
        CadenceError::config_with_code(ErrorCode::CONFIG_PARSE_ERROR, e.message().to_string())
            .with_source(e)
    })
}
