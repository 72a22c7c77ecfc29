//! Where the daemon reads its bindings and interfaces from.

use crate::error::Result;
use async_trait::async_trait;
use netmux_core::MuxConfig;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Supplies the configuration on start and on every reload.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn load(&self) -> Result<MuxConfig>;

    /// Human-readable origin, for logs.
    fn describe(&self) -> String;
}

/// Configuration read from a TOML file.
#[derive(Debug, Clone)]
pub struct TomlFileSource {
    path: PathBuf,
}

impl TomlFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConfigSource for TomlFileSource {
    async fn load(&self) -> Result<MuxConfig> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        let config = MuxConfig::from_toml_str(&contents)?;
        debug!(path = %self.path.display(), bindings = config.bindings.len(), "configuration loaded");
        Ok(config)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Fixed in-memory configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    config: MuxConfig,
}

impl StaticSource {
    pub fn new(config: MuxConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ConfigSource for StaticSource {
    async fn load(&self) -> Result<MuxConfig> {
        Ok(self.config.clone())
    }

    fn describe(&self) -> String {
        "static".to_string()
    }
}
