//! Filesystem hook set
//!
//! Canonical names map to files under a root directory; a name without an
//! extension gets the configured one appended.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::{normalize_specifier, LoadRequest, LoaderHooks};
use crate::config::SourceConfig;

/// Hooks reading module sources from disk
#[derive(Debug, Clone)]
pub struct FileSystemHooks {
    root: PathBuf,
    extension: String,
}

impl FileSystemHooks {
    pub fn new<P: AsRef<Path>>(root: P, extension: &str) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(&config.root, &config.extension)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path a canonical name lives at
    pub fn path_for(&self, name: &str) -> PathBuf {
        let path = self.root.join(name);
        if path.extension().is_some() || self.extension.is_empty() {
            path
        } else {
            path.with_extension(&self.extension)
        }
    }
}

#[async_trait(?Send)]
impl LoaderHooks for FileSystemHooks {
    fn normalize(
        &self,
        specifier: &str,
        referrer_name: Option<&str>,
        _referrer_address: Option<&str>,
    ) -> Result<String> {
        normalize_specifier(specifier, referrer_name)
    }

    fn locate(&self, request: &LoadRequest) -> Result<String> {
        Ok(self.path_for(&request.name).display().to_string())
    }

    async fn fetch(&self, request: LoadRequest) -> Result<String> {
        let path = match &request.address {
            Some(address) => PathBuf::from(address),
            None => self.path_for(&request.name),
        };
        debug!("Reading module {} from {}", request.name, path.display());
        tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))
    }
}
