//! In-memory hook set
//!
//! Sources are registered up front (or between loads) by canonical name.
//! Fetches yield to the executor once before answering, so every load goes
//! through a real suspension point.

use std::cell::RefCell;
use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::trace;

use super::{normalize_specifier, LoadRequest, LoaderHooks};

const ADDRESS_SCHEME: &str = "memory:///";

/// Hooks serving sources from a map
#[derive(Debug, Default)]
pub struct MemoryHooks {
    sources: RefCell<HashMap<String, String>>,
    fetch_counts: RefCell<HashMap<String, usize>>,
}

impl MemoryHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration
    pub fn with_source(self, name: &str, source: &str) -> Self {
        self.insert(name, source);
        self
    }

    /// Register or replace the source for a canonical name
    pub fn insert(&self, name: &str, source: &str) {
        self.sources
            .borrow_mut()
            .insert(name.to_string(), source.to_string());
    }

    pub fn remove(&self, name: &str) -> Option<String> {
        self.sources.borrow_mut().remove(name)
    }

    /// How many times `name` has been fetched
    pub fn fetch_count(&self, name: &str) -> usize {
        self.fetch_counts.borrow().get(name).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetch_counts.borrow().values().sum()
    }
}

#[async_trait(?Send)]
impl LoaderHooks for MemoryHooks {
    fn normalize(
        &self,
        specifier: &str,
        referrer_name: Option<&str>,
        _referrer_address: Option<&str>,
    ) -> Result<String> {
        normalize_specifier(specifier, referrer_name)
    }

    fn locate(&self, request: &LoadRequest) -> Result<String> {
        Ok(format!("{}{}", ADDRESS_SCHEME, request.name))
    }

    async fn fetch(&self, request: LoadRequest) -> Result<String> {
        *self
            .fetch_counts
            .borrow_mut()
            .entry(request.name.clone())
            .or_insert(0) += 1;

        tokio::task::yield_now().await;

        let name = request
            .address
            .as_deref()
            .and_then(|address| address.strip_prefix(ADDRESS_SCHEME))
            .unwrap_or(&request.name);
        trace!("memory fetch {}", name);
        self.sources
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("no source registered for '{}'", name))
    }
}
