//! Loader hooks
//!
//! Host-supplied functions that control how specifiers are resolved, where
//! sources live, how they are fetched, and how they are translated before
//! the loader parses them.
//!
//! ## Contract
//!
//! - `normalize` must be pure and idempotent: the same inputs always give the
//!   same canonical name, and normalizing a canonical name returns it.
//! - `fetch` is the only asynchronous hook; any number of fetches may be
//!   outstanding at once.
//! - `instantiate` may short-circuit evaluation by returning a finished
//!   [`Module`]. Such modules are leaves: their imports are not walked.

pub mod filesystem;
pub mod memory;
pub mod path;

pub use filesystem::FileSystemHooks;
pub use memory::MemoryHooks;
pub use path::normalize_specifier;

use std::rc::Rc;

use async_trait::async_trait;

use crate::namespace::Module;

/// Opaque host metadata threaded through every hook call for one load
pub type Metadata = serde_json::Value;

/// What the hooks know about one module load
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    /// Canonical name
    pub name: String,
    /// Address produced by `locate` (or supplied to `define`)
    pub address: Option<String>,
    pub metadata: Metadata,
}

impl LoadRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
            metadata: Metadata::Null,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Pluggable resolution, fetch and translation
#[async_trait(?Send)]
pub trait LoaderHooks {
    /// Map a raw specifier to a canonical name
    fn normalize(
        &self,
        specifier: &str,
        referrer_name: Option<&str>,
        referrer_address: Option<&str>,
    ) -> anyhow::Result<String>;

    /// Produce the address a canonical name is fetched from
    fn locate(&self, request: &LoadRequest) -> anyhow::Result<String>;

    /// Retrieve source text for a located module
    ///
    /// The returned future may use the loader itself, including awaiting
    /// another load to completion.
    async fn fetch(&self, request: LoadRequest) -> anyhow::Result<String>;

    /// Rewrite fetched source before it is parsed
    fn translate(&self, _request: &LoadRequest, source: String) -> anyhow::Result<String> {
        Ok(source)
    }

    /// Return a finished module, or `None` to let the loader parse, link and
    /// evaluate the source itself
    fn instantiate(&self, _request: &LoadRequest, _source: &str) -> anyhow::Result<Option<Module>> {
        Ok(None)
    }
}

/// Shared hooks, so a host can keep inspecting the set it handed to a loader
#[async_trait(?Send)]
impl<H: LoaderHooks + ?Sized> LoaderHooks for Rc<H> {
    fn normalize(
        &self,
        specifier: &str,
        referrer_name: Option<&str>,
        referrer_address: Option<&str>,
    ) -> anyhow::Result<String> {
        (**self).normalize(specifier, referrer_name, referrer_address)
    }

    fn locate(&self, request: &LoadRequest) -> anyhow::Result<String> {
        (**self).locate(request)
    }

    async fn fetch(&self, request: LoadRequest) -> anyhow::Result<String> {
        (**self).fetch(request).await
    }

    fn translate(&self, request: &LoadRequest, source: String) -> anyhow::Result<String> {
        (**self).translate(request, source)
    }

    fn instantiate(&self, request: &LoadRequest, source: &str) -> anyhow::Result<Option<Module>> {
        (**self).instantiate(request, source)
    }
}
