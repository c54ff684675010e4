//! modloader - asynchronous module loader and linker
//!
//! Given a module specifier, the loader resolves it to a canonical name,
//! fetches and translates its source through pluggable hooks, recursively
//! loads its imports, links bindings, evaluates each module exactly once and
//! caches the result in a registry.
//!
//! ## Layout
//!
//! - [`hooks`]: host-supplied normalize/locate/fetch/translate/instantiate,
//!   with in-memory and filesystem implementations
//! - [`registry`]: canonical name to evaluated [`Module`]
//! - [`loader`]: load units, the orchestration engine and the [`Loader`]
//!   facade
//! - [`script`]: the built-in ES-module-like dialect used when the
//!   `instantiate` hook declines a source
//! - [`namespace`]: export namespaces and runtime values
//!
//! ## Design Principles
//!
//! 1. **One load per name**: concurrent requests share one load unit
//! 2. **Deferred delivery**: listeners never run inline, so hooks and
//!    listeners may re-enter the loader
//! 3. **Live bindings**: imports read the exporter's slot at use time, which
//!    makes circular imports link without special cases

pub mod config;
pub mod error;
pub mod hooks;
pub mod loader;
pub mod namespace;
pub mod registry;
pub mod script;
pub mod utils;

pub use config::LoaderConfig;
pub use error::{ErrorKind, LoadError};
pub use hooks::{FileSystemHooks, LoadRequest, LoaderHooks, MemoryHooks, Metadata};
pub use loader::{DefineOptions, ImportOptions, Listener, Loader, UnitState};
pub use namespace::{Module, Value};
pub use registry::Registry;
