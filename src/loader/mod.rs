//! Module loader facade
//!
//! [`Loader`] is the public entry point: `import`, `module` and `define`
//! queue work and attach a [`Listener`]; [`Loader::run_until_idle`] does the
//! work. `get`, `set` and `normalize` are synchronous.
//!
//! ```rust,no_run
//! use modloader::{ImportOptions, Listener, Loader, MemoryHooks, Module};
//!
//! # async fn demo() -> Result<(), modloader::LoadError> {
//! let hooks = MemoryHooks::new()
//!     .with_source("app/main", "import { greet } from './greet'; export const msg = greet();")
//!     .with_source("app/greet", "export function greet() { return 'hi'; }");
//! let loader = Loader::new(hooks);
//!
//! loader.import("app/main", ImportOptions::default(), Listener::new(|main: Module| {
//!     println!("{:?}", main.get("msg"));
//! }));
//! loader.run_until_idle().await?;
//! # Ok(())
//! # }
//! ```

mod engine;
mod listener;
mod unit;

pub use listener::Listener;
pub use unit::UnitState;

use std::cell::RefCell;
use std::rc::Rc;

use futures::channel::oneshot;

use crate::config::LoaderConfig;
use crate::error::LoadError;
use crate::hooks::{FileSystemHooks, LoaderHooks, Metadata};
use crate::namespace::{Module, Value};
use crate::registry::Registry;
use engine::Engine;

/// Options for `import` and `module`
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Canonical name relative specifiers resolve against
    pub referrer_name: Option<String>,
    /// Address of the referrer (for `module`, the inline source's address)
    pub address: Option<String>,
    /// Passed to the hooks for the requested module
    pub metadata: Metadata,
}

impl ImportOptions {
    pub fn from_referrer(referrer_name: &str) -> Self {
        Self {
            referrer_name: Some(referrer_name.to_string()),
            ..Self::default()
        }
    }

    pub fn with_address(mut self, address: &str) -> Self {
        self.address = Some(address.to_string());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Options for `define`
#[derive(Debug, Clone, Default)]
pub struct DefineOptions {
    pub address: Option<String>,
    pub metadata: Metadata,
}

/// Asynchronous module loader
///
/// Cloning is cheap; all clones drive the same registry and load units.
#[derive(Clone)]
pub struct Loader {
    engine: Rc<Engine>,
}

impl Loader {
    pub fn new<H: LoaderHooks + 'static>(hooks: H) -> Self {
        Self::with_registry(hooks, Registry::new())
    }

    /// Loader backed by an existing registry
    pub fn with_registry<H: LoaderHooks + 'static>(hooks: H, registry: Registry) -> Self {
        Self {
            engine: Rc::new(Engine::new(Rc::new(hooks), registry)),
        }
    }

    /// Filesystem-backed loader from validated configuration
    pub fn from_config(config: &LoaderConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self::new(FileSystemHooks::from_config(&config.sources)))
    }

    pub fn registry(&self) -> &Registry {
        self.engine.registry()
    }

    /// Load, link and evaluate `specifier` and everything it imports.
    ///
    /// A normalization failure is reported through `listener` like any
    /// other failure.
    pub fn import(&self, specifier: &str, options: ImportOptions, listener: Listener<Module>) {
        self.engine.import(
            specifier,
            options.referrer_name.as_deref(),
            options.address.as_deref(),
            options.metadata,
            listener.into_waiter(),
        );
    }

    /// Evaluate anonymous source. Its imports are loaded like any other.
    pub fn module(&self, source: &str, options: ImportOptions, listener: Listener<Module>) {
        self.engine.inline(
            source.to_string(),
            options.referrer_name,
            options.address,
            options.metadata,
            listener.into_waiter(),
        );
    }

    /// Register source under `name` and load its dependencies.
    ///
    /// `listener` fires once the dependency graph is loaded; the module body
    /// runs only when something imports it.
    pub fn define(&self, name: &str, source: &str, options: DefineOptions, listener: Listener<()>) {
        self.engine.define(
            name,
            source.to_string(),
            options.address,
            options.metadata,
            listener.into_waiter(),
        );
    }

    /// Registered module, if `name` has reached `ready`
    pub fn get(&self, name: &str) -> Option<Module> {
        self.engine.registry().get(name)
    }

    /// Overwrite the registry entry for `name`
    pub fn set(&self, name: &str, module: Module) {
        self.engine.registry().set(name, module);
    }

    pub fn normalize(
        &self,
        specifier: &str,
        referrer_name: Option<&str>,
        referrer_address: Option<&str>,
    ) -> Result<String, LoadError> {
        self.engine.normalize(specifier, referrer_name, referrer_address)
    }

    /// Install a host function visible to every module evaluated afterwards
    pub fn define_intrinsic<F>(&self, name: &str, func: F)
    where
        F: Fn(&[Value]) -> Result<Value, String> + 'static,
    {
        self.engine.intrinsics().define_native(name, func);
    }

    /// Run queued work and outstanding fetches until nothing is left.
    ///
    /// Returns the first failure delivered to a listener without an error
    /// callback; the remaining work stays queued for the next call.
    pub async fn run_until_idle(&self) -> Result<(), LoadError> {
        self.engine.run_until_idle().await
    }

    /// `import` and drive the loader until it settles
    pub async fn import_module(
        &self,
        specifier: &str,
        options: ImportOptions,
    ) -> Result<Module, LoadError> {
        let (listener, rx) = channel_listener();
        self.import(specifier, options, listener);
        self.settle(rx, specifier).await
    }

    /// `module` and drive the loader until it settles
    pub async fn module_source(
        &self,
        source: &str,
        options: ImportOptions,
    ) -> Result<Module, LoadError> {
        let (listener, rx) = channel_listener();
        self.module(source, options, listener);
        self.settle(rx, "<inline>").await
    }

    /// `define` and drive the loader until it settles
    pub async fn define_source(
        &self,
        name: &str,
        source: &str,
        options: DefineOptions,
    ) -> Result<(), LoadError> {
        let (listener, rx) = channel_listener();
        self.define(name, source, options, listener);
        self.settle(rx, name).await
    }

    async fn settle<T>(
        &self,
        mut rx: oneshot::Receiver<Result<T, LoadError>>,
        name: &str,
    ) -> Result<T, LoadError> {
        let idle = self.run_until_idle().await;
        match rx.try_recv() {
            Ok(Some(result)) => result,
            _ => {
                idle?;
                Err(LoadError::Stalled {
                    name: name.to_string(),
                })
            }
        }
    }

    /// State of the most recent load of `name`
    pub fn unit_state(&self, name: &str) -> Option<UnitState> {
        self.engine.unit_state(name)
    }

    /// Canonical names currently loading, sorted
    pub fn in_flight(&self) -> Vec<String> {
        self.engine.in_flight()
    }

    /// No queued jobs and no outstanding fetches
    pub fn is_idle(&self) -> bool {
        self.engine.is_idle()
    }
}

/// Listener whose outcome lands in a oneshot channel
fn channel_listener<T: 'static>() -> (Listener<T>, oneshot::Receiver<Result<T, LoadError>>) {
    let (tx, rx) = oneshot::channel::<Result<T, LoadError>>();
    let tx = Rc::new(RefCell::new(Some(tx)));
    let tx_err = Rc::clone(&tx);

    let listener = Listener::new(move |value: T| {
        if let Some(tx) = tx.borrow_mut().take() {
            let _ = tx.send(Ok(value));
        }
    })
    .on_error(move |err: LoadError| {
        if let Some(tx) = tx_err.borrow_mut().take() {
            let _ = tx.send(Err(err));
        }
    });
    (listener, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::MemoryHooks;
    use std::cell::Cell;

    #[tokio::test]
    async fn test_listener_is_deferred() {
        let loader = Loader::new(MemoryHooks::new().with_source("a", "export const x = 1;"));
        let fired = Rc::new(Cell::new(false));
        let flag = Rc::clone(&fired);

        loader.import("a", ImportOptions::default(), Listener::new(move |_| flag.set(true)));
        assert!(!fired.get());
        assert!(!loader.is_idle());
        assert_eq!(loader.in_flight(), vec!["a".to_string()]);

        loader.run_until_idle().await.unwrap();
        assert!(fired.get());
        assert!(loader.is_idle());
        assert!(loader.in_flight().is_empty());
        assert_eq!(loader.unit_state("a"), Some(UnitState::Ready));
    }

    #[tokio::test]
    async fn test_normalization_error_goes_to_listener() {
        let loader = Loader::new(MemoryHooks::new());
        let seen = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&seen);

        loader.import(
            "../escape",
            ImportOptions::default(),
            Listener::new(|_| panic!("must not load"))
                .on_error(move |err| *slot.borrow_mut() = Some(err.kind())),
        );
        loader.run_until_idle().await.unwrap();
        assert_eq!(*seen.borrow(), Some(crate::error::ErrorKind::Normalization));
    }

    #[tokio::test]
    async fn test_module_source_is_not_registered() {
        let loader = Loader::new(MemoryHooks::new());
        let module = loader
            .module_source("export const y = 2 * 21;", ImportOptions::default())
            .await
            .unwrap();
        assert_eq!(module.get("y").and_then(|v| v.as_number()), Some(42.0));
        assert!(loader.registry().is_empty());
    }

    #[tokio::test]
    async fn test_from_config_rejects_invalid() {
        let mut config = LoaderConfig::default();
        config.sources.root = String::new();
        assert!(Loader::from_config(&config).is_err());
    }
}
