//! Module registry
//!
//! Maps canonical names to evaluated modules for the lifetime of a loader.
//! Entries are added when a load reaches `ready` and are only replaced by an
//! explicit `set`; nothing is ever evicted.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::debug;

use crate::namespace::Module;

/// Shared handle to the name -> module store
///
/// Clones share the same store, so one registry can back several loaders.
#[derive(Clone, Default)]
pub struct Registry {
    modules: Rc<RefCell<BTreeMap<String, Module>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Module> {
        self.modules.borrow().get(name).cloned()
    }

    /// Store `module` under `name`, replacing any previous entry.
    ///
    /// Keeping the dependency graph consistent is the caller's concern.
    pub fn set(&self, name: &str, module: Module) -> Option<Module> {
        debug!("Registering module {}", name);
        self.modules.borrow_mut().insert(name.to_string(), module)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.borrow().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.modules.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.modules.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.borrow().is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("modules", &self.names())
            .finish()
    }
}
