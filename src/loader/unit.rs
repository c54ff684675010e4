//! Load units
//!
//! One record per module load in progress, owned by the engine and addressed
//! by [`UnitId`]. A unit moves through
//! `Fetching -> Parsed -> LoadingDeps -> Loaded -> Linking -> Ready`, or to
//! `Failed` from any non-terminal state.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::LoadError;
use crate::hooks::{LoadRequest, Metadata};
use crate::namespace::Module;
use crate::script::ModuleInstance;

/// Key of a unit in the engine's unit table; never reused
pub(crate) type UnitId = usize;

/// Lifecycle state of a load unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitState {
    /// Normalize, locate, fetch and translate in progress
    Fetching,
    /// Source parsed, dependency list known
    Parsed,
    /// Waiting for dependencies to be parsed
    LoadingDeps,
    /// Whole dependency graph parsed; not evaluated yet
    Loaded,
    Linking,
    Ready,
    Failed,
}

impl UnitState {
    pub fn is_terminal(self) -> bool {
        matches!(self, UnitState::Ready | UnitState::Failed)
    }
}

impl std::fmt::Display for UnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UnitState::Fetching => "fetching",
            UnitState::Parsed => "parsed",
            UnitState::LoadingDeps => "loading-deps",
            UnitState::Loaded => "loaded",
            UnitState::Linking => "linking",
            UnitState::Ready => "ready",
            UnitState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Where a unit's source comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnitKind {
    /// Located and fetched through the hooks
    Fetched,
    /// Anonymous source passed to `module()`
    Inline,
    /// Named source passed to `define()`
    Defined,
}

/// State a listener waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Milestone {
    /// Dependency graph loaded (`define`)
    Loaded,
    /// Evaluated (`import`, `module`)
    Ready,
}

/// Type-erased listener attached to a unit
pub(crate) struct Waiter {
    pub(crate) milestone: Milestone,
    on_success: Box<dyn FnOnce(Module)>,
    on_error: Option<Box<dyn FnOnce(LoadError)>>,
}

impl Waiter {
    pub(crate) fn new(
        milestone: Milestone,
        on_success: Box<dyn FnOnce(Module)>,
        on_error: Option<Box<dyn FnOnce(LoadError)>>,
    ) -> Self {
        Self {
            milestone,
            on_success,
            on_error,
        }
    }

    /// Invoke the matching callback. An error with no error callback is
    /// handed back as unhandled.
    pub(crate) fn deliver(self, outcome: Result<Module, LoadError>) -> Option<LoadError> {
        match outcome {
            Ok(module) => {
                (self.on_success)(module);
                None
            }
            Err(err) => match self.on_error {
                Some(on_error) => {
                    on_error(err);
                    None
                }
                None => Some(err),
            },
        }
    }
}

/// A resolved import edge
#[derive(Debug, Clone)]
pub(crate) struct Dependency {
    /// Specifier as written in the source
    pub(crate) specifier: String,
    /// Canonical name
    pub(crate) name: String,
    /// Load the edge waits on; `None` once the target is registered
    pub(crate) unit: Option<UnitId>,
}

pub(crate) struct LoadUnit {
    /// Canonical name (`@inline/N` for anonymous units)
    pub(crate) name: String,
    pub(crate) kind: UnitKind,
    pub(crate) state: UnitState,
    /// Lazy units stop at `Loaded` until an eager request reaches them
    pub(crate) eager: bool,
    pub(crate) referrer_name: Option<String>,
    pub(crate) address: Option<String>,
    pub(crate) metadata: Metadata,
    pub(crate) dependencies: Vec<Dependency>,
    /// Present once parsed by the built-in dialect
    pub(crate) instance: Option<Rc<ModuleInstance>>,
    /// Namespace, available from `Parsed` on
    pub(crate) module: Option<Module>,
    pub(crate) waiters: Vec<Waiter>,
}

impl LoadUnit {
    pub(crate) fn new(name: &str, kind: UnitKind, eager: bool) -> Self {
        Self {
            name: name.to_string(),
            kind,
            state: UnitState::Fetching,
            eager,
            referrer_name: None,
            address: None,
            metadata: Metadata::Null,
            dependencies: Vec::new(),
            instance: None,
            module: None,
            waiters: Vec::new(),
        }
    }

    pub(crate) fn request(&self) -> LoadRequest {
        LoadRequest {
            name: self.name.clone(),
            address: self.address.clone(),
            metadata: self.metadata.clone(),
        }
    }

    /// Whether the unit ends up in the registry when ready
    pub(crate) fn is_named(&self) -> bool {
        self.kind != UnitKind::Inline
    }

    /// Remove the waiters whose milestone has been reached, in
    /// registration order
    pub(crate) fn take_waiters(&mut self, milestone: Milestone) -> Vec<Waiter> {
        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.waiters)
            .into_iter()
            .partition(|w| milestone == Milestone::Ready || w.milestone == milestone);
        self.waiters = pending;
        due
    }
}
