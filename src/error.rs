//! Load errors
//!
//! Every stage of the pipeline has its own error kind. Errors are `Clone`
//! because one failure is delivered to every listener attached to a unit
//! and to every dependent that was waiting on it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pipeline stage an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Normalization,
    Resolution,
    Fetch,
    Translate,
    Parse,
    Link,
    Evaluation,
    Dependency,
    AlreadyDefined,
    Stalled,
}

/// Module loader errors
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error("cannot normalize '{specifier}': {message}")]
    Normalization { specifier: String, message: String },

    #[error("cannot locate module '{name}': {message}")]
    Resolution { name: String, message: String },

    #[error("failed to fetch module '{name}': {message}")]
    Fetch { name: String, message: String },

    #[error("failed to translate module '{name}': {message}")]
    Translate { name: String, message: String },

    #[error("parse error in module '{name}' at {line}:{column}: {message}")]
    Parse {
        name: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("link error in module '{name}': {message}")]
    Link { name: String, message: String },

    #[error("evaluation of module '{name}' failed: {message}")]
    Evaluation { name: String, message: String },

    #[error("module '{name}' failed because dependency '{dependency}' failed: {source}")]
    Dependency {
        name: String,
        dependency: String,
        #[source]
        source: Box<LoadError>,
    },

    #[error("module '{name}' is already defined")]
    AlreadyDefined { name: String },

    #[error("load of '{name}' did not settle before the loader went idle")]
    Stalled { name: String },
}

impl LoadError {
    /// Wrap a host hook failure into the error kind of the stage that ran it.
    ///
    /// The full `anyhow` context chain is flattened into the message.
    pub fn from_hook(kind: ErrorKind, name: &str, err: anyhow::Error) -> Self {
        let name = name.to_string();
        let message = format!("{:#}", err);
        match kind {
            ErrorKind::Normalization => LoadError::Normalization {
                specifier: name,
                message,
            },
            ErrorKind::Resolution => LoadError::Resolution { name, message },
            ErrorKind::Fetch => LoadError::Fetch { name, message },
            ErrorKind::Translate => LoadError::Translate { name, message },
            ErrorKind::Link => LoadError::Link { name, message },
            // Parse errors from hooks have no position information
            ErrorKind::Parse => LoadError::Parse {
                name,
                line: 0,
                column: 0,
                message,
            },
            _ => LoadError::Evaluation { name, message },
        }
    }

    /// Failure of `name` caused by the failure of one of its dependencies.
    pub fn dependency(name: &str, dependency: &str, cause: LoadError) -> Self {
        LoadError::Dependency {
            name: name.to_string(),
            dependency: dependency.to_string(),
            source: Box::new(cause),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LoadError::Normalization { .. } => ErrorKind::Normalization,
            LoadError::Resolution { .. } => ErrorKind::Resolution,
            LoadError::Fetch { .. } => ErrorKind::Fetch,
            LoadError::Translate { .. } => ErrorKind::Translate,
            LoadError::Parse { .. } => ErrorKind::Parse,
            LoadError::Link { .. } => ErrorKind::Link,
            LoadError::Evaluation { .. } => ErrorKind::Evaluation,
            LoadError::Dependency { .. } => ErrorKind::Dependency,
            LoadError::AlreadyDefined { .. } => ErrorKind::AlreadyDefined,
            LoadError::Stalled { .. } => ErrorKind::Stalled,
        }
    }

    /// Name of the module (or the raw specifier, for normalization errors)
    /// this error is about.
    pub fn module_name(&self) -> &str {
        match self {
            LoadError::Normalization { specifier, .. } => specifier,
            LoadError::Resolution { name, .. }
            | LoadError::Fetch { name, .. }
            | LoadError::Translate { name, .. }
            | LoadError::Parse { name, .. }
            | LoadError::Link { name, .. }
            | LoadError::Evaluation { name, .. }
            | LoadError::Dependency { name, .. }
            | LoadError::AlreadyDefined { name }
            | LoadError::Stalled { name } => name,
        }
    }

    /// The failure at the bottom of a chain of dependency errors.
    pub fn root_cause(&self) -> &LoadError {
        let mut current = self;
        while let LoadError::Dependency { source, .. } = current {
            current = source;
        }
        current
    }
}
