//! Completion callbacks
//!
//! A [`Listener`] pairs a success callback with an optional error callback.
//! The loader never calls either inline: both run from `run_until_idle`, in
//! the order the listeners were attached.

use crate::error::LoadError;
use crate::namespace::Module;

use super::unit::{Milestone, Waiter};

/// Success/error callback pair for one request
///
/// Without an error callback a failure is *unhandled* and is returned from
/// [`Loader::run_until_idle`](super::Loader::run_until_idle).
pub struct Listener<T> {
    on_success: Box<dyn FnOnce(T)>,
    on_error: Option<Box<dyn FnOnce(LoadError)>>,
}

impl<T: 'static> Listener<T> {
    pub fn new<F>(on_success: F) -> Self
    where
        F: FnOnce(T) + 'static,
    {
        Self {
            on_success: Box::new(on_success),
            on_error: None,
        }
    }

    pub fn on_error<F>(mut self, on_error: F) -> Self
    where
        F: FnOnce(LoadError) + 'static,
    {
        self.on_error = Some(Box::new(on_error));
        self
    }

    /// Listener that ignores success; failures stay unhandled
    pub fn detached() -> Self {
        Self::new(|_| {})
    }
}

impl Listener<Module> {
    pub(crate) fn into_waiter(self) -> Waiter {
        Waiter::new(Milestone::Ready, self.on_success, self.on_error)
    }
}

impl Listener<()> {
    pub(crate) fn into_waiter(self) -> Waiter {
        let on_success = self.on_success;
        Waiter::new(
            Milestone::Loaded,
            Box::new(move |_: Module| on_success(())),
            self.on_error,
        )
    }
}
