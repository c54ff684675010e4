#![allow(dead_code)]

use modloader::{LoadError, Listener, Loader, MemoryHooks, Module, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Evaluation counts keyed by the label passed to `tick(label)`
#[derive(Clone, Default)]
pub struct Ticks(Rc<RefCell<HashMap<String, usize>>>);

impl Ticks {
    /// Install `tick(label)` on `loader`
    pub fn install(loader: &Loader) -> Self {
        let ticks = Ticks::default();
        let counts = Rc::clone(&ticks.0);
        loader.define_intrinsic("tick", move |args: &[Value]| {
            let label = args.first().map(|v| v.to_string()).unwrap_or_default();
            *counts.borrow_mut().entry(label).or_insert(0) += 1;
            Ok(Value::Undefined)
        });
        ticks
    }

    pub fn count(&self, label: &str) -> usize {
        self.0.borrow().get(label).copied().unwrap_or(0)
    }
}

/// Loader over shared memory hooks, with `tick` installed
pub fn memory_loader(sources: &[(&str, &str)]) -> (Loader, Rc<MemoryHooks>, Ticks) {
    let hooks = Rc::new(MemoryHooks::new());
    for (name, source) in sources {
        hooks.insert(name, source);
    }
    let loader = Loader::new(Rc::clone(&hooks));
    let ticks = Ticks::install(&loader);
    (loader, hooks, ticks)
}

/// Where a recording listener puts its outcome
pub type Outcome<T> = Rc<RefCell<Option<Result<T, LoadError>>>>;

/// Listener with both callbacks recording into the returned cell
pub fn recorder<T: 'static>() -> (Listener<T>, Outcome<T>) {
    let outcome: Outcome<T> = Rc::new(RefCell::new(None));
    let ok = Rc::clone(&outcome);
    let err = Rc::clone(&outcome);
    let listener = Listener::new(move |value: T| *ok.borrow_mut() = Some(Ok(value)))
        .on_error(move |e: LoadError| *err.borrow_mut() = Some(Err(e)));
    (listener, outcome)
}

pub fn take_module(outcome: &Outcome<Module>) -> Module {
    match outcome.borrow_mut().take() {
        Some(Ok(module)) => module,
        Some(Err(err)) => panic!("load failed: {}", err),
        None => panic!("listener did not fire"),
    }
}

pub fn take_error<T>(outcome: &Outcome<T>) -> LoadError {
    match outcome.borrow_mut().take() {
        Some(Err(err)) => err,
        Some(Ok(_)) => panic!("expected a failure"),
        None => panic!("listener did not fire"),
    }
}

pub fn number(module: &Module, export: &str) -> Option<f64> {
    module.get(export).and_then(|v| v.as_number())
}

pub fn string(module: &Module, export: &str) -> Option<String> {
    module.get(export).and_then(|v| v.as_str().map(str::to_string))
}
