//! Module namespaces
//!
//! A [`Module`] is the export namespace of an evaluated module. The set of
//! export names is fixed when the namespace is created; each export is a
//! [`Slot`] shared with the exporting module's own binding, so readers always
//! observe the current value (live bindings).

pub mod value;

pub use value::{NativeFn, NativeFunction, Value};

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::error::LoadError;

/// Shared storage cell for one binding
#[derive(Clone, Default)]
pub struct Slot(Rc<RefCell<Value>>);

impl Slot {
    pub fn new(value: Value) -> Self {
        Self(Rc::new(RefCell::new(value)))
    }

    /// Dereference the binding at use time
    pub fn get(&self) -> Value {
        self.0.borrow().clone()
    }

    pub fn set(&self, value: Value) {
        *self.0.borrow_mut() = value;
    }

    pub fn ptr_eq(a: &Slot, b: &Slot) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot({:?})", self.get())
    }
}

struct ModuleInner {
    name: Option<String>,
    exports: BTreeMap<String, Slot>,
}

/// Immutable export namespace with live values
///
/// Cloning is cheap and preserves identity: every clone refers to the same
/// namespace, which is what [`Module::ptr_eq`] compares.
#[derive(Clone)]
pub struct Module {
    inner: Rc<ModuleInner>,
}

impl Module {
    pub(crate) fn with_slots(name: Option<String>, exports: BTreeMap<String, Slot>) -> Self {
        Self {
            inner: Rc::new(ModuleInner { name, exports }),
        }
    }

    /// Build a namespace from host values
    ///
    /// Used by `instantiate` hooks and by callers of `Loader::set`.
    pub fn from_exports<I, K, V>(exports: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let exports = exports
            .into_iter()
            .map(|(name, value)| (name.into(), Slot::new(value.into())))
            .collect();
        Self::with_slots(None, exports)
    }

    /// Canonical name the namespace was created for, if any
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Current value of an export
    pub fn get(&self, export: &str) -> Option<Value> {
        self.inner.exports.get(export).map(Slot::get)
    }

    pub fn has(&self, export: &str) -> bool {
        self.inner.exports.contains_key(export)
    }

    /// Export names in sorted order
    pub fn export_names(&self) -> impl Iterator<Item = &str> {
        self.inner.exports.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.inner.exports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.exports.is_empty()
    }

    pub(crate) fn slot(&self, export: &str) -> Option<&Slot> {
        self.inner.exports.get(export)
    }

    /// Call an exported function with the given arguments.
    pub fn call(&self, export: &str, args: &[Value]) -> Result<Value, LoadError> {
        let name = self.name().unwrap_or("<anonymous>");
        let callee = self.get(export).ok_or_else(|| LoadError::Link {
            name: name.to_string(),
            message: format!("module has no export named '{}'", export),
        })?;
        crate::script::call_value(&callee, args).map_err(|message| LoadError::Evaluation {
            name: name.to_string(),
            message,
        })
    }

    pub fn ptr_eq(a: &Module, b: &Module) -> bool {
        Rc::ptr_eq(&a.inner, &b.inner)
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.inner.name)
            .field("exports", &self.inner.exports)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_exports() {
        let module = Module::from_exports([("answer", Value::from(42)), ("label", "x".into())]);

        assert_eq!(module.len(), 2);
        assert_eq!(module.get("answer"), Some(Value::from(42)));
        assert!(module.get("missing").is_none());
        assert_eq!(module.export_names().collect::<Vec<_>>(), vec!["answer", "label"]);
        assert!(module.name().is_none());
    }

    #[test]
    fn test_slots_are_live() {
        let slot = Slot::default();
        let mut exports = BTreeMap::new();
        exports.insert("x".to_string(), slot.clone());
        let module = Module::with_slots(Some("m".to_string()), exports);

        assert_eq!(module.get("x"), Some(Value::Undefined));
        slot.set(Value::from(7));
        assert_eq!(module.get("x"), Some(Value::from(7)));
    }

    #[test]
    fn test_identity() {
        let a = Module::from_exports(Vec::<(String, Value)>::new());
        let b = a.clone();
        let c = Module::from_exports(Vec::<(String, Value)>::new());

        assert!(Module::ptr_eq(&a, &b));
        assert!(!Module::ptr_eq(&a, &c));
    }
}
