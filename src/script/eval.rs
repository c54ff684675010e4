//! Instantiation, linking and evaluation of parsed modules
//!
//! A [`ModuleInstance`] goes through three phases:
//!
//! 1. `new`: one slot per top-level declaration, function declarations
//!    hoisted, namespace built from the export table. Nothing runs yet.
//! 2. `link`: each import is bound to the exporter's slot (or namespace).
//!    Exporters only need to be instantiated, not evaluated, which is what
//!    lets circular imports link.
//! 3. `evaluate`: the body runs once. Every identifier read dereferences its
//!    slot at that moment, so imports observe the exporter's current value.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use super::ast::{BinaryOp, DeclKind, Expr, FunctionDecl, ImportKind, ModuleRecord, Stmt};
use crate::error::LoadError;
use crate::namespace::{Module, NativeFunction, Slot, Value};

const MAX_CALL_DEPTH: usize = 128;

/// Host functions and values visible to every module
#[derive(Clone, Default)]
pub struct Intrinsics(Rc<RefCell<HashMap<String, Value>>>);

impl Intrinsics {
    pub fn define(&self, name: &str, value: Value) {
        self.0.borrow_mut().insert(name.to_string(), value);
    }

    pub fn define_native<F>(&self, name: &str, func: F)
    where
        F: Fn(&[Value]) -> Result<Value, String> + 'static,
    {
        self.define(name, Value::Native(NativeFunction::new(name, func)));
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.borrow().get(name).cloned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindingKind {
    Let,
    Const,
    Var,
    Function,
    Import,
}

impl From<DeclKind> for BindingKind {
    fn from(kind: DeclKind) -> Self {
        match kind {
            DeclKind::Let => BindingKind::Let,
            DeclKind::Const => BindingKind::Const,
            DeclKind::Var => BindingKind::Var,
            DeclKind::Function => BindingKind::Function,
        }
    }
}

#[derive(Clone)]
struct Binding {
    slot: Slot,
    kind: BindingKind,
}

/// Lexical scope: the module scope or a function call frame
pub struct Scope {
    bindings: RefCell<HashMap<String, Binding>>,
    parent: Option<Rc<Scope>>,
    intrinsics: Intrinsics,
}

impl Scope {
    fn root(intrinsics: Intrinsics) -> Rc<Self> {
        Rc::new(Self {
            bindings: RefCell::new(HashMap::new()),
            parent: None,
            intrinsics,
        })
    }

    fn child(parent: &Rc<Scope>) -> Rc<Self> {
        Rc::new(Self {
            bindings: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
            intrinsics: parent.intrinsics.clone(),
        })
    }

    fn find(&self, name: &str) -> Option<Binding> {
        if let Some(binding) = self.bindings.borrow().get(name) {
            return Some(binding.clone());
        }
        self.parent.as_ref().and_then(|parent| parent.find(name))
    }

    fn bind(&self, name: &str, binding: Binding) {
        self.bindings.borrow_mut().insert(name.to_string(), binding);
    }

    /// Initialise `name` in this scope, reusing an existing slot so that
    /// anything already linked to it sees the value.
    fn declare(&self, name: &str, kind: BindingKind, value: Value) {
        let existing = self.bindings.borrow().get(name).map(|b| b.slot.clone());
        match existing {
            Some(slot) => slot.set(value),
            None => self.bind(
                name,
                Binding {
                    slot: Slot::new(value),
                    kind,
                },
            ),
        }
    }

    fn lookup(&self, name: &str) -> Result<Value, String> {
        if let Some(binding) = self.find(name) {
            return Ok(binding.slot.get());
        }
        self.intrinsics
            .get(name)
            .ok_or_else(|| format!("'{}' is not defined", name))
    }

    fn assign(&self, name: &str, value: Value) -> Result<(), String> {
        let binding = self
            .find(name)
            .ok_or_else(|| format!("'{}' is not defined", name))?;
        match binding.kind {
            BindingKind::Const => Err(format!("assignment to constant '{}'", name)),
            BindingKind::Import => Err(format!("cannot assign to imported binding '{}'", name)),
            BindingKind::Let | BindingKind::Var | BindingKind::Function => {
                binding.slot.set(value);
                Ok(())
            }
        }
    }
}

/// A function value closing over the scope it was declared in
pub struct Closure {
    decl: Rc<FunctionDecl>,
    scope: Rc<Scope>,
}

impl Closure {
    pub fn name(&self) -> &str {
        &self.decl.name
    }

    pub fn arity(&self) -> usize {
        self.decl.params.len()
    }
}

fn hoist(decl: &Rc<FunctionDecl>, scope: &Rc<Scope>) {
    let closure = Closure {
        decl: Rc::clone(decl),
        scope: Rc::clone(scope),
    };
    scope.declare(
        &decl.name,
        BindingKind::Function,
        Value::Function(Rc::new(closure)),
    );
}

/// Runtime state of one module built from the dialect
pub struct ModuleInstance {
    name: String,
    record: Rc<ModuleRecord>,
    scope: Rc<Scope>,
    namespace: Module,
}

impl ModuleInstance {
    /// Instantiate: allocate slots, hoist functions, build the namespace.
    pub fn new(name: &str, record: ModuleRecord, intrinsics: &Intrinsics) -> Self {
        let scope = Scope::root(intrinsics.clone());
        for (local, kind) in &record.declarations {
            scope.declare(local, BindingKind::from(*kind), Value::Undefined);
        }
        for decl in &record.functions {
            hoist(decl, &scope);
        }

        let mut exports = BTreeMap::new();
        for entry in &record.exports {
            // The parser guarantees every exported local is declared
            if let Some(binding) = scope.find(&entry.local) {
                exports.insert(entry.exported.clone(), binding.slot);
            }
        }
        let namespace = Module::with_slots(Some(name.to_string()), exports);

        Self {
            name: name.to_string(),
            record: Rc::new(record),
            scope,
            namespace,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &Module {
        &self.namespace
    }

    pub fn dependencies(&self) -> Vec<String> {
        self.record.dependencies()
    }

    /// Bind every import to the namespace `resolve` returns for its
    /// specifier.
    pub fn link<F>(&self, mut resolve: F) -> Result<(), LoadError>
    where
        F: FnMut(&str) -> Option<Module>,
    {
        for import in &self.record.imports {
            let module = resolve(&import.specifier).ok_or_else(|| LoadError::Link {
                name: self.name.clone(),
                message: format!(
                    "dependency '{}' (line {}) was not loaded",
                    import.specifier, import.line
                ),
            })?;
            match &import.kind {
                ImportKind::Named(specs) => {
                    for spec in specs {
                        let slot = module.slot(&spec.imported).ok_or_else(|| LoadError::Link {
                            name: self.name.clone(),
                            message: format!(
                                "'{}' has no export named '{}' (line {})",
                                module.name().unwrap_or(&import.specifier),
                                spec.imported,
                                import.line
                            ),
                        })?;
                        self.scope.bind(
                            &spec.local,
                            Binding {
                                slot: slot.clone(),
                                kind: BindingKind::Import,
                            },
                        );
                    }
                }
                ImportKind::Namespace(local) => {
                    self.scope.bind(
                        local,
                        Binding {
                            slot: Slot::new(Value::Namespace(module)),
                            kind: BindingKind::Import,
                        },
                    );
                }
                ImportKind::SideEffect => {}
            }
        }
        Ok(())
    }

    /// Run the module body.
    pub fn evaluate(&self) -> Result<(), LoadError> {
        let mut interpreter = Interpreter::default();
        interpreter
            .exec_block(&self.record.body, &self.scope)
            .map(|_| ())
            .map_err(|message| LoadError::Evaluation {
                name: self.name.clone(),
                message,
            })
    }
}

/// Call a function value from host code.
pub fn call_value(callee: &Value, args: &[Value]) -> Result<Value, String> {
    Interpreter::default().call(callee, args.to_vec())
}

enum Flow {
    Normal,
    Return(Value),
}

#[derive(Default)]
struct Interpreter {
    depth: usize,
}

impl Interpreter {
    fn exec_block(&mut self, stmts: &[Stmt], scope: &Rc<Scope>) -> Result<Flow, String> {
        for stmt in stmts {
            if let Flow::Return(value) = self.exec(stmt, scope)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> Result<Flow, String> {
        match stmt {
            Stmt::Declare { kind, name, init } => {
                let value = match init {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::Undefined,
                };
                scope.declare(name, BindingKind::from(*kind), value);
            }
            Stmt::Function(_) => {}
            Stmt::Assign { name, value } => {
                let value = self.eval(value, scope)?;
                scope.assign(name, value)?;
            }
            Stmt::Expr(expr) => {
                self.eval(expr, scope)?;
            }
            Stmt::Throw(expr) => {
                let value = self.eval(expr, scope)?;
                return Err(format!("uncaught exception: {}", value));
            }
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::Undefined,
                };
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn eval(&mut self, expr: &Expr, scope: &Rc<Scope>) -> Result<Value, String> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::String(Rc::clone(s))),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Undefined => Ok(Value::Undefined),
            Expr::Ident(name) => scope.lookup(name),
            Expr::Negate(inner) => match self.eval(inner, scope)? {
                Value::Number(n) => Ok(Value::Number(-n)),
                other => Err(format!("cannot negate a {}", other.type_name())),
            },
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs, scope)?;
                let rhs = self.eval(rhs, scope)?;
                binary(*op, lhs, rhs)
            }
            Expr::Member { object, property } => match self.eval(object, scope)? {
                Value::Namespace(module) => Ok(module.get(property).unwrap_or_default()),
                other => Err(format!(
                    "cannot read property '{}' of {}",
                    property,
                    other.type_name()
                )),
            },
            Expr::Call { callee, args } => {
                let function = self.eval(callee, scope)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, scope)?);
                }
                if !function.is_callable() {
                    let label = match callee.as_ref() {
                        Expr::Ident(name) => format!("'{}'", name),
                        _ => format!("a {}", function.type_name()),
                    };
                    return Err(format!("{} is not a function", label));
                }
                self.call(&function, values)
            }
        }
    }

    fn call(&mut self, callee: &Value, args: Vec<Value>) -> Result<Value, String> {
        match callee {
            Value::Native(native) => native.call(&args),
            Value::Function(closure) => {
                if self.depth >= MAX_CALL_DEPTH {
                    return Err(format!(
                        "maximum call depth exceeded in '{}'",
                        closure.name()
                    ));
                }
                let frame = Scope::child(&closure.scope);
                let mut args = args.into_iter();
                for param in &closure.decl.params {
                    frame.declare(param, BindingKind::Let, args.next().unwrap_or_default());
                }
                for stmt in &closure.decl.body {
                    if let Stmt::Function(decl) = stmt {
                        hoist(decl, &frame);
                    }
                }
                self.depth += 1;
                let flow = self.exec_block(&closure.decl.body, &frame);
                self.depth -= 1;
                match flow? {
                    Flow::Return(value) => Ok(value),
                    Flow::Normal => Ok(Value::Undefined),
                }
            }
            other => Err(format!("{} is not a function", other.type_name())),
        }
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, String> {
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(lhs == rhs)),
        BinaryOp::NotEq => return Ok(Value::Bool(lhs != rhs)),
        BinaryOp::Add => {
            if matches!(lhs, Value::String(_)) || matches!(rhs, Value::String(_)) {
                return Ok(Value::from(format!("{}{}", lhs, rhs)));
            }
        }
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {}
    }
    match (lhs.as_number(), rhs.as_number()) {
        (Some(a), Some(b)) => Ok(Value::Number(match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            _ => a / b,
        })),
        _ => Err(format!(
            "unsupported operand types for {:?}: {} and {}",
            op,
            lhs.type_name(),
            rhs.type_name()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parse_module;

    fn instance(name: &str, source: &str) -> ModuleInstance {
        ModuleInstance::new(name, parse_module(source).unwrap(), &Intrinsics::default())
    }

    #[test]
    fn test_evaluate_exports() {
        let module = instance(
            "m",
            "export const a = 2 * 3;\n\
             export let b = 'x' + a;\n\
             export function twice(n) { return n + n; }",
        );
        module.link(|_| None).unwrap();
        module.evaluate().unwrap();

        let ns = module.namespace();
        assert_eq!(ns.get("a"), Some(Value::from(6)));
        assert_eq!(ns.get("b"), Some(Value::from("x6")));
        assert_eq!(ns.call("twice", &[Value::from(4)]).unwrap(), Value::from(8));
    }

    #[test]
    fn test_functions_hoisted_before_evaluation() {
        let module = instance("m", "export function f() { return 1; }");
        assert!(module.namespace().get("f").unwrap().is_callable());
    }

    #[test]
    fn test_imports_are_live() {
        let exporter = instance("dep", "export let counter = 1; export function bump() { counter = counter + 1; }");
        let importer = instance(
            "main",
            "import { counter, bump } from 'dep';\n\
             export function read() { return counter; }",
        );
        importer
            .link(|_| Some(exporter.namespace().clone()))
            .unwrap();
        exporter.evaluate().unwrap();
        importer.evaluate().unwrap();

        let ns = importer.namespace();
        assert_eq!(ns.call("read", &[]).unwrap(), Value::from(1));
        exporter.namespace().call("bump", &[]).unwrap();
        assert_eq!(ns.call("read", &[]).unwrap(), Value::from(2));
    }

    #[test]
    fn test_namespace_import() {
        let exporter = instance("dep", "export const x = 5;");
        let importer = instance("main", "import * as dep from 'dep'; export const y = dep.x + 1;");
        importer.link(|_| Some(exporter.namespace().clone())).unwrap();
        exporter.evaluate().unwrap();
        importer.evaluate().unwrap();

        assert_eq!(importer.namespace().get("y"), Some(Value::from(6)));
    }

    #[test]
    fn test_link_missing_export() {
        let exporter = instance("dep", "export const x = 5;");
        let importer = instance("main", "import { y } from 'dep';");
        let err = importer
            .link(|_| Some(exporter.namespace().clone()))
            .unwrap_err();

        assert_eq!(err.kind(), crate::error::ErrorKind::Link);
        assert!(err.to_string().contains("no export named 'y'"));
    }

    #[test]
    fn test_runtime_errors() {
        let cases = [
            ("const a = 1; a = 2;", "assignment to constant"),
            ("throw 'boom';", "uncaught exception: boom"),
            ("missing();", "'missing' is not defined"),
            ("let n = 1; n();", "'n' is not a function"),
            ("let s = 'a' - 1;", "unsupported operand"),
            ("function f() { return f(); } f();", "maximum call depth"),
        ];
        for (source, fragment) in cases {
            let module = instance("m", source);
            module.link(|_| None).unwrap();
            let err = module.evaluate().unwrap_err();
            assert!(
                err.to_string().contains(fragment),
                "{:?}: {} does not mention {:?}",
                source,
                err,
                fragment
            );
        }
    }

    #[test]
    fn test_import_binding_is_read_only() {
        let exporter = instance("dep", "export let x = 1;");
        let importer = instance("main", "import { x } from 'dep'; x = 2;");
        importer.link(|_| Some(exporter.namespace().clone())).unwrap();
        let err = importer.evaluate().unwrap_err();
        assert!(err.to_string().contains("cannot assign to imported binding 'x'"));
    }

    #[test]
    fn test_intrinsics() {
        let intrinsics = Intrinsics::default();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&calls);
        intrinsics.define_native("record", move |args| {
            sink.borrow_mut().push(args[0].to_string());
            Ok(Value::Undefined)
        });

        let module = ModuleInstance::new(
            "m",
            parse_module("record('one'); record(1 + 1);").unwrap(),
            &intrinsics,
        );
        module.link(|_| None).unwrap();
        module.evaluate().unwrap();

        assert_eq!(*calls.borrow(), vec!["one".to_string(), "2".to_string()]);
    }
}
