//! Syntax tree for the built-in module dialect

use std::rc::Rc;

/// One `import` declaration
#[derive(Debug, Clone, PartialEq)]
pub struct ImportDecl {
    pub specifier: String,
    pub kind: ImportKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportKind {
    /// `import { a, b as c } from "x"`
    Named(Vec<ImportSpec>),
    /// `import * as ns from "x"`
    Namespace(String),
    /// `import "x"`
    SideEffect,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportSpec {
    pub imported: String,
    pub local: String,
}

/// Maps an exported name to the module-scope binding backing it
#[derive(Debug, Clone, PartialEq)]
pub struct ExportEntry {
    pub exported: String,
    pub local: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Let,
    Const,
    Var,
    Function,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Declare {
        kind: DeclKind,
        name: String,
        init: Option<Expr>,
    },
    /// Hoisted; executing the statement itself is a no-op
    Function(Rc<FunctionDecl>),
    Assign {
        name: String,
        value: Expr,
    },
    Expr(Expr),
    Throw(Expr),
    Return(Option<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    NotEq,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(Rc<str>),
    Bool(bool),
    Null,
    Undefined,
    Ident(String),
    Negate(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Member {
        object: Box<Expr>,
        property: String,
    },
}

/// Parsed module source
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleRecord {
    pub imports: Vec<ImportDecl>,
    pub exports: Vec<ExportEntry>,
    /// Top-level declarations in source order, including hoisted functions
    pub declarations: Vec<(String, DeclKind)>,
    pub functions: Vec<Rc<FunctionDecl>>,
    pub body: Vec<Stmt>,
}

impl ModuleRecord {
    /// Static dependency specifiers, deduplicated, in first-import order
    pub fn dependencies(&self) -> Vec<String> {
        let mut specifiers: Vec<String> = Vec::with_capacity(self.imports.len());
        for import in &self.imports {
            if !specifiers.contains(&import.specifier) {
                specifiers.push(import.specifier.clone());
            }
        }
        specifiers
    }

    pub fn export_names(&self) -> impl Iterator<Item = &str> {
        self.exports.iter().map(|entry| entry.exported.as_str())
    }
}
