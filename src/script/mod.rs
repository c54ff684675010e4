//! Built-in module dialect
//!
//! When the `instantiate` hook declines a source, the loader parses, links
//! and evaluates it with this small ES-module-like language: named and
//! namespace imports, `export` declarations and lists, `let`/`const`/`var`,
//! functions, assignment, `throw`, and simple arithmetic.

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;

pub use ast::ModuleRecord;
pub use eval::{call_value, Closure, Intrinsics, ModuleInstance};
pub use parser::{parse_module, ParseError};
