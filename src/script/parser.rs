//! Recursive-descent parser for the built-in module dialect
//!
//! Produces a [`ModuleRecord`]: the static import list the loader walks for
//! dependencies, the export table used to build the namespace before the
//! body runs, and the body itself.

use std::collections::HashMap;
use std::rc::Rc;

use super::ast::{
    BinaryOp, DeclKind, ExportEntry, Expr, FunctionDecl, ImportDecl, ImportKind, ImportSpec,
    ModuleRecord, Stmt,
};
use super::lexer::{tokenize, Spanned, Token};

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// Parse module source into a [`ModuleRecord`].
pub fn parse_module(source: &str) -> Result<ModuleRecord, ParseError> {
    let tokens = tokenize(source).map_err(|err| ParseError {
        line: err.line,
        column: err.column,
        message: err.message,
    })?;
    Parser::new(tokens).module()
}

/// Deepest nesting of expressions and function bodies accepted.
const MAX_NESTING: usize = 256;

/// What a top-level name is bound to, for duplicate and export checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TopLevel {
    Declared,
    Imported,
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    top_level: HashMap<String, TopLevel>,
}

impl Parser {
    fn new(tokens: Vec<Spanned>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            top_level: HashMap::new(),
        }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let index = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[index].token
    }

    fn position(&self) -> (usize, usize) {
        let spanned = &self.tokens[self.pos];
        (spanned.line, spanned.column)
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].token.clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        let (line, column) = self.position();
        ParseError {
            line,
            column,
            message: message.into(),
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error_here(format!("nesting exceeds {} levels", MAX_NESTING)));
        }
        self.depth += 1;
        Ok(())
    }

    fn nested<T>(&mut self, parse: fn(&mut Self) -> Result<T, ParseError>) -> Result<T, ParseError> {
        self.enter()?;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        self.error_here(format!(
            "expected {}, found {}",
            expected,
            self.peek().describe()
        ))
    }

    fn expect(&mut self, token: Token, expected: &str) -> Result<(), ParseError> {
        if *self.peek() == token {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn ident(&mut self, expected: &str) -> Result<String, ParseError> {
        match self.peek() {
            Token::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    /// Consume a contextual keyword such as `from` or `as`
    fn contextual(&mut self, word: &str) -> Result<(), ParseError> {
        match self.peek() {
            Token::Ident(name) if name == word => {
                self.advance();
                Ok(())
            }
            _ => Err(self.unexpected(&format!("'{}'", word))),
        }
    }

    fn is_contextual(&self, word: &str) -> bool {
        matches!(self.peek(), Token::Ident(name) if name == word)
    }

    fn end_statement(&mut self) {
        self.eat(&Token::Semi);
    }

    fn bind_top_level(
        &mut self,
        name: &str,
        binding: TopLevel,
        at: (usize, usize),
    ) -> Result<(), ParseError> {
        if self.top_level.insert(name.to_string(), binding).is_some() {
            return Err(ParseError {
                line: at.0,
                column: at.1,
                message: format!("duplicate declaration of '{}'", name),
            });
        }
        Ok(())
    }

    fn module(mut self) -> Result<ModuleRecord, ParseError> {
        let mut record = ModuleRecord {
            imports: Vec::new(),
            exports: Vec::new(),
            declarations: Vec::new(),
            functions: Vec::new(),
            body: Vec::new(),
        };
        let mut export_positions = Vec::new();

        while *self.peek() != Token::Eof {
            match self.peek() {
                Token::Import => {
                    let import = self.import()?;
                    record.imports.push(import);
                }
                Token::Export => {
                    self.advance();
                    match self.peek() {
                        Token::LBrace => {
                            self.advance();
                            while *self.peek() != Token::RBrace {
                                let at = self.position();
                                let local = self.ident("exported binding name")?;
                                let exported = if self.is_contextual("as") {
                                    self.advance();
                                    self.ident("export alias")?
                                } else {
                                    local.clone()
                                };
                                record.exports.push(ExportEntry { exported, local });
                                export_positions.push(at);
                                if !self.eat(&Token::Comma) {
                                    break;
                                }
                            }
                            self.expect(Token::RBrace, "'}'")?;
                            if self.is_contextual("from") {
                                return Err(self.error_here("re-export declarations are not supported"));
                            }
                            self.end_statement();
                        }
                        Token::Let | Token::Const | Token::Var | Token::Function => {
                            let at = self.position();
                            let stmt = self.top_level_statement(&mut record)?;
                            let name = match &stmt {
                                Stmt::Declare { name, .. } => name.clone(),
                                Stmt::Function(decl) => decl.name.clone(),
                                _ => return Err(self.error_here("expected a declaration after 'export'")),
                            };
                            record.exports.push(ExportEntry {
                                exported: name.clone(),
                                local: name,
                            });
                            export_positions.push(at);
                            record.body.push(stmt);
                        }
                        _ => return Err(self.unexpected("a declaration or '{' after 'export'")),
                    }
                }
                _ => {
                    let stmt = self.top_level_statement(&mut record)?;
                    record.body.push(stmt);
                }
            }
        }

        self.check_exports(&record, &export_positions)?;
        Ok(record)
    }

    fn check_exports(
        &self,
        record: &ModuleRecord,
        positions: &[(usize, usize)],
    ) -> Result<(), ParseError> {
        let mut seen: HashMap<&str, ()> = HashMap::new();
        for (entry, &(line, column)) in record.exports.iter().zip(positions) {
            let fail = |message: String| ParseError {
                line,
                column,
                message,
            };
            if seen.insert(entry.exported.as_str(), ()).is_some() {
                return Err(fail(format!("duplicate export '{}'", entry.exported)));
            }
            match self.top_level.get(&entry.local) {
                Some(TopLevel::Declared) => {}
                Some(TopLevel::Imported) => {
                    return Err(fail(format!(
                        "re-exporting imported binding '{}' is not supported",
                        entry.local
                    )))
                }
                None => {
                    return Err(fail(format!(
                        "cannot export undeclared binding '{}'",
                        entry.local
                    )))
                }
            }
        }
        Ok(())
    }

    fn import(&mut self) -> Result<ImportDecl, ParseError> {
        let (line, _) = self.position();
        self.expect(Token::Import, "'import'")?;

        let kind = match self.peek().clone() {
            Token::Str(specifier) => {
                self.advance();
                self.end_statement();
                return Ok(ImportDecl {
                    specifier,
                    kind: ImportKind::SideEffect,
                    line,
                });
            }
            Token::Star => {
                self.advance();
                self.contextual("as")?;
                let at = self.position();
                let local = self.ident("namespace binding name")?;
                self.bind_top_level(&local, TopLevel::Imported, at)?;
                ImportKind::Namespace(local)
            }
            Token::LBrace => {
                self.advance();
                let mut specs = Vec::new();
                while *self.peek() != Token::RBrace {
                    let imported = self.ident("imported binding name")?;
                    let at = self.position();
                    let local = if self.is_contextual("as") {
                        self.advance();
                        self.ident("import alias")?
                    } else {
                        imported.clone()
                    };
                    self.bind_top_level(&local, TopLevel::Imported, at)?;
                    specs.push(ImportSpec { imported, local });
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(Token::RBrace, "'}'")?;
                ImportKind::Named(specs)
            }
            _ => return Err(self.unexpected("'{', '*' or a module specifier")),
        };

        self.contextual("from")?;
        let specifier = match self.peek() {
            Token::Str(specifier) => specifier.clone(),
            _ => return Err(self.unexpected("module specifier string")),
        };
        self.advance();
        self.end_statement();
        Ok(ImportDecl {
            specifier,
            kind,
            line,
        })
    }

    /// Parse a statement at module scope and record its declarations.
    fn top_level_statement(&mut self, record: &mut ModuleRecord) -> Result<Stmt, ParseError> {
        let at = self.position();
        let stmt = self.statement(false)?;
        match &stmt {
            Stmt::Declare { kind, name, .. } => {
                self.bind_top_level(name, TopLevel::Declared, at)?;
                record.declarations.push((name.clone(), *kind));
            }
            Stmt::Function(decl) => {
                self.bind_top_level(&decl.name, TopLevel::Declared, at)?;
                record.declarations.push((decl.name.clone(), DeclKind::Function));
                record.functions.push(Rc::clone(decl));
            }
            _ => {}
        }
        Ok(stmt)
    }

    fn statement(&mut self, in_function: bool) -> Result<Stmt, ParseError> {
        let stmt = match self.peek() {
            Token::Let | Token::Const | Token::Var => {
                let kind = match self.advance() {
                    Token::Let => DeclKind::Let,
                    Token::Const => DeclKind::Const,
                    _ => DeclKind::Var,
                };
                let name = self.ident("binding name")?;
                let init = if self.eat(&Token::Assign) {
                    Some(self.expression()?)
                } else if kind == DeclKind::Const {
                    return Err(self.error_here(format!("missing initializer for const '{}'", name)));
                } else {
                    None
                };
                Stmt::Declare { kind, name, init }
            }
            Token::Function => {
                let decl = self.nested(Self::function)?;
                return Ok(Stmt::Function(Rc::new(decl)));
            }
            Token::Return => {
                if !in_function {
                    return Err(self.error_here("'return' outside of a function"));
                }
                self.advance();
                if matches!(self.peek(), Token::Semi | Token::RBrace | Token::Eof) {
                    Stmt::Return(None)
                } else {
                    Stmt::Return(Some(self.expression()?))
                }
            }
            Token::Throw => {
                self.advance();
                Stmt::Throw(self.expression()?)
            }
            Token::Import | Token::Export => {
                return Err(self.error_here(format!(
                    "{} is only allowed at module top level",
                    self.peek().describe()
                )))
            }
            Token::Ident(name) if *self.peek_at(1) == Token::Assign => {
                let name = name.clone();
                self.advance();
                self.advance();
                Stmt::Assign {
                    name,
                    value: self.expression()?,
                }
            }
            _ => Stmt::Expr(self.expression()?),
        };
        self.end_statement();
        Ok(stmt)
    }

    fn function(&mut self) -> Result<FunctionDecl, ParseError> {
        self.expect(Token::Function, "'function'")?;
        let name = self.ident("function name")?;
        self.expect(Token::LParen, "'('")?;
        let mut params = Vec::new();
        while *self.peek() != Token::RParen {
            let param = self.ident("parameter name")?;
            if params.contains(&param) {
                return Err(self.error_here(format!("duplicate parameter '{}'", param)));
            }
            params.push(param);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(Token::RParen, "')'")?;
        self.expect(Token::LBrace, "'{'")?;
        let mut body = Vec::new();
        while !matches!(self.peek(), Token::RBrace | Token::Eof) {
            body.push(self.statement(true)?);
        }
        self.expect(Token::RBrace, "'}'")?;
        Ok(FunctionDecl { name, params, body })
    }

    fn expression(&mut self) -> Result<Expr, ParseError> {
        self.equality()
    }

    fn equality(&mut self) -> Result<Expr, ParseError> {
        let depth = self.depth;
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek() {
                Token::EqEq => BinaryOp::Eq,
                Token::NotEq => BinaryOp::NotEq,
                _ => {
                    self.depth = depth;
                    return Ok(lhs);
                }
            };
            self.advance();
            self.enter()?;
            let rhs = self.additive()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        let depth = self.depth;
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => {
                    self.depth = depth;
                    return Ok(lhs);
                }
            };
            self.advance();
            self.enter()?;
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, ParseError> {
        let depth = self.depth;
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                _ => {
                    self.depth = depth;
                    return Ok(lhs);
                }
            };
            self.advance();
            self.enter()?;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Token::Minus) {
            return Ok(Expr::Negate(Box::new(self.nested(Self::unary)?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let depth = self.depth;
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Token::LParen => {
                    self.advance();
                    self.enter()?;
                    let mut args = Vec::new();
                    while *self.peek() != Token::RParen {
                        args.push(self.nested(Self::expression)?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                    self.expect(Token::RParen, "')'")?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                    };
                }
                Token::Dot => {
                    self.advance();
                    self.enter()?;
                    let property = self.ident("property name")?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property,
                    };
                }
                _ => {
                    self.depth = depth;
                    return Ok(expr);
                }
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let expr = match self.peek().clone() {
            Token::Number(n) => Expr::Number(n),
            Token::Str(s) => Expr::Str(Rc::from(s.as_str())),
            Token::True => Expr::Bool(true),
            Token::False => Expr::Bool(false),
            Token::Null => Expr::Null,
            Token::Undefined => Expr::Undefined,
            Token::Ident(name) => Expr::Ident(name),
            Token::LParen => {
                self.advance();
                let inner = self.nested(Self::expression)?;
                self.expect(Token::RParen, "')'")?;
                return Ok(inner);
            }
            _ => return Err(self.unexpected("an expression")),
        };
        self.advance();
        Ok(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_imports_and_dependencies() {
        let record = parse_module(
            r#"
            import { a, b as c } from "./dep";
            import * as util from "lib/util";
            import "./dep";
            import "side";
            "#,
        )
        .unwrap();

        assert_eq!(record.imports.len(), 4);
        assert_eq!(
            record.imports[0].kind,
            ImportKind::Named(vec![
                ImportSpec {
                    imported: "a".into(),
                    local: "a".into()
                },
                ImportSpec {
                    imported: "b".into(),
                    local: "c".into()
                },
            ])
        );
        assert_eq!(record.imports[1].kind, ImportKind::Namespace("util".into()));
        assert_eq!(record.dependencies(), vec!["./dep", "lib/util", "side"]);
    }

    #[test]
    fn test_exports() {
        let record = parse_module(
            "export const x = 1;\n\
             let y = 2;\n\
             export function f(p) { return p + y; }\n\
             export { y as why };",
        )
        .unwrap();

        assert_eq!(record.export_names().collect::<Vec<_>>(), vec!["x", "f", "why"]);
        assert_eq!(record.functions.len(), 1);
        assert_eq!(
            record.declarations,
            vec![
                ("x".to_string(), DeclKind::Const),
                ("y".to_string(), DeclKind::Let),
                ("f".to_string(), DeclKind::Function),
            ]
        );
    }

    #[test]
    fn test_precedence() {
        let record = parse_module("let v = 1 + 2 * 3 == 7;").unwrap();
        let Stmt::Declare {
            init: Some(Expr::Binary { op, lhs, .. }),
            ..
        } = &record.body[0]
        else {
            panic!("expected a declaration");
        };
        assert_eq!(*op, BinaryOp::Eq);
        assert!(matches!(
            **lhs,
            Expr::Binary {
                op: BinaryOp::Add,
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_invalid_modules() {
        let cases = [
            ("export { nope };", "undeclared"),
            ("import { a } from 'x'; export { a };", "re-exporting"),
            ("let a = 1; let a = 2;", "duplicate declaration"),
            ("import { a } from 'x'; let a = 1;", "duplicate declaration"),
            ("export const a = 1; export { a };", "duplicate export"),
            ("const a;", "missing initializer"),
            ("return 1;", "outside of a function"),
            ("function f() { import 'x'; }", "top level"),
            ("export { a } from 'x';", "not supported"),
            ("let x = ;", "expected an expression"),
        ];
        for (source, fragment) in cases {
            let err = parse_module(source).unwrap_err();
            assert!(
                err.message.contains(fragment),
                "{:?}: {:?} does not mention {:?}",
                source,
                err.message,
                fragment
            );
        }
    }

    #[test]
    fn test_nesting_limit() {
        let deep_negation = format!("export const x = {}1;", "-".repeat(200_000));
        let err = parse_module(&deep_negation).unwrap_err();
        assert!(err.message.contains("nesting exceeds"));
        assert_eq!(err.line, 1);

        let deep_parens = format!("let y = {}1{};", "(".repeat(10_000), ")".repeat(10_000));
        assert!(parse_module(&deep_parens).unwrap_err().message.contains("nesting"));

        let long_sum = format!("let z = 1{};", " + 1".repeat(5_000));
        assert!(parse_module(&long_sum).unwrap_err().message.contains("nesting"));

        // Reasonable nesting is untouched
        let modest = format!(
            "let w = {}f(a.b, -(1 + 2) * 3){};",
            "(".repeat(50),
            ")".repeat(50)
        );
        parse_module(&modest).unwrap();
    }

    #[test]
    fn test_error_position() {
        let err = parse_module("let a = 1;\nlet b = (2;").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.column, 11);
    }
}
