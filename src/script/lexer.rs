//! Tokenizer for the built-in module dialect
//!
//! Tokens are recognised by a `logos` state machine; positions are byte
//! offsets which [`LineIndex`] turns into 1-based line/column pairs.

use logos::Logos;

fn unescape(lex: &mut logos::Lexer<Token>) -> Option<String> {
    let raw = lex.slice();
    let body = &raw[1..raw.len() - 1];
    let mut value = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            value.push(c);
            continue;
        }
        match chars.next()? {
            'n' => value.push('\n'),
            't' => value.push('\t'),
            'r' => value.push('\r'),
            '0' => value.push('\0'),
            c @ ('\\' | '"' | '\'') => value.push(c),
            _ => return None,
        }
    }
    Some(value)
}

/// Consumes a block comment body; an unclosed comment is a lex error.
fn block_comment(lex: &mut logos::Lexer<Token>) -> bool {
    match lex.remainder().find("*/") {
        Some(end) => {
            lex.bump(end + 2);
            true
        }
        None => {
            lex.bump(lex.remainder().len());
            false
        }
    }
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum Token {
    #[regex(r"[a-zA-Z_$][a-zA-Z0-9_$]*", |lex| lex.slice().to_string())]
    Ident(String),
    #[regex(r"[0-9][0-9_]*(\.[0-9][0-9_]*)?", |lex| lex.slice().replace('_', "").parse::<f64>().ok())]
    Number(f64),
    #[regex(r#""([^"\\\n]|\\.)*""#, unescape)]
    #[regex(r#"'([^'\\\n]|\\.)*'"#, unescape)]
    Str(String),

    // Keywords. `from` and `as` are contextual and lexed as identifiers.
    #[token("import")]
    Import,
    #[token("export")]
    Export,
    #[token("let")]
    Let,
    #[token("const")]
    Const,
    #[token("var")]
    Var,
    #[token("function")]
    Function,
    #[token("return")]
    Return,
    #[token("throw")]
    Throw,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,
    #[token("undefined")]
    Undefined,

    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,
    #[token(".")]
    Dot,
    #[token("*")]
    Star,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("/")]
    Slash,
    #[token("=")]
    Assign,
    // `===` is accepted as a synonym
    #[token("==")]
    #[token("===")]
    EqEq,
    #[token("!=")]
    #[token("!==")]
    NotEq,

    // Dropped by `tokenize`, never seen by the parser
    #[regex(r"//[^\n]*")]
    #[token("/*", block_comment)]
    Comment,

    Eof,
}

impl Token {
    pub fn describe(&self) -> String {
        match self {
            Token::Ident(name) => format!("identifier '{}'", name),
            Token::Number(n) => format!("number {}", n),
            Token::Str(s) => format!("string {:?}", s),
            Token::Comment => "comment".to_string(),
            Token::Eof => "end of input".to_string(),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Token::Import => "import",
            Token::Export => "export",
            Token::Let => "let",
            Token::Const => "const",
            Token::Var => "var",
            Token::Function => "function",
            Token::Return => "return",
            Token::Throw => "throw",
            Token::True => "true",
            Token::False => "false",
            Token::Null => "null",
            Token::Undefined => "undefined",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::Comma => ",",
            Token::Semi => ";",
            Token::Dot => ".",
            Token::Star => "*",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Slash => "/",
            Token::Assign => "=",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::Ident(_) | Token::Number(_) | Token::Str(_) | Token::Comment | Token::Eof => "",
        }
    }
}

/// Token with its 1-based source position
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// Byte offsets of every line start in a source text.
struct LineIndex<'a> {
    source: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(source: &'a str) -> Self {
        let starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(at, _)| at + 1))
            .collect();
        Self { source, starts }
    }

    fn position(&self, offset: usize) -> (usize, usize) {
        let line = self.starts.partition_point(|&start| start <= offset);
        let start = self.starts[line - 1];
        let column = self.source[start..offset].chars().count() + 1;
        (line, column)
    }
}

fn describe_error(slice: &str) -> String {
    if slice.starts_with("/*") {
        return "unterminated block comment".to_string();
    }
    match slice.chars().next() {
        Some('"' | '\'') => "unterminated string literal or unknown escape sequence".to_string(),
        Some(c) if c.is_ascii_digit() => format!("invalid number literal '{}'", slice),
        Some(c) => format!("unexpected character '{}'", c),
        None => "unexpected end of input".to_string(),
    }
}

/// Split `source` into tokens, always ending with [`Token::Eof`].
pub fn tokenize(source: &str) -> Result<Vec<Spanned>, LexError> {
    let index = LineIndex::new(source);
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        let (line, column) = index.position(lexer.span().start);
        match result {
            Ok(Token::Comment) => {}
            Ok(token) => tokens.push(Spanned {
                token,
                line,
                column,
            }),
            Err(()) => {
                return Err(LexError {
                    line,
                    column,
                    message: describe_error(lexer.slice()),
                })
            }
        }
    }

    let (line, column) = index.position(source.len());
    tokens.push(Spanned {
        token: Token::Eof,
        line,
        column,
    });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|spanned| spanned.token)
            .collect()
    }

    #[test]
    fn test_import_statement() {
        assert_eq!(
            kinds("import { a as b } from './x';"),
            vec![
                Token::Import,
                Token::LBrace,
                Token::Ident("a".into()),
                Token::Ident("as".into()),
                Token::Ident("b".into()),
                Token::RBrace,
                Token::Ident("from".into()),
                Token::Str("./x".into()),
                Token::Semi,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_and_positions() {
        let tokens = tokenize("// header\n/* block\n */ let x = 1.5;").unwrap();
        assert_eq!(tokens[0].token, Token::Let);
        assert_eq!((tokens[0].line, tokens[0].column), (3, 5));
        assert_eq!(tokens[3].token, Token::Number(1.5));
    }

    #[test]
    fn test_keyword_prefix_is_identifier() {
        assert_eq!(
            kinds("imports constant"),
            vec![
                Token::Ident("imports".into()),
                Token::Ident("constant".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("a == b != c === d"),
            vec![
                Token::Ident("a".into()),
                Token::EqEq,
                Token::Ident("b".into()),
                Token::NotEq,
                Token::Ident("c".into()),
                Token::EqEq,
                Token::Ident("d".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#""a\n\"b\"""#),
            vec![Token::Str("a\n\"b\"".into()), Token::Eof]
        );
        assert_eq!(kinds("1_000"), vec![Token::Number(1000.0), Token::Eof]);
    }

    #[test]
    fn test_errors() {
        let err = tokenize("let s = 'open").unwrap_err();
        assert_eq!((err.line, err.column), (1, 9));
        assert!(err.message.contains("unterminated"));

        let err = tokenize("a\n  # b").unwrap_err();
        assert_eq!((err.line, err.column), (2, 3));
        assert!(err.message.contains("'#'"));

        let err = tokenize("x /* never closed").unwrap_err();
        assert_eq!(err.message, "unterminated block comment");
    }
}
