//! Lexer and parser for bracketed template expressions.
//!
//! Policy documents embed expressions in strings: `"[parameters('effect')]"`,
//! `"[concat('tags[', parameters('tagName'), ']')]"`. A string is an expression
//! when it starts with `[` and ends with `]`; a leading `[[` escapes the
//! bracket and marks a plain literal.
//!
//! Grammar:
//!
//! ```text
//! expr     := primary accessor*
//! primary  := IDENT '(' [expr (',' expr)*] ')' | STRING | INTEGER
//! accessor := '.' IDENT | '[' expr ']'
//! ```

use std::fmt;

use canopy_contracts::error::{CanopyError, CanopyResult};

/// A parsed template expression. Syntax only; no function is interpreted here.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateExpr {
    String(String),
    Integer(i64),
    Call { name: String, args: Vec<TemplateExpr> },
    Member { target: Box<TemplateExpr>, name: String },
    Index { target: Box<TemplateExpr>, index: Box<TemplateExpr> },
}

impl TemplateExpr {
    /// Visit this node and every descendant in pre-order.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a TemplateExpr)) {
        f(self);
        match self {
            TemplateExpr::String(_) | TemplateExpr::Integer(_) => {}
            TemplateExpr::Call { args, .. } => args.iter().for_each(|a| a.walk(f)),
            TemplateExpr::Member { target, .. } => target.walk(f),
            TemplateExpr::Index { target, index } => {
                target.walk(f);
                index.walk(f);
            }
        }
    }

    /// The function name if this is a call.
    pub fn call_name(&self) -> Option<&str> {
        match self {
            TemplateExpr::Call { name, .. } => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for TemplateExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateExpr::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            TemplateExpr::Integer(n) => write!(f, "{n}"),
            TemplateExpr::Call { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            TemplateExpr::Member { target, name } => write!(f, "{target}.{name}"),
            TemplateExpr::Index { target, index } => write!(f, "{target}[{index}]"),
        }
    }
}

/// True if `s` is a template expression rather than a literal.
pub fn is_expression(s: &str) -> bool {
    s.len() >= 2 && s.starts_with('[') && !s.starts_with("[[") && s.ends_with(']')
}

/// Strip the `[[` escape from a literal that starts with a bracket.
pub fn unescape_literal(s: &str) -> &str {
    if s.starts_with("[[") {
        &s[1..]
    } else {
        s
    }
}

/// Parse the expression string `s`, including its outer brackets.
pub fn parse(s: &str) -> CanopyResult<TemplateExpr> {
    if !is_expression(s) {
        return Err(CanopyError::unsupported(s, "not a template expression"));
    }
    let tokens = tokenize(s, &s[1..s.len() - 1])?;
    let mut parser = Parser { source: s, tokens, pos: 0 };
    let expr = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.error("trailing tokens after expression"));
    }
    Ok(expr)
}

// ── Lexer ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
}

fn tokenize(source: &str, body: &str) -> CanopyResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = body.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\r' | '\n' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '[' => {
                chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::RBracket);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '\'' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some('\'') if chars.peek() == Some(&'\'') => {
                            chars.next();
                            text.push('\'');
                        }
                        Some('\'') => break,
                        Some(other) => text.push(other),
                        None => {
                            return Err(CanopyError::unsupported(source, "unterminated string literal"))
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            '-' | '0'..='9' => {
                let mut text = String::new();
                text.push(c);
                chars.next();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n = text
                    .parse::<i64>()
                    .map_err(|_| CanopyError::unsupported(source, format!("invalid integer '{text}'")))?;
                tokens.push(Token::Int(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut text = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' {
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(text));
            }
            other => {
                return Err(CanopyError::unsupported(
                    source,
                    format!("unexpected character '{other}'"),
                ))
            }
        }
    }

    Ok(tokens)
}

// ── Parser ────────────────────────────────────────────────────────────────────

struct Parser<'s> {
    source: &'s str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, reason: &str) -> CanopyError {
        CanopyError::unsupported(self.source, reason)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token, reason: &str) -> CanopyResult<()> {
        match self.next() {
            Some(t) if t == expected => Ok(()),
            _ => Err(self.error(reason)),
        }
    }

    fn expr(&mut self) -> CanopyResult<TemplateExpr> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    match self.next() {
                        Some(Token::Ident(name)) => {
                            expr = TemplateExpr::Member {
                                target: Box::new(expr),
                                name,
                            }
                        }
                        _ => return Err(self.error("expected property name after '.'")),
                    }
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.expr()?;
                    self.expect(Token::RBracket, "expected ']' after index")?;
                    expr = TemplateExpr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn primary(&mut self) -> CanopyResult<TemplateExpr> {
        match self.next() {
            Some(Token::Str(s)) => Ok(TemplateExpr::String(s)),
            Some(Token::Int(n)) => Ok(TemplateExpr::Integer(n)),
            Some(Token::Ident(name)) => {
                self.expect(Token::LParen, "expected '(' after function name")?;
                let mut args = Vec::new();
                if self.peek() == Some(&Token::RParen) {
                    self.pos += 1;
                    return Ok(TemplateExpr::Call { name, args });
                }
                loop {
                    args.push(self.expr()?);
                    match self.next() {
                        Some(Token::Comma) => continue,
                        Some(Token::RParen) => break,
                        _ => return Err(self.error("expected ',' or ')' in argument list")),
                    }
                }
                Ok(TemplateExpr::Call { name, args })
            }
            _ => Err(self.error("expected a function call, string, or integer")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Vec<TemplateExpr>) -> TemplateExpr {
        TemplateExpr::Call {
            name: name.to_string(),
            args,
        }
    }

    fn s(text: &str) -> TemplateExpr {
        TemplateExpr::String(text.to_string())
    }

    #[test]
    fn detects_expressions_and_escapes() {
        assert!(is_expression("[parameters('effect')]"));
        assert!(!is_expression("[[not an expression]"));
        assert!(!is_expression("Deny"));
        assert!(!is_expression("["));
        assert_eq!(unescape_literal("[[literal]"), "[literal]");
        assert_eq!(unescape_literal("plain"), "plain");
    }

    #[test]
    fn parses_nested_calls() {
        let expr = parse("[concat('tags[', parameters('tagName'), ']')]").unwrap();
        assert_eq!(
            expr,
            call("concat", vec![s("tags["), call("parameters", vec![s("tagName")]), s("]")])
        );
    }

    #[test]
    fn parses_accessors() {
        let expr = parse("[listKeys(resourceId('Microsoft.Storage/storageAccounts', 'storage1'), '2021-09-01').keys[0].value]")
            .unwrap();
        match expr {
            TemplateExpr::Member { target, name } => {
                assert_eq!(name, "value");
                match *target {
                    TemplateExpr::Index { index, .. } => assert_eq!(*index, TemplateExpr::Integer(0)),
                    other => panic!("expected index access, got {:?}", other),
                }
            }
            other => panic!("expected member access, got {:?}", other),
        }
    }

    #[test]
    fn parses_escaped_quote_and_negative_integer() {
        let expr = parse("[padLeft('it''s', -3)]").unwrap();
        assert_eq!(expr, call("padLeft", vec![s("it's"), TemplateExpr::Integer(-3)]));
    }

    #[test]
    fn display_reproduces_source() {
        let source = "[if(true(), 'a''b', parameters('x'))]";
        let expr = parse(source).unwrap();
        assert_eq!(format!("[{expr}]"), source);
    }

    #[test]
    fn rejects_malformed_expressions() {
        for bad in ["[concat('a', ]", "[parameters('x']", "['unterminated]", "[field('a') field('b')]", "[a + b]"] {
            assert!(parse(bad).is_err(), "expected '{bad}' to be rejected");
        }
    }

    #[test]
    fn walk_visits_every_call() {
        let expr = parse("[if(and(empty(parameters('a')), true()), null(), parameters('b'))]").unwrap();
        let mut names = Vec::new();
        expr.walk(&mut |node| {
            if let Some(name) = node.call_name() {
                names.push(name.to_string());
            }
        });
        assert_eq!(names, ["if", "and", "empty", "parameters", "true", "null", "parameters"]);
    }
}
