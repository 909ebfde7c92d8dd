//! # Matcher Expression Language
//!
//! Small expression language used by the model's matcher and by each policy's `rule`.
//!
//! ```text
//! expr       := or
//! or         := and (("||" | "or") and)*
//! and        := not (("&&" | "and") not)*
//! not        := ("!" | "not") not | comparison
//! comparison := primary (("==" | "!=" | "<" | "<=" | ">" | ">=" | "in") primary)?
//! primary    := literal | path | call | "(" expr ")" | "(" expr "," ... ")" | "[" expr, ... "]"
//! path       := ident ("." ident)+            e.g. r.sub.group_id
//! call       := ("eval" | "keyMatch" | "keyMatch2" | "regexMatch") "(" args ")"
//! ```
//!
//! Values are `serde_json::Value`s. Missing attributes resolve to `null`, which is unequal
//! to everything, so a rule referencing an absent attribute never grants access by accident.
//! Numbers and strings compare by textual form (`1 == "1"`), because path parameters are
//! always strings while token claims are numbers.

use crate::core::error::{GatewayError, GatewayResult};
use regex::Regex;
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Built-in functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    /// `eval(p.rule)`: evaluate a policy field as an expression
    Eval,
    /// `keyMatch(key, pattern)`: `*` wildcard suffix
    KeyMatch,
    /// `keyMatch2(key, pattern)`: `:param` segments and `/*` wildcard
    KeyMatch2,
    /// `regexMatch(key, pattern)`: regex search
    RegexMatch,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "eval" => Some(Self::Eval),
            "keyMatch" => Some(Self::KeyMatch),
            "keyMatch2" => Some(Self::KeyMatch2),
            "regexMatch" => Some(Self::RegexMatch),
            _ => None,
        }
    }

    fn arity(&self) -> usize {
        match self {
            Self::Eval => 1,
            _ => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

/// Parsed expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Dotted attribute path, e.g. `["r", "sub", "group_id"]`
    Path(Vec<String>),
    Tuple(Vec<Expr>),
    Not(Box<Expr>),
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        function: Function,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Identifier(String),
    QuotedString(String),
    Number(String),
    True,
    False,
    Null,
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    Comma,
    And,
    Or,
    Not,
    Operator(CompareOp),
    Eof,
}

struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.input[self.pos..].chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek_char(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn next_token(&mut self) -> GatewayResult<Token> {
        self.skip_whitespace();

        let Some(ch) = self.peek_char() else {
            return Ok(Token::Eof);
        };

        let single = match ch {
            '(' => Some(Token::OpenParen),
            ')' => Some(Token::CloseParen),
            '[' => Some(Token::OpenBracket),
            ']' => Some(Token::CloseBracket),
            ',' => Some(Token::Comma),
            _ => None,
        };
        if let Some(token) = single {
            self.bump();
            return Ok(token);
        }

        let next = self.peek_second();
        let two_char = match (ch, next) {
            ('&', Some('&')) => Some(Token::And),
            ('|', Some('|')) => Some(Token::Or),
            ('=', Some('=')) => Some(Token::Operator(CompareOp::Eq)),
            ('!', Some('=')) => Some(Token::Operator(CompareOp::Ne)),
            ('<', Some('=')) => Some(Token::Operator(CompareOp::Le)),
            ('>', Some('=')) => Some(Token::Operator(CompareOp::Ge)),
            _ => None,
        };
        if let Some(token) = two_char {
            self.bump();
            self.bump();
            return Ok(token);
        }

        match ch {
            '!' => {
                self.bump();
                return Ok(Token::Not);
            }
            '<' => {
                self.bump();
                return Ok(Token::Operator(CompareOp::Lt));
            }
            '>' => {
                self.bump();
                return Ok(Token::Operator(CompareOp::Gt));
            }
            '"' | '\'' => return self.quoted(ch),
            _ => {}
        }

        if ch.is_ascii_digit() || (ch == '-' && next.is_some_and(|c| c.is_ascii_digit())) {
            let start = self.pos;
            self.bump();
            while matches!(self.peek_char(), Some(c) if c.is_ascii_digit() || c == '.') {
                self.bump();
            }
            return Ok(Token::Number(self.input[start..self.pos].to_string()));
        }

        if ch.is_alphabetic() || ch == '_' {
            let start = self.pos;
            while matches!(self.peek_char(), Some(c) if c.is_alphanumeric() || c == '_' || c == '.') {
                self.bump();
            }
            let word = &self.input[start..self.pos];
            return Ok(match word {
                "and" => Token::And,
                "or" => Token::Or,
                "not" => Token::Not,
                "in" => Token::Operator(CompareOp::In),
                "true" | "True" => Token::True,
                "false" | "False" => Token::False,
                "null" | "None" => Token::Null,
                _ => Token::Identifier(word.to_string()),
            });
        }

        Err(GatewayError::config(format!(
            "Unexpected character '{}' at offset {} in expression",
            ch, self.pos
        )))
    }

    fn quoted(&mut self, quote: char) -> GatewayResult<Token> {
        self.bump();
        let mut value = String::new();
        while let Some(c) = self.bump() {
            match c {
                '\\' => match self.bump() {
                    Some(escaped) => value.push(escaped),
                    None => break,
                },
                c if c == quote => return Ok(Token::QuotedString(value)),
                c => value.push(c),
            }
        }
        Err(GatewayError::config("Unterminated quoted string in expression"))
    }
}

struct Parser<'a> {
    tokenizer: Tokenizer<'a>,
    current: Token,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> GatewayResult<Self> {
        let mut tokenizer = Tokenizer::new(input);
        let current = tokenizer.next_token()?;
        Ok(Self { tokenizer, current })
    }

    fn advance(&mut self) -> GatewayResult<()> {
        self.current = self.tokenizer.next_token()?;
        Ok(())
    }

    fn expect(&mut self, token: Token, what: &str) -> GatewayResult<()> {
        if self.current != token {
            return Err(GatewayError::config(format!(
                "Expected {} in expression, found {:?}",
                what, self.current
            )));
        }
        self.advance()
    }

    fn parse_or(&mut self) -> GatewayResult<Expr> {
        let mut left = self.parse_and()?;
        while self.current == Token::Or {
            self.advance()?;
            let right = self.parse_and()?;
            left = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> GatewayResult<Expr> {
        let mut left = self.parse_not()?;
        while self.current == Token::And {
            self.advance()?;
            let right = self.parse_not()?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> GatewayResult<Expr> {
        if self.current == Token::Not {
            self.advance()?;
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> GatewayResult<Expr> {
        let left = self.parse_primary()?;
        if let Token::Operator(op) = self.current {
            self.advance()?;
            let right = self.parse_primary()?;
            return Ok(Expr::Compare {
                op,
                left: Box::new(left),
                right: Box::new(right),
            });
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> GatewayResult<Expr> {
        let token = std::mem::replace(&mut self.current, Token::Eof);
        self.advance()?;

        match token {
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::QuotedString(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Number(n) => parse_number(&n).map(Expr::Literal),
            Token::OpenParen => {
                if self.current == Token::CloseParen {
                    self.advance()?;
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.parse_or()?;
                if self.current == Token::Comma {
                    let mut items = vec![first];
                    items.extend(self.parse_list_tail(Token::CloseParen)?);
                    return Ok(Expr::Tuple(items));
                }
                self.expect(Token::CloseParen, "')'")?;
                Ok(first)
            }
            Token::OpenBracket => {
                if self.current == Token::CloseBracket {
                    self.advance()?;
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.parse_or()?;
                let mut items = vec![first];
                items.extend(self.parse_list_tail(Token::CloseBracket)?);
                Ok(Expr::Tuple(items))
            }
            Token::Identifier(name) => {
                if self.current == Token::OpenParen {
                    return self.parse_call(&name);
                }
                let segments: Vec<String> = name.split('.').map(str::to_string).collect();
                if segments.len() < 2 || segments.iter().any(|s| s.is_empty()) {
                    return Err(GatewayError::config(format!("Unknown identifier '{}' in expression", name)));
                }
                Ok(Expr::Path(segments))
            }
            other => Err(GatewayError::config(format!("Unexpected token {:?} in expression", other))),
        }
    }

    /// Parse `, item, item ... <close>` after the first element of a list
    fn parse_list_tail(&mut self, close: Token) -> GatewayResult<Vec<Expr>> {
        let mut items = Vec::new();
        while self.current == Token::Comma {
            self.advance()?;
            if self.current == close {
                break;
            }
            items.push(self.parse_or()?);
        }
        self.expect(close, "closing delimiter")?;
        Ok(items)
    }

    fn parse_call(&mut self, name: &str) -> GatewayResult<Expr> {
        let function = Function::from_name(name)
            .ok_or_else(|| GatewayError::config(format!("Unknown function '{}' in expression", name)))?;
        self.expect(Token::OpenParen, "'('")?;

        let mut args = Vec::new();
        if self.current != Token::CloseParen {
            args.push(self.parse_or()?);
            while self.current == Token::Comma {
                self.advance()?;
                args.push(self.parse_or()?);
            }
        }
        self.expect(Token::CloseParen, "')'")?;

        if args.len() != function.arity() {
            return Err(GatewayError::config(format!(
                "{}() takes {} argument(s), got {}",
                name,
                function.arity(),
                args.len()
            )));
        }
        Ok(Expr::Call { function, args })
    }
}

fn parse_number(text: &str) -> GatewayResult<Value> {
    if let Ok(i) = text.parse::<i64>() {
        return Ok(Value::Number(i.into()));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| GatewayError::config(format!("Invalid number '{}' in expression", text)))
}

/// Compiled regexes keyed by their source text
///
/// Filled once when the engine is built. Patterns that only appear at evaluation time
/// are compiled on the spot and not cached, so the cache stays immutable.
#[derive(Debug, Default)]
pub struct PatternCache {
    compiled: HashMap<String, Regex>,
}

impl PatternCache {
    pub fn insert(&mut self, pattern: &str) -> GatewayResult<()> {
        if !self.compiled.contains_key(pattern) {
            self.compiled.insert(pattern.to_string(), Regex::new(pattern)?);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }

    fn is_match(&self, pattern: &str, text: &str) -> bool {
        match self.compiled.get(pattern) {
            Some(re) => re.is_match(text),
            None => Regex::new(pattern).map(|re| re.is_match(text)).unwrap_or(false),
        }
    }
}

/// Translate a `keyMatch2` pattern (`/pages/:id`, `/files/*`) into an anchored regex
pub fn key_match2_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    for (index, segment) in pattern.split('/').enumerate() {
        if index > 0 {
            out.push('/');
        }
        if segment == "*" {
            out.push_str(".*");
        } else if segment.starts_with(':') && segment.len() > 1 {
            out.push_str("[^/]+");
        } else {
            out.push_str(&regex::escape(segment));
        }
    }
    out.push('$');
    out
}

/// Bindings visible while evaluating one policy row
pub struct Env<'a> {
    /// `r.<token>` values
    pub request: &'a [(String, Value)],
    /// `p.<token>` values for the current row
    pub policy: &'a [(String, Value)],
    /// Pre-parsed expressions for the row's `eval()` targets, keyed by policy token
    pub rules: &'a HashMap<String, Expr>,
    pub patterns: &'a PatternCache,
}

impl<'a> Env<'a> {
    fn resolve(&self, path: &[String]) -> Value {
        let bindings = match path[0].as_str() {
            "r" => self.request,
            "p" => self.policy,
            _ => return Value::Null,
        };
        let Some(token) = path.get(1) else {
            return Value::Null;
        };
        let Some((_, root)) = bindings.iter().find(|(name, _)| name == token) else {
            return Value::Null;
        };

        let mut current = root;
        for segment in &path[2..] {
            match current.get(segment) {
                Some(next) => current = next,
                None => return Value::Null,
            }
        }
        current.clone()
    }
}

impl Expr {
    /// Parse an expression
    pub fn parse(input: &str) -> GatewayResult<Self> {
        let mut parser = Parser::new(input)?;
        let expr = parser.parse_or()?;
        if parser.current != Token::Eof {
            return Err(GatewayError::config(format!(
                "Unexpected trailing tokens in expression '{}'",
                input
            )));
        }
        Ok(expr)
    }

    /// Visit every node, depth first
    pub fn walk<'e>(&'e self, visit: &mut impl FnMut(&'e Expr)) {
        visit(self);
        match self {
            Expr::Tuple(items) => items.iter().for_each(|item| item.walk(visit)),
            Expr::Not(inner) => inner.walk(visit),
            Expr::Logical { left, right, .. } | Expr::Compare { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            Expr::Call { args, .. } => args.iter().for_each(|arg| arg.walk(visit)),
            Expr::Literal(_) | Expr::Path(_) => {}
        }
    }

    pub fn evaluate(&self, env: &Env<'_>) -> Value {
        match self {
            Expr::Literal(value) => value.clone(),
            Expr::Path(path) => env.resolve(path),
            Expr::Tuple(items) => Value::Array(items.iter().map(|item| item.evaluate(env)).collect()),
            Expr::Not(inner) => Value::Bool(!truthy(&inner.evaluate(env))),
            Expr::Logical { op, left, right } => {
                let left = truthy(&left.evaluate(env));
                let result = match op {
                    LogicalOp::And => left && truthy(&right.evaluate(env)),
                    LogicalOp::Or => left || truthy(&right.evaluate(env)),
                };
                Value::Bool(result)
            }
            Expr::Compare { op, left, right } => {
                let left = left.evaluate(env);
                let right = right.evaluate(env);
                Value::Bool(compare(*op, &left, &right))
            }
            Expr::Call { function, args } => Value::Bool(call(*function, args, env)),
        }
    }

    pub fn matches(&self, env: &Env<'_>) -> bool {
        truthy(&self.evaluate(env))
    }
}

fn call(function: Function, args: &[Expr], env: &Env<'_>) -> bool {
    if function == Function::Eval {
        return match &args[0] {
            Expr::Path(path) if path.len() == 2 && path[0] == "p" => env
                .rules
                .get(&path[1])
                .map(|rule| rule.matches(env))
                .unwrap_or(false),
            _ => false,
        };
    }

    let key = args[0].evaluate(env);
    let pattern = args[1].evaluate(env);
    let (Some(key), Some(pattern)) = (key.as_str(), pattern.as_str()) else {
        return false;
    };

    match function {
        Function::KeyMatch => match pattern.find('*') {
            Some(star) => key.starts_with(&pattern[..star]),
            None => key == pattern,
        },
        Function::KeyMatch2 => env.patterns.is_match(&key_match2_regex(pattern), key),
        Function::RegexMatch => env.patterns.is_match(pattern, key),
        Function::Eval => false,
    }
}

/// Truthiness: `null`, `false`, `0`, `""` and empty collections are false
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => n.to_string() == *s,
        _ => left == right,
    }
}

fn ordering(left: &Value, right: &Value) -> Option<Ordering> {
    let as_number = |value: &Value| match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    };
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => as_number(left)?.partial_cmp(&as_number(right)?),
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> bool {
    match op {
        CompareOp::Eq => loose_eq(left, right),
        CompareOp::Ne => !left.is_null() && !right.is_null() && !loose_eq(left, right),
        CompareOp::Lt => ordering(left, right) == Some(Ordering::Less),
        CompareOp::Le => matches!(ordering(left, right), Some(Ordering::Less | Ordering::Equal)),
        CompareOp::Gt => ordering(left, right) == Some(Ordering::Greater),
        CompareOp::Ge => matches!(ordering(left, right), Some(Ordering::Greater | Ordering::Equal)),
        CompareOp::In => match (left, right) {
            (Value::Null, _) => false,
            (_, Value::Array(items)) => items.iter().any(|item| loose_eq(left, item)),
            (Value::String(key), Value::Object(map)) => map.contains_key(key),
            (Value::String(needle), Value::String(haystack)) => haystack.contains(needle.as_str()),
            _ => false,
        },
    }
}
