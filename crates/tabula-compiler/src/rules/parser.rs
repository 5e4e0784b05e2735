//! Parser for the rewrite-rule language.
//!
//! The language is line-agnostic and token-based:
//!
//! ```text
//! // named fold template
//! fold sum = fold/reduce with s = 0 each xi as s = s + xi
//!
//! // function rule; suffixes: '*' list, '#' array, '+' symbolic
//! def SUM( xs* ) = apply sum to list {xs}
//! ```
//!
//! Fold expressions follow the form
//! `fold[/reduce]|iterate [with a = e, ...] [index i] each x[, y]
//! [as a = e, ...] [with count n] [into e] [when empty e]`.

use tabula_model::{Bound, Expr, ExprKind, FoldDef, FoldSource, Function, Operator, Value};

use super::{ParamKind, RuleParam, StoreError};

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Ident(String),
    Number(f64),
    Str(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Percent,
    Amp,
    Hash,
}

fn lex(src: &str) -> Result<Vec<(Tok, u32)>, StoreError> {
    let mut toks = Vec::new();
    let mut line: u32 = 1;
    let mut chars = src.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '/' => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    for c in chars.by_ref() {
                        if c == '\n' {
                            line += 1;
                            break;
                        }
                    }
                } else {
                    toks.push((Tok::Slash, line));
                }
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\n') | None => {
                            return Err(StoreError::Parse {
                                line,
                                message: "unterminated string literal".to_string(),
                            })
                        }
                        Some(c) => s.push(c),
                    }
                }
                toks.push((Tok::Str(s), line));
            }
            c if c.is_ascii_digit() => {
                let mut s = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        s.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n: f64 = s.parse().map_err(|_| StoreError::Parse {
                    line,
                    message: format!("malformed number '{s}'"),
                })?;
                toks.push((Tok::Number(n), line));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut s = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        s.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                toks.push((Tok::Ident(s), line));
            }
            '<' => {
                chars.next();
                match chars.peek() {
                    Some('>') => {
                        chars.next();
                        toks.push((Tok::Ne, line));
                    }
                    Some('=') => {
                        chars.next();
                        toks.push((Tok::Le, line));
                    }
                    _ => toks.push((Tok::Lt, line)),
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    toks.push((Tok::Ge, line));
                } else {
                    toks.push((Tok::Gt, line));
                }
            }
            _ => {
                chars.next();
                let tok = match c {
                    '(' => Tok::LParen,
                    ')' => Tok::RParen,
                    '{' => Tok::LBrace,
                    '}' => Tok::RBrace,
                    ',' => Tok::Comma,
                    '=' => Tok::Eq,
                    '+' => Tok::Plus,
                    '-' => Tok::Minus,
                    '*' => Tok::Star,
                    '^' => Tok::Caret,
                    '%' => Tok::Percent,
                    '&' => Tok::Amp,
                    '#' => Tok::Hash,
                    other => {
                        return Err(StoreError::Parse {
                            line,
                            message: format!("unexpected character '{other}'"),
                        })
                    }
                };
                toks.push((tok, line));
            }
        }
    }
    Ok(toks)
}

#[derive(Debug)]
pub(crate) struct ParsedDef {
    pub function: Function,
    pub function_name: String,
    pub params: Vec<RuleParam>,
    pub body: Expr,
}

#[derive(Debug)]
pub(crate) struct ParsedRules {
    pub folds: Vec<(String, Expr)>,
    pub defs: Vec<ParsedDef>,
}

pub(crate) fn parse(src: &str) -> Result<ParsedRules, StoreError> {
    let toks = lex(src)?;
    let mut p = Parser {
        toks,
        pos: 0,
        folds: Vec::new(),
        defs: Vec::new(),
    };
    p.parse_items()?;
    Ok(ParsedRules {
        folds: p.folds,
        defs: p.defs,
    })
}

struct Parser {
    toks: Vec<(Tok, u32)>,
    pos: usize,
    folds: Vec<(String, Expr)>,
    defs: Vec<ParsedDef>,
}

impl Parser {
    fn line(&self) -> u32 {
        self.toks
            .get(self.pos.min(self.toks.len().saturating_sub(1)))
            .map(|(_, l)| *l)
            .unwrap_or(0)
    }

    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos).map(|(t, _)| t)
    }

    fn peek_ident(&self) -> Option<&str> {
        match self.peek() {
            Some(Tok::Ident(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    fn bump(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        t
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.peek_ident() == Some(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn fail<T>(&self, message: impl Into<String>) -> Result<T, StoreError> {
        Err(StoreError::Parse {
            line: self.line(),
            message: message.into(),
        })
    }

    fn expect(&mut self, tok: Tok, what: &str) -> Result<(), StoreError> {
        if self.eat(&tok) {
            Ok(())
        } else {
            self.fail(format!("expected {what}"))
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), StoreError> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            self.fail(format!("expected '{kw}'"))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, StoreError> {
        match self.bump() {
            Some(Tok::Ident(s)) => Ok(s),
            _ => self.fail(format!("expected {what}")),
        }
    }

    fn parse_items(&mut self) -> Result<(), StoreError> {
        while self.peek().is_some() {
            match self.peek_ident() {
                Some("def") => self.parse_def()?,
                Some("fold") => self.parse_named_fold()?,
                _ => return self.fail("expected 'def' or 'fold' at top level"),
            }
        }
        Ok(())
    }

    fn parse_named_fold(&mut self) -> Result<(), StoreError> {
        self.expect_keyword("fold")?;
        let name = self.expect_ident("fold name")?;
        self.expect(Tok::Eq, "'='")?;
        let body = self.parse_fold_expr()?;
        if self.folds.iter().any(|(n, _)| *n == name) {
            return self.fail(format!("fold '{name}' defined twice"));
        }
        self.folds.push((name, body));
        Ok(())
    }

    fn parse_def(&mut self) -> Result<(), StoreError> {
        self.expect_keyword("def")?;
        let line = self.line();
        let function_name = self.expect_ident("function name")?;
        let function = Function::from_name(&function_name).ok_or(StoreError::UnknownFunction {
            name: function_name.clone(),
            line,
        })?;
        self.expect(Tok::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.eat(&Tok::RParen) {
            loop {
                let line = self.line();
                let name = self.expect_ident("parameter name")?;
                let kind = match self.peek() {
                    Some(Tok::Star) => {
                        self.pos += 1;
                        ParamKind::List
                    }
                    Some(Tok::Hash) => {
                        self.pos += 1;
                        ParamKind::Array
                    }
                    Some(Tok::Plus) => {
                        self.pos += 1;
                        ParamKind::Symbolic
                    }
                    Some(Tok::Comma) | Some(Tok::RParen) => ParamKind::Value,
                    _ => return Err(StoreError::BadSuffix { name, line }),
                };
                params.push(RuleParam { name, kind });
                if self.eat(&Tok::RParen) {
                    break;
                }
                self.expect(Tok::Comma, "',' or ')'")?;
            }
        }
        for (i, p) in params.iter().enumerate() {
            if p.kind == ParamKind::List && i + 1 != params.len() {
                return Err(StoreError::ListNotLast {
                    name: p.name.clone(),
                    rule: function_name,
                });
            }
        }
        self.expect(Tok::Eq, "'='")?;
        let body = if self.eat_keyword("begin") {
            let body = self.parse_expr()?;
            self.expect_keyword("end")?;
            body
        } else {
            self.parse_expr()?
        };
        self.defs.push(ParsedDef {
            function,
            function_name,
            params,
            body,
        });
        Ok(())
    }

    fn parse_fold_expr(&mut self) -> Result<Expr, StoreError> {
        let may_rearrange = if self.eat_keyword("fold") {
            true
        } else if self.eat_keyword("iterate") {
            false
        } else {
            return self.fail("expected 'fold' or 'iterate'");
        };
        let may_reduce = if self.eat(&Tok::Slash) {
            if !may_rearrange {
                return self.fail("'/reduce' requires 'fold'");
            }
            self.expect_keyword("reduce")?;
            true
        } else {
            false
        };

        let mut accus = Vec::new();
        if self.eat_keyword("with") {
            loop {
                let name = self.expect_ident("accumulator name")?;
                self.expect(Tok::Eq, "'='")?;
                let init = self.parse_expr()?;
                accus.push((name, init));
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
        }

        let index_name = if self.eat_keyword("index") {
            Some(self.expect_ident("index name")?)
        } else {
            None
        };

        self.expect_keyword("each")?;
        let mut elt_names = vec![self.expect_ident("element name")?];
        while self.eat(&Tok::Comma) {
            elt_names.push(self.expect_ident("element name")?);
        }

        let mut steps = Vec::new();
        if self.eat_keyword("as") {
            if accus.is_empty() {
                return self.fail("'as' steps require accumulators");
            }
            loop {
                let name = self.expect_ident("step target")?;
                let slot = steps.len();
                match accus.get(slot) {
                    Some((accu, _)) if *accu == name => {}
                    _ => {
                        return self
                            .fail(format!("step target '{name}' does not match its accumulator"))
                    }
                }
                self.expect(Tok::Eq, "'='")?;
                steps.push(self.parse_expr()?);
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
            if steps.len() != accus.len() {
                return self.fail("each accumulator needs exactly one step");
            }
        } else if !accus.is_empty() {
            return self.fail("accumulators need an 'as' step list");
        }

        let count_name = if self.eat_keyword("with") {
            self.expect_keyword("count")?;
            Some(self.expect_ident("count name")?)
        } else {
            None
        };

        let merge = if self.eat_keyword("into") {
            Some(self.parse_expr()?)
        } else {
            None
        };

        let when_empty = if self.eat_keyword("when") {
            self.expect_keyword("empty")?;
            Some(self.parse_expr()?)
        } else {
            None
        };

        if accus.is_empty() && merge.is_none() {
            return self.fail("a fold without accumulators needs an 'into' expression");
        }

        Ok(Expr::new(ExprKind::FoldDef(Box::new(FoldDef {
            accus,
            index_name,
            elt_names,
            count_name,
            steps,
            merge,
            when_empty,
            may_rearrange,
            may_reduce,
        }))))
    }

    fn parse_apply(&mut self) -> Result<Expr, StoreError> {
        let def = if self.eat(&Tok::LParen) {
            let f = self.parse_fold_expr()?;
            self.expect(Tok::RParen, "')'")?;
            f
        } else {
            let line = self.line();
            let name = self.expect_ident("fold name")?;
            match self.folds.iter().find(|(n, _)| *n == name) {
                Some((_, body)) => body.clone(),
                None => return Err(StoreError::UnknownFold { name, line }),
            }
        };
        self.expect_keyword("to")?;
        let vectors = if self.eat_keyword("vectors") {
            true
        } else {
            self.expect_keyword("list")?;
            false
        };
        self.expect(Tok::LBrace, "'{'")?;
        let mut elems = Vec::new();
        if !self.eat(&Tok::RBrace) {
            loop {
                elems.push(self.parse_expr()?);
                if self.eat(&Tok::RBrace) {
                    break;
                }
                self.expect(Tok::Comma, "',' or '}'")?;
            }
        }
        let over = if vectors {
            FoldSource::Vectors(elems)
        } else {
            FoldSource::List(elems)
        };
        Ok(Expr::new(ExprKind::ApplyFold {
            def: Box::new(def),
            over,
        }))
    }

    fn parse_expr(&mut self) -> Result<Expr, StoreError> {
        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> Result<Expr, StoreError> {
        let mut e = self.parse_concat()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Eq) => Operator::Equal,
                Some(Tok::Ne) => Operator::NotEqual,
                Some(Tok::Lt) => Operator::Less,
                Some(Tok::Le) => Operator::LessOrEqual,
                Some(Tok::Gt) => Operator::Greater,
                Some(Tok::Ge) => Operator::GreaterOrEqual,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_concat()?;
            e = Expr::op(op, vec![e, rhs]);
        }
        Ok(e)
    }

    fn parse_concat(&mut self) -> Result<Expr, StoreError> {
        let mut e = self.parse_minmax()?;
        while self.eat(&Tok::Amp) {
            let rhs = self.parse_minmax()?;
            e = Expr::op(Operator::Concat, vec![e, rhs]);
        }
        Ok(e)
    }

    fn parse_minmax(&mut self) -> Result<Expr, StoreError> {
        let mut e = self.parse_additive()?;
        loop {
            let op = match self.peek_ident() {
                Some("_min_") => Operator::Min,
                Some("_max_") => Operator::Max,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_additive()?;
            e = Expr::op(op, vec![e, rhs]);
        }
        Ok(e)
    }

    fn parse_additive(&mut self) -> Result<Expr, StoreError> {
        let mut e = self.parse_mult()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => Operator::Plus,
                Some(Tok::Minus) => Operator::Minus,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_mult()?;
            e = Expr::op(op, vec![e, rhs]);
        }
        Ok(e)
    }

    fn parse_mult(&mut self) -> Result<Expr, StoreError> {
        let mut e = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Star) => Operator::Times,
                Some(Tok::Slash) => Operator::Div,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            e = Expr::op(op, vec![e, rhs]);
        }
        Ok(e)
    }

    fn parse_unary(&mut self) -> Result<Expr, StoreError> {
        if self.eat(&Tok::Minus) {
            let inner = self.parse_unary()?;
            Ok(Expr::op(Operator::Neg, vec![inner]))
        } else {
            self.parse_postfix()
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, StoreError> {
        let mut e = self.parse_power()?;
        while self.eat(&Tok::Percent) {
            e = Expr::op(Operator::Percent, vec![e]);
        }
        Ok(e)
    }

    fn parse_power(&mut self) -> Result<Expr, StoreError> {
        let e = self.parse_primary()?;
        if self.eat(&Tok::Caret) {
            let rhs = self.parse_unary()?;
            Ok(Expr::op(Operator::Exp, vec![e, rhs]))
        } else {
            Ok(e)
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, StoreError> {
        match self.peek().cloned() {
            Some(Tok::Number(n)) => {
                self.pos += 1;
                Ok(Expr::constant(Value::Number(n)))
            }
            Some(Tok::Str(s)) => {
                self.pos += 1;
                Ok(Expr::constant(Value::Text(s)))
            }
            Some(Tok::LParen) => {
                self.pos += 1;
                let e = if matches!(self.peek_ident(), Some("fold") | Some("iterate")) {
                    self.parse_fold_expr()?
                } else {
                    self.parse_expr()?
                };
                self.expect(Tok::RParen, "')'")?;
                Ok(e)
            }
            Some(Tok::Ident(name)) => {
                self.pos += 1;
                match name.as_str() {
                    "apply" => self.parse_apply(),
                    "minvalue" => Ok(Expr::new(ExprKind::Extremum(Bound::Smallest))),
                    "maxvalue" => Ok(Expr::new(ExprKind::Extremum(Bound::Largest))),
                    "error" if self.peek() == Some(&Tok::LParen) => {
                        self.pos += 1;
                        let msg = match self.bump() {
                            Some(Tok::Str(s)) => s,
                            _ => return self.fail("expected string literal in error(...)"),
                        };
                        self.expect(Tok::RParen, "')'")?;
                        Ok(Expr::error(msg))
                    }
                    _ if self.peek() == Some(&Tok::LParen) => {
                        let line = self.line();
                        let function =
                            Function::from_name(&name).ok_or(StoreError::UnknownFunction {
                                name: name.clone(),
                                line,
                            })?;
                        self.pos += 1;
                        let mut args = Vec::new();
                        if !self.eat(&Tok::RParen) {
                            loop {
                                args.push(self.parse_expr()?);
                                if self.eat(&Tok::RParen) {
                                    break;
                                }
                                self.expect(Tok::Comma, "',' or ')'")?;
                            }
                        }
                        Ok(Expr::call(function, args))
                    }
                    _ => Ok(Expr::let_var(name)),
                }
            }
            _ => self.fail("expected expression"),
        }
    }
}
