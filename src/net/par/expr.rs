use super::{convert_unit, unit, ParMap, Unit};
use crate::runtime::SimError;
use std::fmt::Display;

///
/// A typed parameter value.
///
#[derive(Debug, Clone, PartialEq)]
pub enum ParValue {
    /// A boolean value.
    Bool(bool),
    /// An integer value.
    Int(i64),
    /// A floating point value with an optional measurement unit.
    Double(f64, Option<Unit>),
    /// A string value.
    Str(String),
}

impl Display for ParValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Double(v, Some(u)) => write!(f, "{v}{u}"),
            Self::Double(v, None) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
        }
    }
}

// # Lexer

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64, bool, Option<String>),
    Ident(String),
    Str(String),
    Op(&'static str),
}

const OPS: [&str; 18] = [
    "==", "!=", "<=", ">=", "&&", "||", "<", ">", "+", "-", "*", "/", "%", "(", ")", "?", ":",
    ",",
];

fn lex(raw: &str) -> Option<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = raw.char_indices().peekable();

    'outer: while let Some(&(i, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c.is_ascii_digit() {
            let mut end = i;
            let mut is_int = true;
            while let Some(&(j, d)) = chars.peek() {
                if d.is_ascii_digit() {
                    end = j + d.len_utf8();
                    chars.next();
                } else if d == '.' && is_int {
                    // a second dot ends the number ("1.2.3" fails later)
                    is_int = false;
                    end = j + 1;
                    chars.next();
                } else {
                    break;
                }
            }
            let value: f64 = raw[i..end].parse().ok()?;
            // a directly attached identifier is a measurement unit
            let mut unit_str = String::new();
            while let Some(&(_, d)) = chars.peek() {
                if d.is_alphabetic() {
                    unit_str.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            let unit = if unit_str.is_empty() { None } else { Some(unit_str) };
            tokens.push(Token::Num(value, is_int && unit.is_none(), unit));
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&(_, d)) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Ident(ident));
            continue;
        }

        if c == '"' {
            chars.next();
            let mut value = String::new();
            for (_, d) in chars.by_ref() {
                if d == '"' {
                    tokens.push(Token::Str(value));
                    continue 'outer;
                }
                value.push(d);
            }
            return None; // unterminated literal
        }

        for op in OPS {
            if raw[i..].starts_with(op) {
                for _ in 0..op.len() {
                    chars.next();
                }
                tokens.push(Token::Op(op));
                continue 'outer;
            }
        }

        if c == '!' {
            chars.next();
            tokens.push(Token::Op("!"));
            continue;
        }
        if c == '.' {
            chars.next();
            tokens.push(Token::Op("."));
            continue;
        }

        return None;
    }

    Some(tokens)
}

// # Parser

#[derive(Debug, Clone)]
pub(super) enum Expr {
    Lit(ParValue),
    Ref(String),
    Unary(&'static str, Box<Expr>),
    Binary(&'static str, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Token::Op(t)) if *t == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> Option<Expr> {
        let cond = self.or()?;
        if self.eat_op("?") {
            let then = self.expr()?;
            if !self.eat_op(":") {
                return None;
            }
            let other = self.expr()?;
            return Some(Expr::Ternary(Box::new(cond), Box::new(then), Box::new(other)));
        }
        Some(cond)
    }

    fn or(&mut self) -> Option<Expr> {
        let mut lhs = self.and()?;
        while self.eat_op("||") {
            let rhs = self.and()?;
            lhs = Expr::Binary("||", Box::new(lhs), Box::new(rhs));
        }
        Some(lhs)
    }

    fn and(&mut self) -> Option<Expr> {
        let mut lhs = self.cmp()?;
        while self.eat_op("&&") {
            let rhs = self.cmp()?;
            lhs = Expr::Binary("&&", Box::new(lhs), Box::new(rhs));
        }
        Some(lhs)
    }

    fn cmp(&mut self) -> Option<Expr> {
        let lhs = self.add()?;
        for op in ["==", "!=", "<=", ">=", "<", ">"] {
            if self.eat_op(op) {
                let rhs = self.add()?;
                return Some(Expr::Binary(op, Box::new(lhs), Box::new(rhs)));
            }
        }
        Some(lhs)
    }

    fn add(&mut self) -> Option<Expr> {
        let mut lhs = self.mul()?;
        loop {
            if self.eat_op("+") {
                let rhs = self.mul()?;
                lhs = Expr::Binary("+", Box::new(lhs), Box::new(rhs));
            } else if self.eat_op("-") {
                let rhs = self.mul()?;
                lhs = Expr::Binary("-", Box::new(lhs), Box::new(rhs));
            } else {
                return Some(lhs);
            }
        }
    }

    fn mul(&mut self) -> Option<Expr> {
        let mut lhs = self.unary()?;
        loop {
            if self.eat_op("*") {
                let rhs = self.unary()?;
                lhs = Expr::Binary("*", Box::new(lhs), Box::new(rhs));
            } else if self.eat_op("/") {
                let rhs = self.unary()?;
                lhs = Expr::Binary("/", Box::new(lhs), Box::new(rhs));
            } else if self.eat_op("%") {
                let rhs = self.unary()?;
                lhs = Expr::Binary("%", Box::new(lhs), Box::new(rhs));
            } else {
                return Some(lhs);
            }
        }
    }

    fn unary(&mut self) -> Option<Expr> {
        if self.eat_op("-") {
            return Some(Expr::Unary("-", Box::new(self.unary()?)));
        }
        if self.eat_op("!") {
            return Some(Expr::Unary("!", Box::new(self.unary()?)));
        }
        self.atom()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn atom(&mut self) -> Option<Expr> {
        match self.peek()?.clone() {
            Token::Num(value, is_int, unit_str) => {
                self.pos += 1;
                Some(Expr::Lit(if is_int {
                    ParValue::Int(value as i64)
                } else {
                    ParValue::Double(value, unit_str.map(|u| unit(&u)))
                }))
            }
            Token::Str(value) => {
                self.pos += 1;
                Some(Expr::Lit(ParValue::Str(value)))
            }
            Token::Op("(") => {
                self.pos += 1;
                let inner = self.expr()?;
                self.eat_op(")").then_some(inner)
            }
            Token::Ident(ident) => {
                self.pos += 1;
                match ident.as_str() {
                    "true" => return Some(Expr::Lit(ParValue::Bool(true))),
                    "false" => return Some(Expr::Lit(ParValue::Bool(false))),
                    _ => {}
                }

                if self.eat_op("(") {
                    let mut args = Vec::new();
                    if !self.eat_op(")") {
                        loop {
                            args.push(self.expr()?);
                            if self.eat_op(")") {
                                break;
                            }
                            if !self.eat_op(",") {
                                return None;
                            }
                        }
                    }
                    return Some(Expr::Call(ident, args));
                }

                // dotted parameter reference
                let mut path = ident;
                while self.eat_op(".") {
                    let Some(Token::Ident(next)) = self.peek().cloned() else {
                        return None;
                    };
                    self.pos += 1;
                    path.push('.');
                    path.push_str(&next);
                }
                Some(Expr::Ref(path))
            }
            _ => None,
        }
    }
}

pub(super) fn parse(raw: &str) -> Option<Expr> {
    let tokens = lex(raw)?;
    if tokens.is_empty() {
        return None;
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr()?;
    (parser.pos == parser.tokens.len()).then_some(expr)
}

// # Evaluation

pub(super) struct EvalCtx<'a> {
    pub(super) map: &'a ParMap,
    pub(super) module: &'a str,
    pub(super) visiting: Vec<String>,
}

fn type_error(expected: &str, found: &ParValue) -> SimError {
    SimError::Internal {
        reason: format!("parameter expression: expected {expected}, found '{found}'"),
    }
}

#[allow(clippy::cast_precision_loss)]
fn numeric(value: &ParValue) -> Result<(f64, Option<Unit>, bool), SimError> {
    match value {
        ParValue::Int(v) => Ok((*v as f64, None, true)),
        ParValue::Double(v, u) => Ok((*v, *u, false)),
        other => Err(type_error("a numeric value", other)),
    }
}

fn boolean(value: &ParValue) -> Result<bool, SimError> {
    match value {
        ParValue::Bool(v) => Ok(*v),
        other => Err(type_error("a boolean value", other)),
    }
}

/// Converts rhs into the unit system of lhs, returning aligned magnitudes
/// and the resulting unit.
fn align(
    lhs: (f64, Option<Unit>),
    rhs: (f64, Option<Unit>),
) -> Result<(f64, f64, Option<Unit>), SimError> {
    match (lhs.1, rhs.1) {
        (Some(lu), Some(ru)) => Ok((lhs.0, convert_unit(rhs.0, ru, lu)?, Some(lu))),
        (Some(lu), None) => Ok((lhs.0, rhs.0, Some(lu))),
        (None, Some(ru)) => Ok((lhs.0, rhs.0, Some(ru))),
        (None, None) => Ok((lhs.0, rhs.0, None)),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn num_result(value: f64, unit: Option<Unit>, int: bool) -> ParValue {
    if int && unit.is_none() && value.fract() == 0.0 {
        ParValue::Int(value as i64)
    } else {
        ParValue::Double(value, unit)
    }
}

impl Expr {
    pub(super) fn eval(&self, ctx: &mut EvalCtx<'_>) -> Result<ParValue, SimError> {
        match self {
            Self::Lit(value) => Ok(value.clone()),

            Self::Ref(name) => resolve_ref(name, ctx),

            Self::Unary(op, inner) => {
                let value = inner.eval(ctx)?;
                match *op {
                    "-" => {
                        let (v, u, int) = numeric(&value)?;
                        Ok(num_result(-v, u, int))
                    }
                    "!" => Ok(ParValue::Bool(!boolean(&value)?)),
                    _ => unreachable!(),
                }
            }

            Self::Binary(op, lhs, rhs) => {
                let lhs = lhs.eval(ctx)?;
                // short circuit booleans
                if *op == "&&" {
                    return Ok(ParValue::Bool(boolean(&lhs)? && boolean(&rhs.eval(ctx)?)?));
                }
                if *op == "||" {
                    return Ok(ParValue::Bool(boolean(&lhs)? || boolean(&rhs.eval(ctx)?)?));
                }
                let rhs = rhs.eval(ctx)?;
                eval_binary(op, &lhs, &rhs)
            }

            Self::Ternary(cond, then, other) => {
                if boolean(&cond.eval(ctx)?)? {
                    then.eval(ctx)
                } else {
                    other.eval(ctx)
                }
            }

            Self::Call(name, args) => {
                let args = args
                    .iter()
                    .map(|arg| arg.eval(ctx))
                    .collect::<Result<Vec<_>, _>>()?;
                eval_call(name, &args)
            }
        }
    }
}

fn eval_binary(op: &str, lhs: &ParValue, rhs: &ParValue) -> Result<ParValue, SimError> {
    match op {
        "==" | "!=" => {
            let eq = match (lhs, rhs) {
                (ParValue::Str(l), ParValue::Str(r)) => l == r,
                (ParValue::Bool(l), ParValue::Bool(r)) => l == r,
                _ => {
                    let (l, lu, _) = numeric(lhs)?;
                    let (r, ru, _) = numeric(rhs)?;
                    let (l, r, _) = align((l, lu), (r, ru))?;
                    (l - r).abs() < f64::EPSILON
                }
            };
            Ok(ParValue::Bool(if op == "==" { eq } else { !eq }))
        }
        "<" | "<=" | ">" | ">=" => {
            let (l, lu, _) = numeric(lhs)?;
            let (r, ru, _) = numeric(rhs)?;
            let (l, r, _) = align((l, lu), (r, ru))?;
            Ok(ParValue::Bool(match op {
                "<" => l < r,
                "<=" => l <= r,
                ">" => l > r,
                ">=" => l >= r,
                _ => unreachable!(),
            }))
        }
        "+" | "-" => {
            let (l, lu, li) = numeric(lhs)?;
            let (r, ru, ri) = numeric(rhs)?;
            let (l, r, u) = align((l, lu), (r, ru))?;
            let value = if op == "+" { l + r } else { l - r };
            Ok(num_result(value, u, li && ri))
        }
        "*" => {
            let (l, lu, li) = numeric(lhs)?;
            let (r, ru, ri) = numeric(rhs)?;
            let u = match (lu, ru) {
                (Some(lu), Some(ru)) => {
                    return Err(SimError::UnitMismatch {
                        from: lu.as_str(),
                        to: ru.as_str(),
                    })
                }
                (u, None) | (None, u) => u,
            };
            Ok(num_result(l * r, u, li && ri))
        }
        "/" => {
            let (l, lu, _) = numeric(lhs)?;
            let (r, ru, _) = numeric(rhs)?;
            match (lu, ru) {
                // equal dimensions cancel out
                (Some(lu), Some(ru)) => Ok(ParValue::Double(l / convert_unit(r, ru, lu)?, None)),
                (u, None) => Ok(ParValue::Double(l / r, u)),
                (None, Some(ru)) => Err(SimError::UnitMismatch {
                    from: "",
                    to: ru.as_str(),
                }),
            }
        }
        "%" => match (lhs, rhs) {
            (ParValue::Int(_), ParValue::Int(0)) => Err(SimError::Internal {
                reason: "parameter expression: modulo by zero".to_string(),
            }),
            (ParValue::Int(l), ParValue::Int(r)) => Ok(ParValue::Int(l % r)),
            _ => Err(type_error("two integer values", lhs)),
        },
        _ => unreachable!(),
    }
}

fn eval_call(name: &str, args: &[ParValue]) -> Result<ParValue, SimError> {
    let arity_error = || SimError::Internal {
        reason: format!("parameter expression: invalid arguments for function '{name}'"),
    };

    match name {
        "abs" | "floor" | "ceil" | "sqrt" | "exp" | "log" | "sin" | "cos" | "tan" => {
            let [arg] = args else { return Err(arity_error()) };
            let (v, u, int) = numeric(arg)?;
            let (value, keeps_unit) = match name {
                "abs" => (v.abs(), true),
                "floor" => (v.floor(), true),
                "ceil" => (v.ceil(), true),
                "sqrt" => (v.sqrt(), false),
                "exp" => (v.exp(), false),
                "log" => (v.ln(), false),
                "sin" => (v.sin(), false),
                "cos" => (v.cos(), false),
                "tan" => (v.tan(), false),
                _ => unreachable!(),
            };
            Ok(num_result(value, if keeps_unit { u } else { None }, int && keeps_unit))
        }
        "min" | "max" => {
            let [lhs, rhs] = args else { return Err(arity_error()) };
            let (l, lu, li) = numeric(lhs)?;
            let (r, ru, ri) = numeric(rhs)?;
            let (l, r, u) = align((l, lu), (r, ru))?;
            let value = if name == "min" { l.min(r) } else { l.max(r) };
            Ok(num_result(value, u, li && ri))
        }
        "pow" => {
            let [lhs, rhs] = args else { return Err(arity_error()) };
            let (l, _, li) = numeric(lhs)?;
            let (r, _, ri) = numeric(rhs)?;
            Ok(num_result(l.powf(r), None, li && ri))
        }
        _ => Err(SimError::Internal {
            reason: format!("parameter expression: unknown function '{name}'"),
        }),
    }
}

fn resolve_ref(name: &str, ctx: &mut EvalCtx<'_>) -> Result<ParValue, SimError> {
    // resolve against the own module first, then against ancestors
    let mut scope = Some(ctx.module.to_string());
    while let Some(current) = scope {
        let full_key = if current.is_empty() {
            name.to_string()
        } else {
            format!("{current}.{name}")
        };

        if let Some(raw) = ctx.map.get(&full_key) {
            if ctx.visiting.contains(&full_key) {
                return Err(SimError::CircularReference { path: full_key });
            }
            let owner = full_key
                .rsplit_once('.')
                .map(|(parent, _)| parent.to_string())
                .unwrap_or_default();
            ctx.visiting.push(full_key);

            // the referenced parameter is evaluated in its own scope
            let mut sub = EvalCtx {
                map: ctx.map,
                module: &owner,
                visiting: std::mem::take(&mut ctx.visiting),
            };
            let result = evaluate_in(&raw, &mut sub);
            ctx.visiting = sub.visiting;
            ctx.visiting.pop();
            return result;
        }

        scope = match current.rfind('.') {
            Some(idx) => Some(current[..idx].to_string()),
            None if current.is_empty() => None,
            None => Some(String::new()),
        };
    }

    Err(SimError::ParameterUnassigned {
        path: format!("{}.{}", ctx.module, name),
    })
}

///
/// Interprets a raw parameter string within the scope of a module.
///
/// Values that do not parse as an expression are plain strings; surrounding
/// quotation marks are trimmed.
///
pub(super) fn evaluate_in(raw: &str, ctx: &mut EvalCtx<'_>) -> Result<ParValue, SimError> {
    let trimmed = raw.trim();
    match parse(trimmed) {
        Some(expr) => expr.eval(ctx),
        None => {
            let stripped = trimmed
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .unwrap_or(trimmed);
            Ok(ParValue::Str(stripped.to_string()))
        }
    }
}
