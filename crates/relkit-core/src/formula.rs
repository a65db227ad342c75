//! Restricted arithmetic evaluator for user-defined analysis formulas.
//!
//! Formulas are tokenized with a regex, parsed by recursive descent into an
//! AST and evaluated against a fixed [`Scope`]. Nothing outside the scope's
//! declared variables and the built-in function table can be referenced.

use std::fmt;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{RelkitError, RelkitResult};
use crate::guards::safe_div;

/// Deepest nesting of parentheses, unary signs and exponents.
pub const MAX_NESTING: usize = 256;
/// Longest accepted formula, in tokens.
pub const MAX_TOKENS: usize = 2048;

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:(?P<num>(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?)|(?P<ident>[A-Za-z_][A-Za-z0-9_]*)|(?P<op>\*\*|[-+*/^(),]))",
    )
    .unwrap()
});

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char),
}

fn tokenize(source: &str) -> RelkitResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut rest = source;
    while !rest.trim_start().is_empty() {
        let position = source.len() - rest.len();
        let caps = TOKEN_RE.captures(rest).ok_or_else(|| {
            RelkitError::InvalidFormula(format!(
                "unexpected input at position {position}: {:?}",
                rest.trim_start().chars().next().unwrap_or(' ')
            ))
        })?;
        if tokens.len() == MAX_TOKENS {
            return Err(RelkitError::InvalidFormula(format!(
                "formula is longer than {MAX_TOKENS} tokens"
            )));
        }
        if let Some(m) = caps.name("num") {
            let value = m.as_str().parse::<f64>().map_err(|_| {
                RelkitError::InvalidFormula(format!("bad number {:?}", m.as_str()))
            })?;
            tokens.push(Token::Number(value));
        } else if let Some(m) = caps.name("ident") {
            tokens.push(Token::Ident(m.as_str().to_string()));
        } else if let Some(m) = caps.name("op") {
            let op = if m.as_str() == "**" { '^' } else { m.as_str().chars().next().unwrap_or('?') };
            tokens.push(Token::Op(op));
        }
        rest = &rest[caps.get(0).map_or(rest.len(), |m| m.end())..];
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Function {
    Exp,
    Ln,
    Log,
    Log10,
    Sqrt,
    Abs,
    Min,
    Max,
    Pow,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "exp" => Function::Exp,
            "ln" => Function::Ln,
            "log" => Function::Log,
            "log10" => Function::Log10,
            "sqrt" => Function::Sqrt,
            "abs" => Function::Abs,
            "min" => Function::Min,
            "max" => Function::Max,
            "pow" => Function::Pow,
            _ => return None,
        })
    }

    fn accepts(self, argc: usize) -> bool {
        match self {
            Function::Min | Function::Max => argc >= 1,
            Function::Log => argc == 1 || argc == 2,
            Function::Pow => argc == 2,
            _ => argc == 1,
        }
    }

    fn apply(self, args: &[f64]) -> f64 {
        match self {
            Function::Exp => args[0].exp(),
            Function::Ln => args[0].ln(),
            Function::Log if args.len() == 2 => safe_div(args[0].ln(), args[1].ln()),
            Function::Log => args[0].ln(),
            Function::Log10 => args[0].log10(),
            Function::Sqrt => args[0].sqrt(),
            Function::Abs => args[0].abs(),
            Function::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            Function::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Function::Pow => args[0].powf(args[1]),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Expr {
    Number(f64),
    Var(String),
    Neg(Box<Expr>),
    Binary(char, Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, op: char) -> bool {
        if self.peek() == Some(&Token::Op(op)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, op: char) -> RelkitResult<()> {
        if self.eat(op) {
            Ok(())
        } else {
            Err(RelkitError::InvalidFormula(format!("expected '{op}' at token {}", self.pos)))
        }
    }

    fn expression(&mut self) -> RelkitResult<Expr> {
        let mut lhs = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(self.term()?));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> RelkitResult<Expr> {
        let mut lhs = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/'))) = self.peek().cloned() {
            self.pos += 1;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(self.unary()?));
        }
        Ok(lhs)
    }

    /// Every nesting level passes through here, so the depth check bounds
    /// the recursion of the whole parser.
    fn unary(&mut self) -> RelkitResult<Expr> {
        if self.depth == MAX_NESTING {
            return Err(RelkitError::InvalidFormula(format!(
                "formula nests deeper than {MAX_NESTING} levels"
            )));
        }
        self.depth += 1;
        let expr = self.signed();
        self.depth -= 1;
        expr
    }

    fn signed(&mut self) -> RelkitResult<Expr> {
        if self.eat('-') {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        if self.eat('+') {
            return self.unary();
        }
        self.power()
    }

    /// `^` binds tighter than unary minus and associates to the right.
    fn power(&mut self) -> RelkitResult<Expr> {
        let base = self.atom()?;
        if self.eat('^') {
            return Ok(Expr::Binary('^', Box::new(base), Box::new(self.unary()?)));
        }
        Ok(base)
    }

    fn atom(&mut self) -> RelkitResult<Expr> {
        match self.advance() {
            Some(Token::Number(v)) => Ok(Expr::Number(v)),
            Some(Token::Op('(')) => {
                let inner = self.expression()?;
                self.expect(')')?;
                Ok(inner)
            }
            Some(Token::Ident(name)) if self.peek() == Some(&Token::Op('(')) => {
                let function = Function::lookup(&name).ok_or_else(|| {
                    RelkitError::InvalidFormula(format!("unknown function {name:?}"))
                })?;
                self.pos += 1;
                let mut args = Vec::new();
                if !self.eat(')') {
                    loop {
                        args.push(self.expression()?);
                        if self.eat(')') {
                            break;
                        }
                        self.expect(',')?;
                    }
                }
                if !function.accepts(args.len()) {
                    return Err(RelkitError::InvalidFormula(format!(
                        "{name} does not take {} argument(s)",
                        args.len()
                    )));
                }
                Ok(Expr::Call(function, args))
            }
            Some(Token::Ident(name)) => Ok(Expr::Var(name)),
            Some(Token::Op(op)) => {
                Err(RelkitError::InvalidFormula(format!("unexpected '{op}' at token {}", self.pos - 1)))
            }
            None => Err(RelkitError::InvalidFormula("unexpected end of formula".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// Scope and evaluation
// ---------------------------------------------------------------------------

/// The fixed variable namespace a formula may read.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scope {
    values: IndexMap<String, f64>,
}

impl Scope {
    /// Declare `names`, each starting at 0.0.
    pub fn with_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { values: names.into_iter().map(|n| (n.into(), 0.0)).collect() }
    }

    /// Assign a declared variable.
    pub fn set(&mut self, name: &str, value: f64) -> RelkitResult<()> {
        match self.values.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(RelkitError::InvalidFormula(format!("{name:?} is not in scope"))),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// A parsed formula, reusable across evaluations.
#[derive(Clone, Debug, PartialEq)]
pub struct Formula {
    source: String,
    root: Expr,
}

impl Formula {
    pub fn parse(source: &str) -> RelkitResult<Self> {
        let mut parser = Parser { tokens: tokenize(source)?, pos: 0, depth: 0 };
        if parser.tokens.is_empty() {
            return Err(RelkitError::InvalidFormula("formula is empty".into()));
        }
        let root = parser.expression()?;
        if parser.pos < parser.tokens.len() {
            return Err(RelkitError::InvalidFormula(format!(
                "trailing input after token {}",
                parser.pos
            )));
        }
        Ok(Self { source: source.to_string(), root })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against `scope`. Division by zero and non-finite results
    /// yield 0.0; unknown variables are an error.
    pub fn evaluate(&self, scope: &Scope) -> RelkitResult<f64> {
        let value = eval(&self.root, scope)?;
        Ok(if value.is_finite() { value } else { 0.0 })
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn eval(expr: &Expr, scope: &Scope) -> RelkitResult<f64> {
    Ok(match expr {
        Expr::Number(v) => *v,
        Expr::Var(name) => scope
            .get(name)
            .ok_or_else(|| RelkitError::InvalidFormula(format!("unknown variable {name:?}")))?,
        Expr::Neg(inner) => -eval(inner, scope)?,
        Expr::Binary(op, lhs, rhs) => {
            let (a, b) = (eval(lhs, scope)?, eval(rhs, scope)?);
            match op {
                '+' => a + b,
                '-' => a - b,
                '*' => a * b,
                '/' => safe_div(a, b),
                _ => a.powf(b),
            }
        }
        Expr::Call(function, args) => {
            let values = args
                .iter()
                .map(|a| eval(a, scope))
                .collect::<RelkitResult<Vec<f64>>>()?;
            function.apply(&values)
        }
    })
}

/// Parse and evaluate in one step.
pub fn evaluate(source: &str, scope: &Scope) -> RelkitResult<f64> {
    Formula::parse(source)?.evaluate(scope)
}

// ---------------------------------------------------------------------------
// Result slots
// ---------------------------------------------------------------------------

/// Number of user formula / result slots (`res1`..`res5`).
pub const RESULT_SLOTS: usize = 5;

/// A formula slot that failed to parse or evaluate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FormulaFailure {
    /// 1-based slot number.
    pub slot: usize,
    pub code: String,
    pub message: String,
}

/// What a failed slot holds afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OnFailure {
    Zero,
    KeepPrevious,
}

/// Evaluate `formulas` in slot order into `results`. Every `resN` is
/// published to `scope` before evaluation starts and again as soon as its
/// slot is computed, so later formulas see earlier results. Blank formulas
/// leave their slot untouched.
pub fn evaluate_slots(
    formulas: &[String],
    scope: &mut Scope,
    results: &mut [f64],
    on_failure: OnFailure,
) -> RelkitResult<Vec<FormulaFailure>> {
    for (i, value) in results.iter().enumerate() {
        scope.set(&format!("res{}", i + 1), *value)?;
    }
    let mut failures = Vec::new();
    for (i, source) in formulas.iter().enumerate().take(results.len()) {
        if source.trim().is_empty() {
            continue;
        }
        match evaluate(source, scope) {
            Ok(value) => results[i] = value,
            Err(err) => {
                warn!("formula res{} {source:?} failed: {err}", i + 1);
                if on_failure == OnFailure::Zero {
                    results[i] = 0.0;
                }
                let (code, message) = err.to_pair();
                failures.push(FormulaFailure { slot: i + 1, code, message });
            }
        }
        scope.set(&format!("res{}", i + 1), results[i])?;
    }
    Ok(failures)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Scope {
        let mut s = Scope::with_names(["hr", "uf1", "res1"]);
        s.set("hr", 2.0).unwrap();
        s.set("uf1", 3.0).unwrap();
        s
    }

    #[test]
    fn test_precedence() {
        let s = scope();
        assert_eq!(evaluate("1 + 2 * 3", &s).unwrap(), 7.0);
        assert_eq!(evaluate("(1 + 2) * 3", &s).unwrap(), 9.0);
        assert_eq!(evaluate("2 ^ 3 ^ 2", &s).unwrap(), 512.0);
        assert_eq!(evaluate("-2 ** 2", &s).unwrap(), -4.0);
        assert_eq!(evaluate("2 ^ -1", &s).unwrap(), 0.5);
        assert_eq!(evaluate("10 - 4 - 3", &s).unwrap(), 3.0);
        assert_eq!(evaluate("1.5e2 / .5", &s).unwrap(), 300.0);
    }

    #[test]
    fn test_variables_and_functions() {
        let s = scope();
        assert_eq!(evaluate("hr * uf1 + res1", &s).unwrap(), 6.0);
        assert_eq!(evaluate("max(hr, uf1, 1)", &s).unwrap(), 3.0);
        assert_eq!(evaluate("min(hr, uf1)", &s).unwrap(), 2.0);
        assert_eq!(evaluate("pow(hr, uf1)", &s).unwrap(), 8.0);
        assert_eq!(evaluate("sqrt(16) + abs(-1)", &s).unwrap(), 5.0);
        assert!((evaluate("log(8, 2)", &s).unwrap() - 3.0).abs() < 1e-12);
        assert!((evaluate("ln(exp(hr))", &s).unwrap() - 2.0).abs() < 1e-12);
        assert!((evaluate("log10(1000)", &s).unwrap() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_guarded_results() {
        let s = scope();
        assert_eq!(evaluate("hr / 0", &s).unwrap(), 0.0);
        assert_eq!(evaluate("sqrt(-1)", &s).unwrap(), 0.0);
        assert_eq!(evaluate("ln(0)", &s).unwrap(), 0.0);
    }

    #[test]
    fn test_rejects_anything_outside_scope() {
        let s = scope();
        for bad in ["__import__(os)", "pi2 + 1", "open(hr)", "hr +", "(hr", "hr hr", "1 ; 2", "", "pow(1)"] {
            let err = evaluate(bad, &s).unwrap_err();
            assert_eq!(err.code(), "invalid_formula", "{bad}");
        }
        let mut s = scope();
        assert!(s.set("undeclared", 1.0).is_err());
    }

    #[test]
    fn test_slots_see_earlier_results() {
        let mut s = Scope::with_names(["hr", "res1", "res2", "res3"]);
        s.set("hr", 4.0).unwrap();
        let formulas = vec!["hr * 2".to_string(), "res1 + 1".to_string(), "bogus(".to_string()];
        let mut results = [0.0, 0.0, 7.0];
        let failures = evaluate_slots(&formulas, &mut s, &mut results, OnFailure::Zero).unwrap();
        assert_eq!(results, [8.0, 9.0, 0.0]);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].slot, 3);
        assert_eq!(failures[0].code, "invalid_formula");

        let mut results = [0.0, 0.0, 7.0];
        evaluate_slots(&formulas, &mut s, &mut results, OnFailure::KeepPrevious).unwrap();
        assert_eq!(results[2], 7.0);
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let s = Scope::default();
        let nested = |n: usize| format!("{}1{}", "(".repeat(n), ")".repeat(n));
        assert_eq!(evaluate(&nested(100), &s).unwrap(), 1.0);

        let err = evaluate(&nested(MAX_NESTING + 1), &s).unwrap_err();
        assert!(matches!(err, RelkitError::InvalidFormula(_)));
        let err = evaluate(&"-".repeat(1000), &s).unwrap_err();
        assert!(matches!(err, RelkitError::InvalidFormula(_)));
        let err = evaluate(&nested(200_000), &s).unwrap_err();
        assert!(matches!(err, RelkitError::InvalidFormula(_)));
    }

    #[test]
    fn test_long_formula_is_rejected() {
        let s = Scope::default();
        let sum = |n: usize| std::iter::repeat("1").take(n).collect::<Vec<_>>().join(" + ");
        assert_eq!(evaluate(&sum(1000), &s).unwrap(), 1000.0);
        let err = evaluate(&sum(MAX_TOKENS), &s).unwrap_err();
        assert!(matches!(err, RelkitError::InvalidFormula(_)));
    }

    #[test]
    fn test_parsed_formula_reused() {
        let f = Formula::parse("hr * 2").unwrap();
        let mut s = scope();
        assert_eq!(f.evaluate(&s).unwrap(), 4.0);
        s.set("hr", 5.0).unwrap();
        assert_eq!(f.evaluate(&s).unwrap(), 10.0);
        assert_eq!(f.to_string(), "hr * 2");
    }
}
