//! FQL Term Executor
//!
//! Evaluates a [`Term`] against one subject (a fact or an overlay) and the
//! set of all facts visible to the pass. Operators are checked for arity and
//! operand shape when they run, not when they are parsed.
//!
//! Operand resolution:
//! - a literal is used as it is,
//! - a symbol is looked up on the subject (absent means nil),
//! - a nested term is evaluated recursively, through the pass cache.

use crate::error::{FactbaseError, Result};
use crate::fact::{Fact, Subject};
use crate::fql_ast::{Operand, Operator, Term};
use crate::fql_cache::{CacheKey, CacheStats, EvalCache};
use crate::overlay::{Overlay, Source};
use crate::types::{Params, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, trace};

/// Result of evaluating a term
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Nil,
    Bool(bool),
    /// Never empty; an empty list is `Nil`
    Values(Vec<Value>),
}

impl Datum {
    pub fn from_values(values: Vec<Value>) -> Self {
        if values.is_empty() {
            Datum::Nil
        } else {
            Datum::Values(values)
        }
    }

    pub fn scalar(value: impl Into<Value>) -> Self {
        Datum::Values(vec![value.into()])
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Datum::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Datum::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn values(&self) -> &[Value] {
        match self {
            Datum::Values(v) => v,
            _ => &[],
        }
    }

    pub fn first(&self) -> Option<&Value> {
        self.values().first()
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Nil => write!(f, "nil"),
            Datum::Bool(b) => write!(f, "{}", b),
            Datum::Values(v) if v.len() == 1 => write!(f, "{}", v[0]),
            Datum::Values(v) => {
                let items: Vec<String> = v.iter().map(|x| x.to_string()).collect();
                write!(f, "[{}]", items.join(", "))
            }
        }
    }
}

/// User-supplied operator: receives its operands already resolved
pub type CustomOperator = Arc<dyn Fn(&[Datum]) -> Result<Datum> + Send + Sync>;

/// Operators registered on top of the built-in catalog
#[derive(Clone, Default)]
pub struct OperatorRegistry {
    operators: HashMap<String, CustomOperator>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in operator names can't be taken over
    pub fn register(&mut self, name: &str, operator: CustomOperator) -> Result<()> {
        if Operator::is_builtin(name) {
            return Err(FactbaseError::Type(format!(
                "Operator '{}' is built in and can't be redefined",
                name
            )));
        }
        self.operators.insert(name.to_string(), operator);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&CustomOperator> {
        self.operators.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.operators.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorRegistry")
            .field("operators", &self.names())
            .finish()
    }
}

/// Evaluates terms for one pass. Create one per scan so that memoized
/// results never outlive the fact population they were computed against.
pub struct Executor<'a> {
    registry: &'a OperatorRegistry,
    trace: bool,
    cache: EvalCache,
}

impl<'a> Executor<'a> {
    pub fn new(registry: &'a OperatorRegistry) -> Self {
        Executor {
            registry,
            trace: false,
            cache: EvalCache::new(),
        }
    }

    pub fn with_tracing(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Evaluate a term against a subject, with `all` as the fact set for
    /// aggregates
    pub fn evaluate(&mut self, term: &Term, subject: &dyn Subject, all: &[Fact]) -> Result<Datum> {
        let key = CacheKey::for_term(term, subject);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }
        let result = self
            .dispatch(term, subject, all)
            .map_err(|e| e.within(&term.to_string()))?;
        if self.trace {
            trace!(term = %term, result = %result, "Term evaluated");
        }
        self.cache.put(key, result.clone());
        Ok(result)
    }

    /// Evaluate and require a boolean; nil counts as false
    pub fn test(&mut self, term: &Term, subject: &dyn Subject, all: &[Fact]) -> Result<bool> {
        let datum = self.evaluate(term, subject, all)?;
        only_bool(&datum).map_err(|e| e.within(&term.to_string()))
    }

    /// The verdict of a whole query on one subject. Unlike [`Executor::test`],
    /// nil is rejected here: a query must answer true or false.
    pub fn verdict(&mut self, term: &Term, subject: &dyn Subject, all: &[Fact]) -> Result<bool> {
        match self.evaluate(term, subject, all)? {
            Datum::Nil => Err(FactbaseError::Type(
                "Boolean expected, while nil received".to_string(),
            )
            .within(&term.to_string())),
            datum => only_bool(&datum).map_err(|e| e.within(&term.to_string())),
        }
    }

    fn dispatch(&mut self, term: &Term, subject: &dyn Subject, all: &[Fact]) -> Result<Datum> {
        match term.op() {
            Operator::Always => {
                assert_args(term, 0)?;
                Ok(Datum::Bool(true))
            }
            Operator::Never => {
                assert_args(term, 0)?;
                Ok(Datum::Bool(false))
            }
            Operator::Not => {
                assert_args(term, 1)?;
                let v = self.the_value(term, 0, subject, all)?;
                Ok(Datum::Bool(!only_bool(&v)?))
            }
            Operator::And => {
                for i in 0..term.operands().len() {
                    if !only_bool(&self.the_value(term, i, subject, all)?)? {
                        return Ok(Datum::Bool(false));
                    }
                }
                Ok(Datum::Bool(true))
            }
            Operator::Or => {
                for i in 0..term.operands().len() {
                    if only_bool(&self.the_value(term, i, subject, all)?)? {
                        return Ok(Datum::Bool(true));
                    }
                }
                Ok(Datum::Bool(false))
            }
            Operator::When => {
                assert_args(term, 2)?;
                if !only_bool(&self.the_value(term, 0, subject, all)?)? {
                    return Ok(Datum::Bool(true));
                }
                let b = self.the_value(term, 1, subject, all)?;
                Ok(Datum::Bool(only_bool(&b)?))
            }
            Operator::Exists => {
                assert_args(term, 1)?;
                Ok(Datum::Bool(by_symbol(term, 0, subject)?.is_some()))
            }
            Operator::Absent => {
                assert_args(term, 1)?;
                Ok(Datum::Bool(by_symbol(term, 0, subject)?.is_none()))
            }
            Operator::Size => {
                assert_args(term, 1)?;
                let n = by_symbol(term, 0, subject)?.map(|v| v.len()).unwrap_or(0);
                Ok(Datum::scalar(n))
            }
            Operator::Type => {
                assert_args(term, 1)?;
                let kind = match by_symbol(term, 0, subject)? {
                    None => "nil",
                    Some(v) if v.len() > 1 => "Array",
                    Some(v) => v.first().map(Value::kind).unwrap_or("nil"),
                };
                Ok(Datum::scalar(kind))
            }
            Operator::At => {
                assert_args(term, 2)?;
                let index = self.the_value(term, 0, subject, all)?;
                let index = match index.values() {
                    [Value::Int(i)] => *i,
                    _ => {
                        return Err(FactbaseError::Type(format!(
                            "An integer index expected, but provided: {}",
                            index
                        )))
                    }
                };
                let values = self.the_value(term, 1, subject, all)?;
                let picked = usize::try_from(index)
                    .ok()
                    .and_then(|i| values.values().get(i).cloned());
                Ok(picked.map(Datum::scalar).unwrap_or(Datum::Nil))
            }
            Operator::Either => {
                assert_args(term, 2)?;
                let v = self.the_value(term, 0, subject, all)?;
                if v.is_nil() {
                    self.the_value(term, 1, subject, all)
                } else {
                    Ok(v)
                }
            }
            Operator::Prev => {
                assert_args(term, 1)?;
                let current = self.the_value(term, 0, subject, all)?;
                Ok(self.cache.swap_previous(term.id(), current))
            }
            Operator::Eq => self.equality(term, subject, all),
            Operator::Lt => self.arithmetic(term, subject, all, |l, r| {
                l.compare(r) == Some(Ordering::Less)
            }),
            Operator::Gt => self.arithmetic(term, subject, all, |l, r| {
                l.compare(r) == Some(Ordering::Greater)
            }),
            Operator::Matches => self.matches(term, subject, all),
            Operator::Min => {
                assert_args(term, 1)?;
                Ok(best(term, all, Ordering::Less)?)
            }
            Operator::Max => {
                assert_args(term, 1)?;
                Ok(best(term, all, Ordering::Greater)?)
            }
            Operator::Count => {
                assert_args(term, 0)?;
                Ok(Datum::scalar(all.len()))
            }
            Operator::Agg => self.agg(term, subject, all),
            Operator::Traced => {
                assert_args(term, 1)?;
                let inner = the_term(term, 0)?;
                let result = self.evaluate(inner, subject, all)?;
                info!("{} -> {}", inner, result);
                Ok(result)
            }
            Operator::Custom(name) => {
                let operator = match self.registry.get(name) {
                    Some(op) => Arc::clone(op),
                    None => {
                        return Err(FactbaseError::UndefinedOperator {
                            op: name.clone(),
                            term: term.to_string(),
                        })
                    }
                };
                let mut args = Vec::with_capacity(term.operands().len());
                for i in 0..term.operands().len() {
                    args.push(self.the_value(term, i, subject, all)?);
                }
                operator(&args)
            }
        }
    }

    /// Like [`Executor::arithmetic`], but booleans may be compared too: with
    /// each other by equality, with anything else never equal
    fn equality(&mut self, term: &Term, subject: &dyn Subject, all: &[Fact]) -> Result<Datum> {
        assert_args(term, 2)?;
        let lefts = self.the_value(term, 0, subject, all)?;
        if lefts.is_nil() {
            return Ok(Datum::Bool(false));
        }
        let rights = self.the_value(term, 1, subject, all)?;
        let equal = match (&lefts, &rights) {
            (Datum::Bool(l), Datum::Bool(r)) => l == r,
            (Datum::Values(l), Datum::Values(r)) => {
                l.iter().any(|a| r.iter().any(|b| a.loosely_equals(b)))
            }
            _ => false,
        };
        Ok(Datum::Bool(equal))
    }

    /// True iff some left value relates to some right value
    fn arithmetic<F>(&mut self, term: &Term, subject: &dyn Subject, all: &[Fact], op: F) -> Result<Datum>
    where
        F: Fn(&Value, &Value) -> bool,
    {
        assert_args(term, 2)?;
        let lefts = self.the_value(term, 0, subject, all)?;
        let lefts = match comparable(&lefts)? {
            Some(v) => v,
            None => return Ok(Datum::Bool(false)),
        };
        let rights = self.the_value(term, 1, subject, all)?;
        let rights = match comparable(&rights)? {
            Some(v) => v,
            None => return Ok(Datum::Bool(false)),
        };
        let found = lefts.iter().any(|l| rights.iter().any(|r| op(l, r)));
        Ok(Datum::Bool(found))
    }

    fn matches(&mut self, term: &Term, subject: &dyn Subject, all: &[Fact]) -> Result<Datum> {
        assert_args(term, 2)?;
        let text = self.the_value(term, 0, subject, all)?;
        if text.is_nil() {
            return Ok(Datum::Bool(false));
        }
        let text = match text.values() {
            [v] => plain_text(v),
            _ => return Err(FactbaseError::Type("Exactly one string expected".to_string())),
        };
        let pattern = self.the_value(term, 1, subject, all)?;
        if pattern.is_nil() {
            return Err(FactbaseError::Type("Regexp is nil".to_string()));
        }
        let pattern = match pattern.values() {
            [v] => plain_text(v),
            _ => return Err(FactbaseError::Type("Exactly one regexp expected".to_string())),
        };
        let re = self.cache.regex(&pattern)?;
        Ok(Datum::Bool(re.is_match(&text)))
    }

    /// Filter `all` by the selector, then evaluate the second term with the
    /// survivors as the fact set and the first survivor as the subject
    fn agg(&mut self, term: &Term, subject: &dyn Subject, all: &[Fact]) -> Result<Datum> {
        assert_args(term, 2)?;
        let selector = the_term(term, 0)?;
        let body = the_term(term, 1)?;
        let params = subject.parameters();

        let mut subset = Vec::new();
        for candidate in all {
            let keep = match &params {
                Some(p) => {
                    let view = Overlay::shared(Some(candidate.clone()), Arc::clone(p));
                    self.test(selector, &view, all)?
                }
                None => self.test(selector, candidate, all)?,
            };
            if keep {
                subset.push(candidate.clone());
            }
        }

        let first = subset.first().cloned();
        let params = params.unwrap_or_else(|| Arc::new(Source::Mapping(Params::new())));
        let view = Overlay::shared(first, params);
        self.evaluate(body, &view, &subset)
    }

    fn the_value(
        &mut self,
        term: &Term,
        pos: usize,
        subject: &dyn Subject,
        all: &[Fact],
    ) -> Result<Datum> {
        match &term.operands()[pos] {
            Operand::Literal(v) => Ok(Datum::scalar(v.clone())),
            Operand::Symbol(s) => Ok(subject
                .lookup(s)
                .map(Datum::from_values)
                .unwrap_or(Datum::Nil)),
            Operand::Term(t) => self.evaluate(t, subject, all),
        }
    }
}

impl Term {
    /// Evaluate in a pass of its own, with no custom operators
    pub fn evaluate(&self, subject: &dyn Subject, all: &[Fact]) -> Result<Datum> {
        let registry = OperatorRegistry::new();
        Executor::new(&registry).evaluate(self, subject, all)
    }
}

fn assert_args(term: &Term, expected: usize) -> Result<()> {
    let actual = term.operands().len();
    if actual != expected {
        return Err(FactbaseError::arity(term.op().name(), expected, actual));
    }
    Ok(())
}

fn by_symbol(term: &Term, pos: usize, subject: &dyn Subject) -> Result<Option<Vec<Value>>> {
    let operand = &term.operands()[pos];
    match operand.as_symbol() {
        Some(name) => Ok(subject.lookup(name)),
        None => Err(FactbaseError::Type(format!(
            "A symbol expected at #{}, but provided: {}",
            pos, operand
        ))),
    }
}

fn the_term(term: &Term, pos: usize) -> Result<&Term> {
    let operand = &term.operands()[pos];
    match operand.as_term() {
        Some(t) => Ok(t),
        None => Err(FactbaseError::Type(format!(
            "A term expected, but '{}' provided",
            operand
        ))),
    }
}

/// Nil is false; anything but a boolean is an error
fn only_bool(datum: &Datum) -> Result<bool> {
    match datum {
        Datum::Nil => Ok(false),
        Datum::Bool(b) => Ok(*b),
        Datum::Values(v) => Err(FactbaseError::Type(format!(
            "Boolean expected, while {} received",
            v.first().map(Value::kind).unwrap_or("nil")
        ))),
    }
}

/// Values to compare, `None` for nil
fn comparable(datum: &Datum) -> Result<Option<&[Value]>> {
    match datum {
        Datum::Nil => Ok(None),
        Datum::Bool(_) => Err(FactbaseError::Type(
            "Boolean can't be compared, a value expected".to_string(),
        )),
        Datum::Values(v) => Ok(Some(v)),
    }
}

fn plain_text(value: &Value) -> String {
    value
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string())
}

/// Extremum of a property across the fact set; values that can't be
/// ordered against the current best are skipped
fn best(term: &Term, all: &[Fact], wanted: Ordering) -> Result<Datum> {
    let operand = &term.operands()[0];
    let name = operand.as_symbol().ok_or_else(|| {
        FactbaseError::Type(format!("A symbol expected, but provided: {}", operand))
    })?;
    let mut best: Option<Value> = None;
    for fact in all {
        for v in fact.history(name).unwrap_or_default() {
            let better = match &best {
                None => true,
                Some(b) => v.compare(b) == Some(wanted),
            };
            if better {
                best = Some(v);
            }
        }
    }
    Ok(best.map(Datum::scalar).unwrap_or(Datum::Nil))
}
