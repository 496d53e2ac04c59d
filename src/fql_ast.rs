//! FQL Abstract Syntax Tree (AST)
//!
//! A [`Term`] is an operator applied to an ordered list of operands. Terms
//! are immutable once built and shared through `Arc`; every term gets a
//! process-unique [`TermId`] that evaluation caches key on.
//!
//! The canonical text of a term (its `Display`) is what the lexer reads
//! back: `(op operand ...)`, strings single-quoted with both quote
//! characters escaped, timestamps in UTC ISO-8601.

use crate::types::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_TERM_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TermId(u64);

impl TermId {
    fn next() -> Self {
        TermId(NEXT_TERM_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Operator catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operator {
    // Logical
    Always,
    Never,
    Not,
    And,
    Or,
    When,

    // Property tests
    Exists,
    Absent,
    Size,
    Type,
    At,
    Either,
    Prev,

    // Comparisons
    Eq,
    Lt,
    Gt,
    Matches,

    // Aggregates
    Min,
    Max,
    Count,
    Agg,

    // Debugging
    Traced,

    /// Anything else; resolved against registered operators at evaluation
    Custom(String),
}

impl Operator {
    pub fn from_name(name: &str) -> Self {
        match name {
            "always" => Operator::Always,
            "never" => Operator::Never,
            "not" => Operator::Not,
            "and" => Operator::And,
            "or" => Operator::Or,
            "when" => Operator::When,
            "exists" => Operator::Exists,
            "absent" => Operator::Absent,
            "size" => Operator::Size,
            "type" => Operator::Type,
            "at" => Operator::At,
            "either" => Operator::Either,
            "prev" => Operator::Prev,
            "eq" => Operator::Eq,
            "lt" => Operator::Lt,
            "gt" => Operator::Gt,
            "matches" => Operator::Matches,
            "min" => Operator::Min,
            "max" => Operator::Max,
            "count" => Operator::Count,
            "agg" => Operator::Agg,
            "traced" => Operator::Traced,
            other => Operator::Custom(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Operator::Always => "always",
            Operator::Never => "never",
            Operator::Not => "not",
            Operator::And => "and",
            Operator::Or => "or",
            Operator::When => "when",
            Operator::Exists => "exists",
            Operator::Absent => "absent",
            Operator::Size => "size",
            Operator::Type => "type",
            Operator::At => "at",
            Operator::Either => "either",
            Operator::Prev => "prev",
            Operator::Eq => "eq",
            Operator::Lt => "lt",
            Operator::Gt => "gt",
            Operator::Matches => "matches",
            Operator::Min => "min",
            Operator::Max => "max",
            Operator::Count => "count",
            Operator::Agg => "agg",
            Operator::Traced => "traced",
            Operator::Custom(name) => name,
        }
    }

    /// Aggregates look at the whole fact set, not at the subject
    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            Operator::Min | Operator::Max | Operator::Count | Operator::Agg
        )
    }

    pub fn is_builtin(name: &str) -> bool {
        !matches!(Operator::from_name(name), Operator::Custom(_))
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A single operand. `N` is the node type nested terms are built as.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand<N = Arc<Term>> {
    Literal(Value),
    /// Property name, or `$name` for a bound parameter
    Symbol(String),
    Term(N),
}

impl<N> Operand<N> {
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Operand::Symbol(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_term(&self) -> Option<&N> {
        match self {
            Operand::Term(t) => Some(t),
            _ => None,
        }
    }
}

impl<N: fmt::Display> fmt::Display for Operand<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(v) => write!(f, "{}", v),
            Operand::Symbol(s) => write!(f, "{}", s),
            Operand::Term(t) => write!(f, "{}", t),
        }
    }
}

#[derive(Debug)]
pub struct Term {
    id: TermId,
    op: Operator,
    operands: Vec<Operand>,
}

impl Term {
    pub fn new(op: Operator, operands: Vec<Operand>) -> Self {
        Term {
            id: TermId::next(),
            op,
            operands,
        }
    }

    pub fn id(&self) -> TermId {
        self.id
    }

    pub fn op(&self) -> &Operator {
        &self.op
    }

    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    /// Semantically equivalent term that is never longer.
    ///
    /// `and`/`or` drop operands whose canonical text already occurred and
    /// collapse to their single remaining operand. Other operators have no
    /// rule and come back as they are.
    pub fn simplify(self: &Arc<Self>) -> Arc<Term> {
        match self.op {
            Operator::And | Operator::Or => self.simplify_and_or(),
            _ => Arc::clone(self),
        }
    }

    fn simplify_and_or(self: &Arc<Self>) -> Arc<Term> {
        let mut seen: Vec<String> = Vec::new();
        let mut kept: Vec<Operand> = Vec::new();
        for operand in &self.operands {
            let operand = match operand {
                Operand::Term(t) => Operand::Term(t.simplify()),
                other => other.clone(),
            };
            let text = operand.to_string();
            if seen.contains(&text) {
                continue;
            }
            seen.push(text);
            kept.push(operand);
        }
        if kept.len() == 1 {
            if let Some(Operand::Term(t)) = kept.first() {
                return Arc::clone(t);
            }
        }
        if kept.len() == self.operands.len() && self.operands_unchanged(&kept) {
            return Arc::clone(self);
        }
        Arc::new(Term::new(self.op.clone(), kept))
    }

    fn operands_unchanged(&self, kept: &[Operand]) -> bool {
        self.operands.iter().zip(kept).all(|(a, b)| match (a, b) {
            (Operand::Term(x), Operand::Term(y)) => Arc::ptr_eq(x, y),
            _ => true,
        })
    }

    /// True when a `$name` parameter appears anywhere in the tree
    pub fn is_abstract(&self) -> bool {
        self.operands.iter().any(|o| match o {
            Operand::Symbol(s) => s.starts_with('$'),
            Operand::Term(t) => t.is_abstract(),
            Operand::Literal(_) => false,
        })
    }

    /// True when the term can be evaluated without a subject fact: it reads
    /// no plain property names, or it is an `agg`, which picks its own
    /// subjects
    pub fn is_static(&self) -> bool {
        if self.op == Operator::Agg {
            return true;
        }
        self.operands.iter().all(|o| match o {
            Operand::Symbol(s) => s.starts_with('$'),
            Operand::Term(t) => t.is_static(),
            Operand::Literal(_) => true,
        })
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}", self.op)?;
        for operand in &self.operands {
            write!(f, " {}", operand)?;
        }
        write!(f, ")")
    }
}
