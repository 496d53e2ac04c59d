//! Error types for the fact store
//!
//! Parse errors are raised while compiling a query. Arity, type and
//! undefined-operator errors are raised while evaluating it, since a term is
//! only checked against its operator when it runs. Mutation errors come from
//! property writes and from rules checked at commit time.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FactbaseError {
    #[error("{message} in \"{query}\"{tokens}")]
    Parse {
        message: String,
        query: String,
        /// Pre-rendered token dump, empty when tokenizing itself failed
        tokens: String,
    },

    #[error("Too {quantity} ({actual}) operands for '{op}' ({expected} expected)")]
    Arity {
        op: String,
        expected: usize,
        actual: usize,
        quantity: &'static str,
    },

    #[error("{0}")]
    Type(String),

    #[error("Term '{op}' is not defined at {term}")]
    UndefinedOperator { op: String, term: String },

    #[error("{source} at {term}")]
    Evaluation {
        term: String,
        source: Box<FactbaseError>,
    },

    #[error("{source} in \"{query}\", AST: {ast}")]
    Query {
        query: String,
        ast: String,
        source: Box<FactbaseError>,
    },

    #[error("invalid property: {0}")]
    InvalidProperty(String),

    #[error("property '{0}' not found")]
    NotFound(String),

    #[error("The fact{uid} doesn't match the '{rule}' rule: {fact}")]
    RuleViolation {
        rule: String,
        fact: String,
        /// Rendered as " #<value>" when the rules layer knows the identity field
        uid: String,
    },

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
}

impl FactbaseError {
    pub fn arity(op: &str, expected: usize, actual: usize) -> Self {
        FactbaseError::Arity {
            op: op.to_string(),
            expected,
            actual,
            quantity: if actual > expected { "many" } else { "few" },
        }
    }

    /// Attach the canonical text of the term that failed. Errors that already
    /// name their term pass through untouched, so the innermost term wins.
    pub fn within(self, term: &str) -> Self {
        match self {
            FactbaseError::Evaluation { .. } | FactbaseError::UndefinedOperator { .. } => self,
            other => FactbaseError::Evaluation {
                term: term.to_string(),
                source: Box::new(other),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, FactbaseError>;
