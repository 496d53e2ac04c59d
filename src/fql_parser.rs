//! FQL Parser
//!
//! Recursive descent over the token stream from the lexer. The parser does
//! not build [`Term`]s itself: it hands every `(op operand ...)` group to a
//! [`TermFactory`], so callers can plug in their own node type. The default
//! [`TermBuilder`] produces shared [`Term`]s and simplifies the root once.

use crate::config::DEFAULT_MAX_DEPTH;
use crate::error::{FactbaseError, Result};
use crate::fql_ast::{Operand, Operator, Term};
use crate::fql_lexer::{dump, Lexer, Token};
use std::sync::Arc;
use tracing::debug;

/// Builds AST nodes out of an operator and its operands
pub trait TermFactory {
    type Node;

    fn make(&self, op: Operator, operands: Vec<Operand<Self::Node>>) -> Result<Self::Node>;

    /// Applied once to the root node
    fn finish(&self, node: Self::Node) -> Self::Node {
        node
    }
}

/// Default factory: shared [`Term`]s, simplified at the root
#[derive(Debug, Clone, Copy, Default)]
pub struct TermBuilder;

impl TermFactory for TermBuilder {
    type Node = Arc<Term>;

    fn make(&self, op: Operator, operands: Vec<Operand>) -> Result<Arc<Term>> {
        Ok(Arc::new(Term::new(op, operands)))
    }

    fn finish(&self, node: Arc<Term>) -> Arc<Term> {
        node.simplify()
    }
}

pub struct Parser<'q, F: TermFactory = TermBuilder> {
    query: &'q str,
    tokens: Vec<Token>,
    position: usize,
    factory: F,
    max_depth: usize,
}

impl<'q> Parser<'q, TermBuilder> {
    /// Parse a query string into a simplified term
    pub fn parse(query: &str) -> Result<Arc<Term>> {
        Parser::new(query, TermBuilder)?.to_term()
    }
}

impl<'q, F: TermFactory> Parser<'q, F> {
    pub fn new(query: &'q str, factory: F) -> Result<Self> {
        let tokens = Lexer::new(query).tokenize()?;
        Ok(Parser {
            query,
            tokens,
            position: 0,
            factory,
            max_depth: DEFAULT_MAX_DEPTH,
        })
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Parse the whole token stream as exactly one compound term
    pub fn to_term(&mut self) -> Result<F::Node> {
        if self.tokens.is_empty() {
            return Err(self.error("No tokens".to_string()));
        }
        self.position = 0;
        let root = self.parse_operand(0)?;
        if self.position != self.tokens.len() {
            return Err(self.error(format!(
                "Too many terms ({} != {})",
                self.position,
                self.tokens.len()
            )));
        }
        match root {
            Operand::Term(node) => {
                debug!(query = %self.query, tokens = self.tokens.len(), "Query parsed");
                Ok(self.factory.finish(node))
            }
            _ => Err(self.error("Not a term".to_string())),
        }
    }

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() {
            self.position += 1;
        }
    }

    fn parse_operand(&mut self, depth: usize) -> Result<Operand<F::Node>> {
        let token = match self.current() {
            None => {
                return Err(self.error(format!("End of token stream at #{}", self.position)))
            }
            Some(t) => t.clone(),
        };

        match token {
            Token::Close => Err(self.error(format!("Closing too soon at #{}", self.position))),
            Token::Open => self.parse_compound(depth),
            Token::Symbol(s) => {
                self.advance();
                Ok(Operand::Symbol(s))
            }
            literal => {
                self.advance();
                match literal.literal() {
                    Some(v) => Ok(Operand::Literal(v)),
                    None => Err(self.error(format!("Unexpected token {}", literal))),
                }
            }
        }
    }

    fn parse_compound(&mut self, depth: usize) -> Result<Operand<F::Node>> {
        if depth >= self.max_depth {
            return Err(self.error(format!(
                "Terms nested deeper than {} at #{}",
                self.max_depth, self.position
            )));
        }
        self.advance();

        let op = match self.current() {
            None => {
                return Err(self.error(format!("End of token stream at #{}", self.position)))
            }
            Some(Token::Close) => {
                return Err(self.error(format!("No operator found at #{}", self.position)))
            }
            Some(Token::Symbol(s)) => Operator::from_name(s),
            Some(other) => {
                return Err(self.error(format!(
                    "Operator expected at #{}, but {} provided",
                    self.position, other
                )))
            }
        };
        self.advance();

        let mut operands = Vec::new();
        loop {
            match self.current() {
                None => {
                    return Err(self.error(format!("End of token stream at #{}", self.position)))
                }
                Some(Token::Close) => {
                    self.advance();
                    break;
                }
                Some(_) => operands.push(self.parse_operand(depth + 1)?),
            }
        }

        self.factory
            .make(op, operands)
            .map(Operand::Term)
            .map_err(|e| self.error(e.to_string()))
    }

    fn error(&self, message: String) -> FactbaseError {
        FactbaseError::Parse {
            message,
            query: self.query.to_string(),
            tokens: format!(", tokens: {}", dump(&self.tokens)),
        }
    }
}
