//! Rules Layer
//!
//! Wraps a [`Factbase`] with one predicate every fact must satisfy. Outside
//! a transaction each property write is checked right after it is made and
//! undone if the fact no longer satisfies the rule. Inside a transaction
//! checks are deferred: facts inserted or written are collected, and the
//! whole set is validated when the outermost boundary closes. A violation
//! fails the boundary, which rolls back everything made inside it.
//!
//! The predicate is evaluated against the fact alone; aggregates in a rule
//! see an empty fact set.

use crate::error::{FactbaseError, Result};
use crate::fact::{Change, Fact, FactListener};
use crate::factbase::{Factbase, Query};
use crate::config::StoreConfig;
use crate::fql_ast::Term;
use crate::fql_executor::{Executor, OperatorRegistry};
use crate::fql_parser::{Parser, TermBuilder};
use crate::types::FactId;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Default)]
struct ValidatorState {
    depth: usize,
    touched: Vec<Fact>,
}

/// Checks facts against a compiled rule
pub struct RuleValidator {
    rule: Arc<Term>,
    text: String,
    uid: Option<String>,
    operators: OperatorRegistry,
    state: Mutex<ValidatorState>,
}

impl RuleValidator {
    fn new(
        rule: &str,
        uid: Option<String>,
        config: &StoreConfig,
        operators: &OperatorRegistry,
    ) -> Result<Self> {
        let term = Parser::new(rule, TermBuilder)?
            .with_max_depth(config.max_depth)
            .to_term()?;
        Ok(RuleValidator {
            text: term.to_string(),
            rule: term,
            uid,
            operators: operators.clone(),
            state: Mutex::new(ValidatorState::default()),
        })
    }

    pub fn rule(&self) -> &str {
        &self.text
    }

    /// Fails with a rule violation unless the rule holds for the fact
    pub fn validate(&self, fact: &Fact) -> Result<()> {
        if Executor::new(&self.operators).test(&self.rule, fact, &[])? {
            return Ok(());
        }
        let uid = self
            .uid
            .as_ref()
            .and_then(|name| fact.get(name).ok())
            .map(|v| format!(" #{}", v))
            .unwrap_or_default();
        warn!(rule = %self.text, fact = %fact, "Rule violated");
        Err(FactbaseError::RuleViolation {
            rule: self.text.clone(),
            fact: fact.to_string(),
            uid,
        })
    }

    /// Returns true when this opens the outermost boundary
    fn enter(&self) -> bool {
        let mut state = self.state.lock();
        state.depth += 1;
        state.depth == 1
    }

    fn leave(&self) {
        let mut state = self.state.lock();
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            state.touched.clear();
        }
    }

    /// Remember the fact for the closing check; false outside a boundary
    fn defer(&self, fact: &Fact) -> bool {
        let mut state = self.state.lock();
        if state.depth == 0 {
            return false;
        }
        let id: FactId = fact.id();
        if !state.touched.iter().any(|f| f.id() == id) {
            state.touched.push(fact.detached());
        }
        true
    }

    fn take_touched(&self) -> Vec<Fact> {
        std::mem::take(&mut self.state.lock().touched)
    }
}

impl FactListener for RuleValidator {
    fn on_write(&self, fact: &Fact, _change: &Change) -> Result<()> {
        if self.defer(fact) {
            return Ok(());
        }
        self.validate(fact)
    }
}

struct Boundary<'a>(&'a RuleValidator);

impl<'a> Drop for Boundary<'a> {
    fn drop(&mut self) {
        self.0.leave();
    }
}

/// A [`Factbase`] that keeps every fact valid against a rule
#[derive(Clone)]
pub struct Rules<B> {
    inner: B,
    validator: Arc<RuleValidator>,
}

impl<B: Factbase> Rules<B> {
    pub fn new(inner: B, rule: &str) -> Result<Self> {
        Self::build(inner, rule, None)
    }

    /// Violations name the fact by the first value of its `uid` property
    pub fn with_uid(inner: B, rule: &str, uid: &str) -> Result<Self> {
        Self::build(inner, rule, Some(uid.to_string()))
    }

    fn build(inner: B, rule: &str, uid: Option<String>) -> Result<Self> {
        let validator = RuleValidator::new(rule, uid, inner.config(), inner.operators())?;
        debug!(rule = %validator.text, "Rules installed");
        Ok(Rules {
            inner,
            validator: Arc::new(validator),
        })
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn validator(&self) -> &RuleValidator {
        &self.validator
    }

    fn listener(&self) -> Arc<dyn FactListener> {
        Arc::clone(&self.validator) as Arc<dyn FactListener>
    }
}

impl<B: Factbase> Factbase for Rules<B> {
    fn insert(&self) -> Result<Fact> {
        let fact = self.inner.insert()?;
        self.validator.defer(&fact);
        Ok(fact.observed_by(self.listener()))
    }

    fn query(&self, query: &str) -> Result<Query> {
        Ok(self.inner.query(query)?.with_listener(self.listener()))
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn txn<R, F>(&self, body: F) -> Result<R>
    where
        F: FnOnce(&Self) -> Result<R>,
    {
        self.inner.txn(|_| {
            let outermost = self.validator.enter();
            let _boundary = Boundary(&self.validator);
            let result = body(self)?;
            if outermost {
                for fact in self.validator.take_touched() {
                    self.validator.validate(&fact)?;
                }
            }
            Ok(result)
        })
    }

    fn config(&self) -> &StoreConfig {
        self.inner.config()
    }

    fn operators(&self) -> &OperatorRegistry {
        self.inner.operators()
    }
}
