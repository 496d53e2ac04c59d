//! Fact store
//!
//! [`FactStore`] owns an ordered sequence of facts and hands out shared
//! handles to them. Queries are compiled once and scanned lazily: every
//! call to [`Query::iter`] walks the store as it is at that moment and
//! evaluates the term against each fact, with the whole store as the fact
//! set for aggregates.
//!
//! The [`Factbase`] trait is the seam decorators plug into: [`Rules`] and
//! [`Pre`] wrap any `Factbase` and are `Factbase`s themselves.
//!
//! [`Rules`]: crate::rules::Rules
//! [`Pre`]: crate::pre::Pre

use crate::config::StoreConfig;
use crate::error::{FactbaseError, Result};
use crate::fact::{Fact, FactCell, FactListener, RESERVED_NAMES};
use crate::fql_ast::Term;
use crate::fql_executor::{CustomOperator, Datum, Executor, OperatorRegistry};
use crate::fql_parser::{Parser, TermBuilder};
use crate::overlay::{Overlay, Source};
use crate::transaction::{TransactionManager, TransactionStats};
use crate::types::Params;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Operations shared by the store and its decorators
pub trait Factbase {
    /// Append a new empty fact and return a handle to it
    fn insert(&self) -> Result<Fact>;

    /// Compile a query; nothing is scanned until it is iterated
    fn query(&self, query: &str) -> Result<Query>;

    fn size(&self) -> usize;

    /// Run `body` inside a transaction boundary. An error from `body`, or
    /// from validation when the outermost boundary closes, undoes every
    /// insert and write made inside it.
    fn txn<R, F>(&self, body: F) -> Result<R>
    where
        F: FnOnce(&Self) -> Result<R>;

    fn config(&self) -> &StoreConfig;

    fn operators(&self) -> &OperatorRegistry;
}

/// In-memory fact store
#[derive(Clone)]
pub struct FactStore {
    facts: Arc<RwLock<Vec<Fact>>>,
    txns: Arc<TransactionManager>,
    config: Arc<StoreConfig>,
    operators: Arc<OperatorRegistry>,
    reserved: Arc<Vec<String>>,
}

impl FactStore {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        let reserved = config
            .reserved_names
            .iter()
            .filter(|n| !RESERVED_NAMES.contains(&n.as_str()))
            .cloned()
            .collect();
        FactStore {
            facts: Arc::new(RwLock::new(Vec::new())),
            txns: Arc::new(TransactionManager::new()),
            config: Arc::new(config),
            operators: Arc::new(OperatorRegistry::new()),
            reserved: Arc::new(reserved),
        }
    }

    /// Register an operator for use in queries and rules
    pub fn with_operator<F>(mut self, name: &str, operator: F) -> Result<Self>
    where
        F: Fn(&[Datum]) -> Result<Datum> + Send + Sync + 'static,
    {
        let operator: CustomOperator = Arc::new(operator);
        Arc::make_mut(&mut self.operators).register(name, operator)?;
        Ok(self)
    }

    pub fn stats(&self) -> TransactionStats {
        self.txns.stats()
    }

    /// Handles to every fact, in insertion order
    pub fn facts(&self) -> Vec<Fact> {
        self.snapshot().into_iter().map(|f| self.attach(f)).collect()
    }

    /// Handle that journals its writes into open transactions
    fn attach(&self, fact: Fact) -> Fact {
        fact.observed_by(Arc::clone(&self.txns) as Arc<dyn FactListener>)
    }

    pub(crate) fn snapshot(&self) -> Vec<Fact> {
        self.facts.read().clone()
    }

    fn fact_at(&self, position: usize) -> Option<Fact> {
        self.facts.read().get(position).cloned()
    }

    pub(crate) fn new_cell(&self) -> Arc<FactCell> {
        Arc::new(FactCell::new(Arc::clone(&self.reserved)))
    }

    pub(crate) fn replace_all(&self, facts: Vec<Fact>) {
        *self.facts.write() = facts;
    }
}

impl Default for FactStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FactStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactStore")
            .field("size", &self.size())
            .field("config", &self.config)
            .field("operators", &self.operators)
            .finish()
    }
}

impl Factbase for FactStore {
    fn insert(&self) -> Result<Fact> {
        let fact = Fact::from_cell(self.new_cell());
        self.facts.write().push(fact.clone());
        Ok(self.attach(fact))
    }

    fn query(&self, query: &str) -> Result<Query> {
        let term = Parser::new(query, TermBuilder)?
            .with_max_depth(self.config.max_depth)
            .to_term()?;
        debug!(query = %query, term = %term, "Query compiled");
        Ok(Query {
            store: self.clone(),
            text: query.to_string(),
            term,
            decorators: Vec::new(),
        })
    }

    fn size(&self) -> usize {
        self.facts.read().len()
    }

    fn txn<R, F>(&self, body: F) -> Result<R>
    where
        F: FnOnce(&Self) -> Result<R>,
    {
        let guard = self.txns.begin(&self.facts);
        match body(self) {
            Ok(r) => {
                guard.commit();
                Ok(r)
            }
            Err(e) => {
                guard.rollback();
                Err(e)
            }
        }
    }

    fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn operators(&self) -> &OperatorRegistry {
        &self.operators
    }
}

/// A compiled query over a store
#[derive(Clone)]
pub struct Query {
    store: FactStore,
    text: String,
    term: Arc<Term>,
    decorators: Vec<Arc<dyn FactListener>>,
}

impl Query {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn term(&self) -> &Arc<Term> {
        &self.term
    }

    /// Attach a listener to every fact this query yields
    pub fn with_listener(mut self, listener: Arc<dyn FactListener>) -> Self {
        self.decorators.push(listener);
        self
    }

    /// One lazy pass over the store
    pub fn iter(&self) -> QueryIter<'_> {
        self.pass(None)
    }

    /// Matching facts with `$name` symbols bound to `params`
    pub fn each(&self, params: &Params) -> Result<Vec<Fact>> {
        let source = if self.term.is_abstract() {
            Some(Arc::new(Source::Mapping(params.clone())))
        } else {
            None
        };
        self.pass(source).collect()
    }

    /// All matching facts
    pub fn to_vec(&self) -> Result<Vec<Fact>> {
        self.iter().collect()
    }

    /// Evaluate a static term once, with the whole store as the fact set
    pub fn one(&self, params: &Params) -> Result<Datum> {
        if !self.term.is_static() {
            return Err(self.wrap(FactbaseError::Type(format!(
                "A static term expected, but {} reads properties of a fact",
                self.term
            ))));
        }
        let all = self.store.snapshot();
        let subject = Overlay::new(None, params.clone());
        Executor::new(&self.store.operators)
            .with_tracing(self.store.config.trace_evaluation)
            .evaluate(&self.term, &subject, &all)
            .map_err(|e| self.wrap(e))
    }

    fn pass(&self, params: Option<Arc<Source>>) -> QueryIter<'_> {
        QueryIter {
            query: self,
            executor: Executor::new(&self.store.operators)
                .with_tracing(self.store.config.trace_evaluation),
            all: self.store.snapshot(),
            params,
            position: 0,
            matched: 0,
            started: Instant::now(),
            finished: false,
        }
    }

    fn decorate(&self, fact: Fact) -> Fact {
        self.decorators
            .iter()
            .fold(self.store.attach(fact), |f, l| f.observed_by(Arc::clone(l)))
    }

    fn wrap(&self, source: FactbaseError) -> FactbaseError {
        FactbaseError::Query {
            query: self.text.clone(),
            ast: self.term.to_string(),
            source: Box::new(source),
        }
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Query({})", self.term)
    }
}

impl<'q> IntoIterator for &'q Query {
    type Item = Result<Fact>;
    type IntoIter = QueryIter<'q>;

    fn into_iter(self) -> QueryIter<'q> {
        self.iter()
    }
}

/// Scan in progress. Facts appended while scanning are evaluated if the scan
/// has not passed the end yet; the fact set for aggregates is fixed when the
/// scan starts. The first error ends the scan.
pub struct QueryIter<'q> {
    query: &'q Query,
    executor: Executor<'q>,
    all: Vec<Fact>,
    params: Option<Arc<Source>>,
    position: usize,
    matched: usize,
    started: Instant,
    finished: bool,
}

impl<'q> QueryIter<'q> {
    fn finish(&mut self) {
        self.finished = true;
        let elapsed = self.started.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;
        debug!(
            query = %self.query.text,
            scanned = self.position,
            matched = self.matched,
            elapsed_ms,
            "Query pass finished"
        );
        if elapsed_ms > self.query.store.config.slow_query_ms {
            warn!(
                query = %self.query.text,
                scanned = self.position,
                elapsed_ms,
                "Slow query pass"
            );
        }
    }
}

impl<'q> Iterator for QueryIter<'q> {
    type Item = Result<Fact>;

    fn next(&mut self) -> Option<Result<Fact>> {
        if self.finished {
            return None;
        }
        loop {
            let fact = match self.query.store.fact_at(self.position) {
                Some(f) => f,
                None => {
                    self.finish();
                    return None;
                }
            };
            self.position += 1;
            let verdict = match &self.params {
                Some(p) => {
                    let view = Overlay::shared(Some(fact.clone()), Arc::clone(p));
                    self.executor.verdict(&self.query.term, &view, &self.all)
                }
                None => self.executor.verdict(&self.query.term, &fact, &self.all),
            };
            match verdict {
                Ok(true) => {
                    self.matched += 1;
                    return Some(Ok(self.query.decorate(fact)));
                }
                Ok(false) => continue,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(self.query.wrap(e)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[test]
    fn test_insert_and_size() {
        let fb = FactStore::new();
        assert_eq!(fb.size(), 0);
        let f = fb.insert().unwrap();
        f.set("foo", 42).unwrap();
        assert_eq!(fb.size(), 1);
        assert_eq!(fb.facts()[0].get("foo").unwrap(), Value::Int(42));
    }

    #[test]
    fn test_query_is_restartable() {
        let fb = FactStore::new();
        fb.insert().unwrap().set("foo", 1).unwrap();
        let q = fb.query("(exists foo)").unwrap();
        assert_eq!(q.to_vec().unwrap().len(), 1);
        fb.insert().unwrap().set("foo", 2).unwrap();
        assert_eq!(q.to_vec().unwrap().len(), 2);
    }

    #[test]
    fn test_non_boolean_result_fails() {
        let fb = FactStore::new();
        fb.insert().unwrap().set("foo", 1).unwrap();
        let q = fb.query("(size foo)").unwrap();
        let err = q.to_vec().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Boolean expected"), "{}", msg);
        assert!(msg.contains("(size foo)"), "{}", msg);
    }

    #[test]
    fn test_nil_result_fails() {
        let fb = FactStore::new();
        fb.insert().unwrap().set("foo", 1).unwrap();
        for text in ["(max zz)", "(either zz yy)", "(at 5 foo)"] {
            let err = fb.query(text).unwrap().to_vec().unwrap_err();
            assert!(err.to_string().contains("nil received"), "{} => {}", text, err);
        }
        // nil operands of the logical operators still count as false
        let q = fb.query("(or (either zz yy) (exists foo))").unwrap();
        assert_eq!(q.to_vec().unwrap().len(), 1);
    }

    #[test]
    fn test_error_fuses_the_scan() {
        let fb = FactStore::new();
        for i in 0..3 {
            fb.insert().unwrap().set("foo", i).unwrap();
        }
        let q = fb.query("(not foo)").unwrap();
        let results: Vec<Result<Fact>> = q.iter().collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }

    #[test]
    fn test_reserved_names_from_config() {
        let config = StoreConfig {
            reserved_names: vec!["secret".to_string()],
            ..StoreConfig::default()
        };
        let fb = FactStore::with_config(config);
        let f = fb.insert().unwrap();
        assert!(f.set("secret", 1).is_err());
        f.set("open", 1).unwrap();
    }

    #[test]
    fn test_one_requires_static_term() {
        let fb = FactStore::new();
        fb.insert().unwrap().set("foo", 42).unwrap();
        let q = fb.query("(agg (eq foo $v) (count))").unwrap();
        assert_eq!(q.one(&Params::new().with("v", 42)).unwrap(), Datum::scalar(1));
        assert!(fb.query("(eq foo 1)").unwrap().one(&Params::new()).is_err());
    }

    #[test]
    fn test_txn_returns_body_value() {
        let fb = FactStore::new();
        let n = fb
            .txn(|fbt| {
                fbt.insert()?.set("foo", 1)?;
                Ok(fbt.size())
            })
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(fb.stats().committed, 1);
    }
}
