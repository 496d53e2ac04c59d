//! Evaluation cache
//!
//! Memoizes term results for the length of one evaluation pass. A pass is
//! one scan of the store by a query (or one rule check); a fresh cache is
//! created for every pass, so nothing computed against one fact population
//! leaks into the next.
//!
//! Ordinary terms are keyed by (term, subject identity). Aggregates ignore
//! the subject and are keyed by the term alone, which makes them run once
//! per pass however many facts are scanned. Compiled regexes for `matches`
//! live here too, as does the last value each `prev` term saw.

use crate::error::Result;
use crate::fact::Subject;
use crate::fql_ast::{Term, TermId};
use crate::fql_executor::Datum;
use crate::types::FactId;
use regex::Regex;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Local(TermId, FactId),
    Global(TermId),
}

impl CacheKey {
    pub fn for_term(term: &Term, subject: &dyn Subject) -> Self {
        if term.op().is_aggregate() {
            CacheKey::Global(term.id())
        } else {
            CacheKey::Local(term.id(), subject.identity())
        }
    }
}

#[derive(Debug, Default)]
pub struct EvalCache {
    results: HashMap<CacheKey, Datum>,
    regexes: HashMap<String, Regex>,
    previous: HashMap<TermId, Datum>,
    hits: usize,
    misses: usize,
}

impl EvalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<Datum> {
        match self.results.get(key) {
            Some(datum) => {
                self.hits += 1;
                Some(datum.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn put(&mut self, key: CacheKey, datum: Datum) {
        self.results.insert(key, datum);
    }

    /// Compiled pattern, built on first use
    pub fn regex(&mut self, pattern: &str) -> Result<&Regex> {
        if !self.regexes.contains_key(pattern) {
            let re = Regex::new(pattern)?;
            self.regexes.insert(pattern.to_string(), re);
        }
        Ok(&self.regexes[pattern])
    }

    /// Store `current` for the term and hand back what was stored before,
    /// nil on the first call in the pass
    pub fn swap_previous(&mut self, term: TermId, current: Datum) -> Datum {
        self.previous.insert(term, current).unwrap_or(Datum::Nil)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.results.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub hits: usize,
    pub misses: usize,
}
