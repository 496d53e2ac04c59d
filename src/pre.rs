//! Mutation hook
//!
//! [`Pre`] runs a callback on every fact right after it is inserted and
//! before the caller gets it. The callback's writes are ordinary writes: a
//! transaction that rolls back discards them with everything else.
//!
//! Insert and hook form one boundary of their own, nested in the caller's
//! if there is one. A failing hook outside any transaction leaves no fact
//! behind.

use crate::config::StoreConfig;
use crate::error::Result;
use crate::fact::Fact;
use crate::factbase::{Factbase, Query};
use crate::fql_executor::OperatorRegistry;
use std::sync::Arc;

pub type InsertHook = Arc<dyn Fn(&Fact) -> Result<()> + Send + Sync>;

#[derive(Clone)]
pub struct Pre<B> {
    inner: B,
    hook: InsertHook,
}

impl<B: Factbase> Pre<B> {
    pub fn new<F>(inner: B, hook: F) -> Self
    where
        F: Fn(&Fact) -> Result<()> + Send + Sync + 'static,
    {
        Pre {
            inner,
            hook: Arc::new(hook),
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }
}

impl<B: Factbase> Factbase for Pre<B> {
    fn insert(&self) -> Result<Fact> {
        self.inner.txn(|inner| {
            let fact = inner.insert()?;
            (self.hook)(&fact)?;
            Ok(fact)
        })
    }

    fn query(&self, query: &str) -> Result<Query> {
        self.inner.query(query)
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn txn<R, F>(&self, body: F) -> Result<R>
    where
        F: FnOnce(&Self) -> Result<R>,
    {
        self.inner.txn(|_| body(self))
    }

    fn config(&self) -> &StoreConfig {
        self.inner.config()
    }

    fn operators(&self) -> &OperatorRegistry {
        self.inner.operators()
    }
}
