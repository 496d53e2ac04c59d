//! Parameter overlay
//!
//! An [`Overlay`] puts a primary fact in front of a secondary source so that
//! `$name` symbols can be resolved while a query runs, without writing the
//! parameters into the fact itself. Plain names go to the primary only.
//! `$` names walk down the chain of secondaries until a fact or a mapping is
//! reached, and are looked up there without the `$`.

use crate::fact::{render, Fact, Properties, Subject};
use crate::types::{FactId, Params, Value};
use std::fmt;
use std::sync::Arc;

/// Where `$name` lookups end up
#[derive(Debug, Clone)]
pub enum Source {
    Fact(Fact),
    Mapping(Params),
    Overlay(Arc<Overlay>),
}

impl From<Params> for Source {
    fn from(params: Params) -> Self {
        Source::Mapping(params)
    }
}

impl From<Fact> for Source {
    fn from(fact: Fact) -> Self {
        Source::Fact(fact)
    }
}

impl From<Overlay> for Source {
    fn from(overlay: Overlay) -> Self {
        Source::Overlay(Arc::new(overlay))
    }
}

#[derive(Debug, Clone)]
pub struct Overlay {
    id: FactId,
    primary: Option<Fact>,
    secondary: Arc<Source>,
}

impl Overlay {
    pub fn new(primary: Option<Fact>, secondary: impl Into<Source>) -> Self {
        Overlay::shared(primary, Arc::new(secondary.into()))
    }

    /// Overlay reusing an already shared secondary source
    pub fn shared(primary: Option<Fact>, secondary: Arc<Source>) -> Self {
        let id = primary.as_ref().map(Fact::id).unwrap_or_else(FactId::next);
        Overlay {
            id,
            primary,
            secondary,
        }
    }

    pub fn primary(&self) -> Option<&Fact> {
        self.primary.as_ref()
    }

    /// First value of a property, `$` names included
    pub fn get(&self, name: &str) -> Option<Value> {
        self.lookup(name).and_then(|values| values.into_iter().next())
    }

    fn resolve_parameter(&self, name: &str) -> Option<Vec<Value>> {
        let mut source = self.secondary.as_ref();
        loop {
            match source {
                Source::Fact(f) => return f.history(name),
                Source::Mapping(p) => return p.get(name).cloned(),
                Source::Overlay(o) => source = o.secondary.as_ref(),
            }
        }
    }
}

impl Subject for Overlay {
    fn identity(&self) -> FactId {
        self.id
    }

    fn lookup(&self, name: &str) -> Option<Vec<Value>> {
        match name.strip_prefix('$') {
            Some(param) => self.resolve_parameter(param),
            None => self.primary.as_ref().and_then(|f| f.history(name)),
        }
    }

    /// Union of the primary's names and every name along the secondary chain
    fn property_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .primary
            .as_ref()
            .map(Fact::all_properties)
            .unwrap_or_default();
        let mut source = self.secondary.as_ref();
        loop {
            let more = match source {
                Source::Fact(f) => f.all_properties(),
                Source::Mapping(p) => p.names().cloned().collect(),
                Source::Overlay(o) => {
                    if let Some(f) = &o.primary {
                        merge(&mut names, f.all_properties());
                    }
                    source = o.secondary.as_ref();
                    continue;
                }
            };
            merge(&mut names, more);
            return names;
        }
    }

    fn parameters(&self) -> Option<Arc<Source>> {
        Some(Arc::clone(&self.secondary))
    }
}

fn merge(names: &mut Vec<String>, more: Vec<String>) {
    for name in more {
        if !names.contains(&name) {
            names.push(name);
        }
    }
}

/// Renders the primary only
impl fmt::Display for Overlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.primary {
            Some(fact) => write!(f, "{}", fact),
            None => write!(f, "{}", render(&Properties::default())),
        }
    }
}
