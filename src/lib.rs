//! Factbase - embeddable in-memory fact store
//!
//! Facts are schemaless bags of multi-valued properties. They are queried
//! with FQL, a small prefix S-expression language:
//!
//! ```
//! use factbase_core::{FactStore, Factbase};
//!
//! let fb = FactStore::new();
//! let f = fb.insert().unwrap();
//! f.set("kind", "order").unwrap();
//! f.set("total", 120).unwrap();
//! let big = fb.query("(and (eq kind 'order') (gt total 100))").unwrap();
//! assert_eq!(big.to_vec().unwrap().len(), 1);
//! ```
//!
//! # Architecture
//!
//! - Fact Layer: append-only property histories behind per-fact locks
//! - FQL Layer: lexer, parser, AST with simplifier, per-pass evaluation cache
//! - Store Layer: lazy queries, nested transactions with journaled rollback
//! - Decorators: rules checked at the close of each mutation boundary,
//!   insert hooks, parameter overlays for `$name` bindings

pub mod config;
pub mod error;
pub mod fact;
pub mod types;

// Parameter overlays
pub mod overlay;

// FQL (Fact Query Language) modules
pub mod fql_lexer;
pub mod fql_ast;
pub mod fql_parser;
pub mod fql_cache;
pub mod fql_executor;

// Store and transaction modules
pub mod transaction;
pub mod factbase;
pub mod storage;

// Decorators
pub mod rules;
pub mod pre;

pub use config::StoreConfig;
pub use error::{FactbaseError, Result};
pub use fact::{Change, Fact, FactListener, Subject};
pub use types::{FactId, Params, Value};
pub use overlay::{Overlay, Source};

// FQL exports
pub use fql_ast::{Operand, Operator, Term, TermId};
pub use fql_parser::{Parser as FQLParser, TermBuilder, TermFactory};
pub use fql_cache::{CacheStats, EvalCache};
pub use fql_executor::{CustomOperator, Datum, Executor, OperatorRegistry};

// Store exports
pub use factbase::{FactStore, Factbase, Query, QueryIter};
pub use transaction::{TransactionManager, TransactionState, TransactionStats};
pub use storage::FactMap;

// Decorator exports
pub use rules::{RuleValidator, Rules};
pub use pre::{InsertHook, Pre};
